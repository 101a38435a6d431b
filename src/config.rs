//! Configuration types for identity-document ingestion.
//!
//! All ingestion behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`]. The extraction endpoint list, crop paddings,
//! timeouts and the three external collaborators (extraction transport,
//! object storage, record store) all live here so one value describes a
//! deployment completely.

use crate::error::IngestError;
use crate::pipeline::extract::ExtractionTransport;
use crate::pipeline::upload::ObjectStorage;
use crate::progress::ProgressCallback;
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default extraction service origin.
pub const DEFAULT_EXTRACTION_BASE_URL: &str = "https://api.mindee.net";

/// Configuration for an ingestion run.
///
/// Built via [`IngestConfig::builder()`] or [`IngestConfig::from_env()`].
///
/// # Example
/// ```rust
/// use idscan_ingest::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .api_key("md_test")
///     .model_id("00f4f65a")
///     .face_padding(12)
///     .build()
///     .unwrap();
/// assert_eq!(config.endpoints().len(), 2);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Extraction service API key. Required before any network call.
    pub api_key: Option<String>,

    /// Model identifier bound by the custom-document and inference-v2 routes.
    pub model_id: Option<String>,

    /// Account name for the account-scoped product route. That route is only
    /// added to the default endpoint list when both account and product are set.
    pub account: Option<String>,

    /// Product slug for the account-scoped route.
    pub product: Option<String>,

    /// Extraction service origin, without trailing slash.
    pub extraction_base_url: String,

    /// Explicit endpoint list. `None` derives the default list from the fields above.
    pub endpoints: Option<Vec<ExtractionEndpoint>>,

    /// Per-endpoint request timeout in seconds. Default: 60.
    ///
    /// A timed-out endpoint counts as a transport failure and the client moves
    /// on to the next endpoint.
    pub extraction_timeout_secs: u64,

    /// Padding in pixels around the face polygon's box. Default: 10.
    ///
    /// Portrait polygons are drawn tight to the photo frame; without slack
    /// the chin and the top of the head are clipped.
    pub face_padding: u32,

    /// Padding in pixels around the signature polygon's box. Default: 5.
    pub signature_padding: u32,

    /// JPEG quality (1–100) for crops and re-encoded scans. Default: 92.
    pub jpeg_quality: u8,

    /// Object-name prefix inside the storage bucket. Default: `identity-documents`.
    pub storage_prefix: String,

    /// Per-upload timeout in seconds. Default: 30.
    pub upload_timeout_secs: u64,

    /// Download timeout for URL capture inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Pre-constructed extraction transport. Defaults to the reqwest transport.
    pub transport: Option<Arc<dyn ExtractionTransport>>,

    /// Object storage for the scan and crops. Required by `ingest`.
    pub storage: Option<Arc<dyn ObjectStorage>>,

    /// Record store for the identity record. Required by `ingest`.
    pub store: Option<Arc<dyn RecordStore>>,

    /// Optional observer for state transitions and non-fatal warnings.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model_id: None,
            account: None,
            product: None,
            extraction_base_url: DEFAULT_EXTRACTION_BASE_URL.to_string(),
            endpoints: None,
            extraction_timeout_secs: 60,
            face_padding: 10,
            signature_padding: 5,
            jpeg_quality: 92,
            storage_prefix: "identity-documents".to_string(),
            upload_timeout_secs: 30,
            download_timeout_secs: 120,
            transport: None,
            storage: None,
            store: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model_id", &self.model_id)
            .field("account", &self.account)
            .field("product", &self.product)
            .field("extraction_base_url", &self.extraction_base_url)
            .field("endpoints", &self.endpoints)
            .field("extraction_timeout_secs", &self.extraction_timeout_secs)
            .field("face_padding", &self.face_padding)
            .field("signature_padding", &self.signature_padding)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("storage_prefix", &self.storage_prefix)
            .field("transport", &self.transport.as_ref().map(|_| "<dyn ExtractionTransport>"))
            .field("storage", &self.storage.as_ref().map(|_| "<dyn ObjectStorage>"))
            .field("store", &self.store.as_ref().map(|_| "<dyn RecordStore>"))
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    /// Builder pre-filled from `IDSCAN_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `IDSCAN_API_KEY` | `api_key` |
    /// | `IDSCAN_MODEL_ID` | `model_id` |
    /// | `IDSCAN_ACCOUNT` | `account` |
    /// | `IDSCAN_PRODUCT` | `product` |
    /// | `IDSCAN_BASE_URL` | `extraction_base_url` |
    pub fn from_env() -> IngestConfigBuilder {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let mut builder = Self::builder();
        builder.config.api_key = var("IDSCAN_API_KEY");
        builder.config.model_id = var("IDSCAN_MODEL_ID");
        builder.config.account = var("IDSCAN_ACCOUNT");
        builder.config.product = var("IDSCAN_PRODUCT");
        if let Some(url) = var("IDSCAN_BASE_URL") {
            builder = builder.extraction_base_url(url);
        }
        builder
    }

    /// The ordered endpoint list the extraction client will walk.
    pub fn endpoints(&self) -> Vec<ExtractionEndpoint> {
        if let Some(ref explicit) = self.endpoints {
            return explicit.clone();
        }
        let mut list = vec![ExtractionEndpoint::new(EndpointKind::CustomDocument)];
        if let (Some(account), Some(product)) = (&self.account, &self.product) {
            list.push(ExtractionEndpoint::new(EndpointKind::AccountProduct {
                account: account.clone(),
                product: product.clone(),
            }));
        }
        list.push(ExtractionEndpoint::new(EndpointKind::InferenceV2));
        list
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn model_id(mut self, id: impl Into<String>) -> Self {
        self.config.model_id = Some(id.into());
        self
    }

    pub fn account_product(mut self, account: impl Into<String>, product: impl Into<String>) -> Self {
        self.config.account = Some(account.into());
        self.config.product = Some(product.into());
        self
    }

    pub fn extraction_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.extraction_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoints(mut self, endpoints: Vec<ExtractionEndpoint>) -> Self {
        self.config.endpoints = Some(endpoints);
        self
    }

    pub fn extraction_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extraction_timeout_secs = secs.max(1);
        self
    }

    pub fn face_padding(mut self, px: u32) -> Self {
        self.config.face_padding = px;
        self
    }

    pub fn signature_padding(mut self, px: u32) -> Self {
        self.config.signature_padding = px;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.storage_prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ExtractionTransport>) -> Self {
        self.config.transport = Some(transport);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.config.storage = Some(storage);
        self
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.config.store = Some(store);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Missing credentials are not a build error: they surface as
    /// [`IngestError::ProviderNotConfigured`] when extraction is attempted,
    /// so store-only callers (status updates, lookups) need none.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.jpeg_quality == 0 || c.jpeg_quality > 100 {
            return Err(IngestError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if let Some(ref endpoints) = c.endpoints {
            if endpoints.is_empty() {
                return Err(IngestError::InvalidConfig(
                    "Endpoint list must not be empty".into(),
                ));
            }
        }
        if !c.extraction_base_url.starts_with("http://")
            && !c.extraction_base_url.starts_with("https://")
        {
            return Err(IngestError::InvalidConfig(format!(
                "Extraction base URL must be HTTP(S), got '{}'",
                c.extraction_base_url
            )));
        }
        Ok(self.config)
    }
}

// ── Endpoints ────────────────────────────────────────────────────────────

/// One integration surface of the extraction provider.
///
/// Provider API generations differ in route shape and in where the model is
/// bound; a deployment lists several so a retired route degrades to the next
/// one instead of failing every scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointKind {
    /// `/v1/products/mindee/custom-document/v1/predict?model_id={model}`.
    CustomDocument,
    /// `/v1/products/{account}/{product}/v1/predict`; the model is implied by the route.
    AccountProduct { account: String, product: String },
    /// `/v2/inference/{model}/predict`.
    InferenceV2,
    /// A fully specified URL, used verbatim.
    Custom { url: String },
}

impl EndpointKind {
    /// Whether the route cannot be built without a model identifier.
    pub fn needs_model(&self) -> bool {
        matches!(self, EndpointKind::CustomDocument | EndpointKind::InferenceV2)
    }
}

/// An endpoint entry in the ordered fallback list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionEndpoint {
    pub kind: EndpointKind,
    /// Multipart field name carrying the image. Default: `document`.
    pub file_field: String,
}

impl ExtractionEndpoint {
    pub fn new(kind: EndpointKind) -> Self {
        Self {
            kind,
            file_field: "document".to_string(),
        }
    }

    /// Short label used in logs and error messages.
    pub fn label(&self) -> String {
        match &self.kind {
            EndpointKind::CustomDocument => "custom-document".to_string(),
            EndpointKind::AccountProduct { account, product } => format!("{account}/{product}"),
            EndpointKind::InferenceV2 => "inference-v2".to_string(),
            EndpointKind::Custom { url } => url.clone(),
        }
    }

    /// Resolve the request URL, or `None` when the route needs a missing model id.
    pub fn url(&self, base: &str, model_id: Option<&str>) -> Option<String> {
        if self.kind.needs_model() && model_id.is_none() {
            return None;
        }
        let base = base.trim_end_matches('/');
        let model = model_id.unwrap_or_default();
        let url = match &self.kind {
            EndpointKind::CustomDocument => {
                format!("{base}/v1/products/mindee/custom-document/v1/predict?model_id={model}")
            }
            EndpointKind::AccountProduct { account, product } => {
                format!("{base}/v1/products/{account}/{product}/v1/predict")
            }
            EndpointKind::InferenceV2 => format!("{base}/v2/inference/{model}/predict"),
            EndpointKind::Custom { url } => url.clone(),
        };
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = IngestConfig::default();
        assert_eq!(c.face_padding, 10);
        assert_eq!(c.signature_padding, 5);
        assert_eq!(c.jpeg_quality, 92);
        assert_eq!(c.extraction_base_url, DEFAULT_EXTRACTION_BASE_URL);
    }

    #[test]
    fn default_endpoint_order() {
        let c = IngestConfig::builder()
            .model_id("m1")
            .account_product("acme", "passport")
            .build()
            .unwrap();
        let labels: Vec<String> = c.endpoints().iter().map(|e| e.label()).collect();
        assert_eq!(labels, vec!["custom-document", "acme/passport", "inference-v2"]);
    }

    #[test]
    fn endpoint_urls() {
        let base = "https://extract.example";
        let cd = ExtractionEndpoint::new(EndpointKind::CustomDocument);
        assert_eq!(
            cd.url(base, Some("m1")).unwrap(),
            "https://extract.example/v1/products/mindee/custom-document/v1/predict?model_id=m1"
        );
        assert!(cd.url(base, None).is_none());
        assert!(cd.kind.needs_model());

        let v2 = ExtractionEndpoint::new(EndpointKind::InferenceV2);
        assert_eq!(
            v2.url("https://extract.example/", Some("m1")).unwrap(),
            "https://extract.example/v2/inference/m1/predict"
        );

        let acct = ExtractionEndpoint::new(EndpointKind::AccountProduct {
            account: "acme".into(),
            product: "passport".into(),
        });
        assert!(!acct.kind.needs_model());
        assert_eq!(
            acct.url(base, None).unwrap(),
            "https://extract.example/v1/products/acme/passport/v1/predict"
        );
    }

    #[test]
    fn builder_rejects_empty_endpoint_list() {
        let err = IngestConfig::builder().endpoints(vec![]).build().unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_non_http_base() {
        assert!(IngestConfig::builder()
            .extraction_base_url("ftp://nope")
            .build()
            .is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = IngestConfig::builder().api_key("secret-key").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }
}
