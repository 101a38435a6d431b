//! Extraction: send the document image to the provider and recover its prediction.
//!
//! This is the only stage that talks to the extraction service. The client
//! walks an ordered endpoint list once per call:
//!
//! 1. one request per endpoint, no retry within an endpoint;
//! 2. transport errors and non-2xx statuses are recorded and skipped;
//! 3. the first 2xx response holding a non-empty prediction wins;
//! 4. if the list runs out, the last recorded error is returned.
//!
//! Provider responses wrap the prediction at different depths depending on
//! the API generation. Rather than poking at the JSON ad hoc, the candidate
//! locations are an explicit ordered list of [`EnvelopeProbe`]s.

use crate::config::{ExtractionEndpoint, IngestConfig};
use crate::error::IngestError;
use crate::pipeline::{encode, normalize};
use crate::record::CanonicalIdentityFields;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Prediction ───────────────────────────────────────────────────────────

/// The provider's raw field map for one document image.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ProviderPrediction(Map<String, Value>);

impl ProviderPrediction {
    /// Wrap a JSON object. Returns `None` for any other JSON type.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Envelope probes ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Step {
    Key(&'static str),
    Index(usize),
}

/// One known location of the prediction object inside a response body.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeProbe {
    pub name: &'static str,
    path: &'static [Step],
}

impl EnvelopeProbe {
    /// Follow the path; succeed only on a non-empty JSON object.
    pub fn probe(&self, body: &Value) -> Option<ProviderPrediction> {
        let mut cursor = body;
        for step in self.path {
            cursor = match step {
                Step::Key(k) => cursor.get(k)?,
                Step::Index(i) => cursor.get(i)?,
            };
        }
        match cursor {
            Value::Object(map) if !map.is_empty() => Some(ProviderPrediction(map.clone())),
            _ => None,
        }
    }
}

/// Response shapes in the order they are tried.
pub const ENVELOPE_PROBES: &[EnvelopeProbe] = &[
    EnvelopeProbe {
        name: "document.inference.prediction",
        path: &[Step::Key("document"), Step::Key("inference"), Step::Key("prediction")],
    },
    EnvelopeProbe {
        name: "document.inference.pages[0].prediction",
        path: &[
            Step::Key("document"),
            Step::Key("inference"),
            Step::Key("pages"),
            Step::Index(0),
            Step::Key("prediction"),
        ],
    },
    EnvelopeProbe {
        name: "inference.prediction",
        path: &[Step::Key("inference"), Step::Key("prediction")],
    },
    EnvelopeProbe {
        name: "inference.pages[0].prediction",
        path: &[
            Step::Key("inference"),
            Step::Key("pages"),
            Step::Index(0),
            Step::Key("prediction"),
        ],
    },
    EnvelopeProbe {
        name: "prediction",
        path: &[Step::Key("prediction")],
    },
];

/// Find the prediction in a response body, first matching probe wins.
pub fn find_prediction(body: &Value) -> Option<(&'static str, ProviderPrediction)> {
    ENVELOPE_PROBES
        .iter()
        .find_map(|probe| probe.probe(body).map(|p| (probe.name, p)))
}

/// The provider's own diagnostic, else the bare status.
fn error_message(status: u16, body: &Value) -> String {
    let api_error = body.get("api_request").and_then(|r| r.get("error"));
    let pick = |key: &str| {
        api_error
            .and_then(|e| e.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    pick("message")
        .or_else(|| pick("details"))
        .unwrap_or_else(|| format!("Status {status}"))
}

// ── Transport ────────────────────────────────────────────────────────────

/// One outbound extraction request.
#[derive(Debug, Clone)]
pub struct ExtractionRequest<'a> {
    pub url: &'a str,
    pub api_key: &'a str,
    pub file_field: &'a str,
    pub image: &'a [u8],
}

/// A response as seen by the client: status plus JSON body (`Null` if not JSON).
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a single extraction request. `Err` means the request never produced
/// an HTTP status (DNS, TLS, connection reset, timeout).
#[async_trait]
pub trait ExtractionTransport: Send + Sync {
    async fn send(&self, request: ExtractionRequest<'_>) -> Result<TransportResponse, String>;
}

/// reqwest-backed transport: multipart upload with `Authorization: Token <key>`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout_secs: u64) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| IngestError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

/// Multipart file name and content type for the image being sent.
fn upload_label(image: &[u8]) -> (String, &'static str) {
    match encode::sniff_format(image) {
        Some(format) => (format!("document.{}", format.extension()), format.mime_type()),
        None => ("document".to_string(), "application/octet-stream"),
    }
}

#[async_trait]
impl ExtractionTransport for HttpTransport {
    async fn send(&self, request: ExtractionRequest<'_>) -> Result<TransportResponse, String> {
        let (file_name, mime) = upload_label(request.image);
        let part = reqwest::multipart::Part::bytes(request.image.to_vec())
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| e.to_string())?;
        let form = reqwest::multipart::Form::new().part(request.file_field.to_string(), part);

        let response = self
            .client
            .post(request.url)
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", request.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                }
            })?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Ok(TransportResponse { status, body })
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Successful extraction: the prediction plus where it came from.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub prediction: ProviderPrediction,
    /// Label of the endpoint that answered.
    pub endpoint: String,
    /// Envelope probe that matched.
    pub envelope: &'static str,
    /// Requests sent, including the successful one.
    pub attempts: usize,
}

#[derive(Debug, Clone)]
struct ResolvedEndpoint {
    label: String,
    url: String,
    file_field: String,
}

/// Drives the ordered endpoint list against one transport.
pub struct ExtractionClient {
    api_key: String,
    endpoints: Vec<ResolvedEndpoint>,
    transport: Arc<dyn ExtractionTransport>,
}

impl ExtractionClient {
    /// Build a client from the config, using `config.transport` when set.
    ///
    /// Fails with [`IngestError::ProviderNotConfigured`] when the API key is
    /// missing, or when no endpoint can be built (every route needs a model
    /// id that is not set). Endpoints that need a missing model id are
    /// dropped with a warning.
    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        let transport = match config.transport {
            Some(ref t) => Arc::clone(t),
            None => Arc::new(HttpTransport::new(config.extraction_timeout_secs)?),
        };
        Self::new(config, &config.endpoints(), transport)
    }

    pub fn new(
        config: &IngestConfig,
        endpoints: &[ExtractionEndpoint],
        transport: Arc<dyn ExtractionTransport>,
    ) -> Result<Self, IngestError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| IngestError::ProviderNotConfigured {
                hint: "Set IDSCAN_API_KEY or pass an API key to the config builder.".into(),
            })?
            .to_string();

        let model_id = config.model_id.as_deref().filter(|m| !m.trim().is_empty());
        let resolved: Vec<ResolvedEndpoint> = endpoints
            .iter()
            .filter_map(|ep| match ep.url(&config.extraction_base_url, model_id) {
                Some(url) => Some(ResolvedEndpoint {
                    label: ep.label(),
                    url,
                    file_field: ep.file_field.clone(),
                }),
                None => {
                    warn!("Endpoint {} skipped: no model id configured", ep.label());
                    None
                }
            })
            .collect();

        if resolved.is_empty() {
            return Err(IngestError::ProviderNotConfigured {
                hint: "No usable extraction endpoint; set IDSCAN_MODEL_ID or an account/product route."
                    .into(),
            });
        }

        Ok(Self {
            api_key,
            endpoints: resolved,
            transport,
        })
    }

    /// Number of endpoints that will be tried.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Walk the endpoint list and return the first usable prediction.
    pub async fn extract_prediction(&self, image: &[u8]) -> Result<Extraction, IngestError> {
        let mut last_error = String::from("no endpoint attempted");
        let mut attempts = 0;

        for endpoint in &self.endpoints {
            attempts += 1;
            debug!("Extraction attempt {}: {}", attempts, endpoint.label);

            let request = ExtractionRequest {
                url: &endpoint.url,
                api_key: &self.api_key,
                file_field: &endpoint.file_field,
                image,
            };

            let response = match self.transport.send(request).await {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("{}: {}", endpoint.label, e);
                    warn!("Extraction endpoint failed: {}", last_error);
                    continue;
                }
            };

            if response.is_success() {
                if let Some((envelope, prediction)) = find_prediction(&response.body) {
                    info!(
                        "Extraction succeeded via {} ({} fields, envelope {})",
                        endpoint.label,
                        prediction.iter().count(),
                        envelope
                    );
                    return Ok(Extraction {
                        prediction,
                        endpoint: endpoint.label.clone(),
                        envelope,
                        attempts,
                    });
                }
                last_error = format!("{}: response contained no prediction", endpoint.label);
            } else {
                last_error = format!(
                    "{}: {}",
                    endpoint.label,
                    error_message(response.status, &response.body)
                );
            }
            warn!("Extraction endpoint failed: {}", last_error);
        }

        Err(IngestError::ExtractionExhausted {
            attempts,
            last_error,
        })
    }

    /// Extract and normalise in one call.
    pub async fn extract(
        &self,
        image: &[u8],
    ) -> Result<(CanonicalIdentityFields, Extraction), IngestError> {
        let extraction = self.extract_prediction(image).await?;
        Ok((normalize::normalize(&extraction.prediction), extraction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointKind;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn upload_label_follows_capture_format() {
        assert_eq!(
            upload_label(&[0xFF, 0xD8, 0xFF, 0xE0]),
            ("document.jpg".to_string(), "image/jpeg")
        );
        assert_eq!(
            upload_label(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]),
            ("document.png".to_string(), "image/png")
        );
        assert_eq!(
            upload_label(b"GIF89a"),
            ("document".to_string(), "application/octet-stream")
        );
    }

    /// Replays one scripted outcome per request and records the URLs hit.
    struct Scripted {
        outcomes: Mutex<Vec<Result<TransportResponse, String>>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<Result<TransportResponse, String>>) -> Arc<Self> {
            outcomes.reverse();
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExtractionTransport for Scripted {
        async fn send(&self, request: ExtractionRequest<'_>) -> Result<TransportResponse, String> {
            assert_eq!(request.api_key, "key");
            self.calls.lock().unwrap().push(request.url.to_string());
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err("script exhausted".into()))
        }
    }

    fn ok(body: Value) -> Result<TransportResponse, String> {
        Ok(TransportResponse { status: 201, body })
    }

    fn status(code: u16, body: Value) -> Result<TransportResponse, String> {
        Ok(TransportResponse { status: code, body })
    }

    fn custom(n: usize) -> Vec<ExtractionEndpoint> {
        (0..n)
            .map(|i| {
                ExtractionEndpoint::new(EndpointKind::Custom {
                    url: format!("https://extract.test/{i}"),
                })
            })
            .collect()
    }

    fn client(endpoints: &[ExtractionEndpoint], t: Arc<Scripted>) -> ExtractionClient {
        let config = IngestConfig::builder().api_key("key").build().unwrap();
        ExtractionClient::new(&config, endpoints, t).unwrap()
    }

    #[test]
    fn envelope_probe_order() {
        let body = json!({
            "prediction": { "first_name": "Outer" },
            "document": { "inference": {
                "prediction": {},
                "pages": [ { "prediction": { "first_name": "Page" } } ]
            }}
        });
        let (name, p) = find_prediction(&body).unwrap();
        assert_eq!(name, "document.inference.pages[0].prediction");
        assert_eq!(p.get("first_name").unwrap(), "Page");
    }

    #[test]
    fn envelope_probe_rejects_non_objects() {
        assert!(find_prediction(&json!({ "prediction": [] })).is_none());
        assert!(find_prediction(&json!({ "inference": { "pages": [] } })).is_none());
        assert!(find_prediction(&Value::Null).is_none());
    }

    #[test]
    fn error_message_prefers_provider_detail() {
        let body = json!({ "api_request": { "error": { "message": "Invalid token" } } });
        assert_eq!(error_message(401, &body), "Invalid token");
        let body = json!({ "api_request": { "error": { "details": "No such model" } } });
        assert_eq!(error_message(404, &body), "No such model");
        assert_eq!(error_message(503, &Value::Null), "Status 503");
    }

    #[tokio::test]
    async fn only_last_endpoint_succeeds_after_n_attempts() {
        let t = Scripted::new(vec![
            Err("connection refused".into()),
            status(500, Value::Null),
            status(200, json!({ "unrelated": true })),
            ok(json!({ "inference": { "prediction": { "passport_number": "X1" } } })),
        ]);
        let c = client(&custom(4), Arc::clone(&t));
        let extraction = c.extract_prediction(b"img").await.unwrap();
        assert_eq!(extraction.attempts, 4);
        assert_eq!(extraction.endpoint, "https://extract.test/3");
        assert_eq!(extraction.envelope, "inference.prediction");
        assert_eq!(
            t.calls(),
            (0..4).map(|i| format!("https://extract.test/{i}")).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn stops_at_first_usable_prediction() {
        let t = Scripted::new(vec![
            ok(json!({ "prediction": { "sex": "F" } })),
            ok(json!({ "prediction": { "sex": "M" } })),
        ]);
        let c = client(&custom(2), Arc::clone(&t));
        let (fields, extraction) = c.extract(b"img").await.unwrap();
        assert_eq!(fields.sex.as_deref(), Some("F"));
        assert_eq!(extraction.attempts, 1);
        assert_eq!(t.calls().len(), 1);
    }

    #[tokio::test]
    async fn exhaustion_carries_last_error() {
        let t = Scripted::new(vec![
            status(401, json!({ "api_request": { "error": { "message": "bad key" } } })),
            Err("timed out".into()),
        ]);
        let c = client(&custom(2), t);
        match c.extract_prediction(b"img").await {
            Err(IngestError::ExtractionExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, "https://extract.test/1: timed out");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn missing_api_key_is_configuration_error() {
        let config = IngestConfig::builder().model_id("m").build().unwrap();
        let t = Scripted::new(vec![]);
        let err = ExtractionClient::new(&config, &config.endpoints(), t.clone())
            .err()
            .unwrap();
        assert!(matches!(err, IngestError::ProviderNotConfigured { .. }));
        assert!(t.calls().is_empty());
    }

    #[test]
    fn missing_model_drops_model_bound_routes() {
        let config = IngestConfig::builder()
            .api_key("key")
            .account_product("acme", "passport")
            .build()
            .unwrap();
        let c = ExtractionClient::new(&config, &config.endpoints(), Scripted::new(vec![])).unwrap();
        assert_eq!(c.endpoint_count(), 1);

        let config = IngestConfig::builder().api_key("key").build().unwrap();
        let err = ExtractionClient::new(&config, &config.endpoints(), Scripted::new(vec![]))
            .err()
            .unwrap();
        assert!(matches!(err, IngestError::ProviderNotConfigured { .. }));
    }
}
