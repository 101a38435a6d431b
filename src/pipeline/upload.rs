//! Asset upload: store the scan and crops, return public locators.
//!
//! The document scan is the one asset the record cannot do without, so its
//! upload failing aborts the run. Face, signature and selfie uploads are
//! best-effort: a failure is logged, reported as a [`StageError`] and leaves
//! that locator absent. All uploads are issued concurrently and the uploader
//! waits for every outcome before returning, so whichever locators succeeded
//! reach the record. When the scan fails, the objects that were stored are
//! removed again.

use crate::error::{IngestError, StageError, StorageError};
use crate::record::{AssetKind, AssetLocators, DerivedAsset};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A bucket-like store for named binary objects.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` at `path`. Never overwrites an existing object.
    /// Returns the stored object's path.
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError>;

    /// Delete the object at `path`.
    async fn remove(&self, path: &str) -> Result<(), StorageError>;

    /// Deterministic public URL for a stored path.
    fn public_url(&self, path: &str) -> String;
}

/// `{kind}_{unix_millis}_{token}.jpg`
pub fn asset_filename(kind: AssetKind, unix_millis: i64, token: &str) -> String {
    format!("{}_{}_{}.jpg", kind.as_str(), unix_millis, token)
}

/// Six lowercase hex characters from a fresh v4 UUID.
pub fn short_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..6].to_string()
}

fn object_path(prefix: &str, kind: AssetKind) -> String {
    let name = asset_filename(kind, Utc::now().timestamp_millis(), &short_token());
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}

/// The assets of one run, before upload.
#[derive(Debug, Clone)]
pub struct AssetBundle {
    pub document: DerivedAsset,
    pub face: Option<DerivedAsset>,
    pub signature: Option<DerivedAsset>,
    pub selfie: Option<DerivedAsset>,
}

/// Uploads an [`AssetBundle`] to one [`ObjectStorage`].
pub struct AssetUploader {
    storage: Arc<dyn ObjectStorage>,
    prefix: String,
    timeout: Duration,
}

impl AssetUploader {
    pub fn new(storage: Arc<dyn ObjectStorage>, prefix: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// Upload one asset and resolve its public locator.
    pub async fn upload(&self, asset: DerivedAsset) -> Result<String, StorageError> {
        Ok(self.store(asset).await?.url)
    }

    async fn store(&self, asset: DerivedAsset) -> Result<StoredObject, StorageError> {
        let path = object_path(&self.prefix, asset.kind);
        let size = asset.bytes.len();
        let stored = tokio::time::timeout(
            self.timeout,
            self.storage.put(&path, asset.bytes, asset.content_type),
        )
        .await
        .map_err(|_| StorageError::Timeout(self.timeout.as_secs()))??;
        debug!("Stored {} ({} bytes) at {}", asset.kind, size, stored);
        Ok(StoredObject {
            url: self.storage.public_url(&stored),
            path: stored,
        })
    }

    /// Upload every asset in the bundle concurrently.
    ///
    /// Returns the locators plus one warning per skipped best-effort asset,
    /// or [`IngestError::AssetUploadFailed`] when a required asset (the
    /// document scan) failed. In that case the objects that did get stored
    /// are removed again, since no record will ever point at them.
    pub async fn upload_assets(
        &self,
        bundle: AssetBundle,
    ) -> Result<(AssetLocators, Vec<StageError>), IngestError> {
        let AssetBundle {
            document,
            face,
            signature,
            selfie,
        } = bundle;

        let assets = [Some(document), face, signature, selfie];
        let outcomes = futures::future::join_all(assets.into_iter().flatten().map(|asset| async move {
            let kind = asset.kind;
            (kind, self.store(asset).await)
        }))
        .await;

        let mut stored = Vec::new();
        let mut warnings = Vec::new();
        let mut fatal = None;
        for (kind, outcome) in outcomes {
            match outcome {
                Ok(object) => stored.push((kind, object)),
                Err(e) if kind.is_required() => {
                    warn!("Upload of required {} failed: {}", kind, e);
                    fatal = Some(IngestError::AssetUploadFailed {
                        kind,
                        detail: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Best-effort upload of {} skipped: {}", kind, e);
                    warnings.push(StageError::AssetUploadFailed {
                        kind,
                        detail: e.to_string(),
                    });
                }
            }
        }

        if let Some(err) = fatal {
            self.discard(&stored).await;
            return Err(err);
        }

        let url_of = |kind: AssetKind| {
            stored
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, object)| object.url.clone())
        };
        let document_url = url_of(AssetKind::DocumentScan)
            .ok_or_else(|| IngestError::Internal("document scan missing from uploads".into()))?;
        let locators = AssetLocators {
            document_url,
            face_url: url_of(AssetKind::FaceCrop),
            signature_url: url_of(AssetKind::SignatureCrop),
            selfie_url: url_of(AssetKind::Selfie),
        };

        info!(
            "Uploaded assets: document ✓, face {}, signature {}, selfie {}",
            mark(&locators.face_url),
            mark(&locators.signature_url),
            mark(&locators.selfie_url)
        );
        Ok((locators, warnings))
    }

    /// Best-effort removal of objects stored by a run that is being aborted.
    async fn discard(&self, stored: &[(AssetKind, StoredObject)]) {
        futures::future::join_all(stored.iter().map(|(kind, object)| async move {
            match tokio::time::timeout(self.timeout, self.storage.remove(&object.path)).await {
                Ok(Ok(())) => debug!("Removed orphaned {} at {}", kind, object.path),
                Ok(Err(e)) => warn!("Could not remove orphaned {} at {}: {}", kind, object.path, e),
                Err(_) => warn!("Removing orphaned {} at {} timed out", kind, object.path),
            }
        }))
        .await;
    }
}

struct StoredObject {
    path: String,
    url: String,
}

fn mark(url: &Option<String>) -> &'static str {
    if url.is_some() {
        "✓"
    } else {
        "–"
    }
}

// ── Backends ─────────────────────────────────────────────────────────────

/// Objects written under a local directory, served from `public_base_url`.
///
/// Suited to development and single-host deployments where a web server
/// exposes the directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String, StorageError> {
        check_path(path)?;
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        tokio::io::AsyncWriteExt::write_all(&mut file, &bytes).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        Ok(path.to_string())
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        check_path(path)?;
        tokio::fs::remove_file(self.root.join(path)).await?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url, path)
    }
}

fn check_path(path: &str) -> Result<(), StorageError> {
    if path.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return Err(StorageError::Transport(format!("invalid object path '{path}'")));
    }
    Ok(())
}

/// Bucket storage behind a REST object API.
///
/// Objects are created with `POST {base}/storage/v1/object/{bucket}/{path}`
/// (`x-upsert: false`, `cache-control: 3600`), removed with `DELETE` on the
/// same URL, and served from `{base}/storage/v1/object/public/{bucket}/{path}`.
#[derive(Debug, Clone)]
pub struct RestObjectStorage {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    api_key: String,
}

impl RestObjectStorage {
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ObjectStorage for RestObjectStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CACHE_CONTROL, "3600")
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::CONFLICT {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(path.to_string())
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn filename_shape() {
        let name = asset_filename(AssetKind::FaceCrop, 1_700_000_000_123, "a1b2c3");
        assert_eq!(name, "face_crop_1700000000123_a1b2c3.jpg");
    }

    #[test]
    fn tokens_are_short_and_distinct() {
        let a = short_token();
        let b = short_token();
        assert_eq!(a.len(), 6);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn rest_public_url_is_deterministic() {
        let s = RestObjectStorage::new("https://proj.example.co/", "documents", "k").unwrap();
        assert_eq!(
            s.public_url("ids/document_scan_1_abc123.jpg"),
            "https://proj.example.co/storage/v1/object/public/documents/ids/document_scan_1_abc123.jpg"
        );
    }

    #[tokio::test]
    async fn local_storage_writes_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let s = LocalObjectStorage::new(dir.path(), "http://cdn.local/");
        let stored = s.put("ids/a.jpg", vec![1, 2, 3], "image/jpeg").await.unwrap();
        assert_eq!(s.public_url(&stored), "http://cdn.local/ids/a.jpg");
        assert_eq!(std::fs::read(dir.path().join("ids/a.jpg")).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            s.put("ids/a.jpg", vec![9], "image/jpeg").await,
            Err(StorageError::AlreadyExists(_))
        ));
        assert!(s.put("../escape.jpg", vec![9], "image/jpeg").await.is_err());
    }

    /// Fails puts whose path starts with one of the listed kind prefixes.
    struct Flaky {
        fail: Vec<AssetKind>,
        puts: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    impl Flaky {
        fn failing(fail: Vec<AssetKind>) -> Arc<Self> {
            Arc::new(Self {
                fail,
                puts: Mutex::new(vec![]),
                removed: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl ObjectStorage for Flaky {
        async fn put(&self, path: &str, _bytes: Vec<u8>, _ct: &str) -> Result<String, StorageError> {
            self.puts.lock().unwrap().push(path.to_string());
            let name = path.rsplit('/').next().unwrap_or(path);
            if self.fail.iter().any(|k| name.starts_with(k.as_str())) {
                return Err(StorageError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(path.to_string())
        }

        async fn remove(&self, path: &str) -> Result<(), StorageError> {
            self.removed.lock().unwrap().push(path.to_string());
            Ok(())
        }

        fn public_url(&self, path: &str) -> String {
            format!("https://cdn.test/{path}")
        }
    }

    fn bundle(with_face: bool, with_sig: bool) -> AssetBundle {
        AssetBundle {
            document: DerivedAsset::jpeg(AssetKind::DocumentScan, vec![1]),
            face: with_face.then(|| DerivedAsset::jpeg(AssetKind::FaceCrop, vec![2])),
            signature: with_sig.then(|| DerivedAsset::jpeg(AssetKind::SignatureCrop, vec![3])),
            selfie: None,
        }
    }

    #[tokio::test]
    async fn all_uploads_succeed() {
        let storage = Flaky::failing(vec![]);
        let uploader = AssetUploader::new(storage.clone(), "ids", 5);
        let (locators, warnings) = uploader.upload_assets(bundle(true, true)).await.unwrap();
        assert!(locators.document_url.starts_with("https://cdn.test/ids/document_scan_"));
        assert!(locators.face_url.is_some());
        assert!(locators.signature_url.is_some());
        assert!(locators.selfie_url.is_none());
        assert!(warnings.is_empty());
        assert_eq!(storage.puts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn face_failure_is_skipped() {
        let storage = Flaky::failing(vec![AssetKind::FaceCrop]);
        let uploader = AssetUploader::new(storage, "ids", 5);
        let (locators, warnings) = uploader.upload_assets(bundle(true, true)).await.unwrap();
        assert!(locators.face_url.is_none());
        assert!(locators.signature_url.is_some());
        assert_eq!(
            warnings,
            vec![StageError::AssetUploadFailed {
                kind: AssetKind::FaceCrop,
                detail: "storage returned HTTP 500: boom".into()
            }]
        );
    }

    #[tokio::test]
    async fn document_failure_is_fatal_and_removes_stored_assets() {
        let storage = Flaky::failing(vec![AssetKind::DocumentScan]);
        let uploader = AssetUploader::new(storage.clone(), "ids", 5);
        let err = uploader.upload_assets(bundle(true, false)).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::AssetUploadFailed {
                kind: AssetKind::DocumentScan,
                ..
            }
        ));
        assert_eq!(storage.puts.lock().unwrap().len(), 2);
        let removed = storage.removed.lock().unwrap().clone();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].starts_with("ids/face_crop_"), "got {removed:?}");
    }

    #[tokio::test]
    async fn best_effort_failure_removes_nothing() {
        let storage = Flaky::failing(vec![AssetKind::SignatureCrop]);
        let uploader = AssetUploader::new(storage.clone(), "ids", 5);
        uploader.upload_assets(bundle(true, true)).await.unwrap();
        assert!(storage.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_storage_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = LocalObjectStorage::new(dir.path(), "http://cdn.local");
        s.put("ids/b.jpg", vec![1], "image/jpeg").await.unwrap();
        s.remove("ids/b.jpg").await.unwrap();
        assert!(!dir.path().join("ids/b.jpg").exists());
        assert!(s.remove("../b.jpg").await.is_err());
    }
}
