//! Input resolution: turn a user-supplied capture reference into image bytes.
//!
//! A capture arrives in one of three shapes:
//!
//! * a local file path,
//! * an HTTP(S) URL, downloaded with the configured timeout,
//! * a base64 `data:` URL, the native output of a browser capture canvas.
//!
//! Whatever the shape, the bytes must start with a JPEG or PNG signature
//! before they are handed to the pipeline. Checking here turns a confusing
//! decode or provider error later on into an immediate [`IngestError::NotAnImage`].

use crate::error::IngestError;
use crate::pipeline::encode::sniff_format;
use base64::Engine as _;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like an HTTP(S) URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Check if the input string is a `data:` URL.
pub fn is_data_url(input: &str) -> bool {
    input.starts_with("data:")
}

/// Resolve the input string to validated image bytes.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Vec<u8>, IngestError> {
    let (name, bytes) = if is_data_url(input) {
        ("data URL".to_string(), decode_data_url(input)?)
    } else if is_url(input) {
        (input.to_string(), download_url(input, timeout_secs).await?)
    } else {
        (input.to_string(), read_local(input).await?)
    };
    validate_image(&name, bytes)
}

/// Reject anything that is not JPEG or PNG.
pub fn validate_image(source_name: &str, bytes: Vec<u8>) -> Result<Vec<u8>, IngestError> {
    match sniff_format(&bytes) {
        Some(format) => {
            debug!("Capture '{}': {:?}, {} bytes", source_name, format, bytes.len());
            Ok(bytes)
        }
        None => Err(IngestError::NotAnImage {
            source_name: source_name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        }),
    }
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, IngestError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(IngestError::PermissionDenied { path })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(IngestError::FileNotFound { path }),
        Err(e) => Err(IngestError::InvalidInput {
            input: path_str.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Decode `data:[<mime>][;base64],<payload>`. Only base64 payloads are accepted.
fn decode_data_url(input: &str) -> Result<Vec<u8>, IngestError> {
    let invalid = |reason: &str| IngestError::InvalidInput {
        input: truncate(input, 48),
        reason: reason.to_string(),
    };

    let rest = input.strip_prefix("data:").ok_or_else(|| invalid("missing data: scheme"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| invalid("missing ',' separator"))?;
    if !meta.ends_with(";base64") {
        return Err(invalid("only base64 data URLs are supported"));
    }

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| invalid(&format!("invalid base64 payload: {e}")))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, IngestError> {
    info!("Downloading capture from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| IngestError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            IngestError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            IngestError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(IngestError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
