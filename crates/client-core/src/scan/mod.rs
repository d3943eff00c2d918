mod client;
mod poller;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use thiserror::Error;

use crate::models::{
    ManualScanCompletion, ManualScanCompletionResponse, ScanJobResponse, ScanJobResult,
};

pub use client::{SCAN_PATH, ScanClient};
pub use poller::{PollOptions, ProgressCallback, ScanJobPoller};

const DEFAULT_UPLOAD_FILENAME: &str = "photo.jpg";
const DEFAULT_UPLOAD_MIME: &str = "image/jpeg";

pub type ScanApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ScanError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read scan image {path}: {message}")]
    ImageRead { path: String, message: String },
    #[error("invalid scan upload: {0}")]
    InvalidUpload(String),
    #[error("scan request failed: {0}")]
    TransportUnavailable(String),
    #[error("scan request timed out")]
    RequestTimedOut,
    #[error("scan endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("scan endpoint returned an invalid payload: {0}")]
    InvalidResponse(String),
    #[error("scan job {job_id} did not reach a final status after {attempts} checks")]
    PollTimedOut { job_id: String, attempts: u32 },
}

/// Server side of the label scan flow.
pub trait ScanJobApi: Send + Sync {
    fn submit<'a>(&'a self, upload: ScanUpload) -> ScanApiFuture<'a, ScanJobResponse>;
    fn fetch_status<'a>(&'a self, job_id: &'a str) -> ScanApiFuture<'a, ScanJobResult>;
    fn complete_manually<'a>(
        &'a self,
        job_id: &'a str,
        completion: &'a ManualScanCompletion,
    ) -> ScanApiFuture<'a, ManualScanCompletionResponse>;
}

/// Image bytes plus the name and MIME type sent in the multipart `file` field.
#[derive(Debug, Clone)]
pub struct ScanUpload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

impl ScanUpload {
    pub fn from_bytes(bytes: Vec<u8>, filename: Option<&str>) -> Self {
        let filename = filename
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_UPLOAD_FILENAME)
            .to_string();
        let mime_type = mime_for_filename(&filename);

        Self {
            bytes,
            filename,
            mime_type,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| ScanError::ImageRead {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        let filename = path.file_name().and_then(|name| name.to_str());

        Ok(Self::from_bytes(bytes, filename))
    }
}

fn mime_for_filename(filename: &str) -> String {
    let Some((stem, extension)) = filename.rsplit_once('.') else {
        return DEFAULT_UPLOAD_MIME.to_string();
    };
    if stem.is_empty()
        || extension.is_empty()
        || !extension
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return DEFAULT_UPLOAD_MIME.to_string();
    }

    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => DEFAULT_UPLOAD_MIME.to_string(),
        other => format!("image/{other}"),
    }
}
