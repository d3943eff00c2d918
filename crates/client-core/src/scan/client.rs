use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::{ScanApiFuture, ScanError, ScanJobApi, ScanUpload};
use crate::config::{ClientConfig, ConfigError};
use crate::credentials::{CredentialStore, USER_TOKEN_KEY};
use crate::models::{
    ManualScanCompletion, ManualScanCompletionResponse, ScanJobResponse, ScanJobResult,
};

pub const SCAN_PATH: &str = "/vision/scan";

/// HTTP implementation of [`ScanJobApi`].
#[derive(Clone)]
pub struct ScanClient {
    base_url: String,
    http_client: reqwest::Client,
    credentials: Arc<dyn CredentialStore>,
    upload_timeout: Duration,
}

impl ScanClient {
    pub fn new(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ConfigError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;

        Ok(Self::with_http_client(config, credentials, http_client))
    }

    pub fn with_http_client(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialStore>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            http_client,
            credentials,
            upload_timeout: config.upload_timeout(),
        }
    }

    async fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.get(USER_TOKEN_KEY).await {
            Ok(Some(token)) if !token.trim().is_empty() => builder.bearer_auth(token),
            Ok(_) => builder,
            Err(err) => {
                warn!(error = %err, "failed to read stored user token");
                builder
            }
        }
    }

    async fn submit_upload(&self, upload: ScanUpload) -> Result<ScanJobResponse, ScanError> {
        let byte_len = upload.bytes.len();
        let part = reqwest::multipart::Part::bytes(upload.bytes)
            .file_name(upload.filename.clone())
            .mime_str(&upload.mime_type)
            .map_err(|err| {
                ScanError::InvalidUpload(format!("mime type {}: {err}", upload.mime_type))
            })?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let builder = self
            .http_client
            .post(format!("{}{SCAN_PATH}", self.base_url))
            .timeout(self.upload_timeout)
            .multipart(form);
        let response: ScanJobResponse = send_json(self.authorize(builder).await).await?;

        info!(
            job_id = %response.job_id,
            status = response.status.as_str(),
            filename = %upload.filename,
            byte_len,
            "submitted scan job"
        );
        Ok(response)
    }

    async fn fetch(&self, job_id: &str) -> Result<ScanJobResult, ScanError> {
        let builder = self
            .http_client
            .get(format!("{}{SCAN_PATH}/{job_id}", self.base_url));
        send_json(self.authorize(builder).await).await
    }

    async fn complete(
        &self,
        job_id: &str,
        completion: &ManualScanCompletion,
    ) -> Result<ManualScanCompletionResponse, ScanError> {
        let builder = self
            .http_client
            .post(format!("{}{SCAN_PATH}/{job_id}/manual-complete", self.base_url))
            .query(completion);
        let response: ManualScanCompletionResponse =
            send_json(self.authorize(builder).await).await?;

        info!(job_id, product_id = response.product_id, "completed scan job manually");
        Ok(response)
    }
}

impl ScanJobApi for ScanClient {
    fn submit<'a>(&'a self, upload: ScanUpload) -> ScanApiFuture<'a, ScanJobResponse> {
        Box::pin(self.submit_upload(upload))
    }

    fn fetch_status<'a>(&'a self, job_id: &'a str) -> ScanApiFuture<'a, ScanJobResult> {
        Box::pin(self.fetch(job_id))
    }

    fn complete_manually<'a>(
        &'a self,
        job_id: &'a str,
        completion: &'a ManualScanCompletion,
    ) -> ScanApiFuture<'a, ManualScanCompletionResponse> {
        Box::pin(self.complete(job_id, completion))
    }
}

async fn send_json<T>(builder: reqwest::RequestBuilder) -> Result<T, ScanError>
where
    T: DeserializeOwned,
{
    let response = builder.send().await.map_err(|err| {
        if err.is_timeout() {
            ScanError::RequestTimedOut
        } else {
            ScanError::TransportUnavailable(err.to_string())
        }
    })?;

    let status = response.status();
    let bytes = response.bytes().await.map_err(|err| {
        if err.is_timeout() {
            ScanError::RequestTimedOut
        } else {
            ScanError::TransportUnavailable(format!("failed to read response body: {err}"))
        }
    })?;

    if !status.is_success() {
        return Err(ScanError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    serde_json::from_slice::<T>(&bytes).map_err(|err| ScanError::InvalidResponse(err.to_string()))
}
