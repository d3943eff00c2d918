use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{ScanError, ScanJobApi, ScanUpload};
use crate::config::ClientConfig;
use crate::models::{
    ManualScanCompletion, ManualScanCompletionResponse, ScanJobResponse, ScanJobResult,
    ScanJobStatus,
};

const DEFAULT_MAX_ATTEMPTS: u32 = 30;
const DEFAULT_INTERVAL_MS: u64 = 1_000;

pub type ProgressCallback<'a> = dyn FnMut(ScanJobStatus) + Send + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub max_attempts: u32,
    /// Delay between the end of one status fetch and the start of the next.
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
        }
    }
}

impl PollOptions {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.scan_poll_max_attempts,
            Duration::from_millis(config.scan_poll_interval_ms),
        )
    }
}

/// Submits label images and waits for their extraction jobs.
///
/// A `failed` or `partial` job is a normal result; only transport errors and
/// running out of attempts surface as [`ScanError`].
pub struct ScanJobPoller<A> {
    api: A,
}

impl<A> ScanJobPoller<A>
where
    A: ScanJobApi,
{
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub async fn start(&self, upload: ScanUpload) -> Result<ScanJobResponse, ScanError> {
        self.api.submit(upload).await
    }

    pub async fn poll(
        &self,
        job_id: &str,
        options: PollOptions,
        mut on_progress: Option<&mut ProgressCallback<'_>>,
    ) -> Result<ScanJobResult, ScanError> {
        for attempt in 1..=options.max_attempts {
            let result = self.api.fetch_status(job_id).await?;
            debug!(job_id, attempt, status = result.status.as_str(), "fetched scan job status");

            if let Some(callback) = on_progress.as_deref_mut() {
                callback(result.status);
            }

            if result.status.is_terminal() {
                info!(
                    job_id,
                    attempt,
                    status = result.status.as_str(),
                    needs_manual_review = result.needs_manual_review,
                    "scan job reached final status"
                );
                return Ok(result);
            }

            sleep(options.interval).await;
        }

        warn!(job_id, attempts = options.max_attempts, "scan job polling timed out");
        Err(ScanError::PollTimedOut {
            job_id: job_id.to_string(),
            attempts: options.max_attempts,
        })
    }

    /// Uploads the image, then polls the new job until it settles.
    pub async fn scan_and_wait(
        &self,
        upload: ScanUpload,
        options: PollOptions,
        mut on_progress: Option<&mut ProgressCallback<'_>>,
    ) -> Result<ScanJobResult, ScanError> {
        let job = self.start(upload).await?;
        if let Some(callback) = on_progress.as_deref_mut() {
            callback(job.status);
        }

        self.poll(&job.job_id, options, on_progress).await
    }

    pub async fn complete_manually(
        &self,
        job_id: &str,
        completion: &ManualScanCompletion,
    ) -> Result<ManualScanCompletionResponse, ScanError> {
        self.api.complete_manually(job_id, completion).await
    }
}
