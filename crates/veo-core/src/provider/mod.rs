//! Video providers
//!
//! A provider turns one [`VideoRequest`] into a list of video URIs. The
//! cloud API lives in [`veo`]; the local diffusion pipelines live in
//! [`crate::pipeline`] and implement the same trait.

mod veo;

pub use veo::*;

use crate::error::VeoError;
use async_trait::async_trait;
use reqwest::Response;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;
use veo_types::{GenerationEvent, ProgressUpdate, ProviderKind, VeoConfig, VideoRequest};

/// A backend able to generate videos for a request
#[async_trait]
pub trait VideoProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Generate every video of `request` and return their URIs
    async fn generate(
        &self,
        request: &VideoRequest,
        progress: &ProgressReporter,
    ) -> Result<Vec<String>, VeoError>;
}

/// Forwards provider progress onto the core event channel
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    request_id: Uuid,
    event_tx: broadcast::Sender<GenerationEvent>,
}

impl ProgressReporter {
    pub fn new(request_id: Uuid, event_tx: broadcast::Sender<GenerationEvent>) -> Self {
        Self {
            request_id,
            event_tx,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn report(&self, provider: ProviderKind, update: ProgressUpdate) {
        let _ = self.event_tx.send(GenerationEvent::Progress {
            id: self.request_id,
            provider,
            stage: update.stage,
            percent: update.percent,
        });
    }
}

/// How often and how far apart transient failures are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &VeoConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            delay: Duration::from_secs(config.retry_delay_secs),
        }
    }

    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Run `op`, retrying while its error is retryable
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, VeoError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VeoError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        what, attempt, self.attempts, e, self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Turn a non-success response into [`VeoError::Api`]
pub(crate) async fn ensure_success(response: Response) -> Result<Response, VeoError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(VeoError::Api {
        status: status.as_u16(),
        message: api_error_message(&body),
    })
}

/// Pull `error.message` out of a Google-style error body, else the raw text
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
