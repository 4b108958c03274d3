//! Cloud provider: the VEO long-running generation API
//!
//! A generation is submitted with `predictLongRunning`, which answers with
//! an operation name. The operation is then polled until it reports `done`.

use super::{ensure_success, ProgressReporter, RetryPolicy, VideoProvider};
use crate::error::VeoError;
use crate::imaging;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use veo_types::{
    GenerationStage, OperationStatus, ProgressUpdate, ProviderKind, VeoConfig, VideoRequest,
};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for the cloud video generation API
#[derive(Debug, Clone)]
pub struct VeoApiProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    poll_interval: Duration,
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictPayload {
    instances: Vec<Instance>,
    parameters: Parameters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<InlineImage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineImage {
    bytes_base64_encoded: String,
    mime_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters {
    aspect_ratio: &'static str,
    duration_seconds: u32,
    sample_count: u32,
    person_generation: &'static str,
    enhance_prompt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

impl Operation {
    fn error_message(&self) -> Option<String> {
        self.error
            .as_ref()
            .map(|e| format!("{} (code {})", e.message, e.code))
    }

    fn video_uris(&self) -> Vec<String> {
        self.response.as_ref().map(extract_video_uris).unwrap_or_default()
    }

    /// Progress reported by the service, when it reports any
    fn reported_percent(&self) -> Option<u8> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("progressPercent"))
            .and_then(Value::as_u64)
            .map(|p| p.min(100) as u8)
    }
}

/// Collect video URIs from a finished operation's response
///
/// Understands both the Gemini API shape
/// (`generateVideoResponse.generatedSamples[].video.uri`) and the Vertex
/// shape (`videos[].gcsUri` or `videos[].uri`).
pub fn extract_video_uris(response: &Value) -> Vec<String> {
    let samples = response
        .pointer("/generateVideoResponse/generatedSamples")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|s| s.pointer("/video/uri").and_then(Value::as_str));

    let videos = response
        .get("videos")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|v| {
            v.get("gcsUri")
                .or_else(|| v.get("uri"))
                .and_then(Value::as_str)
        });

    samples.chain(videos).map(str::to_string).collect()
}

impl VeoApiProvider {
    pub fn new(client: Client, config: &VeoConfig) -> Self {
        Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            timeout: Duration::from_secs(config.generation_timeout_secs),
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn require_api_key(&self) -> Result<(), VeoError> {
        if self.api_key.trim().is_empty() {
            return Err(VeoError::ProviderUnavailable(
                "GOOGLE_API_KEY is not set".to_string(),
            ));
        }
        Ok(())
    }

    async fn build_payload(&self, request: &VideoRequest) -> Result<PredictPayload, VeoError> {
        let image = match request.image_path.clone() {
            Some(path) => {
                let encoded =
                    tokio::task::spawn_blocking(move || imaging::prepare_upload(&path)).await??;
                Some(InlineImage {
                    bytes_base64_encoded: encoded,
                    mime_type: "image/jpeg",
                })
            }
            None => None,
        };

        Ok(PredictPayload {
            instances: vec![Instance {
                prompt: request.prompt.clone(),
                image,
            }],
            parameters: Parameters {
                aspect_ratio: request.aspect_ratio.as_str(),
                duration_seconds: request.duration_secs,
                sample_count: request.number_of_videos,
                person_generation: request.person_generation.as_str(),
                enhance_prompt: request.enhance_prompt,
                storage_uri: request.output_gcs_uri.clone(),
            },
        })
    }

    async fn submit(&self, payload: &PredictPayload) -> Result<String, VeoError> {
        let url = format!(
            "{}/v1beta/models/{}:predictLongRunning",
            self.base_url, self.model
        );
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(payload)
            .send()
            .await?;
        let operation: Operation = ensure_success(response).await?.json().await?;
        Ok(operation.name)
    }

    async fn fetch_operation(&self, name: &str) -> Result<Operation, VeoError> {
        let url = format!("{}/v1beta/{}", self.base_url, name);
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    /// Accepts a bare operation id or a full operation name
    fn operation_name(&self, operation_id: &str) -> String {
        if operation_id.contains('/') {
            operation_id.to_string()
        } else {
            format!("models/{}/operations/{}", self.model, operation_id)
        }
    }

    /// Look up a long-running operation once
    pub async fn check_operation_status(
        &self,
        operation_id: &str,
    ) -> Result<OperationStatus, VeoError> {
        self.require_api_key()?;
        let name = self.operation_name(operation_id);
        let operation = self
            .retry
            .run("Operation status check", || self.fetch_operation(&name))
            .await?;

        let progress = if operation.done {
            100
        } else {
            operation.reported_percent().unwrap_or(0)
        };
        Ok(OperationStatus {
            operation_id: operation.name.clone(),
            done: operation.done,
            progress,
            video_uris: operation.video_uris(),
            error: operation.error_message(),
        })
    }
}

#[async_trait]
impl VideoProvider for VeoApiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Veo
    }

    async fn generate(
        &self,
        request: &VideoRequest,
        progress: &ProgressReporter,
    ) -> Result<Vec<String>, VeoError> {
        self.require_api_key()?;

        let payload = self.build_payload(request).await?;
        let name = self
            .retry
            .run("Video generation submit", || self.submit(&payload))
            .await?;
        info!(request_id = %request.id, operation = %name, "Submitted video generation");
        progress.report(
            ProviderKind::Veo,
            ProgressUpdate::new(GenerationStage::Submitted, 5),
        );

        let started = Instant::now();
        let mut polls: u32 = 0;
        loop {
            let operation = self
                .retry
                .run("Operation poll", || self.fetch_operation(&name))
                .await?;

            if operation.done {
                if let Some(message) = operation.error_message() {
                    return Err(VeoError::OperationFailed(message));
                }
                let uris = operation.video_uris();
                if uris.is_empty() {
                    return Err(VeoError::OperationFailed(format!(
                        "operation {} finished without videos",
                        name
                    )));
                }
                info!(request_id = %request.id, operation = %name, "Generated {} video(s)", uris.len());
                progress.report(
                    ProviderKind::Veo,
                    ProgressUpdate::new(GenerationStage::Completed, 100),
                );
                return Ok(uris);
            }

            polls += 1;
            let percent = operation
                .reported_percent()
                .unwrap_or_else(|| (10 + polls.saturating_mul(10)).min(90) as u8)
                .min(90);
            debug!(operation = %name, "Operation still running ({}%)", percent);
            progress.report(
                ProviderKind::Veo,
                ProgressUpdate::new(GenerationStage::Processing, percent),
            );

            if started.elapsed() + self.poll_interval > self.timeout {
                return Err(VeoError::Timeout(self.timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
