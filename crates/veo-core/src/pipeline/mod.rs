//! Local diffusion pipelines
//!
//! Both local providers follow the same shape: ask a local inference
//! server for a sequence of RGB frames, then hand the frames to ffmpeg.
//! Model inference and the video codec stay outside this crate.

mod encoder;
mod ltx;
mod svd;

pub use encoder::*;
pub use ltx::*;
pub use svd::*;

use crate::error::VeoError;
use crate::imaging;
use crate::provider::ensure_success;
use image::RgbImage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Inputs for one frame-generation call on the inference server
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Conditioning image, base64 PNG
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub width: u32,
    pub height: u32,
    pub num_frames: u32,
    pub num_inference_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_guidance_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_guidance_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_bucket_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_aug_strength: Option<f32>,
    pub seed: u64,
}

#[derive(Debug, Deserialize)]
struct FrameResponse {
    #[serde(default)]
    frames: Vec<String>,
}

/// HTTP client for a local frame-generation server
#[derive(Debug, Clone)]
pub struct FramePipeline {
    client: Client,
    endpoint: String,
}

impl FramePipeline {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run one generation and decode the returned frames
    pub async fn generate_frames(&self, request: &FrameRequest) -> Result<Vec<RgbImage>, VeoError> {
        debug!(
            endpoint = %self.endpoint,
            frames = request.num_frames,
            "Requesting {}x{} frames",
            request.width,
            request.height
        );
        let response = self.client.post(&self.endpoint).json(request).send().await?;
        let body: FrameResponse = ensure_success(response).await?.json().await?;
        if body.frames.is_empty() {
            return Err(VeoError::OperationFailed(format!(
                "{} returned no frames",
                self.endpoint
            )));
        }

        let frames = tokio::task::spawn_blocking(move || {
            body.frames
                .iter()
                .map(|f| imaging::decode_base64_image(f))
                .collect::<Result<Vec<_>, _>>()
        })
        .await??;
        Ok(frames)
    }
}

/// Seed for pipelines that are not asked for a specific one
pub(crate) fn clock_seed() -> u64 {
    chrono::Utc::now().timestamp().unsigned_abs() % (1 << 32)
}

/// Name of a pipeline output file
///
/// Requests of a batch run concurrently and can start within the same
/// second, so the request id keeps their files apart.
pub fn pipeline_filename(prefix: &str, timestamp: i64, request_id: Uuid, index: u32) -> String {
    format!("{}_video_{}_{}_{}.mp4", prefix, timestamp, request_id.simple(), index)
}

pub(crate) fn absolute(path: &Path) -> Result<PathBuf, VeoError> {
    Ok(std::path::absolute(path)?)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub fn frames_body(count: usize, width: u32, height: u32) -> serde_json::Value {
        let frame = RgbImage::from_pixel(width, height, image::Rgb([20, 40, 60]));
        let encoded = imaging::to_base64_png(&frame).unwrap();
        json!({ "frames": vec![encoded; count] })
    }

    pub async fn frame_server(count: usize, width: u32, height: u32) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(frames_body(count, width, height)))
            .mount(&server)
            .await;
        server
    }
}
