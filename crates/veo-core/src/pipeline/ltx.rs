//! LTX-Video (text or image to video)

use super::{absolute, clock_seed, pipeline_filename, FramePipeline, FrameRequest, VideoEncoder};
use crate::error::VeoError;
use crate::imaging;
use crate::provider::{ProgressReporter, VideoProvider};
use async_trait::async_trait;
use image::RgbImage;
use parking_lot::Mutex;
use reqwest::Client;
use std::path::PathBuf;
use tracing::{info, warn};
use veo_types::{
    AspectRatio, GenerationStage, ProgressUpdate, ProviderKind, VeoConfig, VideoRequest, VideoUri,
};

/// Models tried in order until the server accepts one
pub const LTX_MODEL_CANDIDATES: [&str; 3] = [
    "Lightricks/ltx-video-2b-v0.9.5",
    "Lightricks/ltx-video-13b-v0.9.8",
    "Lightricks/ltx-video",
];

pub const LTX_FPS: u32 = 30;

const LTX_STEPS: u32 = 40;
const LTX_GUIDANCE: f32 = 3.5;
const LTX_MIN_FRAMES: u32 = 9;
const LTX_MAX_FRAMES: u32 = 257;

/// Output resolution for an aspect ratio
pub fn ltx_resolution(aspect_ratio: AspectRatio) -> (u32, u32) {
    match aspect_ratio {
        AspectRatio::Landscape => (1216, 704),
        AspectRatio::Portrait => (704, 1216),
        AspectRatio::Square => (1024, 1024),
    }
}

/// Frame count for a clip; the model wants `8n + 1` frames
pub fn ltx_frame_count(duration_secs: u32) -> u32 {
    let target = duration_secs.saturating_mul(LTX_FPS);
    let frames = (target.saturating_sub(1) / 8) * 8 + 1;
    frames.clamp(LTX_MIN_FRAMES, LTX_MAX_FRAMES)
}

/// Whether an error means "this model is not available, try another"
fn is_missing_model(error: &VeoError) -> bool {
    match error {
        VeoError::Api { status: 404, .. } => true,
        VeoError::Api { status, message } if (400..500).contains(status) => {
            let message = message.to_lowercase();
            message.contains("model") && (message.contains("not found") || message.contains("unknown"))
        }
        _ => false,
    }
}

/// Local LTX-Video provider
#[derive(Debug)]
pub struct LtxProvider {
    pipeline: FramePipeline,
    encoder: VideoEncoder,
    output_dir: PathBuf,
    candidates: Vec<String>,
    /// The first candidate the server accepted
    active_model: Mutex<Option<String>>,
}

impl LtxProvider {
    pub fn new(client: Client, config: &VeoConfig) -> Self {
        Self {
            pipeline: FramePipeline::new(client, config.ltx_endpoint.clone()),
            encoder: VideoEncoder::new(config.ffmpeg_path.clone()),
            output_dir: config.output_dir.clone(),
            candidates: LTX_MODEL_CANDIDATES.iter().map(|m| m.to_string()).collect(),
            active_model: Mutex::new(None),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn active_model(&self) -> Option<String> {
        self.active_model.lock().clone()
    }

    async fn conditioning_image(&self, request: &VideoRequest) -> Result<Option<String>, VeoError> {
        let Some(path) = request.image_path.clone() else {
            return Ok(None);
        };
        let encoded = tokio::task::spawn_blocking(move || {
            let img = imaging::shrink_to_fit(imaging::load_rgb(&path)?, imaging::MAX_UPLOAD_SIDE);
            imaging::to_base64_png(&img)
        })
        .await??;
        Ok(Some(encoded))
    }

    /// Generate frames with the cached model, or find a model that works
    async fn generate_frames(&self, request: &mut FrameRequest) -> Result<Vec<RgbImage>, VeoError> {
        if let Some(model) = self.active_model() {
            request.model = Some(model);
            return self.pipeline.generate_frames(request).await;
        }

        for candidate in &self.candidates {
            request.model = Some(candidate.clone());
            match self.pipeline.generate_frames(request).await {
                Ok(frames) => {
                    info!("LTX-Video model selected: {}", candidate);
                    *self.active_model.lock() = Some(candidate.clone());
                    return Ok(frames);
                }
                Err(e) if is_missing_model(&e) => {
                    warn!("LTX-Video model {} unavailable: {}", candidate, e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(VeoError::ProviderUnavailable(
            "no LTX-Video model could be loaded".to_string(),
        ))
    }
}

#[async_trait]
impl VideoProvider for LtxProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ltx
    }

    async fn generate(
        &self,
        request: &VideoRequest,
        progress: &ProgressReporter,
    ) -> Result<Vec<String>, VeoError> {
        info!(
            request_id = %request.id,
            endpoint = %self.pipeline.endpoint(),
            "Generating {} video(s) with LTX-Video",
            request.number_of_videos
        );
        progress.report(
            ProviderKind::Ltx,
            ProgressUpdate::new(GenerationStage::Initializing, 10),
        );

        let (width, height) = ltx_resolution(request.aspect_ratio);
        let mut frame_request = FrameRequest {
            prompt: Some(request.prompt.clone()),
            image: self.conditioning_image(request).await?,
            width,
            height,
            num_frames: ltx_frame_count(request.duration_secs),
            num_inference_steps: LTX_STEPS,
            guidance_scale: Some(LTX_GUIDANCE),
            seed: clock_seed(),
            ..Default::default()
        };

        let timestamp = chrono::Utc::now().timestamp();
        let total = request.number_of_videos.max(1);
        let mut uris = Vec::with_capacity(total as usize);
        for i in 0..total {
            progress.report(
                ProviderKind::Ltx,
                ProgressUpdate::new(GenerationStage::Generating, (25 + i * 50 / total) as u8),
            );
            let frames = self.generate_frames(&mut frame_request).await?;
            let target = self
                .output_dir
                .join(pipeline_filename("ltx", timestamp, request.id, i));
            let written = self.encoder.encode(&frames, LTX_FPS, &target).await?;
            info!(request_id = %request.id, "LTX-Video video saved: {}", written.display());
            uris.push(VideoUri::from_path(&absolute(&written)?));
        }

        progress.report(
            ProviderKind::Ltx,
            ProgressUpdate::new(GenerationStage::Completed, 100),
        );
        Ok(uris)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::frames_body;
    use serde_json::json;
    use tokio::sync::broadcast;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, dir: &tempfile::TempDir) -> VeoConfig {
        VeoConfig {
            ltx_endpoint: server.uri(),
            output_dir: dir.path().to_path_buf(),
            ffmpeg_path: dir.path().join("no-such-ffmpeg"),
            ..Default::default()
        }
    }

    fn reporter() -> ProgressReporter {
        let (tx, _rx) = broadcast::channel(16);
        ProgressReporter::new(Uuid::new_v4(), tx)
    }

    #[test]
    fn test_frame_count_formula() {
        assert_eq!(ltx_frame_count(8), 233);
        assert_eq!(ltx_frame_count(5), 145);
        assert_eq!(ltx_frame_count(0), 9);
        assert_eq!(ltx_frame_count(60), 257);
        assert_eq!((ltx_frame_count(7) - 1) % 8, 0);
    }

    #[test]
    fn test_resolution_by_aspect_ratio() {
        assert_eq!(ltx_resolution(AspectRatio::Landscape), (1216, 704));
        assert_eq!(ltx_resolution(AspectRatio::Portrait), (704, 1216));
        assert_eq!(ltx_resolution(AspectRatio::Square), (1024, 1024));
    }

    #[test]
    fn test_missing_model_classification() {
        assert!(is_missing_model(&VeoError::Api {
            status: 404,
            message: String::new()
        }));
        assert!(is_missing_model(&VeoError::Api {
            status: 400,
            message: "Model Lightricks/x not found".into()
        }));
        assert!(!is_missing_model(&VeoError::Api {
            status: 400,
            message: "bad prompt".into()
        }));
        assert!(!is_missing_model(&VeoError::Api {
            status: 500,
            message: "model not found".into()
        }));
    }

    #[tokio::test]
    async fn test_falls_through_model_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": "Lightricks/ltx-video-2b-v0.9.5"})))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": "Lightricks/ltx-video-13b-v0.9.8"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(frames_body(9, 8, 8)))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = LtxProvider::new(Client::new(), &config(&server, &dir));
        let request = VideoRequest::builder("A paper boat drifting down a stream")
            .number_of_videos(2)
            .build()
            .unwrap();

        let uris = provider.generate(&request, &reporter()).await.unwrap();

        assert_eq!(uris.len(), 2);
        assert!(uris[0].contains("ltx_video_"));
        assert_eq!(
            provider.active_model().as_deref(),
            Some("Lightricks/ltx-video-13b-v0.9.8")
        );
    }

    #[tokio::test]
    async fn test_no_usable_model_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = LtxProvider::new(Client::new(), &config(&server, &dir))
            .with_candidates(vec!["a".to_string(), "b".to_string()]);
        let request = VideoRequest::builder("A paper boat drifting down a stream")
            .build()
            .unwrap();

        let err = provider.generate(&request, &reporter()).await.unwrap_err();
        assert!(matches!(err, VeoError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_request_carries_ltx_settings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "width": 704,
                "height": 1216,
                "num_frames": 145,
                "num_inference_steps": 40,
                "guidance_scale": 3.5,
                "prompt": "A paper boat drifting down a stream"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(frames_body(9, 8, 8)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = LtxProvider::new(Client::new(), &config(&server, &dir));
        let request = VideoRequest::builder("A paper boat drifting down a stream")
            .aspect_ratio(AspectRatio::Portrait)
            .duration_secs(5)
            .build()
            .unwrap();

        let uris = provider.generate(&request, &reporter()).await.unwrap();
        assert_eq!(uris.len(), 1);
    }
}
