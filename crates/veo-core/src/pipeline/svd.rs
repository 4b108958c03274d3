//! Stable Video Diffusion (image to video)

use super::{absolute, clock_seed, pipeline_filename, FramePipeline, FrameRequest, VideoEncoder};
use crate::error::VeoError;
use crate::imaging;
use crate::provider::{ProgressReporter, VideoProvider};
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use tracing::info;
use veo_types::{
    GenerationStage, ProgressUpdate, ProviderKind, VeoConfig, VideoRequest, VideoUri,
};

pub const SVD_WIDTH: u32 = 1024;
pub const SVD_HEIGHT: u32 = 576;
pub const SVD_FPS: u32 = 3;

const SVD_STEPS: u32 = 25;
const SVD_MIN_GUIDANCE: f32 = 1.0;
const SVD_MAX_GUIDANCE: f32 = 3.0;
const SVD_MOTION_BUCKET: u32 = 127;
const SVD_NOISE_AUG: f32 = 0.02;

/// Frames requested for a clip: three per second, between 14 and 25
pub fn svd_frame_count(duration_secs: u32) -> u32 {
    duration_secs.saturating_mul(3).clamp(14, 25)
}

/// Local Stable Video Diffusion provider
#[derive(Debug, Clone)]
pub struct SvdProvider {
    pipeline: FramePipeline,
    encoder: VideoEncoder,
    output_dir: PathBuf,
}

impl SvdProvider {
    pub fn new(client: Client, config: &VeoConfig) -> Self {
        Self {
            pipeline: FramePipeline::new(client, config.svd_endpoint.clone()),
            encoder: VideoEncoder::new(config.ffmpeg_path.clone()),
            output_dir: config.output_dir.clone(),
        }
    }

    /// The conditioning image: the request's image at exactly 1024x576, or
    /// the placeholder when the request has none
    async fn conditioning_image(&self, request: &VideoRequest) -> Result<String, VeoError> {
        let path = request.image_path.clone();
        tokio::task::spawn_blocking(move || {
            let img = match path {
                Some(path) => imaging::resize_exact(&imaging::load_rgb(&path)?, SVD_WIDTH, SVD_HEIGHT),
                None => imaging::placeholder_image(SVD_WIDTH, SVD_HEIGHT),
            };
            imaging::to_base64_png(&img)
        })
        .await?
    }

    fn frame_request(&self, request: &VideoRequest, image: String) -> FrameRequest {
        FrameRequest {
            image: Some(image),
            width: SVD_WIDTH,
            height: SVD_HEIGHT,
            num_frames: svd_frame_count(request.duration_secs),
            num_inference_steps: SVD_STEPS,
            min_guidance_scale: Some(SVD_MIN_GUIDANCE),
            max_guidance_scale: Some(SVD_MAX_GUIDANCE),
            motion_bucket_id: Some(SVD_MOTION_BUCKET),
            noise_aug_strength: Some(SVD_NOISE_AUG),
            seed: clock_seed(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VideoProvider for SvdProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Svd
    }

    async fn generate(
        &self,
        request: &VideoRequest,
        progress: &ProgressReporter,
    ) -> Result<Vec<String>, VeoError> {
        info!(
            request_id = %request.id,
            endpoint = %self.pipeline.endpoint(),
            "Generating {} video(s) with SVD",
            request.number_of_videos
        );
        progress.report(
            ProviderKind::Svd,
            ProgressUpdate::new(GenerationStage::Initializing, 10),
        );

        let image = self.conditioning_image(request).await?;
        let frame_request = self.frame_request(request, image);
        let timestamp = chrono::Utc::now().timestamp();
        let total = request.number_of_videos.max(1);

        let mut uris = Vec::with_capacity(total as usize);
        for i in 0..total {
            progress.report(
                ProviderKind::Svd,
                ProgressUpdate::new(GenerationStage::Generating, (25 + i * 50 / total) as u8),
            );
            let frames = self.pipeline.generate_frames(&frame_request).await?;
            let target = self
                .output_dir
                .join(pipeline_filename("svd", timestamp, request.id, i));
            let written = self.encoder.encode(&frames, SVD_FPS, &target).await?;
            info!(request_id = %request.id, "SVD video saved: {}", written.display());
            uris.push(VideoUri::from_path(&absolute(&written)?));
        }

        progress.report(
            ProviderKind::Svd,
            ProgressUpdate::new(GenerationStage::Completed, 100),
        );
        Ok(uris)
    }
}
