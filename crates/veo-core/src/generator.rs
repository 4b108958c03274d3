//! High level generation: requests in, files in the output directory out

use crate::client::VeoClient;
use crate::download::VideoFetcher;
use crate::error::VeoError;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use veo_types::{BatchSlot, GenerationEvent, GenerationParams, VeoConfig, VideoRequest, VideoUri};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// GCS prefix a generation writes to when a bucket is configured
pub fn gcs_output_uri(bucket: &str, timestamp: DateTime<Local>) -> String {
    format!("gs://{}/videos/{}/", bucket, timestamp.format(TIMESTAMP_FORMAT))
}

/// Local file name for video `index` of `total`
///
/// `batch_index` is set for prompts of a batch so that prompts sharing a
/// timestamp do not collide.
pub fn video_filename(
    custom: Option<&str>,
    batch_index: Option<usize>,
    index: usize,
    total: usize,
    timestamp: DateTime<Local>,
) -> String {
    match (custom, batch_index) {
        (Some(name), None) if total == 1 => format!("{}.mp4", name),
        (Some(name), None) => format!("{}_{}.mp4", name, index),
        (Some(name), Some(batch)) if total == 1 => format!("{}_{}.mp4", name, batch),
        (Some(name), Some(batch)) => format!("{}_{}_{}.mp4", name, batch, index),
        (None, None) => format!("video_{}_{}.mp4", timestamp.format(TIMESTAMP_FORMAT), index),
        (None, Some(batch)) => format!(
            "video_{}_{}_{}.mp4",
            timestamp.format(TIMESTAMP_FORMAT),
            batch,
            index
        ),
    }
}

/// Generates videos and stores them under the configured output directory
#[derive(Clone)]
pub struct VideoGenerator {
    config: Arc<VeoConfig>,
    client: VeoClient,
    fetcher: VideoFetcher,
    event_tx: broadcast::Sender<GenerationEvent>,
}

impl VideoGenerator {
    pub fn new(
        config: Arc<VeoConfig>,
        client: VeoClient,
        fetcher: VideoFetcher,
        event_tx: broadcast::Sender<GenerationEvent>,
    ) -> Self {
        Self {
            config,
            client,
            fetcher,
            event_tx,
        }
    }

    pub fn client(&self) -> &VeoClient {
        &self.client
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Text-to-video
    pub async fn generate_from_prompt(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<PathBuf>, VeoError> {
        let request = params.request(prompt).build()?;
        self.generate_request(request).await
    }

    /// Image-to-video
    pub async fn generate_from_image(
        &self,
        prompt: &str,
        image_path: &Path,
        params: &GenerationParams,
    ) -> Result<Vec<PathBuf>, VeoError> {
        let request = params.request(prompt).image_path(image_path).build()?;
        self.generate_request(request).await
    }

    /// Generate an already built request and save every video it yields
    pub async fn generate_request(&self, mut request: VideoRequest) -> Result<Vec<PathBuf>, VeoError> {
        let timestamp = Local::now();
        self.apply_gcs_output(&mut request, timestamp)?;

        let outcome = self.client.generate_video(&request).await?;
        self.save_videos(&request, &outcome.uris, None, timestamp).await
    }

    /// Generate one request per prompt with bounded concurrency
    ///
    /// Every prompt is validated before anything is dispatched. The result
    /// has one entry per prompt, in order; failed prompts have no files.
    pub async fn batch_generate_from_prompts(
        &self,
        prompts: &[String],
        params: &GenerationParams,
        max_concurrent: Option<usize>,
    ) -> Result<Vec<BatchSlot<PathBuf>>, VeoError> {
        let timestamp = Local::now();
        let mut requests = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let mut request = params.request(prompt.as_str()).build()?;
            self.apply_gcs_output(&mut request, timestamp)?;
            requests.push(request);
        }

        info!("Batch generating {} videos", requests.len());
        let slots = self
            .client
            .batch_generate_videos(requests.clone(), max_concurrent)
            .await;

        let mut saved = Vec::with_capacity(slots.len());
        for (slot, request) in slots.into_iter().zip(&requests) {
            if let Some(err) = slot.error {
                saved.push(BatchSlot::failure(slot.index, slot.request_id, err));
                continue;
            }
            match self
                .save_videos(request, &slot.videos, Some(slot.index), timestamp)
                .await
            {
                Ok(paths) => saved.push(BatchSlot::success(slot.index, slot.request_id, paths)),
                Err(e) => {
                    error!("Saving videos for batch request {} failed: {}", slot.index, e);
                    saved.push(BatchSlot::failure(slot.index, slot.request_id, e.to_string()));
                }
            }
        }

        Ok(saved)
    }

    fn apply_gcs_output(
        &self,
        request: &mut VideoRequest,
        timestamp: DateTime<Local>,
    ) -> Result<(), VeoError> {
        if request.output_gcs_uri.is_some() {
            return Ok(());
        }
        if let Some(bucket) = self.config.gcs_bucket.as_deref() {
            request.set_output_gcs_uri(gcs_output_uri(bucket, timestamp))?;
        }
        Ok(())
    }

    async fn save_videos(
        &self,
        request: &VideoRequest,
        uris: &[String],
        batch_index: Option<usize>,
        timestamp: DateTime<Local>,
    ) -> Result<Vec<PathBuf>, VeoError> {
        let mut paths = Vec::with_capacity(uris.len());
        for (index, uri) in uris.iter().enumerate() {
            let mut name = video_filename(
                request.output_filename.as_deref(),
                batch_index,
                index,
                uris.len(),
                timestamp,
            );
            // Keep the extension of a GIF fallback
            if uri.ends_with(".gif") {
                name = Path::new(&name).with_extension("gif").display().to_string();
            }
            let target = self.config.output_dir.join(name);

            match self.local_output(uri).await {
                Some(source) => {
                    tokio::fs::rename(&source, &target).await?;
                    info!("Video saved: {}", target.display());
                }
                None => {
                    self.fetcher.download(uri, &target).await?;
                    info!("Video saved: {}", target.display());
                }
            }

            let _ = self.event_tx.send(GenerationEvent::VideoSaved {
                id: request.id,
                path: target.clone(),
            });
            paths.push(target);
        }
        Ok(paths)
    }

    /// A `file://` URI that a local pipeline already wrote into the output
    /// directory; it is renamed instead of copied
    async fn local_output(&self, uri: &str) -> Option<PathBuf> {
        let VideoUri::File(source) = VideoUri::parse(uri).ok()? else {
            return None;
        };
        let parent = tokio::fs::canonicalize(source.parent()?).await.ok()?;
        let output_dir = tokio::fs::canonicalize(&self.config.output_dir).await.ok()?;
        (parent == output_dir).then_some(source)
    }

    /// Find `.mp4` files in the output directory older than `days`
    ///
    /// The matching paths are returned and, unless `dry_run`, deleted.
    pub async fn cleanup_old_videos(&self, days: u32, dry_run: bool) -> Result<Vec<PathBuf>, VeoError> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(u64::from(days) * 24 * 60 * 60))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut matched = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.config.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(matched),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            if metadata.modified()? < cutoff {
                matched.push(path);
            }
        }
        matched.sort();

        if dry_run {
            info!("Dry run: {} videos older than {} days", matched.len(), days);
            return Ok(matched);
        }

        for path in &matched {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!("Failed to delete {}: {}", path.display(), e);
                return Err(e.into());
            }
            info!("Deleted old video: {}", path.display());
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::stub::StubProvider;
    use crate::pipeline::test_support::frame_server;
    use crate::pipeline::SvdProvider;
    use crate::provider::{ProgressReporter, VideoProvider};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use reqwest::Client;
    use veo_types::ProviderKind;

    fn timestamp() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    /// Provider that writes real files into a directory, like a local pipeline
    struct FileProvider {
        dir: PathBuf,
    }

    #[async_trait]
    impl VideoProvider for FileProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Svd
        }

        async fn generate(
            &self,
            request: &VideoRequest,
            _progress: &ProgressReporter,
        ) -> Result<Vec<String>, VeoError> {
            let mut uris = Vec::new();
            for i in 0..request.number_of_videos {
                let path = self.dir.join(format!("svd_video_{}_{}.mp4", request.id, i));
                tokio::fs::write(&path, b"frames").await?;
                uris.push(VideoUri::from_path(&path));
            }
            Ok(uris)
        }
    }

    fn build_generator(config: VeoConfig, providers: Vec<Arc<dyn VideoProvider>>) -> VideoGenerator {
        let (tx, _rx) = broadcast::channel(64);
        let client = VeoClient::from_providers(providers, 2, tx.clone());
        let fetcher = VideoFetcher::new(Client::new(), &config);
        VideoGenerator::new(Arc::new(config), client, fetcher, tx)
    }

    #[test]
    fn test_video_filenames() {
        let ts = timestamp();
        assert_eq!(video_filename(Some("clip"), None, 0, 1, ts), "clip.mp4");
        assert_eq!(video_filename(Some("clip"), None, 1, 2, ts), "clip_1.mp4");
        assert_eq!(video_filename(None, None, 0, 1, ts), "video_20240305_140709_0.mp4");
        assert_eq!(
            video_filename(None, Some(3), 1, 2, ts),
            "video_20240305_140709_3_1.mp4"
        );
        assert_eq!(video_filename(Some("clip"), Some(2), 0, 1, ts), "clip_2.mp4");
    }

    #[test]
    fn test_gcs_output_uri() {
        assert_eq!(
            gcs_output_uri("my-bucket", timestamp()),
            "gs://my-bucket/videos/20240305_140709/"
        );
    }

    #[tokio::test]
    async fn test_local_pipeline_output_is_renamed_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let config = VeoConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let generator = build_generator(
            config,
            vec![Arc::new(FileProvider {
                dir: dir.path().to_path_buf(),
            })],
        );
        let params = GenerationParams {
            number_of_videos: 2,
            output_filename: Some("sunset".to_string()),
            ..Default::default()
        };

        let paths = generator
            .generate_from_prompt("A sunset over rolling hills", &params)
            .await
            .unwrap();

        assert_eq!(
            paths,
            vec![dir.path().join("sunset_0.mp4"), dir.path().join("sunset_1.mp4")]
        );
        assert!(paths.iter().all(|p| p.exists()));
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("svd_video_")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_invalid_prompt_fails_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(StubProvider::ok(ProviderKind::Veo));
        let generator = build_generator(
            VeoConfig {
                output_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            vec![provider.clone()],
        );

        let prompts = vec!["a perfectly valid prompt".to_string(), "short".to_string()];
        let result = generator
            .batch_generate_from_prompts(&prompts, &GenerationParams::default(), None)
            .await;

        assert!(matches!(result, Err(VeoError::Validation(_))));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_keeps_one_slot_per_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let generator = build_generator(
            VeoConfig {
                output_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            vec![Arc::new(FileProvider {
                dir: source_dir.path().to_path_buf(),
            })],
        );

        let prompts = vec![
            "first prompt for the batch".to_string(),
            "second prompt for the batch".to_string(),
        ];
        let slots = generator
            .batch_generate_from_prompts(&prompts, &GenerationParams::default(), Some(1))
            .await
            .unwrap();

        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.is_success() && s.videos.len() == 1));
        assert_ne!(slots[0].videos[0], slots[1].videos[0]);
        assert!(slots[0].videos[0].exists());
    }

    #[tokio::test]
    async fn test_concurrent_batch_through_local_pipeline_keeps_every_video() {
        let server = frame_server(3, 8, 8).await;
        let dir = tempfile::tempdir().unwrap();
        let config = VeoConfig {
            svd_endpoint: server.uri(),
            output_dir: dir.path().to_path_buf(),
            ffmpeg_path: dir.path().join("no-such-ffmpeg"),
            ..Default::default()
        };
        let svd: Arc<dyn VideoProvider> = Arc::new(SvdProvider::new(Client::new(), &config));
        let generator = build_generator(config, vec![svd]);

        let prompts = vec![
            "A lighthouse on a rocky coast".to_string(),
            "A lighthouse on a rocky coast at night".to_string(),
            "A lighthouse on a rocky coast in fog".to_string(),
        ];
        let slots = generator
            .batch_generate_from_prompts(&prompts, &GenerationParams::default(), Some(3))
            .await
            .unwrap();

        assert_eq!(slots.len(), 3);
        for slot in &slots {
            assert!(slot.is_success(), "slot {} failed: {:?}", slot.index, slot.error);
            assert_eq!(slot.videos.len(), 1);
            assert!(slot.videos[0].exists());
        }
        let mut paths: Vec<_> = slots.iter().map(|s| s.videos[0].clone()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 3);

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("svd_video_")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_failed_download_fails_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        // StubProvider returns gs:// URIs; no access to a real bucket here
        let generator = build_generator(
            VeoConfig {
                output_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            vec![Arc::new(StubProvider::ok(ProviderKind::Veo))],
        );
        let mut generator = generator;
        generator.fetcher = generator.fetcher.with_gcs_base_url("http://127.0.0.1:1");

        let prompts = vec!["a prompt whose video cannot be fetched".to_string()];
        let slots = generator
            .batch_generate_from_prompts(&prompts, &GenerationParams::default(), None)
            .await
            .unwrap();

        assert_eq!(slots.len(), 1);
        assert!(!slots[0].is_success());
        assert!(slots[0].videos.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_old_videos() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.mp4");
        let fresh = dir.path().join("fresh.mp4");
        let other = dir.path().join("notes.txt");
        for path in [&old, &fresh, &other] {
            std::fs::write(path, b"x").unwrap();
        }
        let ten_days_ago = SystemTime::now() - Duration::from_secs(10 * 24 * 60 * 60);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(ten_days_ago)
            .unwrap();
        std::fs::File::options()
            .write(true)
            .open(&other)
            .unwrap()
            .set_modified(ten_days_ago)
            .unwrap();

        let generator = build_generator(
            VeoConfig {
                output_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            Vec::new(),
        );

        let matched = generator.cleanup_old_videos(7, true).await.unwrap();
        assert_eq!(matched, vec![old.clone()]);
        assert!(old.exists());

        let deleted = generator.cleanup_old_videos(7, false).await.unwrap();
        assert_eq!(deleted, vec![old.clone()]);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }

    #[tokio::test]
    async fn test_cleanup_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let generator = build_generator(
            VeoConfig {
                output_dir: dir.path().join("missing"),
                ..Default::default()
            },
            Vec::new(),
        );
        assert!(generator.cleanup_old_videos(1, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gcs_output_is_applied_when_bucket_configured() {
        let generator = build_generator(
            VeoConfig {
                gcs_bucket: Some("bucket".to_string()),
                ..Default::default()
            },
            Vec::new(),
        );
        let mut request = VideoRequest::builder("A quiet forest at dawn").build().unwrap();
        generator.apply_gcs_output(&mut request, timestamp()).unwrap();
        assert_eq!(
            request.output_gcs_uri.as_deref(),
            Some("gs://bucket/videos/20240305_140709/")
        );
    }
}
