//! VEO Core - Video Generation Engine
//!
//! This crate drives video generation for VEO. It submits requests to the
//! cloud API or to local diffusion pipelines, falls back between them,
//! runs batches with bounded concurrency and stores the resulting files.

mod client;
mod config;
mod download;
mod error;
mod fallback;
mod generator;
mod imaging;
mod pipeline;
mod prompts;
mod provider;

pub use client::*;
pub use config::*;
pub use download::*;
pub use error::*;
pub use fallback::*;
pub use generator::*;
pub use pipeline::*;
pub use prompts::*;
pub use provider::*;

use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use veo_types::{BatchSlot, GenerationEvent, GenerationParams, VeoConfig};

/// The main VEO core instance
#[derive(Clone)]
pub struct VeoCore {
    config: Arc<VeoConfig>,
    /// Event broadcaster
    event_tx: broadcast::Sender<GenerationEvent>,
    generator: VideoGenerator,
    prompts: PromptLibrary,
}

impl VeoCore {
    /// Create a new VeoCore instance
    pub async fn new(config: VeoConfig) -> Result<Self, VeoError> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.output_dir).await?;

        let http = Client::builder()
            .user_agent(concat!("veo/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        // Create event channel
        let (event_tx, _) = broadcast::channel(1000);

        let config = Arc::new(config);
        let client = VeoClient::new(&config, http.clone(), event_tx.clone());
        let fetcher = VideoFetcher::new(http, &config);
        let generator = VideoGenerator::new(config.clone(), client, fetcher, event_tx.clone());
        let prompts = PromptLibrary::new(config.prompts_dir.clone());

        info!("VEO core initialized (output: {})", config.output_dir.display());

        Ok(Self {
            config,
            event_tx,
            generator,
            prompts,
        })
    }

    /// Subscribe to core events
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &VeoConfig {
        &self.config
    }

    pub fn generator(&self) -> &VideoGenerator {
        &self.generator
    }

    pub fn client(&self) -> &VeoClient {
        self.generator.client()
    }

    pub fn prompts(&self) -> &PromptLibrary {
        &self.prompts
    }

    /// Generate from a prompt file in the library
    pub async fn generate_from_prompt_file(
        &self,
        name: &str,
        params: &GenerationParams,
    ) -> Result<Vec<PathBuf>, VeoError> {
        let prompt = self.prompts.load_prompt(name).await?;
        info!("Loaded prompt '{}': {}", name, veo_types::truncate_chars(&prompt, 100));
        self.generator.generate_from_prompt(&prompt, params).await
    }

    /// Generate one batch entry per prompt file of a category
    pub async fn generate_from_category(
        &self,
        category: PromptCategory,
        params: &GenerationParams,
        max_concurrent: Option<usize>,
    ) -> Result<Vec<(PromptEntry, BatchSlot<PathBuf>)>, VeoError> {
        let entries = self.prompts.list(Some(category)).await?;
        let mut prompts = Vec::with_capacity(entries.len());
        for entry in &entries {
            prompts.push(self.prompts.load_prompt(&entry.path.to_string_lossy()).await?);
        }

        let slots = self
            .generator
            .batch_generate_from_prompts(&prompts, params, max_concurrent)
            .await?;
        Ok(entries.into_iter().zip(slots).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_core_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out/videos");
        let config = VeoConfig {
            output_dir: output.clone(),
            prompts_dir: dir.path().join("prompts"),
            ..Default::default()
        };

        let core = VeoCore::new(config).await.unwrap();
        assert!(output.is_dir());
        assert_eq!(core.client().providers(), veo_types::ProviderKind::DEFAULT_ORDER.to_vec());
    }

    #[tokio::test]
    async fn test_core_rejects_invalid_config() {
        let config = VeoConfig {
            retry_attempts: 0,
            ..Default::default()
        };
        assert!(VeoCore::new(config).await.is_err());
    }
}
