//! Single and batch dispatch over the fallback chain

use crate::error::VeoError;
use crate::fallback::FallbackChain;
use crate::pipeline::{LtxProvider, SvdProvider};
use crate::provider::{VeoApiProvider, VideoProvider};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info};
use veo_types::{
    BatchSlot, GenerationEvent, OperationStatus, ProviderKind, ProviderOutcome, VeoConfig,
    VideoRequest,
};

/// Dispatches requests through the provider chain
#[derive(Clone)]
pub struct VeoClient {
    chain: Arc<FallbackChain>,
    veo: Option<Arc<VeoApiProvider>>,
    max_concurrent: usize,
    event_tx: broadcast::Sender<GenerationEvent>,
}

impl VeoClient {
    /// Build the providers named in `config.providers`, in that order
    pub fn new(
        config: &VeoConfig,
        http: Client,
        event_tx: broadcast::Sender<GenerationEvent>,
    ) -> Self {
        let mut veo = None;
        let providers: Vec<Arc<dyn VideoProvider>> = config
            .providers
            .iter()
            .map(|kind| -> Arc<dyn VideoProvider> {
                match kind {
                    ProviderKind::Veo => {
                        let provider = Arc::new(VeoApiProvider::new(http.clone(), config));
                        veo = Some(provider.clone());
                        provider
                    }
                    ProviderKind::Svd => Arc::new(SvdProvider::new(http.clone(), config)),
                    ProviderKind::Ltx => Arc::new(LtxProvider::new(http.clone(), config)),
                }
            })
            .collect();

        info!(
            "Video client ready (providers: {})",
            config
                .providers
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Self {
            chain: Arc::new(FallbackChain::new(providers, event_tx.clone())),
            veo,
            max_concurrent: config.max_concurrent_operations.max(1) as usize,
            event_tx,
        }
    }

    /// Build around an explicit provider list
    pub fn from_providers(
        providers: Vec<Arc<dyn VideoProvider>>,
        max_concurrent: usize,
        event_tx: broadcast::Sender<GenerationEvent>,
    ) -> Self {
        Self {
            chain: Arc::new(FallbackChain::new(providers, event_tx.clone())),
            veo: None,
            max_concurrent: max_concurrent.max(1),
            event_tx,
        }
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        self.chain.providers()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Generate the videos for one request
    pub async fn generate_video(&self, request: &VideoRequest) -> Result<ProviderOutcome, VeoError> {
        info!(request_id = %request.id, "Generating video: {}", request.prompt_preview(100));
        let _ = self.event_tx.send(GenerationEvent::RequestStarted {
            id: request.id,
            prompt: request.prompt.clone(),
        });

        match self.chain.generate(request).await {
            Ok(outcome) => {
                let _ = self.event_tx.send(GenerationEvent::RequestCompleted {
                    id: request.id,
                    provider: outcome.provider,
                    uris: outcome.uris.clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                error!(request_id = %request.id, "Video generation failed: {}", e);
                let _ = self.event_tx.send(GenerationEvent::RequestFailed {
                    id: request.id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Generate many requests with at most `max_concurrent` in flight
    ///
    /// Returns one slot per request, in input order. A failed request gets
    /// an empty slot carrying its error and does not affect the others.
    pub async fn batch_generate_videos(
        &self,
        requests: Vec<VideoRequest>,
        max_concurrent: Option<usize>,
    ) -> Vec<BatchSlot<String>> {
        let total = requests.len();
        let limit = max_concurrent.unwrap_or(self.max_concurrent).max(1);
        info!("Starting batch of {} requests ({} at a time)", total, limit);

        let ids: Vec<_> = requests.iter().map(|r| r.id).collect();
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut tasks = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let client = self.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = client.generate_video(&request).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<BatchSlot<String>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(outcome))) => {
                    slots[index] = Some(BatchSlot::success(index, ids[index], outcome.uris));
                }
                Ok((index, Err(e))) => {
                    error!("Batch request {} failed: {}", index, e);
                    slots[index] = Some(BatchSlot::failure(index, ids[index], e.to_string()));
                }
                Err(e) => error!("Batch task aborted: {}", e),
            }
        }

        let slots: Vec<_> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    BatchSlot::failure(index, ids[index], "generation task aborted")
                })
            })
            .collect();

        let succeeded = slots.iter().filter(|s| s.is_success()).count();
        info!("Batch finished: {}/{} succeeded", succeeded, total);
        let _ = self
            .event_tx
            .send(GenerationEvent::BatchCompleted { total, succeeded });

        slots
    }

    /// Look up a cloud operation by id
    pub async fn check_operation_status(
        &self,
        operation_id: &str,
    ) -> Result<OperationStatus, VeoError> {
        let veo = self.veo.as_ref().ok_or_else(|| {
            VeoError::ProviderUnavailable("the VEO provider is not enabled".to_string())
        })?;
        veo.check_operation_status(operation_id).await
    }
}
