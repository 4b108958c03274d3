//! Ordered provider fallback

use crate::error::{ProviderFailure, VeoError};
use crate::provider::{ProgressReporter, VideoProvider};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use veo_types::{GenerationEvent, ProviderKind, ProviderOutcome, VideoRequest};

/// Tries each provider in turn until one produces videos
pub struct FallbackChain {
    providers: Vec<Arc<dyn VideoProvider>>,
    event_tx: broadcast::Sender<GenerationEvent>,
}

impl FallbackChain {
    pub fn new(
        providers: Vec<Arc<dyn VideoProvider>>,
        event_tx: broadcast::Sender<GenerationEvent>,
    ) -> Self {
        Self {
            providers,
            event_tx,
        }
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    pub async fn generate(&self, request: &VideoRequest) -> Result<ProviderOutcome, VeoError> {
        if self.providers.is_empty() {
            return Err(VeoError::ProviderUnavailable(
                "no providers configured".to_string(),
            ));
        }

        let progress = ProgressReporter::new(request.id, self.event_tx.clone());
        let mut failures = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let kind = provider.kind();
            info!(request_id = %request.id, provider = %kind, "Attempting {} generation", kind.display_name());

            match provider.generate(request, &progress).await {
                Ok(uris) => {
                    info!(request_id = %request.id, provider = %kind, "{} generation succeeded", kind.display_name());
                    return Ok(ProviderOutcome {
                        provider: kind,
                        uris,
                    });
                }
                Err(e) => {
                    warn!(request_id = %request.id, provider = %kind, "{} generation failed: {}", kind.display_name(), e);
                    let _ = self.event_tx.send(GenerationEvent::ProviderFailed {
                        id: request.id,
                        provider: kind,
                        error: e.to_string(),
                    });
                    failures.push(ProviderFailure {
                        provider: kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(VeoError::AllProvidersFailed(failures))
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted provider for orchestration tests
    pub struct StubProvider {
        pub kind: ProviderKind,
        pub fail_prompts_containing: Option<&'static str>,
        pub always_fail: bool,
        pub delay: Duration,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl StubProvider {
        pub fn ok(kind: ProviderKind) -> Self {
            Self {
                kind,
                fail_prompts_containing: None,
                always_fail: false,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        pub fn failing(kind: ProviderKind) -> Self {
            Self {
                always_fail: true,
                ..Self::ok(kind)
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VideoProvider for StubProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn generate(
            &self,
            request: &VideoRequest,
            _progress: &ProgressReporter,
        ) -> Result<Vec<String>, VeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let rejected = self
                .fail_prompts_containing
                .is_some_and(|needle| request.prompt.contains(needle));
            if self.always_fail || rejected {
                return Err(VeoError::OperationFailed(format!("{} refused", self.kind)));
            }

            Ok((0..request.number_of_videos)
                .map(|i| format!("gs://bucket/{}/{}/{}.mp4", self.kind, request.id, i))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::StubProvider;
    use super::*;

    fn request() -> VideoRequest {
        VideoRequest::builder("A lighthouse in a thunderstorm")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let (tx, _rx) = broadcast::channel(16);
        let veo = Arc::new(StubProvider::ok(ProviderKind::Veo));
        let svd = Arc::new(StubProvider::ok(ProviderKind::Svd));
        let chain = FallbackChain::new(vec![veo.clone(), svd.clone()], tx);

        let outcome = chain.generate(&request()).await.unwrap();

        assert_eq!(outcome.provider, ProviderKind::Veo);
        assert_eq!(outcome.uris.len(), 1);
        assert_eq!(svd.calls(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_in_order() {
        let (tx, mut rx) = broadcast::channel(16);
        let veo = Arc::new(StubProvider::failing(ProviderKind::Veo));
        let svd = Arc::new(StubProvider::failing(ProviderKind::Svd));
        let ltx = Arc::new(StubProvider::ok(ProviderKind::Ltx));
        let chain = FallbackChain::new(vec![veo.clone(), svd.clone(), ltx.clone()], tx);

        let outcome = chain.generate(&request()).await.unwrap();

        assert_eq!(outcome.provider, ProviderKind::Ltx);
        assert_eq!((veo.calls(), svd.calls(), ltx.calls()), (1, 1, 1));

        let mut failed = Vec::new();
        while let Ok(GenerationEvent::ProviderFailed { provider, .. }) = rx.try_recv() {
            failed.push(provider);
        }
        assert_eq!(failed, vec![ProviderKind::Veo, ProviderKind::Svd]);
    }

    #[tokio::test]
    async fn test_all_failures_are_aggregated() {
        let (tx, _rx) = broadcast::channel(16);
        let chain = FallbackChain::new(
            vec![
                Arc::new(StubProvider::failing(ProviderKind::Veo)),
                Arc::new(StubProvider::failing(ProviderKind::Svd)),
            ],
            tx,
        );

        match chain.generate(&request()).await.unwrap_err() {
            VeoError::AllProvidersFailed(failures) => {
                let kinds: Vec<_> = failures.iter().map(|f| f.provider).collect();
                assert_eq!(kinds, vec![ProviderKind::Veo, ProviderKind::Svd]);
                assert!(failures[0].error.contains("veo refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_chain_is_unavailable() {
        let (tx, _rx) = broadcast::channel(16);
        let chain = FallbackChain::new(Vec::new(), tx);
        assert!(matches!(
            chain.generate(&request()).await,
            Err(VeoError::ProviderUnavailable(_))
        ));
    }
}
