//! Progress bars driven by core generation events

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;
use veo_types::{truncate_chars, GenerationEvent};

/// Manages one progress bar per in-flight request
pub struct GenerationProgress {
    multi: MultiProgress,
    bars: Arc<RwLock<HashMap<Uuid, ProgressBar>>>,
}

impl GenerationProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Render events until [`ProgressHandle::finish`] is called
    pub fn spawn(self, mut events: broadcast::Receiver<GenerationEvent>) -> ProgressHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = events.recv() => match event {
                        Ok(event) => self.handle_event(&event).await,
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                    _ = &mut stop_rx => {
                        // Events sent before the stop still update their bars
                        loop {
                            match events.try_recv() {
                                Ok(event) => self.handle_event(&event).await,
                                Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            self.clear().await;
        });

        ProgressHandle {
            stop: stop_tx,
            task,
        }
    }

    async fn add_request(&self, id: Uuid, prompt: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(100));

        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {prefix:>9} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        pb.set_message(truncate_chars(prompt, 40));
        pb.enable_steady_tick(std::time::Duration::from_millis(120));

        self.bars.write().await.insert(id, pb.clone());
        pb
    }

    /// Update a progress bar from an event
    pub async fn handle_event(&self, event: &GenerationEvent) {
        match event {
            GenerationEvent::RequestStarted { id, prompt } => {
                self.add_request(*id, prompt).await;
            }

            GenerationEvent::Progress {
                id,
                provider,
                percent,
                ..
            } => {
                let bars = self.bars.read().await;
                if let Some(pb) = bars.get(id) {
                    pb.set_prefix(provider.display_name());
                    pb.set_position(*percent as u64);
                }
            }

            GenerationEvent::ProviderFailed {
                provider, error, ..
            } => {
                let _ = self.multi.println(format!(
                    "{} {} failed: {}",
                    style("!").yellow().bold(),
                    provider.display_name(),
                    style(error).dim()
                ));
            }

            GenerationEvent::RequestCompleted { id, provider, uris } => {
                if let Some(pb) = self.bars.write().await.remove(id) {
                    pb.set_position(100);
                    pb.finish_with_message(format!(
                        "{} {} video(s) from {}",
                        style("✓").green().bold(),
                        uris.len(),
                        provider.display_name()
                    ));
                }
            }

            GenerationEvent::RequestFailed { id, error } => {
                if let Some(pb) = self.bars.write().await.remove(id) {
                    pb.abandon_with_message(format!(
                        "{} {}",
                        style("✗").red().bold(),
                        truncate_chars(error, 60)
                    ));
                }
            }

            GenerationEvent::VideoSaved { .. } | GenerationEvent::BatchCompleted { .. } => {}
        }
    }

    /// Clear all progress bars
    pub async fn clear(&self) {
        for (_, pb) in self.bars.write().await.drain() {
            pb.finish_and_clear();
        }
    }
}

/// A running progress renderer
pub struct ProgressHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ProgressHandle {
    /// Render what is already queued, clear the bars and wait for the renderer
    pub async fn finish(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

impl Default for GenerationProgress {
    fn default() -> Self {
        Self::new()
    }
}
