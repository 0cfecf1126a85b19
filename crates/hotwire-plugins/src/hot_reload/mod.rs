//! Hot-reload support
//!
//! Watches the plugin root and turns each burst of file changes into one
//! `load_all` pass on the loader.

mod watcher;

pub use watcher::{PluginWatcher, WatchConfig, WatchEvent, WatchEventKind};

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::loader::{LoadSummary, PluginLoader};

/// Hot-reload errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ReloadError {
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Hot reload is already running")]
    AlreadyRunning,

    #[error("Watch event receiver already taken")]
    ReceiverTaken,
}

pub type ReloadResult<T> = Result<T, ReloadError>;

/// Drives the loader from file system events
pub struct HotReloadManager {
    loader: Arc<PluginLoader>,
    watcher: PluginWatcher,
    summary_tx: broadcast::Sender<LoadSummary>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl HotReloadManager {
    pub fn new(loader: Arc<PluginLoader>, config: WatchConfig) -> Self {
        let (summary_tx, _) = broadcast::channel(64);
        Self {
            loader,
            watcher: PluginWatcher::new(config),
            summary_tx,
            shutdown_tx: None,
        }
    }

    /// Summaries of the passes triggered by file changes
    pub fn subscribe(&self) -> broadcast::Receiver<LoadSummary> {
        self.summary_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Start watching. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> ReloadResult<()> {
        if self.is_running() {
            return Err(ReloadError::AlreadyRunning);
        }
        let mut events = self
            .watcher
            .take_event_receiver()
            .ok_or(ReloadError::ReceiverTaken)?;
        self.watcher.start(self.loader.root())?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let loader = self.loader.clone();
        let summary_tx = self.summary_tx.clone();
        let debounce = self.watcher.config().debounce_duration;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(first) = events.recv() => {
                        debug!("change detected: {:?}", first);
                        // let the burst settle, then fold it into one pass
                        tokio::time::sleep(debounce).await;
                        let mut folded = 1;
                        while events.try_recv().is_ok() {
                            folded += 1;
                        }

                        let pass = loader.clone();
                        match tokio::task::spawn_blocking(move || pass.load_all()).await {
                            Ok(summary) => {
                                debug!(events = folded, "hot reload pass finished");
                                let _ = summary_tx.send(summary);
                            }
                            Err(e) => error!("hot reload pass failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Hot reload shutting down");
                        return;
                    }
                }
            }
        });

        info!(root = %self.loader.root().display(), "hot reload started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        self.watcher.stop();
    }
}

impl Drop for HotReloadManager {
    fn drop(&mut self) {
        self.stop();
    }
}
