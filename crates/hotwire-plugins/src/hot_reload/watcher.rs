//! File system watcher for plugin changes
//!
//! Monitors the plugin root for script changes and forwards them as
//! [`WatchEvent`]s.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::rhai_runtime::SCRIPT_EXTENSION;

/// Watch event kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Plugin file created
    Created,
    /// Plugin file modified
    Modified,
    /// Plugin file or directory removed
    Removed,
    /// Plugin file renamed
    Renamed { from: PathBuf, to: PathBuf },
}

/// Watch event
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub timestamp: Instant,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            timestamp: Instant::now(),
        }
    }
}

/// Watch configuration
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Quiet period that closes a burst of changes
    pub debounce_duration: Duration,
    /// File extensions to watch
    pub extensions: Vec<String>,
    /// Whether to watch subdirectories
    pub recursive: bool,
    /// Ignore patterns (`*suffix`, `prefix*` or exact file name)
    pub ignore_patterns: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
            extensions: vec![SCRIPT_EXTENSION.to_string()],
            recursive: true,
            ignore_patterns: vec!["*.tmp".to_string(), "*.swp".to_string(), "*~".to_string()],
        }
    }
}

impl WatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce_duration = duration;
        self
    }

    pub fn with_extension(mut self, ext: &str) -> Self {
        self.extensions.push(ext.to_string());
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_ignore(mut self, pattern: &str) -> Self {
        self.ignore_patterns.push(pattern.to_string());
        self
    }

    /// Check if a path should be watched
    pub fn should_watch(&self, path: &Path) -> bool {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if file_name.is_empty() || file_name.starts_with('.') {
            return false;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !self.extensions.is_empty() && !self.extensions.iter().any(|e| e == ext) {
            return false;
        }

        for pattern in &self.ignore_patterns {
            if let Some(suffix) = pattern.strip_prefix('*') {
                if file_name.ends_with(suffix) {
                    return false;
                }
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                if file_name.starts_with(prefix) {
                    return false;
                }
            } else if file_name == pattern {
                return false;
            }
        }

        true
    }

    /// Translate one notify event into watch events
    fn translate(&self, event: Event, rename_from: &mut Option<PathBuf>) -> Vec<WatchEvent> {
        let mut out = Vec::new();
        for path in event.paths {
            // a removed directory has no extension to filter on
            let relevant = self.should_watch(&path)
                || (matches!(event.kind, EventKind::Remove(_)) && path.extension().is_none());
            if !relevant {
                continue;
            }

            let kind = match event.kind {
                EventKind::Create(_) => Some(WatchEventKind::Created),
                EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                    *rename_from = Some(path.clone());
                    None
                }
                EventKind::Modify(ModifyKind::Name(RenameMode::To)) => match rename_from.take() {
                    Some(from) => Some(WatchEventKind::Renamed {
                        from,
                        to: path.clone(),
                    }),
                    None => Some(WatchEventKind::Created),
                },
                EventKind::Modify(_) => Some(WatchEventKind::Modified),
                EventKind::Remove(_) => Some(WatchEventKind::Removed),
                _ => None,
            };
            if let Some(kind) = kind {
                out.push(WatchEvent::new(kind, path));
            }
        }
        out
    }
}

/// Plugin file watcher
pub struct PluginWatcher {
    config: WatchConfig,
    event_tx: mpsc::Sender<WatchEvent>,
    event_rx: Option<mpsc::Receiver<WatchEvent>>,
    watcher: Option<RecommendedWatcher>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl PluginWatcher {
    pub fn new(config: WatchConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1024);

        Self {
            config,
            event_tx,
            event_rx: Some(event_rx),
            watcher: None,
            shutdown_tx: None,
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<WatchEvent>> {
        self.event_rx.take()
    }

    /// Start watching `root` for changes
    pub fn start(&mut self, root: &Path) -> Result<(), notify::Error> {
        info!("Starting plugin watcher on {:?}", root);

        let event_tx = self.event_tx.clone();
        let config = self.config.clone();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let (tx, mut rx) = mpsc::channel(1024);
        let watcher_config = Config::default().with_poll_interval(Duration::from_millis(100));

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = tx.blocking_send(event);
                }
                Err(e) => warn!("watch error: {}", e),
            },
            watcher_config,
        )?;

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(root, mode)?;
        self.watcher = Some(watcher);

        tokio::spawn(async move {
            let mut rename_from: Option<PathBuf> = None;

            loop {
                tokio::select! {
                    Some(event) = rx.recv() => {
                        for evt in config.translate(event, &mut rename_from) {
                            debug!("Watch event: {:?}", evt);
                            if event_tx.send(evt).await.is_err() {
                                debug!("watch event receiver dropped");
                                return;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Plugin watcher shutting down");
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop watching
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        self.watcher = None;
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }
}
