//! Plugin host
//!
//! Wires registry, loader, dispatcher, isolator, reclaimer and the optional
//! watcher together from one [`RuntimeConfig`]. Everything is owned by the
//! host and injected into its parts.

use hotwire_kernel::config::RuntimeConfig;
use hotwire_kernel::{Event, LogSink, PluginBackend, SharedLogSink, WebRoute};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::hot_reload::{HotReloadManager, ReloadError, ReloadResult, WatchConfig};
use crate::isolator::Isolator;
use crate::loader::{LoadSummary, PluginLoader};
use crate::reclaimer::Reclaimer;
use crate::registry::{PathStatus, PluginRegistry};
use crate::rhai_runtime::RhaiBackend;
use crate::worker_pool::{PoolStats, WorkerPool};

/// Builder for [`PluginHost`]
pub struct PluginHostBuilder {
    config: RuntimeConfig,
    sink: SharedLogSink,
    backends: Vec<Arc<dyn PluginBackend>>,
}

impl PluginHostBuilder {
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = SharedLogSink::new(sink);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn PluginBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn build(self) -> PluginHost {
        let config = self.config;
        let sink = self.sink;

        let registry = Arc::new(PluginRegistry::new(config.pattern_cache_capacity));
        let reclaimer = Arc::new(Reclaimer::new(config.reclaim_grace()));

        let mut backends = self.backends;
        if backends.is_empty() {
            backends.push(Arc::new(RhaiBackend::from_limits(&config.script)));
        }
        let loader = backends.into_iter().fold(
            PluginLoader::new(
                config.plugin_root.clone(),
                registry.clone(),
                reclaimer.clone(),
                sink.clone(),
            ),
            PluginLoader::with_backend,
        );

        let pool = WorkerPool::new("hotwire-handler", config.worker_pool_size);
        let isolator = Arc::new(Isolator::new(
            pool,
            config.handler_timeout(),
            sink.clone(),
            config.error_content_limit,
        ));
        let dispatcher = Dispatcher::new(registry.clone(), isolator.clone(), sink.clone());

        PluginHost {
            config,
            registry,
            loader: Arc::new(loader),
            dispatcher,
            isolator,
            reclaimer,
            sink,
            hot_reload: Mutex::new(None),
            last_check: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }
}

/// The plugin dispatch runtime
pub struct PluginHost {
    config: RuntimeConfig,
    registry: Arc<PluginRegistry>,
    loader: Arc<PluginLoader>,
    dispatcher: Dispatcher,
    isolator: Arc<Isolator>,
    reclaimer: Arc<Reclaimer>,
    sink: SharedLogSink,
    hot_reload: Mutex<Option<HotReloadManager>>,
    last_check: Mutex<Option<Instant>>,
    running: AtomicBool,
}

impl PluginHost {
    pub fn builder(config: RuntimeConfig) -> PluginHostBuilder {
        PluginHostBuilder {
            config,
            sink: SharedLogSink::default(),
            backends: Vec::new(),
        }
    }

    pub fn new(config: RuntimeConfig) -> Self {
        Self::builder(config).build()
    }

    /// Initial scan, then the reclaimer and, if configured, the watcher.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn start(&self) -> ReloadResult<LoadSummary> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ReloadError::AlreadyRunning);
        }
        info!(root = %self.loader.root().display(), "starting plugin host");

        let summary = self.rescan().await;
        *self.last_check.lock() = Some(Instant::now());
        self.reclaimer.spawn(self.config.reclaim_interval());

        if self.config.watch {
            let config = WatchConfig::default().with_debounce(self.config.watch_debounce());
            let mut manager = HotReloadManager::new(self.loader.clone(), config);
            if let Err(e) = manager.start() {
                error!("file watcher unavailable: {}", e);
                self.sink
                    .error("file watcher unavailable, relying on rescans", &e.to_string());
            } else {
                *self.hot_reload.lock() = Some(manager);
            }
        }

        self.sink.framework(&format!(
            "plugin host started: {} plugin file(s), {} handler(s)",
            self.registry.paths().len(),
            self.registry.binding_count()
        ));
        Ok(summary)
    }

    /// Stop background tasks and the worker pool. Safe to call repeatedly.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(mut manager) = self.hot_reload.lock().take() {
            manager.stop();
        }
        self.reclaimer.stop();
        self.isolator.pool().shutdown();
        info!("plugin host stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Dispatch one event; `true` when a permitted handler matched.
    pub async fn dispatch(&self, event: Arc<dyn Event>) -> bool {
        self.quick_check().await;
        self.dispatcher.dispatch(event).await
    }

    pub async fn dispatch_detailed(&self, event: Arc<dyn Event>) -> DispatchReport {
        self.quick_check().await;
        self.dispatcher.dispatch_detailed(event).await
    }

    /// Throttled rescan ahead of a dispatch
    async fn quick_check(&self) {
        if !self.config.rescan_on_dispatch {
            return;
        }
        {
            let mut last = self.last_check.lock();
            let interval = self.config.quick_check_interval();
            if last.is_some_and(|at| at.elapsed() < interval) {
                return;
            }
            *last = Some(Instant::now());
        }
        let summary = self.rescan().await;
        if !summary.is_empty() {
            debug!("rescan before dispatch changed the registry");
        }
    }

    /// Full scan of the plugin root off the async executor
    pub async fn rescan(&self) -> LoadSummary {
        let loader = self.loader.clone();
        match tokio::task::spawn_blocking(move || loader.load_all()).await {
            Ok(summary) => summary,
            Err(e) => {
                error!("plugin scan task failed: {}", e);
                self.sink.error("plugin scan task failed", &e.to_string());
                LoadSummary::default()
            }
        }
    }

    /// Blocking full scan of the plugin root
    pub fn load_all(&self) -> LoadSummary {
        self.loader.load_all()
    }

    /// Reload one plugin file regardless of its modification time
    pub fn reload_plugin(&self, path: &Path) -> bool {
        self.loader.reload(path)
    }

    /// Unload one plugin file. Returns the number of bindings removed.
    pub fn unload_plugin(&self, path: &Path) -> usize {
        self.loader.unload(path)
    }

    /// `path → status` for the dashboard
    pub fn status(&self) -> BTreeMap<PathBuf, PathStatus> {
        self.registry.status()
    }

    /// Dashboard pages declared by active plugins
    pub fn web_routes(&self) -> Vec<WebRoute> {
        self.registry.web_routes()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.isolator.pool().stats()
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn loader(&self) -> &Arc<PluginLoader> {
        &self.loader
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn reclaimer(&self) -> &Arc<Reclaimer> {
        &self.reclaimer
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotwire_kernel::{MemoryLogSink, MessageEvent};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const PING: &str = r#"
        fn register(r) { r.plugin("Ping").handle("^ping$", "ping"); }
        fn ping(event) { event.reply("pong"); }
    "#;

    fn host(dir: &TempDir, tweak: impl FnOnce(&mut RuntimeConfig)) -> (PluginHost, Arc<MemoryLogSink>) {
        let mut config = RuntimeConfig::default().with_plugin_root(dir.path().join("plugins"));
        tweak(&mut config);
        let logs = Arc::new(MemoryLogSink::default());
        let host = PluginHost::builder(config).sink(logs.clone()).build();
        (host, logs)
    }

    #[tokio::test]
    async fn start_loads_and_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("plugins/base")).unwrap();
        fs::write(dir.path().join("plugins/base/ping.rhai"), PING).unwrap();
        let (host, logs) = host(&dir, |_| {});

        let summary = host.start().await.unwrap();
        assert_eq!(summary.loaded.len(), 1);
        assert!(matches!(host.start().await, Err(ReloadError::AlreadyRunning)));
        assert!(logs
            .framework_logs()
            .iter()
            .any(|l| l.starts_with("plugin host started: 1 plugin file(s), 1 handler(s)")));

        let event = Arc::new(MessageEvent::new("ping"));
        assert!(host.dispatch(event.clone()).await);
        assert_eq!(event.reply_texts(), ["pong"]);

        host.stop();
        host.stop();
        assert!(!host.is_running());
    }

    #[tokio::test]
    async fn dispatch_rescans_after_quick_check_interval() {
        let dir = TempDir::new().unwrap();
        let (host, _) = host(&dir, |c| c.quick_check_interval_ms = 0);
        host.start().await.unwrap();
        assert!(!host.dispatch(Arc::new(MessageEvent::new("ping"))).await);

        fs::create_dir_all(dir.path().join("plugins/base")).unwrap();
        fs::write(dir.path().join("plugins/base/ping.rhai"), PING).unwrap();
        assert!(host.dispatch(Arc::new(MessageEvent::new("ping"))).await);
        host.stop();
    }

    #[tokio::test]
    async fn rescan_is_throttled() {
        let dir = TempDir::new().unwrap();
        let (host, _) = host(&dir, |c| c.quick_check_interval_ms = 60_000);
        host.start().await.unwrap();

        fs::create_dir_all(dir.path().join("plugins/base")).unwrap();
        fs::write(dir.path().join("plugins/base/ping.rhai"), PING).unwrap();
        assert!(!host.dispatch(Arc::new(MessageEvent::new("ping"))).await);

        host.load_all();
        assert!(host.dispatch(Arc::new(MessageEvent::new("ping"))).await);
        host.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn watcher_picks_up_new_files() {
        let dir = TempDir::new().unwrap();
        let (host, _) = host(&dir, |c| {
            c.watch = true;
            c.watch_debounce_ms = 50;
            c.rescan_on_dispatch = false;
        });
        fs::create_dir_all(dir.path().join("plugins/base")).unwrap();
        host.start().await.unwrap();

        fs::write(dir.path().join("plugins/base/ping.rhai"), PING).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while host.registry().binding_count() == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(host.registry().binding_count(), 1);
        host.stop();
    }
}
