//! CLI context: resolved configuration plus a host built from it

use hotwire_kernel::config::{RuntimeConfig, load_with_env};
use hotwire_plugins::PluginHost;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::output::ConsoleLogSink;

/// Prefix of environment overrides, e.g. `HOTWIRE_HANDLER_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "HOTWIRE";

/// Shared context for CLI commands
pub struct CliContext {
    pub config: RuntimeConfig,
    pub show_logs: bool,
}

impl CliContext {
    pub fn new(
        config_path: Option<&Path>,
        plugin_root: Option<PathBuf>,
        show_logs: bool,
    ) -> anyhow::Result<Self> {
        let mut config = match config_path {
            Some(path) => load_with_env::<RuntimeConfig>(path, ENV_PREFIX)
                .map_err(|e| anyhow::anyhow!("cannot load {}: {}", path.display(), e))?,
            None => RuntimeConfig::default(),
        };
        if let Some(root) = plugin_root {
            config.plugin_root = root;
        }
        tracing::debug!(root = %config.plugin_root.display(), "configuration resolved");
        Ok(Self { config, show_logs })
    }

    /// Build a host. One-shot commands scan explicitly, so dispatch-time
    /// rescans and the watcher are left to `run`.
    pub fn host(&self, config: RuntimeConfig) -> PluginHost {
        let builder = PluginHost::builder(config);
        if self.show_logs {
            builder.sink(Arc::new(ConsoleLogSink)).build()
        } else {
            builder.build()
        }
    }

    pub fn one_shot_host(&self) -> PluginHost {
        let mut config = self.config.clone();
        config.rescan_on_dispatch = false;
        config.watch = false;
        self.host(config)
    }

    pub fn is_owner(&self, user: &str) -> bool {
        self.config.is_owner(user)
    }
}
