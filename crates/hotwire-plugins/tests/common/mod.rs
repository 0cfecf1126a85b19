//! Shared fixtures for `hotwire-plugins` integration tests.
//!
//! Declared with `mod common;` inside each test file that needs it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hotwire_kernel::config::RuntimeConfig;
use hotwire_kernel::{CallerContext, MemoryLogSink, MessageEvent};
use hotwire_plugins::PluginHost;
use tempfile::TempDir;

/// A plugin root in a temporary directory plus a host over it.
///
/// Dispatch-time rescans are off; tests call `load_all` explicitly.
pub struct Sandbox {
    pub dir: TempDir,
    pub host: PluginHost,
    pub logs: Arc<MemoryLogSink>,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut RuntimeConfig)) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let mut config = RuntimeConfig::default().with_plugin_root(dir.path().join("plugins"));
        config.rescan_on_dispatch = false;
        tweak(&mut config);

        let logs = Arc::new(MemoryLogSink::default());
        let host = PluginHost::builder(config).sink(logs.clone()).build();
        fs::create_dir_all(host.loader().root()).expect("plugin root");
        Self { dir, host, logs }
    }

    pub fn root(&self) -> &Path {
        self.host.loader().root()
    }

    /// Write `<root>/<rel>`; an existing file gets a later mtime so the
    /// loader sees the change even within one timestamp tick.
    pub fn write(&self, rel: &str, source: &str) -> PathBuf {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("plugin dir");
        let previous = fs::metadata(&path).and_then(|m| m.modified()).ok();
        fs::write(&path, source).expect("write plugin");
        if let Some(previous) = previous {
            let file = fs::File::options().write(true).open(&path).expect("open");
            file.set_modified(previous + Duration::from_secs(1))
                .expect("set mtime");
        }
        path
    }
}

pub fn direct(content: &str, owner: bool) -> Arc<MessageEvent> {
    Arc::new(
        MessageEvent::new(content)
            .with_caller(CallerContext::direct("user-1"))
            .with_owner(owner),
    )
}

pub fn in_group(content: &str) -> Arc<MessageEvent> {
    Arc::new(MessageEvent::new(content).with_caller(CallerContext::group("user-2", "group-7")))
}
