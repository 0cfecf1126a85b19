//! Downstream log collaborators.
//!
//! The dispatch core reports through three fire-and-forget sinks. Sinks are
//! best-effort: [`SharedLogSink`] contains panics raised by a sink so that a
//! broken collaborator never affects loading or dispatch.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{error, info};

use crate::event::CallerContext;

/// Log collaborator interface
pub trait LogSink: Send + Sync {
    /// Loader and lifecycle messages
    fn add_framework_log(&self, text: &str);

    /// Failures, with a rendered detail such as a report or panic message
    fn add_error_log(&self, text: &str, detail: &str);

    /// Mirrors one reply a plugin sent
    fn add_plugin_log(&self, text: &str, caller: &CallerContext, plugin_name: &str);
}

/// Sink that forwards everything to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn add_framework_log(&self, text: &str) {
        info!(target: "hotwire::framework", "{}", text);
    }

    fn add_error_log(&self, text: &str, detail: &str) {
        error!(target: "hotwire::error", detail = %detail, "{}", text);
    }

    fn add_plugin_log(&self, text: &str, caller: &CallerContext, plugin_name: &str) {
        info!(
            target: "hotwire::plugin",
            plugin = plugin_name,
            user = %caller.user_id,
            chat = caller.chat(),
            "{}",
            text
        );
    }
}

/// A record captured by [`MemoryLogSink`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    Framework {
        text: String,
    },
    Error {
        text: String,
        detail: String,
    },
    Plugin {
        text: String,
        caller: CallerContext,
        plugin: String,
    },
}

/// Bounded in-memory sink; the oldest records are dropped first.
#[derive(Debug)]
pub struct MemoryLogSink {
    capacity: usize,
    records: Mutex<VecDeque<LogRecord>>,
}

impl MemoryLogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, record: LogRecord) {
        let mut records = self.records.lock();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn framework_logs(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                LogRecord::Framework { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(text, detail)` pairs
    pub fn error_logs(&self) -> Vec<(String, String)> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                LogRecord::Error { text, detail } => Some((text.clone(), detail.clone())),
                _ => None,
            })
            .collect()
    }

    /// `(text, plugin)` pairs
    pub fn plugin_logs(&self) -> Vec<(String, String)> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                LogRecord::Plugin { text, plugin, .. } => Some((text.clone(), plugin.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Default for MemoryLogSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl LogSink for MemoryLogSink {
    fn add_framework_log(&self, text: &str) {
        self.push(LogRecord::Framework {
            text: text.to_string(),
        });
    }

    fn add_error_log(&self, text: &str, detail: &str) {
        self.push(LogRecord::Error {
            text: text.to_string(),
            detail: detail.to_string(),
        });
    }

    fn add_plugin_log(&self, text: &str, caller: &CallerContext, plugin_name: &str) {
        self.push(LogRecord::Plugin {
            text: text.to_string(),
            caller: caller.clone(),
            plugin: plugin_name.to_string(),
        });
    }
}

/// Cloneable handle used by the core to reach its sink.
#[derive(Clone)]
pub struct SharedLogSink {
    inner: Arc<dyn LogSink>,
}

impl SharedLogSink {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { inner: sink }
    }

    pub fn framework(&self, text: &str) {
        self.guarded(|sink| sink.add_framework_log(text));
    }

    pub fn error(&self, text: &str, detail: &str) {
        self.guarded(|sink| sink.add_error_log(text, detail));
    }

    pub fn plugin(&self, text: &str, caller: &CallerContext, plugin_name: &str) {
        self.guarded(|sink| sink.add_plugin_log(text, caller, plugin_name));
    }

    fn guarded(&self, f: impl FnOnce(&dyn LogSink)) {
        let sink = self.inner.as_ref();
        if catch_unwind(AssertUnwindSafe(|| f(sink))).is_err() {
            error!("log sink panicked; record dropped");
        }
    }
}

impl Default for SharedLogSink {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogSink))
    }
}

impl std::fmt::Debug for SharedLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedLogSink")
    }
}
