//! Plugin dispatch runtime:
//! - hot-reloaded plugin files under a plugin root
//! - priority-ordered, pattern-based handler bindings
//! - chain execution on a bounded worker pool with a hard timeout
//! - deferred reclamation of replaced plugin code

pub mod dispatcher;
pub mod hot_reload;
pub mod host;
pub mod index;
pub mod isolator;
pub mod loader;
pub mod pattern;
pub mod reclaimer;
pub mod registry;
pub mod rhai_runtime;
pub mod worker_pool;

#[cfg(test)]
mod testing;

pub use dispatcher::{Candidates, DeniedMatch, DispatchReport, Dispatcher, ExecutedStep};
pub use host::{PluginHost, PluginHostBuilder};
pub use index::{CompiledIndex, HandlerBinding, PluginDescriptor};
pub use isolator::Isolator;
pub use loader::{LoadSummary, PluginLoader};
pub use pattern::PatternCache;
pub use reclaimer::Reclaimer;
pub use registry::{InstallOutcome, PathStatus, PluginRegistry, PluginSummary};
pub use rhai_runtime::RhaiBackend;
pub use worker_pool::{PoolError, PoolStats, WorkerPool};

pub use hotwire_kernel::{
    CallerContext, Event, HandlerOutcome, LogSink, MemoryLogSink, MessageEvent, PluginError,
    PluginState, ReplyPayload, SharedLogSink,
};
