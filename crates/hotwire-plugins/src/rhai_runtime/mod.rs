//! Rhai script plugins
//!
//! Script API:
//! - `fn register(r)`: `r.plugin(name)` / `r.plugin(name, priority)` returns a
//!   handle with `handle(pattern, config)` and `web_page(page)`
//! - handlers `fn name(event)`; return `continue_chain()` to let the next
//!   matched handler run, anything else stops the chain
//! - optional `fn cleanup()`, called when the file is unloaded or replaced
//! - host helpers `log`, `warn`, `error`, `print`, `sleep_ms`, `now_ms`,
//!   `to_json`, `from_json`

mod backend;
mod event;
mod registrar;

pub use backend::{RhaiBackend, RhaiPluginUnit, SCRIPT_EXTENSION};
pub use event::{ChainSignal, ScriptEvent};
pub use registrar::{ScriptPluginHandle, ScriptRegistrar};
