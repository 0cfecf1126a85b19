//! Typed errors for the plugin boundary.
//!
//! The variants follow the failure taxonomy of the dispatch runtime: file
//! level load failures, per-binding registration failures, handler execution
//! failures and timeouts, and failures of the dispatch machinery itself.

use error_stack::Report;
use std::time::Duration;
use thiserror::Error;

/// Result alias carrying an [`error_stack::Report`] for context-rich
/// propagation through the loader.
pub type PluginReport<T> = ::std::result::Result<T, Report<PluginError>>;

/// Extension trait to convert `Result<T, PluginError>` into [`PluginReport<T>`].
pub trait IntoPluginReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> PluginReport<T>;
}

impl<T> IntoPluginReport<T> for ::std::result::Result<T, PluginError> {
    #[inline]
    fn into_report(self) -> PluginReport<T> {
        self.map_err(Report::new)
    }
}

/// Errors raised at the plugin boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// A source unit could not be read, compiled or executed at load time.
    #[error("Plugin load failed: {0}")]
    Load(String),

    /// A single handler binding was rejected; siblings are unaffected.
    #[error("Registration of pattern '{pattern}' rejected: {reason}")]
    Registration {
        /// Pattern text as declared by the plugin.
        pattern: String,
        /// Why the binding was dropped.
        reason: String,
    },

    /// A handler raised an error while running.
    #[error("Handler execution failed: {0}")]
    Execution(String),

    /// A handler exceeded its time budget.
    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    /// The dispatch machinery itself failed.
    #[error("Dispatch failure: {0}")]
    Dispatch(String),

    /// An I/O error surfaced during a plugin operation.
    #[error("Plugin I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all.
    #[error("{0}")]
    Other(String),
}

/// Plugin result alias using the typed [`PluginError`].
pub type PluginResult<T> = Result<T, PluginError>;
