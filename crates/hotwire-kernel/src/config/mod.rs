//! Runtime configuration
//!
//! Loads [`RuntimeConfig`] (or any deserializable type) from YAML, TOML, JSON,
//! INI, RON or JSON5 files. The format is detected from the file extension and
//! `${VAR}` / `$VAR` references are replaced with environment values before
//! parsing. Every [`RuntimeConfig`] field has a default, so an empty file is a
//! valid configuration.

use config::{Config as Cfg, Environment, File, FileFormat};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// literal patterns
static BRACED_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("braced env var pattern")
});
static BARE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("bare env var pattern")
});

/// Detect configuration format from file extension
///
/// `.yaml`/`.yml`, `.toml`, `.json`, `.ini`, `.ron` and `.json5` are accepted.
pub fn detect_format(path: impl AsRef<Path>) -> ConfigResult<FileFormat> {
    let ext = path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute environment variables in a string
///
/// Braced references are resolved first. Unknown variables are left as written.
pub fn substitute_env_vars(content: &str) -> String {
    let braced = BRACED_VAR.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });
    BARE_VAR
        .replace_all(&braced, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

fn build<T: DeserializeOwned>(builder: config::ConfigBuilder<config::builder::DefaultState>) -> ConfigResult<T> {
    builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load configuration from a file
pub fn load_config<T>(path: impl AsRef<Path>) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    from_str(&content, format)
}

/// Load configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted = substitute_env_vars(content);
    build(Cfg::builder().add_source(File::from_str(&substituted, format)))
}

/// Load configuration with environment variable overrides
///
/// Variables are prefixed with `env_prefix` and use `__` for nesting, e.g.
/// `HOTWIRE_SCRIPT__MAX_OPERATIONS`.
pub fn load_with_env<T>(path: impl AsRef<Path>, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&content);

    build(
        Cfg::builder()
            .add_source(File::from_str(&substituted, format))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            ),
    )
}

// ============================================================================
// Runtime configuration
// ============================================================================

/// Settings of the dispatch runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Root directory whose subdirectories hold plugin files
    pub plugin_root: PathBuf,
    /// Hard per-call handler timeout
    pub handler_timeout_ms: u64,
    /// Maximum number of handler worker threads
    pub worker_pool_size: usize,
    /// Interval between reclaimer sweeps
    pub reclaim_interval_secs: u64,
    /// Minimum time a replaced descriptor stays queued before it is cleared
    pub reclaim_grace_secs: u64,
    /// Pattern cache bound; the cache is cleared once it is exceeded
    pub pattern_cache_capacity: usize,
    /// Minimum spacing of rescans triggered by dispatch
    pub quick_check_interval_ms: u64,
    /// Rescan the plugin root (throttled) before each dispatch
    pub rescan_on_dispatch: bool,
    /// Watch the plugin root for changes
    pub watch: bool,
    pub watch_debounce_ms: u64,
    /// Users treated as owners by the console adapter
    pub owner_ids: Vec<String>,
    /// Characters of event content kept in error reports
    pub error_content_limit: usize,
    pub script: ScriptLimits,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugin_root: PathBuf::from("plugins"),
            handler_timeout_ms: 3_000,
            worker_pool_size: 300,
            reclaim_interval_secs: 30,
            reclaim_grace_secs: 0,
            pattern_cache_capacity: 200,
            quick_check_interval_ms: 2_000,
            rescan_on_dispatch: true,
            watch: false,
            watch_debounce_ms: 500,
            owner_ids: Vec::new(),
            error_content_limit: 500,
            script: ScriptLimits::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_plugin_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.plugin_root = root.into();
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs.max(1))
    }

    pub fn reclaim_grace(&self) -> Duration {
        Duration::from_secs(self.reclaim_grace_secs)
    }

    pub fn quick_check_interval(&self) -> Duration {
        Duration::from_millis(self.quick_check_interval_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_ids.iter().any(|id| id == user_id)
    }
}

/// Resource limits applied to plugin scripts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_string_size: 1_000_000,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}
