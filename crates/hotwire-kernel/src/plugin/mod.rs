use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::event::Event;

pub mod error;
pub use error::{IntoPluginReport, PluginError, PluginReport, PluginResult};

/// 默认插件优先级
/// Priority assigned to a plugin that does not declare one
pub const DEFAULT_PRIORITY: i64 = 10;

/// 默认页面路由优先级
/// Ordering weight of a dashboard page that does not declare one
pub const DEFAULT_ROUTE_PRIORITY: i64 = 100;

// ============================================================================
// 插件边界 (Plugin boundary)
// ============================================================================

/// 已加载的插件源单元
/// A loaded plugin source unit
///
/// A unit is produced by a [`PluginBackend`] from one file. It declares its
/// plugins through [`PluginUnit::register`] and executes handlers by name.
/// Units are shared between the registry, in-flight worker calls and the
/// reclaimer, so every method takes `&self`.
pub trait PluginUnit: Send + Sync {
    /// 源文件路径
    /// Path of the file this unit was loaded from
    fn source(&self) -> &Path;

    /// 向注册器声明插件
    /// Declare this unit's plugins against the provided registrar
    fn register(&self, registrar: &mut dyn Registrar) -> PluginResult<()>;

    /// 是否定义了指定处理函数
    /// Whether the unit defines a handler with this name
    fn has_handler(&self, name: &str) -> bool;

    /// 执行处理函数
    /// Run one handler call to completion on the current thread
    fn invoke(&self, call: HandlerCall) -> PluginResult<HandlerReturn>;

    /// 释放资源
    /// Release unit resources; called once when the unit is unloaded or replaced
    fn cleanup(&self) {}
}

/// 插件加载后端
/// Turns files into [`PluginUnit`]s
pub trait PluginBackend: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Whether this backend accepts the given file
    fn handles(&self, path: &Path) -> bool;

    /// Read, compile and execute the unit's top level
    fn load(&self, path: &Path) -> PluginResult<Arc<dyn PluginUnit>>;
}

/// 插件注册器
/// Receives plugin declarations while a unit registers itself
pub trait Registrar {
    fn declare(&mut self, declaration: PluginDeclaration);
}

impl Registrar for Vec<PluginDeclaration> {
    fn declare(&mut self, declaration: PluginDeclaration) {
        self.push(declaration);
    }
}

// ============================================================================
// 插件声明 (Plugin declarations)
// ============================================================================

/// 单个插件对象的声明
/// Declaration of one plugin object exported by a unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginDeclaration {
    /// Exported symbol name, unique within its source file
    pub name: String,
    /// Lower runs earlier
    #[serde(default = "default_priority")]
    pub priority: i64,
    /// Pattern to handler configuration, in declaration order
    #[serde(default)]
    pub handlers: Vec<HandlerDeclaration>,
    /// Raw dashboard page declarations
    #[serde(default)]
    pub web_pages: Vec<serde_json::Value>,
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

impl PluginDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            handlers: Vec::new(),
            web_pages: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Bind a pattern to a handler configuration value
    pub fn with_handler(mut self, pattern: impl Into<String>, config: serde_json::Value) -> Self {
        self.handlers.push(HandlerDeclaration {
            pattern: pattern.into(),
            config,
        });
        self
    }

    pub fn with_web_page(mut self, page: serde_json::Value) -> Self {
        self.web_pages.push(page);
        self
    }
}

/// Pattern text paired with its still unvalidated handler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerDeclaration {
    pub pattern: String,
    pub config: serde_json::Value,
}

/// 处理函数配置
/// Handler configuration: a bare handler name or a record with permission flags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HandlerConfig {
    Name(String),
    Record {
        handler: String,
        #[serde(default)]
        owner_only: bool,
        #[serde(default)]
        group_only: bool,
    },
}

impl HandlerConfig {
    /// Validate a raw configuration value
    pub fn parse(pattern: &str, value: &serde_json::Value) -> PluginResult<Self> {
        let config: HandlerConfig =
            serde_json::from_value(value.clone()).map_err(|e| PluginError::Registration {
                pattern: pattern.to_string(),
                reason: format!("malformed handler config {value}: {e}"),
            })?;

        if config.handler().trim().is_empty() {
            return Err(PluginError::Registration {
                pattern: pattern.to_string(),
                reason: "empty handler name".to_string(),
            });
        }
        Ok(config)
    }

    pub fn handler(&self) -> &str {
        match self {
            HandlerConfig::Name(name) => name,
            HandlerConfig::Record { handler, .. } => handler,
        }
    }

    pub fn permissions(&self) -> Permissions {
        match self {
            HandlerConfig::Name(_) => Permissions::default(),
            HandlerConfig::Record {
                owner_only,
                group_only,
                ..
            } => Permissions {
                owner_only: *owner_only,
                group_only: *group_only,
            },
        }
    }
}

// ============================================================================
// 权限 (Permissions)
// ============================================================================

/// Permission predicate attached to a handler binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub owner_only: bool,
    pub group_only: bool,
}

impl Permissions {
    /// Owner is checked before group, so an owner-only handler denied in a
    /// direct chat reports [`Denial::OwnerOnly`].
    pub fn check(&self, is_owner: bool, is_group: bool) -> Result<(), Denial> {
        if self.owner_only && !is_owner {
            return Err(Denial::OwnerOnly);
        }
        if self.group_only && !is_group {
            return Err(Denial::GroupOnly);
        }
        Ok(())
    }
}

/// 权限拒绝原因
/// Why a textually matching binding was not executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Denial {
    OwnerOnly,
    GroupOnly,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::OwnerOnly => write!(f, "owner only"),
            Denial::GroupOnly => write!(f, "group chats only"),
        }
    }
}

// ============================================================================
// 处理函数调用与结果 (Handler calls and outcomes)
// ============================================================================

/// One handler invocation handed to [`PluginUnit::invoke`]
pub struct HandlerCall {
    /// Exported plugin symbol the handler belongs to
    pub plugin: String,
    /// Handler function name
    pub handler: String,
    /// Capture groups of this binding's own match; unmatched optional groups are `None`
    pub captures: Vec<Option<String>>,
    /// The event, with its reply capability possibly wrapped for logging
    pub event: Arc<dyn Event>,
}

impl fmt::Debug for HandlerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCall")
            .field("plugin", &self.plugin)
            .field("handler", &self.handler)
            .field("captures", &self.captures)
            .finish_non_exhaustive()
    }
}

/// What a handler returned
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerReturn {
    /// The continue sentinel: let the next matched handler run
    Continue,
    /// Any other value, including "nothing"; halts the chain
    Value(serde_json::Value),
}

/// 处理函数执行结果
/// Outcome of one isolated handler call
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Continue,
    Stop(Result<serde_json::Value, HandlerFailure>),
}

impl HandlerOutcome {
    pub fn is_continue(&self) -> bool {
        matches!(self, HandlerOutcome::Continue)
    }
}

impl From<HandlerReturn> for HandlerOutcome {
    fn from(value: HandlerReturn) -> Self {
        match value {
            HandlerReturn::Continue => HandlerOutcome::Continue,
            HandlerReturn::Value(v) => HandlerOutcome::Stop(Ok(v)),
        }
    }
}

/// Why a handler call stopped the chain without a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerFailure {
    /// The handler returned an error
    Error(String),
    /// The handler panicked on its worker
    Panicked(String),
    /// The handler exceeded its timeout and was abandoned
    TimedOut(Duration),
    /// The unit was already reclaimed or the pool refused the call
    Unavailable(String),
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerFailure::Error(e) => write!(f, "error: {e}"),
            HandlerFailure::Panicked(e) => write!(f, "panicked: {e}"),
            HandlerFailure::TimedOut(d) => write!(f, "timed out after {d:?}"),
            HandlerFailure::Unavailable(e) => write!(f, "unavailable: {e}"),
        }
    }
}

// ============================================================================
// 插件状态 (Plugin state)
// ============================================================================

/// 插件描述符生命周期状态
/// Lifecycle state of a plugin descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginState {
    /// Bindings are published and dispatchable
    Active,
    /// Its file changed or disappeared; bindings are being purged
    Unloading,
    /// Bindings purged and code queued for reclamation
    Removed,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Active => write!(f, "active"),
            PluginState::Unloading => write!(f, "unloading"),
            PluginState::Removed => write!(f, "removed"),
        }
    }
}

// ============================================================================
// 页面路由 (Dashboard page routes)
// ============================================================================

/// A dashboard page declared by a plugin. Unrelated to message dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebRoute {
    pub path: String,
    #[serde(default)]
    pub menu_name: String,
    #[serde(default = "default_menu_icon")]
    pub menu_icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_page_handler")]
    pub handler: String,
    #[serde(default = "default_route_priority")]
    pub priority: i64,
    #[serde(default)]
    pub api_routes: serde_json::Value,
    /// Exported plugin symbol that declared the page
    #[serde(default)]
    pub plugin: String,
}

fn default_menu_icon() -> String {
    "bi-puzzle".to_string()
}

fn default_page_handler() -> String {
    "render_page".to_string()
}

fn default_route_priority() -> i64 {
    DEFAULT_ROUTE_PRIORITY
}

impl WebRoute {
    /// Parse a raw page declaration: either a path string or a map.
    pub fn from_declaration(plugin: &str, value: &serde_json::Value) -> PluginResult<Self> {
        let mut route: WebRoute = match value {
            serde_json::Value::String(path) => {
                serde_json::from_value(serde_json::json!({ "path": path }))?
            }
            other => serde_json::from_value(other.clone())?,
        };
        if route.path.trim().is_empty() {
            return Err(PluginError::Other(format!(
                "page declared by {plugin} has an empty path"
            )));
        }
        if route.menu_name.is_empty() {
            route.menu_name = route.path.clone();
        }
        route.plugin = plugin.to_string();
        Ok(route)
    }
}
