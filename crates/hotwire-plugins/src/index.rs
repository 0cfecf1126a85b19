//! Descriptors, bindings and the published binding index.

use hotwire_kernel::{Denial, PluginState, PluginUnit, Permissions};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::pattern::capture_groups;

/// One plugin object exported by a loaded file.
///
/// Identity is `path` + `symbol`. The descriptor keeps the unit alive until
/// the reclaimer releases it, so calls already in flight can finish against
/// the code they started with.
pub struct PluginDescriptor {
    pub path: PathBuf,
    pub symbol: String,
    pub priority: i64,
    /// Registry generation that created this descriptor
    pub generation: u64,
    state: RwLock<PluginState>,
    unit: Mutex<Option<Arc<dyn PluginUnit>>>,
}

impl PluginDescriptor {
    pub fn new(
        path: impl Into<PathBuf>,
        symbol: impl Into<String>,
        priority: i64,
        generation: u64,
        unit: Arc<dyn PluginUnit>,
    ) -> Self {
        Self {
            path: path.into(),
            symbol: symbol.into(),
            priority,
            generation,
            state: RwLock::new(PluginState::Active),
            unit: Mutex::new(Some(unit)),
        }
    }

    pub fn state(&self) -> PluginState {
        *self.state.read()
    }

    pub fn set_state(&self, state: PluginState) {
        *self.state.write() = state;
    }

    /// The unit, unless it has been reclaimed
    pub fn unit(&self) -> Option<Arc<dyn PluginUnit>> {
        self.unit.lock().clone()
    }

    /// Drop this descriptor's reference to its unit.
    pub fn release(&self) -> Option<Arc<dyn PluginUnit>> {
        self.unit.lock().take()
    }

    pub fn is_released(&self) -> bool {
        self.unit.lock().is_none()
    }

    /// `dir/file.rhai:Symbol`, relative to the file's parent directory
    pub fn id(&self) -> String {
        format!("{}:{}", display_path(&self.path), self.symbol)
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("path", &self.path)
            .field("symbol", &self.symbol)
            .field("priority", &self.priority)
            .field("generation", &self.generation)
            .field("state", &self.state())
            .finish()
    }
}

/// `subdir/file` form of a plugin path, used in log lines.
pub fn display_path(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.parent().and_then(Path::file_name) {
        Some(dir) => format!("{}/{}", dir.to_string_lossy(), file),
        None => file,
    }
}

/// A compiled pattern bound to a handler of one plugin.
pub struct HandlerBinding {
    /// Anchored pattern text
    pub pattern: String,
    /// Pattern as declared
    pub declared_pattern: String,
    pub matcher: Arc<Regex>,
    pub handler: String,
    pub permissions: Permissions,
    pub plugin: Arc<PluginDescriptor>,
    /// Global registration order, used to break priority ties
    pub order: u64,
}

impl HandlerBinding {
    pub fn priority(&self) -> i64 {
        self.plugin.priority
    }

    /// Search `content` and return the capture groups on a match
    pub fn match_content(&self, content: &str) -> Option<Vec<Option<String>>> {
        self.matcher
            .captures(content)
            .map(|caps| capture_groups(&caps))
    }

    pub fn check(&self, is_owner: bool, is_group: bool) -> Result<(), Denial> {
        self.permissions.check(is_owner, is_group)
    }

    pub fn sort_key(&self) -> (i64, u64) {
        (self.priority(), self.order)
    }
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("pattern", &self.pattern)
            .field("handler", &self.handler)
            .field("plugin", &self.plugin.id())
            .field("priority", &self.priority())
            .field("order", &self.order)
            .finish()
    }
}

/// Immutable, ordered view of every active binding.
///
/// Sorted by `(priority, registration order)`. A new index is built and
/// published for every registry change; readers hold one generation for the
/// whole of a dispatch call.
#[derive(Debug, Default)]
pub struct CompiledIndex {
    pub generation: u64,
    bindings: Vec<Arc<HandlerBinding>>,
}

impl CompiledIndex {
    pub fn new(generation: u64, mut bindings: Vec<Arc<HandlerBinding>>) -> Self {
        bindings.sort_by_key(|b| b.sort_key());
        Self {
            generation,
            bindings,
        }
    }

    pub fn bindings(&self) -> &[Arc<HandlerBinding>] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<HandlerBinding>> {
        self.bindings.iter()
    }
}
