//! Plugin registry
//!
//! Owns every plugin descriptor and handler binding, keyed by source path.
//! Writers are serialized behind one mutex; each change rebuilds the
//! [`CompiledIndex`] and publishes it with a single atomic pointer swap, so
//! readers never wait on a writer and never observe a partial update.

use arc_swap::ArcSwap;
use hotwire_kernel::{
    HandlerConfig, PluginDeclaration, PluginError, PluginState, PluginUnit, WebRoute,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::index::{CompiledIndex, HandlerBinding, PluginDescriptor, display_path};
use crate::pattern::{PatternCache, anchor};

/// Summary of one installed plugin object, for log lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub priority: i64,
    pub handlers: usize,
}

/// Result of [`PluginRegistry::install`]
#[derive(Debug, Default)]
pub struct InstallOutcome {
    /// Descriptors that were replaced, already marked `Unloading`
    pub replaced: Vec<Arc<PluginDescriptor>>,
    pub plugins: Vec<PluginSummary>,
    /// Bindings and pages that were dropped
    pub rejected: Vec<PluginError>,
    pub generation: u64,
}

/// Dashboard view of one tracked path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathStatus {
    pub binding_count: usize,
    /// Lowest priority among the path's plugins
    pub priority: i64,
    pub state: PluginState,
    pub plugins: Vec<String>,
    pub generation: u64,
}

struct PathEntry {
    descriptors: Vec<Arc<PluginDescriptor>>,
    bindings: Vec<Arc<HandlerBinding>>,
    routes: Vec<WebRoute>,
    generation: u64,
    installed_at: SystemTime,
}

#[derive(Default)]
struct RegistryState {
    entries: BTreeMap<PathBuf, PathEntry>,
    next_order: u64,
    generation: u64,
}

/// Authoritative store of plugins and handler bindings
pub struct PluginRegistry {
    index: ArcSwap<CompiledIndex>,
    state: Mutex<RegistryState>,
    patterns: PatternCache,
}

impl PluginRegistry {
    pub fn new(pattern_cache_capacity: usize) -> Self {
        Self {
            index: ArcSwap::from_pointee(CompiledIndex::default()),
            state: Mutex::new(RegistryState::default()),
            patterns: PatternCache::new(pattern_cache_capacity),
        }
    }

    /// Current published index
    pub fn snapshot(&self) -> Arc<CompiledIndex> {
        self.index.load_full()
    }

    pub fn pattern_cache(&self) -> &PatternCache {
        &self.patterns
    }

    /// Replace everything registered for `path` with `declarations`.
    ///
    /// Old bindings of `path` are purged and the new ones added in the same
    /// published generation. Individual bindings that fail validation are
    /// dropped and reported in [`InstallOutcome::rejected`].
    pub fn install(
        &self,
        path: &Path,
        unit: Arc<dyn PluginUnit>,
        declarations: Vec<PluginDeclaration>,
    ) -> InstallOutcome {
        let mut state = self.state.lock();
        state.generation += 1;
        let generation = state.generation;

        let mut outcome = InstallOutcome {
            generation,
            ..Default::default()
        };
        let mut descriptors = Vec::new();
        let mut bindings = Vec::new();
        let mut routes = Vec::new();

        for declaration in declarations {
            if descriptors
                .iter()
                .any(|d: &Arc<PluginDescriptor>| d.symbol == declaration.name)
            {
                outcome.rejected.push(PluginError::Other(format!(
                    "{} declares plugin '{}' more than once",
                    display_path(path),
                    declaration.name
                )));
                continue;
            }

            let descriptor = Arc::new(PluginDescriptor::new(
                path,
                declaration.name.clone(),
                declaration.priority,
                generation,
                unit.clone(),
            ));

            let specs = self.validate_handlers(unit.as_ref(), &declaration, &mut outcome.rejected);
            for (pattern, declared, config, matcher) in specs {
                state.next_order += 1;
                bindings.push(Arc::new(HandlerBinding {
                    pattern,
                    declared_pattern: declared,
                    matcher,
                    handler: config.handler().to_string(),
                    permissions: config.permissions(),
                    plugin: descriptor.clone(),
                    order: state.next_order,
                }));
            }

            for page in &declaration.web_pages {
                match WebRoute::from_declaration(&declaration.name, page) {
                    Ok(route) => routes.push(route),
                    Err(e) => outcome.rejected.push(e),
                }
            }

            outcome.plugins.push(PluginSummary {
                name: declaration.name.clone(),
                priority: declaration.priority,
                handlers: bindings
                    .iter()
                    .filter(|b| Arc::ptr_eq(&b.plugin, &descriptor))
                    .count(),
            });
            descriptors.push(descriptor);
        }

        if let Some(old) = state.entries.remove(path) {
            for descriptor in &old.descriptors {
                descriptor.set_state(PluginState::Unloading);
            }
            outcome.replaced = old.descriptors;
        }

        if !descriptors.is_empty() {
            state.entries.insert(
                path.to_path_buf(),
                PathEntry {
                    descriptors,
                    bindings,
                    routes,
                    generation,
                    installed_at: SystemTime::now(),
                },
            );
        }

        self.publish(&state);
        outcome
    }

    /// Validate one declaration's handlers, in declaration order.
    ///
    /// A repeated anchored pattern within one plugin replaces the earlier
    /// entry in place.
    fn validate_handlers(
        &self,
        unit: &dyn PluginUnit,
        declaration: &PluginDeclaration,
        rejected: &mut Vec<PluginError>,
    ) -> Vec<(String, String, HandlerConfig, Arc<regex::Regex>)> {
        let mut specs: Vec<(String, String, HandlerConfig, Arc<regex::Regex>)> = Vec::new();

        for handler in &declaration.handlers {
            let config = match HandlerConfig::parse(&handler.pattern, &handler.config) {
                Ok(config) => config,
                Err(e) => {
                    rejected.push(e);
                    continue;
                }
            };
            if !unit.has_handler(config.handler()) {
                rejected.push(PluginError::Registration {
                    pattern: handler.pattern.clone(),
                    reason: format!(
                        "{} has no handler '{}'",
                        declaration.name,
                        config.handler()
                    ),
                });
                continue;
            }
            let matcher = match self.patterns.try_compile(&handler.pattern) {
                Ok(matcher) => matcher,
                Err(e) => {
                    rejected.push(PluginError::Registration {
                        pattern: handler.pattern.clone(),
                        reason: format!("invalid pattern: {e}"),
                    });
                    continue;
                }
            };

            let anchored = anchor(&handler.pattern).into_owned();
            let spec = (anchored, handler.pattern.clone(), config, matcher);
            match specs.iter_mut().find(|s| s.0 == spec.0) {
                Some(existing) => *existing = spec,
                None => specs.push(spec),
            }
        }

        specs
    }

    /// Purge everything registered for `path`.
    ///
    /// Returns the removed descriptors, marked `Unloading`.
    pub fn remove(&self, path: &Path) -> Vec<Arc<PluginDescriptor>> {
        let mut state = self.state.lock();
        let Some(old) = state.entries.remove(path) else {
            return Vec::new();
        };
        state.generation += 1;
        for descriptor in &old.descriptors {
            descriptor.set_state(PluginState::Unloading);
        }
        self.publish(&state);
        old.descriptors
    }

    fn publish(&self, state: &RegistryState) {
        let bindings: Vec<_> = state
            .entries
            .values()
            .flat_map(|entry| entry.bindings.iter().cloned())
            .collect();
        let index = CompiledIndex::new(state.generation, bindings);
        debug!(
            generation = index.generation,
            bindings = index.len(),
            "publishing handler index"
        );
        self.index.store(Arc::new(index));
        self.patterns.clear();
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.state.lock().entries.contains_key(path)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.state.lock().entries.keys().cloned().collect()
    }

    pub fn descriptors(&self, path: &Path) -> Vec<Arc<PluginDescriptor>> {
        self.state
            .lock()
            .entries
            .get(path)
            .map(|entry| entry.descriptors.clone())
            .unwrap_or_default()
    }

    pub fn binding_count(&self) -> usize {
        self.snapshot().len()
    }

    /// `path → status` for every tracked path
    pub fn status(&self) -> BTreeMap<PathBuf, PathStatus> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .map(|(path, entry)| {
                let priority = entry
                    .descriptors
                    .iter()
                    .map(|d| d.priority)
                    .min()
                    .unwrap_or(hotwire_kernel::DEFAULT_PRIORITY);
                let plugin_state = entry
                    .descriptors
                    .first()
                    .map(|d| d.state())
                    .unwrap_or(PluginState::Removed);
                let status = PathStatus {
                    binding_count: entry.bindings.len(),
                    priority,
                    state: plugin_state,
                    plugins: entry.descriptors.iter().map(|d| d.symbol.clone()).collect(),
                    generation: entry.generation,
                };
                (path.clone(), status)
            })
            .collect()
    }

    /// Dashboard pages of every active plugin, ordered by route priority
    pub fn web_routes(&self) -> Vec<WebRoute> {
        let state = self.state.lock();
        let mut routes: Vec<WebRoute> = state
            .entries
            .values()
            .flat_map(|entry| entry.routes.iter().cloned())
            .collect();
        routes.sort_by_key(|r| r.priority);
        routes
    }

    /// Drop every entry. Returns all removed descriptors.
    pub fn clear(&self) -> Vec<Arc<PluginDescriptor>> {
        let mut state = self.state.lock();
        if state.entries.is_empty() {
            return Vec::new();
        }
        state.generation += 1;
        let removed: Vec<_> = std::mem::take(&mut state.entries)
            .into_values()
            .flat_map(|entry| entry.descriptors)
            .collect();
        for descriptor in &removed {
            descriptor.set_state(PluginState::Unloading);
        }
        self.publish(&state);
        warn!(count = removed.len(), "registry cleared");
        removed
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(crate::pattern::DEFAULT_CAPACITY)
    }
}
