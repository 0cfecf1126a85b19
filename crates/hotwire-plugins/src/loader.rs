//! Plugin loader
//!
//! Scans `<root>/<subdir>/<file>` for source units, compares modification
//! times against the load record and drives load, reload and unload into the
//! registry. All mutations go through one writer lock. A failing file never
//! aborts the scan, and a failing reload keeps the previous bindings.

use error_stack::{Report, ResultExt};
use hotwire_kernel::{
    PluginBackend, PluginDeclaration, PluginError, PluginReport, PluginUnit, SharedLogSink,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

use crate::index::{PluginDescriptor, display_path};
use crate::reclaimer::Reclaimer;
use crate::registry::{PluginRegistry, PluginSummary};
use crate::worker_pool::panic_message;

/// What one `load_all` pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub loaded: Vec<PathBuf>,
    pub reloaded: Vec<PathBuf>,
    pub unloaded: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    /// Plugins installed by this pass
    pub plugins: Vec<PluginSummary>,
}

impl LoadSummary {
    /// Nothing was loaded, reloaded, unloaded or failed
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
            && self.reloaded.is_empty()
            && self.unloaded.is_empty()
            && self.failed.is_empty()
    }
}

/// Drives plugin files into the registry
pub struct PluginLoader {
    root: PathBuf,
    backends: Vec<Arc<dyn PluginBackend>>,
    registry: Arc<PluginRegistry>,
    reclaimer: Arc<Reclaimer>,
    sink: SharedLogSink,
    records: Mutex<HashMap<PathBuf, SystemTime>>,
    writer: Mutex<()>,
}

impl PluginLoader {
    pub fn new(
        root: impl Into<PathBuf>,
        registry: Arc<PluginRegistry>,
        reclaimer: Arc<Reclaimer>,
        sink: SharedLogSink,
    ) -> Self {
        Self {
            root: root.into(),
            backends: Vec::new(),
            registry,
            reclaimer,
            sink,
            records: Mutex::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn PluginBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Files currently in the load record, with their recorded mtime
    pub fn records(&self) -> BTreeMap<PathBuf, SystemTime> {
        self.records
            .lock()
            .iter()
            .map(|(path, mtime)| (path.clone(), *mtime))
            .collect()
    }

    fn backend_for(&self, path: &Path) -> Option<&Arc<dyn PluginBackend>> {
        self.backends.iter().find(|backend| backend.handles(path))
    }

    /// Whether `path` would be picked up by a scan
    pub fn is_plugin_file(&self, path: &Path) -> bool {
        let hidden = path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with('.'))
            .unwrap_or(true);
        !hidden && self.backend_for(path).is_some()
    }

    /// Scan the plugin root and bring the registry in line with it.
    pub fn load_all(&self) -> LoadSummary {
        let _writer = self.writer.lock();
        let mut summary = LoadSummary::default();

        if !self.root.is_dir() {
            let created = fs::create_dir_all(&self.root);
            let detail = match created {
                Ok(()) => "created empty plugin root".to_string(),
                Err(e) => e.to_string(),
            };
            error!(root = %self.root.display(), "plugin root missing: {}", detail);
            self.sink.error(
                &format!("plugin root {} does not exist", self.root.display()),
                &detail,
            );
            return summary;
        }

        // tracked files that vanished, including whole subdirectories
        let vanished: Vec<PathBuf> = self
            .records
            .lock()
            .keys()
            .filter(|path| !path.exists())
            .cloned()
            .collect();
        for path in vanished {
            self.unload_locked(&path);
            summary.unloaded.push(path);
        }

        let subdirs = match sorted_entries(&self.root) {
            Ok(entries) => entries.into_iter().filter(|p| p.is_dir()),
            Err(e) => {
                error!(root = %self.root.display(), "cannot list plugin root: {}", e);
                self.sink
                    .error(&format!("cannot list {}", self.root.display()), &e.to_string());
                return summary;
            }
        };

        for subdir in subdirs.collect::<Vec<_>>() {
            self.scan_subdir(&subdir, &mut summary);
        }

        if !summary.is_empty() {
            debug!(
                loaded = summary.loaded.len(),
                reloaded = summary.reloaded.len(),
                unloaded = summary.unloaded.len(),
                failed = summary.failed.len(),
                "plugin scan finished"
            );
        }
        summary
    }

    fn scan_subdir(&self, subdir: &Path, summary: &mut LoadSummary) {
        let files: Vec<PathBuf> = match sorted_entries(subdir) {
            Ok(entries) => entries
                .into_iter()
                .filter(|p| p.is_file() && self.is_plugin_file(p))
                .collect(),
            Err(e) => {
                warn!(dir = %subdir.display(), "cannot list plugin directory: {}", e);
                return;
            }
        };

        let stale: Vec<PathBuf> = self
            .records
            .lock()
            .keys()
            .filter(|path| path.parent() == Some(subdir) && !files.contains(path))
            .cloned()
            .collect();
        for path in stale {
            self.unload_locked(&path);
            summary.unloaded.push(path);
        }

        for file in files {
            let modified = match fs::metadata(&file).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(path = %file.display(), "cannot read modification time: {}", e);
                    continue;
                }
            };

            // recorded before loading so a broken file waits for its next edit
            let previous = self.records.lock().insert(file.clone(), modified);
            if previous == Some(modified) {
                continue;
            }
            let is_reload = self.registry.contains(&file);

            match self.load_locked(&file, is_reload) {
                Some(plugins) => {
                    if is_reload {
                        summary.reloaded.push(file);
                    } else {
                        summary.loaded.push(file);
                    }
                    summary.plugins.extend(plugins);
                }
                None => summary.failed.push(file),
            }
        }
    }

    /// Load or replace `path`. Returns `false` when the file failed to load.
    pub fn load(&self, path: &Path) -> bool {
        let _writer = self.writer.lock();
        let is_reload = self.registry.contains(path);
        if let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) {
            self.records.lock().insert(path.to_path_buf(), modified);
        }
        self.load_locked(path, is_reload).is_some()
    }

    /// Reload `path` regardless of its modification time.
    ///
    /// A path that no longer exists is unloaded.
    pub fn reload(&self, path: &Path) -> bool {
        if !path.exists() {
            self.unload(path);
            return false;
        }
        self.load(path)
    }

    /// Purge `path`. Returns the number of bindings removed.
    pub fn unload(&self, path: &Path) -> usize {
        let _writer = self.writer.lock();
        self.unload_locked(path)
    }

    fn load_locked(&self, path: &Path, is_reload: bool) -> Option<Vec<PluginSummary>> {
        let shown = display_path(path);
        let (unit, declarations) = match self.instantiate(path) {
            Ok(loaded) => loaded,
            Err(report) => {
                error!(path = %shown, "plugin load failed: {}", report.current_context());
                self.sink
                    .error(&format!("failed to load {shown}"), &format!("{report:?}"));
                return None;
            }
        };

        let outcome = self.registry.install(path, unit, declarations);
        for rejected in &outcome.rejected {
            warn!(path = %shown, "{}", rejected);
            self.sink
                .error(&format!("{shown}: binding dropped"), &rejected.to_string());
        }
        self.retire(outcome.replaced);

        if outcome.plugins.is_empty() {
            info!(path = %shown, "no plugin declared");
            self.sink.framework(&format!("{shown} has no plugin declared"));
            return Some(Vec::new());
        }

        let listing = outcome
            .plugins
            .iter()
            .map(|p| format!("{}(priority:{}, handlers:{})", p.name, p.priority, p.handlers))
            .collect::<Vec<_>>()
            .join(", ");
        let verb = if is_reload { "hot reload" } else { "loaded" };
        info!(path = %shown, generation = outcome.generation, "{}: {}", verb, listing);
        self.sink.framework(&format!("{verb}: {shown} - {listing}"));
        Some(outcome.plugins)
    }

    fn unload_locked(&self, path: &Path) -> usize {
        self.records.lock().remove(path);
        let bindings = self
            .registry
            .snapshot()
            .iter()
            .filter(|b| b.plugin.path == path)
            .count();
        let removed = self.registry.remove(path);
        if removed.is_empty() {
            return 0;
        }

        let shown = display_path(path);
        info!(path = %shown, bindings, "plugin unloaded");
        self.sink
            .framework(&format!("removed {shown}, unregistered {bindings}"));
        self.retire(removed);
        bindings
    }

    /// Run each distinct unit's cleanup hook once, then queue the descriptors
    /// for reclamation.
    fn retire(&self, descriptors: Vec<Arc<PluginDescriptor>>) {
        if descriptors.is_empty() {
            return;
        }
        let mut units: Vec<Arc<dyn PluginUnit>> = Vec::new();
        for unit in descriptors.iter().filter_map(|d| d.unit()) {
            if !units.iter().any(|u| Arc::ptr_eq(u, &unit)) {
                units.push(unit);
            }
        }
        for unit in units {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| unit.cleanup())) {
                let message = panic_message(payload.as_ref());
                warn!(path = %display_path(unit.source()), "cleanup panicked: {}", message);
                self.sink.error(
                    &format!("cleanup of {} failed", display_path(unit.source())),
                    &message,
                );
            }
        }
        self.reclaimer.enqueue(descriptors);
    }

    /// Load `path` and collect its declarations without touching the registry.
    pub fn inspect(&self, path: &Path) -> PluginReport<Vec<PluginDeclaration>> {
        let (unit, declarations) = self.instantiate(path)?;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| unit.cleanup())) {
            debug!("cleanup panicked during inspection: {}", panic_message(payload.as_ref()));
        }
        Ok(declarations)
    }

    fn instantiate(
        &self,
        path: &Path,
    ) -> PluginReport<(Arc<dyn PluginUnit>, Vec<PluginDeclaration>)> {
        let backend = self.backend_for(path).ok_or_else(|| {
            Report::new(PluginError::Load("no backend accepts this file".to_string()))
                .attach(format!("path: {}", path.display()))
        })?;

        let attempt = catch_unwind(AssertUnwindSafe(
            || -> PluginReport<(Arc<dyn PluginUnit>, Vec<PluginDeclaration>)> {
                let unit = backend
                    .load(path)
                    .attach(format!("backend: {}", backend.name()))
                    .attach("phase: load")?;
                let mut declarations: Vec<PluginDeclaration> = Vec::new();
                unit.register(&mut declarations).attach("phase: register")?;
                Ok((unit, declarations))
            },
        ));

        match attempt {
            Ok(result) => result.attach(format!("path: {}", path.display())),
            Err(payload) => Err(Report::new(PluginError::Load(format!(
                "panicked: {}",
                panic_message(payload.as_ref())
            )))
            .attach(format!("path: {}", path.display()))),
        }
    }
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}
