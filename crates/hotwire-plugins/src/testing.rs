//! In-memory plugin units for unit tests.

use hotwire_kernel::{
    HandlerCall, HandlerReturn, PluginDeclaration, PluginError, PluginResult, PluginUnit,
    Registrar,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type HandlerFn = Arc<dyn Fn(&HandlerCall) -> PluginResult<HandlerReturn> + Send + Sync>;

pub struct StaticUnit {
    path: PathBuf,
    declarations: Vec<PluginDeclaration>,
    handlers: HashMap<String, HandlerFn>,
    pub cleanups: AtomicUsize,
}

impl StaticUnit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            declarations: Vec::new(),
            handlers: HashMap::new(),
            cleanups: AtomicUsize::new(0),
        }
    }

    pub fn declare(mut self, declaration: PluginDeclaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    pub fn handler<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&HandlerCall) -> PluginResult<HandlerReturn> + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn declarations(&self) -> Vec<PluginDeclaration> {
        self.declarations.clone()
    }

    pub fn source_path(&self) -> PathBuf {
        self.path.clone()
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<dyn PluginUnit> {
        Arc::new(self)
    }
}

impl PluginUnit for StaticUnit {
    fn source(&self) -> &Path {
        &self.path
    }

    fn register(&self, registrar: &mut dyn Registrar) -> PluginResult<()> {
        for declaration in &self.declarations {
            registrar.declare(declaration.clone());
        }
        Ok(())
    }

    fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    fn invoke(&self, call: HandlerCall) -> PluginResult<HandlerReturn> {
        let handler = self
            .handlers
            .get(&call.handler)
            .ok_or_else(|| PluginError::Execution(format!("no handler {}", call.handler)))?;
        handler(&call)
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}
