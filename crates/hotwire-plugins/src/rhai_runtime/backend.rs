//! Rhai script plugin backend
//!
//! A `.rhai` unit is compiled and its top-level statements run once at load.
//! Discovery goes through the script's own `register(r)` function; handlers
//! are script functions taking the event as their only argument.

use hotwire_extra::rhai::{ScriptEngine, ScriptSecurityConfig, dynamic_to_json};
use hotwire_kernel::config::ScriptLimits;
use hotwire_kernel::{
    HandlerCall, HandlerReturn, PluginBackend, PluginError, PluginResult, PluginUnit, Registrar,
};
use rhai::{AST, Engine, Scope};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::event::{ChainSignal, ScriptEvent, register_event_api};
use super::registrar::{ScriptRegistrar, register_registrar_api};

/// File extension handled by [`RhaiBackend`]
pub const SCRIPT_EXTENSION: &str = "rhai";

/// Lifecycle hooks; never bindable as handlers
const HOOKS: &[&str] = &["register", "cleanup"];

/// Loads `.rhai` plugin units on a shared, limited engine
pub struct RhaiBackend {
    engine: Arc<ScriptEngine>,
}

impl RhaiBackend {
    pub fn new(security: ScriptSecurityConfig) -> Self {
        let mut engine = ScriptEngine::new(security);
        register_host_api(engine.engine_mut());
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn from_limits(limits: &ScriptLimits) -> Self {
        Self::new(ScriptSecurityConfig {
            max_operations: limits.max_operations,
            max_call_stack_depth: limits.max_call_levels,
            max_array_size: limits.max_array_size,
            max_map_size: limits.max_map_size,
            max_string_size: limits.max_string_size,
            allow_loops: true,
        })
    }

    pub fn engine(&self) -> &Arc<ScriptEngine> {
        &self.engine
    }
}

impl Default for RhaiBackend {
    fn default() -> Self {
        Self::new(ScriptSecurityConfig::default())
    }
}

impl PluginBackend for RhaiBackend {
    fn name(&self) -> &str {
        "rhai"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION)
    }

    fn load(&self, path: &Path) -> PluginResult<Arc<dyn PluginUnit>> {
        let ast = self
            .engine
            .compile_file(path)
            .map_err(|e| PluginError::Load(e.to_string()))?;

        let mut scope = Scope::new();
        self.engine
            .run(&mut scope, &ast)
            .map_err(|e| PluginError::Load(e.to_string()))?;

        debug!(path = %path.display(), functions = ast.iter_functions().count(), "script compiled");
        Ok(Arc::new(RhaiPluginUnit {
            path: path.to_path_buf(),
            engine: self.engine.clone(),
            ast,
            scope,
        }))
    }
}

/// Host functions every plugin script can call, besides the engine builtins
fn register_host_api(engine: &mut Engine) {
    engine.register_fn("sleep_ms", |ms: i64| {
        std::thread::sleep(Duration::from_millis(ms.max(0) as u64));
    });
    register_event_api(engine);
    register_registrar_api(engine);
}

/// One loaded script
pub struct RhaiPluginUnit {
    path: PathBuf,
    engine: Arc<ScriptEngine>,
    ast: AST,
    /// Top-level variables after the load run; each call works on a copy
    scope: Scope<'static>,
}

impl RhaiPluginUnit {
    fn defines(&self, name: &str, arity: usize) -> bool {
        ScriptEngine::has_function(&self.ast, name, Some(arity))
    }
}

impl PluginUnit for RhaiPluginUnit {
    fn source(&self) -> &Path {
        &self.path
    }

    fn register(&self, registrar: &mut dyn Registrar) -> PluginResult<()> {
        if !self.defines("register", 1) {
            return Ok(());
        }
        let script_registrar = ScriptRegistrar::new();
        let mut scope = self.scope.clone();
        self.engine
            .call(&mut scope, &self.ast, "register", (script_registrar.clone(),))
            .map_err(|e| PluginError::Load(format!("register() failed: {e}")))?;

        for declaration in script_registrar.take() {
            registrar.declare(declaration);
        }
        Ok(())
    }

    fn has_handler(&self, name: &str) -> bool {
        !HOOKS.contains(&name) && self.defines(name, 1)
    }

    fn invoke(&self, call: HandlerCall) -> PluginResult<HandlerReturn> {
        let event = ScriptEvent::new(call.event, call.captures);
        let mut scope = self.scope.clone();
        let result = self
            .engine
            .call(&mut scope, &self.ast, &call.handler, (event,))
            .map_err(|e| PluginError::Execution(e.to_string()))?;

        if result.is::<ChainSignal>() {
            Ok(HandlerReturn::Continue)
        } else {
            Ok(HandlerReturn::Value(dynamic_to_json(&result)))
        }
    }

    fn cleanup(&self) {
        if !self.defines("cleanup", 0) {
            return;
        }
        let mut scope = self.scope.clone();
        if let Err(e) = self.engine.call(&mut scope, &self.ast, "cleanup", ()) {
            warn!(path = %self.path.display(), "cleanup() failed: {}", e);
        }
    }
}

impl fmt::Debug for RhaiPluginUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiPluginUnit")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
