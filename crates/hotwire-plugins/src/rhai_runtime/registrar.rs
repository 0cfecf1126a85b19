//! Registration handles passed to a script's `register(r)`.

use hotwire_kernel::{DEFAULT_PRIORITY, PluginDeclaration};
use parking_lot::Mutex;
use rhai::{Dynamic, Engine};
use std::sync::Arc;

use hotwire_extra::rhai::dynamic_to_json;

type Declarations = Arc<Mutex<Vec<PluginDeclaration>>>;

/// The `r` argument of `register(r)`
#[derive(Clone, Default)]
pub struct ScriptRegistrar {
    declarations: Declarations,
}

impl ScriptRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a plugin object and return its handle.
    pub fn plugin(&mut self, name: &str, priority: i64) -> ScriptPluginHandle {
        let mut declarations = self.declarations.lock();
        declarations.push(PluginDeclaration::new(name).with_priority(priority));
        ScriptPluginHandle {
            declarations: self.declarations.clone(),
            index: declarations.len() - 1,
        }
    }

    /// Everything declared so far
    pub fn take(&self) -> Vec<PluginDeclaration> {
        std::mem::take(&mut *self.declarations.lock())
    }
}

/// Handle to one declared plugin object
#[derive(Clone)]
pub struct ScriptPluginHandle {
    declarations: Declarations,
    index: usize,
}

impl ScriptPluginHandle {
    fn update(&mut self, f: impl FnOnce(&mut PluginDeclaration)) {
        if let Some(declaration) = self.declarations.lock().get_mut(self.index) {
            f(declaration);
        }
    }

    pub fn handle(&mut self, pattern: &str, config: Dynamic) -> Self {
        let config = dynamic_to_json(&config);
        let pattern = pattern.to_string();
        self.update(|d| {
            d.handlers.push(hotwire_kernel::HandlerDeclaration { pattern, config });
        });
        self.clone()
    }

    pub fn web_page(&mut self, page: Dynamic) -> Self {
        let page = dynamic_to_json(&page);
        self.update(|d| d.web_pages.push(page));
        self.clone()
    }
}

pub fn register_registrar_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<ScriptRegistrar>("Registrar")
        .register_fn("plugin", |r: &mut ScriptRegistrar, name: &str| {
            r.plugin(name, DEFAULT_PRIORITY)
        })
        .register_fn("plugin", ScriptRegistrar::plugin);

    engine
        .register_type_with_name::<ScriptPluginHandle>("Plugin")
        .register_fn("handle", ScriptPluginHandle::handle)
        .register_fn("web_page", ScriptPluginHandle::web_page);
}
