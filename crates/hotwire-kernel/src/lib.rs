// plugin boundary
pub mod plugin;
pub use plugin::*;

// event model
pub mod event;
pub use event::*;

// log collaborators
pub mod logging;
pub use logging::*;

// config module
#[cfg(feature = "config")]
pub mod config;
