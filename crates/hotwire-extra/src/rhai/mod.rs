//! Rhai 脚本引擎集成模块
//! Rhai script engine integration module
//!
//! 为脚本插件提供受限的嵌入式执行环境
//! Provides a resource-limited embedded runtime for script plugins

pub mod engine;
pub mod error;

pub use engine::*;
pub use error::*;
