//! Hotwire Extra 模块
//! Hotwire Extra Module
//!
//! 提供 Rhai 脚本引擎集成
//! Provides Rhai script engine integration

#[cfg(feature = "rhai-scripting")]
pub mod rhai;

#[cfg(feature = "rhai-scripting")]
pub use self::rhai::*;
