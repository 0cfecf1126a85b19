//! Rhai 脚本引擎
//! Rhai script engine
//!
//! 同步、受限的脚本执行环境，可在任意工作线程上共享使用
//! A synchronous, resource-limited script runtime that can be shared across
//! worker threads

use super::error::{RhaiError, RhaiResult};
use rhai::{AST, CallFnOptions, Dynamic, Engine, FuncArgs, Scope};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, info, warn};

// ============================================================================
// 脚本引擎配置
// Script Engine Configuration
// ============================================================================

/// 脚本引擎安全配置
/// Script engine security configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSecurityConfig {
    /// 最大运算次数（0 表示不限制）
    /// Maximum number of operations per run (0 = unlimited)
    pub max_operations: u64,
    /// 最大调用栈深度
    /// Maximum call stack depth
    pub max_call_stack_depth: usize,
    /// 最大数组大小
    /// Maximum array size
    pub max_array_size: usize,
    /// 最大映射大小
    /// Maximum object map size
    pub max_map_size: usize,
    /// 最大字符串长度
    /// Maximum string size
    pub max_string_size: usize,
    /// 是否允许循环
    /// Whether to allow loops
    pub allow_loops: bool,
}

impl Default for ScriptSecurityConfig {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_stack_depth: 64,
            max_array_size: 10_000,
            max_map_size: 10_000,
            max_string_size: 1_000_000,
            allow_loops: true,
        }
    }
}

// ============================================================================
// Rhai 脚本引擎
// Rhai Script Engine
// ============================================================================

/// 共享脚本引擎
/// Shared script engine
pub struct ScriptEngine {
    engine: Engine,
    security: ScriptSecurityConfig,
}

impl ScriptEngine {
    /// 创建新的脚本引擎
    /// Create a new script engine
    pub fn new(security: ScriptSecurityConfig) -> Self {
        let mut engine = Engine::new();
        Self::apply_security_limits(&mut engine, &security);
        Self::register_builtin_functions(&mut engine);
        Self { engine, security }
    }

    fn apply_security_limits(engine: &mut Engine, security: &ScriptSecurityConfig) {
        engine.set_max_call_levels(security.max_call_stack_depth);
        engine.set_max_operations(security.max_operations);
        engine.set_max_array_size(security.max_array_size);
        engine.set_max_map_size(security.max_map_size);
        engine.set_max_string_size(security.max_string_size);

        if !security.allow_loops {
            engine.set_allow_looping(false);
        }

        // 关闭严格变量模式
        // Strict variables off
        engine.set_strict_variables(false);
    }

    /// 注册内置函数
    /// Register built-in functions
    fn register_builtin_functions(engine: &mut Engine) {
        engine.on_print(|text| info!(target: "hotwire::script", "{}", text));
        engine.on_debug(|text, source, pos| {
            debug!(target: "hotwire::script", source = source.unwrap_or(""), position = %pos, "{}", text)
        });

        engine.register_fn("log", |msg: &str| info!(target: "hotwire::script", "{}", msg));
        engine.register_fn("warn", |msg: &str| warn!(target: "hotwire::script", "{}", msg));
        engine.register_fn("error", |msg: &str| error!(target: "hotwire::script", "{}", msg));

        engine.register_fn("to_json", |value: Dynamic| -> String {
            serde_json::to_string(&dynamic_to_json(&value)).unwrap_or_else(|_| "null".to_string())
        });
        engine.register_fn("from_json", |json: &str| -> Dynamic {
            serde_json::from_str::<serde_json::Value>(json)
                .map(|v| json_to_dynamic(&v))
                .unwrap_or(Dynamic::UNIT)
        });

        engine.register_fn("now_ms", || -> i64 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64
        });
    }

    /// 编译脚本
    /// Compile script source
    pub fn compile(&self, source: &str) -> RhaiResult<AST> {
        self.engine
            .compile(source)
            .map_err(|e| RhaiError::CompileError(e.to_string()))
    }

    /// 从文件编译脚本
    /// Compile a script file; the AST is tagged with the file path
    pub fn compile_file(&self, path: &Path) -> RhaiResult<AST> {
        let source = std::fs::read_to_string(path)?;
        let mut ast = self.compile(&source)?;
        ast.set_source(path.to_string_lossy().as_ref());
        Ok(ast)
    }

    /// 执行顶层语句
    /// Run the top-level statements of a compiled script
    pub fn run(&self, scope: &mut Scope, ast: &AST) -> RhaiResult<()> {
        self.engine
            .run_ast_with_scope(scope, ast)
            .map_err(|e| RhaiError::ExecutionError(e.to_string()))
    }

    /// 脚本是否定义了指定函数
    /// Whether the script defines a function with this name and arity
    pub fn has_function(ast: &AST, name: &str, arity: Option<usize>) -> bool {
        ast.iter_functions()
            .any(|f| f.name == name && arity.is_none_or(|n| f.params.len() == n))
    }

    /// 调用脚本函数
    /// Call a script function without re-running top-level statements
    pub fn call(
        &self,
        scope: &mut Scope,
        ast: &AST,
        name: &str,
        args: impl FuncArgs,
    ) -> RhaiResult<Dynamic> {
        if !Self::has_function(ast, name, None) {
            return Err(RhaiError::NotFound(format!("function '{name}'")));
        }
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        self.engine
            .call_fn_with_options::<Dynamic>(options, scope, ast, name, args)
            .map_err(|e| RhaiError::ExecutionError(e.to_string()))
    }

    /// 校验脚本语法
    /// Validate script syntax, returning the compile errors
    pub fn validate(&self, source: &str) -> Vec<String> {
        match self.engine.compile(source) {
            Ok(_) => Vec::new(),
            Err(e) => vec![e.to_string()],
        }
    }

    pub fn security(&self) -> &ScriptSecurityConfig {
        &self.security
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// 获取可变引擎引用（注册宿主函数与类型）
    /// Mutable engine access, for registering host functions and types
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new(ScriptSecurityConfig::default())
    }
}

// ============================================================================
// 辅助函数
// Helper Functions
// ============================================================================

/// JSON Value 转换为 Rhai Dynamic
/// Convert JSON Value to Rhai Dynamic
pub fn json_to_dynamic(value: &serde_json::Value) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT)
}

/// Rhai Dynamic 转换为 JSON Value；自定义类型转为其字符串形式
/// Convert Rhai Dynamic to JSON Value; custom types become their string form
pub fn dynamic_to_json(value: &Dynamic) -> serde_json::Value {
    rhai::serde::from_dynamic::<serde_json::Value>(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()))
}

// ============================================================================
// 测试
// Tests
// ============================================================================
