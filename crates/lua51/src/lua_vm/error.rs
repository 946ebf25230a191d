//! Error taxonomy (spec §7). `LuaError` is the lightweight kind carried by
//! `Result`s inside the hot path; `LuaFullError` pairs it with the rendered
//! message once it's about to cross a protected-call or CLI boundary.

use crate::lua_value::LuaValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaErrorKind {
    LexError,
    SyntaxError,
    CompileError,
    RuntimeError,
    StackOverflow,
    Yield,
}

impl std::fmt::Display for LuaErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LuaErrorKind::LexError => "lexical error",
            LuaErrorKind::SyntaxError => "syntax error",
            LuaErrorKind::CompileError => "compile error",
            LuaErrorKind::RuntimeError => "runtime error",
            LuaErrorKind::StackOverflow => "stack overflow",
            LuaErrorKind::Yield => "yield",
        };
        write!(f, "{s}")
    }
}

/// The error value actually raised. For VM-detected conditions it's a
/// formatted string (`"<source>:<line>: <message>"`); `error()` lets Lua
/// code raise any `LuaValue`.
#[derive(Debug, Clone)]
pub struct LuaError {
    pub kind: LuaErrorKind,
    pub value: LuaValue,
    pub message: String,
}

impl LuaError {
    pub fn new(kind: LuaErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            value: LuaValue::Nil,
            message,
        }
    }

    pub fn runtime(source: &str, line: u32, message: impl std::fmt::Display) -> Self {
        Self::new(
            LuaErrorKind::RuntimeError,
            format!("{source}:{line}: {message}"),
        )
    }

    pub fn with_value(kind: LuaErrorKind, message: String, value: LuaValue) -> Self {
        Self {
            kind,
            value,
            message,
        }
    }
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LuaError {}

pub type LuaResult<T> = Result<T, LuaError>;
