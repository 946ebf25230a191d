//! A Lua 5.1 interpreter: lexer/parser/codegen down to a register-based
//! bytecode format, a mark-sweep-collected object heap, and the dispatch
//! loop that runs it (spec §1/§2).

pub mod compiler;
pub mod gc;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;
#[cfg(test)]
mod test;

pub use lua_value::LuaValue;
pub use lua_vm::{LuaError, LuaErrorKind, LuaResult, LuaState, LuaVM, VmConfig};

/// Run `source` on a fresh VM whose `print` output is captured instead of
/// going to stdout, returning that output alongside the execution result.
/// The single entry point the end-to-end scenario tests (spec §8.3) drive.
pub fn execute_capturing(source: &str) -> (String, LuaResult<()>) {
    let mut vm = LuaVM::new_capturing(VmConfig::default());
    let result = vm.execute(source, "=(capture)").map(|_| ());
    (vm.captured_output().to_string(), result)
}
