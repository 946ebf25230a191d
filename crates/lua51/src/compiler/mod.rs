//! Source text to bytecode: lexer → parser → AST → code generator
//! (spec §2, §4.1–§4.3). Parsing and code generation are kept as two
//! separate passes here (AST in between) rather than the interleaved
//! single-pass recursive descent a hand-tuned Lua compiler usually does —
//! see DESIGN.md for why.

pub mod ast;
pub mod codegen;
pub mod func_state;
pub mod lexer;
pub mod parser;
pub mod proto;

pub use lexer::parse_lua_number;
pub use proto::{Proto, UpvalDesc};

use crate::gc::Heap;
use crate::lua_vm::error::LuaResult;
use std::rc::Rc;

/// Compile-time limits tied to the bytecode format's operand widths (spec
/// §4.3, §7): a local's register is an 8-bit `A`, an upvalue index is a
/// `u8`, and a constant index is packed into 18-bit `Bx`.
#[derive(Debug, Clone, Copy)]
pub struct CompilerConfig {
    pub max_locals: usize,
    pub max_upvalues: usize,
    pub max_constants: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_locals: 200,
            max_upvalues: 255,
            max_constants: 1 << 18,
        }
    }
}

/// Lex, parse and generate code for `source`, returning the top-level
/// `Proto` (a vararg function with no parameters, per Lua's chunk model).
pub fn compile(heap: &mut Heap, source: &str, chunk_name: &str) -> LuaResult<Rc<Proto>> {
    let mut p = parser::Parser::new(source, chunk_name)?;
    let block = p.parse_chunk()?;
    let cg = codegen::Codegen::new(heap, CompilerConfig::default());
    cg.compile_chunk(&block, chunk_name)
}
