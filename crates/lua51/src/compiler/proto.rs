//! `Proto` — the compile-time template the VM actually executes. One per
//! Lua function in the source, nested protos included.

use crate::lua_value::LuaValue;
use crate::lua_vm::Instruction;
use smol_str::SmolStr;
use std::rc::Rc;

/// Where a captured variable comes from, from the *defining* function's
/// point of view — a local slot of the immediately enclosing function, or
/// one of that function's own upvalues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalDesc {
    pub is_local: bool,
    pub index: u8,
    pub name: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct LineInfo {
    pub line: u32,
}

pub struct Proto {
    pub source: SmolStr,
    pub line_defined: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub code: Vec<Instruction>,
    pub lines: Vec<u32>,
    pub constants: Vec<LuaValue>,
    pub protos: Vec<Rc<Proto>>,
    pub upvalues: Vec<UpvalDesc>,
    /// Debug-only: source names of the local variables, used by tracebacks.
    pub local_names: Vec<SmolStr>,
}

impl Proto {
    pub fn new(source: SmolStr, line_defined: u32) -> Self {
        Self {
            source,
            line_defined,
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2,
            code: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            local_names: Vec::new(),
        }
    }

    pub fn line_at(&self, pc: usize) -> u32 {
        self.lines.get(pc).copied().unwrap_or(self.line_defined)
    }
}
