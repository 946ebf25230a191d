//! Per-function compile-time state: register allocator, local/upvalue
//! tables, and jump-patch lists (spec §4.3).

use super::proto::{Proto, UpvalDesc};
use crate::lua_value::LuaValue;
use crate::lua_vm::opcode::{Instruction, OpCode};
use smol_str::SmolStr;

pub struct LocalVar {
    pub name: SmolStr,
    pub reg: u8,
}

/// One lexical block: where its locals start, and (for loops) the pending
/// `break` jumps that need patching to the instruction after the loop.
pub struct BlockScope {
    pub local_base: usize,
    pub is_loop: bool,
    pub break_jumps: Vec<usize>,
}

pub struct FuncState {
    pub proto: Proto,
    pub locals: Vec<LocalVar>,
    pub blocks: Vec<BlockScope>,
    pub freereg: u8,
    pub max_locals: usize,
    pub max_upvalues: usize,
    pub max_constants: usize,
}

impl FuncState {
    pub fn new(source: SmolStr, line_defined: u32, cfg: &super::CompilerConfig) -> Self {
        Self {
            proto: Proto::new(source, line_defined),
            locals: Vec::new(),
            blocks: vec![BlockScope { local_base: 0, is_loop: false, break_jumps: Vec::new() }],
            freereg: 0,
            max_locals: cfg.max_locals,
            max_upvalues: cfg.max_upvalues,
            max_constants: cfg.max_constants,
        }
    }

    pub fn emit(&mut self, instr: Instruction, line: u32) -> usize {
        self.proto.code.push(instr);
        self.proto.lines.push(line);
        self.proto.code.len() - 1
    }

    pub fn emit_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32, line: u32) -> usize {
        self.emit(Instruction::encode_abc(op, a, b, c), line)
    }

    pub fn emit_abx(&mut self, op: OpCode, a: u32, bx: u32, line: u32) -> usize {
        self.emit(Instruction::encode_abx(op, a, bx), line)
    }

    pub fn emit_asbx(&mut self, op: OpCode, a: u32, sbx: i32, line: u32) -> usize {
        self.emit(Instruction::encode_asbx(op, a, sbx), line)
    }

    pub fn pc(&self) -> usize {
        self.proto.code.len()
    }

    pub fn patch_jump_to_here(&mut self, jump_pc: usize) {
        let here = self.pc();
        let sbx = (here as i64 - jump_pc as i64 - 1) as i32;
        self.proto.code[jump_pc].set_sbx(sbx);
    }

    pub fn patch_jump_to(&mut self, jump_pc: usize, target: usize) {
        let sbx = (target as i64 - jump_pc as i64 - 1) as i32;
        self.proto.code[jump_pc].set_sbx(sbx);
    }

    // ---- registers ---------------------------------------------------

    pub fn reserve_regs(&mut self, n: u8) -> u8 {
        let base = self.freereg;
        self.freereg += n;
        if self.freereg as usize > self.proto.max_stack_size as usize {
            self.proto.max_stack_size = self.freereg;
        }
        base
    }

    pub fn free_to(&mut self, reg: u8) {
        self.freereg = reg;
    }

    // ---- locals --------------------------------------------------------

    pub fn add_local(&mut self, name: SmolStr) -> crate::lua_vm::error::LuaResult<u8> {
        if self.locals.len() >= self.max_locals {
            return Err(crate::lua_vm::error::LuaError::new(
                crate::lua_vm::error::LuaErrorKind::CompileError,
                "too many local variables",
            ));
        }
        let reg = self.reserve_regs(1);
        self.locals.push(LocalVar { name, reg });
        self.proto.local_names.push(self.locals.last().unwrap().name.clone());
        Ok(reg)
    }

    pub fn resolve_local(&self, name: &str) -> Option<u8> {
        self.locals.iter().rev().find(|l| l.name == name).map(|l| l.reg)
    }

    pub fn enter_block(&mut self, is_loop: bool) {
        self.blocks.push(BlockScope {
            local_base: self.locals.len(),
            is_loop,
            break_jumps: Vec::new(),
        });
    }

    /// Pops the innermost block, discarding its locals and returning the
    /// `break` jumps it collected (the caller patches them once it knows
    /// where the loop ends).
    pub fn leave_block(&mut self) -> Vec<usize> {
        let scope = self.blocks.pop().expect("unbalanced block scope");
        self.locals.truncate(scope.local_base);
        let reg = if scope.local_base == 0 {
            0
        } else {
            self.locals.last().map(|l| l.reg + 1).unwrap_or(0)
        };
        self.free_to(reg);
        scope.break_jumps
    }

    pub fn record_break(&mut self, pc: usize) -> crate::lua_vm::error::LuaResult<()> {
        for scope in self.blocks.iter_mut().rev() {
            if scope.is_loop {
                scope.break_jumps.push(pc);
                return Ok(());
            }
        }
        Err(crate::lua_vm::error::LuaError::new(
            crate::lua_vm::error::LuaErrorKind::CompileError,
            "break outside a loop",
        ))
    }

    // ---- constants -------------------------------------------------------

    pub fn add_constant(&mut self, v: LuaValue) -> crate::lua_vm::error::LuaResult<u32> {
        for (i, existing) in self.proto.constants.iter().enumerate() {
            if const_eq(*existing, v) {
                return Ok(i as u32);
            }
        }
        if self.proto.constants.len() >= self.max_constants {
            return Err(crate::lua_vm::error::LuaError::new(
                crate::lua_vm::error::LuaErrorKind::CompileError,
                "too many constants",
            ));
        }
        self.proto.constants.push(v);
        Ok(self.proto.constants.len() as u32 - 1)
    }

    pub fn add_upvalue(&mut self, desc: UpvalDesc) -> crate::lua_vm::error::LuaResult<u8> {
        for (i, existing) in self.proto.upvalues.iter().enumerate() {
            if existing.is_local == desc.is_local && existing.index == desc.index {
                return Ok(i as u8);
            }
        }
        if self.proto.upvalues.len() >= self.max_upvalues {
            return Err(crate::lua_vm::error::LuaError::new(
                crate::lua_vm::error::LuaErrorKind::CompileError,
                "too many upvalues",
            ));
        }
        self.proto.upvalues.push(desc);
        Ok(self.proto.upvalues.len() as u8 - 1)
    }
}

fn const_eq(a: LuaValue, b: LuaValue) -> bool {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => x.to_bits() == y.to_bits(),
        (LuaValue::String(x), LuaValue::String(y)) => x == y,
        (LuaValue::Boolean(x), LuaValue::Boolean(y)) => x == y,
        (LuaValue::Nil, LuaValue::Nil) => true,
        _ => false,
    }
}
