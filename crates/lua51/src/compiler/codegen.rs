//! AST -> bytecode. One [`FuncState`] per nested Lua function; upvalues are
//! resolved by walking outward through the stack of enclosing functions,
//! the same algorithm as the reference implementation's `singlevaraux`.

use super::ast::*;
use super::func_state::FuncState;
use super::proto::{Proto, UpvalDesc};
use super::CompilerConfig;
use crate::gc::Heap;
use crate::lua_value::LuaValue;
use crate::lua_vm::error::{LuaError, LuaErrorKind, LuaResult};
use crate::lua_vm::opcode::{OpCode, BITRK};
use smol_str::SmolStr;
use std::rc::Rc;

enum NameRef {
    Local(u8),
    Upval(u8),
    Global(u32),
}

pub struct Codegen<'h> {
    heap: &'h mut Heap,
    funcs: Vec<FuncState>,
    cfg: CompilerConfig,
}

impl<'h> Codegen<'h> {
    pub fn new(heap: &'h mut Heap, cfg: CompilerConfig) -> Self {
        Self { heap, funcs: Vec::new(), cfg }
    }

    pub fn compile_chunk(mut self, block: &Block, chunk_name: &str) -> LuaResult<Rc<Proto>> {
        self.funcs.push(FuncState::new(SmolStr::new(chunk_name), 0, &self.cfg));
        self.funcs.last_mut().unwrap().proto.is_vararg = true;
        self.compile_block(block)?;
        self.emit_return_none(block_end_line(block));
        let fs = self.funcs.pop().unwrap();
        Ok(Rc::new(fs.proto))
    }

    fn cur(&mut self) -> &mut FuncState {
        self.funcs.last_mut().unwrap()
    }

    fn intern(&mut self, bytes: &[u8]) -> LuaValue {
        LuaValue::String(self.heap.alloc_string(bytes))
    }

    fn const_string(&mut self, bytes: &[u8]) -> LuaResult<u32> {
        let v = self.intern(bytes);
        self.cur().add_constant(v)
    }

    // ---- name resolution ---------------------------------------------

    fn find_upvalue(&mut self, level: usize, name: &str) -> LuaResult<Option<u8>> {
        if level == 0 {
            return Ok(None);
        }
        let parent = level - 1;
        if let Some(reg) = self.funcs[parent].resolve_local(name) {
            let idx = self.funcs[level].add_upvalue(UpvalDesc { is_local: true, index: reg, name: None })?;
            return Ok(Some(idx));
        }
        if let Some(parent_upval) = self.find_upvalue(parent, name)? {
            let idx = self.funcs[level].add_upvalue(UpvalDesc { is_local: false, index: parent_upval, name: None })?;
            return Ok(Some(idx));
        }
        Ok(None)
    }

    fn resolve_name(&mut self, name: &str) -> LuaResult<NameRef> {
        let level = self.funcs.len() - 1;
        if let Some(reg) = self.funcs[level].resolve_local(name) {
            return Ok(NameRef::Local(reg));
        }
        if let Some(idx) = self.find_upvalue(level, name)? {
            return Ok(NameRef::Upval(idx));
        }
        let k = self.const_string(name.as_bytes())?;
        Ok(NameRef::Global(k))
    }

    // ---- blocks / statements -------------------------------------------

    fn compile_block(&mut self, block: &Block) -> LuaResult<()> {
        for stat in &block.stats {
            self.compile_stat(stat)?;
        }
        Ok(())
    }

    fn compile_scoped_block(&mut self, block: &Block, is_loop: bool) -> LuaResult<Vec<usize>> {
        self.cur().enter_block(is_loop);
        self.compile_block(block)?;
        Ok(self.cur().leave_block())
    }

    fn compile_stat(&mut self, stat: &Stat) -> LuaResult<()> {
        let line = stat.line;
        match &stat.kind {
            StatKind::Expr(e) => {
                let dest = self.cur().freereg;
                self.compile_call_discard(e, dest, line)?;
            }
            StatKind::Local { names, exprs } => {
                let base = self.cur().freereg;
                self.compile_expr_list_to(exprs, base, names.len())?;
                for (i, name) in names.iter().enumerate() {
                    self.cur().locals.push(super::func_state::LocalVar { name: name.clone(), reg: base + i as u8 });
                    self.cur().proto.local_names.push(name.clone());
                }
                self.cur().free_to(base + names.len() as u8);
            }
            StatKind::Assign { targets, exprs } => {
                let base = self.cur().freereg;
                self.compile_expr_list_to(exprs, base, targets.len())?;
                for (i, target) in targets.iter().enumerate() {
                    self.assign_to(target, base + i as u8, line)?;
                }
                self.cur().free_to(base);
            }
            StatKind::Do(b) => {
                self.compile_scoped_block(b, false)?;
            }
            StatKind::While { cond, body } => self.compile_while(cond, body, line)?,
            StatKind::Repeat { body, cond } => self.compile_repeat(body, cond, line)?,
            StatKind::If { arms, else_block } => self.compile_if(arms, else_block)?,
            StatKind::NumericFor { var, start, stop, step, body } => {
                self.compile_numeric_for(var, start, stop, step.as_ref(), body, line)?
            }
            StatKind::GenericFor { names, exprs, body } => {
                self.compile_generic_for(names, exprs, body, line)?
            }
            StatKind::FunctionDecl { path, body, .. } => {
                let dest = self.cur().freereg;
                self.cur().reserve_regs(1);
                self.compile_function_body(body, line, dest)?;
                if path.len() == 1 {
                    let target = Expr::Name(path[0].clone());
                    self.assign_to(&target, dest, line)?;
                } else {
                    let mut target = Expr::Name(path[0].clone());
                    for seg in &path[1..] {
                        target = Expr::Index(Box::new(target), Box::new(Expr::Str(seg.as_bytes().to_vec())));
                    }
                    self.assign_to(&target, dest, line)?;
                }
                self.cur().free_to(dest);
            }
            StatKind::LocalFunction { name, body } => {
                let reg = self.cur().add_local(name.clone())?;
                self.compile_function_body(body, line, reg)?;
            }
            StatKind::Return(exprs) => {
                self.compile_return(exprs, line)?;
            }
            StatKind::Break => {
                let pc = self.cur().emit_asbx(OpCode::Jmp, 0, 0, line);
                self.cur().record_break(pc)?;
            }
        }
        Ok(())
    }

    fn emit_return_none(&mut self, line: u32) {
        self.cur().emit_abc(OpCode::Return, 0, 1, 0, line);
    }

    fn compile_return(&mut self, exprs: &[Expr], line: u32) -> LuaResult<()> {
        let base = self.cur().freereg;
        if exprs.is_empty() {
            self.cur().emit_abc(OpCode::Return, base as u32, 1, 0, line);
            return Ok(());
        }
        // `return f(...)` is a tail call: reuse this frame instead of
        // growing the call stack for it.
        if let [Expr::Call { func, args, method, line: cline }] = exprs {
            self.compile_tailcall(func, args, method.as_ref(), base, *cline)?;
            self.cur().emit_abc(OpCode::Return, base as u32, 0, 0, line);
            return Ok(());
        }
        let open = self.compile_expr_list_open(exprs, base)?;
        let b = if open { 0 } else { (exprs.len() + 1) as u32 };
        self.cur().emit_abc(OpCode::Return, base as u32, b, 0, line);
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &Block, line: u32) -> LuaResult<()> {
        let loop_start = self.cur().pc();
        let exit_jumps = self.compile_cond_jump_if_false(cond, line)?;
        let breaks = self.compile_scoped_block(body, true)?;
        let back = self.cur().emit_asbx(OpCode::Jmp, 0, 0, line);
        self.cur().patch_jump_to(back, loop_start);
        let here = self.cur().pc();
        for j in exit_jumps {
            self.cur().patch_jump_to(j, here);
        }
        for j in breaks {
            self.cur().patch_jump_to(j, here);
        }
        Ok(())
    }

    fn compile_repeat(&mut self, body: &Block, cond: &Expr, line: u32) -> LuaResult<()> {
        let loop_start = self.cur().pc();
        // `until` can see the loop body's locals, so this block is left
        // manually rather than via `compile_scoped_block`.
        self.cur().enter_block(true);
        self.compile_block(body)?;
        let dest = self.cur().freereg;
        self.compile_expr_to(cond, dest, line)?;
        self.cur().emit_abc(OpCode::Test, dest as u32, 0, 0, line);
        let back = self.cur().emit_asbx(OpCode::Jmp, 0, 0, line);
        self.cur().patch_jump_to(back, loop_start);
        let breaks = self.cur().leave_block();
        let here = self.cur().pc();
        for j in breaks {
            self.cur().patch_jump_to(j, here);
        }
        Ok(())
    }

    fn compile_if(&mut self, arms: &[(Expr, Block)], else_block: &Option<Block>) -> LuaResult<()> {
        let mut end_jumps = Vec::new();
        for (i, (cond, body)) in arms.iter().enumerate() {
            let line = 0;
            let false_jumps = self.compile_cond_jump_if_false(cond, line)?;
            self.compile_scoped_block(body, false)?;
            let is_last = i == arms.len() - 1 && else_block.is_none();
            if !is_last {
                let j = self.cur().emit_asbx(OpCode::Jmp, 0, 0, line);
                end_jumps.push(j);
            }
            let here = self.cur().pc();
            for j in false_jumps {
                self.cur().patch_jump_to(j, here);
            }
        }
        if let Some(else_b) = else_block {
            self.compile_scoped_block(else_b, false)?;
        }
        let here = self.cur().pc();
        for j in end_jumps {
            self.cur().patch_jump_to(j, here);
        }
        Ok(())
    }

    /// Compiles `cond`, then a `TEST`/`JMP` pair that falls through when
    /// `cond` is truthy and jumps (to a not-yet-known target, patched by
    /// the caller) when it's falsy.
    fn compile_cond_jump_if_false(&mut self, cond: &Expr, line: u32) -> LuaResult<Vec<usize>> {
        let reg = self.cur().freereg;
        self.compile_expr_to(cond, reg, line)?;
        self.cur().emit_abc(OpCode::Test, reg as u32, 0, 0, line);
        let j = self.cur().emit_asbx(OpCode::Jmp, 0, 0, line);
        Ok(vec![j])
    }

    fn compile_numeric_for(
        &mut self,
        var: &SmolStr,
        start: &Expr,
        stop: &Expr,
        step: Option<&Expr>,
        body: &Block,
        line: u32,
    ) -> LuaResult<()> {
        let base = self.cur().freereg;
        self.cur().reserve_regs(3); // internal (index, limit, step)
        self.compile_expr_to(start, base, line)?;
        self.compile_expr_to(stop, base + 1, line)?;
        if let Some(s) = step {
            self.compile_expr_to(s, base + 2, line)?;
        } else {
            let k = self.cur().add_constant(LuaValue::Number(1.0))?;
            self.cur().emit_abx(OpCode::LoadK, (base + 2) as u32, k, line);
        }
        let prep = self.cur().emit_asbx(OpCode::ForPrep, base as u32, 0, line);
        self.cur().enter_block(true);
        let var_reg = self.cur().add_local(var.clone())?;
        debug_assert_eq!(var_reg, base + 3);
        self.compile_block(body)?;
        let breaks = self.cur().leave_block();
        self.cur().patch_jump_to_here(prep);
        let loop_pc = self.cur().emit_asbx(OpCode::ForLoop, base as u32, 0, line);
        self.cur().patch_jump_to(loop_pc, prep + 1);
        let here = self.cur().pc();
        for j in breaks {
            self.cur().patch_jump_to(j, here);
        }
        self.cur().free_to(base);
        Ok(())
    }

    fn compile_generic_for(
        &mut self,
        names: &[SmolStr],
        exprs: &[Expr],
        body: &Block,
        line: u32,
    ) -> LuaResult<()> {
        let base = self.cur().freereg;
        self.cur().reserve_regs(3); // f, s, ctrl
        self.compile_expr_list_to(exprs, base, 3)?;
        let jmp = self.cur().emit_asbx(OpCode::Jmp, 0, 0, line);
        let loop_start = self.cur().pc();
        self.cur().enter_block(true);
        for name in names {
            self.cur().add_local(name.clone())?;
        }
        self.compile_block(body)?;
        let breaks = self.cur().leave_block();
        self.cur().patch_jump_to_here(jmp);
        self.cur().emit_abc(OpCode::TForCall, base as u32, 0, names.len() as u32, line);
        let tforloop = self.cur().emit_asbx(OpCode::TForLoop, base as u32, 0, line);
        self.cur().patch_jump_to(tforloop, loop_start);
        let here = self.cur().pc();
        for j in breaks {
            self.cur().patch_jump_to(j, here);
        }
        self.cur().free_to(base);
        Ok(())
    }

    fn compile_function_body(&mut self, body: &FuncBody, line: u32, dest: u8) -> LuaResult<()> {
        let source = self.funcs.last().unwrap().proto.source.clone();
        let mut fs = FuncState::new(source, body.line, &self.cfg);
        fs.proto.is_vararg = body.is_vararg;
        fs.proto.num_params = body.params.len() as u8;
        self.funcs.push(fs);
        for p in &body.params {
            self.cur().add_local(p.clone())?;
        }
        self.compile_block(&body.block)?;
        self.emit_return_none(line);
        let child = self.funcs.pop().unwrap();
        let proto_idx = {
            let parent = self.funcs.last_mut().unwrap();
            parent.proto.protos.push(Rc::new(child.proto));
            parent.proto.protos.len() as u32 - 1
        };
        self.cur().emit_abx(OpCode::Closure, dest as u32, proto_idx, line);
        Ok(())
    }

    // ---- assignment targets --------------------------------------------

    fn assign_to(&mut self, target: &Expr, src: u8, line: u32) -> LuaResult<()> {
        match target {
            Expr::Name(name) => match self.resolve_name(name)? {
                NameRef::Local(reg) => {
                    self.cur().emit_abc(OpCode::Move, reg as u32, src as u32, 0, line);
                }
                NameRef::Upval(idx) => {
                    self.cur().emit_abc(OpCode::SetUpval, src as u32, idx as u32, 0, line);
                }
                NameRef::Global(k) => {
                    self.cur().emit_abx(OpCode::SetGlobal, src as u32, k, line);
                }
            },
            Expr::Index(obj, key) => {
                let save = self.cur().freereg;
                let t = self.compile_expr_any_reg(obj, line)?;
                let k = self.compile_rk(key, line)?;
                self.cur().emit_abc(OpCode::SetTable, t as u32, k, src as u32, line);
                self.cur().free_to(save.max(t + 1));
                self.cur().free_to(save);
            }
            _ => {
                return Err(LuaError::new(LuaErrorKind::CompileError, "cannot assign to this expression"));
            }
        }
        Ok(())
    }

    // ---- expression lists -----------------------------------------------

    /// Compiles `exprs`, writing exactly `want` values starting at `base`
    /// (padding with `nil`, truncating extras) — for `local`/assignment
    /// lists. All expressions are evaluated left to right regardless of
    /// `want`, including ones whose results get discarded. If the last
    /// expression is a call or `...` and more values are wanted than the
    /// list has slots for, it's asked for exactly the remaining count
    /// instead of just one value.
    fn compile_expr_list_to(&mut self, exprs: &[Expr], base: u8, want: usize) -> LuaResult<()> {
        if exprs.is_empty() {
            for i in 0..want {
                self.cur().emit_abc(OpCode::LoadNil, (base as usize + i) as u32, 0, 0, 0);
            }
            self.cur().reserve_regs(want as u8);
            return Ok(());
        }
        let n = exprs.len();
        for (i, e) in exprs.iter().enumerate() {
            let reg = base + i as u8;
            let is_last = i + 1 == n;
            if !is_last {
                self.cur().reserve_regs(1);
                self.compile_expr_to(e, reg, 0)?;
                continue;
            }
            let needed = if want > n { want - (n - 1) } else { 1 };
            match e {
                Expr::Call { func, args, method, line: cline } => {
                    self.compile_call(func, args, method.as_ref(), reg, (needed + 1) as u32, *cline)?;
                }
                Expr::Vararg => {
                    self.cur().reserve_regs(needed as u8);
                    self.cur().emit_abc(OpCode::Vararg, reg as u32, (needed + 1) as u32, 0, 0);
                }
                _ => {
                    self.cur().reserve_regs(1);
                    self.compile_expr_to(e, reg, 0)?;
                    for j in 1..needed {
                        self.cur().reserve_regs(1);
                        self.cur().emit_abc(OpCode::LoadNil, (reg as usize + j) as u32, 0, 0, 0);
                    }
                }
            }
        }
        self.cur().free_to(base + want as u8);
        Ok(())
    }

    /// Like `compile_expr_list_to` but for call arguments / returns, where
    /// the final expression is allowed to expand to "all its results"
    /// (an open call or `...`). Returns `true` if the list ended open.
    fn compile_expr_list_open(&mut self, exprs: &[Expr], base: u8) -> LuaResult<bool> {
        for (i, e) in exprs.iter().enumerate() {
            let reg = base + i as u8;
            self.cur().reserve_regs(1);
            if i + 1 == exprs.len() {
                if is_multi_expr(e) {
                    self.compile_expr_open(e, reg, 0)?;
                    return Ok(true);
                } else {
                    self.compile_expr_to(e, reg, 0)?;
                }
            } else {
                self.compile_expr_to(e, reg, 0)?;
            }
        }
        Ok(false)
    }

    /// For a call/vararg expression in tail position of a list: emits it
    /// with "all results" (B/C = 0) semantics, leaving `top` open.
    fn compile_expr_open(&mut self, e: &Expr, dest: u8, line: u32) -> LuaResult<()> {
        match e {
            Expr::Call { func, args, method, line: cline } => {
                self.compile_call(func, args, method.as_ref(), dest, 0, *cline)?;
            }
            Expr::Vararg => {
                self.cur().emit_abc(OpCode::Vararg, dest as u32, 0, 0, line);
            }
            _ => self.compile_expr_to(e, dest, line)?,
        }
        Ok(())
    }

    // ---- single-value expressions -----------------------------------

    fn compile_expr_any_reg(&mut self, e: &Expr, line: u32) -> LuaResult<u8> {
        if let Expr::Name(name) = e {
            if let NameRef::Local(reg) = self.resolve_name(name)? {
                return Ok(reg);
            }
        }
        let reg = self.cur().freereg;
        self.cur().reserve_regs(1);
        self.compile_expr_to(e, reg, line)?;
        Ok(reg)
    }

    /// Register-or-constant operand for binary ops (`RK` encoding).
    fn compile_rk(&mut self, e: &Expr, line: u32) -> LuaResult<u32> {
        match e {
            Expr::Str(s) => {
                let k = self.const_string(s)?;
                return Ok(k | BITRK);
            }
            Expr::Number(n) => {
                let k = self.cur().add_constant(LuaValue::Number(*n))?;
                return Ok(k | BITRK);
            }
            Expr::Nil => {
                let k = self.cur().add_constant(LuaValue::Nil)?;
                return Ok(k | BITRK);
            }
            Expr::True => {
                let k = self.cur().add_constant(LuaValue::Boolean(true))?;
                return Ok(k | BITRK);
            }
            Expr::False => {
                let k = self.cur().add_constant(LuaValue::Boolean(false))?;
                return Ok(k | BITRK);
            }
            _ => {}
        }
        Ok(self.compile_expr_any_reg(e, line)? as u32)
    }

    fn compile_call_discard(&mut self, e: &Expr, dest: u8, line: u32) -> LuaResult<()> {
        match e {
            Expr::Call { func, args, method, line: cline } => {
                self.compile_call(func, args, method.as_ref(), dest, 1, *cline)?;
            }
            _ => return Err(LuaError::new(LuaErrorKind::CompileError, "syntax error (expression has no effect)")),
        }
        let _ = line;
        Ok(())
    }

    /// `nresults_plus1`: `0` for "all results" (open call), else `n+1` Lua
    /// C-encoding for "exactly n results".
    fn compile_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        method: Option<&SmolStr>,
        dest: u8,
        nresults_plus1: u32,
        line: u32,
    ) -> LuaResult<()> {
        self.cur().free_to(dest);
        self.cur().reserve_regs(1);
        self.compile_expr_to(func, dest, line)?;
        let mut next = dest + 1;
        if let Some(m) = method {
            self.cur().reserve_regs(1);
            let k = self.const_string(m.as_bytes())?;
            self.cur().emit_abc(OpCode::Self_, dest as u32, dest as u32, k | BITRK, line);
            next = dest + 2;
        }
        self.cur().free_to(next);
        let arg_base = next;
        let open = self.compile_expr_list_open(args, arg_base)?;
        let nargs_plus1 = if open { 0 } else { args.len() as u32 + 1 };
        self.cur().emit_abc(OpCode::Call, dest as u32, nargs_plus1, nresults_plus1, line);
        if nresults_plus1 == 0 {
            self.cur().free_to(dest + 1);
        } else {
            self.cur().free_to(dest + (nresults_plus1 - 1) as u8);
        }
        Ok(())
    }

    /// Like [`Self::compile_call`], but emits `TAILCALL` instead of `CALL`
    /// — only ever used from `return f(...)` tail position.
    fn compile_tailcall(
        &mut self,
        func: &Expr,
        args: &[Expr],
        method: Option<&SmolStr>,
        dest: u8,
        line: u32,
    ) -> LuaResult<()> {
        self.cur().free_to(dest);
        self.cur().reserve_regs(1);
        self.compile_expr_to(func, dest, line)?;
        let mut next = dest + 1;
        if let Some(m) = method {
            self.cur().reserve_regs(1);
            let k = self.const_string(m.as_bytes())?;
            self.cur().emit_abc(OpCode::Self_, dest as u32, dest as u32, k | BITRK, line);
            next = dest + 2;
        }
        self.cur().free_to(next);
        let arg_base = next;
        let open = self.compile_expr_list_open(args, arg_base)?;
        let nargs_plus1 = if open { 0 } else { args.len() as u32 + 1 };
        self.cur().emit_abc(OpCode::TailCall, dest as u32, nargs_plus1, 0, line);
        Ok(())
    }

    fn compile_expr_to(&mut self, e: &Expr, dest: u8, line: u32) -> LuaResult<()> {
        match e {
            Expr::Nil => {
                self.cur().emit_abc(OpCode::LoadNil, dest as u32, 0, 0, line);
            }
            Expr::True => {
                self.cur().emit_abc(OpCode::LoadBool, dest as u32, 1, 0, line);
            }
            Expr::False => {
                self.cur().emit_abc(OpCode::LoadBool, dest as u32, 0, 0, line);
            }
            Expr::Number(n) => {
                let k = self.cur().add_constant(LuaValue::Number(*n))?;
                self.cur().emit_abx(OpCode::LoadK, dest as u32, k, line);
            }
            Expr::Str(s) => {
                let k = self.const_string(s)?;
                self.cur().emit_abx(OpCode::LoadK, dest as u32, k, line);
            }
            Expr::Vararg => {
                self.cur().emit_abc(OpCode::Vararg, dest as u32, 2, 0, line);
            }
            Expr::Name(name) => match self.resolve_name(name)? {
                NameRef::Local(reg) => {
                    if reg != dest {
                        self.cur().emit_abc(OpCode::Move, dest as u32, reg as u32, 0, line);
                    }
                }
                NameRef::Upval(idx) => {
                    self.cur().emit_abc(OpCode::GetUpval, dest as u32, idx as u32, 0, line);
                }
                NameRef::Global(k) => {
                    self.cur().emit_abx(OpCode::GetGlobal, dest as u32, k, line);
                }
            },
            Expr::Index(obj, key) => {
                let save = self.cur().freereg;
                let t = self.compile_expr_any_reg(obj, line)?;
                let k = self.compile_rk(key, line)?;
                self.cur().emit_abc(OpCode::GetTable, dest as u32, t as u32, k, line);
                self.cur().free_to(save);
            }
            Expr::Paren(inner) => {
                self.compile_expr_to(inner, dest, line)?;
            }
            Expr::Call { func, args, method, line: cline } => {
                self.compile_call(func, args, method.as_ref(), dest, 2, *cline)?;
            }
            Expr::Function(body) => {
                self.compile_function_body(body, line, dest)?;
            }
            Expr::Table(fields) => {
                self.compile_table(fields, dest, line)?;
            }
            Expr::Unop(op, operand, oline) => {
                let save = self.cur().freereg;
                let src = self.compile_expr_any_reg(operand, *oline)?;
                let opc = match op {
                    UnOp::Neg => OpCode::Unm,
                    UnOp::Not => OpCode::Not,
                    UnOp::Len => OpCode::Len,
                };
                self.cur().emit_abc(opc, dest as u32, src as u32, 0, *oline);
                self.cur().free_to(save);
            }
            Expr::Binop(op, lhs, rhs, oline) => {
                self.compile_binop(*op, lhs, rhs, dest, *oline)?;
            }
        }
        Ok(())
    }

    fn compile_binop(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, dest: u8, line: u32) -> LuaResult<()> {
        match op {
            BinOp::And => {
                self.compile_expr_to(lhs, dest, line)?;
                self.cur().emit_abc(OpCode::Test, dest as u32, 0, 0, line);
                let skip = self.cur().emit_asbx(OpCode::Jmp, 0, 0, line);
                self.compile_expr_to(rhs, dest, line)?;
                self.cur().patch_jump_to_here(skip);
                return Ok(());
            }
            BinOp::Or => {
                self.compile_expr_to(lhs, dest, line)?;
                self.cur().emit_abc(OpCode::Test, dest as u32, 0, 1, line);
                let skip = self.cur().emit_asbx(OpCode::Jmp, 0, 0, line);
                self.compile_expr_to(rhs, dest, line)?;
                self.cur().patch_jump_to_here(skip);
                return Ok(());
            }
            _ => {}
        }
        let save = self.cur().freereg;
        if op == BinOp::Concat {
            // CONCAT takes a contiguous register range R[b..=c], so both
            // operands must land in adjacent fresh registers rather than
            // using RK operands.
            let b = self.compile_expr_any_reg(lhs, line)?;
            self.cur().free_to(b + 1);
            self.cur().reserve_regs(1);
            let c = self.compile_expr_any_reg(rhs, line)?;
            self.cur().emit_abc(OpCode::Concat, dest as u32, b as u32, c as u32, line);
            self.cur().free_to(save);
            return Ok(());
        }
        let b = self.compile_rk(lhs, line)?;
        let c = self.compile_rk(rhs, line)?;
        let opc = match op {
            BinOp::Add => OpCode::Add,
            BinOp::Sub => OpCode::Sub,
            BinOp::Mul => OpCode::Mul,
            BinOp::Div => OpCode::Div,
            BinOp::Mod => OpCode::Mod,
            BinOp::Pow => OpCode::Pow,
            BinOp::Eq => OpCode::Eq,
            BinOp::Ne => OpCode::Eq,
            BinOp::Lt => OpCode::Lt,
            BinOp::Gt => OpCode::Lt,
            BinOp::Le => OpCode::Le,
            BinOp::Ge => OpCode::Le,
            _ => unreachable!(),
        };
        match op {
            BinOp::Eq | BinOp::Lt | BinOp::Le => {
                self.emit_compare_to_bool(opc, 1, b, c, dest, line);
            }
            BinOp::Ne => {
                self.emit_compare_to_bool(opc, 0, b, c, dest, line);
            }
            // a > b  ==  b < a ; a >= b  ==  b <= a
            BinOp::Gt | BinOp::Ge => {
                self.emit_compare_to_bool(opc, 1, c, b, dest, line);
            }
            _ => {
                self.cur().emit_abc(opc, dest as u32, b, c, line);
            }
        }
        self.cur().free_to(save);
        Ok(())
    }

    /// Compiles a comparison opcode (`EQ`/`LT`/`LE`, which branch rather
    /// than produce a value) into a proper boolean in `dest`, using the
    /// standard `OP A B C; JMP +1; LOADBOOL dest,0,1; LOADBOOL dest,1,0`
    /// shape.
    fn emit_compare_to_bool(&mut self, opc: OpCode, want: u32, b: u32, c: u32, dest: u8, line: u32) {
        self.cur().emit_abc(opc, want, b, c, line);
        let jmp = self.cur().emit_asbx(OpCode::Jmp, 0, 0, line);
        self.cur().emit_abc(OpCode::LoadBool, dest as u32, 0, 1, line);
        self.cur().patch_jump_to_here(jmp);
        self.cur().emit_abc(OpCode::LoadBool, dest as u32, 1, 0, line);
    }

    fn compile_table(&mut self, fields: &[TableField], dest: u8, line: u32) -> LuaResult<()> {
        self.cur().emit_abc(OpCode::NewTable, dest as u32, 0, 0, line);
        self.cur().free_to(dest + 1);
        let block_base = self.cur().freereg;
        let mut pending = 0usize;
        // 1-indexed SETLIST batch number (LFIELDS_PER_FLUSH = 50 per batch).
        let mut block_num = 1u32;
        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(e) => {
                    let is_last = i == fields.len() - 1;
                    let reg = self.cur().freereg;
                    self.cur().reserve_regs(1);
                    if is_last && is_multi_expr(e) {
                        self.compile_expr_open(e, reg, line)?;
                        self.cur().emit_abc(OpCode::SetList, dest as u32, 0, block_num, line);
                        self.cur().free_to(block_base);
                        continue;
                    }
                    self.compile_expr_to(e, reg, line)?;
                    pending += 1;
                    if pending == 50 {
                        self.cur().emit_abc(OpCode::SetList, dest as u32, pending as u32, block_num, line);
                        self.cur().free_to(block_base);
                        block_num += 1;
                        pending = 0;
                    }
                }
                TableField::Named(name, e) => {
                    let save2 = self.cur().freereg;
                    let vreg = self.cur().freereg;
                    self.cur().reserve_regs(1);
                    self.compile_expr_to(e, vreg, line)?;
                    let k = self.const_string(name.as_bytes())?;
                    self.cur().emit_abc(OpCode::SetTable, dest as u32, k | BITRK, vreg as u32, line);
                    self.cur().free_to(save2);
                }
                TableField::Indexed(key, value) => {
                    let save2 = self.cur().freereg;
                    let kreg = self.compile_rk(key, line)?;
                    let vreg = self.cur().freereg;
                    self.cur().reserve_regs(1);
                    self.compile_expr_to(value, vreg, line)?;
                    self.cur().emit_abc(OpCode::SetTable, dest as u32, kreg, vreg as u32, line);
                    self.cur().free_to(save2);
                }
            }
        }
        if pending > 0 {
            self.cur().emit_abc(OpCode::SetList, dest as u32, pending as u32, block_num, line);
            self.cur().free_to(block_base);
        }
        self.cur().free_to(dest + 1);
        Ok(())
    }
}

fn is_multi_expr(e: &Expr) -> bool {
    matches!(e, Expr::Call { .. } | Expr::Vararg)
}

fn block_end_line(block: &Block) -> u32 {
    block.stats.last().map(|s| s.line).unwrap_or(0)
}
