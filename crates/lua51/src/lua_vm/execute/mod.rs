//! The bytecode dispatch loop (spec §4.3/§4.4). Calls are iterative rather
//! than recursive: a Lua-to-Lua call just pushes another [`CallFrame`] and
//! the same loop keeps stepping, so `coroutine.yield` can unwind out of any
//! depth of Lua calls as an `Err(LuaErrorKind::Yield)` without needing a
//! real second stack.

mod index;

pub use index::{get_index, set_index};

use crate::gc::{FunctionId, ThreadId, UpvalueId};
use crate::lua_value::closure::{Closure, Upvalue};
use crate::lua_value::LuaValue;
use crate::lua_vm::arithmetic as ar;
use crate::lua_vm::call_frame::{CallFrame, FrameKind};
use crate::lua_vm::error::{LuaError, LuaErrorKind, LuaResult};
use crate::lua_vm::lua_state::{LuaState, ThreadStatus};
use crate::lua_vm::opcode::{is_k, rk_as_k, Instruction, OpCode};

/// Call any callable value with already-evaluated arguments, run it to
/// completion, and return its results. Used for the `CALL`/`TAILCALL`
/// opcodes, metamethod dispatch, and the host-facing `lua_state::call`.
pub fn call_value(
    state: &mut LuaState,
    func: LuaValue,
    mut args: Vec<LuaValue>,
    nresults: i32,
) -> LuaResult<Vec<LuaValue>> {
    let depth = state.exec().call_stack.len();
    if let Some(e) = crate::lua_vm::lua_state::stack_overflow(depth, state.vm.config.max_call_depth) {
        return Err(e);
    }

    let closure_id = match func {
        LuaValue::Function(id) => id,
        other => {
            // `__call`: the metamethod is invoked with `other` prepended.
            if let Some(mt) = state.vm.metatable_of(other) {
                let key = state.vm.heap.find_string(b"__call");
                let mm = key.map(|k| state.vm.heap.tables.get(mt.0).get(&LuaValue::String(k)));
                if let Some(mm) = mm.filter(|v| !v.is_nil()) {
                    args.insert(0, other);
                    return call_value(state, mm, args, nresults);
                }
            }
            return Err(state.error(format!("attempt to call a {} value", other.type_name())));
        }
    };

    let base = state.exec().stack.len();
    match state.vm.heap.functions.get(closure_id.0) {
        Closure::Host(_) => {
            state.exec_mut().stack.extend(args.iter().copied());
            let top_before = state.exec().stack.len();
            let frame = CallFrame::new(closure_id, base, nresults, FrameKind::Host);
            state.exec_mut().call_stack.push(frame);
            let func_ptr = match state.vm.heap.functions.get(closure_id.0) {
                Closure::Host(h) => h.func,
                _ => unreachable!(),
            };
            let produced_result = func_ptr(state);
            state.exec_mut().call_stack.pop();
            let produced = produced_result?;
            let stack = &mut state.exec_mut().stack;
            let results_start = stack.len().saturating_sub(produced).max(top_before.min(stack.len()));
            let mut results: Vec<LuaValue> = stack.split_off(results_start.min(stack.len()));
            stack.truncate(base);
            if nresults >= 0 {
                results.resize(nresults as usize, LuaValue::Nil);
            }
            Ok(results)
        }
        Closure::Lua(_) => {
            push_lua_frame(state, closure_id, args, base, base, nresults, false)?;

            run_until(state, depth)?;

            let stack = &mut state.exec_mut().stack;
            let mut results = if stack.len() > base {
                stack.split_off(base)
            } else {
                Vec::new()
            };
            stack.truncate(base);
            if nresults >= 0 {
                results.resize(nresults as usize, LuaValue::Nil);
            }
            Ok(results)
        }
    }
}

/// Set up a new [`CallFrame`] for a Lua closure and push it. `dest`/`inline`
/// describe what happens to its eventual results: `inline` frames (pushed
/// directly by [`do_call`]/`TFORCALL` for a plain Lua-to-Lua call) have them
/// copied straight into the frame below by [`deposit_return`]; non-inline
/// frames (every call that originates in Rust — the top-level entry point,
/// metamethod dispatch, `pcall`, tail calls into a host function) leave them
/// sitting at `dest` for the Rust caller to collect itself.
fn push_lua_frame(
    state: &mut LuaState,
    closure_id: FunctionId,
    mut args: Vec<LuaValue>,
    base: usize,
    dest: usize,
    nresults: i32,
    inline: bool,
) -> LuaResult<()> {
    let proto = match state.vm.heap.functions.get(closure_id.0) {
        Closure::Lua(lc) => lc.proto.clone(),
        Closure::Host(_) => unreachable!("push_lua_frame called with a host closure"),
    };
    let nparams = proto.num_params as usize;
    let mut varargs = Vec::new();
    if args.len() > nparams {
        if proto.is_vararg {
            varargs = args.split_off(nparams);
        } else {
            args.truncate(nparams);
        }
    }
    args.resize(nparams, LuaValue::Nil);
    let max_stack = proto.max_stack_size as usize;
    state.exec_mut().stack.truncate(base);
    state.exec_mut().stack.extend(args);
    let pad = base + max_stack.max(nparams);
    if state.exec().stack.len() < pad {
        state.exec_mut().stack.resize(pad, LuaValue::Nil);
    }
    let mut frame = CallFrame::new(closure_id, base, nresults, FrameKind::Lua);
    frame.varargs = varargs;
    frame.top = pad;
    frame.dest = dest;
    frame.inline_return = inline;
    state.exec_mut().call_stack.push(frame);
    Ok(())
}

/// Write a returning frame's results to wherever its caller expects them —
/// either straight into a live caller `CallFrame`'s registers (`inline`), or
/// left on the stack at `dest` for a Rust-level caller (`call_value`) to
/// harvest via its own `split_off`.
fn deposit_return(state: &mut LuaState, dest: usize, want: i32, inline: bool, mut results: Vec<LuaValue>) {
    if want >= 0 {
        results.resize(want as usize, LuaValue::Nil);
    }
    if inline {
        let frame_top = dest + results.len();
        let stack = &mut state.exec_mut().stack;
        if stack.len() < frame_top {
            stack.resize(frame_top, LuaValue::Nil);
        }
        for (i, v) in results.into_iter().enumerate() {
            stack[dest + i] = v;
        }
        if want == -1 {
            if let Some(caller) = state.exec_mut().call_stack.last_mut() {
                caller.top = frame_top;
            }
        }
    } else {
        let stack = &mut state.exec_mut().stack;
        stack.truncate(dest);
        stack.extend(results);
    }
}

/// `LuaState::call`: operands are already on the stack as
/// `func, arg1, .. argn` ending at the current top.
pub fn call_from_host(state: &mut LuaState, n_args: i32, n_results: i32) -> LuaResult<()> {
    let top = state.exec().stack.len();
    let first = top - n_args as usize - 1;
    let func = state.exec().stack[first];
    let args: Vec<LuaValue> = state.exec().stack[first + 1..].to_vec();
    state.exec_mut().stack.truncate(first);
    let results = call_value(state, func, args, n_results)?;
    state.exec_mut().stack.extend(results);
    Ok(())
}

pub fn pcall_from_host(state: &mut LuaState, n_args: i32, n_results: i32) -> LuaResult<bool> {
    let top = state.exec().stack.len();
    let first = top - n_args as usize - 1;
    let func = state.exec().stack[first];
    let args: Vec<LuaValue> = state.exec().stack[first + 1..].to_vec();
    state.exec_mut().stack.truncate(first);
    let call_depth_before = state.exec().call_stack.len();
    match call_value(state, func, args, n_results) {
        Ok(results) => {
            state.push_boolean(true);
            state.exec_mut().stack.extend(results);
            Ok(true)
        }
        Err(e) if e.kind != LuaErrorKind::Yield => {
            // Unwind any frames/values a failed call left dangling below
            // the point where it was invoked, so the caller's stack looks
            // exactly as it would have if the call had never happened.
            state.exec_mut().call_stack.truncate(call_depth_before);
            state.exec_mut().stack.truncate(first);
            state.push_boolean(false);
            let v = e.value_or_message(state);
            let _ = state.push_value(v);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

impl LuaError {
    /// The value a protected call should see: whatever `error()` raised, or
    /// the rendered message for a VM-detected error.
    pub fn value_or_message(&self, state: &mut LuaState) -> LuaValue {
        if self.value.is_nil() {
            state.make_string(self.message.as_bytes())
        } else {
            self.value
        }
    }
}

/// Run the top frame (and anything it calls) until the call stack falls
/// back to `stop_depth` frames — i.e. until the frame we were asked to run
/// returns.
pub(crate) fn run_until(state: &mut LuaState, stop_depth: usize) -> LuaResult<()> {
    while state.exec().call_stack.len() > stop_depth {
        step(state)?;
    }
    Ok(())
}

fn find_or_create_upvalue(state: &mut LuaState, stack_index: usize) -> UpvalueId {
    let thread = state.thread;
    let pos = state
        .exec()
        .open_upvalues
        .iter()
        .position(|(idx, _)| *idx == stack_index);
    if let Some(pos) = pos {
        return state.exec().open_upvalues[pos].1;
    }
    let id = state.vm.heap.alloc_upvalue(Upvalue::open(stack_index, thread));
    let list = &mut state.exec_mut().open_upvalues;
    let insert_at = list.partition_point(|(idx, _)| *idx < stack_index);
    list.insert(insert_at, (stack_index, id));
    id
}

fn close_upvalues_from(state: &mut LuaState, from_index: usize) {
    let list = &mut state.exec_mut().open_upvalues;
    let cut = list.partition_point(|(idx, _)| *idx < from_index);
    let closing: Vec<(usize, UpvalueId)> = list.split_off(cut);
    for (idx, id) in closing {
        let value = state.exec().stack.get(idx).copied().unwrap_or(LuaValue::Nil);
        *state.vm.heap.upvalues.get_mut(id.0) = Upvalue::Closed(value);
    }
}

fn proto_of(state: &LuaState, closure: FunctionId) -> std::rc::Rc<crate::compiler::Proto> {
    match state.vm.heap.functions.get(closure.0) {
        Closure::Lua(lc) => lc.proto.clone(),
        Closure::Host(_) => unreachable!("host frame has no proto"),
    }
}

/// Execute exactly one bytecode instruction for the current top frame.
fn step(state: &mut LuaState) -> LuaResult<()> {
    if state.vm.heap.needs_collection() {
        let thread = state.thread;
        state.vm.collect_garbage(thread);
    }
    let (closure, base, pc) = {
        let frame = state.exec().call_stack.last().expect("no active frame");
        (frame.closure, frame.base, frame.pc)
    };
    let proto = proto_of(state, closure);
    let instr: Instruction = *proto.code.get(pc).unwrap_or_else(|| {
        proto
            .code
            .last()
            .expect("empty proto should have trailing RETURN")
    });
    let line = proto.line_at(pc);
    state.exec_mut().call_stack.last_mut().unwrap().pc = pc + 1;

    macro_rules! reg {
        ($i:expr) => {
            state.exec().stack[base + $i as usize]
        };
    }
    macro_rules! set_reg {
        ($i:expr, $v:expr) => {
            state.exec_mut().stack[base + $i as usize] = $v
        };
    }
    let rk = |state: &LuaState, x: u32| -> LuaValue {
        if is_k(x) {
            proto.constants[rk_as_k(x) as usize]
        } else {
            state.exec().stack[base + x as usize]
        }
    };

    let a = instr.a() as usize;
    match instr.op() {
        OpCode::Move => {
            let v = reg!(instr.b());
            set_reg!(a, v);
        }
        OpCode::LoadK => {
            let k = proto.constants[instr.bx() as usize];
            set_reg!(a, k);
        }
        OpCode::LoadBool => {
            set_reg!(a, LuaValue::Boolean(instr.b() != 0));
            if instr.c() != 0 {
                state.exec_mut().call_stack.last_mut().unwrap().pc += 1;
            }
        }
        OpCode::LoadNil => {
            for i in a..=(a + instr.b() as usize) {
                set_reg!(i, LuaValue::Nil);
            }
        }
        OpCode::GetUpval => {
            let uv_id = upvalue_id(state, closure, instr.b() as usize);
            let v = read_upvalue(state, uv_id);
            set_reg!(a, v);
        }
        OpCode::SetUpval => {
            let uv_id = upvalue_id(state, closure, instr.b() as usize);
            let v = reg!(a);
            write_upvalue(state, uv_id, v);
        }
        OpCode::GetGlobal => {
            let key = proto.constants[instr.bx() as usize];
            let globals = LuaValue::Table(state.vm.globals);
            let v = index::get_index(state, globals, key, line)?;
            set_reg!(a, v);
        }
        OpCode::SetGlobal => {
            let key = proto.constants[instr.bx() as usize];
            let globals = LuaValue::Table(state.vm.globals);
            let v = reg!(a);
            index::set_index(state, globals, key, v, line)?;
        }
        OpCode::GetTable => {
            let t = reg!(instr.b());
            let key = rk(state, instr.c());
            let v = index::get_index(state, t, key, line)?;
            set_reg!(a, v);
        }
        OpCode::SetTable => {
            let t = reg!(a);
            let key = rk(state, instr.b());
            let v = rk(state, instr.c());
            index::set_index(state, t, key, v, line)?;
        }
        OpCode::NewTable => {
            let t = state.create_table(instr.b() as usize, instr.c() as usize);
            set_reg!(a, t);
        }
        OpCode::Self_ => {
            let t = reg!(instr.b());
            let key = rk(state, instr.c());
            set_reg!(a + 1, t);
            let v = index::get_index(state, t, key, line)?;
            set_reg!(a, v);
        }
        OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
            let x = rk(state, instr.b());
            let y = rk(state, instr.c());
            let r = with_position(state, line, |s| ar::binary_arith(s, instr.op(), x, y))?;
            set_reg!(a, r);
        }
        OpCode::Unm => {
            let x = reg!(instr.b());
            let r = with_position(state, line, |s| ar::unary_minus(s, x))?;
            set_reg!(a, r);
        }
        OpCode::Not => {
            let x = reg!(instr.b());
            set_reg!(a, LuaValue::Boolean(!x.is_truthy()));
        }
        OpCode::Len => {
            let x = reg!(instr.b());
            let r = with_position(state, line, |s| ar::length(s, x))?;
            set_reg!(a, r);
        }
        OpCode::Concat => {
            let (b, c) = (instr.b() as usize, instr.c() as usize);
            let mut acc = reg!(c);
            let mut i = c;
            while i > b {
                i -= 1;
                let left = reg!(i);
                acc = with_position(state, line, |s| ar::concat(s, left, acc))?;
            }
            set_reg!(a, acc);
        }
        OpCode::Jmp => {
            state.exec_mut().call_stack.last_mut().unwrap().pc =
                (pc as i64 + 1 + instr.sbx() as i64) as usize;
        }
        OpCode::Eq => {
            let x = rk(state, instr.b());
            let y = rk(state, instr.c());
            let eq = with_position(state, line, |s| ar::equals(s, x, y))?;
            if eq != (a != 0) {
                state.exec_mut().call_stack.last_mut().unwrap().pc += 1;
            }
        }
        OpCode::Lt => {
            let x = rk(state, instr.b());
            let y = rk(state, instr.c());
            let lt = with_position(state, line, |s| ar::less_than(s, x, y))?;
            if lt != (a != 0) {
                state.exec_mut().call_stack.last_mut().unwrap().pc += 1;
            }
        }
        OpCode::Le => {
            let x = rk(state, instr.b());
            let y = rk(state, instr.c());
            let le = with_position(state, line, |s| ar::less_equal(s, x, y))?;
            if le != (a != 0) {
                state.exec_mut().call_stack.last_mut().unwrap().pc += 1;
            }
        }
        OpCode::Test => {
            let v = reg!(a);
            if v.is_truthy() != (instr.c() != 0) {
                state.exec_mut().call_stack.last_mut().unwrap().pc += 1;
            }
        }
        OpCode::TestSet => {
            let v = reg!(instr.b());
            if v.is_truthy() == (instr.c() != 0) {
                set_reg!(a, v);
            } else {
                state.exec_mut().call_stack.last_mut().unwrap().pc += 1;
            }
        }
        OpCode::Call => {
            do_call(state, a, instr.b() as i32, instr.c() as i32, line)?;
        }
        OpCode::TailCall => {
            do_tailcall(state, base, a, instr.b() as i32, line)?;
        }
        OpCode::Return => {
            let b = instr.b() as i32;
            return do_return(state, base, a, b);
        }
        OpCode::ForPrep => {
            let init = state
                .coerce_to_number(reg!(a))
                .ok_or_else(|| state.error("'for' initial value must be a number".into()))?;
            let limit = state
                .coerce_to_number(reg!(a + 1))
                .ok_or_else(|| state.error("'for' limit must be a number".into()))?;
            let step_v = state
                .coerce_to_number(reg!(a + 2))
                .ok_or_else(|| state.error("'for' step must be a number".into()))?;
            set_reg!(a, LuaValue::Number(init - step_v));
            set_reg!(a + 1, LuaValue::Number(limit));
            set_reg!(a + 2, LuaValue::Number(step_v));
            state.exec_mut().call_stack.last_mut().unwrap().pc =
                (pc as i64 + 1 + instr.sbx() as i64) as usize;
        }
        OpCode::ForLoop => {
            let step_v = reg!(a + 2).as_number().unwrap_or(1.0);
            let limit = reg!(a + 1).as_number().unwrap_or(0.0);
            let cur = reg!(a).as_number().unwrap_or(0.0) + step_v;
            let continue_loop = if step_v > 0.0 { cur <= limit } else { cur >= limit };
            set_reg!(a, LuaValue::Number(cur));
            if continue_loop {
                set_reg!(a + 3, LuaValue::Number(cur));
                state.exec_mut().call_stack.last_mut().unwrap().pc =
                    (pc as i64 + 1 + instr.sbx() as i64) as usize;
            }
        }
        OpCode::TForCall => {
            let f = reg!(a);
            let s = reg!(a + 1);
            let ctrl = reg!(a + 2);
            let nres = instr.c() as i32;
            let dest = base + a + 3;
            match call_value(state, f, vec![s, ctrl], nres) {
                Ok(results) => {
                    for (i, v) in results.into_iter().enumerate() {
                        set_reg!(a + 3 + i, v);
                    }
                }
                Err(e) if e.kind == LuaErrorKind::Yield => {
                    state.exec_mut().call_stack.last_mut().unwrap().pending_resume =
                        Some((dest, nres));
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        OpCode::TForLoop => {
            let first = reg!(a + 3);
            if !first.is_nil() {
                set_reg!(a + 2, first);
                state.exec_mut().call_stack.last_mut().unwrap().pc =
                    (pc as i64 + 1 + instr.sbx() as i64) as usize;
            }
        }
        OpCode::SetList => {
            let t = reg!(a);
            let count = instr.b() as usize;
            let block = instr.c() as usize;
            let values: Vec<LuaValue> = if count == 0 {
                let top = state.exec().call_stack.last().unwrap().top;
                (base + a + 1..top).map(|i| state.exec().stack[i]).collect()
            } else {
                (1..=count).map(|i| reg!(a + i)).collect()
            };
            for (i, v) in values.into_iter().enumerate() {
                index::set_index(
                    state,
                    t,
                    LuaValue::Number(((block - 1) * 50 + i + 1) as f64),
                    v,
                    line,
                )?;
            }
        }
        OpCode::Close => {
            close_upvalues_from(state, base + a);
        }
        OpCode::Closure => {
            let nested = proto.protos[instr.bx() as usize].clone();
            let mut upvalues = Vec::with_capacity(nested.upvalues.len());
            for desc in &nested.upvalues {
                let id = if desc.is_local {
                    find_or_create_upvalue(state, base + desc.index as usize)
                } else {
                    upvalue_id(state, closure, desc.index as usize)
                };
                upvalues.push(id);
            }
            let lc = crate::lua_value::closure::LuaClosure { proto: nested, upvalues };
            let id = state.vm.heap.alloc_closure(Closure::Lua(lc));
            set_reg!(a, LuaValue::Function(id));
        }
        OpCode::Vararg => {
            let varargs = state.exec().call_stack.last().unwrap().varargs.clone();
            let b = instr.b() as i32;
            let n = if b == 0 { varargs.len() } else { (b - 1) as usize };
            for i in 0..n {
                set_reg!(a + i, varargs.get(i).copied().unwrap_or(LuaValue::Nil));
            }
            if b == 0 {
                let top = base + a + n;
                state.exec_mut().call_stack.last_mut().unwrap().top = top;
            }
        }
    }
    Ok(())
}

fn with_position<T>(
    state: &mut LuaState,
    line: u32,
    f: impl FnOnce(&mut LuaState) -> LuaResult<T>,
) -> LuaResult<T> {
    state.vm.current_line = line;
    f(state)
}

fn upvalue_id(state: &LuaState, closure: FunctionId, index: usize) -> UpvalueId {
    match state.vm.heap.functions.get(closure.0) {
        Closure::Lua(lc) => lc.upvalues[index],
        Closure::Host(_) => unreachable!("host closures have no Lua upvalues"),
    }
}

fn read_upvalue(state: &LuaState, id: UpvalueId) -> LuaValue {
    match state.vm.heap.upvalues.get(id.0) {
        Upvalue::Closed(v) => *v,
        Upvalue::Open { stack_index, thread } => {
            // Open upvalues always point into the thread that created them;
            // cross-thread upvalues can't happen in 5.1 (coroutines don't
            // share locals), so this thread must be `state.thread`.
            debug_assert_eq!(*thread, state.thread);
            state.exec().stack[*stack_index]
        }
    }
}

fn write_upvalue(state: &mut LuaState, id: UpvalueId, v: LuaValue) {
    let stack_index = match state.vm.heap.upvalues.get(id.0) {
        Upvalue::Closed(_) => None,
        Upvalue::Open { stack_index, .. } => Some(*stack_index),
    };
    match stack_index {
        Some(idx) => state.exec_mut().stack[idx] = v,
        None => *state.vm.heap.upvalues.get_mut(id.0) = Upvalue::Closed(v),
    }
}

fn do_call(state: &mut LuaState, a: usize, b: i32, c: i32, line: u32) -> LuaResult<()> {
    let base = state.exec().call_stack.last().unwrap().base;
    let func = state.exec().stack[base + a];
    let args: Vec<LuaValue> = if b == 0 {
        let top = state.exec().call_stack.last().unwrap().top;
        state.exec().stack[base + a + 1..top].to_vec()
    } else {
        (1..b as usize).map(|i| state.exec().stack[base + a + i]).collect()
    };
    let nresults = if c == 0 { -1 } else { c - 1 };
    let dest = base + a;
    state.vm.current_line = line;

    // A direct call to a Lua closure is pushed and left for the same
    // dispatch loop to keep stepping — no Rust recursion, so a `yield`
    // arbitrarily far below can unwind straight back to `resume` and this
    // frame's results get filled in later by `deposit_return`. Anything
    // else (a host function, or a value that needs `__call`) has to go
    // through `call_value` and really does recurse on the Rust stack.
    if let LuaValue::Function(id) = func {
        if matches!(state.vm.heap.functions.get(id.0), Closure::Lua(_)) {
            let depth = state.exec().call_stack.len();
            if let Some(e) = crate::lua_vm::lua_state::stack_overflow(depth, state.vm.config.max_call_depth) {
                return Err(e);
            }
            let new_base = state.exec().stack.len();
            return push_lua_frame(state, id, args, new_base, dest, nresults, true);
        }
    }

    match call_value(state, func, args, nresults) {
        Ok(results) => {
            deposit_return(state, dest, nresults, true, results);
            Ok(())
        }
        Err(e) if e.kind == LuaErrorKind::Yield => {
            state.exec_mut().call_stack.last_mut().unwrap().pending_resume = Some((dest, nresults));
            Err(e)
        }
        Err(e) => Err(e),
    }
}

/// `TAILCALL A B`: calls `R[A](R[A+1], .., R[A+B-2])` in tail position.
///
/// When the callee is itself a Lua closure, the current [`CallFrame`] is
/// mutated in place and reused for the callee's execution instead of
/// pushing a new one — this is what keeps a tail-recursive loop from
/// growing either the Lua call-frame count or the native Rust stack no
/// matter how many times it recurses (spec §4.4 "no net growth in call
/// frame count"). A host callee (or one reached through `__call`) can't be
/// resumed in place, so it falls back to an ordinary call whose results are
/// deposited as this frame's return values.
fn do_tailcall(state: &mut LuaState, base: usize, a: usize, b: i32, line: u32) -> LuaResult<()> {
    let func = state.exec().stack[base + a];
    let args: Vec<LuaValue> = if b == 0 {
        let top = state.exec().call_stack.last().unwrap().top;
        state.exec().stack[base + a + 1..top].to_vec()
    } else {
        (1..b as usize).map(|i| state.exec().stack[base + a + i]).collect()
    };
    state.vm.current_line = line;

    // Locals of the returning frame go out of scope here, same as on a
    // normal return.
    close_upvalues_from(state, base);

    let reusable = match func {
        LuaValue::Function(id) => matches!(state.vm.heap.functions.get(id.0), Closure::Lua(_)),
        _ => false,
    };

    if let LuaValue::Function(closure_id) = func {
        if reusable {
            let mut args = args;
            let proto = match state.vm.heap.functions.get(closure_id.0) {
                Closure::Lua(lc) => lc.proto.clone(),
                Closure::Host(_) => unreachable!(),
            };
            let nparams = proto.num_params as usize;
            let mut varargs = Vec::new();
            if args.len() > nparams {
                if proto.is_vararg {
                    varargs = args.split_off(nparams);
                } else {
                    args.truncate(nparams);
                }
            }
            args.resize(nparams, LuaValue::Nil);
            let max_stack = proto.max_stack_size as usize;
            state.exec_mut().stack.truncate(base);
            state.exec_mut().stack.extend(args);
            let pad = base + max_stack.max(nparams);
            if state.exec().stack.len() < pad {
                state.exec_mut().stack.resize(pad, LuaValue::Nil);
            }
            let frame = state.exec_mut().call_stack.last_mut().unwrap();
            frame.closure = closure_id;
            frame.pc = 0;
            frame.varargs = varargs;
            frame.top = pad;
            return Ok(());
        }
    }

    // Host closure, or a non-function value dispatched through `__call`:
    // run it as an ordinary call, then finish the current frame exactly as
    // `do_return` would with its results. A yield can't be resumed across
    // this boundary (there's no Lua frame left to resume into), so it's
    // reported as an ordinary runtime error instead.
    let (dest, want, inline) = {
        let f = state.exec().call_stack.last().unwrap();
        (f.dest, f.nresults, f.inline_return)
    };
    match call_value(state, func, args, -1) {
        Ok(results) => {
            state.exec_mut().call_stack.pop();
            deposit_return(state, dest, want, inline, results);
            Ok(())
        }
        Err(e) if e.kind == LuaErrorKind::Yield => {
            Err(state.error("attempt to yield across a C-call boundary".to_string()))
        }
        Err(e) => Err(e),
    }
}

/// `RETURN A B`: results are `R[A..A+B-2]` (`B == 0` means "up to top").
fn do_return(state: &mut LuaState, base: usize, a: usize, b: i32) -> LuaResult<()> {
    close_upvalues_from(state, base);
    let results: Vec<LuaValue> = if b == 0 {
        let top = state.exec().call_stack.last().unwrap().top;
        state.exec().stack[base + a..top].to_vec()
    } else {
        (0..(b - 1) as usize).map(|i| state.exec().stack[base + a + i]).collect()
    };
    let popped = state.exec_mut().call_stack.pop().unwrap();
    deposit_return(state, popped.dest, popped.nresults, popped.inline_return, results);
    Ok(())
}

/// What driving a coroutine one step produced: either it ran to completion
/// (`Returned`, carrying its final return values) or it hit a `yield`
/// (`Yielded`, carrying the values passed to `coroutine.yield`).
pub enum ResumeOutcome {
    Returned(Vec<LuaValue>),
    Yielded(Vec<LuaValue>),
}

/// Drive `thread` forward with `args`: either its initial arguments (first
/// resume) or the values `coroutine.yield` should return (subsequent
/// resumes). `state` is the *resuming* thread's handle; this builds a
/// separate [`LuaState`] over the same [`crate::lua_vm::LuaVM`] for `thread`
/// itself, since a coroutine is cooperative, single-threaded Rust code —
/// never actually concurrent — so there is no aliasing hazard in borrowing
/// the VM twice in sequence like this.
pub fn resume_thread(
    state: &mut LuaState,
    thread: ThreadId,
    args: Vec<LuaValue>,
) -> LuaResult<ResumeOutcome> {
    let fresh = state.vm.heap.threads.get(thread.0).exec.call_stack.is_empty();
    let mut sub = LuaState::new(state.vm, thread);
    if fresh {
        let body = sub
            .vm
            .heap
            .threads
            .get(thread.0)
            .body
            .expect("coroutine missing body");
        match call_value(&mut sub, body, args, -1) {
            Ok(results) => Ok(ResumeOutcome::Returned(results)),
            Err(e) if e.kind == LuaErrorKind::Yield => {
                let values = std::mem::take(&mut sub.vm.heap.threads.get_mut(thread.0).transfer);
                Ok(ResumeOutcome::Yielded(values))
            }
            Err(e) => Err(e),
        }
    } else {
        let (dest, nresults) = {
            let frame = sub
                .exec_mut()
                .call_stack
                .last_mut()
                .expect("suspended coroutine has no frame");
            frame
                .pending_resume
                .take()
                .expect("suspended coroutine missing continuation point")
        };
        deposit_return(&mut sub, dest, nresults, true, args);
        match run_until(&mut sub, 0) {
            Ok(()) => {
                let results = std::mem::take(&mut sub.exec_mut().stack);
                Ok(ResumeOutcome::Returned(results))
            }
            Err(e) if e.kind == LuaErrorKind::Yield => {
                let values = std::mem::take(&mut sub.vm.heap.threads.get_mut(thread.0).transfer);
                Ok(ResumeOutcome::Yielded(values))
            }
            Err(e) => Err(e),
        }
    }
}
