//! `coroutine.*`: the stack-API surface over the thread/resume machinery in
//! `lua_vm::execute` (spec §5 "Concurrency & resource model", exercised
//! end-to-end by spec §8.3 scenario 7).

use crate::gc::ThreadId;
use crate::lib_module;
use crate::lua_value::LuaValue;
use crate::lua_vm::error::{LuaError, LuaErrorKind, LuaResult};
use crate::lua_vm::execute::{resume_thread, ResumeOutcome};
use crate::lua_vm::lua_state::ThreadStatus;
use crate::lua_vm::LuaState;

pub fn module() -> super::LibraryModule {
    lib_module!("coroutine", {
        "create" => coroutine_create,
        "resume" => coroutine_resume,
        "yield" => coroutine_yield,
        "status" => coroutine_status,
        "running" => coroutine_running,
        "wrap" => coroutine_wrap,
        "isyieldable" => coroutine_isyieldable,
    })
}

fn arg_thread(state: &mut LuaState, i: i32, fname: &str) -> LuaResult<ThreadId> {
    let v = state
        .get_arg(i)
        .ok_or_else(|| state.error(format!("bad argument #{i} to '{fname}' (coroutine expected, got no value)")))?;
    v.as_thread()
        .ok_or_else(|| state.error(format!("bad argument #{i} to '{fname}' (coroutine expected, got {})", v.type_name())))
}

fn coroutine_create(state: &mut LuaState) -> LuaResult<usize> {
    let f = state
        .get_arg(1)
        .ok_or_else(|| state.error("bad argument #1 to 'create' (function expected)".into()))?;
    if !f.is_function() {
        return Err(state.error(format!("bad argument #1 to 'create' (function expected, got {})", f.type_name())));
    }
    let id = state.vm.create_thread_with_body(f);
    state.push_value(LuaValue::Thread(id))?;
    Ok(1)
}

/// Shared by `resume` and the function `wrap` returns: run one resume step,
/// leaving `co`'s status consistent with the outcome and the resuming
/// thread's status restored once `co` stops running.
fn do_resume(state: &mut LuaState, co: ThreadId, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let status = state.vm.heap.threads.get(co.0).status;
    match status {
        ThreadStatus::Dead => return Err(state.error("cannot resume dead coroutine".into())),
        ThreadStatus::Running | ThreadStatus::Normal => {
            return Err(state.error("cannot resume non-suspended coroutine".into()))
        }
        ThreadStatus::Ready | ThreadStatus::Suspended => {}
    }

    let resumer = state.thread;
    state.vm.heap.threads.get_mut(co.0).resumer = Some(resumer);
    state.vm.heap.threads.get_mut(resumer.0).status = ThreadStatus::Normal;
    state.vm.heap.threads.get_mut(co.0).status = ThreadStatus::Running;

    let outcome = resume_thread(state, co, args);

    state.vm.heap.threads.get_mut(resumer.0).status = ThreadStatus::Running;

    match outcome {
        Ok(ResumeOutcome::Returned(results)) => {
            state.vm.heap.threads.get_mut(co.0).status = ThreadStatus::Dead;
            Ok(results)
        }
        Ok(ResumeOutcome::Yielded(values)) => {
            state.vm.heap.threads.get_mut(co.0).status = ThreadStatus::Suspended;
            Ok(values)
        }
        Err(e) => {
            state.vm.heap.threads.get_mut(co.0).status = ThreadStatus::Dead;
            Err(e)
        }
    }
}

fn coroutine_resume(state: &mut LuaState) -> LuaResult<usize> {
    let co = arg_thread(state, 1, "resume")?;
    let args: Vec<LuaValue> = (2..=state.get_top()).map(|i| state.get(i)).collect();
    match do_resume(state, co, args) {
        Ok(results) => {
            state.push_boolean(true);
            let n = results.len();
            for v in results {
                state.push_value(v)?;
            }
            Ok(1 + n)
        }
        Err(e) => {
            state.push_boolean(false);
            let v = e.value_or_message(state);
            state.push_value(v)?;
            Ok(2)
        }
    }
}

/// `coroutine.yield(...)`: unwinds as `Err(Yield)` all the way back to
/// whichever `resume_thread` call drove this thread (spec §4.4 "Upvalue
/// lifecycle" / §5 "Suspension points" — the only opcode family that
/// suspends is the one built on this error kind).
fn coroutine_yield(state: &mut LuaState) -> LuaResult<usize> {
    if state.thread == state.vm.main_thread {
        return Err(state.error("attempt to yield from outside a coroutine".into()));
    }
    let args = state.get_args();
    let thread = state.thread;
    state.vm.heap.threads.get_mut(thread.0).transfer = args;
    Err(LuaError::new(LuaErrorKind::Yield, "yield"))
}

fn coroutine_status(state: &mut LuaState) -> LuaResult<usize> {
    let co = arg_thread(state, 1, "status")?;
    let s = if co == state.thread {
        "running"
    } else {
        match state.vm.heap.threads.get(co.0).status {
            ThreadStatus::Ready | ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::Dead => "dead",
        }
    };
    state.push_string(s);
    Ok(1)
}

/// 5.1.5's `coroutine.running()` returns a single value: the running
/// coroutine, or `nil` when called from the main thread. (The `(thread,
/// is_main)` pair is a 5.2+ addition, not part of this crate's target
/// language version.)
fn coroutine_running(state: &mut LuaState) -> LuaResult<usize> {
    let thread = state.thread;
    if thread == state.vm.main_thread {
        state.push_nil();
    } else {
        state.push_value(LuaValue::Thread(thread))?;
    }
    Ok(1)
}

fn coroutine_isyieldable(state: &mut LuaState) -> LuaResult<usize> {
    state.push_boolean(state.thread != state.vm.main_thread);
    Ok(1)
}

fn wrap_call(state: &mut LuaState) -> LuaResult<usize> {
    let co = match state.upvalue(0) {
        LuaValue::Thread(id) => id,
        _ => return Err(state.error("invalid wrapped coroutine".into())),
    };
    let args = state.get_args();
    let results = do_resume(state, co, args)?;
    let n = results.len();
    for v in results {
        state.push_value(v)?;
    }
    Ok(n)
}

fn coroutine_wrap(state: &mut LuaState) -> LuaResult<usize> {
    let f = state
        .get_arg(1)
        .ok_or_else(|| state.error("bad argument #1 to 'wrap' (function expected)".into()))?;
    if !f.is_function() {
        return Err(state.error(format!("bad argument #1 to 'wrap' (function expected, got {})", f.type_name())));
    }
    let id = state.vm.create_thread_with_body(f);
    let wrapper = super::alloc_host_closure_with_upvalues(state, wrap_call, "coroutine.wrap", vec![LuaValue::Thread(id)]);
    state.push_value(wrapper)?;
    Ok(1)
}
