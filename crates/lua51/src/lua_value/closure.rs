//! Runtime function values and the upvalues they capture.

use crate::compiler::Proto;
use crate::gc::UpvalueId;
use crate::lua_value::value::LuaValue;
use crate::lua_vm::{LuaResult, LuaState};
use std::rc::Rc;

pub type HostFn = for<'vm> fn(&mut LuaState<'vm>) -> LuaResult<usize>;

pub enum Closure {
    Lua(LuaClosure),
    Host(HostClosure),
}

pub struct LuaClosure {
    pub proto: Rc<Proto>,
    pub upvalues: Vec<UpvalueId>,
}

pub struct HostClosure {
    pub func: HostFn,
    pub name: &'static str,
    pub upvalues: Vec<LuaValue>,
}

impl Closure {
    pub fn name(&self) -> &str {
        match self {
            Closure::Lua(_) => "?",
            Closure::Host(h) => h.name,
        }
    }
}

/// An upvalue handle. *Open* while the captured local is still a live stack
/// slot (stored as an absolute index so stack reallocation never
/// invalidates it); transitions one-way to *closed* when that slot's scope
/// ends, at which point the value is copied in and owned here. Multiple
/// closures that capture the same local share the same `UpvalueId`, so
/// writes through one are observed through all of them.
pub enum Upvalue {
    Open { stack_index: usize, thread: crate::gc::ThreadId },
    Closed(LuaValue),
}

impl Upvalue {
    pub fn open(stack_index: usize, thread: crate::gc::ThreadId) -> Self {
        Upvalue::Open { stack_index, thread }
    }
}
