//! The standard library surface `spec.md`'s end-to-end scenarios assume
//! exists (§8.3 calls `print`, `pairs`, `pcall`, `string.match`, the full
//! `coroutine.*` family) but which the distilled spec treats as out of
//! scope beyond the host-function ABI. Organized the way the teacher's
//! `stdlib/` is: one file per library, each building a [`LibraryModule`]
//! through the [`lib_module!`] macro.

pub mod base;
pub mod coroutine_lib;
pub mod lua_pattern;
pub mod math_lib;
pub mod os_lib;
pub mod string_lib;
pub mod table_lib;

use crate::lua_value::closure::{Closure, HostClosure, HostFn};
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaState, LuaVM};

/// A named group of host functions, registered either as a nested table
/// (`string.*`, `table.*`, ...) or, for `"_G"`, flattened directly into the
/// globals table.
pub struct LibraryModule {
    pub name: &'static str,
    pub functions: Vec<(&'static str, HostFn)>,
}

impl LibraryModule {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            functions: Vec::new(),
        }
    }

    pub fn with_function(mut self, name: &'static str, f: HostFn) -> Self {
        self.functions.push((name, f));
        self
    }
}

/// Build a [`LibraryModule`] declaratively:
/// `lib_module!("string", { "upper" => string_upper, "lower" => string_lower })`.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, { $($fname:expr => $f:expr),* $(,)? }) => {{
        #[allow(unused_mut)]
        let mut module = $crate::stdlib::LibraryModule::new($name);
        $(module = module.with_function($fname, $f);)*
        module
    }};
}

pub(crate) fn alloc_host_closure(state: &mut LuaState, f: HostFn, name: &'static str) -> LuaValue {
    let closure = Closure::Host(HostClosure {
        func: f,
        name,
        upvalues: Vec::new(),
    });
    LuaValue::Function(state.vm.heap.alloc_closure(closure))
}

/// Like [`alloc_host_closure`], but carrying captured state — `gmatch`'s
/// iterator needs its source string, pattern, and scan position to survive
/// between calls, and a host closure's `upvalues` vec is the only place to
/// stash it (spec §6.2 has no notion of per-call host state otherwise).
pub(crate) fn alloc_host_closure_with_upvalues(
    state: &mut LuaState,
    f: HostFn,
    name: &'static str,
    upvalues: Vec<LuaValue>,
) -> LuaValue {
    let closure = Closure::Host(HostClosure { func: f, name, upvalues });
    LuaValue::Function(state.vm.heap.alloc_closure(closure))
}

/// Mutate upvalue `i` of the currently executing host closure in place.
/// Used by iterators (`gmatch`) that need to advance their own state
/// between successive calls.
pub(crate) fn set_current_host_upvalue(state: &mut LuaState, i: usize, value: LuaValue) {
    let Some(id) = state.current_closure() else {
        return;
    };
    if let Closure::Host(h) = state.vm.heap.functions.get_mut(id.0) {
        if let Some(slot) = h.upvalues.get_mut(i) {
            *slot = value;
        }
    }
}

/// Register `module`'s functions, either flattened into globals (`_G`) or
/// as a nested table under `module.name`. Returns the table so callers that
/// need to wire it elsewhere (the string library, into `string_metatable`)
/// can get at it; `None` for the flattened `_G` case, which has no single
/// table.
pub fn install(state: &mut LuaState, module: LibraryModule) -> Option<LuaValue> {
    if module.name == "_G" {
        for (name, f) in module.functions {
            state.register(name, f);
        }
        None
    } else {
        let table = state.create_table(0, module.functions.len());
        for (name, f) in module.functions {
            let closure = alloc_host_closure(state, f, name);
            let key = state.create_string(name);
            state.raw_set(&table, key, closure);
        }
        state.set_global(module.name, table);
        Some(table)
    }
}

/// Install every standard library into `vm`'s globals (spec's supplemented
/// stdlib surface). Called once from [`LuaVM::new`].
pub fn open_libs(vm: &mut LuaVM) {
    let thread = vm.main_thread;
    let mut state = LuaState::new(vm, thread);

    install(&mut state, base::module());
    let string_table = install(&mut state, string_lib::module());
    install(&mut state, table_lib::module());
    math_lib::install(&mut state);
    install(&mut state, os_lib::module());
    install(&mut state, coroutine_lib::module());

    base::finish_globals(&mut state);
    if let Some(string_table) = string_table {
        string_lib::install_string_metatable(&mut state, string_table);
    }
}
