//! `Thread` the heap object (spec §3.2) and `LuaState`, the stack-API
//! handle host functions receive (spec §6.2).

use crate::gc::{ThreadId, UpvalueId};
use crate::lua_value::LuaValue;
use crate::lua_vm::call_frame::CallFrame;
use crate::lua_vm::error::{LuaError, LuaErrorKind, LuaResult};
use crate::lua_vm::LuaVM;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Ready,
    Running,
    Suspended,
    /// Resumed another coroutine and is waiting for it to finish or yield
    /// back; `coroutine.status` reports this the same as a non-current
    /// thread would see its resumer.
    Normal,
    Dead,
}

/// The mutable part of a thread's execution context: its stack, its call
/// frames, and the open upvalues pointing into that stack.
pub struct ThreadExec {
    pub stack: Vec<LuaValue>,
    pub call_stack: Vec<CallFrame>,
    /// Open upvalues, kept sorted ascending by `stack_index` so closing
    /// "everything at or above a cut" is a suffix operation.
    pub open_upvalues: Vec<(usize, UpvalueId)>,
}

impl ThreadExec {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(64),
            call_stack: Vec::new(),
            open_upvalues: Vec::new(),
        }
    }
}

impl Default for ThreadExec {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LuaThread {
    pub status: ThreadStatus,
    pub exec: ThreadExec,
    /// Pending yielded/returned values, handed back to `resume`.
    pub transfer: Vec<LuaValue>,
    /// The function `coroutine.create` was given; `None` for the main
    /// thread, which never gets `resume`d.
    pub body: Option<LuaValue>,
    /// The thread that last resumed this one, so a yield knows who to
    /// report `Suspended`/`Normal` back to.
    pub resumer: Option<ThreadId>,
}

impl LuaThread {
    pub fn new() -> Self {
        Self {
            status: ThreadStatus::Ready,
            exec: ThreadExec::new(),
            transfer: Vec::new(),
            body: None,
            resumer: None,
        }
    }

    pub fn with_body(body: LuaValue) -> Self {
        Self {
            body: Some(body),
            ..Self::new()
        }
    }
}

impl Default for LuaThread {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle bundling "the VM" with "which thread is currently executing".
/// This is what host functions (registered via [`crate::lib_registry`])
/// receive; it exposes the stack-based API from spec §6.2. Carrying the VM
/// by mutable reference (rather than the teacher's raw pointer) means a
/// dangling handle is a compile error, not a runtime one.
pub struct LuaState<'vm> {
    pub vm: &'vm mut LuaVM,
    pub thread: ThreadId,
}

impl<'vm> LuaState<'vm> {
    pub fn new(vm: &'vm mut LuaVM, thread: ThreadId) -> Self {
        Self { vm, thread }
    }

    #[inline]
    pub fn exec(&self) -> &ThreadExec {
        &self.vm.heap.threads.get(self.thread.0).exec
    }

    #[inline]
    pub fn exec_mut(&mut self) -> &mut ThreadExec {
        &mut self.vm.heap.threads.get_mut(self.thread.0).exec
    }

    fn base(&self) -> usize {
        self.exec().call_stack.last().map(|f| f.base).unwrap_or(0)
    }

    fn abs_index(&self, i: i32) -> usize {
        let base = self.base();
        if i > 0 {
            base + (i as usize - 1)
        } else {
            let top = self.exec().stack.len() as i64;
            (top + i as i64).max(0) as usize
        }
    }

    /// Number of values on the stack above the current frame's base.
    pub fn get_top(&self) -> i32 {
        (self.exec().stack.len() - self.base()) as i32
    }

    pub fn set_top(&mut self, n: i32) {
        let base = self.base();
        let new_len = base + n.max(0) as usize;
        self.exec_mut().stack.resize(new_len, LuaValue::Nil);
    }

    pub fn get(&self, i: i32) -> LuaValue {
        self.exec()
            .stack
            .get(self.abs_index(i))
            .copied()
            .unwrap_or(LuaValue::Nil)
    }

    /// `None` if `i` is out of the supplied-argument range (convenience for
    /// library functions checking arity).
    pub fn get_arg(&self, i: i32) -> Option<LuaValue> {
        if i >= 1 && i <= self.get_top() {
            Some(self.get(i))
        } else {
            None
        }
    }

    pub fn get_args(&self) -> Vec<LuaValue> {
        (1..=self.get_top()).map(|i| self.get(i)).collect()
    }

    pub fn push_value(&mut self, v: LuaValue) -> LuaResult<()> {
        self.exec_mut().stack.push(v);
        Ok(())
    }

    pub fn push_nil(&mut self) {
        let _ = self.push_value(LuaValue::Nil);
    }

    pub fn push_boolean(&mut self, b: bool) {
        let _ = self.push_value(LuaValue::Boolean(b));
    }

    pub fn push_number(&mut self, n: f64) {
        let _ = self.push_value(LuaValue::Number(n));
    }

    pub fn push_string(&mut self, s: &str) -> LuaValue {
        let id = self.vm.heap.alloc_string(s.as_bytes());
        let v = LuaValue::String(id);
        let _ = self.push_value(v);
        v
    }

    /// Construct (but don't push) a string from raw bytes; Lua strings are
    /// byte sequences, not necessarily UTF-8 (spec §3.2).
    pub fn make_string(&mut self, bytes: &[u8]) -> LuaValue {
        LuaValue::String(self.vm.heap.alloc_string(bytes))
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> LuaValue {
        let v = self.make_string(bytes);
        let _ = self.push_value(v);
        v
    }

    pub fn pop(&mut self, n: i32) {
        let len = self.exec().stack.len();
        let new_len = len.saturating_sub(n.max(0) as usize);
        self.exec_mut().stack.truncate(new_len);
    }

    pub fn is_nil(&self, i: i32) -> bool {
        self.get(i).is_nil()
    }

    pub fn is_number(&self, i: i32) -> bool {
        matches!(self.get(i), LuaValue::Number(_))
            || self.coerce_to_number(self.get(i)).is_some()
    }

    pub fn is_string(&self, i: i32) -> bool {
        matches!(self.get(i), LuaValue::String(_) | LuaValue::Number(_))
    }

    pub fn is_table(&self, i: i32) -> bool {
        self.get(i).is_table()
    }

    pub fn is_function(&self, i: i32) -> bool {
        self.get(i).is_function()
    }

    /// Numeric coercion: a string is acceptable wherever a number is, if it
    /// parses per the lexer's numeric grammar (spec §4.4 "Arithmetic
    /// opcodes").
    pub fn coerce_to_number(&self, v: LuaValue) -> Option<f64> {
        match v {
            LuaValue::Number(n) => Some(n),
            LuaValue::String(id) => {
                let text = self.vm.heap.strings.get(id.0).to_str_lossy();
                crate::compiler::parse_lua_number(text.trim())
            }
            _ => None,
        }
    }

    pub fn to_number(&self, i: i32) -> Option<f64> {
        self.coerce_to_number(self.get(i))
    }

    pub fn to_str_bytes(&self, v: LuaValue) -> Option<Vec<u8>> {
        match v {
            LuaValue::String(id) => Some(self.vm.heap.strings.get(id.0).as_bytes().to_vec()),
            LuaValue::Number(n) => Some(crate::lua_vm::format_number(n).into_bytes()),
            _ => None,
        }
    }

    /// `tostring`, without consulting `__tostring` (callers that need the
    /// metamethod go through `LuaVM::tostring`).
    pub fn to_display_string(&self, i: i32) -> String {
        self.vm.raw_tostring(self.get(i))
    }

    pub fn create_table(&mut self, array_hint: usize, hash_hint: usize) -> LuaValue {
        LuaValue::Table(self.vm.heap.alloc_table(array_hint, hash_hint))
    }

    pub fn create_string(&mut self, s: &str) -> LuaValue {
        LuaValue::String(self.vm.heap.alloc_string(s.as_bytes()))
    }

    pub fn raw_get(&self, table: &LuaValue, key: &LuaValue) -> LuaValue {
        match table.as_table() {
            Some(id) => self.vm.heap.tables.get(id.0).get(key),
            None => LuaValue::Nil,
        }
    }

    pub fn raw_set(&mut self, table: &LuaValue, key: LuaValue, value: LuaValue) {
        if let Some(id) = table.as_table() {
            let _ = self.vm.heap.tables.get_mut(id.0).set(key, value);
        }
    }

    pub fn raw_geti(&self, table: &LuaValue, i: i64) -> LuaValue {
        match table.as_table() {
            Some(id) => self.vm.heap.tables.get(id.0).get_int(i),
            None => LuaValue::Nil,
        }
    }

    pub fn raw_seti(&mut self, table: &LuaValue, i: i64, value: LuaValue) {
        if let Some(id) = table.as_table() {
            let _ = self.vm.heap.tables.get_mut(id.0).set_int(i, value);
        }
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let key = self.create_string(name);
        let globals = LuaValue::Table(self.vm.globals);
        self.raw_set(&globals, key, value);
    }

    pub fn get_global(&mut self, name: &str) -> LuaValue {
        let key = self.create_string(name);
        let globals = LuaValue::Table(self.vm.globals);
        self.raw_get(&globals, &key)
    }

    /// Raise a runtime error from inside a host function, tagged with the
    /// caller's source position the way a VM-detected error would be.
    pub fn error(&mut self, msg: String) -> LuaError {
        let (source, line) = self.vm.current_position(self.thread);
        LuaError::runtime(&source, line, msg)
    }

    /// `call(n_args, n_results)`: invoke the value at `top - n_args - 1`.
    pub fn call(&mut self, n_args: i32, n_results: i32) -> LuaResult<()> {
        crate::lua_vm::execute::call_from_host(self, n_args, n_results)
    }

    /// `pcall(n_args, n_results)`: like `call`, but any runtime error is
    /// caught and turned into `(false, err)` results instead of unwinding.
    pub fn pcall(&mut self, n_args: i32, n_results: i32) -> LuaResult<bool> {
        crate::lua_vm::execute::pcall_from_host(self, n_args, n_results)
    }

    /// The `FunctionId` of the host closure currently executing (valid only
    /// while its frame is still on `call_stack`, i.e. from inside the
    /// `HostFn` itself).
    pub fn current_closure(&self) -> Option<crate::gc::FunctionId> {
        self.exec().call_stack.last().map(|f| f.closure)
    }


    /// Read the `i`-th (0-based) upvalue captured by the currently
    /// executing host closure. Used by closures like `coroutine.wrap`'s
    /// returned function and `string.gmatch`'s iterator to recover state
    /// stashed at creation time.
    pub fn upvalue(&self, i: usize) -> LuaValue {
        let Some(id) = self.current_closure() else {
            return LuaValue::Nil;
        };
        match self.vm.heap.functions.get(id.0) {
            crate::lua_value::closure::Closure::Host(h) => {
                h.upvalues.get(i).copied().unwrap_or(LuaValue::Nil)
            }
            _ => LuaValue::Nil,
        }
    }

    pub fn register(&mut self, name: &'static str, f: crate::lua_value::closure::HostFn) {
        let closure = crate::lua_value::closure::Closure::Host(crate::lua_value::closure::HostClosure {
            func: f,
            name,
            upvalues: Vec::new(),
        });
        let id = self.vm.heap.alloc_closure(closure);
        self.set_global(name, LuaValue::Function(id));
    }
}

pub(crate) fn stack_overflow(depth: usize, max: usize) -> Option<LuaError> {
    if depth >= max {
        Some(LuaError::new(LuaErrorKind::StackOverflow, "stack overflow"))
    } else {
        None
    }
}
