//! The virtual machine: heap, globals, configuration, and the entry points
//! that turn source text into running Lua (spec §5/§6).

pub mod arithmetic;
pub mod call_frame;
pub mod config;
pub mod error;
pub mod execute;
pub mod lua_state;
pub mod opcode;

pub use call_frame::{CallFrame, FrameKind};
pub use config::VmConfig;
pub use error::{LuaError, LuaErrorKind, LuaResult};
pub use lua_state::{LuaState, LuaThread, ThreadExec, ThreadStatus};
pub use opcode::{Instruction, OpCode};

use crate::compiler::Proto;
use crate::gc::{Heap, TableId, ThreadId};
use crate::lua_value::{Closure, LuaClosure, LuaValue};
use std::rc::Rc;

/// Where `print` and friends send their output. Swappable so tests can
/// capture what a script printed instead of polluting the test runner's
/// stdout (spec's test-tooling addition, §8).
pub enum OutputSink {
    Stdout,
    Buffer(String),
}

impl OutputSink {
    pub fn write_line(&mut self, line: &str) {
        match self {
            OutputSink::Stdout => println!("{line}"),
            OutputSink::Buffer(buf) => {
                buf.push_str(line);
                buf.push('\n');
            }
        }
    }
}

pub struct LuaVM {
    pub heap: Heap,
    pub globals: TableId,
    /// The single shared metatable for all strings (spec §3.4: strings
    /// share one metatable, set once via `debug.setmetatable` territory —
    /// here, pre-populated by the string library so `("x"):upper()` works).
    pub string_metatable: Option<TableId>,
    pub config: VmConfig,
    pub main_thread: ThreadId,
    /// Line of the instruction currently executing, for error messages;
    /// set by the dispatch loop before anything that can fail.
    pub current_line: u32,
    pub chunk_name: String,
    pub output: OutputSink,
}

impl LuaVM {
    pub fn new(config: VmConfig) -> Self {
        let mut heap = Heap::new(config.initial_gc_threshold, config.gc_pause_percent);
        let globals = heap.alloc_table(0, 64);
        let main_thread = heap.alloc_thread(LuaThread::new());
        let mut vm = Self {
            heap,
            globals,
            string_metatable: None,
            config,
            main_thread,
            current_line: 0,
            chunk_name: "?".to_string(),
            output: OutputSink::Stdout,
        };
        crate::stdlib::open_libs(&mut vm);
        vm
    }

    /// Like [`LuaVM::new`], but `print` writes into an in-memory buffer
    /// instead of stdout — used by `lua51::execute_capturing`.
    pub fn new_capturing(config: VmConfig) -> Self {
        let mut vm = Self::new(config);
        vm.output = OutputSink::Buffer(String::new());
        vm
    }

    pub fn captured_output(&self) -> &str {
        match &self.output {
            OutputSink::Buffer(s) => s,
            OutputSink::Stdout => "",
        }
    }

    /// Mark every GC root reachable from this VM, sweep anything left
    /// unmarked, and recompute the allocation-debt threshold (spec §4.5).
    /// `current_thread` is included so a coroutine mid-resume (and anything
    /// it in turn resumed) is rooted even though it isn't `main_thread`.
    pub fn collect_garbage(&mut self, current_thread: ThreadId) {
        self.heap.mark_table(self.globals);
        if let Some(mt) = self.string_metatable {
            self.heap.mark_table(mt);
        }
        self.heap.mark_thread(self.main_thread);
        let mut next = Some(current_thread);
        while let Some(id) = next {
            self.heap.mark_thread(id);
            next = self.heap.threads.get(id.0).resumer;
        }
        self.heap.sweep();
        self.heap.after_collection();
    }

    pub fn metatable_of(&self, v: LuaValue) -> Option<TableId> {
        match v {
            LuaValue::Table(id) => self.heap.tables.get(id.0).metatable,
            LuaValue::Userdata(id) => self.heap.userdata.get(id.0).metatable,
            LuaValue::String(_) => self.string_metatable,
            _ => None,
        }
    }

    /// `(source, line)` for the frame currently executing on `thread`, used
    /// to format `"<source>:<line>: <message>"` errors.
    pub fn current_position(&self, thread: ThreadId) -> (String, u32) {
        let exec = &self.heap.threads.get(thread.0).exec;
        match exec.call_stack.last() {
            Some(frame) => match self.heap.functions.get(frame.closure.0) {
                Closure::Lua(lc) => (lc.proto.source.to_string(), lc.proto.line_at(frame.pc.saturating_sub(1))),
                Closure::Host(h) => (format!("[C:{}]", h.name), 0),
            },
            None => (self.chunk_name.clone(), self.current_line),
        }
    }

    /// `tostring` without consulting `__tostring` — the raw rendering every
    /// value falls back to.
    pub fn raw_tostring(&self, v: LuaValue) -> String {
        match v {
            LuaValue::Nil => "nil".to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            LuaValue::Number(n) => format_number(n),
            LuaValue::String(id) => self.heap.strings.get(id.0).to_str_lossy().into_owned(),
            LuaValue::Table(id) => format!("table: {:#010x}", id.0),
            LuaValue::Function(id) => format!("function: {:#010x}", id.0),
            LuaValue::Userdata(id) => format!("userdata: {:#010x}", id.0),
            LuaValue::Thread(id) => format!("thread: {:#010x}", id.0),
        }
    }

    /// Compile `source` into a top-level `Proto` under `chunk_name`
    /// (spec §4.1-4.3: lex, parse, generate). Needs `&mut self` because
    /// string literals become interned heap constants as they're compiled.
    pub fn compile(&mut self, source: &str, chunk_name: &str) -> LuaResult<Rc<Proto>> {
        crate::compiler::compile(&mut self.heap, source, chunk_name)
    }

    /// Compile and run `source` on the main thread, returning its results.
    pub fn execute(&mut self, source: &str, chunk_name: &str) -> LuaResult<Vec<LuaValue>> {
        let proto = self.compile(source, chunk_name)?;
        self.chunk_name = chunk_name.to_string();
        self.execute_proto(proto)
    }

    pub fn execute_proto(&mut self, proto: Rc<Proto>) -> LuaResult<Vec<LuaValue>> {
        let closure = self.heap.alloc_closure(Closure::Lua(LuaClosure {
            proto,
            upvalues: Vec::new(),
        }));
        let thread = self.main_thread;
        let mut state = LuaState::new(self, thread);
        execute::call_value(&mut state, LuaValue::Function(closure), Vec::new(), -1)
    }

    pub fn create_thread(&mut self) -> ThreadId {
        self.heap.alloc_thread(LuaThread::new())
    }

    /// `coroutine.create(f)`: a fresh thread whose first `resume` invokes
    /// `body`.
    pub fn create_thread_with_body(&mut self, body: LuaValue) -> ThreadId {
        self.heap.alloc_thread(LuaThread::with_body(body))
    }
}

/// Lua's number-to-string rule: integral values print without a decimal
/// point (`%.14g` behavior), everything else keeps up to 14 significant
/// digits.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    // Rust's general float formatter is close enough to `%.14g` for this
    // crate's purposes; just make sure integral-looking floats keep a
    // decimal point so `1.0` doesn't print as `1`.
    let mut s = format!("{}", n);
    if !s.contains('.') && !s.contains('e') && !s.contains("inf") && !s.contains("nan") {
        s.push_str(".0");
    }
    s
}
