//! One activation record per call, chained LIFO on `LuaState::call_stack`.

use crate::gc::FunctionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Lua,
    Host,
}

pub struct CallFrame {
    pub closure: FunctionId,
    pub pc: usize,
    /// Stack position of register 0 for this frame.
    pub base: usize,
    /// Stack position of this frame's current top-of-locals.
    pub top: usize,
    /// How many results the caller asked for; `-1` means "keep them all".
    pub nresults: i32,
    pub kind: FrameKind,
    /// Extra arguments beyond the declared parameters, for a vararg Lua
    /// function (`...`).
    pub varargs: Vec<crate::lua_value::LuaValue>,
    /// Absolute stack index this frame's results get written to once it
    /// returns.
    pub dest: usize,
    /// `true` if this frame was pushed directly by the `CALL`/`TFORCALL`
    /// dispatch (a plain Lua-to-Lua call, flattened into the same
    /// instruction loop rather than recursing through [`super::execute::call_value`]):
    /// its results are copied straight into the frame below instead of
    /// handed back through a Rust return value. This is what lets
    /// `coroutine.yield` unwind arbitrarily many Lua call levels and still
    /// be resumable — only a genuine host-function boundary (one that
    /// really does recurse on the Rust stack) cannot be resumed across.
    pub inline_return: bool,
    /// Set when a call issued by this frame propagated a yield: where to
    /// deposit the eventual resume values, and how many are wanted.
    pub pending_resume: Option<(usize, i32)>,
}

impl CallFrame {
    pub fn new(closure: FunctionId, base: usize, nresults: i32, kind: FrameKind) -> Self {
        Self {
            closure,
            pc: 0,
            base,
            top: base,
            nresults,
            kind,
            varargs: Vec::new(),
            dest: base,
            inline_return: false,
            pending_resume: None,
        }
    }
}
