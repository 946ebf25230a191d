//! Tunables threaded through `LuaVM::new` instead of hard-coded, the way
//! the teacher's `SafeOption` is threaded through its VM constructor.

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Bounds native recursion for non-tail calls (spec §5 "Recursion limits").
    pub max_call_depth: usize,
    pub max_stack_size: usize,
    /// GC pause parameter: percentage growth of the live set before the
    /// next debt threshold.
    pub gc_pause_percent: u32,
    pub initial_gc_threshold: usize,
    /// Chain bound on `__index`/`__newindex` lookup (spec §4.4).
    pub max_metamethod_chain: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
            max_stack_size: 1_000_000,
            gc_pause_percent: 200,
            initial_gc_threshold: 64 * 1024,
            max_metamethod_chain: 200,
        }
    }
}
