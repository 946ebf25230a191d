//! Handles into the heap's per-kind object pools.
//!
//! Every heap-allocated Lua value (string, table, closure, userdata, thread,
//! upvalue) is addressed through one of these newtypes rather than a raw
//! pointer, so that a stack growth or a GC sweep can never leave a dangling
//! reference: the index just stops resolving to a live slot.

macro_rules! define_gc_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub struct $name(pub(crate) u32);

        impl $name {
            #[inline(always)]
            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_gc_id!(StringId);
define_gc_id!(TableId);
define_gc_id!(FunctionId);
define_gc_id!(UserdataId);
define_gc_id!(ThreadId);
define_gc_id!(UpvalueId);
