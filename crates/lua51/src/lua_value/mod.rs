//! The tagged-union runtime value (spec §3.1) and the heap-backed types it
//! can point at: strings, tables, closures/upvalues, and userdata.

pub mod closure;
pub mod heap_string;
pub mod lua_table;
pub mod userdata;
pub mod value;

pub use closure::{Closure, HostClosure, HostFn, LuaClosure, Upvalue};
pub use heap_string::HeapString;
pub use lua_table::{LuaTable, TableError};
pub use userdata::Userdata;
pub use value::{LuaValue, TableKey};
