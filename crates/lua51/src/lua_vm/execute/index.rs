//! `t[k]` / `t[k] = v`, including the `__index`/`__newindex` chase (spec
//! §4.4, "Indexing opcodes"). Bounded by
//! [`VmConfig::max_metamethod_chain`] so a metatable cycle raises an error
//! instead of looping forever.

use crate::lua_value::LuaValue;
use crate::lua_vm::error::LuaResult;
use crate::lua_vm::lua_state::LuaState;

pub fn get_index(state: &mut LuaState, mut t: LuaValue, key: LuaValue, line: u32) -> LuaResult<LuaValue> {
    let max_chain = state.vm.config.max_metamethod_chain;
    for _ in 0..max_chain {
        if let LuaValue::Table(id) = t {
            let raw = state.vm.heap.tables.get(id.0).get(&key);
            if !raw.is_nil() {
                return Ok(raw);
            }
            let handler = state
                .vm
                .heap
                .tables
                .get(id.0)
                .metatable
                .and_then(|mt| state.vm.heap.find_string(b"__index").map(|k| (mt, k)))
                .map(|(mt, k)| state.vm.heap.tables.get(mt.0).get(&LuaValue::String(k)));
            match handler {
                None | Some(LuaValue::Nil) => return Ok(LuaValue::Nil),
                Some(LuaValue::Function(_)) => {
                    let f = handler.unwrap();
                    let results = crate::lua_vm::execute::call_value(state, f, vec![t, key], 1)?;
                    return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil));
                }
                Some(next_t) => {
                    t = next_t;
                    continue;
                }
            }
        } else {
            let mt = state.vm.metatable_of(t);
            let handler = mt
                .and_then(|mt| state.vm.heap.find_string(b"__index").map(|k| (mt, k)))
                .map(|(mt, k)| state.vm.heap.tables.get(mt.0).get(&LuaValue::String(k)));
            match handler {
                None | Some(LuaValue::Nil) => {
                    state.vm.current_line = line;
                    return Err(state.error(format!("attempt to index a {} value", t.type_name())));
                }
                Some(LuaValue::Function(_)) => {
                    let f = handler.unwrap();
                    let results = crate::lua_vm::execute::call_value(state, f, vec![t, key], 1)?;
                    return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil));
                }
                Some(next_t) => {
                    t = next_t;
                    continue;
                }
            }
        }
    }
    state.vm.current_line = line;
    Err(state.error("'__index' chain too long; possible loop".into()))
}

pub fn set_index(
    state: &mut LuaState,
    mut t: LuaValue,
    key: LuaValue,
    value: LuaValue,
    line: u32,
) -> LuaResult<()> {
    let max_chain = state.vm.config.max_metamethod_chain;
    for _ in 0..max_chain {
        if let LuaValue::Table(id) = t {
            let has_raw = !state.vm.heap.tables.get(id.0).get(&key).is_nil();
            if has_raw {
                let _ = state.vm.heap.tables.get_mut(id.0).set(key, value);
                return Ok(());
            }
            let handler = state
                .vm
                .heap
                .tables
                .get(id.0)
                .metatable
                .and_then(|mt| state.vm.heap.find_string(b"__newindex").map(|k| (mt, k)))
                .map(|(mt, k)| state.vm.heap.tables.get(mt.0).get(&LuaValue::String(k)));
            match handler {
                None | Some(LuaValue::Nil) => {
                    state
                        .vm
                        .heap
                        .tables
                        .get_mut(id.0)
                        .set(key, value)
                        .map_err(|_| state.error("table index is NaN or nil".into()))?;
                    return Ok(());
                }
                Some(LuaValue::Function(_)) => {
                    let f = handler.unwrap();
                    crate::lua_vm::execute::call_value(state, f, vec![t, key, value], 0)?;
                    return Ok(());
                }
                Some(next_t) => {
                    t = next_t;
                    continue;
                }
            }
        } else {
            let mt = state.vm.metatable_of(t);
            let handler = mt
                .and_then(|mt| state.vm.heap.find_string(b"__newindex").map(|k| (mt, k)))
                .map(|(mt, k)| state.vm.heap.tables.get(mt.0).get(&LuaValue::String(k)));
            match handler {
                None | Some(LuaValue::Nil) => {
                    state.vm.current_line = line;
                    return Err(state.error(format!("attempt to index a {} value", t.type_name())));
                }
                Some(LuaValue::Function(_)) => {
                    let f = handler.unwrap();
                    crate::lua_vm::execute::call_value(state, f, vec![t, key, value], 0)?;
                    return Ok(());
                }
                Some(next_t) => {
                    t = next_t;
                    continue;
                }
            }
        }
    }
    state.vm.current_line = line;
    Err(state.error("'__newindex' chain too long; possible loop".into()))
}
