//! The base library: functions available without a table prefix. Installed
//! under the `"_G"` pseudo-module name, which [`super::install`] flattens
//! straight into globals instead of nesting under a table.

use crate::lib_module;
use crate::lua_value::LuaValue;
use crate::lua_vm::error::{LuaError, LuaErrorKind, LuaResult};
use crate::lua_vm::execute::call_value;
use crate::lua_vm::LuaState;

pub fn module() -> super::LibraryModule {
    lib_module!("_G", {
        "print" => lua_print,
        "type" => lua_type,
        "tostring" => lua_tostring,
        "tonumber" => lua_tonumber,
        "pairs" => lua_pairs,
        "ipairs" => lua_ipairs,
        "next" => lua_next,
        "setmetatable" => lua_setmetatable,
        "getmetatable" => lua_getmetatable,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "rawequal" => lua_rawequal,
        "rawlen" => lua_rawlen,
        "assert" => lua_assert,
        "error" => lua_error,
        "pcall" => lua_pcall,
        "xpcall" => lua_xpcall,
        "select" => lua_select,
        "unpack" => lua_unpack,
        "collectgarbage" => lua_collectgarbage,
    })
}

/// Globals that aren't plain host functions: `_G` pointing at itself and
/// `_VERSION`.
pub fn finish_globals(state: &mut LuaState) {
    let g = LuaValue::Table(state.vm.globals);
    state.set_global("_G", g);
    let version = state.create_string("Lua 5.1");
    state.set_global("_VERSION", version);
}

/// `tostring`, consulting `__tostring` first (spec §4.4 "VM — additions":
/// `print` is built on exactly this).
pub(crate) fn tostring_value(state: &mut LuaState, v: LuaValue) -> LuaResult<String> {
    if let Some(mt) = state.vm.metatable_of(v) {
        if let Some(key) = state.vm.heap.find_string(b"__tostring") {
            let mm = state.vm.heap.tables.get(mt.0).get(&LuaValue::String(key));
            if !mm.is_nil() {
                let results = call_value(state, mm, vec![v], 1)?;
                let r = results.into_iter().next().unwrap_or(LuaValue::Nil);
                return Ok(state.vm.raw_tostring(r));
            }
        }
    }
    Ok(state.vm.raw_tostring(v))
}

fn lua_print(state: &mut LuaState) -> LuaResult<usize> {
    let n = state.get_top();
    let mut parts = Vec::with_capacity(n.max(0) as usize);
    for i in 1..=n {
        let v = state.get(i);
        parts.push(tostring_value(state, v)?);
    }
    let line = parts.join("\t");
    state.vm.output.write_line(&line);
    Ok(0)
}

fn lua_type(state: &mut LuaState) -> LuaResult<usize> {
    let v = state
        .get_arg(1)
        .ok_or_else(|| state.error("bad argument #1 to 'type' (value expected)".into()))?;
    state.push_string(v.type_name());
    Ok(1)
}

fn lua_tostring(state: &mut LuaState) -> LuaResult<usize> {
    let v = state.get_arg(1).unwrap_or(LuaValue::Nil);
    let s = tostring_value(state, v)?;
    state.push_string(&s);
    Ok(1)
}

fn lua_tonumber(state: &mut LuaState) -> LuaResult<usize> {
    let v = state.get_arg(1).unwrap_or(LuaValue::Nil);
    if let Some(base_v) = state.get_arg(2) {
        let base = state.coerce_to_number(base_v).unwrap_or(10.0) as u32;
        let bytes = match v {
            LuaValue::String(id) => state.vm.heap.strings.get(id.0).as_bytes().to_vec(),
            _ => {
                return Err(state.error("bad argument #1 to 'tonumber' (string expected)".into()))
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        match i64::from_str_radix(text.trim(), base) {
            Ok(n) => state.push_number(n as f64),
            Err(_) => state.push_nil(),
        }
    } else {
        match state.coerce_to_number(v) {
            Some(n) => state.push_number(n),
            None => state.push_nil(),
        }
    }
    Ok(1)
}

fn lua_pairs(state: &mut LuaState) -> LuaResult<usize> {
    let t = state
        .get_arg(1)
        .ok_or_else(|| state.error("bad argument #1 to 'pairs' (table expected, got no value)".into()))?;
    if !t.is_table() {
        return Err(state.error(format!(
            "bad argument #1 to 'pairs' (table expected, got {})",
            t.type_name()
        )));
    }
    let next_fn = state.get_global("next");
    state.push_value(next_fn)?;
    state.push_value(t)?;
    state.push_nil();
    Ok(3)
}

fn ipairs_aux(state: &mut LuaState) -> LuaResult<usize> {
    let t = state.get_arg(1).unwrap_or(LuaValue::Nil);
    let i = state.to_number(2).unwrap_or(0.0) + 1.0;
    let v = state.raw_geti(&t, i as i64);
    if v.is_nil() {
        state.push_nil();
        Ok(1)
    } else {
        state.push_number(i);
        state.push_value(v)?;
        Ok(2)
    }
}

fn lua_ipairs(state: &mut LuaState) -> LuaResult<usize> {
    let t = state
        .get_arg(1)
        .ok_or_else(|| state.error("bad argument #1 to 'ipairs' (table expected, got no value)".into()))?;
    let iter = super::alloc_host_closure(state, ipairs_aux, "ipairs.iterator");
    state.push_value(iter)?;
    state.push_value(t)?;
    state.push_number(0.0);
    Ok(3)
}

fn lua_next(state: &mut LuaState) -> LuaResult<usize> {
    let t = state
        .get_arg(1)
        .ok_or_else(|| state.error("bad argument #1 to 'next' (table expected, got no value)".into()))?;
    let key = state.get_arg(2).unwrap_or(LuaValue::Nil);
    let id = t
        .as_table()
        .ok_or_else(|| state.error(format!("bad argument #1 to 'next' (table expected, got {})", t.type_name())))?;
    match state.vm.heap.tables.get(id.0).next(key) {
        Some((k, v)) => {
            state.push_value(k)?;
            state.push_value(v)?;
            Ok(2)
        }
        None => {
            state.push_nil();
            Ok(1)
        }
    }
}

fn lua_setmetatable(state: &mut LuaState) -> LuaResult<usize> {
    let t = state
        .get_arg(1)
        .ok_or_else(|| state.error("bad argument #1 to 'setmetatable' (table expected)".into()))?;
    let id = t
        .as_table()
        .ok_or_else(|| state.error("bad argument #1 to 'setmetatable' (table expected)".into()))?;
    if let Some(mt) = state.vm.heap.tables.get(id.0).metatable {
        if let Some(key) = state.vm.heap.find_string(b"__metatable") {
            let prot = state.vm.heap.tables.get(mt.0).get(&LuaValue::String(key));
            if !prot.is_nil() {
                return Err(state.error("cannot change a protected metatable".into()));
            }
        }
    }
    let new_mt = match state.get_arg(2) {
        None | Some(LuaValue::Nil) => None,
        Some(LuaValue::Table(mid)) => Some(mid),
        Some(_) => {
            return Err(state.error("bad argument #2 to 'setmetatable' (nil or table expected)".into()))
        }
    };
    state.vm.heap.tables.get_mut(id.0).metatable = new_mt;
    state.push_value(t)?;
    Ok(1)
}

fn lua_getmetatable(state: &mut LuaState) -> LuaResult<usize> {
    let v = state.get_arg(1).unwrap_or(LuaValue::Nil);
    match state.vm.metatable_of(v) {
        Some(mt) => {
            if let Some(key) = state.vm.heap.find_string(b"__metatable") {
                let prot = state.vm.heap.tables.get(mt.0).get(&LuaValue::String(key));
                if !prot.is_nil() {
                    state.push_value(prot)?;
                    return Ok(1);
                }
            }
            state.push_value(LuaValue::Table(mt))?;
            Ok(1)
        }
        None => {
            state.push_nil();
            Ok(1)
        }
    }
}

fn lua_rawget(state: &mut LuaState) -> LuaResult<usize> {
    let t = state
        .get_arg(1)
        .ok_or_else(|| state.error("bad argument #1 to 'rawget' (table expected)".into()))?;
    let k = state.get_arg(2).unwrap_or(LuaValue::Nil);
    let v = state.raw_get(&t, &k);
    state.push_value(v)?;
    Ok(1)
}

fn lua_rawset(state: &mut LuaState) -> LuaResult<usize> {
    let t = state
        .get_arg(1)
        .ok_or_else(|| state.error("bad argument #1 to 'rawset' (table expected)".into()))?;
    let k = state.get_arg(2).unwrap_or(LuaValue::Nil);
    let v = state.get_arg(3).unwrap_or(LuaValue::Nil);
    state.raw_set(&t, k, v);
    state.push_value(t)?;
    Ok(1)
}

fn lua_rawequal(state: &mut LuaState) -> LuaResult<usize> {
    let a = state.get_arg(1).unwrap_or(LuaValue::Nil);
    let b = state.get_arg(2).unwrap_or(LuaValue::Nil);
    state.push_boolean(crate::lua_vm::arithmetic::raw_equals(a, b));
    Ok(1)
}

fn lua_rawlen(state: &mut LuaState) -> LuaResult<usize> {
    let v = state.get_arg(1).unwrap_or(LuaValue::Nil);
    match v {
        LuaValue::Table(id) => state.push_number(state.vm.heap.tables.get(id.0).length() as f64),
        LuaValue::String(id) => state.push_number(state.vm.heap.strings.get(id.0).len() as f64),
        _ => return Err(state.error("table or string expected".into())),
    }
    Ok(1)
}

fn lua_assert(state: &mut LuaState) -> LuaResult<usize> {
    let v = state.get_arg(1).unwrap_or(LuaValue::Nil);
    if v.is_truthy() {
        let args = state.get_args();
        for a in &args {
            state.push_value(*a)?;
        }
        Ok(args.len())
    } else {
        match state.get_arg(2) {
            Some(msg) => {
                let text = tostring_value(state, msg)?;
                Err(LuaError::with_value(LuaErrorKind::RuntimeError, text, msg))
            }
            None => Err(state.error("assertion failed!".to_string())),
        }
    }
}

fn lua_error(state: &mut LuaState) -> LuaResult<usize> {
    let msg = state.get_arg(1).unwrap_or(LuaValue::Nil);
    let level = state.get_arg(2).and_then(|v| state.coerce_to_number(v)).unwrap_or(1.0);
    if let LuaValue::String(id) = msg {
        if level > 0.0 {
            let text = state.vm.heap.strings.get(id.0).to_str_lossy().into_owned();
            return Err(state.error(text));
        }
    }
    let text = tostring_value(state, msg)?;
    Err(LuaError::with_value(LuaErrorKind::RuntimeError, text, msg))
}

fn lua_pcall(state: &mut LuaState) -> LuaResult<usize> {
    let n = state.get_top();
    if n < 1 {
        return Err(state.error("bad argument #1 to 'pcall' (value expected)".into()));
    }
    let func = state.get(1);
    let args: Vec<LuaValue> = (2..=n).map(|i| state.get(i)).collect();
    let depth_before = state.exec().call_stack.len();
    let stack_before = state.exec().stack.len();
    match call_value(state, func, args, -1) {
        Ok(results) => {
            state.push_boolean(true);
            let count = results.len();
            for v in results {
                state.push_value(v)?;
            }
            Ok(1 + count)
        }
        Err(e) if e.kind != LuaErrorKind::Yield => {
            state.exec_mut().call_stack.truncate(depth_before);
            state.exec_mut().stack.truncate(stack_before);
            state.push_boolean(false);
            let v = e.value_or_message(state);
            let _ = state.push_value(v);
            Ok(2)
        }
        Err(e) => Err(e),
    }
}

fn lua_xpcall(state: &mut LuaState) -> LuaResult<usize> {
    let n = state.get_top();
    if n < 2 {
        return Err(state.error("bad argument #2 to 'xpcall' (value expected)".into()));
    }
    let func = state.get(1);
    let handler = state.get(2);
    let args: Vec<LuaValue> = (3..=n).map(|i| state.get(i)).collect();
    let depth_before = state.exec().call_stack.len();
    let stack_before = state.exec().stack.len();
    match call_value(state, func, args, -1) {
        Ok(results) => {
            state.push_boolean(true);
            let count = results.len();
            for v in results {
                state.push_value(v)?;
            }
            Ok(1 + count)
        }
        Err(e) if e.kind != LuaErrorKind::Yield => {
            state.exec_mut().call_stack.truncate(depth_before);
            state.exec_mut().stack.truncate(stack_before);
            let errval = e.value_or_message(state);
            match call_value(state, handler, vec![errval], -1) {
                Ok(hres) => {
                    state.push_boolean(false);
                    let v = hres.into_iter().next().unwrap_or(LuaValue::Nil);
                    let _ = state.push_value(v);
                    Ok(2)
                }
                Err(_) => {
                    state.push_boolean(false);
                    state.push_string("error in error handling");
                    Ok(2)
                }
            }
        }
        Err(e) => Err(e),
    }
}

fn lua_select(state: &mut LuaState) -> LuaResult<usize> {
    let top = state.get_top();
    let nvararg = (top - 1).max(0);
    let sel = state
        .get_arg(1)
        .ok_or_else(|| state.error("bad argument #1 to 'select' (number expected, got no value)".into()))?;
    if let LuaValue::String(id) = sel {
        if state.vm.heap.strings.get(id.0).as_bytes() == b"#" {
            state.push_number(nvararg as f64);
            return Ok(1);
        }
    }
    let idx_f = state
        .coerce_to_number(sel)
        .ok_or_else(|| state.error("bad argument #1 to 'select' (number expected)".into()))?;
    let mut idx = idx_f as i64;
    if idx < 0 {
        idx = nvararg as i64 + idx + 1;
    }
    if idx < 1 {
        return Err(state.error("bad argument #1 to 'select' (index out of range)".into()));
    }
    let mut count = 0usize;
    let mut i = idx;
    while i <= nvararg as i64 {
        let v = state.get((1 + i) as i32);
        state.push_value(v)?;
        count += 1;
        i += 1;
    }
    Ok(count)
}

fn lua_unpack(state: &mut LuaState) -> LuaResult<usize> {
    let t = state
        .get_arg(1)
        .ok_or_else(|| state.error("bad argument #1 to 'unpack' (table expected, got no value)".into()))?;
    let i = state
        .get_arg(2)
        .and_then(|v| state.coerce_to_number(v))
        .unwrap_or(1.0) as i64;
    let j = match state.get_arg(3) {
        Some(v) => state.coerce_to_number(v).unwrap_or(0.0) as i64,
        None => {
            let id = t
                .as_table()
                .ok_or_else(|| state.error("bad argument #1 to 'unpack' (table expected)".into()))?;
            state.vm.heap.tables.get(id.0).length()
        }
    };
    let mut count = 0usize;
    let mut k = i;
    while k <= j {
        let v = state.raw_geti(&t, k);
        state.push_value(v)?;
        count += 1;
        k += 1;
    }
    Ok(count)
}

fn lua_collectgarbage(state: &mut LuaState) -> LuaResult<usize> {
    let opt = state
        .get_arg(1)
        .and_then(|v| state.to_str_bytes(v))
        .unwrap_or_else(|| b"collect".to_vec());
    match opt.as_slice() {
        b"count" => {
            state.push_number(state.vm.heap.bytes_allocated as f64 / 1024.0);
        }
        _ => {
            let thread = state.thread;
            state.vm.collect_garbage(thread);
            state.push_number(0.0);
        }
    }
    Ok(1)
}
