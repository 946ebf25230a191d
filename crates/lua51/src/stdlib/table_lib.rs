//! `table.*`.

use crate::lib_module;
use crate::lua_value::LuaValue;
use crate::lua_vm::arithmetic::less_than;
use crate::lua_vm::error::LuaResult;
use crate::lua_vm::LuaState;

pub fn module() -> super::LibraryModule {
    lib_module!("table", {
        "insert" => table_insert,
        "remove" => table_remove,
        "concat" => table_concat,
        "sort" => table_sort,
    })
}

fn arg_table(state: &mut LuaState, i: i32, fname: &str) -> LuaResult<crate::gc::TableId> {
    let v = state
        .get_arg(i)
        .ok_or_else(|| state.error(format!("bad argument #{i} to '{fname}' (table expected, got no value)")))?;
    v.as_table()
        .ok_or_else(|| state.error(format!("bad argument #{i} to '{fname}' (table expected, got {})", v.type_name())))
}

fn table_insert(state: &mut LuaState) -> LuaResult<usize> {
    let id = arg_table(state, 1, "insert")?;
    let n = state.get_top();
    let table = LuaValue::Table(id);
    let len = state.vm.heap.tables.get(id.0).length();
    if n == 2 {
        let v = state.get(2);
        state.raw_seti(&table, len + 1, v);
    } else if n == 3 {
        let pos = state
            .to_number(2)
            .ok_or_else(|| state.error("bad argument #2 to 'insert' (number expected)".into()))?
            as i64;
        if pos < 1 || pos > len + 1 {
            return Err(state.error("bad argument #2 to 'insert' (position out of bounds)".into()));
        }
        let v = state.get(3);
        let mut k = len;
        while k >= pos {
            let moved = state.raw_geti(&table, k);
            state.raw_seti(&table, k + 1, moved);
            k -= 1;
        }
        state.raw_seti(&table, pos, v);
    } else {
        return Err(state.error("wrong number of arguments to 'insert'".into()));
    }
    Ok(0)
}

fn table_remove(state: &mut LuaState) -> LuaResult<usize> {
    let id = arg_table(state, 1, "remove")?;
    let table = LuaValue::Table(id);
    let len = state.vm.heap.tables.get(id.0).length();
    let pos = match state.get_arg(2) {
        Some(v) => state.coerce_to_number(v).unwrap_or(len as f64) as i64,
        None => len,
    };
    if len == 0 {
        state.push_nil();
        return Ok(1);
    }
    if pos != len && (pos < 1 || pos > len + 1) {
        return Err(state.error("bad argument #2 to 'remove' (position out of bounds)".into()));
    }
    let removed = state.raw_geti(&table, pos);
    let mut k = pos;
    while k < len {
        let moved = state.raw_geti(&table, k + 1);
        state.raw_seti(&table, k, moved);
        k += 1;
    }
    state.raw_seti(&table, len, LuaValue::Nil);
    state.push_value(removed)?;
    Ok(1)
}

fn table_concat(state: &mut LuaState) -> LuaResult<usize> {
    let id = arg_table(state, 1, "concat")?;
    let table = LuaValue::Table(id);
    let sep = match state.get_arg(2) {
        Some(v) => state.to_str_bytes(v).unwrap_or_default(),
        None => Vec::new(),
    };
    let len = state.vm.heap.tables.get(id.0).length();
    let i = state.get_arg(3).and_then(|v| state.coerce_to_number(v)).unwrap_or(1.0) as i64;
    let j = state.get_arg(4).and_then(|v| state.coerce_to_number(v)).unwrap_or(len as f64) as i64;

    let mut out = Vec::new();
    let mut k = i;
    while k <= j {
        let v = state.raw_geti(&table, k);
        let bytes = state.to_str_bytes(v).ok_or_else(|| {
            state.error(format!("invalid value (at index {k}) in table for 'concat'"))
        })?;
        out.extend_from_slice(&bytes);
        if k < j {
            out.extend_from_slice(&sep);
        }
        k += 1;
    }
    state.push_bytes(&out);
    Ok(1)
}

fn table_sort(state: &mut LuaState) -> LuaResult<usize> {
    let id = arg_table(state, 1, "sort")?;
    let table = LuaValue::Table(id);
    let comparator = state.get_arg(2);
    let len = state.vm.heap.tables.get(id.0).length();

    let mut items: Vec<LuaValue> = (1..=len).map(|k| state.raw_geti(&table, k)).collect();

    // Simple insertion sort: table sizes in practice are small, and it
    // keeps the comparator call count easy to reason about if it errors
    // partway through (quicksort would leave a half-shuffled table).
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 {
            let less = compare(state, comparator, items[j], items[j - 1])?;
            if !less {
                break;
            }
            items.swap(j, j - 1);
            j -= 1;
        }
    }

    for (idx, v) in items.into_iter().enumerate() {
        state.raw_seti(&table, idx as i64 + 1, v);
    }
    Ok(0)
}

fn compare(state: &mut LuaState, comparator: Option<LuaValue>, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    match comparator {
        Some(f) if !f.is_nil() => {
            let results = crate::lua_vm::execute::call_value(state, f, vec![a, b], 1)?;
            Ok(results.into_iter().next().unwrap_or(LuaValue::Nil).is_truthy())
        }
        _ => less_than(state, a, b),
    }
}
