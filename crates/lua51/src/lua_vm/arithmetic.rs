//! Arithmetic, comparison, concatenation and length, each with its
//! metamethod fallback (spec §4.4).

use crate::lua_value::LuaValue;
use crate::lua_vm::error::{LuaError, LuaResult};
use crate::lua_vm::lua_state::LuaState;
use crate::lua_vm::opcode::OpCode;

fn arith_event(op: OpCode) -> &'static str {
    match op {
        OpCode::Add => "__add",
        OpCode::Sub => "__sub",
        OpCode::Mul => "__mul",
        OpCode::Div => "__div",
        OpCode::Mod => "__mod",
        OpCode::Pow => "__pow",
        OpCode::Unm => "__unm",
        _ => unreachable!("not an arithmetic opcode"),
    }
}

fn raw_arith(op: OpCode, a: f64, b: f64) -> f64 {
    match op {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Mod => {
            // Lua's `%` is floored, matching `a - floor(a/b)*b`, not `fmod`.
            let r = a - (a / b).floor() * b;
            r
        }
        OpCode::Pow => a.powf(b),
        OpCode::Unm => -a,
        _ => unreachable!(),
    }
}

fn metatable_of(state: &LuaState, v: LuaValue) -> Option<crate::gc::TableId> {
    match v {
        LuaValue::Table(id) => state.vm.heap.tables.get(id.0).metatable,
        LuaValue::Userdata(id) => state.vm.heap.userdata.get(id.0).metatable,
        LuaValue::String(_) => state.vm.string_metatable,
        _ => None,
    }
}

fn metamethod(state: &LuaState, v: LuaValue, event: &str) -> Option<LuaValue> {
    let mt = metatable_of(state, v)?;
    let key = state.vm.heap.find_string(event.as_bytes())?;
    let mm = state.vm.heap.tables.get(mt.0).get(&LuaValue::String(key));
    if mm.is_nil() {
        None
    } else {
        Some(mm)
    }
}

/// `R[a] OP R[b]`, coercing strings per spec's arithmetic coercion rule,
/// else trying `__add`/`__sub`/etc on either operand, else raising a
/// type error naming the offending operand.
pub fn binary_arith(state: &mut LuaState, op: OpCode, a: LuaValue, b: LuaValue) -> LuaResult<LuaValue> {
    if let (Some(x), Some(y)) = (state.coerce_to_number(a), state.coerce_to_number(b)) {
        return Ok(LuaValue::Number(raw_arith(op, x, y)));
    }
    let event = arith_event(op);
    if let Some(mm) = metamethod(state, a, event).or_else(|| metamethod(state, b, event)) {
        let results = crate::lua_vm::execute::call_value(state, mm, vec![a, b], 1)?;
        return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil));
    }
    let bad = if state.coerce_to_number(a).is_none() { a } else { b };
    Err(state.error(format!(
        "attempt to perform arithmetic on a {} value",
        bad.type_name()
    )))
}

pub fn unary_minus(state: &mut LuaState, v: LuaValue) -> LuaResult<LuaValue> {
    if let Some(x) = state.coerce_to_number(v) {
        return Ok(LuaValue::Number(-x));
    }
    if let Some(mm) = metamethod(state, v, "__unm") {
        let results = crate::lua_vm::execute::call_value(state, mm, vec![v, v], 1)?;
        return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil));
    }
    Err(state.error(format!(
        "attempt to perform arithmetic on a {} value",
        v.type_name()
    )))
}

/// `..`: numbers coerce to their canonical string form; anything else needs
/// `__concat` on either side.
pub fn concat(state: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<LuaValue> {
    let a_ok = matches!(a, LuaValue::String(_) | LuaValue::Number(_));
    let b_ok = matches!(b, LuaValue::String(_) | LuaValue::Number(_));
    if a_ok && b_ok {
        let mut bytes = state.to_str_bytes(a).unwrap();
        bytes.extend(state.to_str_bytes(b).unwrap());
        let id = state.vm.heap.alloc_string(&bytes);
        return Ok(LuaValue::String(id));
    }
    if let Some(mm) = metamethod(state, a, "__concat").or_else(|| metamethod(state, b, "__concat")) {
        let results = crate::lua_vm::execute::call_value(state, mm, vec![a, b], 1)?;
        return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil));
    }
    let bad = if !a_ok { a } else { b };
    Err(state.error(format!("attempt to concatenate a {} value", bad.type_name())))
}

pub fn length(state: &mut LuaState, v: LuaValue) -> LuaResult<LuaValue> {
    match v {
        LuaValue::String(id) => {
            return Ok(LuaValue::Number(state.vm.heap.strings.get(id.0).len() as f64))
        }
        LuaValue::Table(id) => {
            if let Some(mm) = metamethod(state, v, "__len") {
                let results = crate::lua_vm::execute::call_value(state, mm, vec![v], 1)?;
                return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil));
            }
            return Ok(LuaValue::Number(state.vm.heap.tables.get(id.0).length() as f64));
        }
        _ => {}
    }
    Err(state.error(format!("attempt to get length of a {} value", v.type_name())))
}

/// Raw equality, per spec §4.4: different types are never equal (except via
/// `__eq`, consulted only once both operands already share a type and raw
/// equality failed).
pub fn raw_equals(a: LuaValue, b: LuaValue) -> bool {
    match (a, b) {
        (LuaValue::Nil, LuaValue::Nil) => true,
        (LuaValue::Boolean(x), LuaValue::Boolean(y)) => x == y,
        (LuaValue::Number(x), LuaValue::Number(y)) => x == y,
        (LuaValue::String(x), LuaValue::String(y)) => x == y,
        (LuaValue::Table(x), LuaValue::Table(y)) => x == y,
        (LuaValue::Function(x), LuaValue::Function(y)) => x == y,
        (LuaValue::Userdata(x), LuaValue::Userdata(y)) => x == y,
        (LuaValue::Thread(x), LuaValue::Thread(y)) => x == y,
        _ => false,
    }
}

fn same_type(a: LuaValue, b: LuaValue) -> bool {
    std::mem::discriminant(&a) == std::mem::discriminant(&b)
}

pub fn equals(state: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    if raw_equals(a, b) {
        return Ok(true);
    }
    if !same_type(a, b) {
        return Ok(false);
    }
    if matches!(a, LuaValue::Table(_) | LuaValue::Userdata(_)) {
        if let Some(mm) = metamethod(state, a, "__eq").or_else(|| metamethod(state, b, "__eq")) {
            let results = crate::lua_vm::execute::call_value(state, mm, vec![a, b], 1)?;
            return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil).is_truthy());
        }
    }
    Ok(false)
}

pub fn less_than(state: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => return Ok(x < y),
        (LuaValue::String(x), LuaValue::String(y)) => {
            let xs = state.vm.heap.strings.get(x.0).as_bytes().to_vec();
            let ys = state.vm.heap.strings.get(y.0).as_bytes().to_vec();
            return Ok(xs < ys);
        }
        _ => {}
    }
    if let Some(mm) = metamethod(state, a, "__lt").or_else(|| metamethod(state, b, "__lt")) {
        let results = crate::lua_vm::execute::call_value(state, mm, vec![a, b], 1)?;
        return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil).is_truthy());
    }
    Err(comparison_error(a, b))
}

pub fn less_equal(state: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => return Ok(x <= y),
        (LuaValue::String(x), LuaValue::String(y)) => {
            let xs = state.vm.heap.strings.get(x.0).as_bytes().to_vec();
            let ys = state.vm.heap.strings.get(y.0).as_bytes().to_vec();
            return Ok(xs <= ys);
        }
        _ => {}
    }
    if let Some(mm) = metamethod(state, a, "__le").or_else(|| metamethod(state, b, "__le")) {
        let results = crate::lua_vm::execute::call_value(state, mm, vec![a, b], 1)?;
        return Ok(results.into_iter().next().unwrap_or(LuaValue::Nil).is_truthy());
    }
    Err(comparison_error(a, b))
}

fn comparison_error(a: LuaValue, b: LuaValue) -> LuaError {
    if a.type_name() == b.type_name() {
        LuaError::new(
            crate::lua_vm::error::LuaErrorKind::RuntimeError,
            format!("attempt to compare two {} values", a.type_name()),
        )
    } else {
        LuaError::new(
            crate::lua_vm::error::LuaErrorKind::RuntimeError,
            format!(
                "attempt to compare {} with {}",
                a.type_name(),
                b.type_name()
            ),
        )
    }
}
