//! `math.*`. Lua 5.1 numbers are a single IEEE double (spec §3.1), so unlike
//! later Lua versions there is no integer/float split to preserve here —
//! every function just works in `f64`.

use crate::lib_module;
use crate::lua_value::LuaValue;
use crate::lua_vm::error::LuaResult;
use crate::lua_vm::LuaState;
use rand::Rng;

pub fn module() -> super::LibraryModule {
    lib_module!("math", {
        "abs" => math_abs,
        "acos" => math_acos,
        "asin" => math_asin,
        "atan" => math_atan,
        "ceil" => math_ceil,
        "cos" => math_cos,
        "deg" => math_deg,
        "exp" => math_exp,
        "floor" => math_floor,
        "fmod" => math_fmod,
        "frexp" => math_frexp,
        "ldexp" => math_ldexp,
        "log" => math_log,
        "max" => math_max,
        "min" => math_min,
        "modf" => math_modf,
        "pow" => math_pow,
        "rad" => math_rad,
        "random" => math_random,
        "randomseed" => math_randomseed,
        "sin" => math_sin,
        "sqrt" => math_sqrt,
        "tan" => math_tan,
    })
}

/// Install the module, then add the constants (`lib_module!` only knows
/// about functions; `pi`/`huge` aren't closures).
pub fn install(state: &mut LuaState) {
    let table = super::install(state, module());
    if let Some(table) = table {
        let pi = state.create_string("pi");
        state.raw_set(&table, pi, LuaValue::Number(std::f64::consts::PI));
        let huge = state.create_string("huge");
        state.raw_set(&table, huge, LuaValue::Number(f64::INFINITY));
    }
}

fn checknumber(state: &mut LuaState, i: i32, fname: &str) -> LuaResult<f64> {
    state
        .get_arg(i)
        .and_then(|v| state.coerce_to_number(v))
        .ok_or_else(|| state.error(format!("bad argument #{i} to '{fname}' (number expected)")))
}

fn math_abs(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "abs")?;
    state.push_number(x.abs());
    Ok(1)
}

fn math_acos(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "acos")?;
    state.push_number(x.acos());
    Ok(1)
}

fn math_asin(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "asin")?;
    state.push_number(x.asin());
    Ok(1)
}

fn math_atan(state: &mut LuaState) -> LuaResult<usize> {
    let y = checknumber(state, 1, "atan")?;
    let x = state.get_arg(2).and_then(|v| state.coerce_to_number(v)).unwrap_or(1.0);
    state.push_number(y.atan2(x));
    Ok(1)
}

fn math_ceil(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "ceil")?;
    state.push_number(x.ceil());
    Ok(1)
}

fn math_cos(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "cos")?;
    state.push_number(x.cos());
    Ok(1)
}

fn math_deg(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "deg")?;
    state.push_number(x.to_degrees());
    Ok(1)
}

fn math_exp(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "exp")?;
    state.push_number(x.exp());
    Ok(1)
}

fn math_floor(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "floor")?;
    state.push_number(x.floor());
    Ok(1)
}

fn math_fmod(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "fmod")?;
    let y = checknumber(state, 2, "fmod")?;
    state.push_number(x % y);
    Ok(1)
}

fn math_frexp(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "frexp")?;
    if x == 0.0 || !x.is_finite() {
        state.push_number(x);
        state.push_number(0.0);
        return Ok(2);
    }
    let bits = x.to_bits();
    let exp = ((bits >> 52) & 0x7ff) as i32 - 1022;
    let mantissa = x / 2f64.powi(exp);
    state.push_number(mantissa);
    state.push_number(exp as f64);
    Ok(2)
}

fn math_ldexp(state: &mut LuaState) -> LuaResult<usize> {
    let m = checknumber(state, 1, "ldexp")?;
    let e = checknumber(state, 2, "ldexp")?;
    state.push_number(m * 2f64.powi(e as i32));
    Ok(1)
}

fn math_log(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "log")?;
    match state.get_arg(2).and_then(|v| state.coerce_to_number(v)) {
        Some(base) => state.push_number(x.log(base)),
        None => state.push_number(x.ln()),
    }
    Ok(1)
}

fn math_max(state: &mut LuaState) -> LuaResult<usize> {
    let n = state.get_top();
    if n < 1 {
        return Err(state.error("bad argument #1 to 'max' (value expected)".into()));
    }
    let mut best = checknumber(state, 1, "max")?;
    for i in 2..=n {
        best = best.max(checknumber(state, i, "max")?);
    }
    state.push_number(best);
    Ok(1)
}

fn math_min(state: &mut LuaState) -> LuaResult<usize> {
    let n = state.get_top();
    if n < 1 {
        return Err(state.error("bad argument #1 to 'min' (value expected)".into()));
    }
    let mut best = checknumber(state, 1, "min")?;
    for i in 2..=n {
        best = best.min(checknumber(state, i, "min")?);
    }
    state.push_number(best);
    Ok(1)
}

fn math_modf(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "modf")?;
    let int_part = x.trunc();
    let frac_part = if x.is_infinite() { 0.0 } else { x - int_part };
    state.push_number(int_part);
    state.push_number(frac_part);
    Ok(2)
}

fn math_pow(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "pow")?;
    let y = checknumber(state, 2, "pow")?;
    state.push_number(x.powf(y));
    Ok(1)
}

fn math_rad(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "rad")?;
    state.push_number(x.to_radians());
    Ok(1)
}

/// `math.random()` → `[0,1)`; `math.random(m)` → `[1,m]`;
/// `math.random(m,n)` → `[m,n]`.
fn math_random(state: &mut LuaState) -> LuaResult<usize> {
    let n = state.get_top();
    let mut rng = rand::thread_rng();
    match n {
        0 => state.push_number(rng.gen::<f64>()),
        1 => {
            let m = checknumber(state, 1, "random")? as i64;
            if m < 1 {
                return Err(state.error("bad argument #1 to 'random' (interval is empty)".into()));
            }
            state.push_number(rng.gen_range(1..=m) as f64);
        }
        _ => {
            let lo = checknumber(state, 1, "random")? as i64;
            let hi = checknumber(state, 2, "random")? as i64;
            if lo > hi {
                return Err(state.error("bad argument #2 to 'random' (interval is empty)".into()));
            }
            state.push_number(rng.gen_range(lo..=hi) as f64);
        }
    }
    Ok(1)
}

/// Lua 5.1's `math.randomseed` reseeds the global generator; this crate
/// draws from `rand::thread_rng()` per call instead of keeping a seedable
/// generator on `LuaVM`, so there's nothing to actually reseed — accept and
/// discard the argument for script compatibility.
fn math_randomseed(state: &mut LuaState) -> LuaResult<usize> {
    let _ = checknumber(state, 1, "randomseed");
    Ok(0)
}

fn math_sin(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "sin")?;
    state.push_number(x.sin());
    Ok(1)
}

fn math_sqrt(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "sqrt")?;
    state.push_number(x.sqrt());
    Ok(1)
}

fn math_tan(state: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(state, 1, "tan")?;
    state.push_number(x.tan());
    Ok(1)
}
