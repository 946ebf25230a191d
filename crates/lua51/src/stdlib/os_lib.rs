//! `os.*`. Date/time formatting uses `chrono` (workspace dependency, spec's
//! ambient-stack addition) rather than hand-rolled calendar math, the way a
//! production port of this surface would.

use crate::lib_module;
use crate::lua_value::LuaValue;
use crate::lua_vm::error::LuaResult;
use crate::lua_vm::LuaState;
use chrono::{Datelike, Local, TimeZone, Timelike};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn module() -> super::LibraryModule {
    lib_module!("os", {
        "time" => os_time,
        "clock" => os_clock,
        "date" => os_date,
        "difftime" => os_difftime,
        "getenv" => os_getenv,
        "exit" => os_exit,
        "remove" => os_remove,
        "rename" => os_rename,
        "tmpname" => os_tmpname,
    })
}

fn os_time(state: &mut LuaState) -> LuaResult<usize> {
    if let Some(t) = state.get_arg(1).filter(|v| v.is_table()) {
        let get_field = |state: &mut LuaState, name: &str, default: Option<i64>| -> LuaResult<i64> {
            let key = state.create_string(name);
            let v = state.raw_get(&t, &key);
            match state.coerce_to_number(v) {
                Some(n) => Ok(n as i64),
                None => default.ok_or_else(|| state.error(format!("field '{name}' missing in date table"))),
            }
        };
        let year = get_field(state, "year", None)?;
        let month = get_field(state, "month", None)?;
        let day = get_field(state, "day", None)?;
        let hour = get_field(state, "hour", Some(12))?;
        let min = get_field(state, "min", Some(0))?;
        let sec = get_field(state, "sec", Some(0))?;
        let dt = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            .and_then(|d| d.and_hms_opt(hour as u32, min as u32, sec as u32))
            .ok_or_else(|| state.error("field out of range in date table".into()))?;
        let local = Local.from_local_datetime(&dt).single();
        state.push_number(local.map(|l| l.timestamp() as f64).unwrap_or(dt.and_utc().timestamp() as f64));
        return Ok(1);
    }
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    state.push_number(now.as_secs() as f64);
    Ok(1)
}

fn os_clock(state: &mut LuaState) -> LuaResult<usize> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    state.push_number(now.as_secs_f64());
    Ok(1)
}

fn os_difftime(state: &mut LuaState) -> LuaResult<usize> {
    let t2 = state
        .get_arg(1)
        .and_then(|v| state.coerce_to_number(v))
        .ok_or_else(|| state.error("bad argument #1 to 'difftime' (number expected)".into()))?;
    let t1 = state
        .get_arg(2)
        .and_then(|v| state.coerce_to_number(v))
        .ok_or_else(|| state.error("bad argument #2 to 'difftime' (number expected)".into()))?;
    state.push_number(t2 - t1);
    Ok(1)
}

/// `os.date([format [, time]])`: `*t`/`!*t` return a table of fields; a
/// leading `!` means UTC instead of local time; anything else is a
/// `strftime`-style format string, which `chrono`'s `format()` speaks
/// directly.
fn os_date(state: &mut LuaState) -> LuaResult<usize> {
    let fmt = state
        .get_arg(1)
        .and_then(|v| state.to_str_bytes(v))
        .unwrap_or_else(|| b"%c".to_vec());
    let fmt = String::from_utf8_lossy(&fmt).into_owned();
    let time = state
        .get_arg(2)
        .and_then(|v| state.coerce_to_number(v))
        .unwrap_or_else(|| SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as f64);

    let (fmt, utc) = match fmt.strip_prefix('!') {
        Some(rest) => (rest.to_string(), true),
        None => (fmt, false),
    };

    let utc_dt = chrono::Utc
        .timestamp_opt(time as i64, 0)
        .single()
        .ok_or_else(|| state.error("time out of range".into()))?;

    if fmt == "*t" {
        let local = utc_dt.with_timezone(&Local);
        let (year, month, day, hour, min, sec, wday, yday) = if utc {
            (
                utc_dt.year(),
                utc_dt.month(),
                utc_dt.day(),
                utc_dt.hour(),
                utc_dt.minute(),
                utc_dt.second(),
                utc_dt.weekday().num_days_from_sunday(),
                utc_dt.ordinal(),
            )
        } else {
            (
                local.year(),
                local.month(),
                local.day(),
                local.hour(),
                local.minute(),
                local.second(),
                local.weekday().num_days_from_sunday(),
                local.ordinal(),
            )
        };
        let t = state.create_table(0, 8);
        let set = |state: &mut LuaState, name: &str, v: i64| {
            let key = state.create_string(name);
            state.raw_set(&t, key, LuaValue::Number(v as f64));
        };
        set(state, "year", year as i64);
        set(state, "month", month as i64);
        set(state, "day", day as i64);
        set(state, "hour", hour as i64);
        set(state, "min", min as i64);
        set(state, "sec", sec as i64);
        set(state, "wday", wday as i64 + 1);
        set(state, "yday", yday as i64);
        let isdst = state.create_string("isdst");
        state.raw_set(&t, isdst, LuaValue::Boolean(false));
        state.push_value(t)?;
        return Ok(1);
    }

    let rendered = if utc {
        utc_dt.format(&fmt).to_string()
    } else {
        utc_dt.with_timezone(&Local).format(&fmt).to_string()
    };
    state.push_string(&rendered);
    Ok(1)
}

fn os_getenv(state: &mut LuaState) -> LuaResult<usize> {
    let name = state
        .get_arg(1)
        .and_then(|v| state.to_str_bytes(v))
        .ok_or_else(|| state.error("bad argument #1 to 'getenv' (string expected)".into()))?;
    let name = String::from_utf8_lossy(&name).into_owned();
    match std::env::var(&name) {
        Ok(v) => {
            state.push_string(&v);
        }
        Err(_) => state.push_nil(),
    }
    Ok(1)
}

fn os_exit(state: &mut LuaState) -> LuaResult<usize> {
    let code = state.get_arg(1).and_then(|v| state.coerce_to_number(v)).unwrap_or(0.0);
    std::process::exit(code as i32);
}

fn os_remove(state: &mut LuaState) -> LuaResult<usize> {
    let name = state
        .get_arg(1)
        .and_then(|v| state.to_str_bytes(v))
        .ok_or_else(|| state.error("bad argument #1 to 'remove' (string expected)".into()))?;
    let name = String::from_utf8_lossy(&name).into_owned();
    match std::fs::remove_file(&name) {
        Ok(()) => {
            state.push_boolean(true);
            Ok(1)
        }
        Err(e) => {
            state.push_nil();
            state.push_string(&e.to_string());
            Ok(2)
        }
    }
}

fn os_rename(state: &mut LuaState) -> LuaResult<usize> {
    let from = state
        .get_arg(1)
        .and_then(|v| state.to_str_bytes(v))
        .ok_or_else(|| state.error("bad argument #1 to 'rename' (string expected)".into()))?;
    let to = state
        .get_arg(2)
        .and_then(|v| state.to_str_bytes(v))
        .ok_or_else(|| state.error("bad argument #2 to 'rename' (string expected)".into()))?;
    let from = String::from_utf8_lossy(&from).into_owned();
    let to = String::from_utf8_lossy(&to).into_owned();
    match std::fs::rename(&from, &to) {
        Ok(()) => {
            state.push_boolean(true);
            Ok(1)
        }
        Err(e) => {
            state.push_nil();
            state.push_string(&e.to_string());
            Ok(2)
        }
    }
}

fn os_tmpname(state: &mut LuaState) -> LuaResult<usize> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    state.push_string(&format!("/tmp/lua_{}_{}", std::process::id(), now.as_nanos()));
    Ok(1)
}
