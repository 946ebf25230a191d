//! `string.*` (spec §8.3 exercises `string.match`/`gsub` end to end). Every
//! function treats strings as byte sequences (spec §3.2), so indices here
//! are byte offsets, not codepoints — same as the reference implementation.

use super::lua_pattern::{self, Capture};
use crate::lib_module;
use crate::lua_value::LuaValue;
use crate::lua_vm::error::LuaResult;
use crate::lua_vm::execute::call_value;
use crate::lua_vm::LuaState;

pub fn module() -> super::LibraryModule {
    lib_module!("string", {
        "len" => string_len,
        "sub" => string_sub,
        "upper" => string_upper,
        "lower" => string_lower,
        "rep" => string_rep,
        "reverse" => string_reverse,
        "byte" => string_byte,
        "char" => string_char,
        "format" => string_format,
        "find" => string_find,
        "match" => string_match,
        "gmatch" => string_gmatch,
        "gsub" => string_gsub,
    })
}

/// `string.<fn>` also works as a method, `s:upper()`, via a metatable on
/// every string value whose `__index` is this table.
pub fn install_string_metatable(state: &mut LuaState, string_table: LuaValue) {
    let mt = state.create_table(0, 1);
    let index_key = state.create_string("__index");
    state.raw_set(&mt, index_key, string_table);
    if let Some(id) = mt.as_table() {
        state.vm.string_metatable = Some(id);
    }
}

fn arg_string(state: &mut LuaState, i: i32, fname: &str) -> LuaResult<Vec<u8>> {
    let v = state
        .get_arg(i)
        .ok_or_else(|| state.error(format!("bad argument #{i} to '{fname}' (string expected, got no value)")))?;
    state
        .to_str_bytes(v)
        .ok_or_else(|| state.error(format!("bad argument #{i} to '{fname}' (string expected, got {})", v.type_name())))
}

fn opt_int(state: &mut LuaState, i: i32, default: i64) -> i64 {
    match state.get_arg(i) {
        Some(v) => state.coerce_to_number(v).map(|n| n as i64).unwrap_or(default),
        None => default,
    }
}

/// Normalize a Lua 1-based, possibly-negative string index to a 0-based
/// byte offset clamped into `[0, len]`.
fn str_index(i: i64, len: usize) -> usize {
    if i >= 0 {
        (i as usize).min(len)
    } else {
        let from_end = len as i64 + i + 1;
        from_end.max(0) as usize
    }
}

fn string_len(state: &mut LuaState) -> LuaResult<usize> {
    let s = arg_string(state, 1, "len")?;
    state.push_number(s.len() as f64);
    Ok(1)
}

fn string_sub(state: &mut LuaState) -> LuaResult<usize> {
    let s = arg_string(state, 1, "sub")?;
    let len = s.len();
    let i_raw = opt_int(state, 2, 1);
    let j_raw = opt_int(state, 3, -1);
    let mut i = if i_raw == 0 { 1 } else if i_raw < 0 { (len as i64 + i_raw + 1).max(1) } else { i_raw };
    let mut j = if j_raw < 0 { len as i64 + j_raw + 1 } else { j_raw.min(len as i64) };
    if i < 1 {
        i = 1;
    }
    if j > len as i64 {
        j = len as i64;
    }
    if i > j {
        state.push_string("");
    } else {
        state.push_bytes(&s[(i as usize - 1)..(j as usize)]);
    }
    Ok(1)
}

fn string_upper(state: &mut LuaState) -> LuaResult<usize> {
    let s = arg_string(state, 1, "upper")?;
    let out: Vec<u8> = s.iter().map(|b| b.to_ascii_uppercase()).collect();
    state.push_bytes(&out);
    Ok(1)
}

fn string_lower(state: &mut LuaState) -> LuaResult<usize> {
    let s = arg_string(state, 1, "lower")?;
    let out: Vec<u8> = s.iter().map(|b| b.to_ascii_lowercase()).collect();
    state.push_bytes(&out);
    Ok(1)
}

fn string_rep(state: &mut LuaState) -> LuaResult<usize> {
    let s = arg_string(state, 1, "rep")?;
    let n = opt_int(state, 2, 0).max(0) as usize;
    state.push_bytes(&s.repeat(n));
    Ok(1)
}

fn string_reverse(state: &mut LuaState) -> LuaResult<usize> {
    let mut s = arg_string(state, 1, "reverse")?;
    s.reverse();
    state.push_bytes(&s);
    Ok(1)
}

fn string_byte(state: &mut LuaState) -> LuaResult<usize> {
    let s = arg_string(state, 1, "byte")?;
    let len = s.len();
    let i_raw = opt_int(state, 2, 1);
    let j_raw = opt_int(state, 3, i_raw);
    let i = if i_raw < 0 { str_index(i_raw, len) + 1 } else { i_raw.max(1) as usize };
    let j = if j_raw < 0 { str_index(j_raw, len) } else { (j_raw as usize).min(len) };
    let mut count = 0usize;
    if i >= 1 {
        for k in (i - 1)..j.min(len) {
            state.push_number(s[k] as f64);
            count += 1;
        }
    }
    Ok(count)
}

fn string_char(state: &mut LuaState) -> LuaResult<usize> {
    let n = state.get_top();
    let mut bytes = Vec::with_capacity(n.max(0) as usize);
    for i in 1..=n {
        let v = state
            .to_number(i)
            .ok_or_else(|| state.error(format!("bad argument #{i} to 'char' (number expected)")))?;
        bytes.push(v as u8);
    }
    state.push_bytes(&bytes);
    Ok(1)
}

fn string_format(state: &mut LuaState) -> LuaResult<usize> {
    let fmt = arg_string(state, 1, "format")?;
    let mut out = Vec::with_capacity(fmt.len());
    let mut arg_i = 2;
    let mut i = 0usize;
    while i < fmt.len() {
        let c = fmt[i];
        if c != b'%' {
            out.push(c);
            i += 1;
            continue;
        }
        i += 1;
        if i >= fmt.len() {
            return Err(state.error("invalid conversion to 'format'".into()));
        }
        if fmt[i] == b'%' {
            out.push(b'%');
            i += 1;
            continue;
        }
        let spec_start = i;
        while i < fmt.len() && matches!(fmt[i], b'-' | b'+' | b' ' | b'#' | b'0') {
            i += 1;
        }
        while i < fmt.len() && fmt[i].is_ascii_digit() {
            i += 1;
        }
        if i < fmt.len() && fmt[i] == b'.' {
            i += 1;
            while i < fmt.len() && fmt[i].is_ascii_digit() {
                i += 1;
            }
        }
        if i >= fmt.len() {
            return Err(state.error("invalid conversion to 'format'".into()));
        }
        let conv = fmt[i];
        let spec = std::str::from_utf8(&fmt[spec_start..i]).unwrap_or("");
        i += 1;

        let arg = state.get_arg(arg_i);
        match conv {
            b'd' | b'i' => {
                let n = arg
                    .and_then(|v| state.coerce_to_number(v))
                    .ok_or_else(|| state.error(format!("bad argument #{} to 'format'", arg_i - 1)))?;
                out.extend_from_slice(format_int(spec, n as i64).as_bytes());
                arg_i += 1;
            }
            b'u' => {
                let n = arg.and_then(|v| state.coerce_to_number(v)).unwrap_or(0.0);
                out.extend_from_slice(format_int(spec, n as i64).as_bytes());
                arg_i += 1;
            }
            b'x' => {
                let n = arg.and_then(|v| state.coerce_to_number(v)).unwrap_or(0.0);
                out.extend_from_slice(format!("{:x}", n as i64).as_bytes());
                arg_i += 1;
            }
            b'X' => {
                let n = arg.and_then(|v| state.coerce_to_number(v)).unwrap_or(0.0);
                out.extend_from_slice(format!("{:X}", n as i64).as_bytes());
                arg_i += 1;
            }
            b'o' => {
                let n = arg.and_then(|v| state.coerce_to_number(v)).unwrap_or(0.0);
                out.extend_from_slice(format!("{:o}", n as i64).as_bytes());
                arg_i += 1;
            }
            b'c' => {
                let n = arg.and_then(|v| state.coerce_to_number(v)).unwrap_or(0.0);
                out.push(n as u8);
                arg_i += 1;
            }
            b'f' | b'F' | b'g' | b'G' | b'e' | b'E' => {
                let n = arg
                    .and_then(|v| state.coerce_to_number(v))
                    .ok_or_else(|| state.error(format!("bad argument #{} to 'format'", arg_i - 1)))?;
                out.extend_from_slice(format_float(spec, conv, n).as_bytes());
                arg_i += 1;
            }
            b's' => {
                let v = arg.unwrap_or(LuaValue::Nil);
                let text = super::base::tostring_value(state, v)?;
                out.extend_from_slice(apply_string_spec(spec, text.as_bytes()).as_slice());
                arg_i += 1;
            }
            b'q' => {
                let v = arg.unwrap_or(LuaValue::Nil);
                let bytes = state.to_str_bytes(v).unwrap_or_default();
                out.push(b'"');
                for b in bytes {
                    match b {
                        b'"' | b'\\' => {
                            out.push(b'\\');
                            out.push(b);
                        }
                        b'\n' => out.extend_from_slice(b"\\n"),
                        b'\r' => out.extend_from_slice(b"\\r"),
                        0 => out.extend_from_slice(b"\\0"),
                        _ => out.push(b),
                    }
                }
                out.push(b'"');
                arg_i += 1;
            }
            other => {
                return Err(state.error(format!("invalid conversion '%{}' to 'format'", other as char)))
            }
        }
    }
    state.push_bytes(&out);
    Ok(1)
}

fn format_int(spec: &str, n: i64) -> String {
    let width: usize = spec.trim_start_matches(['-', '+', ' ', '#', '0']).split('.').next().unwrap_or("").parse().unwrap_or(0);
    let zero_pad = spec.starts_with('0') || spec.contains("0") && !spec.starts_with('-');
    let left = spec.starts_with('-');
    let mut s = n.to_string();
    if s.len() < width {
        let pad = width - s.len();
        if left {
            s.push_str(&" ".repeat(pad));
        } else if zero_pad {
            let (sign, digits) = if let Some(rest) = s.strip_prefix('-') {
                ("-", rest)
            } else {
                ("", s.as_str())
            };
            s = format!("{sign}{}{digits}", "0".repeat(pad));
        } else {
            s = format!("{}{s}", " ".repeat(pad));
        }
    }
    s
}

fn format_float(spec: &str, conv: u8, n: f64) -> String {
    let prec: usize = spec.split('.').nth(1).and_then(|p| p.parse().ok()).unwrap_or(6);
    match conv {
        b'f' | b'F' => format!("{n:.prec$}"),
        b'e' => format!("{n:.prec$e}"),
        b'E' => format!("{n:.prec$E}"),
        _ => format!("{n}"),
    }
}

fn apply_string_spec(spec: &str, bytes: &[u8]) -> Vec<u8> {
    let mut bytes = bytes.to_vec();
    if let Some(prec_str) = spec.split('.').nth(1) {
        if let Ok(prec) = prec_str.parse::<usize>() {
            bytes.truncate(prec);
        }
    }
    let width: usize = spec.trim_start_matches(['-', '+', ' ', '#', '0']).split('.').next().unwrap_or("").parse().unwrap_or(0);
    if bytes.len() < width {
        let pad = width - bytes.len();
        if spec.starts_with('-') {
            bytes.extend(std::iter::repeat(b' ').take(pad));
        } else {
            let mut padded = vec![b' '; pad];
            padded.extend_from_slice(&bytes);
            bytes = padded;
        }
    }
    bytes
}

fn push_capture(state: &mut LuaState, cap: &Capture) {
    match cap {
        Capture::Str(s) => {
            state.push_bytes(s);
        }
        Capture::Pos(p) => state.push_number(*p as f64),
    }
}

fn string_find(state: &mut LuaState) -> LuaResult<usize> {
    let s = arg_string(state, 1, "find")?;
    let pat = arg_string(state, 2, "find")?;
    let init = str_index(opt_int(state, 3, 1), s.len());
    let plain = state.get_arg(4).map(|v| v.is_truthy()).unwrap_or(false);

    if plain || !pat.iter().any(|&c| b"^$*+?.([%-".contains(&c)) {
        if let Some(pos) = find_plain(&s, &pat, init) {
            state.push_number((pos + 1) as f64);
            state.push_number((pos + pat.len()) as f64);
            return Ok(2);
        }
        state.push_nil();
        return Ok(1);
    }

    match lua_pattern::find(&s, &pat, init).map_err(|e| state.error(e.0))? {
        Some(m) => {
            state.push_number((m.start + 1) as f64);
            state.push_number(m.end as f64);
            let has_explicit_captures = !m.captures.is_empty()
                && !(m.captures.len() == 1
                    && matches!(&m.captures[0], Capture::Str(cs) if cs.as_slice() == &s[m.start..m.end]));
            if has_explicit_captures {
                for c in &m.captures {
                    push_capture(state, c);
                }
                Ok(2 + m.captures.len())
            } else {
                Ok(2)
            }
        }
        None => {
            state.push_nil();
            Ok(1)
        }
    }
}

fn find_plain(haystack: &[u8], needle: &[u8], init: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(init.min(haystack.len()));
    }
    if init >= haystack.len() {
        return None;
    }
    haystack[init..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + init)
}

fn string_match(state: &mut LuaState) -> LuaResult<usize> {
    let s = arg_string(state, 1, "match")?;
    let pat = arg_string(state, 2, "match")?;
    let init = str_index(opt_int(state, 3, 1), s.len());
    match lua_pattern::find(&s, &pat, init).map_err(|e| state.error(e.0))? {
        Some(m) => {
            for c in &m.captures {
                push_capture(state, c);
            }
            Ok(m.captures.len())
        }
        None => {
            state.push_nil();
            Ok(1)
        }
    }
}

struct GmatchState {
    src: Vec<u8>,
    pat: Vec<u8>,
}

fn string_gmatch(state: &mut LuaState) -> LuaResult<usize> {
    let s = arg_string(state, 1, "gmatch")?;
    let pat = arg_string(state, 2, "gmatch")?;
    let src_v = state.make_string(&s);
    let pat_v = state.make_string(&pat);
    let pos_v = LuaValue::Number(0.0);
    let iter = super::alloc_host_closure_with_upvalues(state, gmatch_aux, "gmatch.iterator", vec![src_v, pat_v, pos_v]);
    state.push_value(iter)?;
    Ok(1)
}

fn gmatch_aux(state: &mut LuaState) -> LuaResult<usize> {
    let src = match state.upvalue(0) {
        LuaValue::String(id) => state.vm.heap.strings.get(id.0).as_bytes().to_vec(),
        _ => Vec::new(),
    };
    let pat = match state.upvalue(1) {
        LuaValue::String(id) => state.vm.heap.strings.get(id.0).as_bytes().to_vec(),
        _ => Vec::new(),
    };
    let pos = match state.upvalue(2) {
        LuaValue::Number(n) => n as usize,
        _ => 0,
    };
    if pos > src.len() {
        state.push_nil();
        return Ok(1);
    }
    match lua_pattern::find(&src, &pat, pos).map_err(|e| state.error(e.0))? {
        Some(m) => {
            let next_pos = if m.end > pos { m.end } else { pos + 1 };
            super::set_current_host_upvalue(state, 2, LuaValue::Number(next_pos as f64));
            if m.captures.is_empty() {
                state.push_bytes(&src[m.start..m.end]);
                Ok(1)
            } else {
                for c in &m.captures {
                    push_capture(state, c);
                }
                Ok(m.captures.len())
            }
        }
        None => {
            state.push_nil();
            Ok(1)
        }
    }
}

fn string_gsub(state: &mut LuaState) -> LuaResult<usize> {
    let s = arg_string(state, 1, "gsub")?;
    let pat = arg_string(state, 2, "gsub")?;
    let repl = state
        .get_arg(3)
        .ok_or_else(|| state.error("bad argument #3 to 'gsub' (string/function/table expected)".into()))?;
    let max_n = state
        .get_arg(4)
        .and_then(|v| state.coerce_to_number(v))
        .map(|n| n as i64)
        .unwrap_or(i64::MAX);

    let mut out = Vec::with_capacity(s.len());
    let mut pos = 0usize;
    let mut count = 0i64;
    while pos <= s.len() && count < max_n {
        let m = match lua_pattern::find(&s, &pat, pos).map_err(|e| state.error(e.0))? {
            Some(m) => m,
            None => break,
        };
        out.extend_from_slice(&s[pos..m.start]);
        let whole = &s[m.start..m.end];
        let captures = if m.captures.is_empty() {
            vec![Capture::Str(whole.to_vec())]
        } else {
            m.captures
        };

        let replaced: Option<Vec<u8>> = match repl {
            LuaValue::String(_) | LuaValue::Number(_) => {
                let template = state.to_str_bytes(repl).unwrap_or_default();
                Some(lua_pattern::expand_replacement(&template, whole, &captures).map_err(|e| state.error(e.0))?)
            }
            LuaValue::Table(id) => {
                let key = match &captures[0] {
                    Capture::Str(b) => state.make_string(b),
                    Capture::Pos(p) => LuaValue::Number(*p as f64),
                };
                let v = state.vm.heap.tables.get(id.0).get(&key);
                if v.is_truthy() {
                    state.to_str_bytes(v)
                } else {
                    None
                }
            }
            LuaValue::Function(_) => {
                let mut args = Vec::with_capacity(captures.len());
                for c in &captures {
                    match c {
                        Capture::Str(b) => args.push(state.make_string(b)),
                        Capture::Pos(p) => args.push(LuaValue::Number(*p as f64)),
                    }
                }
                let results = call_value(state, repl, args, 1)?;
                let r = results.into_iter().next().unwrap_or(LuaValue::Nil);
                if r.is_truthy() {
                    state.to_str_bytes(r)
                } else {
                    None
                }
            }
            _ => return Err(state.error("bad argument #3 to 'gsub' (string/function/table expected)".into())),
        };

        match replaced {
            Some(bytes) => out.extend_from_slice(&bytes),
            None => out.extend_from_slice(whole),
        }
        count += 1;

        if m.end > pos {
            pos = m.end;
        } else {
            if pos < s.len() {
                out.push(s[pos]);
            }
            pos += 1;
        }
    }
    if pos < s.len() {
        out.extend_from_slice(&s[pos..]);
    }
    state.push_bytes(&out);
    state.push_number(count as f64);
    Ok(2)
}
