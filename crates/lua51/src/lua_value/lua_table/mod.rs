//! Hybrid array+hash table — the one associative structure behind both Lua
//! arrays and Lua records.

use crate::gc::TableId;
use crate::lua_value::value::{LuaValue, TableKey};
use ahash::RandomState;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    NilKey,
    NanKey,
}

pub struct LuaTable {
    /// Dense array part. `array[i]` holds the value for integer key `i+1`.
    array: Vec<LuaValue>,
    hash: HashMap<TableKey, LuaValue, RandomState>,
    pub metatable: Option<TableId>,
}

impl LuaTable {
    pub fn new(array_hint: usize, hash_hint: usize) -> Self {
        Self {
            array: Vec::with_capacity(array_hint),
            hash: HashMap::with_capacity_and_hasher(hash_hint, RandomState::new()),
            metatable: None,
        }
    }

    /// Lua 5.1 has no separate integer subtype: a `Number` key is an array
    /// index exactly when it has no fractional part and is in range.
    fn as_array_index(key: LuaValue) -> Option<i64> {
        if let LuaValue::Number(n) = key {
            if n.fract() == 0.0 && n >= 1.0 && n <= i64::MAX as f64 {
                return Some(n as i64);
            }
        }
        None
    }

    pub fn get(&self, key: &LuaValue) -> LuaValue {
        if let Some(idx) = Self::as_array_index(*key) {
            if idx >= 1 && (idx as usize) <= self.array.len() {
                return self.array[(idx - 1) as usize];
            }
        }
        self.hash
            .get(&TableKey(*key))
            .copied()
            .unwrap_or(LuaValue::Nil)
    }

    pub fn get_int(&self, idx: i64) -> LuaValue {
        self.get(&LuaValue::Number(idx as f64))
    }

    pub fn set(&mut self, key: LuaValue, value: LuaValue) -> Result<(), TableError> {
        match key {
            LuaValue::Nil => return Err(TableError::NilKey),
            LuaValue::Number(n) if n.is_nan() => return Err(TableError::NanKey),
            _ => {}
        }

        if let Some(idx) = Self::as_array_index(key) {
            let i = idx as usize;
            if i >= 1 && i <= self.array.len() {
                self.array[i - 1] = value;
                return Ok(());
            }
            if i == self.array.len() + 1 && !value.is_nil() {
                self.array.push(value);
                // Pull any contiguous integer keys sitting in the hash part
                // into the array now that they're adjacent to it.
                let mut next = self.array.len() as i64 + 1;
                while let Some(v) = self.hash.remove(&TableKey(LuaValue::Number(next as f64))) {
                    self.array.push(v);
                    next += 1;
                }
                return Ok(());
            }
        }

        if value.is_nil() {
            self.hash.remove(&TableKey(key));
        } else {
            self.hash.insert(TableKey(key), value);
        }
        Ok(())
    }

    pub fn set_int(&mut self, idx: i64, value: LuaValue) -> Result<(), TableError> {
        self.set(LuaValue::Number(idx as f64), value)
    }

    fn raw_has_int(&self, k: i64) -> bool {
        if k >= 1 && (k as usize) <= self.array.len() {
            !self.array[(k - 1) as usize].is_nil()
        } else {
            self.hash.contains_key(&TableKey(LuaValue::Number(k as f64)))
        }
    }

    /// A *border*: any `n` with `t[n] ~= nil and t[n+1] == nil`. When the
    /// array part ends in a nil, binary-search it (O(log N), per spec);
    /// otherwise probe the hash part for where the sequence continues.
    pub fn length(&self) -> i64 {
        let n = self.array.len();
        if n > 0 && self.array[n - 1].is_nil() {
            let (mut lo, mut hi) = (0usize, n);
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if self.array[mid - 1].is_nil() {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return lo as i64;
        }
        if n == 0 || !self.raw_has_int(n as i64 + 1) {
            return n as i64;
        }
        // Array part is full and the hash part continues the sequence:
        // exponential search for an upper bound, then binary search.
        let mut i = n as i64;
        let mut j = i + 1;
        while self.raw_has_int(j) {
            i = j;
            if j > i64::MAX / 2 {
                let mut k = i + 1;
                while self.raw_has_int(k) {
                    k += 1;
                }
                return k - 1;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = i + (j - i) / 2;
            if self.raw_has_int(m) {
                i = m;
            } else {
                j = m;
            }
        }
        i
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    /// Stateless `next(t, key)`: array part (in order, skipping holes) then
    /// the hash part in its (arbitrary but fixed-until-mutation) iteration
    /// order. Returns `None` both for "no more entries" and for an invalid
    /// starting key — callers distinguish the two the way `next` does.
    pub fn next(&self, key: LuaValue) -> Option<(LuaValue, LuaValue)> {
        let arr_len = self.array.len();

        let from_hash_start = |hash: &HashMap<TableKey, LuaValue, RandomState>| {
            hash.iter().next().map(|(k, v)| (k.0, *v))
        };

        if key.is_nil() {
            for i in 0..arr_len {
                if !self.array[i].is_nil() {
                    return Some((LuaValue::Number((i + 1) as f64), self.array[i]));
                }
            }
            return from_hash_start(&self.hash);
        }

        if let Some(idx) = Self::as_array_index(key) {
            if idx >= 1 && (idx as usize) <= arr_len {
                for i in (idx as usize)..arr_len {
                    if !self.array[i].is_nil() {
                        return Some((LuaValue::Number((i + 1) as f64), self.array[i]));
                    }
                }
                return from_hash_start(&self.hash);
            }
        }

        let mut found = false;
        for (k, v) in self.hash.iter() {
            if found {
                return Some((k.0, *v));
            }
            if *k == TableKey(key) {
                found = true;
            }
        }
        None
    }

    /// Every key currently reachable (used by the collector's mark phase).
    pub fn iter_values(&self) -> impl Iterator<Item = &LuaValue> {
        self.array.iter().chain(self.hash.values())
    }

    pub fn iter_keys_and_values(&self) -> impl Iterator<Item = (LuaValue, LuaValue)> + '_ {
        let arr = self
            .array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, v)| (LuaValue::Number((i + 1) as f64), *v));
        arr.chain(self.hash.iter().map(|(k, v)| (k.0, *v)))
    }
}
