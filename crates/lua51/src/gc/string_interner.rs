//! String interning: at most one heap `HeapString` per distinct byte
//! content. Because interning is complete, `LuaValue::String` equality
//! reduces to `StringId` equality — no content comparison needed anywhere
//! else in the VM.

use super::gc_id::StringId;
use super::pool::Pool;
use crate::lua_value::heap_string::{hash_bytes, HeapString};
use std::collections::HashMap;

pub struct StringInterner {
    by_hash: HashMap<u64, Vec<StringId>>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            by_hash: HashMap::new(),
        }
    }

    pub fn intern(&mut self, bytes: &[u8], strings: &mut Pool<HeapString>) -> StringId {
        let hash = hash_bytes(bytes);
        if let Some(candidates) = self.by_hash.get(&hash) {
            for &id in candidates {
                if strings.get(id.0).as_bytes() == bytes {
                    return id;
                }
            }
        }
        let idx = strings.alloc(HeapString::new(bytes.to_vec(), hash));
        let id = StringId(idx);
        self.by_hash.entry(hash).or_default().push(id);
        id
    }

    /// Read-only lookup, for callers (metamethod name probes) that would
    /// rather treat "not interned yet" as "not present" than allocate.
    pub fn lookup(&self, bytes: &[u8], strings: &Pool<HeapString>) -> Option<StringId> {
        let hash = hash_bytes(bytes);
        let candidates = self.by_hash.get(&hash)?;
        candidates
            .iter()
            .copied()
            .find(|&id| strings.get(id.0).as_bytes() == bytes)
    }

    /// Drop bookkeeping for a string the collector just swept.
    pub fn forget(&mut self, freed: StringId, hash: u64) {
        if let Some(ids) = self.by_hash.get_mut(&hash) {
            ids.retain(|&id| id != freed);
            if ids.is_empty() {
                self.by_hash.remove(&hash);
            }
        }
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
