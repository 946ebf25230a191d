//! Heap-resident string payload. Lua strings are byte sequences, not
//! necessarily valid UTF-8 (`string.char(200)` is legal), so the storage is
//! a plain byte vector; callers that need a Rust `&str` go through
//! `to_str_lossy` or `std::str::from_utf8`.

#[derive(Clone)]
pub struct HeapString {
    pub bytes: Box<[u8]>,
    pub hash: u64,
}

impl HeapString {
    pub fn new(bytes: Vec<u8>, hash: u64) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
            hash,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[inline]
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    use std::hash::{BuildHasher, Hasher};
    let state = ahash::RandomState::with_seeds(0x5bd1_e995, 0x27d4_eb2f, 0x1656_67b1, 0x9e37_79b9);
    let mut hasher = state.build_hasher();
    hasher.write(bytes);
    hasher.finish()
}
