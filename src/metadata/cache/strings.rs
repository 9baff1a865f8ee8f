//! Packed-key string interning.
//!
//! A string is stored under a 64-bit key whose low 32 bits are the string's hash and whose
//! high 32 bits are a collision counter. Interning probes counter 0, 1, 2, .. until it finds
//! the slot that already holds the same string or an unused one. Stored pairs never change,
//! so a key handed out once keeps resolving to the same string, and unknown keys resolve to
//! nothing.

use std::{fmt, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};

/// 32-bit FNV-1a offset basis.
pub const FNV1A_OFFSET_BASIS_32: u32 = 0x811c_9dc5;
/// 32-bit FNV-1a prime.
pub const FNV1A_PRIME_32: u32 = 0x0100_0193;

/// Hash a UTF-8 string with FNV-1a 32-bit.
#[inline]
#[must_use]
pub const fn fnv1a32_str(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut hash = FNV1A_OFFSET_BASIS_32;
    let mut i = 0usize;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV1A_PRIME_32);
        i += 1;
    }
    hash
}

/// Concurrent interning table with collision probing.
pub struct StringCache {
    entries: DashMap<u64, Arc<str>>,
    hasher: fn(&str) -> u32,
}

impl StringCache {
    /// An empty table hashing with FNV-1a
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(fnv1a32_str)
    }

    /// An empty table using `hasher` for the low key bits
    #[must_use]
    pub fn with_hasher(hasher: fn(&str) -> u32) -> Self {
        StringCache {
            entries: DashMap::new(),
            hasher,
        }
    }

    /// Packs a collision counter and a hash into a key
    #[must_use]
    pub const fn pack(counter: u32, hash: u32) -> u64 {
        ((counter as u64) << 32) | hash as u64
    }

    /// Interns `value`, returning its key
    pub fn intern(&self, value: &str) -> u64 {
        let hash = (self.hasher)(value);
        let mut counter = 0u32;
        loop {
            let key = Self::pack(counter, hash);
            match self.entries.entry(key) {
                Entry::Occupied(existing) => {
                    if existing.get().as_ref() == value {
                        return key;
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::from(value));
                    if counter > 0 {
                        tracing::trace!(hash, counter, "string hash collision probed");
                    }
                    return key;
                }
            }
            counter = counter.wrapping_add(1);
        }
    }

    /// The string stored under `key`
    #[must_use]
    pub fn get(&self, key: u64) -> Option<Arc<str>> {
        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    /// Number of interned strings
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is interned
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StringCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StringCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(_: &str) -> u32 {
        7
    }

    #[test]
    fn intern_is_stable() {
        let cache = StringCache::new();
        let hello = cache.intern("hello");
        assert_eq!(cache.intern("hello"), hello);
        assert_eq!(hello >> 32, 0);
        assert_eq!(hello as u32, fnv1a32_str("hello"));
        assert_eq!(cache.get(hello).as_deref(), Some("hello"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn fnv_reference_values() {
        assert_eq!(fnv1a32_str(""), 0x811c_9dc5);
        assert_eq!(fnv1a32_str("a"), 0xe40c_292c);
    }

    #[test]
    fn collisions_probe_the_counter() {
        let cache = StringCache::with_hasher(constant);
        let first = cache.intern("first");
        let second = cache.intern("second");
        let third = cache.intern("third");

        assert_eq!(first, StringCache::pack(0, 7));
        assert_eq!(second, StringCache::pack(1, 7));
        assert_eq!(third, StringCache::pack(2, 7));

        assert_eq!(cache.get(first).as_deref(), Some("first"));
        assert_eq!(cache.get(second).as_deref(), Some("second"));
        assert_eq!(cache.intern("second"), second);
        assert_eq!(cache.get(StringCache::pack(3, 7)), None);
        assert_eq!(cache.get(StringCache::pack(0, 8)), None);
    }
}
