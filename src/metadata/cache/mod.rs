//! Token caches.
//!
//! Resolutions of metadata tokens are memoized in append-only concurrent maps: types,
//! methods and fields keyed by `(module, token)` or by method identity, and user strings
//! interned in a [`StringCache`]. Entries are populated on first use from any thread and are
//! never evicted. Only context independent resolutions are stored under a token key.

mod strings;

pub use strings::{fnv1a32_str, StringCache, FNV1A_OFFSET_BASIS_32, FNV1A_PRIME_32};

use std::{fmt, sync::Arc};

use dashmap::DashMap;

use crate::metadata::{
    method::{MethodId, MethodRc},
    module::ModuleId,
    token::Token,
    typesystem::{FieldRc, TypeRc},
};

/// Key of a memoized resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A token of a specific module
    Token {
        /// Module the token belongs to
        module: ModuleId,
        /// The token
        token: Token,
    },
    /// A resolved method descriptor
    Method(MethodId),
}

/// The memoized token resolutions of a registry.
#[derive(Default)]
pub struct TokenCache {
    types: DashMap<CacheKey, TypeRc>,
    methods: DashMap<CacheKey, Option<MethodRc>>,
    fields: DashMap<CacheKey, FieldRc>,
    user_strings: DashMap<CacheKey, u64>,
    strings: StringCache,
}

impl TokenCache {
    /// Empty caches
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized type
    #[must_use]
    pub fn cached_type(&self, key: &CacheKey) -> Option<TypeRc> {
        self.types.get(key).map(|entry| entry.value().clone())
    }

    /// Memoizes a type; a concurrent first insert wins and is returned
    pub fn cache_type(&self, key: CacheKey, ty: TypeRc) -> TypeRc {
        self.types.entry(key).or_insert(ty).value().clone()
    }

    /// Memoized method; `Some(None)` marks a reference resolved to nothing
    #[must_use]
    pub fn cached_method(&self, key: &CacheKey) -> Option<Option<MethodRc>> {
        self.methods.get(key).map(|entry| entry.value().clone())
    }

    /// Memoizes a method resolution; a concurrent first insert wins and is returned
    pub fn cache_method(&self, key: CacheKey, method: Option<MethodRc>) -> Option<MethodRc> {
        self.methods.entry(key).or_insert(method).value().clone()
    }

    /// Memoized field
    #[must_use]
    pub fn cached_field(&self, key: &CacheKey) -> Option<FieldRc> {
        self.fields.get(key).map(|entry| entry.value().clone())
    }

    /// Memoizes a field; a concurrent first insert wins and is returned
    pub fn cache_field(&self, key: CacheKey, field: FieldRc) -> FieldRc {
        self.fields.entry(key).or_insert(field).value().clone()
    }

    /// Interned string key of a user string token
    #[must_use]
    pub fn cached_string(&self, key: &CacheKey) -> Option<Arc<str>> {
        let interned = self.user_strings.get(key).map(|entry| *entry.value())?;
        self.strings.get(interned)
    }

    /// Interns a user string and remembers its key under the token
    pub fn cache_string(&self, key: CacheKey, value: &str) -> Arc<str> {
        let interned = *self
            .user_strings
            .entry(key)
            .or_insert_with(|| self.strings.intern(value))
            .value();
        self.strings.get(interned).unwrap_or_else(|| Arc::from(value))
    }

    /// The string interning table
    #[must_use]
    pub fn strings(&self) -> &StringCache {
        &self.strings
    }

    /// Number of memoized types
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Number of memoized method resolutions
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Number of memoized fields
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("types", &self.types.len())
            .field("methods", &self.methods.len())
            .field("fields", &self.fields.len())
            .field("strings", &self.strings)
            .finish()
    }
}
