//! Domain configuration.
//!
//! [`DomainConfig`] controls the resource limits of the execution engine and how strictly the
//! boundary to host code is enforced.
//!
//! # Defaults
//!
//! | Setting                   | Default | Meaning                                                  |
//! |---------------------------|---------|----------------------------------------------------------|
//! | `stack_capacity`          | 16384   | Slots per interpreter stack                              |
//! | `max_call_depth`          | 256     | Nested interpreted frames per top level call             |
//! | `allow_unbound_native`    | true    | Native calls without a redirection use reflection        |
//! | `check_value_type_casts`  | true    | Copies between unrelated value types fail                |
//!
//! # Configuration Presets
//!
//! - [`DomainConfig::strict()`] - Every native call must be bound, small stacks
//! - [`DomainConfig::lenient()`] - Reflection fallback, deep stacks, no value-type checks
//!
//! # Example
//!
//! ```rust
//! use dotrun::DomainConfig;
//!
//! let config = DomainConfig::strict().with_max_call_depth(64);
//! assert!(!config.allow_unbound_native);
//!
//! let config = DomainConfig {
//!     stack_capacity: 4096,
//!     ..Default::default()
//! };
//! assert_eq!(config.max_call_depth, 256);
//! ```

/// Settings of one [`crate::Domain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    /// Number of slots of every interpreter stack; values beyond it raise
    /// [`crate::Error::StackOverflow`]
    pub stack_capacity: usize,

    /// Maximum number of nested interpreted frames; deeper calls raise
    /// [`crate::Error::CallDepthExceeded`]
    pub max_call_depth: usize,

    /// Whether native methods without a registered redirection are called through host
    /// reflection. When false such calls fail with [`crate::Error::UnboundNativeMethod`].
    pub allow_unbound_native: bool,

    /// Whether copying a value type into storage of an unrelated value type raises
    /// [`crate::Error::InvalidCast`]
    pub check_value_type_casts: bool,
}

impl DomainConfig {
    /// The default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every native call goes through a binding; small stacks and a shallow call depth
    #[must_use]
    pub fn strict() -> Self {
        Self {
            stack_capacity: 4096,
            max_call_depth: 128,
            allow_unbound_native: false,
            check_value_type_casts: true,
        }
    }

    /// Reflection fallback for native calls, deep stacks and unchecked value-type copies
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            stack_capacity: 65536,
            max_call_depth: 1024,
            allow_unbound_native: true,
            check_value_type_casts: false,
        }
    }

    /// Sets the number of slots per interpreter stack.
    #[must_use]
    pub fn with_stack_capacity(mut self, slots: usize) -> Self {
        self.stack_capacity = slots;
        self
    }

    /// Sets the maximum nested interpreted call depth.
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Allows or forbids reflection calls to unbound native methods.
    #[must_use]
    pub fn with_unbound_native(mut self, allow: bool) -> Self {
        self.allow_unbound_native = allow;
        self
    }

    /// Enables or disables the compatibility check of value-type copies.
    #[must_use]
    pub fn with_value_type_cast_checks(mut self, check: bool) -> Self {
        self.check_value_type_casts = check;
        self
    }
}

impl Default for DomainConfig {
    /// See the module documentation for the default values.
    fn default() -> Self {
        Self {
            stack_capacity: 16384,
            max_call_depth: 256,
            allow_unbound_native: true,
            check_value_type_casts: true,
        }
    }
}
