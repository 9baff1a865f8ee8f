//! Flags shared by method definitions and resolved method descriptors.

use bitflags::bitflags;

bitflags! {
    /// Calling and dispatch properties of a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u32 {
        /// The method takes a receiver as argument 0
        const HAS_THIS = 0x0001;
        /// Instance constructor (`.ctor`)
        const CONSTRUCTOR = 0x0002;
        /// Type initializer (`.cctor`)
        const STATIC_CONSTRUCTOR = 0x0004;
        /// Participates in virtual dispatch
        const VIRTUAL = 0x0008;
        /// Has no body, must be overridden
        const ABSTRACT = 0x0010;
    }
}

/// Name of instance constructors
pub const CONSTRUCTOR_NAME: &str = ".ctor";

/// Name of type initializers
pub const STATIC_CONSTRUCTOR_NAME: &str = ".cctor";
