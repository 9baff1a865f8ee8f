//! Metadata model of interpreted code.
//!
//! Everything the engine knows about the code it runs lives here: tokens and type signatures
//! as they appear inside modules, the modules themselves, the runtime type system that interns
//! interpreted and host types into one descriptor space, method descriptors, and the token
//! caches that memoize resolutions.
//!
//! # Key Components
//!
//! - [`token`] - Table/row metadata tokens
//! - [`signatures`] - Type reference shapes used by modules
//! - [`module`] - Immutable modules and their builder
//! - [`typesystem`] - Type descriptors, the type registry and host reflection
//! - [`method`] - Method descriptors, bodies and method/field resolution
//! - [`cache`] - Token caches and string interning
//! - [`sequencepoints`] - Offset to source line mapping for stack traces

pub mod cache;
pub mod method;
pub mod module;
pub mod sequencepoints;
pub mod signatures;
/// Metadata tokens: a table id plus a row
pub mod token;
pub mod typesystem;
