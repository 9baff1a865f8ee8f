//! Runtime type system of a domain.
//!
//! This module turns the type definitions of loaded modules and the host types described by
//! native modules into one space of interned [`RuntimeType`] descriptors. Interpreted and native
//! types are looked up through the same names, and composite types (arrays, by-reference
//! wrappers, generic instantiations) are derived on demand and interned like any other type.
//!
//! # Key Components
//!
//! - [`TypeRegistry`]: Thread-safe store of every descriptor, keyed by index, name and `TypeId`
//! - [`RuntimeType`]: One interned type descriptor
//! - [`TypeName`]: Parser for composite type names such as `Sample.Pair<System.Int32,System.String>[]`
//! - [`HostReflection`]: The native modules a domain may bind host types from
//! - [`GenericContext`]: Generic bindings a token is resolved against
//! - [`Primitive`]: Built-in primitive types and their evaluation stack kinds
//!
//! # Interning
//!
//! Every name a descriptor was ever resolved under maps to the same `Arc`, so identity
//! comparison (`Arc::ptr_eq` or [`RuntimeType::index`]) is type equality.
//!
//! # Examples
//!
//! ```rust
//! use dotrun::metadata::typesystem::{Primitive, TypeRegistry};
//!
//! let registry = TypeRegistry::new();
//! let ty = registry.resolve("System.Int32")?;
//! assert_eq!(ty.primitive(), Some(Primitive::Int32));
//! # Ok::<(), dotrun::Error>(())
//! ```

mod base;
pub mod corlib;
mod layout;
mod name;
mod native;
mod primitives;
mod registry;
mod resolver;

pub use base::{GenericBinding, RuntimeType, TypeIndex, TypeKind, TypeRc};
pub use layout::{FieldHandle, FieldRc, StaticStorage, TypeLayout};
pub(crate) use layout::InitClaim;
pub use name::{array_suffix, TypeName};
pub use native::{
    HostReflection, NativeCall, NativeClone, NativeData, NativeFactory, NativeField,
    NativeFieldGet, NativeFieldSet, NativeInvoke, NativeKind, NativeLookup, NativeMethod,
    NativeModule, NativeType,
};
pub use primitives::{Primitive, StackKind};
pub use registry::TypeRegistry;
pub use resolver::{GenericContext, Resolution};
