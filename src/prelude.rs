//! # dotrun Prelude
//!
//! The types needed to build modules, load them into a domain and call into them.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotrun operations
pub use crate::Error;

/// The result type used throughout dotrun
pub use crate::Result;

// ================================================================================================
// Host Surface
// ================================================================================================

/// Domains and their configuration
pub use crate::domain::{Domain, DomainBuilder, DomainConfig, WeakDomain};

/// Values crossing the host boundary, heap objects and streaming invocation
pub use crate::engine::{FieldAccess, InvocationContext, ManagedException, NativeFrame, ObjectRef, Value};

/// Debugger hooks
pub use crate::engine::{DebugService, SuspendHandle};

// ================================================================================================
// Module Construction
// ================================================================================================

/// Decoded instructions
pub use crate::assembly::Instruction;

/// Method bodies and exception clauses
pub use crate::metadata::method::{ExceptionHandler, MethodBody, MethodRc};

/// Module tables
pub use crate::metadata::module::{FieldDef, MethodDef, MethodRef, ModuleBuilder, ModuleId, TypeDef};

/// Signatures and tokens
pub use crate::metadata::{signatures::TypeSig, token::Token};

// ================================================================================================
// Host Types and Bindings
// ================================================================================================

/// Host type descriptions
pub use crate::metadata::typesystem::{NativeCall, NativeField, NativeMethod, NativeModule, NativeType, TypeRc};

/// Binding tables and adaptors
pub use crate::binding::{method_key, field_key, AdaptorInstance, BindingTables, CrossDomainAdaptor, ValueTypeBinder};
