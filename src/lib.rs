// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # dotrun
//!
//! An embeddable interpreter for CIL-style bytecode modules whose type system is bridged to
//! types compiled into the host. Modules are loaded at runtime, so behavior can change without
//! rebuilding or redeploying the host application.
//!
//! ## Features
//!
//! - **Bridged type system** - interpreted classes and structs can derive from, implement and
//!   call into host types described through [`metadata::typesystem::NativeModule`]
//! - **Memoized resolution** - type, method, field and string tokens resolve to stable
//!   descriptors, cached in concurrent maps that tolerate racing first use
//! - **Inline value types** - structs live directly on the evaluation stack and are copied
//!   structurally, never aliased
//! - **Exceptions** - `try`/`catch`/`finally`/`fault` clauses with nearest-handler selection and
//!   interpreted stack traces for exceptions nothing handled
//! - **Fast paths** - method redirections, field accessors and value-type binders replace host
//!   reflection where registered
//! - **Concurrency** - a [`Domain`] is shared across threads; each call borrows an interpreter
//!   from a pool
//!
//! ## Quick Start
//!
//! ```rust
//! use dotrun::prelude::*;
//!
//! let mut builder = ModuleBuilder::new("Sample");
//! let greeter = builder.define_type(TypeDef::class("Sample", "Greeter"));
//! let hello = builder.user_string("hello");
//! let greet = builder.define_method(greeter, MethodDef::new("Greet").returns(TypeSig::string()))?;
//! builder.set_body(greet, MethodBody::new(vec![Instruction::LdStr(hello), Instruction::Ret]))?;
//!
//! let domain = Domain::new();
//! domain.load_module(builder.build())?;
//! let result = domain.invoke_by_name("Sample.Greeter", "Greet", None, &[])?;
//! assert_eq!(result.as_ref().and_then(Value::as_str), Some("hello"));
//! # Ok::<(), dotrun::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - modules, tokens, signatures, the [`metadata::typesystem::TypeRegistry`] and
//!   the token caches
//! - [`binding`] - the two-phase binding tables and cross-domain adaptors
//! - [`engine`] - the evaluation stack, values, exception dispatch and the interpreter
//! - [`domain`] - the host surface: [`Domain`], [`DomainConfig`] and streaming invocation
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and installs no subscriber. Module loads, pool growth,
//! binding freezes and unhandled exceptions are logged at `debug`, token resolution at `trace`.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use dotrun::prelude::*;
///
/// let domain = Domain::with_config(DomainConfig::strict());
/// assert!(domain.resolve_type("System.Int32[]")?.is_array());
/// # Ok::<(), dotrun::Error>(())
/// ```
pub mod prelude;

/// The decoded instruction set executed by the engine.
pub mod assembly;

/// Binding tables between interpreted and host code.
pub mod binding;

/// The host surface: domains, their configuration and invocation.
pub mod domain;

/// The execution engine: stack, values, exceptions and the interpreter.
pub mod engine;

/// Modules, tokens, signatures, the type registry and the token caches.
pub mod metadata;

/// `dotrun` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotrun` Error type
///
/// # Examples
///
/// ```rust
/// use dotrun::{Domain, Error};
///
/// let domain = Domain::new();
/// match domain.invoke_by_name("Sample.Missing", "Run", None, &[]) {
///     Err(Error::TypeNotFound(name)) => assert!(name.contains("Sample.Missing")),
///     other => panic!("unexpected {:?}", other.map(|_| ())),
/// }
/// ```
pub use error::Error;

pub use domain::{Domain, DomainBuilder, DomainConfig, WeakDomain};
pub use engine::Value;
