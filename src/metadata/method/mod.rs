//! Method descriptors and method bodies.
//!
//! A [`Method`] is the resolved, context specific identity of a method: its declaring type
//! (already instantiated for generic types), its parameter and return types, and what backs
//! it, an interpreted body or a native entry point. Descriptors are created once per declaring
//! type and once per generic method instantiation by the
//! [`crate::metadata::typesystem::TypeRegistry`] and shared as [`MethodRc`].
//!
//! # Key Components
//!
//! - [`Method`] - Resolved method descriptor
//! - [`MethodBody`] - Instructions, locals and exception clauses of an interpreted method
//! - [`ExceptionHandler`] - One protected region with its handler
//! - [`MethodFlags`] - Calling and dispatch properties

mod body;
mod exceptions;
mod resolver;
mod types;

pub use body::MethodBody;
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
pub use types::{MethodFlags, CONSTRUCTOR_NAME, STATIC_CONSTRUCTOR_NAME};

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use crate::metadata::{
    module::{ModuleId, ModuleRc},
    token::Token,
    typesystem::{GenericBinding, NativeMethod, TypeRc},
};

/// Registry wide identity of a method descriptor
pub type MethodId = u32;

/// A reference counted method descriptor
pub type MethodRc = Arc<Method>;

/// What backs a method.
#[derive(Clone)]
pub enum MethodOrigin {
    /// Defined by a loaded module
    Interpreted {
        /// The defining module
        module: ModuleRc,
        /// Registry identity of the module
        module_id: ModuleId,
        /// `MethodDef` token
        token: Token,
        /// Body; `None` for abstract methods
        body: Option<Arc<MethodBody>>,
    },
    /// Implemented by the host
    Native(Arc<NativeMethod>),
}

/// A resolved method.
pub struct Method {
    /// Registry identity
    pub id: MethodId,
    /// Method name
    pub name: String,
    /// Declaring type (instantiated for members of generic instances)
    pub declaring: TypeRc,
    /// Calling and dispatch flags
    pub flags: MethodFlags,
    /// Parameter types, without the receiver
    pub params: Vec<TypeRc>,
    /// Return type
    pub ret: TypeRc,
    /// Names of the method level generic parameters
    pub generic_params: Vec<String>,
    /// Bound method level generic arguments of instantiated generic methods
    pub generic_args: Vec<GenericBinding>,
    /// The generic method definition of an instantiation
    pub definition: Option<MethodRc>,
    /// Backing implementation
    pub origin: MethodOrigin,
    pub(crate) locals: OnceLock<Arc<[TypeRc]>>,
    /// Types reached by the body, recorded once every token of the body was resolved
    pub(crate) prewarmed: OnceLock<Arc<[TypeRc]>>,
}

impl Method {
    pub(crate) fn new(
        id: MethodId,
        name: String,
        declaring: TypeRc,
        flags: MethodFlags,
        params: Vec<TypeRc>,
        ret: TypeRc,
        origin: MethodOrigin,
    ) -> Self {
        Method {
            id,
            name,
            declaring,
            flags,
            params,
            ret,
            generic_params: Vec::new(),
            generic_args: Vec::new(),
            definition: None,
            origin,
            locals: OnceLock::new(),
            prewarmed: OnceLock::new(),
        }
    }

    /// Returns true once [`crate::domain::Domain::prewarm`] resolved the tokens of the body
    #[must_use]
    pub fn is_prewarmed(&self) -> bool {
        self.prewarmed.get().is_some()
    }

    /// Declaring type
    #[must_use]
    pub fn declaring_type(&self) -> &TypeRc {
        &self.declaring
    }

    /// `Type::Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}::{}", self.declaring.name(), self.name)
    }

    /// `Type::Name(Param,..)`, the key of native method redirections
    #[must_use]
    pub fn key(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|p| p.name()).collect();
        format!("{}::{}({})", self.declaring.name(), self.name, params.join(","))
    }

    /// Returns true if argument 0 is the receiver
    #[must_use]
    pub fn has_this(&self) -> bool {
        self.flags.contains(MethodFlags::HAS_THIS)
    }

    /// Returns true for instance constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodFlags::CONSTRUCTOR)
    }

    /// Returns true for type initializers
    #[must_use]
    pub fn is_type_initializer(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC_CONSTRUCTOR)
    }

    /// Returns true for virtual methods
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodFlags::VIRTUAL)
    }

    /// Returns true for abstract methods
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodFlags::ABSTRACT)
    }

    /// Number of stack arguments including the receiver
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this())
    }

    /// Returns true if the method returns nothing
    #[must_use]
    pub fn returns_void(&self) -> bool {
        self.ret.is_void()
    }

    /// Returns true for generic method definitions that still need arguments
    #[must_use]
    pub fn is_generic_definition(&self) -> bool {
        !self.generic_params.is_empty() && self.generic_args.is_empty()
    }

    /// Returns true for methods backed by an interpreted body
    #[must_use]
    pub fn is_interpreted(&self) -> bool {
        matches!(self.origin, MethodOrigin::Interpreted { .. })
    }

    /// The interpreted body
    #[must_use]
    pub fn body(&self) -> Option<&Arc<MethodBody>> {
        match &self.origin {
            MethodOrigin::Interpreted { body, .. } => body.as_ref(),
            MethodOrigin::Native(_) => None,
        }
    }

    /// The defining module and `MethodDef` token of interpreted methods
    #[must_use]
    pub fn interpreted(&self) -> Option<(&ModuleRc, ModuleId, Token)> {
        match &self.origin {
            MethodOrigin::Interpreted {
                module,
                module_id,
                token,
                ..
            } => Some((module, *module_id, *token)),
            MethodOrigin::Native(_) => None,
        }
    }

    /// The host entry point of native methods
    #[must_use]
    pub fn native(&self) -> Option<&Arc<NativeMethod>> {
        match &self.origin {
            MethodOrigin::Native(native) => Some(native),
            MethodOrigin::Interpreted { .. } => None,
        }
    }

    /// Looks up a bound method level generic argument
    #[must_use]
    pub fn find_generic_argument(&self, name: &str) -> Option<&TypeRc> {
        self.generic_args
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| &binding.ty)
    }

    /// Returns true if both methods take the same parameter types
    #[must_use]
    pub fn same_signature(&self, other: &Method) -> bool {
        self.name == other.name
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("name", &self.key())
            .field("flags", &self.flags)
            .field("ret", &self.ret.name())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
