use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::metadata::{
    module::{ModuleId, ModuleRc, TypeDef},
    token::Token,
    typesystem::{NativeKind, NativeType, Primitive},
};

/// Process-wide index of a type descriptor, assigned once and never reused
pub type TypeIndex = u32;

/// A reference counted type descriptor
pub type TypeRc = Arc<RuntimeType>;

/// One bound generic parameter of an instantiated type or method.
#[derive(Debug, Clone)]
pub struct GenericBinding {
    /// Name of the formal parameter
    pub name: String,
    /// The actual argument
    pub ty: TypeRc,
}

/// What backs a type descriptor.
#[derive(Debug, Clone)]
pub enum TypeKind {
    /// Defined by a loaded module
    Interpreted {
        /// The defining module
        module: ModuleRc,
        /// Registry identity of the module
        module_id: ModuleId,
        /// `TypeDef` token inside the module
        token: Token,
    },
    /// Compiled into the host
    Native(Arc<NativeType>),
    /// Array of an element type
    Array {
        /// Element type
        element: TypeRc,
        /// Number of dimensions
        rank: u8,
    },
    /// Managed by-reference wrapper
    ByRef {
        /// Referenced type
        element: TypeRc,
    },
    /// Placeholder for an open generic parameter inside descriptors of generic definitions
    GenericParameter,
}

/// A type descriptor: interpreted or native, plain or derived.
///
/// Descriptors are interned by the [`crate::metadata::typesystem::TypeRegistry`]: every
/// canonical name maps to exactly one instance, so identity comparison (`Arc::ptr_eq` or the
/// [`PartialEq`] impl, which compares indices) is name comparison. Generic instances share the
/// backing definition of their open type and add [`GenericBinding`]s.
///
/// Lazily derived facts (base type, interfaces, field layout, methods, static storage) are
/// kept by the registry, keyed by [`RuntimeType::index`], so descriptors never refer to
/// descriptors built after them.
pub struct RuntimeType {
    index: TypeIndex,
    name: String,
    kind: TypeKind,
    generic_args: Vec<GenericBinding>,
    definition: Option<TypeRc>,
    value_type: bool,
    interface: bool,
}

impl RuntimeType {
    pub(crate) fn new(
        index: TypeIndex,
        name: String,
        kind: TypeKind,
        generic_args: Vec<GenericBinding>,
        definition: Option<TypeRc>,
    ) -> Self {
        let (value_type, interface) = match &kind {
            TypeKind::Interpreted { module, token, .. } => module
                .type_def(*token)
                .map_or((false, false), |def| (def.is_value_type(), def.is_interface())),
            TypeKind::Native(native) => (
                native.kind == NativeKind::ValueType,
                native.kind == NativeKind::Interface,
            ),
            _ => (false, false),
        };

        RuntimeType {
            index,
            name,
            kind,
            generic_args,
            definition,
            value_type,
            interface,
        }
    }

    /// Registry index
    #[must_use]
    pub fn index(&self) -> TypeIndex {
        self.index
    }

    /// Canonical full name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What backs this descriptor
    #[must_use]
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Bound generic arguments, empty for non-instantiated types
    #[must_use]
    pub fn generic_args(&self) -> &[GenericBinding] {
        &self.generic_args
    }

    /// The open generic definition of an instantiated type
    #[must_use]
    pub fn definition(&self) -> Option<&TypeRc> {
        self.definition.as_ref()
    }

    /// Looks up the actual argument bound to the formal parameter `name`
    #[must_use]
    pub fn find_generic_argument(&self, name: &str) -> Option<&TypeRc> {
        self.generic_args
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| &binding.ty)
    }

    /// The backing type definition of interpreted types
    #[must_use]
    pub fn type_def(&self) -> Option<&TypeDef> {
        match &self.kind {
            TypeKind::Interpreted { module, token, .. } => module.type_def(*token).ok(),
            _ => None,
        }
    }

    /// The defining module and token of interpreted types
    #[must_use]
    pub fn interpreted(&self) -> Option<(&ModuleRc, ModuleId, Token)> {
        match &self.kind {
            TypeKind::Interpreted {
                module,
                module_id,
                token,
            } => Some((module, *module_id, *token)),
            _ => None,
        }
    }

    /// The host description of native types
    #[must_use]
    pub fn native(&self) -> Option<&Arc<NativeType>> {
        match &self.kind {
            TypeKind::Native(native) => Some(native),
            _ => None,
        }
    }

    /// Returns true for types defined by a loaded module
    #[must_use]
    pub fn is_interpreted(&self) -> bool {
        matches!(self.kind, TypeKind::Interpreted { .. })
    }

    /// Returns true for host types
    #[must_use]
    pub fn is_native(&self) -> bool {
        matches!(self.kind, TypeKind::Native(_))
    }

    /// Element type of arrays and by-refs
    #[must_use]
    pub fn element(&self) -> Option<&TypeRc> {
        match &self.kind {
            TypeKind::Array { element, .. } | TypeKind::ByRef { element } => Some(element),
            _ => None,
        }
    }

    /// Rank of array types
    #[must_use]
    pub fn array_rank(&self) -> Option<u8> {
        match self.kind {
            TypeKind::Array { rank, .. } => Some(rank),
            _ => None,
        }
    }

    /// Returns true for array types
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    /// Returns true for by-reference types
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        matches!(self.kind, TypeKind::ByRef { .. })
    }

    /// Returns true for open generic parameter placeholders
    #[must_use]
    pub fn is_generic_parameter(&self) -> bool {
        matches!(self.kind, TypeKind::GenericParameter)
    }

    /// Returns true for value types, including primitives
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.value_type
    }

    /// Returns true for interfaces
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.interface
    }

    /// The primitive this type represents
    #[must_use]
    pub fn primitive(&self) -> Option<Primitive> {
        self.native().and_then(|native| native.primitive)
    }

    /// Returns true for `System.Void`
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.primitive() == Some(Primitive::Void)
    }

    /// Names of the formal generic parameters of the backing definition
    #[must_use]
    pub fn generic_params(&self) -> &[String] {
        match &self.kind {
            TypeKind::Interpreted { module, token, .. } => module
                .type_def(*token)
                .map_or(&[], |def| def.generic_params.as_slice()),
            TypeKind::Native(native) => &native.generic_params,
            _ => &[],
        }
    }

    /// Returns true for open generic definitions
    #[must_use]
    pub fn is_generic_definition(&self) -> bool {
        self.generic_args.is_empty() && !self.generic_params().is_empty()
    }

    /// Returns true if a generic parameter placeholder occurs anywhere in this type
    #[must_use]
    pub fn contains_generic_parameter(&self) -> bool {
        match &self.kind {
            TypeKind::GenericParameter => true,
            TypeKind::Array { element, .. } | TypeKind::ByRef { element } => {
                element.contains_generic_parameter()
            }
            _ => self
                .generic_args
                .iter()
                .any(|binding| binding.ty.contains_generic_parameter()),
        }
    }

    /// Name of the module that defines this type, the resolution scope for its references
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Interpreted { module, .. } => Some(module.name()),
            TypeKind::Native(native) => Some(&native.module),
            TypeKind::Array { element, .. } | TypeKind::ByRef { element } => element.scope(),
            TypeKind::GenericParameter => None,
        }
    }
}

impl PartialEq for RuntimeType {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for RuntimeType {}

impl Hash for RuntimeType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl fmt::Debug for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeType")
            .field("index", &self.index)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
