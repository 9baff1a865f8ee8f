//! Type reference shapes as stored in module metadata.
//!
//! A [`TypeSig`] is the unresolved form of a type: it names a definition of the same module, an
//! external type by full name and scope, an open generic parameter, or one of the composite
//! shapes built on top of those. The registry turns a signature into a
//! [`crate::metadata::typesystem::RuntimeType`] in the context of the type and method that
//! contain the reference.
//!
//! # Examples
//!
//! ```rust
//! use dotrun::metadata::signatures::TypeSig;
//!
//! let list_of_t = TypeSig::generic(TypeSig::named("Host.Collections.List"), vec![TypeSig::param("T")]);
//! assert!(list_of_t.contains_generic_parameter());
//! assert_eq!(list_of_t.to_string(), "Host.Collections.List<!T>");
//!
//! let grid = TypeSig::int32().array_of_rank(2);
//! assert_eq!(grid.to_string(), "System.Int32[,]");
//! ```

use std::fmt;

use crate::metadata::token::Token;

/// An unresolved type reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// A type defined in the same module, addressed by its `TypeDef` token
    Def(Token),
    /// A type referenced by full name, optionally qualified with the scope (module name) that
    /// is expected to define it
    Ref {
        /// Full name, `Namespace.Name`
        name: String,
        /// Simple name of the defining module
        scope: Option<String>,
    },
    /// An open generic parameter, looked up by name in the generic context
    GenericParam(String),
    /// A managed by-reference wrapper (`T&`)
    ByRef(Box<TypeSig>),
    /// An array of the given rank (`T[]`, `T[,]`)
    Array {
        /// Element type
        element: Box<TypeSig>,
        /// Number of dimensions, at least 1
        rank: u8,
    },
    /// A generic instantiation `Definition<Args..>`
    GenericInst {
        /// The open generic definition
        definition: Box<TypeSig>,
        /// The actual arguments, in declaration order
        args: Vec<TypeSig>,
    },
    /// An unmanaged pointer; never resolvable
    Pointer(Box<TypeSig>),
    /// A function pointer; never resolvable
    FnPtr,
}

impl TypeSig {
    /// External type by full name without a scope
    pub fn named(name: impl Into<String>) -> Self {
        TypeSig::Ref {
            name: name.into(),
            scope: None,
        }
    }

    /// External type by full name, expected in the given scope
    pub fn scoped(name: impl Into<String>, scope: impl Into<String>) -> Self {
        TypeSig::Ref {
            name: name.into(),
            scope: Some(scope.into()),
        }
    }

    /// Open generic parameter
    pub fn param(name: impl Into<String>) -> Self {
        TypeSig::GenericParam(name.into())
    }

    /// Definition of the same module
    #[must_use]
    pub fn def(token: Token) -> Self {
        TypeSig::Def(token)
    }

    /// Generic instantiation of `definition`
    #[must_use]
    pub fn generic(definition: TypeSig, args: Vec<TypeSig>) -> Self {
        TypeSig::GenericInst {
            definition: Box::new(definition),
            args,
        }
    }

    /// Single dimensional array of `self`
    #[must_use]
    pub fn array(self) -> Self {
        self.array_of_rank(1)
    }

    /// Array of `self` with `rank` dimensions
    #[must_use]
    pub fn array_of_rank(self, rank: u8) -> Self {
        TypeSig::Array {
            element: Box::new(self),
            rank: rank.max(1),
        }
    }

    /// By-reference wrapper of `self`
    #[must_use]
    pub fn by_ref(self) -> Self {
        TypeSig::ByRef(Box::new(self))
    }

    /// `System.Void`
    #[must_use]
    pub fn void() -> Self {
        Self::named("System.Void")
    }

    /// `System.Boolean`
    #[must_use]
    pub fn boolean() -> Self {
        Self::named("System.Boolean")
    }

    /// `System.Int32`
    #[must_use]
    pub fn int32() -> Self {
        Self::named("System.Int32")
    }

    /// `System.Int64`
    #[must_use]
    pub fn int64() -> Self {
        Self::named("System.Int64")
    }

    /// `System.Single`
    #[must_use]
    pub fn single() -> Self {
        Self::named("System.Single")
    }

    /// `System.Double`
    #[must_use]
    pub fn double() -> Self {
        Self::named("System.Double")
    }

    /// `System.String`
    #[must_use]
    pub fn string() -> Self {
        Self::named("System.String")
    }

    /// `System.Object`
    #[must_use]
    pub fn object() -> Self {
        Self::named("System.Object")
    }

    /// Returns true if an open generic parameter occurs anywhere in this signature.
    ///
    /// Resolutions of such signatures depend on their generic context and are never memoized
    /// under the token that carried them.
    #[must_use]
    pub fn contains_generic_parameter(&self) -> bool {
        match self {
            TypeSig::GenericParam(_) => true,
            TypeSig::ByRef(inner) | TypeSig::Pointer(inner) => inner.contains_generic_parameter(),
            TypeSig::Array { element, .. } => element.contains_generic_parameter(),
            TypeSig::GenericInst { definition, args } => {
                definition.contains_generic_parameter()
                    || args.iter().any(TypeSig::contains_generic_parameter)
            }
            TypeSig::Def(_) | TypeSig::Ref { .. } | TypeSig::FnPtr => false,
        }
    }

    /// The kind of this reference, used in diagnostics
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            TypeSig::Def(_) => "definition",
            TypeSig::Ref { .. } => "reference",
            TypeSig::GenericParam(_) => "generic parameter",
            TypeSig::ByRef(_) => "by-reference",
            TypeSig::Array { .. } => "array",
            TypeSig::GenericInst { .. } => "generic instantiation",
            TypeSig::Pointer(_) => "pointer",
            TypeSig::FnPtr => "function pointer",
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Def(token) => write!(f, "typedef({})", token),
            TypeSig::Ref { name, .. } => write!(f, "{}", name),
            TypeSig::GenericParam(name) => write!(f, "!{}", name),
            TypeSig::ByRef(inner) => write!(f, "{}&", inner),
            TypeSig::Pointer(inner) => write!(f, "{}*", inner),
            TypeSig::FnPtr => write!(f, "fnptr"),
            TypeSig::Array { element, rank } => {
                write!(f, "{}[", element)?;
                for _ in 1..*rank {
                    write!(f, ",")?;
                }
                write!(f, "]")
            }
            TypeSig::GenericInst { definition, args } => {
                write!(f, "{}<", definition)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_parameter_detection() {
        assert!(!TypeSig::int32().contains_generic_parameter());
        assert!(TypeSig::param("T").array().contains_generic_parameter());
        assert!(TypeSig::param("T").by_ref().contains_generic_parameter());

        let closed = TypeSig::generic(TypeSig::named("Host.Pair"), vec![TypeSig::int32(), TypeSig::string()]);
        assert!(!closed.contains_generic_parameter());

        let nested = TypeSig::generic(
            TypeSig::named("Host.Pair"),
            vec![TypeSig::int32(), TypeSig::generic(TypeSig::named("Host.List"), vec![TypeSig::param("U")])],
        );
        assert!(nested.contains_generic_parameter());
    }

    #[test]
    fn rank_is_at_least_one() {
        match TypeSig::int32().array_of_rank(0) {
            TypeSig::Array { rank, .. } => assert_eq!(rank, 1),
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn display_forms() {
        assert_eq!(TypeSig::int32().array().by_ref().to_string(), "System.Int32[]&");
        assert_eq!(TypeSig::def(Token(0x02000001)).to_string(), "typedef(0x02000001)");
        assert_eq!(TypeSig::FnPtr.shape(), "function pointer");
    }
}
