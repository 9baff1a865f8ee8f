use std::sync::Arc;

use bitflags::bitflags;

use crate::metadata::{
    method::{MethodBody, MethodFlags, CONSTRUCTOR_NAME, STATIC_CONSTRUCTOR_NAME},
    signatures::TypeSig,
    token::Token,
};

bitflags! {
    /// Semantic properties of a type definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u32 {
        /// Stored inline with value semantics, implicitly derives from `System.ValueType`
        const VALUE_TYPE = 0x0001;
        /// Interface, has no instance layout
        const INTERFACE = 0x0002;
        /// Cannot be instantiated
        const ABSTRACT = 0x0004;
        /// Cannot be derived from
        const SEALED = 0x0008;
    }
}

/// A type defined by a module.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Namespace, may be empty
    pub namespace: String,
    /// Simple name; nested types use `Outer/Inner`
    pub name: String,
    /// Semantic flags
    pub flags: TypeFlags,
    /// Base type; `None` means `System.Object` (or `System.ValueType` for value types)
    pub extends: Option<TypeSig>,
    /// Implemented interfaces
    pub interfaces: Vec<TypeSig>,
    /// Names of the generic parameters, in declaration order
    pub generic_params: Vec<String>,
    /// Field definitions, filled through [`super::ModuleBuilder::define_field`]
    pub fields: Vec<FieldDef>,
    /// Method definitions, filled through [`super::ModuleBuilder::define_method`]
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    fn new(namespace: &str, name: &str, flags: TypeFlags) -> Self {
        TypeDef {
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags,
            extends: None,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// A reference type
    #[must_use]
    pub fn class(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, TypeFlags::empty())
    }

    /// A value type
    #[must_use]
    pub fn value_type(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, TypeFlags::VALUE_TYPE | TypeFlags::SEALED)
    }

    /// An interface
    #[must_use]
    pub fn interface(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, TypeFlags::INTERFACE | TypeFlags::ABSTRACT)
    }

    /// Sets the base type
    #[must_use]
    pub fn extends(mut self, base: TypeSig) -> Self {
        self.extends = Some(base);
        self
    }

    /// Adds an implemented interface
    #[must_use]
    pub fn implements(mut self, interface: TypeSig) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Declares the generic parameters
    #[must_use]
    pub fn generic_params(mut self, params: &[&str]) -> Self {
        self.generic_params = params.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Full name, `Namespace.Name` or `Name` for the global namespace
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Returns true for value types
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flags.contains(TypeFlags::VALUE_TYPE)
    }

    /// Returns true for interfaces
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeFlags::INTERFACE)
    }
}

/// A field defined by a module.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Declared type
    pub sig: TypeSig,
    /// Stored once per type rather than per instance
    pub is_static: bool,
}

impl FieldDef {
    /// An instance field
    pub fn new(name: impl Into<String>, sig: TypeSig) -> Self {
        FieldDef {
            name: name.into(),
            sig,
            is_static: false,
        }
    }

    /// A static field
    pub fn new_static(name: impl Into<String>, sig: TypeSig) -> Self {
        FieldDef {
            is_static: true,
            ..Self::new(name, sig)
        }
    }
}

/// A method defined by a module.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Calling and dispatch flags
    pub flags: MethodFlags,
    /// Declared parameter types, without the receiver
    pub params: Vec<TypeSig>,
    /// Declared return type
    pub ret: TypeSig,
    /// Names of the method level generic parameters
    pub generic_params: Vec<String>,
    /// Executable body; `None` for abstract methods
    pub body: Option<Arc<MethodBody>>,
}

impl MethodDef {
    /// A static method returning `System.Void`
    pub fn new(name: impl Into<String>) -> Self {
        MethodDef {
            name: name.into(),
            flags: MethodFlags::empty(),
            params: Vec::new(),
            ret: TypeSig::void(),
            generic_params: Vec::new(),
            body: None,
        }
    }

    /// An instance constructor
    #[must_use]
    pub fn constructor() -> Self {
        let mut def = Self::new(CONSTRUCTOR_NAME);
        def.flags = MethodFlags::HAS_THIS | MethodFlags::CONSTRUCTOR;
        def
    }

    /// A type initializer
    #[must_use]
    pub fn type_initializer() -> Self {
        let mut def = Self::new(STATIC_CONSTRUCTOR_NAME);
        def.flags = MethodFlags::STATIC_CONSTRUCTOR;
        def
    }

    /// Marks the method as taking a receiver
    #[must_use]
    pub fn instance(mut self) -> Self {
        self.flags |= MethodFlags::HAS_THIS;
        self
    }

    /// Marks the method as virtual (implies a receiver)
    #[must_use]
    pub fn virtual_method(mut self) -> Self {
        self.flags |= MethodFlags::HAS_THIS | MethodFlags::VIRTUAL;
        self
    }

    /// Marks the method as abstract and virtual
    #[must_use]
    pub fn abstract_method(mut self) -> Self {
        self.flags |= MethodFlags::HAS_THIS | MethodFlags::VIRTUAL | MethodFlags::ABSTRACT;
        self
    }

    /// Appends a parameter
    #[must_use]
    pub fn param(mut self, sig: TypeSig) -> Self {
        self.params.push(sig);
        self
    }

    /// Sets the return type
    #[must_use]
    pub fn returns(mut self, sig: TypeSig) -> Self {
        self.ret = sig;
        self
    }

    /// Declares method level generic parameters
    #[must_use]
    pub fn generic_params(mut self, params: &[&str]) -> Self {
        self.generic_params = params.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Sets the body
    #[must_use]
    pub fn body(mut self, body: MethodBody) -> Self {
        self.body = Some(Arc::new(body));
        self
    }

    /// Returns true if argument 0 is a receiver
    #[must_use]
    pub fn has_this(&self) -> bool {
        self.flags.contains(MethodFlags::HAS_THIS)
    }
}

/// A reference to a method through its declaring type signature.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodRef {
    /// Declaring type
    pub declaring: TypeSig,
    /// Method name, `.ctor` for constructors
    pub name: String,
    /// Parameter types as declared by the target
    pub params: Vec<TypeSig>,
    /// Return type as declared by the target
    pub ret: TypeSig,
    /// The target takes a receiver
    pub has_this: bool,
    /// Number of method level generic parameters of the target
    pub generic_arity: usize,
}

impl MethodRef {
    /// A static method reference returning `System.Void`
    pub fn new(declaring: TypeSig, name: impl Into<String>) -> Self {
        MethodRef {
            declaring,
            name: name.into(),
            params: Vec::new(),
            ret: TypeSig::void(),
            has_this: false,
            generic_arity: 0,
        }
    }

    /// A constructor reference
    #[must_use]
    pub fn constructor(declaring: TypeSig) -> Self {
        MethodRef {
            has_this: true,
            ..Self::new(declaring, CONSTRUCTOR_NAME)
        }
    }

    /// Marks the target as an instance method
    #[must_use]
    pub fn instance(mut self) -> Self {
        self.has_this = true;
        self
    }

    /// Appends a parameter
    #[must_use]
    pub fn param(mut self, sig: TypeSig) -> Self {
        self.params.push(sig);
        self
    }

    /// Sets the return type
    #[must_use]
    pub fn returns(mut self, sig: TypeSig) -> Self {
        self.ret = sig;
        self
    }

    /// Sets the number of method level generic parameters
    #[must_use]
    pub fn generic_arity(mut self, arity: usize) -> Self {
        self.generic_arity = arity;
        self
    }

    /// Returns true for constructor references
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }
}

/// A reference to a field through its declaring type signature.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    /// Declaring type
    pub declaring: TypeSig,
    /// Field name
    pub name: String,
}

/// A row of the member reference table.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberRef {
    /// Method reference
    Method(MethodRef),
    /// Field reference
    Field(FieldRef),
}

/// A generic method instantiation.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSpec {
    /// `MethodDef` or `MemberRef` token of the generic method definition
    pub method: Token,
    /// Actual generic arguments
    pub args: Vec<TypeSig>,
}
