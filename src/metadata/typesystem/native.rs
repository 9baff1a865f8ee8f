//! Host reflection: descriptions of types compiled into the host.
//!
//! The host registers [`NativeModule`]s with the runtime. Each carries [`NativeType`]s whose
//! fields and methods are backed by closures, which is the reflection path interpreted code
//! takes when no entry of the binding tables covers a member. Value types may carry a clone
//! function and a default factory so that copies keep value semantics.
//!
//! Native types are looked up by full name. A lookup names the module it expects the type in;
//! that module is tried first and every other registered module afterwards, so a type that moved
//! between host modules keeps resolving under its old scope.
//!
//! # Examples
//!
//! ```rust
//! use dotrun::metadata::typesystem::{NativeMethod, NativeModule, NativeType};
//! use dotrun::Value;
//!
//! let math = NativeModule::new("Host.Runtime").with_type(
//!     NativeType::class("Host", "Math").method(
//!         NativeMethod::new("Twice", |call| Ok(Value::I32(call.arg(0)?.as_i32()? * 2)))
//!             .param("System.Int32")
//!             .returns("System.Int32"),
//!     ),
//! );
//! assert!(math.find("Host.Math").is_some());
//! ```

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use crate::{
    domain::Domain,
    engine::{NativeObject, ObjectRef, Value},
    metadata::{
        method::{MethodFlags, MethodRc, CONSTRUCTOR_NAME},
        typesystem::Primitive,
    },
    Error, Result,
};

/// Boxed data of a native object
pub type NativeData = Box<dyn Any + Send + Sync>;

/// Reflection entry point of a native method
pub type NativeInvoke = Arc<dyn Fn(&NativeCall<'_>) -> Result<Value> + Send + Sync>;

/// Reflection getter of a native field; receives the receiver for instance fields
pub type NativeFieldGet = Arc<dyn Fn(Option<&Value>) -> Result<Value> + Send + Sync>;

/// Reflection setter of a native field; receives the receiver for instance fields
pub type NativeFieldSet = Arc<dyn Fn(Option<&Value>, Value) -> Result<()> + Send + Sync>;

/// Member-wise clone of the boxed data of a native value type
pub type NativeClone = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Option<NativeData> + Send + Sync>;

/// Factory for the default instance of a native type
pub type NativeFactory = Arc<dyn Fn() -> NativeData + Send + Sync>;

/// Arguments of a reflection call into native code.
pub struct NativeCall<'a> {
    /// The domain the call originates from; native code may call back into it
    pub domain: &'a Domain,
    /// Descriptor of the invoked method
    pub method: &'a MethodRc,
    /// Receiver of instance methods, or of a base constructor call
    pub receiver: Option<&'a Value>,
    /// Arguments, without the receiver
    pub args: &'a [Value],
}

impl NativeCall<'_> {
    /// Argument at `index`
    ///
    /// # Errors
    /// Returns [`Error::ArgumentCountMismatch`] if fewer arguments were passed.
    pub fn arg(&self, index: usize) -> Result<&Value> {
        self.args.get(index).ok_or(Error::ArgumentCountMismatch {
            expected: index + 1,
            found: self.args.len(),
        })
    }

    /// The receiver
    ///
    /// # Errors
    /// Returns [`Error::NullReceiver`] for static calls or null receivers.
    pub fn this(&self) -> Result<&Value> {
        match self.receiver {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(Error::NullReceiver(self.method.full_name())),
        }
    }

    /// Wraps `data` as a new object of the method's declaring type, for constructors
    pub fn construct<T: Any + Send + Sync>(&self, data: T) -> Value {
        Value::Object(ObjectRef::native(NativeObject::new(
            self.method.declaring_type().clone(),
            Box::new(data),
        )))
    }
}

/// Stored shape of a native type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    /// Reference type
    Class,
    /// Value type
    ValueType,
    /// Interface
    Interface,
}

/// A native field.
#[derive(Clone)]
pub struct NativeField {
    /// Field name
    pub name: String,
    /// Full name of the field type
    pub ty: String,
    /// Static field
    pub is_static: bool,
    /// Reflection getter
    pub getter: Option<NativeFieldGet>,
    /// Reflection setter
    pub setter: Option<NativeFieldSet>,
}

impl NativeField {
    /// An instance field of type `ty`
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        NativeField {
            name: name.into(),
            ty: ty.into(),
            is_static: false,
            getter: None,
            setter: None,
        }
    }

    /// Marks the field as static
    #[must_use]
    pub fn static_field(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Sets the reflection getter
    #[must_use]
    pub fn getter<F>(mut self, getter: F) -> Self
    where
        F: Fn(Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Sets the reflection setter
    #[must_use]
    pub fn setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(Option<&Value>, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }
}

impl fmt::Debug for NativeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeField")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("is_static", &self.is_static)
            .finish_non_exhaustive()
    }
}

/// A native method.
#[derive(Clone)]
pub struct NativeMethod {
    /// Method name, `.ctor` for constructors
    pub name: String,
    /// Full names of the parameter types, without the receiver
    pub params: Vec<String>,
    /// Full name of the return type
    pub ret: String,
    /// Calling and dispatch flags
    pub flags: MethodFlags,
    /// Names of method level generic parameters
    pub generic_params: Vec<String>,
    /// Reflection entry point
    pub invoke: NativeInvoke,
}

impl NativeMethod {
    /// A static method returning `System.Void`
    pub fn new<F>(name: impl Into<String>, invoke: F) -> Self
    where
        F: Fn(&NativeCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        NativeMethod {
            name: name.into(),
            params: Vec::new(),
            ret: Primitive::Void.full_name(),
            flags: MethodFlags::empty(),
            generic_params: Vec::new(),
            invoke: Arc::new(invoke),
        }
    }

    /// A constructor; `invoke` receives no receiver for `newobj` and returns the new object
    pub fn constructor<F>(invoke: F) -> Self
    where
        F: Fn(&NativeCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        let mut method = Self::new(CONSTRUCTOR_NAME, invoke);
        method.flags = MethodFlags::HAS_THIS | MethodFlags::CONSTRUCTOR;
        method
    }

    /// Appends a parameter type
    #[must_use]
    pub fn param(mut self, ty: impl Into<String>) -> Self {
        self.params.push(ty.into());
        self
    }

    /// Sets the return type
    #[must_use]
    pub fn returns(mut self, ty: impl Into<String>) -> Self {
        self.ret = ty.into();
        self
    }

    /// Marks the method as taking a receiver
    #[must_use]
    pub fn instance(mut self) -> Self {
        self.flags |= MethodFlags::HAS_THIS;
        self
    }

    /// Marks the method as virtual
    #[must_use]
    pub fn virtual_method(mut self) -> Self {
        self.flags |= MethodFlags::HAS_THIS | MethodFlags::VIRTUAL;
        self
    }

    /// Declares method level generic parameters
    #[must_use]
    pub fn generic_params(mut self, params: &[&str]) -> Self {
        self.generic_params = params.iter().map(|p| (*p).to_string()).collect();
        self
    }
}

impl fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// A native type.
#[derive(Clone)]
pub struct NativeType {
    /// Namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Name of the module that registered the type
    pub module: String,
    /// Stored shape
    pub kind: NativeKind,
    /// Primitive this type represents
    pub primitive: Option<Primitive>,
    /// Full name of the base type
    pub base: Option<String>,
    /// Full names of implemented interfaces
    pub interfaces: Vec<String>,
    /// Names of the generic parameters
    pub generic_params: Vec<String>,
    /// Fields
    pub fields: Vec<NativeField>,
    /// Methods
    pub methods: Vec<NativeMethod>,
    /// Rust type backing objects of this type
    pub type_id: Option<TypeId>,
    /// Clone of the backing data, for value types
    pub cloner: Option<NativeClone>,
    /// Default instance factory
    pub default_instance: Option<NativeFactory>,
}

impl NativeType {
    fn new(namespace: &str, name: &str, kind: NativeKind) -> Self {
        NativeType {
            namespace: namespace.to_string(),
            name: name.to_string(),
            module: String::new(),
            kind,
            primitive: None,
            base: match kind {
                NativeKind::Class => Some("System.Object".to_string()),
                NativeKind::ValueType => Some("System.ValueType".to_string()),
                NativeKind::Interface => None,
            },
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            type_id: None,
            cloner: None,
            default_instance: None,
        }
    }

    /// A reference type deriving from `System.Object`
    #[must_use]
    pub fn class(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, NativeKind::Class)
    }

    /// An interface
    #[must_use]
    pub fn interface(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, NativeKind::Interface)
    }

    /// A value type backed by the Rust type `T`; boxed copies clone `T`
    #[must_use]
    pub fn value_type<T>(namespace: &str, name: &str) -> Self
    where
        T: Any + Clone + Default + Send + Sync,
    {
        let mut ty = Self::new(namespace, name, NativeKind::ValueType);
        ty.type_id = Some(TypeId::of::<T>());
        ty.cloner = Some(Arc::new(|data: &(dyn Any + Send + Sync)| {
            data.downcast_ref::<T>()
                .map(|value| Box::new(value.clone()) as NativeData)
        }));
        ty.default_instance = Some(Arc::new(|| Box::new(T::default()) as NativeData));
        ty
    }

    /// Associates the Rust type `T` with a reference type
    #[must_use]
    pub fn backed_by<T: Any>(mut self) -> Self {
        self.type_id = Some(TypeId::of::<T>());
        self
    }

    /// Sets a factory for default instances
    #[must_use]
    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> NativeData + Send + Sync + 'static,
    {
        self.default_instance = Some(Arc::new(factory));
        self
    }

    pub(crate) fn primitive_type(primitive: Primitive) -> Self {
        let mut ty = Self::new("System", &primitive.to_string(), NativeKind::ValueType);
        ty.primitive = Some(primitive);
        ty
    }

    /// Sets the base type
    #[must_use]
    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Removes the base type
    #[must_use]
    pub fn without_base(mut self) -> Self {
        self.base = None;
        self
    }

    /// Adds an implemented interface
    #[must_use]
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Declares the generic parameters
    #[must_use]
    pub fn generic_params(mut self, params: &[&str]) -> Self {
        self.generic_params = params.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Adds a field
    #[must_use]
    pub fn field(mut self, field: NativeField) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a method
    #[must_use]
    pub fn method(mut self, method: NativeMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// Full name, `Namespace.Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Assembly qualified name, `Namespace.Name, Module`
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}, {}", self.full_name(), self.module)
    }
}

impl fmt::Debug for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeType")
            .field("name", &self.full_name())
            .field("module", &self.module)
            .field("kind", &self.kind)
            .field("fields", &self.fields)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// A group of native types registered together, the native counterpart of a module.
#[derive(Debug, Clone)]
pub struct NativeModule {
    name: String,
    types: Vec<Arc<NativeType>>,
    by_name: HashMap<String, usize>,
    by_type_id: HashMap<TypeId, usize>,
}

impl NativeModule {
    /// An empty module named `name`
    pub fn new(name: impl Into<String>) -> Self {
        NativeModule {
            name: name.into(),
            types: Vec::new(),
            by_name: HashMap::new(),
            by_type_id: HashMap::new(),
        }
    }

    /// Adds a type; a later type with the same full name replaces the earlier one
    #[must_use]
    pub fn with_type(mut self, ty: NativeType) -> Self {
        let mut ty = ty;
        ty.module.clone_from(&self.name);
        let index = self.types.len();
        self.by_name.insert(ty.full_name(), index);
        if let Some(type_id) = ty.type_id {
            self.by_type_id.insert(type_id, index);
        }
        self.types.push(Arc::new(ty));
        self
    }

    /// Module name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All types, in registration order
    #[must_use]
    pub fn types(&self) -> &[Arc<NativeType>] {
        &self.types
    }

    /// Type by full name
    #[must_use]
    pub fn find(&self, full_name: &str) -> Option<&Arc<NativeType>> {
        self.by_name.get(full_name).map(|&i| &self.types[i])
    }

    /// Type backed by the Rust type with `type_id`
    #[must_use]
    pub fn find_by_type_id(&self, type_id: TypeId) -> Option<&Arc<NativeType>> {
        self.by_type_id.get(&type_id).map(|&i| &self.types[i])
    }
}

/// Result of a native type lookup.
#[derive(Debug, Clone)]
pub struct NativeLookup {
    /// The type found
    pub ty: Arc<NativeType>,
    /// True if the type was found outside the requested scope
    pub relocated: bool,
}

/// Every native module the host has registered, in registration order.
pub struct HostReflection {
    modules: boxcar::Vec<Arc<NativeModule>>,
}

impl HostReflection {
    /// An empty set of modules
    #[must_use]
    pub fn new() -> Self {
        HostReflection {
            modules: boxcar::Vec::new(),
        }
    }

    /// Registers a module
    pub fn add(&self, module: Arc<NativeModule>) {
        self.modules.push(module);
    }

    /// Number of registered modules
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.count()
    }

    /// Looks up `full_name`, trying the module named `scope` first and every other module after.
    #[must_use]
    pub fn find(&self, full_name: &str, scope: Option<&str>) -> Option<NativeLookup> {
        if let Some(scope) = scope {
            for (_, module) in self.modules.iter() {
                if module.name() == scope {
                    if let Some(ty) = module.find(full_name) {
                        return Some(NativeLookup {
                            ty: ty.clone(),
                            relocated: false,
                        });
                    }
                }
            }
        }

        self.modules.iter().find_map(|(_, module)| {
            module.find(full_name).map(|ty| NativeLookup {
                ty: ty.clone(),
                relocated: scope.is_some_and(|scope| module.name() != scope),
            })
        })
    }

    /// Looks up the type backed by the Rust type with `type_id`
    #[must_use]
    pub fn find_by_type_id(&self, type_id: TypeId) -> Option<Arc<NativeType>> {
        self.modules
            .iter()
            .find_map(|(_, module)| module.find_by_type_id(type_id).cloned())
    }
}

impl Default for HostReflection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostReflection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.modules.iter().map(|(_, m)| m.name()).collect();
        f.debug_struct("HostReflection").field("modules", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str, types: &[&str]) -> Arc<NativeModule> {
        let mut module = NativeModule::new(name);
        for ty in types {
            let (ns, short) = ty.rsplit_once('.').unwrap();
            module = module.with_type(NativeType::class(ns, short));
        }
        Arc::new(module)
    }

    #[test]
    fn scope_is_tried_first() {
        let host = HostReflection::new();
        host.add(module("Host.A", &["Host.Widget"]));
        host.add(module("Host.B", &["Host.Widget", "Host.Gadget"]));

        let found = host.find("Host.Widget", Some("Host.B")).unwrap();
        assert_eq!(found.ty.module, "Host.B");
        assert!(!found.relocated);

        let found = host.find("Host.Widget", None).unwrap();
        assert_eq!(found.ty.module, "Host.A");
        assert!(!found.relocated);
    }

    #[test]
    fn fallback_searches_other_modules() {
        let host = HostReflection::new();
        host.add(module("Host.A", &["Host.Widget"]));
        host.add(module("Host.B", &["Host.Gadget"]));

        let found = host.find("Host.Gadget", Some("Host.A")).unwrap();
        assert_eq!(found.ty.module, "Host.B");
        assert!(found.relocated);

        let found = host.find("Host.Widget", Some("Host.Missing")).unwrap();
        assert!(found.relocated);

        assert!(host.find("Host.Nothing", Some("Host.A")).is_none());
    }

    #[test]
    fn value_types_clone_their_data() {
        #[derive(Clone, Default, PartialEq, Debug)]
        struct Point {
            x: i32,
        }

        let ty = NativeType::value_type::<Point>("Host", "Point");
        assert_eq!(ty.kind, NativeKind::ValueType);
        assert_eq!(ty.base.as_deref(), Some("System.ValueType"));

        let original: NativeData = Box::new(Point { x: 3 });
        let copy = (ty.cloner.as_ref().unwrap())(original.as_ref()).unwrap();
        assert_eq!(copy.downcast_ref::<Point>(), Some(&Point { x: 3 }));

        let module = NativeModule::new("Host").with_type(ty);
        assert!(module.find_by_type_id(TypeId::of::<Point>()).is_some());
        assert_eq!(module.find("Host.Point").unwrap().qualified_name(), "Host.Point, Host");
    }
}
