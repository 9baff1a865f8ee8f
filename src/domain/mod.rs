//! The host facing surface of the interpreter.
//!
//! A [`Domain`] owns one type registry, one set of binding tables and one pool of interpreters.
//! Modules are loaded into it, host types are registered with it and interpreted methods are
//! invoked through it, from any number of threads at once. Cloning a domain is cheap and yields
//! another handle to the same state.
//!
//! # Examples
//!
//! ```rust
//! use dotrun::{
//!     assembly::Instruction,
//!     metadata::{
//!         method::MethodBody,
//!         module::{MethodDef, ModuleBuilder, TypeDef},
//!         signatures::TypeSig,
//!     },
//!     Domain, Value,
//! };
//!
//! let mut builder = ModuleBuilder::new("Sample");
//! let math = builder.define_type(TypeDef::class("Sample", "Math"));
//! let add = builder.define_method(
//!     math,
//!     MethodDef::new("Add")
//!         .param(TypeSig::int32())
//!         .param(TypeSig::int32())
//!         .returns(TypeSig::int32()),
//! )?;
//! builder.set_body(
//!     add,
//!     MethodBody::new(vec![
//!         Instruction::LdArg(0),
//!         Instruction::LdArg(1),
//!         Instruction::Add,
//!         Instruction::Ret,
//!     ]),
//! )?;
//!
//! let domain = Domain::new();
//! domain.load_module(builder.build())?;
//! let sum = domain.invoke_by_name("Sample.Math", "Add", None, &[Value::I32(40), Value::I32(2)])?;
//! assert_eq!(sum.map(|v| v.as_i32()).transpose()?, Some(42));
//! # Ok::<(), dotrun::Error>(())
//! ```

mod config;

pub use config::DomainConfig;

use std::{
    any::{Any, TypeId},
    collections::HashSet,
    fmt,
    sync::{Arc, Weak},
};

use rayon::prelude::*;

use crate::{
    assembly::Instruction,
    binding::{BindingJob, BindingTables, CrossDomainAdaptor},
    engine::{DebugService, InterpreterPool, InvocationContext, NativeObject, ObjectRef, Value},
    metadata::{
        method::{MethodRc, CONSTRUCTOR_NAME},
        module::{Module, ModuleId},
        typesystem::{corlib, GenericContext, NativeModule, Primitive, StackKind, TypeRc, TypeRegistry},
    },
    Error, Result,
};

struct DomainInner {
    config: DomainConfig,
    registry: TypeRegistry,
    bindings: Arc<BindingTables>,
    pool: InterpreterPool,
    debug: Option<Arc<dyn DebugService>>,
}

/// An isolated interpreter instance: loaded modules, host types, bindings and interpreters.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

/// A non-owning handle of a [`Domain`], for host objects the domain itself may keep alive.
#[derive(Clone)]
pub struct WeakDomain {
    inner: Weak<DomainInner>,
}

impl WeakDomain {
    /// The domain, while it is alive
    ///
    /// # Errors
    /// Returns [`Error::DomainDropped`] once every [`Domain`] handle was dropped.
    pub fn upgrade(&self) -> Result<Domain> {
        self.inner
            .upgrade()
            .map(|inner| Domain { inner })
            .ok_or(Error::DomainDropped)
    }
}

impl fmt::Debug for WeakDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDomain")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Domain {
    /// A domain with the default configuration, holding only the core library
    #[must_use]
    pub fn new() -> Self {
        DomainBuilder::new().build()
    }

    /// A handle that does not keep the domain alive
    #[must_use]
    pub fn downgrade(&self) -> WeakDomain {
        WeakDomain {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// A domain with `config`
    #[must_use]
    pub fn with_config(config: DomainConfig) -> Self {
        DomainBuilder::new().config(config).build()
    }

    /// Starts configuring a domain
    #[must_use]
    pub fn builder() -> DomainBuilder {
        DomainBuilder::new()
    }

    /// The configuration the domain was created with
    #[must_use]
    pub fn config(&self) -> &DomainConfig {
        &self.inner.config
    }

    /// The type registry
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.inner.registry
    }

    /// The binding tables
    #[must_use]
    pub fn bindings(&self) -> &Arc<BindingTables> {
        &self.inner.bindings
    }

    /// The interpreter pool
    #[must_use]
    pub fn pool(&self) -> &InterpreterPool {
        &self.inner.pool
    }

    /// The attached debug service
    #[must_use]
    pub fn debug(&self) -> Option<&Arc<dyn DebugService>> {
        self.inner.debug.as_ref()
    }

    /// Returns true if both handles refer to the same domain
    #[must_use]
    pub fn ptr_eq(&self, other: &Domain) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Loads a bytecode module and registers its types.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateType`] if the module defines a type name that is already
    /// registered.
    pub fn load_module(&self, module: Module) -> Result<ModuleId> {
        let (id, module) = self.registry().load_module(module)?;
        if let Some(debug) = self.debug() {
            debug.module_loaded(id, module.name());
        }
        Ok(id)
    }

    /// Registers a module of host types
    pub fn add_native_module(&self, module: NativeModule) {
        self.registry().add_native_module(module);
    }

    /// Registers a cross-domain adaptor for the native base types it names.
    ///
    /// # Errors
    /// Returns [`Error::AdaptorAlreadyRegistered`] if one of the base types is already covered.
    pub fn register_adaptor(&self, adaptor: Arc<dyn CrossDomainAdaptor>) -> Result<()> {
        self.registry().adaptors().register(adaptor.clone())?;
        self.registry().native_type(&adaptor.adaptor_type());
        Ok(())
    }

    /// Populates the binding tables with `init` and freezes them, on a worker thread if
    /// `threaded` is set. See [`BindingTables::initialize`].
    ///
    /// # Errors
    /// Returns [`Error::BindingThread`] if the worker thread cannot be started.
    pub fn initialize_bindings<F>(&self, threaded: bool, init: F) -> Result<BindingJob>
    where
        F: FnOnce(&BindingTables) -> Result<()> + Send + 'static,
    {
        self.bindings().initialize(threaded, init)
    }

    /// Resolves a type by its full name, composite names included
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if no type of that name is known.
    pub fn resolve_type(&self, name: &str) -> Result<TypeRc> {
        self.registry().resolve(name)
    }

    /// The descriptor of the host type backed by `T`
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if no registered native type is backed by `T`.
    pub fn native_type_of<T: Any>(&self) -> Result<TypeRc> {
        self.registry().native_type_of(TypeId::of::<T>())
    }

    /// Wraps a host value as an object of the native type backed by `T`
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if no registered native type is backed by `T`.
    pub fn wrap_native<T: Any + Send + Sync>(&self, value: T) -> Result<Value> {
        let ty = self.native_type_of::<T>()?;
        Ok(Value::Object(ObjectRef::native(NativeObject::new(ty, Box::new(value)))))
    }

    /// The method `name` taking `param_count` parameters on `type_name` or its bases
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] or [`Error::MethodNotFound`].
    pub fn find_method(&self, type_name: &str, name: &str, param_count: usize) -> Result<MethodRc> {
        let ty = self.resolve_type(type_name)?;
        self.registry()
            .find_method(&ty, name, param_count)?
            .ok_or_else(|| Error::MethodNotFound {
                method: name.to_string(),
                declaring_type: type_name.to_string(),
                token: None,
            })
    }

    /// Invokes `method` with host values.
    ///
    /// Virtual methods dispatch on the runtime type of `receiver`. Arguments are checked
    /// against the parameter types before anything is pushed.
    ///
    /// # Errors
    /// Returns [`Error::ArgumentCountMismatch`], [`Error::NullReceiver`] or
    /// [`Error::ArgumentTypeMismatch`] for calls that do not fit the method, and
    /// [`Error::Exception`] for interpreted exceptions nothing handled.
    pub fn invoke(&self, method: &MethodRc, receiver: Option<Value>, args: &[Value]) -> Result<Option<Value>> {
        if args.len() != method.params.len() {
            return Err(Error::ArgumentCountMismatch {
                expected: method.params.len(),
                found: args.len(),
            });
        }
        let receiver = if method.has_this() {
            match receiver {
                Some(receiver) if !receiver.is_null() => Some(receiver),
                _ => return Err(Error::NullReceiver(method.full_name())),
            }
        } else {
            None
        };
        for (index, (arg, ty)) in args.iter().zip(&method.params).enumerate() {
            if !self.fits(arg, ty)? {
                return Err(Error::ArgumentTypeMismatch {
                    index,
                    expected: ty.name().to_string(),
                });
            }
        }

        let target = match &receiver {
            Some(Value::Object(object)) if method.is_virtual() => {
                self.registry().find_override(object.ty(), method)?
            }
            _ => method.clone(),
        };

        let mut interpreter = self.pool().acquire()?;
        if !target.has_this() {
            interpreter.ensure_initialized(self, &target.declaring)?;
        }
        let result = interpreter.invoke_host(self, &target, receiver.as_ref(), args);
        if let Err(Error::Exception(exception)) = &result {
            tracing::debug!(method = %target.full_name(), %exception, "unhandled interpreted exception");
        }
        result
    }

    /// Invokes the method `method_name` of `type_name` whose parameter count matches `args`
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] or [`Error::MethodNotFound`] if nothing matches, and the
    /// errors of [`Domain::invoke`].
    pub fn invoke_by_name(
        &self,
        type_name: &str,
        method_name: &str,
        receiver: Option<Value>,
        args: &[Value],
    ) -> Result<Option<Value>> {
        let method = self.find_method(type_name, method_name, args.len())?;
        self.invoke(&method, receiver, args)
    }

    /// Instantiates the generic method `method_name` with the named type arguments and
    /// invokes it
    ///
    /// # Errors
    /// Returns [`Error::GenericArityMismatch`] if the number of type arguments does not match
    /// the method's generic parameters, and the errors of [`Domain::invoke_by_name`].
    pub fn invoke_generic(
        &self,
        type_name: &str,
        method_name: &str,
        type_args: &[&str],
        receiver: Option<Value>,
        args: &[Value],
    ) -> Result<Option<Value>> {
        let definition = self.find_method(type_name, method_name, args.len())?;
        let type_args = type_args
            .iter()
            .map(|name| self.resolve_type(name))
            .collect::<Result<Vec<_>>>()?;
        let method = self.registry().instantiate_method(&definition, type_args)?;
        self.invoke(&method, receiver, args)
    }

    /// Creates an instance of `type_name` through the constructor taking `args`
    ///
    /// # Errors
    /// Returns [`Error::MethodNotFound`] if no constructor takes that many arguments and
    /// [`Error::ArgumentTypeMismatch`] for arguments that do not fit.
    pub fn instantiate(&self, type_name: &str, args: &[Value]) -> Result<Value> {
        let ty = self.resolve_type(type_name)?;
        let ctor = self
            .registry()
            .constructors(&ty)?
            .into_iter()
            .find(|ctor| ctor.params.len() == args.len());
        let Some(ctor) = ctor else {
            if args.is_empty() && ty.is_value_type() {
                return self.registry().default_value(&ty);
            }
            return Err(Error::MethodNotFound {
                method: CONSTRUCTOR_NAME.to_string(),
                declaring_type: type_name.to_string(),
                token: None,
            });
        };
        for (index, (arg, param)) in args.iter().zip(&ctor.params).enumerate() {
            if !self.fits(arg, param)? {
                return Err(Error::ArgumentTypeMismatch {
                    index,
                    expected: param.name().to_string(),
                });
            }
        }
        let mut interpreter = self.pool().acquire()?;
        interpreter.construct_host(self, &ctor, args)
    }

    /// Borrows an interpreter for a streaming call of `method`
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the pool lock was poisoned.
    pub fn begin_invoke(&self, method: &MethodRc) -> Result<InvocationContext<'_>> {
        let interpreter = self.pool().acquire()?;
        Ok(InvocationContext::new(self, method.clone(), interpreter))
    }

    /// Resolves every token referenced by the method bodies of `type_name` ahead of the first
    /// call, in parallel. With `recursive`, interpreted types reached through those tokens are
    /// warmed as well. Returns the number of resolved tokens; methods warmed by an earlier call
    /// count zero.
    ///
    /// Generic definitions are skipped; their tokens only resolve against an instantiation.
    ///
    /// # Errors
    /// Returns the first resolution error encountered.
    pub fn prewarm(&self, type_name: &str, recursive: bool) -> Result<usize> {
        let root = self.resolve_type(type_name)?;
        let methods = self.warmable_methods(&root)?;
        let resolved = self.prewarm_layers(root, methods, recursive)?;
        tracing::debug!(type_name, resolved, recursive, "prewarmed type");
        Ok(resolved)
    }

    /// Like [`Domain::prewarm`], restricted to the methods of `type_name` called `names`.
    /// Every overload of a listed name is warmed.
    ///
    /// # Errors
    /// Returns [`Error::MethodNotFound`] for a name the type does not declare, or the first
    /// resolution error encountered.
    pub fn prewarm_methods(&self, type_name: &str, names: &[&str], recursive: bool) -> Result<usize> {
        let root = self.resolve_type(type_name)?;
        let all = self.warmable_methods(&root)?;
        let mut methods = Vec::new();
        for name in names {
            let before = methods.len();
            methods.extend(all.iter().filter(|m| m.name == *name).cloned());
            if methods.len() == before {
                return Err(Error::MethodNotFound {
                    method: (*name).to_string(),
                    declaring_type: type_name.to_string(),
                    token: None,
                });
            }
        }
        let resolved = self.prewarm_layers(root, methods, recursive)?;
        tracing::debug!(type_name, methods = names.len(), resolved, recursive, "prewarmed methods");
        Ok(resolved)
    }

    fn warmable_methods(&self, ty: &TypeRc) -> Result<Vec<MethodRc>> {
        Ok(self
            .registry()
            .methods(ty)?
            .iter()
            .filter(|m| m.body().is_some() && !m.is_generic_definition())
            .cloned()
            .collect())
    }

    fn prewarm_layers(&self, root: TypeRc, mut methods: Vec<MethodRc>, recursive: bool) -> Result<usize> {
        let mut seen = HashSet::from([root.index()]);
        let mut resolved = 0;

        while !methods.is_empty() {
            let warmed = methods
                .par_iter()
                .map(|method| self.prewarm_method(method))
                .collect::<Result<Vec<_>>>()?;

            let mut next = Vec::new();
            for (count, reached) in warmed {
                resolved += count;
                if !recursive {
                    continue;
                }
                for ty in reached {
                    let ty = innermost(ty);
                    if ty.is_interpreted() && !ty.is_generic_definition() && seen.insert(ty.index()) {
                        next.push(ty);
                    }
                }
            }
            methods = Vec::new();
            for ty in &next {
                methods.extend(self.warmable_methods(ty)?);
            }
        }
        Ok(resolved)
    }

    fn prewarm_method(&self, method: &MethodRc) -> Result<(usize, Vec<TypeRc>)> {
        let registry = self.registry();
        let (Some(body), Some((_, module_id, _))) = (method.body(), method.interpreted()) else {
            return Ok((0, Vec::new()));
        };
        if method.declaring.is_generic_definition() {
            return Ok((0, Vec::new()));
        }
        if let Some(reached) = method.prewarmed.get() {
            return Ok((0, reached.to_vec()));
        }

        let mut reached: Vec<TypeRc> = registry.method_locals(method)?.to_vec();
        let mut count = 0;
        for instruction in &body.code {
            let Some(token) = instruction.token() else {
                continue;
            };
            match instruction {
                Instruction::Call(_) | Instruction::CallVirt(_) | Instruction::NewObj(_) => {
                    if let Some(target) =
                        registry.resolve_method(module_id, token, Some(&method.declaring), Some(method.as_ref()))?
                    {
                        reached.push(target.declaring.clone());
                    }
                }
                Instruction::LdFld(_)
                | Instruction::LdFldA(_)
                | Instruction::StFld(_)
                | Instruction::LdSFld(_)
                | Instruction::LdSFldA(_)
                | Instruction::StSFld(_) => {
                    let field = registry.resolve_field(module_id, token, Some(&method.declaring), Some(method.as_ref()))?;
                    reached.push(field.declaring.clone());
                }
                Instruction::LdStr(_) => {
                    registry.resolve_string(module_id, token)?;
                }
                _ => {
                    let ty = registry.resolve_type_token(module_id, token, GenericContext::of_method(method))?;
                    reached.push(ty);
                }
            }
            count += 1;
        }
        let reached = method.prewarmed.get_or_init(|| reached.into()).to_vec();
        Ok((count, reached))
    }

    /// Returns true if `value` may be passed where `ty` is expected
    fn fits(&self, value: &Value, ty: &TypeRc) -> Result<bool> {
        if ty.is_by_ref() {
            return Ok(false);
        }
        if ty.is_generic_parameter() {
            return Ok(true);
        }
        let registry = self.registry();
        if let Some(primitive) = ty.primitive() {
            return Ok(match value {
                Value::Bool(_) => primitive == Primitive::Boolean,
                Value::I32(_) => primitive.stack_kind() == StackKind::Int32,
                Value::I64(_) => primitive.stack_kind() == StackKind::Int64,
                Value::F32(_) => primitive == Primitive::Single,
                Value::F64(_) => primitive == Primitive::Double,
                Value::Object(object) => object.ty().primitive() == Some(primitive),
                Value::Null | Value::Str(_) => false,
            });
        }
        let from = match value {
            Value::Null => return Ok(!ty.is_value_type()),
            Value::Bool(_) => registry.primitive(Primitive::Boolean)?,
            Value::I32(_) => registry.primitive(Primitive::Int32)?,
            Value::I64(_) => registry.primitive(Primitive::Int64)?,
            Value::F32(_) => registry.primitive(Primitive::Single)?,
            Value::F64(_) => registry.primitive(Primitive::Double)?,
            Value::Str(_) => registry.corlib(corlib::STRING)?,
            Value::Object(object) => object.ty().clone(),
        };
        registry.is_assignable(&from, ty)
    }
}

/// Strips array and by-ref wrappers
fn innermost(mut ty: TypeRc) -> TypeRc {
    while let Some(element) = ty.element().cloned() {
        ty = element;
    }
    ty
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("config", &self.inner.config)
            .field("types", &self.inner.registry.type_count())
            .field("modules", &self.inner.registry.module_count())
            .field("bindings", &self.inner.bindings)
            .field("pool", &self.inner.pool)
            .field("debug", &self.inner.debug.is_some())
            .finish()
    }
}

/// Configures and creates a [`Domain`].
#[derive(Default)]
pub struct DomainBuilder {
    config: DomainConfig,
    native_modules: Vec<NativeModule>,
    debug: Option<Arc<dyn DebugService>>,
}

impl DomainBuilder {
    /// A builder with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration
    #[must_use]
    pub fn config(mut self, config: DomainConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a module of host types
    #[must_use]
    pub fn native_module(mut self, module: NativeModule) -> Self {
        self.native_modules.push(module);
        self
    }

    /// Attaches a debug service
    #[must_use]
    pub fn debug_service(mut self, debug: Arc<dyn DebugService>) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Creates the domain
    #[must_use]
    pub fn build(self) -> Domain {
        let registry = TypeRegistry::new();
        for module in self.native_modules {
            registry.add_native_module(module);
        }
        let pool = InterpreterPool::new(self.config.stack_capacity, self.debug.clone());
        Domain {
            inner: Arc::new(DomainInner {
                config: self.config,
                registry,
                bindings: Arc::new(BindingTables::new()),
                pool,
                debug: self.debug,
            }),
        }
    }
}

impl fmt::Debug for DomainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainBuilder")
            .field("config", &self.config)
            .field("native_modules", &self.native_modules.len())
            .field("debug", &self.debug.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typesystem::{NativeMethod, NativeType};

    struct Counter(i32);

    fn host_module() -> NativeModule {
        NativeModule::new("Host").with_type(
            NativeType::class("Host", "Counter")
                .backed_by::<Counter>()
                .method(
                    NativeMethod::new("Get", |call| {
                        let this = call.this()?;
                        this.as_object()
                            .and_then(|o| o.with_native(|c: &Counter| c.0))
                            .map(Value::I32)
                            .ok_or_else(|| Error::NullReceiver("Host.Counter::Get".to_string()))
                    })
                    .instance()
                    .returns("System.Int32"),
                ),
        )
    }

    #[test]
    fn wrap_native_and_reflection_call() {
        let domain = Domain::builder().native_module(host_module()).build();
        let counter = domain.wrap_native(Counter(7)).unwrap();
        let result = domain
            .invoke_by_name("Host.Counter", "Get", Some(counter), &[])
            .unwrap();
        assert_eq!(result.unwrap().as_i32().unwrap(), 7);
    }

    #[test]
    fn instance_method_needs_receiver() {
        let domain = Domain::builder().native_module(host_module()).build();
        let err = domain.invoke_by_name("Host.Counter", "Get", None, &[]).unwrap_err();
        assert!(matches!(err, Error::NullReceiver(_)));
    }

    #[test]
    fn unknown_names() {
        let domain = Domain::new();
        assert!(matches!(
            domain.invoke_by_name("Nope.Missing", "Run", None, &[]),
            Err(Error::TypeNotFound(_))
        ));
        assert!(matches!(
            domain.invoke_by_name("System.Object", "Run", None, &[]),
            Err(Error::MethodNotFound { .. })
        ));
    }

    #[test]
    fn clones_share_state() {
        let domain = Domain::new();
        let other = domain.clone();
        assert!(domain.ptr_eq(&other));
        assert!(!domain.ptr_eq(&Domain::new()));
    }
}
