//! The type registry of a domain.
//!
//! This module provides the [`TypeRegistry`], the thread-safe store of every type descriptor a
//! domain knows about. It loads modules, bridges host (native) types into the same descriptor
//! space as interpreted types and derives arrays, by-reference wrappers and generic
//! instantiations on demand.
//!
//! # Registry Architecture
//!
//! - **Index lookup**: every descriptor receives a process-wide [`TypeIndex`] from an append-only
//!   `boxcar::Vec`, so stack slots can refer to types by a plain integer
//! - **Name lookup**: canonical names (and every alias a name was resolved under) map to the one
//!   interned descriptor in a `DashMap`
//! - **Native bridge**: materialized host types keyed by assembly qualified name and by Rust
//!   `TypeId`
//! - **Lazy facts**: base types, interfaces, field layouts, methods and static storage are
//!   computed on first use and memoized per [`TypeIndex`]
//!
//! # Thread Safety
//!
//! Every map is a concurrent map, and descriptors are built outside of any map lock and then
//! published with `entry().or_insert`, so concurrent first resolutions of one name agree on a
//! single instance and resolution may recurse freely.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use dotrun::metadata::typesystem::TypeRegistry;
//!
//! let registry = TypeRegistry::new();
//! let ints = registry.resolve("System.Int32[]")?;
//! assert!(Arc::ptr_eq(&ints, &registry.resolve("System.Int32[]")?));
//! assert_eq!(ints.element().map(|e| e.name()), Some("System.Int32"));
//! # Ok::<(), dotrun::Error>(())
//! ```

use std::{
    any::TypeId,
    fmt,
    sync::{atomic::AtomicU32, Arc, OnceLock},
};

use dashmap::{mapref::entry::Entry, DashMap};
use uguid::Guid;

use crate::{
    binding::AdaptorRegistry,
    engine::{NativeObject, ObjectRef, Value},
    metadata::{
        cache::TokenCache,
        method::{MethodId, MethodRc},
        module::{Module, ModuleId, ModuleRc, TypeDef},
        token::Token,
        typesystem::{
            array_suffix, corlib, FieldHandle, GenericBinding, GenericContext, HostReflection,
            NativeKind, NativeModule, NativeType, Primitive, RuntimeType, StaticStorage, TypeIndex,
            TypeKind, TypeLayout, TypeName, TypeRc,
        },
    },
    Error, Result,
};

/// Canonical name of an interpreted type definition; nested types use `+`
fn definition_name(def: &TypeDef) -> String {
    def.full_name().replace('/', "+")
}

/// Thread-safe store of all type descriptors of a domain.
pub struct TypeRegistry {
    by_index: boxcar::Vec<OnceLock<TypeRc>>,
    names: DashMap<String, TypeRc>,
    native_bridge: DashMap<String, TypeRc>,
    type_ids: DashMap<TypeId, TypeRc>,
    defs: DashMap<(ModuleId, Token), TypeRc>,
    modules: boxcar::Vec<ModuleRc>,
    mvids: DashMap<Guid, ModuleId>,
    host: HostReflection,
    tokens: TokenCache,
    adaptors: AdaptorRegistry,
    bases: DashMap<TypeIndex, Option<TypeRc>>,
    interfaces: DashMap<TypeIndex, Arc<[TypeRc]>>,
    layouts: DashMap<TypeIndex, Arc<TypeLayout>>,
    pub(crate) methods: DashMap<TypeIndex, Arc<[MethodRc]>>,
    statics: DashMap<TypeIndex, Arc<StaticStorage>>,
    pub(crate) method_instances: DashMap<(MethodId, String), MethodRc>,
    pub(crate) next_method_id: AtomicU32,
}

impl TypeRegistry {
    /// A registry holding the core library
    #[must_use]
    pub fn new() -> Self {
        let registry = TypeRegistry {
            by_index: boxcar::Vec::new(),
            names: DashMap::new(),
            native_bridge: DashMap::new(),
            type_ids: DashMap::new(),
            defs: DashMap::new(),
            modules: boxcar::Vec::new(),
            mvids: DashMap::new(),
            host: HostReflection::new(),
            tokens: TokenCache::new(),
            adaptors: AdaptorRegistry::new(),
            bases: DashMap::new(),
            interfaces: DashMap::new(),
            layouts: DashMap::new(),
            methods: DashMap::new(),
            statics: DashMap::new(),
            method_instances: DashMap::new(),
            next_method_id: AtomicU32::new(1),
        };
        registry.host.add(Arc::new(corlib::core_library()));
        registry
    }

    /// The host reflection modules
    #[must_use]
    pub fn host(&self) -> &HostReflection {
        &self.host
    }

    /// The token caches
    #[must_use]
    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// The cross-domain adaptors
    #[must_use]
    pub fn adaptors(&self) -> &AdaptorRegistry {
        &self.adaptors
    }

    /// Number of descriptors created so far
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.by_index.count()
    }

    /// Number of loaded modules
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.count()
    }

    fn allocate(&self, build: impl FnOnce(TypeIndex) -> RuntimeType) -> TypeRc {
        let slot = self.by_index.push(OnceLock::new());
        let ty = Arc::new(build(slot as TypeIndex));
        if let Some(cell) = self.by_index.get(slot) {
            let _ = cell.set(ty.clone());
        }
        ty
    }

    fn lookup(&self, name: &str) -> Option<TypeRc> {
        self.names.get(name).map(|entry| entry.value().clone())
    }

    fn intern(&self, name: String, build: impl FnOnce(TypeIndex, String) -> RuntimeType) -> TypeRc {
        if let Some(existing) = self.lookup(&name) {
            return existing;
        }
        let ty = self.allocate(|index| build(index, name.clone()));
        self.names.entry(name).or_insert(ty).value().clone()
    }

    /// Descriptor with registry index `index`
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for indices that were never handed out.
    pub fn type_at(&self, index: TypeIndex) -> Result<TypeRc> {
        self.by_index
            .get(index as usize)
            .and_then(OnceLock::get)
            .cloned()
            .ok_or_else(|| Error::InvalidStackState(format!("unknown type index {}", index)))
    }

    /// Loaded module with identity `id`
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for identities that were never handed out.
    pub fn module(&self, id: ModuleId) -> Result<ModuleRc> {
        self.modules
            .get(id.0 as usize)
            .cloned()
            .ok_or_else(|| malformed_error!("Unknown module {}", id))
    }

    /// Loads a module and registers its type definitions.
    ///
    /// Loading a module with a version id that was loaded before returns the existing identity.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateType`] if a type name of the module is already registered.
    pub fn load_module(&self, module: Module) -> Result<(ModuleId, ModuleRc)> {
        let mvid = module.mvid();
        if mvid != Guid::ZERO {
            if let Some(id) = self.mvids.get(&mvid).map(|entry| *entry.value()) {
                return Ok((id, self.module(id)?));
            }
        }

        for (_, def) in module.types() {
            let name = definition_name(def);
            if self.names.contains_key(&name) {
                return Err(Error::DuplicateType(name));
            }
        }

        let module = Arc::new(module);
        let id = ModuleId(self.modules.push(module.clone()) as u32);
        for (token, def) in module.types() {
            let name = definition_name(def);
            let ty = self.allocate(|index| {
                RuntimeType::new(
                    index,
                    name.clone(),
                    TypeKind::Interpreted {
                        module: module.clone(),
                        module_id: id,
                        token,
                    },
                    Vec::new(),
                    None,
                )
            });
            match self.names.entry(name) {
                Entry::Occupied(existing) => return Err(Error::DuplicateType(existing.key().clone())),
                Entry::Vacant(slot) => {
                    slot.insert(ty.clone());
                }
            }
            self.defs.insert((id, token), ty);
        }

        if mvid != Guid::ZERO {
            self.mvids.insert(mvid, id);
        }
        tracing::debug!(module = module.name(), %id, types = module.type_count(), "loaded module");
        Ok((id, module))
    }

    /// Registers a module of host types
    pub fn add_native_module(&self, module: NativeModule) {
        tracing::debug!(module = module.name(), types = module.types().len(), "added native module");
        self.host.add(Arc::new(module));
    }

    /// The descriptor of the type with `token` in module `module_id`
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if the module defines no such type.
    pub fn def_type(&self, module_id: ModuleId, token: Token) -> Result<TypeRc> {
        self.defs
            .get(&(module_id, token))
            .map(|entry| entry.value().clone())
            .ok_or(Error::InvalidToken(token))
    }

    /// Materializes a host type.
    pub fn native_type(&self, native: &Arc<NativeType>) -> TypeRc {
        let qualified = native.qualified_name();
        if let Some(existing) = self.native_bridge.get(&qualified).map(|e| e.value().clone()) {
            return existing;
        }

        let full_name = native.full_name();
        let ty = self.allocate(|index| {
            RuntimeType::new(
                index,
                full_name.clone(),
                TypeKind::Native(native.clone()),
                Vec::new(),
                None,
            )
        });
        let ty = self.native_bridge.entry(qualified).or_insert(ty).value().clone();
        self.names.entry(full_name).or_insert_with(|| ty.clone());
        if let Some(type_id) = native.type_id {
            self.type_ids.entry(type_id).or_insert_with(|| ty.clone());
        }
        ty
    }

    /// The descriptor of the host type backed by the Rust type with `type_id`
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if no registered native type is backed by it.
    pub fn native_type_of(&self, type_id: TypeId) -> Result<TypeRc> {
        if let Some(ty) = self.type_ids.get(&type_id).map(|e| e.value().clone()) {
            return Ok(ty);
        }
        self.host
            .find_by_type_id(type_id)
            .map(|native| self.native_type(&native))
            .ok_or_else(|| Error::TypeNotFound(format!("{:?}", type_id)))
    }

    /// Resolves a composite type name.
    ///
    /// The outermost marker is stripped first, its base resolved and then wrapped again, so
    /// `Sample.Foo[]` resolves `Sample.Foo` before deriving the array type. The result is
    /// remembered under `name` as well as under its canonical spelling.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] carrying the attempted name.
    pub fn resolve(&self, name: &str) -> Result<TypeRc> {
        if let Some(ty) = self.lookup(name) {
            return Ok(ty);
        }

        let parsed = TypeName::parse(name)?;
        let ty = self.resolve_parsed(&parsed)?;
        if ty.name() != name {
            self.names.entry(name.to_string()).or_insert_with(|| ty.clone());
        }
        tracing::trace!(name, index = ty.index(), "resolved type name");
        Ok(ty)
    }

    fn resolve_parsed(&self, name: &TypeName) -> Result<TypeRc> {
        match name {
            TypeName::Simple { name, scope } => self.resolve_scoped(name, scope.as_deref()),
            TypeName::Array { element, rank } => {
                let element = self.resolve_parsed(element)?;
                Ok(self.make_array(&element, *rank))
            }
            TypeName::ByRef(inner) => {
                let inner = self.resolve_parsed(inner)?;
                Ok(self.make_by_ref(&inner))
            }
            TypeName::Generic { definition, args } => {
                let definition = self.resolve_parsed(definition)?;
                let args = args
                    .iter()
                    .map(|arg| self.resolve_parsed(arg))
                    .collect::<Result<Vec<_>>>()?;
                self.make_generic_instance(&definition, args)
            }
        }
    }

    /// Resolves a plain full name expected in module `scope`.
    ///
    /// Interpreted types and previously bridged host types are found by name. Otherwise the
    /// host modules are searched, the module named `scope` first and all others after; a type
    /// found outside of `scope` is bound all the same. Names using `/` as nested type separator
    /// are retried with `+`.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] carrying the attempted name.
    pub fn resolve_scoped(&self, name: &str, scope: Option<&str>) -> Result<TypeRc> {
        if let Some(scope) = scope {
            let qualified = format!("{}, {}", name, scope);
            if let Some(ty) = self.native_bridge.get(&qualified).map(|e| e.value().clone()) {
                return Ok(ty);
            }
        }
        if let Some(ty) = self.lookup(name) {
            return Ok(ty);
        }

        if let Some(found) = self.host.find(name, scope) {
            if found.relocated {
                tracing::warn!(
                    name,
                    requested = scope.unwrap_or_default(),
                    found = found.ty.module.as_str(),
                    "bound native type from a module other than the requested scope"
                );
            }
            return Ok(self.native_type(&found.ty));
        }

        if name.contains('/') {
            return self
                .resolve_scoped(&name.replace('/', "+"), scope)
                .map_err(|_| Error::TypeNotFound(name.to_string()));
        }
        Err(Error::TypeNotFound(name.to_string()))
    }

    /// A core library type
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if the core library does not define `name`.
    pub fn corlib(&self, name: &str) -> Result<TypeRc> {
        self.resolve_scoped(name, Some(corlib::CORE_LIBRARY))
    }

    /// The descriptor of a primitive
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if the core library was replaced without primitives.
    pub fn primitive(&self, primitive: Primitive) -> Result<TypeRc> {
        self.corlib(&primitive.full_name())
    }

    /// The array type of `element` with `rank` dimensions
    pub fn make_array(&self, element: &TypeRc, rank: u8) -> TypeRc {
        let rank = rank.max(1);
        let name = format!("{}{}", element.name(), array_suffix(rank));
        self.intern(name, |index, name| {
            RuntimeType::new(
                index,
                name,
                TypeKind::Array {
                    element: element.clone(),
                    rank,
                },
                Vec::new(),
                None,
            )
        })
    }

    /// The by-reference type of `element`
    pub fn make_by_ref(&self, element: &TypeRc) -> TypeRc {
        let name = format!("{}&", element.name());
        self.intern(name, |index, name| {
            RuntimeType::new(
                index,
                name,
                TypeKind::ByRef {
                    element: element.clone(),
                },
                Vec::new(),
                None,
            )
        })
    }

    /// The placeholder of the open generic parameter `name`
    pub fn generic_parameter(&self, name: &str) -> TypeRc {
        self.intern(format!("!{}", name), |index, name| {
            RuntimeType::new(index, name, TypeKind::GenericParameter, Vec::new(), None)
        })
    }

    /// The instantiation of a generic definition with `args`, keyed by `Definition<A,B>`.
    ///
    /// # Errors
    /// Returns [`Error::GenericArityMismatch`] if `args` does not match the definition's
    /// parameter count.
    pub fn make_generic_instance(&self, definition: &TypeRc, args: Vec<TypeRc>) -> Result<TypeRc> {
        let definition = definition.definition().cloned().unwrap_or_else(|| definition.clone());
        let params = definition.generic_params();
        if params.len() != args.len() {
            return Err(Error::GenericArityMismatch {
                type_name: definition.name().to_string(),
                expected: params.len(),
                found: args.len(),
            });
        }

        let arg_names: Vec<&str> = args.iter().map(|arg| arg.name()).collect();
        let name = format!("{}<{}>", definition.name(), arg_names.join(","));
        let bindings: Vec<GenericBinding> = params
            .iter()
            .zip(args.iter())
            .map(|(name, ty)| GenericBinding {
                name: name.clone(),
                ty: ty.clone(),
            })
            .collect();

        Ok(self.intern(name, |index, name| {
            RuntimeType::new(
                index,
                name,
                definition.kind().clone(),
                bindings,
                Some(definition.clone()),
            )
        }))
    }

    /// Base type of `ty`; `None` for `System.Object`, interfaces and placeholders
    ///
    /// # Errors
    /// Returns the resolution errors of the base type reference.
    pub fn base_type(&self, ty: &TypeRc) -> Result<Option<TypeRc>> {
        if let Some(base) = self.bases.get(&ty.index()).map(|e| e.value().clone()) {
            return Ok(base);
        }

        let base = match ty.kind() {
            TypeKind::Interpreted { module_id, .. } => {
                let def = ty.type_def().ok_or_else(|| Error::TypeNotFound(ty.name().to_string()))?;
                match &def.extends {
                    Some(sig) => Some(self.resolve_type_sig(*module_id, sig, GenericContext::of_type(ty))?),
                    None if def.is_interface() => None,
                    None if def.is_value_type() => Some(self.corlib(corlib::VALUE_TYPE)?),
                    None => Some(self.corlib(corlib::OBJECT)?),
                }
            }
            TypeKind::Native(native) => match &native.base {
                Some(base) => Some(self.resolve_scoped(base, Some(&native.module))?),
                None => None,
            },
            TypeKind::Array { .. } => Some(self.corlib(corlib::ARRAY)?),
            TypeKind::ByRef { .. } | TypeKind::GenericParameter => None,
        };

        Ok(self.bases.entry(ty.index()).or_insert(base).value().clone())
    }

    /// Interfaces `ty` declares directly
    ///
    /// # Errors
    /// Returns the resolution errors of the interface references.
    pub fn interfaces(&self, ty: &TypeRc) -> Result<Arc<[TypeRc]>> {
        if let Some(found) = self.interfaces.get(&ty.index()).map(|e| e.value().clone()) {
            return Ok(found);
        }

        let list: Vec<TypeRc> = match ty.kind() {
            TypeKind::Interpreted { module_id, .. } => match ty.type_def() {
                Some(def) => def
                    .interfaces
                    .iter()
                    .map(|sig| self.resolve_type_sig(*module_id, sig, GenericContext::of_type(ty)))
                    .collect::<Result<_>>()?,
                None => Vec::new(),
            },
            TypeKind::Native(native) => native
                .interfaces
                .iter()
                .map(|name| self.resolve_scoped(name, Some(&native.module)))
                .collect::<Result<_>>()?,
            _ => Vec::new(),
        };

        Ok(self
            .interfaces
            .entry(ty.index())
            .or_insert(list.into())
            .value()
            .clone())
    }

    /// Returns true if a value of type `from` may be stored where `to` is expected
    ///
    /// # Errors
    /// Returns the resolution errors of base types and interfaces along the way.
    pub fn is_assignable(&self, from: &TypeRc, to: &TypeRc) -> Result<bool> {
        if Arc::ptr_eq(from, to) {
            return Ok(true);
        }
        if to.name() == corlib::OBJECT {
            return Ok(!from.is_by_ref());
        }

        let mut current = Some(from.clone());
        while let Some(ty) = current {
            if Arc::ptr_eq(&ty, to) {
                return Ok(true);
            }
            if to.is_interface() {
                for interface in self.interfaces(&ty)?.iter() {
                    if Arc::ptr_eq(interface, to) || self.is_assignable(interface, to)? {
                        return Ok(true);
                    }
                }
            }
            current = self.base_type(&ty)?;
        }
        Ok(false)
    }

    /// The first host type in the base chain of `ty`, `ty` itself included
    ///
    /// # Errors
    /// Returns the resolution errors of the base chain.
    pub fn first_native_base(&self, ty: &TypeRc) -> Result<Option<TypeRc>> {
        let mut current = Some(ty.clone());
        while let Some(ty) = current {
            if ty.is_native() {
                return Ok(Some(ty));
            }
            current = self.base_type(&ty)?;
        }
        Ok(None)
    }

    /// Field layout of `ty`
    ///
    /// # Errors
    /// Returns the resolution errors of the field types.
    pub fn layout(&self, ty: &TypeRc) -> Result<Arc<TypeLayout>> {
        if let Some(layout) = self.layouts.get(&ty.index()).map(|e| e.value().clone()) {
            return Ok(layout);
        }

        let mut layout = TypeLayout::default();
        match ty.kind() {
            TypeKind::Interpreted {
                module,
                module_id,
                token,
            } => {
                if let Some(base) = self.base_type(ty)? {
                    if base.is_interpreted() {
                        layout.instance.extend(self.layout(&base)?.instance.iter().cloned());
                    }
                }
                for field_token in module.field_tokens(*token)? {
                    let entry = module.field_def(*field_token)?;
                    let field_ty = self.resolve_type_sig(*module_id, &entry.def.sig, GenericContext::of_type(ty))?;
                    let is_static = entry.def.is_static;
                    let index = if is_static {
                        layout.statics.len()
                    } else {
                        layout.instance.len()
                    };
                    let handle = Arc::new(FieldHandle {
                        declaring: ty.clone(),
                        name: entry.def.name.clone(),
                        index,
                        is_static,
                        ty: field_ty,
                        native: None,
                    });
                    if is_static {
                        layout.statics.push(handle);
                    } else {
                        layout.instance.push(handle);
                    }
                }
            }
            TypeKind::Native(native) => {
                for field in &native.fields {
                    let field_ty = self.resolve_scoped(&field.ty, Some(&native.module))?;
                    let list = if field.is_static {
                        &mut layout.statics
                    } else {
                        &mut layout.instance
                    };
                    let index = list.len();
                    list.push(Arc::new(FieldHandle {
                        declaring: ty.clone(),
                        name: field.name.clone(),
                        index,
                        is_static: field.is_static,
                        ty: field_ty,
                        native: Some(field.clone()),
                    }));
                }
            }
            _ => {}
        }

        Ok(self
            .layouts
            .entry(ty.index())
            .or_insert(Arc::new(layout))
            .value()
            .clone())
    }

    /// Static field storage of `ty`, created with default values on first use
    ///
    /// # Errors
    /// Returns the resolution errors of the field layout.
    pub fn statics(&self, ty: &TypeRc) -> Result<Arc<StaticStorage>> {
        if let Some(storage) = self.statics.get(&ty.index()).map(|e| e.value().clone()) {
            return Ok(storage);
        }
        let layout = self.layout(ty)?;
        let values = layout
            .statics
            .iter()
            .map(|field| self.default_value(&field.ty))
            .collect::<Result<Vec<_>>>()?;
        Ok(self
            .statics
            .entry(ty.index())
            .or_insert(Arc::new(StaticStorage::new(values)))
            .value()
            .clone())
    }

    /// The value a freshly allocated location of type `ty` holds.
    ///
    /// Interpreted value types default to a boxed instance whose fields hold their defaults.
    ///
    /// # Errors
    /// Returns the resolution errors of nested field layouts.
    pub fn default_value(&self, ty: &TypeRc) -> Result<Value> {
        if let Some(primitive) = ty.primitive() {
            return Ok(match primitive {
                Primitive::Void => Value::Null,
                Primitive::Boolean => Value::Bool(false),
                Primitive::Int64 | Primitive::UInt64 => Value::I64(0),
                Primitive::Single => Value::F32(0.0),
                Primitive::Double => Value::F64(0.0),
                _ => Value::I32(0),
            });
        }
        if !ty.is_value_type() {
            return Ok(Value::Null);
        }

        match ty.kind() {
            TypeKind::Native(native) if native.kind == NativeKind::ValueType => {
                Ok(match &native.default_instance {
                    Some(factory) => {
                        Value::Object(ObjectRef::native(NativeObject::new(ty.clone(), factory())))
                    }
                    None => Value::Null,
                })
            }
            _ => {
                let layout = self.layout(ty)?;
                let fields = layout
                    .instance
                    .iter()
                    .map(|field| self.default_value(&field.ty))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Object(ObjectRef::instance(ty.clone(), fields)))
            }
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.by_index.count())
            .field("modules", &self.modules.count())
            .field("host", &self.host)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}
