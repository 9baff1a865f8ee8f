//! Cross-domain inheritance adaptors.
//!
//! An interpreted class may derive from a native base type. Native code that holds such an
//! object only knows the base type, so virtual calls it makes have to be routed back into the
//! interpreted overrides. A [`CrossDomainAdaptor`] registered for the base type creates a host
//! side wrapper around every new interpreted instance; the wrapper calls interpreted methods by
//! name through an [`AdaptorInstance`], which resolves each member once and remembers the
//! answer for that instance only.

use std::{
    any::Any,
    fmt,
    sync::{Arc, Weak},
};

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    domain::{Domain, WeakDomain},
    engine::{HeapObject, ObjectRef, Value},
    metadata::{method::MethodRc, typesystem::NativeType},
    Error, Result,
};

/// Factory for host side wrappers of interpreted subclasses of native types.
pub trait CrossDomainAdaptor: Send + Sync {
    /// Full names of the native base types (or interfaces) this adaptor covers
    fn base_types(&self) -> &[String];

    /// The native type standing in for the interpreted subclass during method lookup
    fn adaptor_type(&self) -> Arc<NativeType>;

    /// Creates the wrapper of a newly constructed interpreted instance
    ///
    /// # Errors
    /// Implementations may fail construction with any error.
    fn create_instance(&self, instance: AdaptorInstance) -> Result<Arc<dyn Any + Send + Sync>>;
}

/// Registered adaptors keyed by native base type name.
#[derive(Default)]
pub struct AdaptorRegistry {
    adaptors: DashMap<String, Arc<dyn CrossDomainAdaptor>>,
}

impl AdaptorRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adaptor` for every base type it names.
    ///
    /// # Errors
    /// Returns [`Error::AdaptorAlreadyRegistered`] if any of the base types already has an
    /// adaptor; nothing is registered in that case.
    pub fn register(&self, adaptor: Arc<dyn CrossDomainAdaptor>) -> Result<()> {
        for base in adaptor.base_types() {
            if self.adaptors.contains_key(base) {
                return Err(Error::AdaptorAlreadyRegistered(base.clone()));
            }
        }
        for base in adaptor.base_types() {
            match self.adaptors.entry(base.clone()) {
                Entry::Occupied(_) => return Err(Error::AdaptorAlreadyRegistered(base.clone())),
                Entry::Vacant(slot) => {
                    slot.insert(adaptor.clone());
                }
            }
        }
        tracing::debug!(base_types = ?adaptor.base_types(), "registered cross-domain adaptor");
        Ok(())
    }

    /// The adaptor covering the native type named `base`
    #[must_use]
    pub fn find(&self, base: &str) -> Option<Arc<dyn CrossDomainAdaptor>> {
        self.adaptors.get(base).map(|entry| entry.value().clone())
    }

    /// Number of covered base types
    #[must_use]
    pub fn len(&self) -> usize {
        self.adaptors.len()
    }

    /// Returns true if no adaptor is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adaptors.is_empty()
    }
}

impl fmt::Debug for AdaptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bases: Vec<String> = self.adaptors.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("AdaptorRegistry").field("bases", &bases).finish()
    }
}

/// Calls into the interpreted part of one adapted object.
///
/// Holds the object and its domain weakly; the object owns its wrapper, which owns this
/// handle, and the domain may own the object through a static field.
pub struct AdaptorInstance {
    domain: WeakDomain,
    instance: Weak<HeapObject>,
    members: DashMap<(String, usize), Option<MethodRc>>,
}

impl AdaptorInstance {
    pub(crate) fn new(domain: &Domain, instance: &ObjectRef) -> Self {
        AdaptorInstance {
            domain: domain.downgrade(),
            instance: instance.downgrade(),
            members: DashMap::new(),
        }
    }

    /// The domain the instance lives in
    ///
    /// # Errors
    /// Returns [`Error::DomainDropped`] if the domain is gone.
    pub fn domain(&self) -> Result<Domain> {
        self.domain.upgrade()
    }

    /// The adapted interpreted object
    ///
    /// # Errors
    /// Returns [`Error::NullReceiver`] if the object has been dropped.
    pub fn instance(&self) -> Result<ObjectRef> {
        self.instance
            .upgrade()
            .map(ObjectRef::from_arc)
            .ok_or_else(|| Error::NullReceiver("adapted instance".to_string()))
    }

    /// The interpreted implementation of `name` taking `arg_count` arguments, if the
    /// interpreted part of the object's type chain declares one
    ///
    /// # Errors
    /// Returns the resolution errors of the type chain.
    pub fn find(&self, name: &str, arg_count: usize) -> Result<Option<MethodRc>> {
        let key = (name.to_string(), arg_count);
        if let Some(found) = self.members.get(&key).map(|e| e.value().clone()) {
            return Ok(found);
        }

        let domain = self.domain()?;
        let registry = domain.registry();
        let mut found = None;
        let mut current = Some(self.instance()?.ty().clone());
        while let Some(ty) = current {
            if !ty.is_interpreted() {
                break;
            }
            if let Some(method) = registry
                .methods(&ty)?
                .iter()
                .find(|m| m.name == name && m.params.len() == arg_count && m.has_this() && !m.is_abstract())
            {
                found = Some(method.clone());
                break;
            }
            current = registry.base_type(&ty)?;
        }

        Ok(self.members.entry(key).or_insert(found).value().clone())
    }

    /// Returns true if the interpreted subclass implements `name`
    ///
    /// # Errors
    /// Returns the resolution errors of the type chain.
    pub fn is_overridden(&self, name: &str, arg_count: usize) -> Result<bool> {
        Ok(self.find(name, arg_count)?.is_some())
    }

    /// Invokes the interpreted implementation of `name` with `args`
    ///
    /// # Errors
    /// Returns [`Error::MethodNotFound`] if the interpreted part does not implement it, and the
    /// errors of the invocation.
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Option<Value>> {
        let instance = self.instance()?;
        match self.find(name, args.len())? {
            Some(method) => self.domain()?.invoke(&method, Some(Value::Object(instance)), args),
            None => Err(Error::MethodNotFound {
                method: name.to_string(),
                declaring_type: instance.ty().name().to_string(),
                token: None,
            }),
        }
    }
}

impl fmt::Debug for AdaptorInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptorInstance")
            .field("alive", &(self.instance.strong_count() > 0))
            .field("members", &self.members.len())
            .finish()
    }
}
