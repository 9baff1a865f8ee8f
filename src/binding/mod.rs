//! Binding tables between interpreted code and host code.
//!
//! These registries let the host replace reflection with hand written fast paths:
//!
//! - **Method redirections** keyed by `Type::Name(Param,..)`, called with a [`NativeFrame`]
//!   that reads arguments straight from the evaluation stack
//! - **Field bindings** keyed by `Type::field`: a copy-to-stack and an assign-from-stack
//!   delegate that work on the evaluation stack through a [`FieldAccess`]. They take
//!   precedence over the getters and setters.
//! - **Field getters** and **field setters** keyed by `Type::field`, exchanging host values
//! - **Array factories** keyed by the element type name, which create the elements of new
//!   arrays of native types
//! - **Value-type binders** keyed by the full type name, which marshal a native value type to
//!   and from inline stack storage (see [`ValueTypeBinder`])
//!
//! The tables live in two phases. While *building*, every access takes one mutex; a
//! registration for a key that is already bound is ignored, so the first registration wins.
//! [`BindingTables::freeze`] moves the contents into an immutable snapshot published through a
//! `OnceLock`; from then on reads are lock-free and registrations fail with
//! [`Error::BindingsFrozen`].
//!
//! Population can run on a worker thread through [`BindingTables::initialize`]; the tables are
//! frozen as soon as the registration closure returns.
//!
//! Cross-domain adaptors are kept in a separate [`AdaptorRegistry`] owned by the type registry,
//! because method resolution consults them.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use dotrun::binding::{method_key, BindingTables};
//!
//! let tables = Arc::new(BindingTables::new());
//! let job = tables.initialize(false, |tables| {
//!     tables.register_redirect(method_key("Host.Math", "Twice", &["System.Int32"]), |frame| {
//!         let value = frame.arg_i32(0)?;
//!         frame.set_result(value * 2);
//!         Ok(())
//!     })?;
//!     Ok(())
//! })?;
//! job.wait()?;
//! assert!(tables.is_frozen());
//! # Ok::<(), dotrun::Error>(())
//! ```

mod adaptor;
mod valuetype;

pub use adaptor::{AdaptorInstance, AdaptorRegistry, CrossDomainAdaptor};
pub use valuetype::ValueTypeBinder;

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, OnceLock},
    thread::{self, JoinHandle},
};

use crate::{
    engine::{FieldAccess, NativeFrame, Value},
    Error, Result,
};

/// A hand written replacement for a reflection call
pub type RedirectFn = Arc<dyn Fn(&mut NativeFrame<'_>) -> Result<()> + Send + Sync>;

/// Reads a native field; receives the receiver for instance fields
pub type FieldGetter = Arc<dyn Fn(Option<&Value>) -> Result<Value> + Send + Sync>;

/// Writes a native field; receives the receiver for instance fields
pub type FieldSetter = Arc<dyn Fn(Option<&Value>, Value) -> Result<()> + Send + Sync>;

/// Pushes the value of a bound field, or reads the value stored to it
pub type FieldStackFn = Arc<dyn Fn(&mut FieldAccess<'_>) -> Result<()> + Send + Sync>;

/// Creates the elements of a new array of the given length
pub type ArrayFactory = Arc<dyn Fn(usize) -> Result<Vec<Value>> + Send + Sync>;

/// The stack level delegates of one native field.
#[derive(Clone)]
pub struct FieldBinding {
    /// Serves `ldfld`/`ldsfld`; must push exactly one value
    pub copy_to_stack: FieldStackFn,
    /// Serves `stfld`/`stsfld`; the value is on top of the stack
    pub assign_from_stack: FieldStackFn,
}

/// Builds the redirection key of a method, `Type::Name(Param,..)`
#[must_use]
pub fn method_key(type_name: &str, method: &str, params: &[&str]) -> String {
    format!("{}::{}({})", type_name, method, params.join(","))
}

/// Builds the binding key of a field, `Type::field`
#[must_use]
pub fn field_key(type_name: &str, field: &str) -> String {
    format!("{}::{}", type_name, field)
}

#[derive(Default)]
struct BindingSet {
    redirects: HashMap<String, RedirectFn>,
    field_bindings: HashMap<String, FieldBinding>,
    field_getters: HashMap<String, FieldGetter>,
    field_setters: HashMap<String, FieldSetter>,
    value_binders: HashMap<String, Arc<dyn ValueTypeBinder>>,
    array_factories: HashMap<String, ArrayFactory>,
}

/// The binding registries of a domain.
pub struct BindingTables {
    building: Mutex<BindingSet>,
    frozen: OnceLock<Arc<BindingSet>>,
}

impl BindingTables {
    /// Empty tables in the building phase
    #[must_use]
    pub fn new() -> Self {
        BindingTables {
            building: Mutex::new(BindingSet::default()),
            frozen: OnceLock::new(),
        }
    }

    /// Returns true once the tables no longer accept registrations
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    fn register<T>(&self, key: String, value: T, table: fn(&mut BindingSet) -> &mut HashMap<String, T>) -> Result<bool> {
        let mut set = lock!(self.building);
        if self.is_frozen() {
            return Err(Error::BindingsFrozen);
        }
        let entries = table(&mut set);
        if entries.contains_key(&key) {
            return Ok(false);
        }
        entries.insert(key, value);
        Ok(true)
    }

    fn read<T: Clone>(&self, key: &str, table: fn(&BindingSet) -> &HashMap<String, T>) -> Result<Option<T>> {
        if let Some(frozen) = self.frozen.get() {
            return Ok(table(frozen).get(key).cloned());
        }
        let set = lock!(self.building);
        // freeze() may have moved the contents while this thread waited for the lock
        match self.frozen.get() {
            Some(frozen) => Ok(table(frozen).get(key).cloned()),
            None => Ok(table(&set).get(key).cloned()),
        }
    }

    /// Registers a method redirection; returns false if `key` was already bound
    ///
    /// # Errors
    /// Returns [`Error::BindingsFrozen`] after [`BindingTables::freeze`].
    pub fn register_redirect<F>(&self, key: impl Into<String>, redirect: F) -> Result<bool>
    where
        F: Fn(&mut NativeFrame<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register(key.into(), Arc::new(redirect) as RedirectFn, |set| &mut set.redirects)
    }

    /// Registers the copy-to-stack and assign-from-stack delegates of a field; returns false
    /// if `key` was already bound
    ///
    /// # Errors
    /// Returns [`Error::BindingsFrozen`] after [`BindingTables::freeze`].
    pub fn register_field_binding<C, A>(&self, key: impl Into<String>, copy_to_stack: C, assign_from_stack: A) -> Result<bool>
    where
        C: Fn(&mut FieldAccess<'_>) -> Result<()> + Send + Sync + 'static,
        A: Fn(&mut FieldAccess<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let binding = FieldBinding {
            copy_to_stack: Arc::new(copy_to_stack),
            assign_from_stack: Arc::new(assign_from_stack),
        };
        self.register(key.into(), binding, |set| &mut set.field_bindings)
    }

    /// Registers a field getter; returns false if `key` was already bound
    ///
    /// # Errors
    /// Returns [`Error::BindingsFrozen`] after [`BindingTables::freeze`].
    pub fn register_field_getter<F>(&self, key: impl Into<String>, getter: F) -> Result<bool>
    where
        F: Fn(Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(key.into(), Arc::new(getter) as FieldGetter, |set| &mut set.field_getters)
    }

    /// Registers a field setter; returns false if `key` was already bound
    ///
    /// # Errors
    /// Returns [`Error::BindingsFrozen`] after [`BindingTables::freeze`].
    pub fn register_field_setter<F>(&self, key: impl Into<String>, setter: F) -> Result<bool>
    where
        F: Fn(Option<&Value>, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.register(key.into(), Arc::new(setter) as FieldSetter, |set| &mut set.field_setters)
    }

    /// Registers the element factory for arrays of the native type `element`; returns false
    /// if the type already has one
    ///
    /// # Errors
    /// Returns [`Error::BindingsFrozen`] after [`BindingTables::freeze`].
    pub fn register_array_factory<F>(&self, element: impl Into<String>, factory: F) -> Result<bool>
    where
        F: Fn(usize) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        self.register(element.into(), Arc::new(factory) as ArrayFactory, |set| &mut set.array_factories)
    }

    /// Registers a value-type binder under its type name and lets it add its redirections;
    /// returns false if the type already has a binder
    ///
    /// # Errors
    /// Returns [`Error::BindingsFrozen`] after [`BindingTables::freeze`], and the errors of
    /// [`ValueTypeBinder::register_redirections`].
    pub fn register_value_binder(&self, binder: Arc<dyn ValueTypeBinder>) -> Result<bool> {
        let key = binder.type_name().to_string();
        let added = self.register(key, binder.clone(), |set| &mut set.value_binders)?;
        if added {
            binder.register_redirections(self)?;
        }
        Ok(added)
    }

    /// The redirection bound to `key`
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if a registering thread panicked.
    pub fn redirect(&self, key: &str) -> Result<Option<RedirectFn>> {
        self.read(key, |set| &set.redirects)
    }

    /// The stack level delegates bound to `key`
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if a registering thread panicked.
    pub fn field_binding(&self, key: &str) -> Result<Option<FieldBinding>> {
        self.read(key, |set| &set.field_bindings)
    }

    /// The field getter bound to `key`
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if a registering thread panicked.
    pub fn field_getter(&self, key: &str) -> Result<Option<FieldGetter>> {
        self.read(key, |set| &set.field_getters)
    }

    /// The field setter bound to `key`
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if a registering thread panicked.
    pub fn field_setter(&self, key: &str) -> Result<Option<FieldSetter>> {
        self.read(key, |set| &set.field_setters)
    }

    /// The element factory for arrays of `element`
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if a registering thread panicked.
    pub fn array_factory(&self, element: &str) -> Result<Option<ArrayFactory>> {
        self.read(element, |set| &set.array_factories)
    }

    /// The value-type binder of the type named `type_name`
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if a registering thread panicked.
    pub fn value_binder(&self, type_name: &str) -> Result<Option<Arc<dyn ValueTypeBinder>>> {
        self.read(type_name, |set| &set.value_binders)
    }

    /// Ends the building phase. Later calls do nothing.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if a registering thread panicked.
    pub fn freeze(&self) -> Result<()> {
        let mut set = lock!(self.building);
        if self.is_frozen() {
            return Ok(());
        }
        let snapshot = std::mem::take(&mut *set);
        tracing::debug!(
            redirects = snapshot.redirects.len(),
            field_bindings = snapshot.field_bindings.len(),
            field_getters = snapshot.field_getters.len(),
            field_setters = snapshot.field_setters.len(),
            value_binders = snapshot.value_binders.len(),
            array_factories = snapshot.array_factories.len(),
            "binding tables frozen"
        );
        let _ = self.frozen.set(Arc::new(snapshot));
        Ok(())
    }

    /// Runs `init` against the tables and freezes them afterwards, even if `init` fails.
    ///
    /// With `threaded` the closure runs on a thread named `binding-thread` and the returned job
    /// must be waited on to observe its result; reads issued in the meantime are serialized with
    /// the registrations. Calling this on frozen tables does nothing.
    ///
    /// # Errors
    /// Returns [`Error::BindingThread`] if the worker thread cannot be spawned.
    pub fn initialize<F>(self: &Arc<Self>, threaded: bool, init: F) -> Result<BindingJob>
    where
        F: FnOnce(&BindingTables) -> Result<()> + Send + 'static,
    {
        if self.is_frozen() {
            return Ok(BindingJob {
                state: JobState::Done(Ok(())),
            });
        }

        if threaded {
            let tables = Arc::clone(self);
            let handle = thread::Builder::new()
                .name("binding-thread".to_string())
                .spawn(move || {
                    let result = init(&tables);
                    let frozen = tables.freeze();
                    result.and(frozen)
                })
                .map_err(|e| Error::BindingThread(e.to_string()))?;
            Ok(BindingJob {
                state: JobState::Running(handle),
            })
        } else {
            let result = init(self);
            let frozen = self.freeze();
            Ok(BindingJob {
                state: JobState::Done(result.and(frozen)),
            })
        }
    }
}

impl Default for BindingTables {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BindingTables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingTables")
            .field("frozen", &self.is_frozen())
            .finish_non_exhaustive()
    }
}

enum JobState {
    Running(JoinHandle<Result<()>>),
    Done(Result<()>),
}

/// Handle of a binding initialization.
pub struct BindingJob {
    state: JobState,
}

impl BindingJob {
    /// Returns true once the registration closure has returned
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.state {
            JobState::Running(handle) => handle.is_finished(),
            JobState::Done(_) => true,
        }
    }

    /// Blocks until the tables are frozen and returns the result of the registration closure
    ///
    /// # Errors
    /// Returns the error of the registration closure, or [`Error::BindingThread`] if the worker
    /// thread panicked.
    pub fn wait(self) -> Result<()> {
        match self.state {
            JobState::Running(handle) => handle
                .join()
                .map_err(|_| Error::BindingThread("registration panicked".to_string()))?,
            JobState::Done(result) => result,
        }
    }
}

impl fmt::Debug for BindingJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingJob")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registration_wins() {
        let tables = BindingTables::new();
        assert!(tables.register_field_getter("Host.Config::Level", |_| Ok(Value::I32(1))).unwrap());
        assert!(!tables.register_field_getter("Host.Config::Level", |_| Ok(Value::I32(2))).unwrap());

        let getter = tables.field_getter("Host.Config::Level").unwrap().unwrap();
        assert_eq!(getter(None).unwrap(), Value::I32(1));
        assert!(tables.field_setter("Host.Config::Level").unwrap().is_none());
    }

    #[test]
    fn frozen_tables_reject_registration() {
        let tables = BindingTables::new();
        tables.register_field_setter("Host.Config::Level", |_, _| Ok(())).unwrap();
        tables.freeze().unwrap();
        tables.freeze().unwrap();

        assert!(tables.is_frozen());
        assert!(tables.field_setter("Host.Config::Level").unwrap().is_some());
        assert!(matches!(
            tables.register_field_getter("Host.Config::Other", |_| Ok(Value::Null)),
            Err(Error::BindingsFrozen)
        ));
    }

    #[test]
    fn threaded_initialization_freezes() {
        let tables = Arc::new(BindingTables::new());
        let job = tables
            .initialize(true, |tables| {
                assert_eq!(thread::current().name(), Some("binding-thread"));
                tables.register_field_getter("Host.A::x", |_| Ok(Value::I32(3)))?;
                Ok(())
            })
            .unwrap();
        job.wait().unwrap();

        assert!(tables.is_frozen());
        assert!(tables.field_getter("Host.A::x").unwrap().is_some());

        let again = tables.initialize(true, |_| panic!("must not run")).unwrap();
        assert!(again.is_finished());
        again.wait().unwrap();
    }

    #[test]
    fn failed_initialization_still_freezes() {
        let tables = Arc::new(BindingTables::new());
        let job = tables
            .initialize(false, |_| Err(Error::TypeNotFound("Host.Missing".to_string())))
            .unwrap();
        assert!(matches!(job.wait(), Err(Error::TypeNotFound(_))));
        assert!(tables.is_frozen());
    }

    #[test]
    fn array_factories_register_once() {
        let tables = BindingTables::new();
        assert!(tables
            .register_array_factory("Host.Point", |len| Ok(vec![Value::I32(1); len]))
            .unwrap());
        assert!(!tables
            .register_array_factory("Host.Point", |len| Ok(vec![Value::Null; len]))
            .unwrap());
        let factory = tables.array_factory("Host.Point").unwrap().unwrap();
        assert_eq!(factory(2).unwrap(), vec![Value::I32(1), Value::I32(1)]);
        assert!(tables.array_factory("Host.Other").unwrap().is_none());
    }

    #[test]
    fn keys() {
        assert_eq!(
            method_key("Host.Math", "Add", &["System.Int32", "System.Int32"]),
            "Host.Math::Add(System.Int32,System.Int32)"
        );
        assert_eq!(method_key("Host.Math", "Now", &[]), "Host.Math::Now()");
        assert_eq!(field_key("Host.Config", "Level"), "Host.Config::Level");
    }
}
