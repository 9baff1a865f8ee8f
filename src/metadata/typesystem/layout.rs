use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, RwLock},
    thread::{self, ThreadId},
};

use crate::{
    engine::Value,
    metadata::typesystem::{NativeField, TypeRc},
    Error, Result,
};

/// A resolved field of a runtime type.
pub struct FieldHandle {
    /// Type that declares the field
    pub declaring: TypeRc,
    /// Field name
    pub name: String,
    /// Slot of the field: position in the instance layout, or in the static storage
    pub index: usize,
    /// Static field
    pub is_static: bool,
    /// Field type
    pub ty: TypeRc,
    /// Host description, for fields of native types
    pub native: Option<NativeField>,
}

/// A reference counted field handle
pub type FieldRc = Arc<FieldHandle>;

impl FieldHandle {
    /// `Type::name`, the key of field bindings
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}::{}", self.declaring.name(), self.name)
    }
}

impl fmt::Debug for FieldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldHandle")
            .field("declaring", &self.declaring.name())
            .field("name", &self.name)
            .field("index", &self.index)
            .field("is_static", &self.is_static)
            .field("ty", &self.ty.name())
            .finish()
    }
}

/// Field layout of a type.
///
/// Instance fields of interpreted types include the fields inherited from interpreted base
/// types, base type fields first, so a derived instance can be used wherever its base is
/// expected. Static fields only list the fields the type declares itself.
#[derive(Debug, Default)]
pub struct TypeLayout {
    /// Instance fields in slot order
    pub instance: Vec<FieldRc>,
    /// Static fields in storage order
    pub statics: Vec<FieldRc>,
}

impl TypeLayout {
    /// Number of instance field slots
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.instance.len()
    }

    /// Instance field by name, searching the most derived declaration first
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&FieldRc> {
        self.instance.iter().rev().find(|field| field.name == name)
    }

    /// Static field by name
    #[must_use]
    pub fn find_static(&self, name: &str) -> Option<&FieldRc> {
        self.statics.iter().find(|field| field.name == name)
    }
}

/// Progress of a type initializer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Uninitialized,
    /// Running on the given thread
    Running(ThreadId),
    Initialized,
}

/// Answer of [`StaticStorage::begin_initialization`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InitClaim {
    /// The caller owns the initializer and must call `finish_initialization`
    Run,
    /// The initializer completed, or is running further up the calling thread
    Ready,
}

/// Storage of the static fields of one type plus the state of its type initializer.
#[derive(Debug)]
pub struct StaticStorage {
    values: RwLock<Vec<Value>>,
    state: Mutex<InitState>,
    finished: Condvar,
}

impl StaticStorage {
    pub(crate) fn new(values: Vec<Value>) -> Self {
        StaticStorage {
            values: RwLock::new(values),
            state: Mutex::new(InitState::Uninitialized),
            finished: Condvar::new(),
        }
    }

    /// Value of the static field in slot `index`
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for slots out of range.
    pub fn get(&self, index: usize) -> Result<Value> {
        let values = read_lock!(self.values);
        values
            .get(index)
            .cloned()
            .ok_or_else(|| Error::InvalidStackState(format!("static slot {} out of range", index)))
    }

    /// Replaces the static field in slot `index`
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for slots out of range.
    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        let mut values = write_lock!(self.values);
        match values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::InvalidStackState(format!(
                "static slot {} out of range",
                index
            ))),
        }
    }

    /// Claims the type initializer for the calling thread.
    ///
    /// Exactly one thread gets [`InitClaim::Run`]. Other threads block until that thread
    /// calls [`StaticStorage::finish_initialization`]; a re-entrant access from the owning
    /// thread gets [`InitClaim::Ready`] right away and sees the statics as they are.
    pub(crate) fn begin_initialization(&self) -> Result<InitClaim> {
        let current = thread::current().id();
        let mut state = lock!(self.state);
        loop {
            match *state {
                InitState::Uninitialized => {
                    *state = InitState::Running(current);
                    return Ok(InitClaim::Run);
                }
                InitState::Initialized => return Ok(InitClaim::Ready),
                InitState::Running(owner) if owner == current => return Ok(InitClaim::Ready),
                InitState::Running(_) => {
                    state = self.finished.wait(state).map_err(|_| Error::LockError)?;
                }
            }
        }
    }

    pub(crate) fn finish_initialization(&self) -> Result<()> {
        *lock!(self.state) = InitState::Initialized;
        self.finished.notify_all();
        Ok(())
    }

    /// Returns true once the type initializer has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .map(|state| *state == InitState::Initialized)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statics_are_claimed_once() {
        let storage = StaticStorage::new(vec![Value::I32(0), Value::Null]);
        assert_eq!(storage.begin_initialization().unwrap(), InitClaim::Run);
        // re-entrant access on the owning thread
        assert_eq!(storage.begin_initialization().unwrap(), InitClaim::Ready);
        assert!(!storage.is_initialized());
        storage.finish_initialization().unwrap();
        assert!(storage.is_initialized());

        storage.set(1, Value::I32(5)).unwrap();
        assert_eq!(storage.get(1).unwrap(), Value::I32(5));
        assert!(storage.get(2).is_err());
    }

    #[test]
    fn other_threads_wait_for_the_initializer() {
        let storage = Arc::new(StaticStorage::new(vec![Value::I32(0)]));
        assert_eq!(storage.begin_initialization().unwrap(), InitClaim::Run);

        let waiter = {
            let storage = storage.clone();
            thread::spawn(move || {
                let claim = storage.begin_initialization().unwrap();
                (claim, storage.get(0).unwrap())
            })
        };
        thread::sleep(std::time::Duration::from_millis(20));
        storage.set(0, Value::I32(10)).unwrap();
        storage.finish_initialization().unwrap();

        let (claim, seen) = waiter.join().unwrap();
        assert_eq!(claim, InitClaim::Ready);
        assert_eq!(seen, Value::I32(10));
    }
}
