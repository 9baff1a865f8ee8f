//! Heap objects.
//!
//! Objects are reference counted and shared between the managed tables of every interpreter
//! that holds them; their lifetime is that of the last [`ObjectRef`]. Interpreted instances
//! and arrays store their contents as [`Value`]s behind a lock, native objects store the host's
//! boxed data.

use std::{
    any::Any,
    fmt,
    sync::{Arc, OnceLock, RwLock, Weak},
};

use crate::{
    engine::Value,
    metadata::typesystem::{NativeData, TypeKind, TypeRc},
    Error, Result,
};

/// An instance of an interpreted type.
pub struct InstanceObject {
    ty: TypeRc,
    fields: RwLock<Vec<Value>>,
    adaptor: OnceLock<Arc<dyn Any + Send + Sync>>,
}

/// A single dimensional array.
pub struct ArrayObject {
    ty: TypeRc,
    items: RwLock<Vec<Value>>,
}

/// An object whose data lives on the host side.
pub struct NativeObject {
    ty: TypeRc,
    data: RwLock<NativeData>,
}

impl NativeObject {
    /// Wraps host data as an object of the native type `ty`
    #[must_use]
    pub fn new(ty: TypeRc, data: NativeData) -> Self {
        NativeObject {
            ty,
            data: RwLock::new(data),
        }
    }

    /// Type of the object
    #[must_use]
    pub fn ty(&self) -> &TypeRc {
        &self.ty
    }
}

/// The storage of one heap object.
pub enum HeapObject {
    /// Interpreted instance, boxed interpreted value types included
    Instance(InstanceObject),
    /// Array
    Array(ArrayObject),
    /// Native object
    Native(NativeObject),
}

/// A shared reference to a heap object.
#[derive(Clone)]
pub struct ObjectRef(Arc<HeapObject>);

fn not_an_instance(ty: &TypeRc, what: &str) -> Error {
    Error::InvalidStackState(format!("{} is not {}", ty.name(), what))
}

impl ObjectRef {
    /// A new interpreted instance of `ty` holding `fields`
    #[must_use]
    pub fn instance(ty: TypeRc, fields: Vec<Value>) -> Self {
        ObjectRef(Arc::new(HeapObject::Instance(InstanceObject {
            ty,
            fields: RwLock::new(fields),
            adaptor: OnceLock::new(),
        })))
    }

    /// A new array of type `ty` holding `items`
    #[must_use]
    pub fn array(ty: TypeRc, items: Vec<Value>) -> Self {
        ObjectRef(Arc::new(HeapObject::Array(ArrayObject {
            ty,
            items: RwLock::new(items),
        })))
    }

    /// Wraps a native object
    #[must_use]
    pub fn native(object: NativeObject) -> Self {
        ObjectRef(Arc::new(HeapObject::Native(object)))
    }

    pub(crate) fn from_arc(inner: Arc<HeapObject>) -> Self {
        ObjectRef(inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<HeapObject> {
        Arc::downgrade(&self.0)
    }

    /// The storage
    #[must_use]
    pub fn heap(&self) -> &HeapObject {
        &self.0
    }

    /// Runtime type of the object
    #[must_use]
    pub fn ty(&self) -> &TypeRc {
        match &*self.0 {
            HeapObject::Instance(instance) => &instance.ty,
            HeapObject::Array(array) => &array.ty,
            HeapObject::Native(native) => &native.ty,
        }
    }

    /// Returns true if both refer to the same object
    #[must_use]
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Instance field in slot `index`
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for non-instances and slots out of range.
    pub fn field(&self, index: usize) -> Result<Value> {
        let HeapObject::Instance(instance) = &*self.0 else {
            return Err(not_an_instance(self.ty(), "an interpreted instance"));
        };
        read_lock!(instance.fields)
            .get(index)
            .cloned()
            .ok_or_else(|| Error::InvalidStackState(format!("field slot {} out of range", index)))
    }

    /// Replaces the instance field in slot `index`
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for non-instances and slots out of range.
    pub fn set_field(&self, index: usize, value: Value) -> Result<()> {
        let HeapObject::Instance(instance) = &*self.0 else {
            return Err(not_an_instance(self.ty(), "an interpreted instance"));
        };
        let mut fields = write_lock!(instance.fields);
        let slot = fields
            .get_mut(index)
            .ok_or_else(|| Error::InvalidStackState(format!("field slot {} out of range", index)))?;
        *slot = value;
        Ok(())
    }

    /// Copy of all instance fields
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for non-instances.
    pub fn fields(&self) -> Result<Vec<Value>> {
        let HeapObject::Instance(instance) = &*self.0 else {
            return Err(not_an_instance(self.ty(), "an interpreted instance"));
        };
        Ok(read_lock!(instance.fields).clone())
    }

    /// Number of array elements
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for non-arrays.
    pub fn len(&self) -> Result<usize> {
        let HeapObject::Array(array) = &*self.0 else {
            return Err(not_an_instance(self.ty(), "an array"));
        };
        Ok(read_lock!(array.items).len())
    }

    /// Array element at `index`; `None` when out of range
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for non-arrays.
    pub fn element(&self, index: usize) -> Result<Option<Value>> {
        let HeapObject::Array(array) = &*self.0 else {
            return Err(not_an_instance(self.ty(), "an array"));
        };
        Ok(read_lock!(array.items).get(index).cloned())
    }

    /// Replaces the array element at `index`; returns false when out of range
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for non-arrays.
    pub fn set_element(&self, index: usize, value: Value) -> Result<bool> {
        let HeapObject::Array(array) = &*self.0 else {
            return Err(not_an_instance(self.ty(), "an array"));
        };
        let mut items = write_lock!(array.items);
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs `f` on the host data if this is a native object backed by `T`
    pub fn with_native<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let HeapObject::Native(native) = &*self.0 else {
            return None;
        };
        let data = native.data.read().ok()?;
        data.downcast_ref::<T>().map(f)
    }

    /// Runs `f` on the untyped host data of a native object
    pub fn with_native_any<R>(&self, f: impl FnOnce(&(dyn Any + Send + Sync)) -> R) -> Option<R> {
        let HeapObject::Native(native) = &*self.0 else {
            return None;
        };
        let data = native.data.read().ok()?;
        Some(f(data.as_ref()))
    }

    /// Runs `f` on the mutable host data if this is a native object backed by `T`
    pub fn with_native_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let HeapObject::Native(native) = &*self.0 else {
            return None;
        };
        let mut data = native.data.write().ok()?;
        data.downcast_mut::<T>().map(f)
    }

    /// Attaches the cross-domain wrapper of an interpreted instance; only the first call counts
    pub(crate) fn set_adaptor(&self, adaptor: Arc<dyn Any + Send + Sync>) -> bool {
        match &*self.0 {
            HeapObject::Instance(instance) => instance.adaptor.set(adaptor).is_ok(),
            _ => false,
        }
    }

    /// The cross-domain wrapper of an interpreted instance deriving from a native type
    #[must_use]
    pub fn adaptor<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let HeapObject::Instance(instance) = &*self.0 else {
            return None;
        };
        instance.adaptor.get()?.clone().downcast::<T>().ok()
    }

    /// Member-wise copy of a boxed value type; references of other objects are shared.
    ///
    /// Native value types without a clone function, and everything that is not a value type,
    /// return the same reference.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if a lock was poisoned.
    pub fn deep_clone(&self) -> Result<ObjectRef> {
        if !self.ty().is_value_type() {
            return Ok(self.clone());
        }
        match &*self.0 {
            HeapObject::Instance(instance) => {
                let fields = read_lock!(instance.fields)
                    .iter()
                    .map(Value::clone_if_value_type)
                    .collect::<Result<Vec<_>>>()?;
                Ok(ObjectRef::instance(instance.ty.clone(), fields))
            }
            HeapObject::Native(native) => {
                let TypeKind::Native(description) = native.ty.kind() else {
                    return Ok(self.clone());
                };
                let Some(cloner) = &description.cloner else {
                    return Ok(self.clone());
                };
                let data = read_lock!(native.data);
                match cloner(data.as_ref()) {
                    Some(copy) => Ok(ObjectRef::native(NativeObject::new(native.ty.clone(), copy))),
                    None => Ok(self.clone()),
                }
            }
            HeapObject::Array(_) => Ok(self.clone()),
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            HeapObject::Instance(instance) => {
                let mut s = f.debug_struct(instance.ty.name());
                if let Ok(fields) = instance.fields.try_read() {
                    s.field("fields", &*fields);
                }
                s.finish()
            }
            HeapObject::Array(array) => {
                let mut s = f.debug_struct(array.ty.name());
                if let Ok(items) = array.items.try_read() {
                    s.field("items", &*items);
                }
                s.finish()
            }
            HeapObject::Native(native) => f.debug_struct(native.ty.name()).finish_non_exhaustive(),
        }
    }
}
