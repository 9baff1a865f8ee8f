use std::{fmt, sync::Arc};

use crate::{engine::ObjectRef, Error, Result};

/// A value crossing the boundary between interpreted and host code.
///
/// Primitives travel by value; strings and objects by reference. Interpreted value types
/// appear as boxed [`ObjectRef`] instances whenever they leave the evaluation stack.
#[derive(Clone, Default)]
pub enum Value {
    /// Null object reference, also the result of void calls
    #[default]
    Null,
    /// `System.Boolean`
    Bool(bool),
    /// `System.Int32` and the narrower integers
    I32(i32),
    /// `System.Int64`
    I64(i64),
    /// `System.Single`
    F32(f32),
    /// `System.Double`
    F64(f64),
    /// `System.String`
    Str(Arc<str>),
    /// Any other reference, boxed value types included
    Object(ObjectRef),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "System.Boolean",
            Value::I32(_) => "System.Int32",
            Value::I64(_) => "System.Int64",
            Value::F32(_) => "System.Single",
            Value::F64(_) => "System.Double",
            Value::Str(_) => "System.String",
            Value::Object(_) => "object",
        }
    }

    fn mismatch(&self, to: &str) -> Error {
        Error::InvalidCast {
            from: self.kind().to_string(),
            to: to.to_string(),
        }
    }

    /// Returns true for the null reference
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The value as a 32-bit integer; booleans convert to 0 or 1
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for other kinds.
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            Value::I32(v) => Ok(*v),
            Value::Bool(v) => Ok(i32::from(*v)),
            _ => Err(self.mismatch("System.Int32")),
        }
    }

    /// The value as a 64-bit integer; 32-bit integers widen
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for other kinds.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::I64(v) => Ok(*v),
            Value::I32(v) => Ok(i64::from(*v)),
            _ => Err(self.mismatch("System.Int64")),
        }
    }

    /// The value as a 32-bit float
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for other kinds.
    pub fn as_f32(&self) -> Result<f32> {
        match self {
            Value::F32(v) => Ok(*v),
            _ => Err(self.mismatch("System.Single")),
        }
    }

    /// The value as a 64-bit float; 32-bit floats widen
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for other kinds.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::F64(v) => Ok(*v),
            Value::F32(v) => Ok(f64::from(*v)),
            _ => Err(self.mismatch("System.Double")),
        }
    }

    /// The value as a boolean; integers are true when non-zero
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for other kinds.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            Value::I32(v) => Ok(*v != 0),
            _ => Err(self.mismatch("System.Boolean")),
        }
    }

    /// The string, if this is one
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The object, if this is one
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Reference equality for objects, content equality for everything else
    #[must_use]
    pub fn ref_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => self == other,
        }
    }

    /// An independent copy if this is a boxed value type, otherwise the same reference
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if a field lock was poisoned.
    pub fn clone_if_value_type(&self) -> Result<Value> {
        match self {
            Value::Object(o) if o.ty().is_value_type() => Ok(Value::Object(o.deep_clone()?)),
            other => Ok(other.clone()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(v) => write!(f, "Bool({})", v),
            Value::I32(v) => write!(f, "I32({})", v),
            Value::I64(v) => write!(f, "I64({})", v),
            Value::F32(v) => write!(f, "F32({})", v),
            Value::F64(v) => write!(f, "F64({})", v),
            Value::Str(v) => write!(f, "Str({:?})", v),
            Value::Object(o) => write!(f, "Object({})", o.ty().name()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::F32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Value::Str(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Value::from(true).as_i32().unwrap(), 1);
        assert_eq!(Value::from(7).as_i64().unwrap(), 7);
        assert_eq!(Value::from(1.5f32).as_f64().unwrap(), 1.5);
        assert!(Value::from("x").as_i32().is_err());
        assert!(Value::from(0).as_bool().is_ok_and(|b| !b));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
    }

    #[test]
    fn equality_by_content() {
        assert_eq!(Value::from("a"), Value::from(String::from("a")));
        assert_ne!(Value::I32(1), Value::I64(1));
        assert!(Value::Null.ref_eq(&Value::Null));
    }
}
