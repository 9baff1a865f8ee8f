use crate::{metadata::typesystem::TypeIndex, Error, Result};

/// One cell of an evaluation stack.
///
/// A slot never owns heap memory. Object carrying slots hold an index into the interpreter's
/// managed table; references to fields, elements, statics and other stack cells are recorded
/// as plain descriptors and resolved when they are dereferenced, so they observe every write
/// made to the referenced location in the meantime.
///
/// Inline value types are blocks in the value-type region of the stack: a
/// [`StackSlot::ValueTypeDescriptor`] at address `d` followed by its fields at `d - 1`,
/// `d - 2`, .. A slot elsewhere on the stack points at such a block with
/// [`StackSlot::ValueType`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StackSlot {
    /// Null object reference
    Null,
    /// 32-bit integer, also booleans, chars and the narrower integers
    Int32(i32),
    /// 64-bit integer
    Int64(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// Index into the managed table
    Object(u32),
    /// Address of an instance field of the object at a managed index
    FieldRef {
        /// Managed index of the object
        object: u32,
        /// Field slot
        field: u32,
    },
    /// Address of an element of the array at a managed index
    ArrayRef {
        /// Managed index of the array
        array: u32,
        /// Element index
        index: u32,
    },
    /// Address of a static field
    StaticFieldRef {
        /// Registry index of the declaring type
        type_index: TypeIndex,
        /// Static slot
        field: u32,
    },
    /// Address of another stack cell
    StackRef(u32),
    /// An inline value type; the address of its descriptor
    ValueType(u32),
    /// Header of an inline value type block
    ValueTypeDescriptor {
        /// Registry index of the value type
        type_index: TypeIndex,
        /// Number of field slots that follow
        field_count: u32,
    },
}

impl StackSlot {
    /// Name of the slot kind, for diagnostics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StackSlot::Null => "null",
            StackSlot::Int32(_) => "int32",
            StackSlot::Int64(_) => "int64",
            StackSlot::Float(_) => "float",
            StackSlot::Double(_) => "double",
            StackSlot::Object(_) => "object",
            StackSlot::FieldRef { .. } => "field reference",
            StackSlot::ArrayRef { .. } => "element reference",
            StackSlot::StaticFieldRef { .. } => "static field reference",
            StackSlot::StackRef(_) => "stack reference",
            StackSlot::ValueType(_) => "value type",
            StackSlot::ValueTypeDescriptor { .. } => "value type descriptor",
        }
    }

    fn expected(&self, kind: &str) -> Error {
        Error::InvalidStackState(format!("expected {}, found {}", kind, self.kind()))
    }

    /// The managed index this slot keeps alive, if any
    #[must_use]
    pub fn managed_index(&self) -> Option<u32> {
        match self {
            StackSlot::Object(index)
            | StackSlot::FieldRef { object: index, .. }
            | StackSlot::ArrayRef { array: index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Returns true for slots addressing another location
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            StackSlot::FieldRef { .. }
                | StackSlot::ArrayRef { .. }
                | StackSlot::StaticFieldRef { .. }
                | StackSlot::StackRef(_)
        )
    }

    /// The 32-bit integer payload
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for other kinds.
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            StackSlot::Int32(v) => Ok(*v),
            other => Err(other.expected("int32")),
        }
    }

    /// The 64-bit integer payload
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for other kinds.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            StackSlot::Int64(v) => Ok(*v),
            other => Err(other.expected("int64")),
        }
    }

    /// The 32-bit float payload
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for other kinds.
    pub fn as_f32(&self) -> Result<f32> {
        match self {
            StackSlot::Float(v) => Ok(*v),
            other => Err(other.expected("float")),
        }
    }

    /// The 64-bit float payload
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for other kinds.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            StackSlot::Double(v) => Ok(*v),
            other => Err(other.expected("double")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads() {
        assert_eq!(StackSlot::Int32(4).as_i32().unwrap(), 4);
        assert!(StackSlot::Int64(4).as_i32().is_err());
        assert_eq!(StackSlot::Double(0.5).as_f64().unwrap(), 0.5);
        assert_eq!(StackSlot::FieldRef { object: 3, field: 1 }.managed_index(), Some(3));
        assert_eq!(StackSlot::StackRef(3).managed_index(), None);
        assert!(StackSlot::StackRef(3).is_reference());
        assert!(!StackSlot::ValueType(3).is_reference());
    }
}
