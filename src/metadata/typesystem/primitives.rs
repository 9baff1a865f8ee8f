use strum::{Display, EnumIter, IntoEnumIterator};

/// Built-in value primitives of the core library.
///
/// Each primitive is a native value type named `System.<Variant>`; its [`StackKind`] decides
/// which slot tag carries it on the evaluation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Primitive {
    /// `System.Void`, only valid as a return type
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    SByte,
    /// `System.Byte`
    Byte,
    /// `System.Int16`
    Int16,
    /// `System.UInt16`
    UInt16,
    /// `System.Int32`
    Int32,
    /// `System.UInt32`
    UInt32,
    /// `System.Int64`
    Int64,
    /// `System.UInt64`
    UInt64,
    /// `System.Single`
    Single,
    /// `System.Double`
    Double,
}

/// The slot tag family a primitive occupies on the evaluation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackKind {
    /// Stored as a 32-bit integer slot (booleans, chars and the small integers widen)
    Int32,
    /// Stored as a 64-bit integer slot
    Int64,
    /// Stored as a 32-bit float slot
    Float,
    /// Stored as a 64-bit float slot
    Double,
    /// Occupies no slot
    Void,
}

impl Primitive {
    /// Full name of the core library type
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("System.{}", self)
    }

    /// Looks up a primitive by the full name of its core library type
    #[must_use]
    pub fn from_full_name(name: &str) -> Option<Primitive> {
        let short = name.strip_prefix("System.")?;
        Primitive::iter().find(|p| p.to_string() == short)
    }

    /// Stack representation
    #[must_use]
    pub fn stack_kind(&self) -> StackKind {
        match self {
            Primitive::Void => StackKind::Void,
            Primitive::Int64 | Primitive::UInt64 => StackKind::Int64,
            Primitive::Single => StackKind::Float,
            Primitive::Double => StackKind::Double,
            _ => StackKind::Int32,
        }
    }

    /// Narrows a 32-bit stack value to the width of this primitive
    #[must_use]
    pub fn narrow(&self, value: i32) -> i32 {
        match self {
            Primitive::Boolean => i32::from(value != 0),
            Primitive::SByte => i32::from(value as i8),
            Primitive::Byte => i32::from(value as u8),
            Primitive::Int16 => i32::from(value as i16),
            Primitive::UInt16 | Primitive::Char => i32::from(value as u16),
            _ => value,
        }
    }
}
