use std::any::Any;

use crate::{
    binding::BindingTables,
    engine::StackSlot,
    metadata::typesystem::{NativeData, Primitive},
    Result,
};

/// Reflection-free stack marshaling of one native value type.
///
/// A bound value type lives on the evaluation stack like an interpreted struct: a descriptor
/// slot above one primitive slot per entry of [`ValueTypeBinder::fields`]. Copies are then
/// structural slot copies, and native code never sees a boxed instance unless it asks for one.
///
/// # Examples
///
/// ```rust
/// use std::any::Any;
/// use dotrun::binding::ValueTypeBinder;
/// use dotrun::engine::StackSlot;
/// use dotrun::metadata::typesystem::{NativeData, Primitive};
/// use dotrun::{Error, Result};
///
/// #[derive(Clone, Default)]
/// struct Vector2 { x: f32, y: f32 }
///
/// struct Vector2Binder;
///
/// impl ValueTypeBinder for Vector2Binder {
///     fn type_name(&self) -> &str { "Host.Vector2" }
///     fn fields(&self) -> &[Primitive] { &[Primitive::Single, Primitive::Single] }
///     fn write_fields(&self, value: &(dyn Any + Send + Sync), out: &mut [StackSlot]) -> Result<()> {
///         let v = value.downcast_ref::<Vector2>().ok_or_else(|| Error::InvalidCast {
///             from: "native data".to_string(),
///             to: "Host.Vector2".to_string(),
///         })?;
///         out[0] = StackSlot::Float(v.x);
///         out[1] = StackSlot::Float(v.y);
///         Ok(())
///     }
///     fn read_fields(&self, input: &[StackSlot]) -> Result<NativeData> {
///         Ok(Box::new(Vector2 { x: input[0].as_f32()?, y: input[1].as_f32()? }))
///     }
/// }
/// ```
pub trait ValueTypeBinder: Send + Sync {
    /// Full name of the bound native type
    fn type_name(&self) -> &str;

    /// Primitive kinds of the inline field slots, in order
    fn fields(&self) -> &[Primitive];

    /// Writes the fields of `value` into `out`, one slot per entry of `fields()`
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidCast`] if `value` is not the bound type.
    fn write_fields(&self, value: &(dyn Any + Send + Sync), out: &mut [StackSlot]) -> Result<()>;

    /// Builds a native value from its field slots
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidCast`] if a slot does not hold the expected kind.
    fn read_fields(&self, input: &[StackSlot]) -> Result<NativeData>;

    /// Adds method redirections that operate on the inline representation
    ///
    /// # Errors
    /// Returns the registration errors of the tables.
    fn register_redirections(&self, _tables: &BindingTables) -> Result<()> {
        Ok(())
    }
}
