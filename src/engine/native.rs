use std::sync::Arc;

use crate::{
    domain::Domain,
    engine::{interpreter::Interpreter, StackSlot, Value},
    metadata::{method::MethodRc, typesystem::FieldRc},
    Error, Result,
};

/// The view a method redirection gets of its call.
///
/// Arguments are read straight from the caller's evaluation stack, so primitive arguments
/// never go through a host value and bound value types can be read and written as their
/// field slots.
pub struct NativeFrame<'a> {
    domain: &'a Domain,
    method: &'a MethodRc,
    interpreter: &'a mut Interpreter,
    arg_base: usize,
    has_receiver: bool,
    result: Option<Value>,
}

impl<'a> NativeFrame<'a> {
    pub(crate) fn new(
        domain: &'a Domain,
        method: &'a MethodRc,
        interpreter: &'a mut Interpreter,
        arg_base: usize,
        has_receiver: bool,
    ) -> Self {
        NativeFrame {
            domain,
            method,
            interpreter,
            arg_base,
            has_receiver,
            result: None,
        }
    }

    /// The calling domain
    #[must_use]
    pub fn domain(&self) -> &Domain {
        self.domain
    }

    /// The redirected method
    #[must_use]
    pub fn method(&self) -> &MethodRc {
        self.method
    }

    /// Number of arguments, without the receiver
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.method.params.len()
    }

    fn arg_addr(&self, index: usize) -> Result<usize> {
        if index >= self.arg_count() {
            return Err(Error::ArgumentCountMismatch {
                expected: index + 1,
                found: self.arg_count(),
            });
        }
        Ok(self.arg_base + usize::from(self.has_receiver) + index)
    }

    /// The raw stack slot of argument `index`
    ///
    /// # Errors
    /// Returns [`Error::ArgumentCountMismatch`] if the method has fewer parameters.
    pub fn arg_slot(&self, index: usize) -> Result<StackSlot> {
        self.interpreter.stack().get(self.arg_addr(index)?)
    }

    /// Argument `index` as a host value
    ///
    /// # Errors
    /// Returns [`Error::ArgumentCountMismatch`] if the method has fewer parameters.
    pub fn arg(&self, index: usize) -> Result<Value> {
        let slot = self.arg_slot(index)?;
        self.interpreter
            .read_value(self.domain, slot, &self.method.params[index])
    }

    /// Argument `index` as a 32-bit integer
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for arguments of other kinds.
    pub fn arg_i32(&self, index: usize) -> Result<i32> {
        match self.arg_slot(index)? {
            StackSlot::Int32(v) => Ok(v),
            _ => self.arg(index)?.as_i32(),
        }
    }

    /// Argument `index` as a 64-bit integer
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for arguments of other kinds.
    pub fn arg_i64(&self, index: usize) -> Result<i64> {
        match self.arg_slot(index)? {
            StackSlot::Int64(v) => Ok(v),
            _ => self.arg(index)?.as_i64(),
        }
    }

    /// Argument `index` as a 32-bit float
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for arguments of other kinds.
    pub fn arg_f32(&self, index: usize) -> Result<f32> {
        match self.arg_slot(index)? {
            StackSlot::Float(v) => Ok(v),
            _ => self.arg(index)?.as_f32(),
        }
    }

    /// Argument `index` as a 64-bit float
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for arguments of other kinds.
    pub fn arg_f64(&self, index: usize) -> Result<f64> {
        match self.arg_slot(index)? {
            StackSlot::Double(v) => Ok(v),
            _ => self.arg(index)?.as_f64(),
        }
    }

    /// Argument `index` as a boolean
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for arguments of other kinds.
    pub fn arg_bool(&self, index: usize) -> Result<bool> {
        match self.arg_slot(index)? {
            StackSlot::Int32(v) => Ok(v != 0),
            _ => self.arg(index)?.as_bool(),
        }
    }

    /// Argument `index` as a string; `None` for null
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for arguments that are neither strings nor null.
    pub fn arg_str(&self, index: usize) -> Result<Option<Arc<str>>> {
        match self.arg(index)? {
            Value::Str(s) => Ok(Some(s)),
            Value::Null => Ok(None),
            other => Err(Error::InvalidCast {
                from: format!("{:?}", other),
                to: "System.String".to_string(),
            }),
        }
    }

    /// The receiver as a host value; value-type receivers are copied
    ///
    /// # Errors
    /// Returns [`Error::NullReceiver`] for static methods and null receivers.
    pub fn this(&self) -> Result<Value> {
        if !self.has_receiver {
            return Err(Error::NullReceiver(self.method.full_name()));
        }
        let slot = self.interpreter.stack().get(self.arg_base)?;
        let value = self
            .interpreter
            .read_value(self.domain, slot, &self.method.declaring)?;
        if value.is_null() {
            return Err(Error::NullReceiver(self.method.full_name()));
        }
        Ok(value)
    }

    /// Descriptor address of the inline block an argument or receiver slot designates
    fn block_of(&self, slot: StackSlot) -> Result<usize> {
        match slot {
            StackSlot::ValueType(d) => Ok(d as usize),
            StackSlot::StackRef(addr) => match self.interpreter.stack().get(addr as usize)? {
                StackSlot::ValueTypeDescriptor { .. } => Ok(addr as usize),
                inner => self.block_of(inner),
            },
            other => Err(Error::InvalidStackState(format!(
                "{} is not an inline value type",
                other.kind()
            ))),
        }
    }

    /// The field slots of an inline value-type argument
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] if the argument is not stored inline.
    pub fn value_fields(&self, index: usize) -> Result<Vec<StackSlot>> {
        let d = self.block_of(self.arg_slot(index)?)?;
        self.interpreter.block_fields(d)
    }

    /// The field slots of an inline value-type receiver
    ///
    /// # Errors
    /// Returns [`Error::NullReceiver`] for static methods and [`Error::InvalidStackState`] if
    /// the receiver is not stored inline.
    pub fn this_fields(&self) -> Result<Vec<StackSlot>> {
        if !self.has_receiver {
            return Err(Error::NullReceiver(self.method.full_name()));
        }
        let d = self.block_of(self.interpreter.stack().get(self.arg_base)?)?;
        self.interpreter.block_fields(d)
    }

    /// Overwrites the field slots of an inline value-type receiver in place
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] if the receiver is not stored inline or `fields`
    /// does not match its field count.
    pub fn set_this_fields(&mut self, fields: &[StackSlot]) -> Result<()> {
        if !self.has_receiver {
            return Err(Error::NullReceiver(self.method.full_name()));
        }
        let d = self.block_of(self.interpreter.stack().get(self.arg_base)?)?;
        let stack = self.interpreter.stack_mut();
        let (_, count) = stack.block_header(d)?;
        if count != fields.len() {
            return Err(Error::InvalidStackState(format!(
                "{} field slots written to a block of {}",
                fields.len(),
                count
            )));
        }
        for (i, slot) in fields.iter().enumerate() {
            let addr = stack.field_addr(d, i)?;
            stack.set(addr, *slot)?;
        }
        Ok(())
    }

    /// Sets the return value; constructors called by `newobj` return the new object
    pub fn set_result(&mut self, value: impl Into<Value>) {
        self.result = Some(value.into());
    }

    pub(crate) fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }
}

/// The view a field binding gets of one `ldfld`/`ldsfld` or `stfld`/`stsfld`.
///
/// A copy-to-stack delegate pushes exactly one value for the field. An assign-from-stack
/// delegate reads the stored value from the top of the evaluation stack; the interpreter pops
/// it afterwards.
pub struct FieldAccess<'a> {
    domain: &'a Domain,
    field: &'a FieldRc,
    interpreter: &'a mut Interpreter,
    receiver: Option<Value>,
    value_addr: Option<usize>,
    pushed: bool,
}

impl<'a> FieldAccess<'a> {
    pub(crate) fn copy(
        domain: &'a Domain,
        field: &'a FieldRc,
        interpreter: &'a mut Interpreter,
        receiver: Option<Value>,
    ) -> Self {
        FieldAccess {
            domain,
            field,
            interpreter,
            receiver,
            value_addr: None,
            pushed: false,
        }
    }

    pub(crate) fn assign(
        domain: &'a Domain,
        field: &'a FieldRc,
        interpreter: &'a mut Interpreter,
        receiver: Option<Value>,
    ) -> Result<Self> {
        let value_addr = interpreter.stack().top_addr()?;
        Ok(FieldAccess {
            domain,
            field,
            interpreter,
            receiver,
            value_addr: Some(value_addr),
            pushed: false,
        })
    }

    /// The calling domain
    #[must_use]
    pub fn domain(&self) -> &Domain {
        self.domain
    }

    /// The accessed field
    #[must_use]
    pub fn field(&self) -> &FieldRc {
        self.field
    }

    /// The receiver of an instance field access
    ///
    /// # Errors
    /// Returns [`Error::NullReceiver`] for static fields.
    pub fn receiver(&self) -> Result<&Value> {
        self.receiver
            .as_ref()
            .ok_or_else(|| Error::NullReceiver(self.field.key()))
    }

    /// The raw slot of the value being stored
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] when called from a copy-to-stack delegate.
    pub fn value_slot(&self) -> Result<StackSlot> {
        match self.value_addr {
            Some(addr) => self.interpreter.stack().get(addr),
            None => Err(Error::InvalidStackState(format!(
                "no value is stored to {}",
                self.field.key()
            ))),
        }
    }

    /// The value being stored, as a host value
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] when called from a copy-to-stack delegate.
    pub fn value(&self) -> Result<Value> {
        let slot = self.value_slot()?;
        self.interpreter.read_value(self.domain, slot, &self.field.ty)
    }

    /// The value being stored as a 32-bit integer
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for values of other kinds.
    pub fn value_i32(&self) -> Result<i32> {
        match self.value_slot()? {
            StackSlot::Int32(v) => Ok(v),
            _ => self.value()?.as_i32(),
        }
    }

    /// The value being stored as a 64-bit float
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for values of other kinds.
    pub fn value_f64(&self) -> Result<f64> {
        match self.value_slot()? {
            StackSlot::Double(v) => Ok(v),
            _ => self.value()?.as_f64(),
        }
    }

    fn claim_push(&mut self) -> Result<()> {
        if self.value_addr.is_some() || self.pushed {
            return Err(Error::InvalidStackState(format!(
                "field binding of {} pushed more than one value",
                self.field.key()
            )));
        }
        self.pushed = true;
        Ok(())
    }

    /// Pushes a 32-bit integer as the field value
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] on a second push or from an assign delegate.
    pub fn push_i32(&mut self, value: i32) -> Result<()> {
        self.claim_push()?;
        self.interpreter.stack_mut().push(StackSlot::Int32(value))
    }

    /// Pushes a 64-bit integer as the field value
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] on a second push or from an assign delegate.
    pub fn push_i64(&mut self, value: i64) -> Result<()> {
        self.claim_push()?;
        self.interpreter.stack_mut().push(StackSlot::Int64(value))
    }

    /// Pushes a 64-bit float as the field value
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] on a second push or from an assign delegate.
    pub fn push_f64(&mut self, value: f64) -> Result<()> {
        self.claim_push()?;
        self.interpreter.stack_mut().push(StackSlot::Double(value))
    }

    /// Pushes a host value, converted to the field type
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] on a second push or from an assign delegate, and
    /// [`Error::InvalidCast`] if `value` does not fit the field type.
    pub fn push(&mut self, value: impl Into<Value>) -> Result<()> {
        self.claim_push()?;
        self.interpreter.push_value(self.domain, value.into(), &self.field.ty)
    }

    pub(crate) fn finish_copy(&self) -> Result<()> {
        if self.pushed {
            Ok(())
        } else {
            Err(Error::InvalidStackState(format!(
                "field binding of {} pushed no value",
                self.field.key()
            )))
        }
    }
}
