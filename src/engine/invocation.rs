//! Streaming invocation: typed arguments in, typed result out, no argument vector.
//!
//! ```rust,ignore
//! let method = domain.find_method("Sample.Math", "Add", 2)?;
//! let mut ctx = domain.begin_invoke(&method)?;
//! ctx.push_i32(40)?;
//! ctx.push_i32(2)?;
//! ctx.invoke()?;
//! assert_eq!(ctx.read_i32()?, 42);
//! ```
//!
//! By-reference arguments point at slots pushed earlier through the same context: push the
//! storage first, then [`InvocationContext::push_reference`] to it, and read the storage back
//! after the call with the `read_*_at` family.

use crate::{
    domain::Domain,
    engine::{PooledInterpreter, StackSlot, Value},
    metadata::{method::MethodRc, typesystem::corlib},
    Error, Result,
};

/// A call being assembled on a borrowed interpreter.
///
/// The interpreter goes back to the pool when the context is dropped.
pub struct InvocationContext<'d> {
    domain: &'d Domain,
    method: MethodRc,
    interpreter: PooledInterpreter<'d>,
    base: usize,
    invoked: bool,
}

impl<'d> InvocationContext<'d> {
    pub(crate) fn new(domain: &'d Domain, method: MethodRc, interpreter: PooledInterpreter<'d>) -> Self {
        let base = interpreter.stack().esp();
        InvocationContext {
            domain,
            method,
            interpreter,
            base,
            invoked: false,
        }
    }

    /// The method this context calls
    #[must_use]
    pub fn method(&self) -> &MethodRc {
        &self.method
    }

    /// Number of slots pushed so far
    #[must_use]
    pub fn pushed(&self) -> usize {
        self.interpreter.stack().esp() - self.base
    }

    fn push(&mut self, slot: StackSlot) -> Result<()> {
        self.interpreter.stack_mut().push(slot)
    }

    /// Pushes a 32-bit integer, also for booleans, chars and the narrower integers
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] if the stack is full.
    pub fn push_i32(&mut self, value: i32) -> Result<()> {
        self.push(StackSlot::Int32(value))
    }

    /// Pushes a 64-bit integer
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] if the stack is full.
    pub fn push_i64(&mut self, value: i64) -> Result<()> {
        self.push(StackSlot::Int64(value))
    }

    /// Pushes a 32-bit float
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] if the stack is full.
    pub fn push_f32(&mut self, value: f32) -> Result<()> {
        self.push(StackSlot::Float(value))
    }

    /// Pushes a 64-bit float
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] if the stack is full.
    pub fn push_f64(&mut self, value: f64) -> Result<()> {
        self.push(StackSlot::Double(value))
    }

    /// Pushes a boolean
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] if the stack is full.
    pub fn push_bool(&mut self, value: bool) -> Result<()> {
        self.push(StackSlot::Int32(i32::from(value)))
    }

    /// Pushes an object reference, string or boxed value; null included, so the slot can be
    /// the target of a by-reference argument
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] if the stack is full.
    pub fn push_object(&mut self, value: Value) -> Result<()> {
        let stack = self.interpreter.stack_mut();
        let index = stack.push_managed(value)?;
        stack.push(StackSlot::Object(index))
    }

    /// Pushes a null reference
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] if the stack is full.
    pub fn push_null(&mut self) -> Result<()> {
        self.push(StackSlot::Null)
    }

    /// Pushes a reference to the `index`-th slot pushed through this context
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] if fewer slots were pushed.
    pub fn push_reference(&mut self, index: usize) -> Result<()> {
        if index >= self.pushed() {
            return Err(Error::InvalidStackState(format!(
                "reference to slot {} of {} pushed",
                index,
                self.pushed()
            )));
        }
        let addr = u32::try_from(self.base + index).map_err(|_| Error::StackOverflow)?;
        self.push(StackSlot::StackRef(addr))
    }

    /// Runs the method on the topmost pushed slots, receiver first
    ///
    /// # Errors
    /// Returns [`Error::ArgumentCountMismatch`] without running anything if fewer slots than
    /// the method takes were pushed, and any error of the call.
    pub fn invoke(&mut self) -> Result<()> {
        let expected = self.method.arg_count();
        let found = self.pushed();
        if found < expected {
            return Err(Error::ArgumentCountMismatch { expected, found });
        }
        let arg_base = self.interpreter.stack().esp() - expected;
        let virtual_call = self.method.is_virtual();
        let result = self
            .interpreter
            .call_method(self.domain, &self.method, arg_base, virtual_call);
        if let Err(Error::Exception(exception)) = &result {
            tracing::debug!(method = %self.method.full_name(), %exception, "unhandled interpreted exception");
        }
        result?;
        self.invoked = true;
        Ok(())
    }

    fn result_slot(&self) -> Result<StackSlot> {
        if !self.invoked || self.method.returns_void() {
            return Err(Error::InvalidStackState(format!(
                "{} has no result to read",
                self.method.full_name()
            )));
        }
        self.interpreter.stack().top()
    }

    /// The result as a host value
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] before [`InvocationContext::invoke`] or for void
    /// methods.
    pub fn read_value(&self) -> Result<Value> {
        let slot = self.result_slot()?;
        self.interpreter.read_value(self.domain, slot, &self.method.ret)
    }

    /// The result as a 32-bit integer
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for results of other kinds.
    pub fn read_i32(&self) -> Result<i32> {
        match self.result_slot()? {
            StackSlot::Int32(v) => Ok(v),
            _ => self.read_value()?.as_i32(),
        }
    }

    /// The result as a 64-bit integer
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for results of other kinds.
    pub fn read_i64(&self) -> Result<i64> {
        match self.result_slot()? {
            StackSlot::Int64(v) => Ok(v),
            _ => self.read_value()?.as_i64(),
        }
    }

    /// The result as a 32-bit float
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for results of other kinds.
    pub fn read_f32(&self) -> Result<f32> {
        match self.result_slot()? {
            StackSlot::Float(v) => Ok(v),
            _ => self.read_value()?.as_f32(),
        }
    }

    /// The result as a 64-bit float
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for results of other kinds.
    pub fn read_f64(&self) -> Result<f64> {
        match self.result_slot()? {
            StackSlot::Double(v) => Ok(v),
            _ => self.read_value()?.as_f64(),
        }
    }

    /// The result as a boolean
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for results of other kinds.
    pub fn read_bool(&self) -> Result<bool> {
        match self.result_slot()? {
            StackSlot::Int32(v) => Ok(v != 0),
            _ => self.read_value()?.as_bool(),
        }
    }

    fn slot_at(&self, index: usize) -> Result<StackSlot> {
        if index >= self.pushed() {
            return Err(Error::InvalidStackState(format!(
                "slot {} of {} pushed",
                index,
                self.pushed()
            )));
        }
        self.interpreter.stack().get(self.base + index)
    }

    /// The current content of the `index`-th pushed slot, after a by-reference write
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] if fewer slots were pushed.
    pub fn read_value_at(&self, index: usize) -> Result<Value> {
        let slot = self.slot_at(index)?;
        let object = self.domain.registry().corlib(corlib::OBJECT)?;
        self.interpreter.read_value(self.domain, slot, &object)
    }

    /// The `index`-th pushed slot as a 32-bit integer
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for slots of other kinds.
    pub fn read_i32_at(&self, index: usize) -> Result<i32> {
        match self.slot_at(index)? {
            StackSlot::Int32(v) => Ok(v),
            _ => self.read_value_at(index)?.as_i32(),
        }
    }

    /// The `index`-th pushed slot as a 64-bit integer
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for slots of other kinds.
    pub fn read_i64_at(&self, index: usize) -> Result<i64> {
        match self.slot_at(index)? {
            StackSlot::Int64(v) => Ok(v),
            _ => self.read_value_at(index)?.as_i64(),
        }
    }

    /// The `index`-th pushed slot as a 32-bit float
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for slots of other kinds.
    pub fn read_f32_at(&self, index: usize) -> Result<f32> {
        match self.slot_at(index)? {
            StackSlot::Float(v) => Ok(v),
            _ => self.read_value_at(index)?.as_f32(),
        }
    }

    /// The `index`-th pushed slot as a 64-bit float
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for slots of other kinds.
    pub fn read_f64_at(&self, index: usize) -> Result<f64> {
        match self.slot_at(index)? {
            StackSlot::Double(v) => Ok(v),
            _ => self.read_value_at(index)?.as_f64(),
        }
    }

    /// The `index`-th pushed slot as a boolean
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for slots of other kinds.
    pub fn read_bool_at(&self, index: usize) -> Result<bool> {
        match self.slot_at(index)? {
            StackSlot::Int32(v) => Ok(v != 0),
            _ => self.read_value_at(index)?.as_bool(),
        }
    }
}
