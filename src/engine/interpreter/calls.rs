//! Calls, object construction and the transitions into native code.

use crate::{
    binding::AdaptorInstance,
    domain::Domain,
    engine::{
        interpreter::{values::addr32, Frame, Interpreter},
        NativeFrame, NativeObject, ObjectRef, StackSlot, Value,
    },
    metadata::{
        method::MethodRc,
        token::Token,
        typesystem::{corlib, NativeCall, Primitive, TypeRc},
    },
    Error, Result,
};

impl Interpreter {
    /// `call` and `callvirt`
    pub(crate) fn call(&mut self, domain: &Domain, frame: &Frame<'_>, token: Token, virtual_call: bool) -> Result<()> {
        let registry = domain.registry();
        let method = registry.resolve_method(
            frame.module_id,
            token,
            Some(&frame.method.declaring),
            Some(frame.method.as_ref()),
        )?;
        let Some(method) = method else {
            // parameterless base constructor with nothing to do
            return self.stack.pop();
        };
        let arg_base = self.arg_base(frame, method.arg_count())?;
        self.call_method(domain, &method, arg_base, virtual_call)
    }

    /// Calls `method` on the arguments from `arg_base` up, dispatching on the receiver's
    /// runtime type for virtual calls, and pushes its result
    pub(crate) fn call_method(&mut self, domain: &Domain, method: &MethodRc, arg_base: usize, virtual_call: bool) -> Result<()> {
        let target = if method.has_this() && virtual_call {
            let receiver = self.stack.get(arg_base)?;
            let Some(receiver_type) = self.receiver_type(domain, receiver)? else {
                return Err(self.null_reference(domain));
            };
            domain.registry().find_override(&receiver_type, method)?
        } else {
            method.clone()
        };
        if !target.has_this() {
            self.ensure_initialized(domain, &target.declaring)?;
        }
        self.invoke_at(domain, &target, arg_base)
    }

    /// `newobj`
    pub(crate) fn new_object(&mut self, domain: &Domain, frame: &Frame<'_>, token: Token) -> Result<()> {
        let method = domain.registry().resolve_method(
            frame.module_id,
            token,
            Some(&frame.method.declaring),
            Some(frame.method.as_ref()),
        )?;
        let Some(ctor) = method else {
            let ty = domain.registry().corlib(corlib::OBJECT)?;
            let object = ObjectRef::native(NativeObject::new(ty, Box::new(())));
            return self.stack.push_object(Value::Object(object));
        };
        let arg_base = self.arg_base(frame, ctor.params.len())?;
        self.construct_at(domain, &ctor, arg_base)
    }

    fn arg_base(&self, frame: &Frame<'_>, count: usize) -> Result<usize> {
        self.stack
            .esp()
            .checked_sub(count)
            .filter(|base| *base >= frame.eval_base)
            .ok_or_else(|| {
                Error::InvalidStackState(format!(
                    "call in {} needs {} arguments on the evaluation stack",
                    frame.method.full_name(),
                    count
                ))
            })
    }

    /// Runtime type of the receiver in `slot`; `None` for null
    fn receiver_type(&self, domain: &Domain, slot: StackSlot) -> Result<Option<TypeRc>> {
        let registry = domain.registry();
        match slot {
            StackSlot::Null => Ok(None),
            StackSlot::Int32(_) => registry.primitive(Primitive::Int32).map(Some),
            StackSlot::Int64(_) => registry.primitive(Primitive::Int64).map(Some),
            StackSlot::Float(_) => registry.primitive(Primitive::Single).map(Some),
            StackSlot::Double(_) => registry.primitive(Primitive::Double).map(Some),
            StackSlot::Object(index) => self.type_of_value(domain, self.stack.managed(index)?),
            StackSlot::ValueType(d) => {
                let (type_index, _) = self.stack.block_header(d as usize)?;
                registry.type_at(type_index).map(Some)
            }
            StackSlot::StackRef(addr) => match self.stack.get(addr as usize)? {
                StackSlot::ValueTypeDescriptor { type_index, .. } => registry.type_at(type_index).map(Some),
                inner => self.receiver_type(domain, inner),
            },
            StackSlot::FieldRef { .. } | StackSlot::ArrayRef { .. } | StackSlot::StaticFieldRef { .. } => {
                let value = self.deref_value(domain, slot)?;
                self.type_of_value(domain, &value)
            }
            StackSlot::ValueTypeDescriptor { .. } => Err(Error::InvalidStackState(
                "a value type descriptor is not a receiver".to_string(),
            )),
        }
    }

    /// Calls `method` with the arguments from `arg_base` up and pushes its result
    pub(crate) fn invoke_at(&mut self, domain: &Domain, method: &MethodRc, arg_base: usize) -> Result<()> {
        if method.native().is_some() {
            return self.call_native(domain, method, arg_base, method.has_this());
        }
        if let Some(carry) = self.run(domain, method, arg_base)? {
            self.push_carry(domain, carry, &method.ret)?;
        }
        Ok(())
    }

    /// Runs a native method through its redirect, or through host reflection when unbound
    fn call_native(&mut self, domain: &Domain, method: &MethodRc, arg_base: usize, has_receiver: bool) -> Result<()> {
        let key = method.key();
        if let Some(redirect) = domain.bindings().redirect(&key)? {
            let result = {
                let mut native = NativeFrame::new(domain, method, self, arg_base, has_receiver);
                redirect(&mut native)?;
                native.take_result()
            };
            return self.finish_native(domain, method, arg_base, has_receiver, result);
        }

        let Some(native) = method.native() else {
            return Err(Error::MissingMethodBody(method.full_name()));
        };
        if !domain.config().allow_unbound_native {
            return Err(Error::UnboundNativeMethod(key));
        }
        tracing::trace!(method = %key, "native call through reflection");

        let offset = usize::from(has_receiver);
        let receiver = if has_receiver {
            Some(self.read_value(domain, self.stack.get(arg_base)?, &method.declaring)?)
        } else {
            None
        };
        let args = method
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| self.read_value(domain, self.stack.get(arg_base + offset + i)?, ty))
            .collect::<Result<Vec<_>>>()?;
        let call = NativeCall {
            domain,
            method,
            receiver: receiver.as_ref(),
            args: &args,
        };
        let result = (native.invoke)(&call)?;
        self.finish_native(domain, method, arg_base, has_receiver, Some(result))
    }

    fn finish_native(
        &mut self,
        domain: &Domain,
        method: &MethodRc,
        arg_base: usize,
        has_receiver: bool,
        result: Option<Value>,
    ) -> Result<()> {
        self.stack.pop_to(arg_base)?;
        let ty = if method.is_constructor() && !has_receiver {
            &method.declaring
        } else if method.returns_void() {
            return Ok(());
        } else {
            &method.ret
        };
        let value = match result {
            Some(value) if !(value.is_null() && ty.is_value_type()) => value,
            _ => domain.registry().default_value(ty)?,
        };
        self.push_value(domain, value, ty)
    }

    /// Allocates an instance of the constructor's type, runs the constructor on the
    /// arguments from `arg_base` up and pushes the new object
    pub(crate) fn construct_at(&mut self, domain: &Domain, ctor: &MethodRc, arg_base: usize) -> Result<()> {
        let ty = ctor.declaring.clone();
        self.ensure_initialized(domain, &ty)?;
        if ctor.native().is_some() {
            return self.call_native(domain, ctor, arg_base, false);
        }

        if self.is_inline(domain, &ty)? {
            let d = self.alloc_value_type(domain, &ty)?;
            self.stack.insert(arg_base, StackSlot::ValueType(addr32(d)?))?;
            self.stack.insert(arg_base + 1, StackSlot::StackRef(addr32(arg_base)?))?;
            self.run(domain, ctor, arg_base + 1)?;
            return Ok(());
        }

        let instance = self.new_instance(domain, &ty)?;
        let entry = self.stack.push_managed(Value::Object(instance.clone()))?;
        self.stack.insert(arg_base, StackSlot::Object(entry))?;
        self.run(domain, ctor, arg_base)?;
        self.stack.push_object(Value::Object(instance))
    }

    /// A default initialized instance of an interpreted class, wrapped by the adaptor of its
    /// native base type if one is registered
    pub(crate) fn new_instance(&self, domain: &Domain, ty: &TypeRc) -> Result<ObjectRef> {
        let registry = domain.registry();
        let layout = registry.layout(ty)?;
        let fields = layout
            .instance
            .iter()
            .map(|field| registry.default_value(&field.ty))
            .collect::<Result<Vec<_>>>()?;
        let object = ObjectRef::instance(ty.clone(), fields);
        if let Some(base) = registry.first_native_base(ty)? {
            if let Some(adaptor) = registry.adaptors().find(base.name()) {
                let wrapper = adaptor.create_instance(AdaptorInstance::new(domain, &object))?;
                object.set_adaptor(wrapper);
            }
        }
        Ok(object)
    }

    /// Calls `method` on host values and returns its result as a host value.
    ///
    /// The stack is left exactly as it was found, whatever the outcome.
    pub(crate) fn invoke_host(
        &mut self,
        domain: &Domain,
        method: &MethodRc,
        receiver: Option<&Value>,
        args: &[Value],
    ) -> Result<Option<Value>> {
        let mark = self.stack.mark();
        let result = self.invoke_host_inner(domain, method, receiver, args);
        self.stack.reset(&mark);
        result
    }

    fn invoke_host_inner(
        &mut self,
        domain: &Domain,
        method: &MethodRc,
        receiver: Option<&Value>,
        args: &[Value],
    ) -> Result<Option<Value>> {
        let mut arg_base = self.stack.esp();
        if let Some(receiver) = receiver {
            let declaring = &method.declaring;
            if self.is_inline(domain, declaring)? {
                let d = self.materialize(domain, receiver, declaring)?;
                self.stack.push(StackSlot::ValueType(addr32(d)?))?;
                self.stack.push(StackSlot::StackRef(addr32(arg_base)?))?;
                arg_base += 1;
            } else {
                self.stack.push_object(receiver.clone())?;
            }
        }
        for (arg, ty) in args.iter().zip(&method.params) {
            self.push_value(domain, arg.clone(), ty)?;
        }
        self.invoke_at(domain, method, arg_base)?;
        if method.returns_void() {
            return Ok(None);
        }
        let top = self.stack.top()?;
        self.read_value(domain, top, &method.ret).map(Some)
    }

    /// Constructs an object from host values
    pub(crate) fn construct_host(&mut self, domain: &Domain, ctor: &MethodRc, args: &[Value]) -> Result<Value> {
        let mark = self.stack.mark();
        let result = (|| {
            let arg_base = self.stack.esp();
            for (arg, ty) in args.iter().zip(&ctor.params) {
                self.push_value(domain, arg.clone(), ty)?;
            }
            self.construct_at(domain, ctor, arg_base)?;
            let top = self.stack.top()?;
            self.read_value(domain, top, &ctor.declaring)
        })();
        self.stack.reset(&mark);
        result
    }
}
