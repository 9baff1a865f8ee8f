//! Execution of single instructions.

use crate::{
    assembly::Instruction,
    domain::Domain,
    engine::{
        interpreter::{
            ops::{self, BinaryOp, CompareOp, ConversionType},
            values::{addr32, primitive_slot, zero_slot, Carry, Target},
            Frame, Interpreter, StepResult,
        },
        FieldAccess, ManagedException, ObjectRef, StackSlot, Value,
    },
    metadata::{
        token::Token,
        typesystem::{corlib, FieldRc, InitClaim, TypeRc},
    },
    Error, Result,
};

impl Interpreter {
    pub(crate) fn step(
        &mut self,
        domain: &Domain,
        frame: &mut Frame<'_>,
        ip: usize,
        instruction: &Instruction,
    ) -> Result<StepResult> {
        match *instruction {
            Instruction::Nop => {}
            Instruction::Break => self.breakpoint(domain)?,

            Instruction::LdcI4(v) => self.stack.push(StackSlot::Int32(v))?,
            Instruction::LdcI8(v) => self.stack.push(StackSlot::Int64(v))?,
            Instruction::LdcR4(v) => self.stack.push(StackSlot::Float(v))?,
            Instruction::LdcR8(v) => self.stack.push(StackSlot::Double(v))?,
            Instruction::LdNull => self.stack.push(StackSlot::Null)?,
            Instruction::LdStr(token) => {
                let value = domain.registry().resolve_string(frame.module_id, token)?;
                self.stack.push_object(Value::Str(value))?;
            }

            Instruction::LdArg(n) => self.push_copy(domain, arg_addr(frame, n)?)?,
            Instruction::LdArgA(n) => self.stack.push(StackSlot::StackRef(addr32(arg_addr(frame, n)?)?))?,
            Instruction::StArg(n) => self.store_top(domain, arg_addr(frame, n)?)?,
            Instruction::LdLoc(n) => self.push_copy(domain, local_addr(frame, n)?)?,
            Instruction::LdLocA(n) => self.stack.push(StackSlot::StackRef(addr32(local_addr(frame, n)?)?))?,
            Instruction::StLoc(n) => self.store_top(domain, local_addr(frame, n)?)?,

            Instruction::Dup => {
                let top = self.stack.top_addr()?;
                self.push_copy(domain, top)?;
            }
            Instruction::Pop => self.stack.pop()?,

            Instruction::Add => self.arithmetic(domain, BinaryOp::Add)?,
            Instruction::Sub => self.arithmetic(domain, BinaryOp::Sub)?,
            Instruction::Mul => self.arithmetic(domain, BinaryOp::Mul)?,
            Instruction::Div => self.arithmetic(domain, BinaryOp::Div)?,
            Instruction::Rem => self.arithmetic(domain, BinaryOp::Rem)?,
            Instruction::And => self.arithmetic(domain, BinaryOp::And)?,
            Instruction::Or => self.arithmetic(domain, BinaryOp::Or)?,
            Instruction::Xor => self.arithmetic(domain, BinaryOp::Xor)?,
            Instruction::Shl => self.arithmetic(domain, BinaryOp::Shl)?,
            Instruction::Shr => self.arithmetic(domain, BinaryOp::Shr)?,
            Instruction::Neg => {
                let result = ops::negate(self.stack.top()?)?;
                self.stack.pop()?;
                self.stack.push(result)?;
            }
            Instruction::Ceq => self.compare_push(CompareOp::Eq)?,
            Instruction::Cgt => self.compare_push(CompareOp::Gt)?,
            Instruction::Clt => self.compare_push(CompareOp::Lt)?,

            Instruction::ConvI4 => self.convert(ConversionType::I4)?,
            Instruction::ConvI8 => self.convert(ConversionType::I8)?,
            Instruction::ConvR4 => self.convert(ConversionType::R4)?,
            Instruction::ConvR8 => self.convert(ConversionType::R8)?,

            Instruction::Br(target) => return Ok(StepResult::Branch { target: target as usize }),
            Instruction::BrTrue(target) => return self.branch_if(target, true),
            Instruction::BrFalse(target) => return self.branch_if(target, false),
            Instruction::Beq(target) => return self.branch_compare(target, CompareOp::Eq),
            Instruction::Bne(target) => return self.branch_compare(target, CompareOp::Ne),
            Instruction::Blt(target) => return self.branch_compare(target, CompareOp::Lt),
            Instruction::Ble(target) => return self.branch_compare(target, CompareOp::Le),
            Instruction::Bgt(target) => return self.branch_compare(target, CompareOp::Gt),
            Instruction::Bge(target) => return self.branch_compare(target, CompareOp::Ge),
            Instruction::Leave(target) => {
                let target = self.leave(frame, ip, target as usize)?;
                return Ok(StepResult::Branch { target });
            }
            Instruction::EndFinally => {
                let target = self.end_finally(frame)?;
                return Ok(StepResult::Branch { target });
            }

            Instruction::Call(token) => self.call(domain, frame, token, false)?,
            Instruction::CallVirt(token) => self.call(domain, frame, token, true)?,
            Instruction::NewObj(token) => self.new_object(domain, frame, token)?,
            Instruction::Ret => {
                if frame.method.returns_void() {
                    return Ok(StepResult::Return { value: None });
                }
                let carry = self.load_carry(self.stack.top_addr()?)?;
                let carry = self.detach(domain, carry)?;
                self.stack.pop()?;
                return Ok(StepResult::Return { value: Some(carry) });
            }

            Instruction::LdFld(token) => self.load_field(domain, frame, token)?,
            Instruction::LdFldA(token) => self.load_field_address(domain, frame, token)?,
            Instruction::StFld(token) => self.store_field(domain, frame, token)?,
            Instruction::LdSFld(token) => {
                let field = self.field(domain, frame, token)?;
                self.push_static(domain, &field)?;
            }
            Instruction::LdSFldA(token) => {
                let field = self.field(domain, frame, token)?;
                if field.native.is_some() {
                    return Err(Error::UnsupportedReferenceShape(format!(
                        "address of native static field {}",
                        field.key()
                    )));
                }
                self.ensure_initialized(domain, &field.declaring)?;
                self.stack.push(StackSlot::StaticFieldRef {
                    type_index: field.declaring.index(),
                    field: addr32(field.index)?,
                })?;
            }
            Instruction::StSFld(token) => {
                let field = self.field(domain, frame, token)?;
                self.store_static(domain, &field)?;
                self.stack.pop()?;
            }

            Instruction::NewArr(token) => self.new_array(domain, frame, token)?,
            Instruction::LdLen => {
                let array = self.array_operand(domain, 0)?;
                let length = i32::try_from(array.len()?)
                    .map_err(|_| Error::InvalidStackState("array too long".to_string()))?;
                self.stack.pop()?;
                self.stack.push(StackSlot::Int32(length))?;
            }
            Instruction::LdElem => {
                let index = self.stack.top()?;
                let array = self.array_operand(domain, 1)?;
                let element_type = self.element_type_of(domain, &array)?;
                let value = match element_index(index)? {
                    Some(i) => array.element(i)?,
                    None => None,
                };
                let Some(value) = value else {
                    return Err(self.index_fault(domain, index));
                };
                self.stack.pop()?;
                self.stack.pop()?;
                self.push_value(domain, value, &element_type)?;
            }
            Instruction::StElem => {
                let index = self.stack.peek(1)?;
                let array = self.array_operand(domain, 2)?;
                let element_type = self.element_type_of(domain, &array)?;
                let carry = self.load_carry(self.stack.top_addr()?)?;
                let value = self.carry_value(domain, carry, &element_type)?;
                let stored = match element_index(index)? {
                    Some(i) => array.set_element(i, value)?,
                    None => false,
                };
                if !stored {
                    return Err(self.index_fault(domain, index));
                }
                for _ in 0..3 {
                    self.stack.pop()?;
                }
            }
            Instruction::LdElemA(_) => {
                let index = self.stack.top()?;
                let array = self.array_operand(domain, 1)?;
                let position = match element_index(index)? {
                    Some(i) if i < array.len()? => i,
                    _ => return Err(self.index_fault(domain, index)),
                };
                let index = addr32(position)?;
                self.stack.pop()?;
                match self.stack.top()? {
                    StackSlot::Object(entry) => {
                        let top = self.stack.top_addr()?;
                        self.stack.set(top, StackSlot::ArrayRef { array: entry, index })?;
                    }
                    _ => {
                        self.stack.pop()?;
                        let entry = self.stack.push_managed(Value::Object(array))?;
                        self.stack.push(StackSlot::ArrayRef { array: entry, index })?;
                    }
                }
            }

            Instruction::LdObj(token) => {
                let ty = self.type_operand(domain, frame, token)?;
                let carry = self.deref_carry(domain, self.stack.top()?)?;
                self.stack.pop()?;
                self.push_carry(domain, carry, &ty)?;
            }
            Instruction::StObj(token) => {
                let ty = self.type_operand(domain, frame, token)?;
                let carry = self.load_carry(self.stack.top_addr()?)?;
                let address = self.stack.peek(1)?;
                if !self.store_through(domain, address, carry, &ty)? {
                    return Err(self.fault(domain, corlib::INDEX_OUT_OF_RANGE_EXCEPTION, "Index was outside the bounds of the array."));
                }
                self.stack.pop()?;
                self.stack.pop()?;
            }
            Instruction::InitObj(token) => {
                let ty = self.type_operand(domain, frame, token)?;
                let carry = if let Some(primitive) = ty.primitive() {
                    Carry::Slot(zero_slot(primitive))
                } else if ty.is_value_type() && !self.is_inline(domain, &ty)? {
                    Carry::Value(domain.registry().default_value(&ty)?)
                } else {
                    Carry::Slot(StackSlot::Null)
                };
                let address = self.stack.top()?;
                if !self.store_through(domain, address, carry, &ty)? {
                    return Err(self.fault(domain, corlib::INDEX_OUT_OF_RANGE_EXCEPTION, "Index was outside the bounds of the array."));
                }
                self.stack.pop()?;
            }

            Instruction::Box(token) => {
                let ty = self.type_operand(domain, frame, token)?;
                if ty.is_value_type() || ty.primitive().is_some() {
                    let carry = self.load_carry(self.stack.top_addr()?)?;
                    let value = self.carry_value(domain, carry, &ty)?;
                    self.stack.pop()?;
                    self.stack.push_object(value)?;
                }
            }
            Instruction::UnboxAny(token) => {
                let ty = self.type_operand(domain, frame, token)?;
                if ty.is_value_type() || ty.primitive().is_some() {
                    self.unbox(domain, &ty)?;
                } else {
                    self.cast(domain, &ty, true)?;
                }
            }
            Instruction::CastClass(token) => {
                let ty = self.type_operand(domain, frame, token)?;
                self.cast(domain, &ty, true)?;
            }
            Instruction::IsInst(token) => {
                let ty = self.type_operand(domain, frame, token)?;
                self.cast(domain, &ty, false)?;
            }

            Instruction::Throw => {
                let value = self.reference_value(self.stack.top()?)?;
                if value.is_null() {
                    return Err(self.null_reference(domain));
                }
                return Err(Error::Exception(Box::new(ManagedException::new(value))));
            }
            Instruction::Rethrow => return Err(self.rethrow(frame, ip)),
        }
        Ok(StepResult::Continue)
    }

    fn arithmetic(&mut self, domain: &Domain, op: BinaryOp) -> Result<()> {
        let right = self.stack.top()?;
        let left = self.stack.peek(1)?;
        let Some(result) = ops::binary(op, left, right)? else {
            return Err(self.fault(domain, corlib::DIVIDE_BY_ZERO_EXCEPTION, "Attempted to divide by zero."));
        };
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(result)
    }

    fn convert(&mut self, to: ConversionType) -> Result<()> {
        let result = ops::convert(self.stack.top()?, to)?;
        self.stack.pop()?;
        self.stack.push(result)
    }

    /// The object or null an evaluation stack slot refers to
    fn reference_value(&self, slot: StackSlot) -> Result<Value> {
        match slot {
            StackSlot::Null => Ok(Value::Null),
            StackSlot::Object(index) => Ok(self.stack.managed(index)?.clone()),
            other => Err(Error::InvalidStackState(format!(
                "expected an object reference, found {}",
                other.kind()
            ))),
        }
    }

    fn compare(&self, op: CompareOp, left: StackSlot, right: StackSlot) -> Result<bool> {
        if ops::is_numeric(left) && ops::is_numeric(right) {
            return Ok(op.holds(ops::order(left, right)?));
        }
        let references = |slot: StackSlot| matches!(slot, StackSlot::Null | StackSlot::Object(_));
        if !(references(left) && references(right)) {
            return match op {
                CompareOp::Eq => Ok(left == right),
                CompareOp::Ne => Ok(left != right),
                _ => Err(Error::InvalidStackState(format!(
                    "cannot order {} and {}",
                    left.kind(),
                    right.kind()
                ))),
            };
        }
        let (a, b) = (self.reference_value(left)?, self.reference_value(right)?);
        let boxed = (primitive_slot(&a), primitive_slot(&b));
        if let (Some(x), Some(y)) = boxed {
            return Ok(op.holds(ops::order(x, y)?));
        }
        match op {
            CompareOp::Eq => Ok(a == b),
            CompareOp::Ne => Ok(a != b),
            // `cgt.un` against null tests for a non-null reference
            _ => {
                let rank = |v: &Value| i32::from(!v.is_null());
                Ok(op.holds(Some(rank(&a).cmp(&rank(&b)))))
            }
        }
    }

    fn compare_push(&mut self, op: CompareOp) -> Result<()> {
        let holds = self.compare(op, self.stack.peek(1)?, self.stack.top()?)?;
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(StackSlot::Int32(i32::from(holds)))
    }

    fn truthy(&self, slot: StackSlot) -> Result<bool> {
        Ok(match slot {
            StackSlot::Null => false,
            StackSlot::Int32(v) => v != 0,
            StackSlot::Int64(v) => v != 0,
            StackSlot::Float(v) => v != 0.0,
            StackSlot::Double(v) => v != 0.0,
            StackSlot::Object(index) => !self.stack.managed(index)?.is_null(),
            _ => true,
        })
    }

    fn branch_if(&mut self, target: u32, expected: bool) -> Result<StepResult> {
        let taken = self.truthy(self.stack.top()?)? == expected;
        self.stack.pop()?;
        Ok(branch(taken, target))
    }

    fn branch_compare(&mut self, target: u32, op: CompareOp) -> Result<StepResult> {
        let taken = self.compare(op, self.stack.peek(1)?, self.stack.top()?)?;
        self.stack.pop()?;
        self.stack.pop()?;
        Ok(branch(taken, target))
    }

    pub(crate) fn null_reference(&self, domain: &Domain) -> Error {
        self.fault(domain, corlib::NULL_REFERENCE_EXCEPTION, "Object reference not set to an instance of an object.")
    }

    fn index_fault(&self, domain: &Domain, index: StackSlot) -> Error {
        let message = match index {
            StackSlot::Int32(i) => format!("Index {} was outside the bounds of the array.", i),
            StackSlot::Int64(i) => format!("Index {} was outside the bounds of the array.", i),
            _ => "Index was outside the bounds of the array.".to_string(),
        };
        self.fault(domain, corlib::INDEX_OUT_OF_RANGE_EXCEPTION, message)
    }

    pub(crate) fn type_operand(&self, domain: &Domain, frame: &Frame<'_>, token: Token) -> Result<TypeRc> {
        domain
            .registry()
            .resolve_type_token(frame.module_id, token, frame.context())
    }

    pub(crate) fn field(&self, domain: &Domain, frame: &Frame<'_>, token: Token) -> Result<FieldRc> {
        domain.registry().resolve_field(
            frame.module_id,
            token,
            Some(&frame.method.declaring),
            Some(frame.method.as_ref()),
        )
    }

    /// Runs the type initializer of `ty` the first time its statics are touched
    pub(crate) fn ensure_initialized(&mut self, domain: &Domain, ty: &TypeRc) -> Result<()> {
        let registry = domain.registry();
        let statics = registry.statics(ty)?;
        if statics.begin_initialization()? == InitClaim::Ready {
            return Ok(());
        }
        let result = match registry.type_initializer(ty) {
            Ok(Some(cctor)) => {
                let base = self.stack.esp();
                self.run(domain, &cctor, base).map(|_| ())
            }
            Ok(None) => Ok(()),
            Err(error) => Err(error),
        };
        statics.finish_initialization()?;
        result
    }

    /// Pushes the value of a native field: a bound copy-to-stack delegate first, then a bound
    /// getter, then the getter of the host description
    fn load_native(&mut self, domain: &Domain, field: &FieldRc, receiver: Option<Value>) -> Result<()> {
        if let Some(binding) = domain.bindings().field_binding(&field.key())? {
            let mut access = FieldAccess::copy(domain, field, self, receiver);
            (binding.copy_to_stack)(&mut access)?;
            return access.finish_copy();
        }
        let value = match domain.bindings().field_getter(&field.key())? {
            Some(getter) => getter(receiver.as_ref())?,
            None => match field.native.as_ref().and_then(|native| native.getter.clone()) {
                Some(getter) => getter(receiver.as_ref())?,
                None => {
                    return Err(Error::FieldNotFound {
                        field: format!("get_{}", field.name),
                        declaring_type: field.declaring.name().to_string(),
                    })
                }
            },
        };
        self.push_value(domain, value, &field.ty)
    }

    /// Stores the value on top of the stack to a native field, with the lookup order of loads;
    /// the value stays on the stack
    fn store_native(&mut self, domain: &Domain, field: &FieldRc, receiver: Option<Value>) -> Result<()> {
        if let Some(binding) = domain.bindings().field_binding(&field.key())? {
            let mut access = FieldAccess::assign(domain, field, self, receiver)?;
            return (binding.assign_from_stack)(&mut access);
        }
        let carry = self.load_carry(self.stack.top_addr()?)?;
        let value = self.carry_value(domain, carry, &field.ty)?;
        if let Some(setter) = domain.bindings().field_setter(&field.key())? {
            return setter(receiver.as_ref(), value);
        }
        match field.native.as_ref().and_then(|native| native.setter.clone()) {
            Some(setter) => setter(receiver.as_ref(), value),
            None => Err(Error::FieldNotFound {
                field: format!("set_{}", field.name),
                declaring_type: field.declaring.name().to_string(),
            }),
        }
    }

    fn push_static(&mut self, domain: &Domain, field: &FieldRc) -> Result<()> {
        if field.native.is_some() {
            return self.load_native(domain, field, None);
        }
        self.ensure_initialized(domain, &field.declaring)?;
        let value = domain.registry().statics(&field.declaring)?.get(field.index)?;
        self.push_value(domain, value, &field.ty)
    }

    /// Stores the value on top of the stack to a static field; the value stays on the stack
    fn store_static(&mut self, domain: &Domain, field: &FieldRc) -> Result<()> {
        if field.native.is_some() {
            return self.store_native(domain, field, None);
        }
        let carry = self.load_carry(self.stack.top_addr()?)?;
        let value = self.carry_value(domain, carry, &field.ty)?;
        self.ensure_initialized(domain, &field.declaring)?;
        domain.registry().statics(&field.declaring)?.set(field.index, value)
    }

    /// The receiver host value for a native field access
    fn native_receiver(&self, domain: &Domain, target: &Target) -> Result<Value> {
        match target {
            Target::Object(object) => Ok(Value::Object(object.clone())),
            Target::Block(d) => self.snapshot(domain, *d),
            Target::Null => Err(self.null_reference(domain)),
        }
    }

    fn load_field(&mut self, domain: &Domain, frame: &Frame<'_>, token: Token) -> Result<()> {
        let field = self.field(domain, frame, token)?;
        if field.is_static {
            self.stack.pop()?;
            return self.push_static(domain, &field);
        }
        let target = self.target_of(domain, self.stack.top()?)?;
        if field.native.is_some() {
            let receiver = self.native_receiver(domain, &target)?;
            self.stack.pop()?;
            return self.load_native(domain, &field, Some(receiver));
        }
        match target {
            Target::Null => Err(self.null_reference(domain)),
            Target::Block(d) => {
                let carry = self.load_carry(self.stack.field_addr(d, field.index)?)?;
                let carry = self.detach(domain, carry)?;
                self.stack.pop()?;
                self.push_carry(domain, carry, &field.ty)
            }
            Target::Object(object) => {
                let value = object.field(field.index)?;
                self.stack.pop()?;
                self.push_value(domain, value, &field.ty)
            }
        }
    }

    fn load_field_address(&mut self, domain: &Domain, frame: &Frame<'_>, token: Token) -> Result<()> {
        let field = self.field(domain, frame, token)?;
        if field.native.is_some() {
            return Err(Error::UnsupportedReferenceShape(format!(
                "address of native field {}",
                field.key()
            )));
        }
        let top = self.stack.top()?;
        if matches!(top, StackSlot::ValueType(_)) {
            return Err(Error::UnsupportedReferenceShape(format!(
                "address of field {} of a value on the evaluation stack",
                field.key()
            )));
        }
        let index = addr32(field.index)?;
        match self.target_of(domain, top)? {
            Target::Null => Err(self.null_reference(domain)),
            Target::Block(d) => {
                let addr = self.stack.field_addr(d, field.index)?;
                self.stack.pop()?;
                self.stack.push(StackSlot::StackRef(addr32(addr)?))
            }
            Target::Object(object) => match top {
                StackSlot::Object(entry) => {
                    let addr = self.stack.top_addr()?;
                    self.stack.set(addr, StackSlot::FieldRef { object: entry, field: index })
                }
                _ => {
                    self.stack.pop()?;
                    let entry = self.stack.push_managed(Value::Object(object))?;
                    self.stack.push(StackSlot::FieldRef { object: entry, field: index })
                }
            },
        }
    }

    fn store_field(&mut self, domain: &Domain, frame: &Frame<'_>, token: Token) -> Result<()> {
        let field = self.field(domain, frame, token)?;
        if field.is_static {
            self.store_static(domain, &field)?;
        } else {
            let target = self.target_of(domain, self.stack.peek(1)?)?;
            if field.native.is_some() {
                let receiver = self.native_receiver(domain, &target)?;
                self.store_native(domain, &field, Some(receiver))?;
            } else {
                let carry = self.load_carry(self.stack.top_addr()?)?;
                match target {
                    Target::Null => return Err(self.null_reference(domain)),
                    Target::Block(d) => {
                        let addr = self.stack.field_addr(d, field.index)?;
                        self.store_into(domain, addr, carry)?;
                    }
                    Target::Object(object) => {
                        let value = self.carry_value(domain, carry, &field.ty)?;
                        object.set_field(field.index, value)?;
                    }
                }
            }
        }
        self.stack.pop()?;
        self.stack.pop()
    }

    fn new_array(&mut self, domain: &Domain, frame: &Frame<'_>, token: Token) -> Result<()> {
        let element = self.type_operand(domain, frame, token)?;
        let length = match self.stack.top()? {
            StackSlot::Int32(v) => i64::from(v),
            StackSlot::Int64(v) => v,
            other => {
                return Err(Error::InvalidStackState(format!(
                    "array length is a {} slot",
                    other.kind()
                )))
            }
        };
        let Ok(length) = usize::try_from(length) else {
            return Err(self.fault(domain, corlib::OVERFLOW_EXCEPTION, "Arithmetic operation resulted in an overflow."));
        };
        let registry = domain.registry();
        let factory = match element.native() {
            Some(_) => domain.bindings().array_factory(element.name())?,
            None => None,
        };
        // interpreted value types are boxed per element so element addresses stay distinct
        let items = if let Some(factory) = factory {
            let items = factory(length)?;
            if items.len() != length {
                return Err(Error::InvalidStackState(format!(
                    "array factory of {} made {} elements for a length of {}",
                    element.name(),
                    items.len(),
                    length
                )));
            }
            items
        } else if element.is_value_type() && element.primitive().is_none() {
            (0..length)
                .map(|_| registry.default_value(&element))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![registry.default_value(&element)?; length]
        };
        let array = ObjectRef::array(registry.make_array(&element, 1), items);
        self.stack.pop()?;
        self.stack.push_object(Value::Object(array))
    }

    /// The array `depth` slots below the top; raises the interpreted fault for null
    fn array_operand(&self, domain: &Domain, depth: usize) -> Result<ObjectRef> {
        match self.reference_value(self.stack.peek(depth)?)? {
            Value::Object(object) if object.ty().is_array() => Ok(object),
            Value::Null => Err(self.null_reference(domain)),
            other => Err(Error::InvalidStackState(format!("{:?} is not an array", other))),
        }
    }

    fn element_type_of(&self, domain: &Domain, array: &ObjectRef) -> Result<TypeRc> {
        match array.ty().element() {
            Some(element) => Ok(element.clone()),
            None => domain.registry().corlib(corlib::OBJECT),
        }
    }

    fn unbox(&mut self, domain: &Domain, ty: &TypeRc) -> Result<()> {
        let value = self.reference_value(self.stack.top()?)?;
        let matches = match (&value, ty.primitive()) {
            (Value::Null, _) => return Err(self.null_reference(domain)),
            (_, Some(primitive)) => primitive_slot(&value).is_some_and(|slot| {
                std::mem::discriminant(&slot) == std::mem::discriminant(&zero_slot(primitive))
            }),
            (Value::Object(object), None) => object.ty().index() == ty.index(),
            _ => false,
        };
        if !matches {
            let from = self
                .type_of_value(domain, &value)?
                .map_or_else(|| "null".to_string(), |t| t.name().to_string());
            return Err(self.fault(
                domain,
                corlib::INVALID_CAST_EXCEPTION,
                format!("Unable to cast object of type '{}' to type '{}'.", from, ty.name()),
            ));
        }
        self.stack.pop()?;
        self.push_value(domain, value, ty)
    }

    /// `castclass` when `strict`, `isinst` otherwise
    fn cast(&mut self, domain: &Domain, ty: &TypeRc, strict: bool) -> Result<()> {
        let value = self.reference_value(self.stack.top()?)?;
        let Some(actual) = self.type_of_value(domain, &value)? else {
            return Ok(());
        };
        if domain.registry().is_assignable(&actual, ty)? {
            return Ok(());
        }
        if strict {
            return Err(self.fault(
                domain,
                corlib::INVALID_CAST_EXCEPTION,
                format!("Unable to cast object of type '{}' to type '{}'.", actual.name(), ty.name()),
            ));
        }
        self.stack.pop()?;
        self.stack.push(StackSlot::Null)
    }
}

fn branch(taken: bool, target: u32) -> StepResult {
    if taken {
        StepResult::Branch { target: target as usize }
    } else {
        StepResult::Continue
    }
}

fn arg_addr(frame: &Frame<'_>, n: u16) -> Result<usize> {
    let n = usize::from(n);
    if n >= frame.arg_count {
        return Err(malformed_error!(
            "argument {} out of range in {}",
            n,
            frame.method.full_name()
        ));
    }
    Ok(frame.arg_base + n)
}

fn local_addr(frame: &Frame<'_>, n: u16) -> Result<usize> {
    let n = usize::from(n);
    if n >= frame.local_count {
        return Err(malformed_error!(
            "local {} out of range in {}",
            n,
            frame.method.full_name()
        ));
    }
    Ok(frame.local_base + n)
}

/// A non-negative element index, `None` for negative ones
fn element_index(slot: StackSlot) -> Result<Option<usize>> {
    match slot {
        StackSlot::Int32(v) => Ok(usize::try_from(v).ok()),
        StackSlot::Int64(v) => Ok(usize::try_from(v).ok()),
        other => Err(Error::InvalidStackState(format!(
            "array index is a {} slot",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_indices() {
        assert_eq!(element_index(StackSlot::Int32(3)).unwrap(), Some(3));
        assert_eq!(element_index(StackSlot::Int32(-1)).unwrap(), None);
        assert!(element_index(StackSlot::Null).is_err());
    }

    #[test]
    fn branch_targets() {
        assert!(matches!(branch(true, 4), StepResult::Branch { target: 4 }));
        assert!(matches!(branch(false, 4), StepResult::Continue));
    }
}
