//! Moving values between stack locations, inline value-type blocks and the heap.
//!
//! Every `Object` slot owns its managed entry: copying a slot allocates a new entry, and a
//! store into a location that already owns an entry overwrites that entry in place. Inline
//! value types are copied field by field, so no two locations ever share a block or an
//! entry. Interpreted value types stored on the heap live in boxes that are never shared
//! either: loads copy them into a fresh block, stores snapshot the block into a new box.

use std::{any::Any, sync::Arc};

use crate::{
    binding::ValueTypeBinder,
    domain::Domain,
    engine::{interpreter::Interpreter, HeapObject, NativeObject, ObjectRef, StackSlot, Value},
    metadata::typesystem::{Primitive, StackKind, TypeIndex, TypeLayout, TypeRc},
    Error, Result,
};

/// A value in transit between two locations.
///
/// `Block` addresses an inline value type that is still on the stack; it is only valid until
/// the slot it was read from is popped, see [`Interpreter::detach`].
#[derive(Debug, Clone)]
pub(crate) enum Carry {
    /// Primitive, null, stack or static field reference
    Slot(StackSlot),
    /// Object reference, string, or a boxed value
    Value(Value),
    /// An inline value type at the given descriptor address
    Block(usize),
    /// Reference to an instance field of `object`
    FieldRef { object: Value, field: u32 },
    /// Reference to an element of `array`
    ArrayRef { array: Value, index: u32 },
}

/// What instance field access goes through.
pub(crate) enum Target {
    Block(usize),
    Object(ObjectRef),
    Null,
}

/// How a value type is stored inline.
enum Inline {
    Struct(Arc<TypeLayout>),
    Bound(Arc<dyn ValueTypeBinder>),
}

pub(crate) fn addr32(addr: usize) -> Result<u32> {
    u32::try_from(addr).map_err(|_| Error::StackOverflow)
}

/// Zero value of a primitive location
pub(crate) fn zero_slot(primitive: Primitive) -> StackSlot {
    match primitive.stack_kind() {
        StackKind::Int32 => StackSlot::Int32(0),
        StackKind::Int64 => StackSlot::Int64(0),
        StackKind::Float => StackSlot::Float(0.0),
        StackKind::Double => StackSlot::Double(0.0),
        StackKind::Void => StackSlot::Null,
    }
}

/// Converts a host value for a location of primitive type
pub(crate) fn slot_for(value: &Value, primitive: Primitive) -> Result<StackSlot> {
    Ok(match primitive.stack_kind() {
        StackKind::Int32 => StackSlot::Int32(primitive.narrow(match value {
            Value::I64(v) => *v as i32,
            other => other.as_i32()?,
        })),
        StackKind::Int64 => StackSlot::Int64(value.as_i64()?),
        StackKind::Float => StackSlot::Float(match value {
            Value::F64(v) => *v as f32,
            other => other.as_f32()?,
        }),
        StackKind::Double => StackSlot::Double(value.as_f64()?),
        StackKind::Void => StackSlot::Null,
    })
}

/// The stack form of a primitive value, without a declared type to narrow to
pub(crate) fn primitive_slot(value: &Value) -> Option<StackSlot> {
    match value {
        Value::Bool(v) => Some(StackSlot::Int32(i32::from(*v))),
        Value::I32(v) => Some(StackSlot::Int32(*v)),
        Value::I64(v) => Some(StackSlot::Int64(*v)),
        Value::F32(v) => Some(StackSlot::Float(*v)),
        Value::F64(v) => Some(StackSlot::Double(*v)),
        _ => None,
    }
}

/// The host value of a primitive slot read as `ty`
pub(crate) fn value_of_slot(slot: StackSlot, ty: &TypeRc) -> Value {
    let primitive = ty.primitive();
    match slot {
        StackSlot::Int32(v) => match primitive {
            Some(Primitive::Boolean) => Value::Bool(v != 0),
            Some(Primitive::Int64 | Primitive::UInt64) => Value::I64(i64::from(v)),
            Some(Primitive::Single) => Value::F32(v as f32),
            Some(Primitive::Double) => Value::F64(f64::from(v)),
            Some(p) => Value::I32(p.narrow(v)),
            None => Value::I32(v),
        },
        StackSlot::Int64(v) => match primitive.map(|p| p.stack_kind()) {
            Some(StackKind::Int32) => Value::I32(v as i32),
            _ => Value::I64(v),
        },
        StackSlot::Float(v) => match primitive {
            Some(Primitive::Double) => Value::F64(f64::from(v)),
            _ => Value::F32(v),
        },
        StackSlot::Double(v) => match primitive {
            Some(Primitive::Single) => Value::F32(v as f32),
            _ => Value::F64(v),
        },
        _ => Value::Null,
    }
}

/// Copy of a value stored in a value-type location: native value types are cloned, every
/// other value is shared
pub(crate) fn value_copy(value: &Value) -> Result<Value> {
    match value {
        Value::Object(object)
            if object.ty().is_value_type() && matches!(object.heap(), HeapObject::Native(_)) =>
        {
            Ok(Value::Object(object.deep_clone()?))
        }
        other => Ok(other.clone()),
    }
}

fn element_type(ty: &TypeRc) -> TypeRc {
    match ty.element() {
        Some(element) if ty.is_by_ref() => element.clone(),
        _ => ty.clone(),
    }
}

impl Interpreter {
    fn inline_kind(&self, domain: &Domain, ty: &TypeRc) -> Result<Option<Inline>> {
        if !ty.is_value_type() || ty.primitive().is_some() {
            return Ok(None);
        }
        if let Some(binder) = domain.bindings().value_binder(ty.name())? {
            return Ok(Some(Inline::Bound(binder)));
        }
        if ty.is_interpreted() {
            return Ok(Some(Inline::Struct(domain.registry().layout(ty)?)));
        }
        Ok(None)
    }

    /// Returns true if locations of `ty` hold an inline block
    pub(crate) fn is_inline(&self, domain: &Domain, ty: &TypeRc) -> Result<bool> {
        Ok(self.inline_kind(domain, ty)?.is_some())
    }

    pub(crate) fn cast_error(&self, domain: &Domain, from: TypeIndex, to: TypeIndex) -> Error {
        let name = |index| {
            domain
                .registry()
                .type_at(index)
                .map_or_else(|_| format!("#{}", index), |ty| ty.name().to_string())
        };
        Error::InvalidCast {
            from: name(from),
            to: name(to),
        }
    }

    /// The slot a freshly declared location of type `ty` starts with
    pub(crate) fn default_slot(&mut self, domain: &Domain, ty: &TypeRc) -> Result<StackSlot> {
        if let Some(primitive) = ty.primitive() {
            return Ok(zero_slot(primitive));
        }
        if self.is_inline(domain, ty)? {
            let d = self.alloc_value_type(domain, ty)?;
            return Ok(StackSlot::ValueType(addr32(d)?));
        }
        let value = if ty.is_value_type() {
            domain.registry().default_value(ty)?
        } else {
            Value::Null
        };
        Ok(StackSlot::Object(self.stack.push_managed(value)?))
    }

    /// Allocates a block for `ty` holding its default value and returns its descriptor address
    pub(crate) fn alloc_value_type(&mut self, domain: &Domain, ty: &TypeRc) -> Result<usize> {
        match self.inline_kind(domain, ty)? {
            Some(Inline::Bound(binder)) => {
                let d = self.stack.alloc_block(ty.index(), binder.fields().len())?;
                self.reset_bound(binder.as_ref(), ty, d)?;
                Ok(d)
            }
            Some(Inline::Struct(layout)) => {
                let d = self.stack.alloc_block(ty.index(), layout.field_count())?;
                for (i, field) in layout.instance.iter().enumerate() {
                    let slot = self.default_slot(domain, &field.ty)?;
                    self.stack.set(d - 1 - i, slot)?;
                }
                Ok(d)
            }
            None => Err(Error::InvalidStackState(format!(
                "{} is not stored inline",
                ty.name()
            ))),
        }
    }

    fn reset_bound(&mut self, binder: &dyn ValueTypeBinder, ty: &TypeRc, d: usize) -> Result<()> {
        for (i, primitive) in binder.fields().iter().enumerate() {
            self.stack.set(d - 1 - i, zero_slot(*primitive))?;
        }
        if let Some(factory) = ty.native().and_then(|native| native.default_instance.clone()) {
            let data = factory();
            self.write_bound(binder, d, data.as_ref())?;
        }
        Ok(())
    }

    fn write_bound(&mut self, binder: &dyn ValueTypeBinder, d: usize, data: &(dyn Any + Send + Sync)) -> Result<()> {
        let mut slots = vec![StackSlot::Null; binder.fields().len()];
        binder.write_fields(data, &mut slots)?;
        for (i, slot) in slots.into_iter().enumerate() {
            self.stack.set(d - 1 - i, slot)?;
        }
        Ok(())
    }

    /// The field slots of the block at `d`
    pub(crate) fn block_fields(&self, d: usize) -> Result<Vec<StackSlot>> {
        let (_, count) = self.stack.block_header(d)?;
        (0..count).map(|i| self.stack.get(d - 1 - i)).collect()
    }

    /// Writes a reference into the location at `addr`, reusing the entry the location owns
    fn store_object(&mut self, addr: usize, current: StackSlot, value: Value) -> Result<()> {
        match current {
            StackSlot::Object(index) => self.stack.set_managed(index, value),
            _ if value.is_null() => self.stack.set(addr, StackSlot::Null),
            _ => {
                let index = self.stack.push_managed(value)?;
                self.stack.set(addr, StackSlot::Object(index))
            }
        }
    }

    /// Structural copy of the block at `src` into the block at `dst`.
    ///
    /// Object fields of `dst` keep their own managed entries; only the referenced values are
    /// copied over.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] if the blocks hold different types and the domain checks
    /// value-type casts, or if their shapes differ.
    pub(crate) fn copy_value_type(&mut self, domain: &Domain, src: usize, dst: usize) -> Result<()> {
        if src == dst {
            return Ok(());
        }
        let (src_type, count) = self.stack.block_header(src)?;
        let (dst_type, dst_count) = self.stack.block_header(dst)?;
        if src_type != dst_type && (domain.config().check_value_type_casts || count != dst_count) {
            return Err(self.cast_error(domain, src_type, dst_type));
        }
        for i in 0..count {
            let from = self.stack.get(src - 1 - i)?;
            let to_addr = dst - 1 - i;
            let to = self.stack.get(to_addr)?;
            match (from, to) {
                (StackSlot::ValueType(nested), StackSlot::ValueType(dst_nested)) => {
                    self.copy_value_type(domain, nested as usize, dst_nested as usize)?;
                }
                (StackSlot::ValueType(_), _) | (_, StackSlot::ValueType(_)) => {
                    return Err(Error::InvalidStackState(format!(
                        "field {} is inline in only one of two blocks",
                        i
                    )));
                }
                (StackSlot::Object(index), _) => {
                    let value = value_copy(self.stack.managed(index)?)?;
                    self.store_object(to_addr, to, value)?;
                }
                (StackSlot::Null, _) => self.store_object(to_addr, to, Value::Null)?,
                (other, _) => self.stack.set(to_addr, other)?,
            }
        }
        Ok(())
    }

    /// Boxes the block at `d`: interpreted value types become instances, bound native value
    /// types native objects
    pub(crate) fn snapshot(&self, domain: &Domain, d: usize) -> Result<Value> {
        let (type_index, count) = self.stack.block_header(d)?;
        let ty = domain.registry().type_at(type_index)?;
        match self.inline_kind(domain, &ty)? {
            Some(Inline::Bound(binder)) => {
                let data = binder.read_fields(&self.block_fields(d)?)?;
                Ok(Value::Object(ObjectRef::native(NativeObject::new(ty, data))))
            }
            Some(Inline::Struct(layout)) => {
                let mut fields = Vec::with_capacity(count);
                for (i, field) in layout.instance.iter().enumerate().take(count) {
                    let value = match self.stack.get(d - 1 - i)? {
                        StackSlot::Object(index) => value_copy(self.stack.managed(index)?)?,
                        slot => self.read_value(domain, slot, &field.ty)?,
                    };
                    fields.push(value);
                }
                Ok(Value::Object(ObjectRef::instance(ty, fields)))
            }
            None => Err(Error::InvalidStackState(format!(
                "{} is not stored inline",
                ty.name()
            ))),
        }
    }

    /// Overwrites the block at `d` with a boxed value; null resets it to the default value
    pub(crate) fn write_boxed(&mut self, domain: &Domain, d: usize, value: &Value) -> Result<()> {
        let (type_index, count) = self.stack.block_header(d)?;
        let ty = domain.registry().type_at(type_index)?;
        let check = domain.config().check_value_type_casts;
        match self.inline_kind(domain, &ty)? {
            Some(Inline::Bound(binder)) => match value {
                Value::Null => self.reset_bound(binder.as_ref(), &ty, d),
                Value::Object(object) => {
                    if check && object.ty().index() != type_index {
                        return Err(self.cast_error(domain, object.ty().index(), type_index));
                    }
                    let slots = object
                        .with_native_any(|data| {
                            let mut slots = vec![StackSlot::Null; binder.fields().len()];
                            binder.write_fields(data, &mut slots).map(|_| slots)
                        })
                        .ok_or_else(|| Error::InvalidCast {
                            from: object.ty().name().to_string(),
                            to: ty.name().to_string(),
                        })??;
                    for (i, slot) in slots.into_iter().enumerate() {
                        self.stack.set(d - 1 - i, slot)?;
                    }
                    Ok(())
                }
                other => Err(Error::InvalidCast {
                    from: format!("{:?}", other),
                    to: ty.name().to_string(),
                }),
            },
            Some(Inline::Struct(layout)) => {
                let fields = match value {
                    Value::Null => None,
                    Value::Object(object) => {
                        if check && object.ty().index() != type_index {
                            return Err(self.cast_error(domain, object.ty().index(), type_index));
                        }
                        Some(object.fields()?)
                    }
                    other => {
                        return Err(Error::InvalidCast {
                            from: format!("{:?}", other),
                            to: ty.name().to_string(),
                        })
                    }
                };
                for (i, field) in layout.instance.iter().enumerate().take(count) {
                    let field_value = match &fields {
                        Some(values) => values.get(i).cloned().unwrap_or_default(),
                        None => domain.registry().default_value(&field.ty)?,
                    };
                    self.write_location(domain, d - 1 - i, field_value, &field.ty)?;
                }
                Ok(())
            }
            None => Err(Error::InvalidStackState(format!(
                "{} is not stored inline",
                ty.name()
            ))),
        }
    }

    /// Writes a host value into an existing typed location
    fn write_location(&mut self, domain: &Domain, addr: usize, value: Value, ty: &TypeRc) -> Result<()> {
        let current = self.stack.get(addr)?;
        match current {
            StackSlot::ValueType(d) => self.write_boxed(domain, d as usize, &value),
            _ => match ty.primitive() {
                Some(primitive) => self.stack.set(addr, slot_for(&value, primitive)?),
                None => self.store_object(addr, current, value_copy(&value)?),
            },
        }
    }

    /// A new block of `ty` holding `value`
    pub(crate) fn materialize(&mut self, domain: &Domain, value: &Value, ty: &TypeRc) -> Result<usize> {
        let d = self.alloc_value_type(domain, ty)?;
        self.write_boxed(domain, d, value)?;
        Ok(d)
    }

    /// Pushes a host value as a location of type `ty`
    pub(crate) fn push_value(&mut self, domain: &Domain, value: Value, ty: &TypeRc) -> Result<()> {
        if let Some(primitive) = ty.primitive() {
            if primitive == Primitive::Void {
                return Ok(());
            }
            return self.stack.push(slot_for(&value, primitive)?);
        }
        if self.is_inline(domain, ty)? {
            let d = self.materialize(domain, &value, ty)?;
            return self.stack.push(StackSlot::ValueType(addr32(d)?));
        }
        if ty.is_value_type() {
            return self.stack.push_object(value_copy(&value)?);
        }
        self.stack.push_object(value)
    }

    /// Reads the slot as a host value of type `ty`, dereferencing references and boxing blocks
    pub(crate) fn read_value(&self, domain: &Domain, slot: StackSlot, ty: &TypeRc) -> Result<Value> {
        match slot {
            StackSlot::Null => Ok(Value::Null),
            StackSlot::Int32(_) | StackSlot::Int64(_) | StackSlot::Float(_) | StackSlot::Double(_) => {
                Ok(value_of_slot(slot, ty))
            }
            StackSlot::Object(index) => {
                let value = self.stack.managed(index)?.clone();
                match (ty.primitive(), primitive_slot(&value)) {
                    (Some(_), Some(inner)) => Ok(value_of_slot(inner, ty)),
                    _ => Ok(value),
                }
            }
            StackSlot::ValueType(d) => self.snapshot(domain, d as usize),
            StackSlot::StackRef(addr) => match self.stack.get(addr as usize)? {
                StackSlot::ValueTypeDescriptor { .. } => self.snapshot(domain, addr as usize),
                inner => self.read_value(domain, inner, &element_type(ty)),
            },
            StackSlot::FieldRef { .. } | StackSlot::ArrayRef { .. } | StackSlot::StaticFieldRef { .. } => {
                let value = self.deref_value(domain, slot)?;
                match (element_type(ty).primitive(), primitive_slot(&value)) {
                    (Some(_), Some(inner)) => Ok(value_of_slot(inner, &element_type(ty))),
                    _ => Ok(value),
                }
            }
            StackSlot::ValueTypeDescriptor { .. } => Err(Error::InvalidStackState(
                "a value type descriptor is not a value".to_string(),
            )),
        }
    }

    /// The value stored at a heap location reference
    pub(crate) fn deref_value(&self, domain: &Domain, slot: StackSlot) -> Result<Value> {
        match slot {
            StackSlot::FieldRef { object, field } => match self.stack.managed(object)? {
                Value::Object(o) => o.field(field as usize),
                _ => Err(Error::InvalidStackState("field reference to a non-object".to_string())),
            },
            StackSlot::ArrayRef { array, index } => match self.stack.managed(array)? {
                Value::Object(o) => o.element(index as usize)?.ok_or_else(|| {
                    Error::InvalidStackState(format!("element reference {} out of range", index))
                }),
                _ => Err(Error::InvalidStackState("element reference to a non-array".to_string())),
            },
            StackSlot::StaticFieldRef { type_index, field } => {
                let registry = domain.registry();
                registry.statics(&registry.type_at(type_index)?)?.get(field as usize)
            }
            other => Err(Error::InvalidStackState(format!(
                "expected a heap reference, found {}",
                other.kind()
            ))),
        }
    }

    /// Pushes a copy of the location at `addr`
    pub(crate) fn push_copy(&mut self, domain: &Domain, addr: usize) -> Result<()> {
        match self.stack.get(addr)? {
            StackSlot::Object(index) => {
                let value = value_copy(self.stack.managed(index)?)?;
                self.stack.push_object(value)
            }
            StackSlot::ValueType(d) => {
                let (type_index, _) = self.stack.block_header(d as usize)?;
                let ty = domain.registry().type_at(type_index)?;
                let copy = self.alloc_value_type(domain, &ty)?;
                self.copy_value_type(domain, d as usize, copy)?;
                self.stack.push(StackSlot::ValueType(addr32(copy)?))
            }
            StackSlot::FieldRef { object, field } => {
                let value = self.stack.managed(object)?.clone();
                let object = self.stack.push_managed(value)?;
                self.stack.push(StackSlot::FieldRef { object, field })
            }
            StackSlot::ArrayRef { array, index } => {
                let value = self.stack.managed(array)?.clone();
                let array = self.stack.push_managed(value)?;
                self.stack.push(StackSlot::ArrayRef { array, index })
            }
            StackSlot::ValueTypeDescriptor { .. } => Err(Error::InvalidStackState(
                "cannot copy a value type descriptor".to_string(),
            )),
            other => self.stack.push(other),
        }
    }

    /// What the slot at `addr` holds, valid while the slot stays on the stack
    pub(crate) fn load_carry(&self, addr: usize) -> Result<Carry> {
        Ok(match self.stack.get(addr)? {
            StackSlot::Object(index) => Carry::Value(self.stack.managed(index)?.clone()),
            StackSlot::ValueType(d) => Carry::Block(d as usize),
            StackSlot::FieldRef { object, field } => Carry::FieldRef {
                object: self.stack.managed(object)?.clone(),
                field,
            },
            StackSlot::ArrayRef { array, index } => Carry::ArrayRef {
                array: self.stack.managed(array)?.clone(),
                index,
            },
            StackSlot::ValueTypeDescriptor { .. } => {
                return Err(Error::InvalidStackState(
                    "a value type descriptor is not a value".to_string(),
                ))
            }
            other => Carry::Slot(other),
        })
    }

    /// Makes a carry independent of the stack by boxing a block
    pub(crate) fn detach(&self, domain: &Domain, carry: Carry) -> Result<Carry> {
        match carry {
            Carry::Block(d) => Ok(Carry::Value(self.snapshot(domain, d)?)),
            other => Ok(other),
        }
    }

    /// Pushes a carried value as a location of type `ty`
    pub(crate) fn push_carry(&mut self, domain: &Domain, carry: Carry, ty: &TypeRc) -> Result<()> {
        match carry {
            Carry::Slot(slot) => match (ty.primitive(), slot) {
                (Some(primitive), StackSlot::Int32(v)) => self.stack.push(StackSlot::Int32(primitive.narrow(v))),
                (_, StackSlot::Null) if self.is_inline(domain, ty)? => {
                    let d = self.alloc_value_type(domain, ty)?;
                    self.stack.push(StackSlot::ValueType(addr32(d)?))
                }
                _ => self.stack.push(slot),
            },
            Carry::Value(value) => self.push_value(domain, value, ty),
            Carry::Block(src) => {
                let (type_index, _) = self.stack.block_header(src)?;
                let block_type = domain.registry().type_at(type_index)?;
                let copy = self.alloc_value_type(domain, &block_type)?;
                self.copy_value_type(domain, src, copy)?;
                self.stack.push(StackSlot::ValueType(addr32(copy)?))
            }
            Carry::FieldRef { object, field } => {
                let object = self.stack.push_managed(object)?;
                self.stack.push(StackSlot::FieldRef { object, field })
            }
            Carry::ArrayRef { array, index } => {
                let array = self.stack.push_managed(array)?;
                self.stack.push(StackSlot::ArrayRef { array, index })
            }
        }
    }

    /// The host value of a carry stored into a heap location of type `ty`
    pub(crate) fn carry_value(&self, domain: &Domain, carry: Carry, ty: &TypeRc) -> Result<Value> {
        match carry {
            Carry::Slot(StackSlot::Null) => Ok(Value::Null),
            Carry::Slot(slot @ (StackSlot::Int32(_) | StackSlot::Int64(_) | StackSlot::Float(_) | StackSlot::Double(_))) => {
                Ok(value_of_slot(slot, ty))
            }
            Carry::Slot(slot) => Err(Error::UnsupportedReferenceShape(format!(
                "{} stored outside the evaluation stack",
                slot.kind()
            ))),
            Carry::Value(value) => match (ty.primitive(), primitive_slot(&value)) {
                (Some(_), Some(slot)) => Ok(value_of_slot(slot, ty)),
                _ => Ok(value),
            },
            Carry::Block(d) => self.snapshot(domain, d),
            Carry::FieldRef { .. } | Carry::ArrayRef { .. } => Err(Error::UnsupportedReferenceShape(
                "managed reference stored outside the evaluation stack".to_string(),
            )),
        }
    }

    /// Stores a carry into the stack location at `addr`
    pub(crate) fn store_into(&mut self, domain: &Domain, addr: usize, carry: Carry) -> Result<()> {
        let current = self.stack.get(addr)?;
        match carry {
            Carry::Block(src) => match current {
                StackSlot::ValueType(dst) => self.copy_value_type(domain, src, dst as usize),
                _ => {
                    let boxed = self.snapshot(domain, src)?;
                    self.store_object(addr, current, boxed)
                }
            },
            Carry::Value(value) => match current {
                StackSlot::ValueType(dst) => self.write_boxed(domain, dst as usize, &value),
                StackSlot::Object(_) | StackSlot::Null => self.store_object(addr, current, value),
                _ => match primitive_slot(&value) {
                    Some(slot) => self.stack.set(addr, slot),
                    None => self.store_object(addr, current, value),
                },
            },
            Carry::Slot(slot) => match (current, slot) {
                (StackSlot::Object(index), StackSlot::Null) => self.stack.set_managed(index, Value::Null),
                (StackSlot::ValueType(dst), StackSlot::Null) => self.write_boxed(domain, dst as usize, &Value::Null),
                _ => self.stack.set(addr, slot),
            },
            Carry::FieldRef { object, field } => {
                let object = self.stack.push_managed(object)?;
                self.stack.set(addr, StackSlot::FieldRef { object, field })
            }
            Carry::ArrayRef { array, index } => {
                let array = self.stack.push_managed(array)?;
                self.stack.set(addr, StackSlot::ArrayRef { array, index })
            }
        }
    }

    /// Stores the top slot into the location at `addr` and pops it
    pub(crate) fn store_top(&mut self, domain: &Domain, addr: usize) -> Result<()> {
        let carry = self.load_carry(self.stack.top_addr()?)?;
        self.store_into(domain, addr, carry)?;
        self.stack.pop()
    }

    /// What instance field access through `slot` reaches
    pub(crate) fn target_of(&self, domain: &Domain, slot: StackSlot) -> Result<Target> {
        match slot {
            StackSlot::Null => Ok(Target::Null),
            StackSlot::Object(index) => object_target(self.stack.managed(index)?),
            StackSlot::ValueType(d) => Ok(Target::Block(d as usize)),
            StackSlot::StackRef(addr) => match self.stack.get(addr as usize)? {
                StackSlot::ValueTypeDescriptor { .. } => Ok(Target::Block(addr as usize)),
                inner => self.target_of(domain, inner),
            },
            StackSlot::FieldRef { .. } | StackSlot::ArrayRef { .. } | StackSlot::StaticFieldRef { .. } => {
                object_target(&self.deref_value(domain, slot)?)
            }
            other => Err(Error::InvalidStackState(format!(
                "{} has no fields",
                other.kind()
            ))),
        }
    }

    /// What loading through the address in `slot` yields
    pub(crate) fn deref_carry(&self, domain: &Domain, slot: StackSlot) -> Result<Carry> {
        match slot {
            StackSlot::StackRef(addr) => match self.stack.get(addr as usize)? {
                StackSlot::ValueTypeDescriptor { .. } => Ok(Carry::Block(addr as usize)),
                _ => self.load_carry(addr as usize),
            },
            StackSlot::FieldRef { .. } | StackSlot::ArrayRef { .. } | StackSlot::StaticFieldRef { .. } => {
                Ok(Carry::Value(self.deref_value(domain, slot)?))
            }
            other => Err(Error::InvalidStackState(format!(
                "expected an address, found {}",
                other.kind()
            ))),
        }
    }

    /// Stores a carry through the address in `slot`
    ///
    /// Returns false if the address is an element reference that is out of range.
    pub(crate) fn store_through(&mut self, domain: &Domain, slot: StackSlot, carry: Carry, ty: &TypeRc) -> Result<bool> {
        match slot {
            StackSlot::StackRef(addr) => {
                let addr = addr as usize;
                match self.stack.get(addr)? {
                    StackSlot::ValueTypeDescriptor { .. } => match carry {
                        Carry::Block(src) => self.copy_value_type(domain, src, addr)?,
                        Carry::Value(value) => self.write_boxed(domain, addr, &value)?,
                        Carry::Slot(StackSlot::Null) => self.write_boxed(domain, addr, &Value::Null)?,
                        _ => {
                            return Err(Error::InvalidStackState(
                                "store of a non value type into a block".to_string(),
                            ))
                        }
                    },
                    _ => self.store_into(domain, addr, carry)?,
                }
                Ok(true)
            }
            StackSlot::FieldRef { object, field } => {
                let value = self.carry_value(domain, carry, ty)?;
                match self.stack.managed(object)? {
                    Value::Object(o) => o.set_field(field as usize, value)?,
                    _ => return Err(Error::InvalidStackState("field reference to a non-object".to_string())),
                }
                Ok(true)
            }
            StackSlot::ArrayRef { array, index } => {
                let value = self.carry_value(domain, carry, ty)?;
                match self.stack.managed(array)? {
                    Value::Object(o) => o.set_element(index as usize, value),
                    _ => Err(Error::InvalidStackState("element reference to a non-array".to_string())),
                }
            }
            StackSlot::StaticFieldRef { type_index, field } => {
                let value = self.carry_value(domain, carry, ty)?;
                let registry = domain.registry();
                registry.statics(&registry.type_at(type_index)?)?.set(field as usize, value)?;
                Ok(true)
            }
            other => Err(Error::InvalidStackState(format!(
                "expected an address, found {}",
                other.kind()
            ))),
        }
    }
}

fn object_target(value: &Value) -> Result<Target> {
    match value {
        Value::Object(object) => Ok(Target::Object(object.clone())),
        Value::Null => Ok(Target::Null),
        other => Err(Error::InvalidStackState(format!("{:?} has no fields", other))),
    }
}
