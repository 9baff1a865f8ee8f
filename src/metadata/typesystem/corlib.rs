//! The built-in core library every registry starts with.
//!
//! It provides the primitives, `System.Object`, `System.ValueType`, `System.String`,
//! `System.Array` and the exception types the engine raises for runtime faults.

use strum::IntoEnumIterator;

use crate::{
    engine::{ExceptionData, Value},
    metadata::typesystem::{NativeMethod, NativeModule, NativeType, Primitive},
    Error,
};

/// Name of the core library module
pub const CORE_LIBRARY: &str = "System.Private.CoreLib";

/// `System.Object`
pub const OBJECT: &str = "System.Object";
/// `System.ValueType`
pub const VALUE_TYPE: &str = "System.ValueType";
/// `System.String`
pub const STRING: &str = "System.String";
/// `System.Array`
pub const ARRAY: &str = "System.Array";
/// `System.Attribute`
pub const ATTRIBUTE: &str = "System.Attribute";
/// `System.Exception`
pub const EXCEPTION: &str = "System.Exception";
/// Raised when a null reference is dereferenced
pub const NULL_REFERENCE_EXCEPTION: &str = "System.NullReferenceException";
/// Raised on integer division by zero
pub const DIVIDE_BY_ZERO_EXCEPTION: &str = "System.DivideByZeroException";
/// Raised by failing casts
pub const INVALID_CAST_EXCEPTION: &str = "System.InvalidCastException";
/// Raised by out of range array accesses
pub const INDEX_OUT_OF_RANGE_EXCEPTION: &str = "System.IndexOutOfRangeException";
/// Raised for invalid arguments
pub const ARGUMENT_EXCEPTION: &str = "System.ArgumentException";
/// Raised for negative array sizes
pub const OVERFLOW_EXCEPTION: &str = "System.OverflowException";

fn exception_type(name: &str, base: &str) -> NativeType {
    NativeType::class("System", name)
        .extends(base)
        .backed_by::<ExceptionData>()
        .default_with(|| Box::new(ExceptionData::default()))
        .method(NativeMethod::constructor(|call| match call.receiver {
            // Base constructor call from an interpreted subclass.
            Some(_) => Ok(Value::Null),
            None => Ok(call.construct(ExceptionData::default())),
        }))
        .method(
            NativeMethod::constructor(|call| {
                let message = call.arg(0)?.as_str().map(str::to_string).unwrap_or_default();
                match call.receiver {
                    Some(_) => Ok(Value::Null),
                    None => Ok(call.construct(ExceptionData::new(message))),
                }
            })
            .param(STRING),
        )
        .method(
            NativeMethod::new("get_Message", |call| {
                let this = call.this()?;
                let message = this
                    .as_object()
                    .and_then(|object| object.with_native(|data: &ExceptionData| data.message.clone()));
                Ok(message.map(Value::from).unwrap_or(Value::Null))
            })
            .instance()
            .returns(STRING),
        )
}

/// Builds the core library module.
#[must_use]
pub fn core_library() -> NativeModule {
    let mut module = NativeModule::new(CORE_LIBRARY)
        .with_type(
            NativeType::class("System", "Object")
                .without_base()
                .method(NativeMethod::constructor(|call| match call.receiver {
                    Some(_) => Ok(Value::Null),
                    None => Ok(call.construct(())),
                })),
        )
        .with_type(NativeType::class("System", "ValueType"))
        .with_type(NativeType::class("System", "Array"))
        .with_type(NativeType::class("System", "Attribute"))
        .with_type(
            NativeType::class("System", "String")
                .method(
                    NativeMethod::new("get_Length", |call| {
                        let length = call.this()?.as_str().map_or(0, |s| s.chars().count());
                        i32::try_from(length)
                            .map(Value::I32)
                            .map_err(|_| Error::InvalidStackState("string too long".to_string()))
                    })
                    .instance()
                    .returns("System.Int32"),
                )
                .method(
                    NativeMethod::new("Concat", |call| {
                        let mut joined = String::new();
                        for arg in call.args {
                            if let Some(part) = arg.as_str() {
                                joined.push_str(part);
                            }
                        }
                        Ok(Value::from(joined))
                    })
                    .param(STRING)
                    .param(STRING)
                    .returns(STRING),
                ),
        )
        .with_type(exception_type("Exception", OBJECT))
        .with_type(exception_type("NullReferenceException", EXCEPTION))
        .with_type(exception_type("DivideByZeroException", EXCEPTION))
        .with_type(exception_type("InvalidCastException", EXCEPTION))
        .with_type(exception_type("IndexOutOfRangeException", EXCEPTION))
        .with_type(exception_type("ArgumentException", EXCEPTION))
        .with_type(exception_type("OverflowException", EXCEPTION));

    for primitive in Primitive::iter() {
        module = module.with_type(NativeType::primitive_type(primitive));
    }
    module
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_library_contents() {
        let module = core_library();
        assert_eq!(module.name(), CORE_LIBRARY);
        for name in [OBJECT, VALUE_TYPE, STRING, ARRAY, EXCEPTION, NULL_REFERENCE_EXCEPTION, "System.Int32", "System.Void"] {
            assert!(module.find(name).is_some(), "missing {}", name);
        }
        assert!(module.find(OBJECT).unwrap().base.is_none());
        assert_eq!(module.find("System.Int32").unwrap().primitive, Some(Primitive::Int32));
        assert_eq!(
            module.find(DIVIDE_BY_ZERO_EXCEPTION).unwrap().base.as_deref(),
            Some(EXCEPTION)
        );
    }
}
