//! Exception clause selection, finally blocks and unhandled exception reporting.

use dotrun::metadata::sequencepoints::SequencePoints;
use dotrun::prelude::*;

struct Refs {
    exception: Token,
    divide_by_zero: Token,
    argument: Token,
    exception_ctor: Token,
}

fn refs(builder: &mut ModuleBuilder) -> Refs {
    Refs {
        exception: builder.type_spec(TypeSig::named("System.Exception")),
        divide_by_zero: builder.type_spec(TypeSig::named("System.DivideByZeroException")),
        argument: builder.type_spec(TypeSig::named("System.ArgumentException")),
        exception_ctor: builder.method_ref(
            MethodRef::constructor(TypeSig::named("System.Exception")).param(TypeSig::string()),
        ),
    }
}

/// Divides by zero inside two nested try blocks; the inner handler catches `inner`, the outer
/// one catches System.Exception. Returns 2 if the inner handler ran, 3 for the outer one.
fn nested_catch(builder: &mut ModuleBuilder, owner: Token, name: &str, inner: Token, outer: Token) {
    let body = MethodBody::new(vec![
        Instruction::LdcI4(1),
        Instruction::LdcI4(0),
        Instruction::Div,
        Instruction::StLoc(0),
        Instruction::Leave(14),
        // inner handler
        Instruction::Pop,
        Instruction::LdcI4(2),
        Instruction::StLoc(0),
        Instruction::Leave(14),
        Instruction::Leave(14),
        // outer handler
        Instruction::Pop,
        Instruction::LdcI4(3),
        Instruction::StLoc(0),
        Instruction::Leave(14),
        Instruction::LdLoc(0),
        Instruction::Ret,
    ])
    .with_locals(vec![TypeSig::int32()])
    // listed outermost first; selection must not depend on table order
    .with_handler(ExceptionHandler::catch((0, 9), (10, 13), Some(outer)))
    .with_handler(ExceptionHandler::catch((1, 4), (5, 8), Some(inner)));

    builder
        .define_method(owner, MethodDef::new(name).returns(TypeSig::int32()).body(body))
        .unwrap();
}

fn domain_with(builder: ModuleBuilder) -> Domain {
    let domain = Domain::new();
    domain.load_module(builder.build()).unwrap();
    domain
}

fn call_i32(domain: &Domain, type_name: &str, method: &str) -> i32 {
    domain
        .invoke_by_name(type_name, method, None, &[])
        .unwrap()
        .unwrap()
        .as_i32()
        .unwrap()
}

#[test]
fn nearest_matching_handler_catches() {
    let mut builder = ModuleBuilder::new("Sample");
    let refs = refs(&mut builder);
    let owner = builder.define_type(TypeDef::class("Sample", "Handlers"));
    nested_catch(&mut builder, owner, "InnerMatches", refs.divide_by_zero, refs.exception);
    nested_catch(&mut builder, owner, "InnerMisses", refs.argument, refs.exception);

    let domain = domain_with(builder);
    assert_eq!(call_i32(&domain, "Sample.Handlers", "InnerMatches"), 2);
    assert_eq!(call_i32(&domain, "Sample.Handlers", "InnerMisses"), 3);
}

#[test]
fn finally_runs_on_leave() {
    let mut builder = ModuleBuilder::new("Sample");
    let owner = builder.define_type(TypeDef::class("Sample", "Cleanup"));
    let body = MethodBody::new(vec![
        Instruction::LdcI4(1),
        Instruction::StLoc(0),
        Instruction::Leave(8),
        // finally
        Instruction::LdLoc(0),
        Instruction::LdcI4(10),
        Instruction::Mul,
        Instruction::StLoc(0),
        Instruction::EndFinally,
        Instruction::LdLoc(0),
        Instruction::Ret,
    ])
    .with_locals(vec![TypeSig::int32()])
    .with_handler(ExceptionHandler::finally((0, 2), (3, 7)));
    builder
        .define_method(owner, MethodDef::new("Run").returns(TypeSig::int32()).body(body))
        .unwrap();

    let domain = domain_with(builder);
    assert_eq!(call_i32(&domain, "Sample.Cleanup", "Run"), 10);
}

/// Sample.Thrower::Fail throws inside a try/finally that sets `cleaned`;
/// Sample.Thrower::Run calls it inside a catch-all and returns `cleaned`.
fn thrower_module() -> (ModuleBuilder, Token) {
    let mut builder = ModuleBuilder::new("Sample");
    let refs = refs(&mut builder);
    let owner = builder.define_type(TypeDef::class("Sample", "Thrower"));
    let cleaned = builder
        .define_field(owner, FieldDef::new_static("cleaned", TypeSig::int32()))
        .unwrap();
    let boom = builder.user_string("boom");

    let fail = builder
        .define_method(
            owner,
            MethodDef::new("Fail").body(
                MethodBody::new(vec![
                    Instruction::LdStr(boom),
                    Instruction::NewObj(refs.exception_ctor),
                    Instruction::Throw,
                    Instruction::Leave(7),
                    // finally
                    Instruction::LdcI4(1),
                    Instruction::StSFld(cleaned),
                    Instruction::EndFinally,
                    Instruction::Ret,
                ])
                .with_handler(ExceptionHandler::finally((0, 3), (4, 6))),
            ),
        )
        .unwrap();

    builder
        .define_method(
            owner,
            MethodDef::new("Run").returns(TypeSig::int32()).body(
                MethodBody::new(vec![
                    Instruction::Call(fail),
                    Instruction::LdcI4(0),
                    Instruction::StLoc(0),
                    Instruction::Leave(8),
                    // catch
                    Instruction::Pop,
                    Instruction::LdSFld(cleaned),
                    Instruction::StLoc(0),
                    Instruction::Leave(8),
                    Instruction::LdLoc(0),
                    Instruction::Ret,
                ])
                .with_locals(vec![TypeSig::int32()])
                .with_handler(ExceptionHandler::catch((0, 3), (4, 7), Some(refs.exception))),
            ),
        )
        .unwrap();

    (builder, fail)
}

#[test]
fn finally_runs_while_unwinding_to_the_caller() {
    let (builder, _) = thrower_module();
    let domain = domain_with(builder);
    assert_eq!(call_i32(&domain, "Sample.Thrower", "Run"), 1);
}

#[test]
fn unhandled_exception_carries_message_and_trace() {
    let (mut builder, fail) = thrower_module();
    let mut symbols = SequencePoints::new("Thrower.cs");
    symbols.add(fail, 0, 10);
    symbols.add(fail, 2, 12);
    builder.symbols(symbols);
    let domain = domain_with(builder);

    let err = domain
        .invoke_by_name("Sample.Thrower", "Fail", None, &[])
        .unwrap_err();
    let exception = match err {
        Error::Exception(exception) => exception,
        other => panic!("expected an interpreted exception, got {other:?}"),
    };
    assert_eq!(exception.type_name(), "System.Exception");
    assert_eq!(exception.message().as_deref(), Some("boom"));

    let top = &exception.stack_trace()[0];
    assert_eq!(top.method, "Sample.Thrower::Fail");
    assert_eq!(top.offset, 2);
    assert_eq!(top.line, Some(12));

    // the interpreter went back to the pool in a usable state
    assert_eq!(call_i32(&domain, "Sample.Thrower", "Run"), 1);
}

#[test]
fn runtime_faults_are_managed_exceptions() {
    let mut builder = ModuleBuilder::new("Sample");
    let owner = builder.define_type(TypeDef::class("Sample", "Faults"));
    builder
        .define_method(
            owner,
            MethodDef::new("Divide")
                .param(TypeSig::int32())
                .param(TypeSig::int32())
                .returns(TypeSig::int32())
                .body(MethodBody::new(vec![
                    Instruction::LdArg(0),
                    Instruction::LdArg(1),
                    Instruction::Div,
                    Instruction::Ret,
                ])),
        )
        .unwrap();
    let domain = domain_with(builder);

    let err = domain
        .invoke_by_name("Sample.Faults", "Divide", None, &[Value::I32(1), Value::I32(0)])
        .unwrap_err();
    match err {
        Error::Exception(exception) => {
            assert_eq!(exception.type_name(), "System.DivideByZeroException");
            assert_eq!(exception.stack_trace()[0].method, "Sample.Faults::Divide");
        }
        other => panic!("expected an interpreted exception, got {other:?}"),
    }
}

#[test]
fn rethrow_reaches_the_outer_handler() {
    let mut builder = ModuleBuilder::new("Sample");
    let refs = refs(&mut builder);
    let owner = builder.define_type(TypeDef::class("Sample", "Rethrower"));
    let boom = builder.user_string("boom");
    let body = MethodBody::new(vec![
        Instruction::LdStr(boom),
        Instruction::NewObj(refs.exception_ctor),
        Instruction::Throw,
        Instruction::Leave(12),
        // inner catch
        Instruction::Pop,
        Instruction::Rethrow,
        Instruction::Leave(12),
        Instruction::Leave(12),
        // outer catch
        Instruction::Pop,
        Instruction::LdcI4(5),
        Instruction::StLoc(0),
        Instruction::Leave(12),
        Instruction::LdLoc(0),
        Instruction::Ret,
    ])
    .with_locals(vec![TypeSig::int32()])
    .with_handler(ExceptionHandler::catch((0, 3), (4, 6), Some(refs.exception)))
    .with_handler(ExceptionHandler::catch((0, 7), (8, 11), Some(refs.exception)));
    builder
        .define_method(owner, MethodDef::new("Run").returns(TypeSig::int32()).body(body))
        .unwrap();

    let domain = domain_with(builder);
    assert_eq!(call_i32(&domain, "Sample.Rethrower", "Run"), 5);
}
