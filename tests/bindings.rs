//! Method redirections, field bindings and the registration lifecycle of binding tables.

use std::any::Any;
use std::sync::{
    atomic::{AtomicI32, AtomicUsize, Ordering},
    Arc,
};

use dotrun::engine::{NativeObject, StackSlot};
use dotrun::metadata::module::Module;
use dotrun::metadata::typesystem::{NativeData, Primitive};
use dotrun::prelude::*;

fn host_module() -> NativeModule {
    NativeModule::new("Host")
        .with_type(
            NativeType::class("Host", "Math").method(
                NativeMethod::new("Twice", |call| Ok(Value::I32(call.arg(0)?.as_i32()? * 100)))
                    .param("System.Int32")
                    .returns("System.Int32"),
            ),
        )
        .with_type(
            NativeType::class("Host", "Settings").field(
                NativeField::new("Level", "System.Int32")
                    .static_field()
                    .getter(|_| Ok(Value::I32(1))),
            ),
        )
}

/// Sample.Caller::Run returns Host.Math::Twice(21), Sample.Caller::Level returns
/// Host.Settings::Level
fn caller_module() -> Module {
    let mut builder = ModuleBuilder::new("Sample");
    let caller = builder.define_type(TypeDef::class("Sample", "Caller"));
    let twice = builder.method_ref(
        MethodRef::new(TypeSig::named("Host.Math"), "Twice")
            .param(TypeSig::int32())
            .returns(TypeSig::int32()),
    );
    let level = builder.field_ref(TypeSig::named("Host.Settings"), "Level");
    builder
        .define_method(
            caller,
            MethodDef::new("Run").returns(TypeSig::int32()).body(MethodBody::new(vec![
                Instruction::LdcI4(21),
                Instruction::Call(twice),
                Instruction::Ret,
            ])),
        )
        .unwrap();
    builder
        .define_method(
            caller,
            MethodDef::new("Level").returns(TypeSig::int32()).body(MethodBody::new(vec![
                Instruction::LdSFld(level),
                Instruction::Ret,
            ])),
        )
        .unwrap();
    builder.build()
}

fn domain(config: DomainConfig) -> Domain {
    let domain = Domain::builder().config(config).native_module(host_module()).build();
    domain.load_module(caller_module()).unwrap();
    domain
}

fn run(domain: &Domain, method: &str) -> Result<i32> {
    domain
        .invoke_by_name("Sample.Caller", method, None, &[])?
        .ok_or_else(|| Error::InvalidStackState("no result".to_string()))?
        .as_i32()
}

fn twice_key() -> String {
    method_key("Host.Math", "Twice", &["System.Int32"])
}

#[test]
fn unbound_calls_use_reflection() {
    let domain = domain(DomainConfig::default());
    assert_eq!(run(&domain, "Run").unwrap(), 2100);
    assert_eq!(run(&domain, "Level").unwrap(), 1);
}

#[test]
fn first_redirect_wins() {
    let domain = domain(DomainConfig::default());
    let job = domain
        .initialize_bindings(false, |tables| {
            let key = method_key("Host.Math", "Twice", &["System.Int32"]);
            assert!(tables.register_redirect(key.clone(), |frame| {
                let x = frame.arg_i32(0)?;
                frame.set_result(x * 2);
                Ok(())
            })?);
            assert!(!tables.register_redirect(key, |frame| {
                frame.set_result(-1);
                Ok(())
            })?);
            Ok(())
        })
        .unwrap();
    job.wait().unwrap();

    assert!(domain.bindings().is_frozen());
    assert_eq!(run(&domain, "Run").unwrap(), 42);
}

#[test]
fn registration_after_freeze_fails() {
    let domain = domain(DomainConfig::default());
    domain.initialize_bindings(false, |_| Ok(())).unwrap().wait().unwrap();

    let err = domain
        .bindings()
        .register_redirect(twice_key(), |frame| {
            frame.set_result(0);
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, Error::BindingsFrozen));

    // a second initialization is a no-op
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    domain
        .initialize_bindings(false, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn threaded_initialization() {
    let domain = domain(DomainConfig::default());
    let job = domain
        .initialize_bindings(true, |tables| {
            tables.register_redirect(method_key("Host.Math", "Twice", &["System.Int32"]), |frame| {
                let x = frame.arg_i32(0)?;
                frame.set_result(x + 1);
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();
    job.wait().unwrap();

    assert!(domain.bindings().is_frozen());
    assert_eq!(run(&domain, "Run").unwrap(), 22);
}

#[test]
fn failed_initialization_still_freezes() {
    let domain = domain(DomainConfig::default());
    let result = domain
        .initialize_bindings(false, |_| Err(Error::TypeNotFound("Host.Missing".to_string())))
        .unwrap()
        .wait();
    assert!(matches!(result, Err(Error::TypeNotFound(_))));
    assert!(domain.bindings().is_frozen());
}

#[test]
fn strict_domains_require_bindings() {
    let domain = domain(DomainConfig::strict());
    let err = run(&domain, "Run").unwrap_err();
    match err {
        Error::UnboundNativeMethod(key) => assert_eq!(key, twice_key()),
        other => panic!("expected an unbound native call, got {other:?}"),
    }

    domain
        .initialize_bindings(false, |tables| {
            tables.register_redirect(method_key("Host.Math", "Twice", &["System.Int32"]), |frame| {
                let x = frame.arg_i32(0)?;
                frame.set_result(x * 3);
                Ok(())
            })?;
            Ok(())
        })
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(run(&domain, "Run").unwrap(), 63);
}

#[test]
fn field_getter_binding_replaces_reflection() {
    let domain = domain(DomainConfig::default());
    domain
        .initialize_bindings(false, |tables| {
            tables.register_field_getter(field_key("Host.Settings", "Level"), |_| Ok(Value::I32(7)))?;
            Ok(())
        })
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(run(&domain, "Level").unwrap(), 7);
}

#[derive(Clone, Default)]
struct Pair {
    a: i32,
    b: i32,
}

struct PairBinder {
    redirects: Arc<AtomicUsize>,
}

impl ValueTypeBinder for PairBinder {
    fn type_name(&self) -> &str {
        "Host.Pair"
    }

    fn fields(&self) -> &[Primitive] {
        &[Primitive::Int32, Primitive::Int32]
    }

    fn write_fields(&self, value: &(dyn Any + Send + Sync), out: &mut [StackSlot]) -> Result<()> {
        let pair = value.downcast_ref::<Pair>().ok_or_else(|| Error::InvalidCast {
            from: "native data".to_string(),
            to: "Host.Pair".to_string(),
        })?;
        out[0] = StackSlot::Int32(pair.a);
        out[1] = StackSlot::Int32(pair.b);
        Ok(())
    }

    fn read_fields(&self, input: &[StackSlot]) -> Result<NativeData> {
        Ok(Box::new(Pair {
            a: input[0].as_i32()?,
            b: input[1].as_i32()?,
        }))
    }

    fn register_redirections(&self, tables: &BindingTables) -> Result<()> {
        self.redirects.fetch_add(1, Ordering::SeqCst);
        tables.register_redirect(method_key("Host.Pair", "Sum", &[]), |frame| {
            let fields = frame.this_fields()?;
            let sum = fields[0].as_i32()? + fields[1].as_i32()?;
            frame.set_result(sum);
            Ok(())
        })?;
        Ok(())
    }
}

#[test]
fn value_binders_register_once() {
    let tables = BindingTables::new();
    let redirects = Arc::new(AtomicUsize::new(0));

    let first = Arc::new(PairBinder {
        redirects: redirects.clone(),
    });
    let second = Arc::new(PairBinder {
        redirects: redirects.clone(),
    });
    assert!(tables.register_value_binder(first).unwrap());
    assert!(!tables.register_value_binder(second).unwrap());
    assert_eq!(redirects.load(Ordering::SeqCst), 1);

    tables.freeze().unwrap();
    assert!(tables.value_binder("Host.Pair").unwrap().is_some());
    assert!(tables.redirect("Host.Pair::Sum()").unwrap().is_some());
    assert!(tables.redirect("Host.Pair::Product()").unwrap().is_none());

    let binder = tables.value_binder("Host.Pair").unwrap().unwrap();
    let mut slots = [StackSlot::Null, StackSlot::Null];
    binder.write_fields(&Pair { a: 2, b: 5 }, &mut slots).unwrap();
    assert_eq!(slots, [StackSlot::Int32(2), StackSlot::Int32(5)]);
    let back = binder.read_fields(&slots).unwrap();
    let back = back.downcast_ref::<Pair>().unwrap();
    assert_eq!((back.a, back.b), (2, 5));
}

/// Host.Store::Value is a static host field backed by `cell`; Sample.Store reads and writes
/// it and creates arrays of Host.Point
fn store_domain(cell: Arc<AtomicI32>) -> Domain {
    let read = cell.clone();
    let write = cell;
    let host = NativeModule::new("Host")
        .with_type(
            NativeType::class("Host", "Store").field(
                NativeField::new("Value", "System.Int32")
                    .static_field()
                    .getter(move |_| Ok(Value::I32(read.load(Ordering::SeqCst))))
                    .setter(move |_, value| {
                        write.store(value.as_i32()?, Ordering::SeqCst);
                        Ok(())
                    }),
            ),
        )
        .with_type(NativeType::class("Host", "Point"));

    let mut builder = ModuleBuilder::new("Sample");
    let store = builder.define_type(TypeDef::class("Sample", "Store"));
    let value = builder.field_ref(TypeSig::named("Host.Store"), "Value");
    let point = builder.type_spec(TypeSig::named("Host.Point"));
    builder
        .define_method(
            store,
            MethodDef::new("Read").returns(TypeSig::int32()).body(MethodBody::new(vec![
                Instruction::LdSFld(value),
                Instruction::Ret,
            ])),
        )
        .unwrap();
    builder
        .define_method(
            store,
            MethodDef::new("Write").param(TypeSig::int32()).body(MethodBody::new(vec![
                Instruction::LdArg(0),
                Instruction::StSFld(value),
                Instruction::Ret,
            ])),
        )
        .unwrap();
    builder
        .define_method(
            store,
            MethodDef::new("Make")
                .returns(TypeSig::named("Host.Point").array())
                .body(MethodBody::new(vec![
                    Instruction::LdcI4(3),
                    Instruction::NewArr(point),
                    Instruction::Ret,
                ])),
        )
        .unwrap();

    let domain = Domain::builder().native_module(host).build();
    domain.load_module(builder.build()).unwrap();
    domain
}

fn read_store(domain: &Domain) -> i32 {
    domain
        .invoke_by_name("Sample.Store", "Read", None, &[])
        .unwrap()
        .unwrap()
        .as_i32()
        .unwrap()
}

#[test]
fn field_bindings_work_on_the_stack() {
    let cell = Arc::new(AtomicI32::new(5));
    let domain = store_domain(cell.clone());
    let stored = Arc::new(AtomicI32::new(0));
    let sink = stored.clone();

    domain
        .initialize_bindings(false, move |tables| {
            let key = field_key("Host.Store", "Value");
            assert!(tables.register_field_binding(
                key.clone(),
                |access| access.push_i32(70),
                move |access| {
                    sink.store(access.value_i32()?, Ordering::SeqCst);
                    Ok(())
                },
            )?);
            assert!(!tables.register_field_binding(key.clone(), |access| access.push_i32(-1), |_| Ok(()))?);
            // getters and setters are only consulted without a stack binding
            tables.register_field_getter(key.clone(), |_| Ok(Value::I32(-2)))?;
            tables.register_field_setter(key, |_, _| Ok(()))?;
            Ok(())
        })
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(read_store(&domain), 70);
    domain
        .invoke_by_name("Sample.Store", "Write", None, &[Value::I32(9)])
        .unwrap();
    assert_eq!(stored.load(Ordering::SeqCst), 9);
    // the reflection setter was bypassed
    assert_eq!(cell.load(Ordering::SeqCst), 5);
}

#[test]
fn field_binding_must_push_a_value() {
    let domain = store_domain(Arc::new(AtomicI32::new(0)));
    domain
        .initialize_bindings(false, |tables| {
            tables.register_field_binding(field_key("Host.Store", "Value"), |_| Ok(()), |_| Ok(()))?;
            Ok(())
        })
        .unwrap()
        .wait()
        .unwrap();

    let err = domain
        .invoke_by_name("Sample.Store", "Read", None, &[])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStackState(_)));
}

#[test]
fn unbound_host_fields_use_their_accessors() {
    let cell = Arc::new(AtomicI32::new(5));
    let domain = store_domain(cell.clone());
    domain
        .invoke_by_name("Sample.Store", "Write", None, &[Value::I32(12)])
        .unwrap();
    assert_eq!(cell.load(Ordering::SeqCst), 12);
    assert_eq!(read_store(&domain), 12);
}

#[test]
fn array_factories_fill_new_arrays() {
    let domain = store_domain(Arc::new(AtomicI32::new(0)));
    let point = domain.resolve_type("Host.Point").unwrap();

    let plain = domain.invoke_by_name("Sample.Store", "Make", None, &[]).unwrap().unwrap();
    let plain = plain.as_object().unwrap();
    assert_eq!(plain.len().unwrap(), 3);
    assert!(plain.element(0).unwrap().unwrap().is_null());

    domain
        .initialize_bindings(false, move |tables| {
            tables.register_array_factory("Host.Point", move |len| {
                Ok((0..len)
                    .map(|i| {
                        let data = Box::new(i32::try_from(i).unwrap_or(-1));
                        Value::Object(ObjectRef::native(NativeObject::new(point.clone(), data)))
                    })
                    .collect())
            })?;
            Ok(())
        })
        .unwrap()
        .wait()
        .unwrap();

    let made = domain.invoke_by_name("Sample.Store", "Make", None, &[]).unwrap().unwrap();
    let made = made.as_object().unwrap();
    assert_eq!(made.len().unwrap(), 3);
    let second = made.element(2).unwrap().unwrap();
    assert_eq!(second.as_object().unwrap().with_native(|v: &i32| *v), Some(2));
}
