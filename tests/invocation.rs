//! Host calls into interpreted code: argument marshaling, recursion limits, statics, virtual
//! dispatch and generic instantiation.

use dotrun::prelude::*;

fn load(domain: &Domain, builder: ModuleBuilder) {
    domain.load_module(builder.build()).unwrap();
}

fn math_module() -> ModuleBuilder {
    let mut builder = ModuleBuilder::new("Sample");
    let math = builder.define_type(TypeDef::class("Sample", "Math"));
    builder
        .define_method(
            math,
            MethodDef::new("Add")
                .param(TypeSig::int32())
                .param(TypeSig::int32())
                .returns(TypeSig::int32())
                .body(MethodBody::new(vec![
                    Instruction::LdArg(0),
                    Instruction::LdArg(1),
                    Instruction::Add,
                    Instruction::Ret,
                ])),
        )
        .unwrap();

    let fact = builder
        .define_method(
            math,
            MethodDef::new("Fact").param(TypeSig::int32()).returns(TypeSig::int32()),
        )
        .unwrap();
    builder
        .set_body(
            fact,
            MethodBody::new(vec![
                Instruction::LdArg(0),
                Instruction::LdcI4(1),
                Instruction::Bgt(5),
                Instruction::LdcI4(1),
                Instruction::Ret,
                Instruction::LdArg(0),
                Instruction::LdArg(0),
                Instruction::LdcI4(1),
                Instruction::Sub,
                Instruction::Call(fact),
                Instruction::Mul,
                Instruction::Ret,
            ]),
        )
        .unwrap();

    for (name, sig) in [
        ("EchoInt", TypeSig::int32()),
        ("EchoLong", TypeSig::int64()),
        ("EchoFloat", TypeSig::single()),
        ("EchoDouble", TypeSig::double()),
        ("EchoBool", TypeSig::boolean()),
        ("EchoObject", TypeSig::object()),
    ] {
        builder
            .define_method(
                math,
                MethodDef::new(name)
                    .param(sig.clone())
                    .returns(sig)
                    .body(MethodBody::new(vec![Instruction::LdArg(0), Instruction::Ret])),
            )
            .unwrap();
    }

    let int32 = builder.type_spec(TypeSig::int32());
    builder
        .define_method(
            math,
            MethodDef::new("Increment")
                .param(TypeSig::int32().by_ref())
                .body(MethodBody::new(vec![
                    Instruction::LdArg(0),
                    Instruction::LdArg(0),
                    Instruction::LdObj(int32),
                    Instruction::LdcI4(1),
                    Instruction::Add,
                    Instruction::StObj(int32),
                    Instruction::Ret,
                ])),
        )
        .unwrap();
    builder
}

#[test]
fn adds_through_reflection_call() {
    let domain = Domain::new();
    load(&domain, math_module());

    let result = domain
        .invoke_by_name("Sample.Math", "Add", None, &[Value::I32(40), Value::I32(2)])
        .unwrap();
    assert_eq!(result.unwrap().as_i32().unwrap(), 42);
}

#[test]
fn argument_count_is_checked_before_anything_runs() {
    let domain = Domain::new();
    load(&domain, math_module());
    let add = domain.find_method("Sample.Math", "Add", 2).unwrap();

    let err = domain.invoke(&add, None, &[Value::I32(1)]).unwrap_err();
    assert!(matches!(
        err,
        Error::ArgumentCountMismatch { expected: 2, found: 1 }
    ));
    assert_eq!(domain.pool().created(), 0);

    let mut ctx = domain.begin_invoke(&add).unwrap();
    ctx.push_i32(1).unwrap();
    assert!(matches!(
        ctx.invoke(),
        Err(Error::ArgumentCountMismatch { expected: 2, found: 1 })
    ));
    assert_eq!(ctx.pushed(), 1);
    assert!(ctx.read_i32().is_err());
}

#[test]
fn argument_types_are_checked() {
    let domain = Domain::new();
    load(&domain, math_module());
    let add = domain.find_method("Sample.Math", "Add", 2).unwrap();

    let err = domain
        .invoke(&add, None, &[Value::I32(1), Value::from("two")])
        .unwrap_err();
    assert!(matches!(err, Error::ArgumentTypeMismatch { .. }));
}

#[test]
fn streaming_primitives() {
    let domain = Domain::new();
    load(&domain, math_module());

    let echo = domain.find_method("Sample.Math", "EchoInt", 1).unwrap();
    let mut ctx = domain.begin_invoke(&echo).unwrap();
    ctx.push_i32(-17).unwrap();
    ctx.invoke().unwrap();
    assert_eq!(ctx.read_i32().unwrap(), -17);
    drop(ctx);

    let echo = domain.find_method("Sample.Math", "EchoLong", 1).unwrap();
    let mut ctx = domain.begin_invoke(&echo).unwrap();
    ctx.push_i64(i64::MAX).unwrap();
    ctx.invoke().unwrap();
    assert_eq!(ctx.read_i64().unwrap(), i64::MAX);
    drop(ctx);

    let echo = domain.find_method("Sample.Math", "EchoFloat", 1).unwrap();
    let mut ctx = domain.begin_invoke(&echo).unwrap();
    ctx.push_f32(1.5).unwrap();
    ctx.invoke().unwrap();
    assert_eq!(ctx.read_f32().unwrap(), 1.5);
    drop(ctx);

    let echo = domain.find_method("Sample.Math", "EchoDouble", 1).unwrap();
    let mut ctx = domain.begin_invoke(&echo).unwrap();
    ctx.push_f64(-0.25).unwrap();
    ctx.invoke().unwrap();
    assert_eq!(ctx.read_f64().unwrap(), -0.25);
    drop(ctx);

    let echo = domain.find_method("Sample.Math", "EchoBool", 1).unwrap();
    let mut ctx = domain.begin_invoke(&echo).unwrap();
    ctx.push_bool(true).unwrap();
    ctx.invoke().unwrap();
    assert!(ctx.read_bool().unwrap());
    drop(ctx);

    let echo = domain.find_method("Sample.Math", "EchoObject", 1).unwrap();
    let mut ctx = domain.begin_invoke(&echo).unwrap();
    ctx.push_null().unwrap();
    ctx.invoke().unwrap();
    assert!(ctx.read_value().unwrap().is_null());
    drop(ctx);

    // every context went back to the pool
    assert_eq!(domain.pool().idle() as u64, domain.pool().created());
}

#[test]
fn by_reference_argument_writes_back() {
    let domain = Domain::new();
    load(&domain, math_module());
    let increment = domain.find_method("Sample.Math", "Increment", 1).unwrap();

    let mut ctx = domain.begin_invoke(&increment).unwrap();
    ctx.push_i32(41).unwrap();
    ctx.push_reference(0).unwrap();
    ctx.invoke().unwrap();
    assert_eq!(ctx.read_i32_at(0).unwrap(), 42);

    assert!(matches!(
        ctx.push_reference(5),
        Err(Error::InvalidStackState(_))
    ));
}

#[test]
fn by_reference_parameters_need_a_context() {
    let domain = Domain::new();
    load(&domain, math_module());
    let increment = domain.find_method("Sample.Math", "Increment", 1).unwrap();

    assert!(matches!(
        domain.invoke(&increment, None, &[Value::I32(1)]),
        Err(Error::ArgumentTypeMismatch { .. })
    ));
}

#[test]
fn recursion_and_call_depth() {
    let domain = Domain::with_config(DomainConfig::default().with_max_call_depth(8));
    load(&domain, math_module());

    let fact = |n: i32| {
        domain
            .invoke_by_name("Sample.Math", "Fact", None, &[Value::I32(n)])
            .map(|v| v.and_then(|v| v.as_i32().ok()))
    };
    assert_eq!(fact(5).unwrap(), Some(120));
    assert!(matches!(fact(20), Err(Error::CallDepthExceeded(8))));

    // the interpreter that overflowed is clean again
    assert_eq!(fact(6).unwrap(), Some(720));
}

#[test]
fn type_initializer_runs_once() {
    let mut builder = ModuleBuilder::new("Sample");
    let counter = builder.define_type(TypeDef::class("Sample", "Counter"));
    let count = builder
        .define_field(counter, FieldDef::new_static("count", TypeSig::int32()))
        .unwrap();
    builder
        .define_method(
            counter,
            MethodDef::type_initializer().body(MethodBody::new(vec![
                Instruction::LdcI4(10),
                Instruction::StSFld(count),
                Instruction::Ret,
            ])),
        )
        .unwrap();
    builder
        .define_method(
            counter,
            MethodDef::new("Next").returns(TypeSig::int32()).body(MethodBody::new(vec![
                Instruction::LdSFld(count),
                Instruction::LdcI4(1),
                Instruction::Add,
                Instruction::Dup,
                Instruction::StSFld(count),
                Instruction::Ret,
            ])),
        )
        .unwrap();

    let domain = Domain::new();
    load(&domain, builder);

    let next = || {
        domain
            .invoke_by_name("Sample.Counter", "Next", None, &[])
            .unwrap()
            .unwrap()
            .as_i32()
            .unwrap()
    };
    assert_eq!(next(), 11);
    assert_eq!(next(), 12);
}

fn zoo_module() -> ModuleBuilder {
    let mut builder = ModuleBuilder::new("Zoo");

    let animal = builder.define_type(TypeDef::class("Sample", "Animal"));
    let generic = builder.user_string("...");
    builder
        .define_method(animal, MethodDef::constructor().body(MethodBody::new(vec![Instruction::Ret])))
        .unwrap();
    let speak = builder
        .define_method(
            animal,
            MethodDef::new("Speak")
                .instance()
                .virtual_method()
                .returns(TypeSig::string())
                .body(MethodBody::new(vec![Instruction::LdStr(generic), Instruction::Ret])),
        )
        .unwrap();

    let dog = builder.define_type(TypeDef::class("Sample", "Dog").extends(TypeSig::def(animal)));
    let woof = builder.user_string("woof");
    builder
        .define_method(dog, MethodDef::constructor().body(MethodBody::new(vec![Instruction::Ret])))
        .unwrap();
    builder
        .define_method(
            dog,
            MethodDef::new("Speak")
                .instance()
                .virtual_method()
                .returns(TypeSig::string())
                .body(MethodBody::new(vec![Instruction::LdStr(woof), Instruction::Ret])),
        )
        .unwrap();

    let keeper = builder.define_type(TypeDef::class("Sample", "Keeper"));
    builder
        .define_method(
            keeper,
            MethodDef::new("Describe")
                .param(TypeSig::def(animal))
                .returns(TypeSig::string())
                .body(MethodBody::new(vec![
                    Instruction::LdArg(0),
                    Instruction::CallVirt(speak),
                    Instruction::Ret,
                ])),
        )
        .unwrap();

    let hello = builder.user_string("hello, ");
    let concat = builder.method_ref(
        MethodRef::new(TypeSig::string(), "Concat")
            .param(TypeSig::string())
            .param(TypeSig::string())
            .returns(TypeSig::string()),
    );
    builder
        .define_method(
            keeper,
            MethodDef::new("Greet")
                .param(TypeSig::string())
                .returns(TypeSig::string())
                .body(MethodBody::new(vec![
                    Instruction::LdStr(hello),
                    Instruction::LdArg(0),
                    Instruction::Call(concat),
                    Instruction::Ret,
                ])),
        )
        .unwrap();

    builder
        .define_method(
            keeper,
            MethodDef::new("Identity")
                .generic_params(&["T"])
                .param(TypeSig::param("T"))
                .returns(TypeSig::param("T"))
                .body(MethodBody::new(vec![Instruction::LdArg(0), Instruction::Ret])),
        )
        .unwrap();

    builder
}

#[test]
fn virtual_calls_reach_the_override() {
    let domain = Domain::new();
    load(&domain, zoo_module());

    let dog = domain.instantiate("Sample.Dog", &[]).unwrap();
    let from_interpreted = domain
        .invoke_by_name("Sample.Keeper", "Describe", None, &[dog.clone()])
        .unwrap()
        .unwrap();
    assert_eq!(from_interpreted.as_str(), Some("woof"));

    let base_speak = domain.find_method("Sample.Animal", "Speak", 0).unwrap();
    let from_host = domain.invoke(&base_speak, Some(dog), &[]).unwrap().unwrap();
    assert_eq!(from_host.as_str(), Some("woof"));

    let animal = domain.instantiate("Sample.Animal", &[]).unwrap();
    let plain = domain.invoke(&base_speak, Some(animal), &[]).unwrap().unwrap();
    assert_eq!(plain.as_str(), Some("..."));
}

#[test]
fn corlib_string_concat() {
    let domain = Domain::new();
    load(&domain, zoo_module());

    let greeting = domain
        .invoke_by_name("Sample.Keeper", "Greet", None, &[Value::from("bob")])
        .unwrap()
        .unwrap();
    assert_eq!(greeting.as_str(), Some("hello, bob"));
}

#[test]
fn generic_method_instantiation() {
    let domain = Domain::new();
    load(&domain, zoo_module());

    let result = domain
        .invoke_generic("Sample.Keeper", "Identity", &["System.Int32"], None, &[Value::I32(3)])
        .unwrap()
        .unwrap();
    assert_eq!(result.as_i32().unwrap(), 3);

    let result = domain
        .invoke_generic("Sample.Keeper", "Identity", &["System.String"], None, &[Value::from("x")])
        .unwrap()
        .unwrap();
    assert_eq!(result.as_str(), Some("x"));

    assert!(matches!(
        domain.invoke_generic("Sample.Keeper", "Identity", &[], None, &[Value::I32(3)]),
        Err(Error::GenericArityMismatch { .. })
    ));
}

#[test]
fn constructors_initialize_fields() {
    let mut builder = ModuleBuilder::new("Sample");
    let holder = builder.define_type(TypeDef::class("Sample", "Holder"));
    let value = builder
        .define_field(holder, FieldDef::new("value", TypeSig::int32()))
        .unwrap();
    builder
        .define_method(
            holder,
            MethodDef::constructor()
                .param(TypeSig::int32())
                .body(MethodBody::new(vec![
                    Instruction::LdArg(0),
                    Instruction::LdArg(1),
                    Instruction::StFld(value),
                    Instruction::Ret,
                ])),
        )
        .unwrap();
    builder
        .define_method(
            holder,
            MethodDef::new("Get")
                .instance()
                .returns(TypeSig::int32())
                .body(MethodBody::new(vec![
                    Instruction::LdArg(0),
                    Instruction::LdFld(value),
                    Instruction::Ret,
                ])),
        )
        .unwrap();

    let domain = Domain::new();
    load(&domain, builder);

    let instance = domain.instantiate("Sample.Holder", &[Value::I32(5)]).unwrap();
    let got = domain
        .invoke_by_name("Sample.Holder", "Get", Some(instance), &[])
        .unwrap()
        .unwrap();
    assert_eq!(got.as_i32().unwrap(), 5);

    assert!(matches!(
        domain.instantiate("Sample.Holder", &[Value::I32(1), Value::I32(2)]),
        Err(Error::MethodNotFound { .. })
    ));
}
