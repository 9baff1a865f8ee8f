//! Parallel host calls into one domain.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rayon::prelude::*;

use dotrun::prelude::*;

fn counter_domain() -> Domain {
    let mut builder = ModuleBuilder::new("Sample");
    let math = builder.define_type(TypeDef::class("Sample", "Math"));
    let sum = builder
        .define_method(
            math,
            MethodDef::new("SumTo").param(TypeSig::int32()).returns(TypeSig::int32()),
        )
        .unwrap();
    // sum of 1..=n with a counting loop
    builder
        .set_body(
            sum,
            MethodBody::new(vec![
                Instruction::LdcI4(0),
                Instruction::StLoc(0),
                Instruction::LdcI4(1),
                Instruction::StLoc(1),
                Instruction::LdLoc(1),
                Instruction::LdArg(0),
                Instruction::Bgt(16),
                Instruction::LdLoc(0),
                Instruction::LdLoc(1),
                Instruction::Add,
                Instruction::StLoc(0),
                Instruction::LdLoc(1),
                Instruction::LdcI4(1),
                Instruction::Add,
                Instruction::StLoc(1),
                Instruction::Br(4),
                Instruction::LdLoc(0),
                Instruction::Ret,
            ])
            .with_locals(vec![TypeSig::int32(), TypeSig::int32()]),
        )
        .unwrap();

    let hello = builder.user_string("hello");
    builder
        .define_method(
            math,
            MethodDef::new("Greeting").returns(TypeSig::string()).body(MethodBody::new(vec![
                Instruction::LdStr(hello),
                Instruction::Ret,
            ])),
        )
        .unwrap();

    let domain = Domain::new();
    domain.load_module(builder.build()).unwrap();
    domain
}

#[test]
fn parallel_invocations_are_independent() {
    let domain = counter_domain();
    let method = domain.find_method("Sample.Math", "SumTo", 1).unwrap();

    let results: Vec<(i32, i32)> = (0..200)
        .into_par_iter()
        .map(|n| {
            let value = domain.invoke(&method, None, &[Value::I32(n)]).unwrap().unwrap();
            (n, value.as_i32().unwrap())
        })
        .collect();

    for (n, sum) in results {
        assert_eq!(sum, n * (n + 1) / 2);
    }

    let pool = domain.pool();
    assert!(pool.created() <= rayon::current_num_threads() as u64 + 1);
    assert_eq!(pool.idle() as u64, pool.created());
    assert!(pool.live_ids().is_empty());
}

#[test]
fn interned_strings_are_shared_across_threads() {
    let domain = counter_domain();
    let first = domain
        .invoke_by_name("Sample.Math", "Greeting", None, &[])
        .unwrap()
        .unwrap();

    let all_same = (0..64).into_par_iter().all(|_| {
        let value = domain
            .invoke_by_name("Sample.Math", "Greeting", None, &[])
            .unwrap()
            .unwrap();
        match (&value, &first) {
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    });
    assert!(all_same);
}

#[test]
fn streaming_contexts_in_parallel() {
    let domain = counter_domain();
    let method = domain.find_method("Sample.Math", "SumTo", 1).unwrap();
    let failures = Arc::new(AtomicUsize::new(0));

    (0..100).into_par_iter().for_each(|n| {
        let mut ctx = domain.begin_invoke(&method).unwrap();
        ctx.push_i32(n).unwrap();
        ctx.invoke().unwrap();
        if ctx.read_i32().unwrap() != n * (n + 1) / 2 {
            failures.fetch_add(1, Ordering::SeqCst);
        }
    });
    assert_eq!(failures.load(Ordering::SeqCst), 0);
}

/// Sample.Slow's type initializer calls Host.Gate::Hold, which reports that it started and
/// then sleeps, before storing `count = 10`.
fn slow_initializer_domain(entered: Arc<AtomicBool>, runs: Arc<AtomicUsize>) -> Domain {
    let host = NativeModule::new("Host").with_type(NativeType::class("Host", "Gate").method(NativeMethod::new(
        "Hold",
        move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            entered.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Ok(Value::Null)
        },
    )));

    let mut builder = ModuleBuilder::new("Sample");
    let slow = builder.define_type(TypeDef::class("Sample", "Slow"));
    let count = builder
        .define_field(slow, FieldDef::new_static("count", TypeSig::int32()))
        .unwrap();
    let hold = builder.method_ref(MethodRef::new(TypeSig::named("Host.Gate"), "Hold"));
    builder
        .define_method(
            slow,
            MethodDef::type_initializer().body(MethodBody::new(vec![
                Instruction::Call(hold),
                Instruction::LdcI4(10),
                Instruction::StSFld(count),
                Instruction::Ret,
            ])),
        )
        .unwrap();
    builder
        .define_method(
            slow,
            MethodDef::new("Get").returns(TypeSig::int32()).body(MethodBody::new(vec![
                Instruction::LdSFld(count),
                Instruction::Ret,
            ])),
        )
        .unwrap();

    let domain = Domain::builder().native_module(host).build();
    domain.load_module(builder.build()).unwrap();
    domain
}

#[test]
fn concurrent_callers_wait_for_the_type_initializer() {
    let entered = Arc::new(AtomicBool::new(false));
    let runs = Arc::new(AtomicUsize::new(0));
    let domain = slow_initializer_domain(entered.clone(), runs.clone());
    let get = |domain: &Domain| {
        domain
            .invoke_by_name("Sample.Slow", "Get", None, &[])
            .unwrap()
            .unwrap()
            .as_i32()
            .unwrap()
    };

    let first = {
        let domain = domain.clone();
        thread::spawn(move || get(&domain))
    };
    while !entered.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    // the initializer is still sleeping on the other thread
    let concurrent = get(&domain);

    assert_eq!(first.join().unwrap(), 10);
    assert_eq!(concurrent, 10);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
