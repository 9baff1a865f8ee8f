//! Benchmarks for host invocation of interpreted methods.
//!
//! Compares the call surfaces of a domain on the same small methods:
//! - Reflection style calls with an argument slice
//! - Streaming calls through an invocation context
//! - A recursive interpreted workload
//! - A native call through a registered redirection

extern crate dotrun;

use criterion::{criterion_group, criterion_main, Criterion};
use dotrun::prelude::*;
use std::hint::black_box;

fn sample_domain() -> Domain {
    let mut builder = ModuleBuilder::new("Bench");
    let math = builder.define_type(TypeDef::class("Bench", "Math"));
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

    let fib = builder
        .define_method(
            math,
            MethodDef::new("Fib").param(TypeSig::int32()).returns(TypeSig::int32()),
        )
        .unwrap();
    builder
        .set_body(
            fib,
            MethodBody::new(vec![
                Instruction::LdArg(0),
                Instruction::LdcI4(2),
                Instruction::Bge(5),
                Instruction::LdArg(0),
                Instruction::Ret,
                Instruction::LdArg(0),
                Instruction::LdcI4(1),
                Instruction::Sub,
                Instruction::Call(fib),
                Instruction::LdArg(0),
                Instruction::LdcI4(2),
                Instruction::Sub,
                Instruction::Call(fib),
                Instruction::Add,
                Instruction::Ret,
            ]),
        )
        .unwrap();

    let scale = builder.method_ref(
        MethodRef::new(TypeSig::named("Host.Scale"), "Apply")
            .param(TypeSig::int32())
            .returns(TypeSig::int32()),
    );
    builder
        .define_method(
            math,
            MethodDef::new("Scaled")
                .param(TypeSig::int32())
                .returns(TypeSig::int32())
                .body(MethodBody::new(vec![
                    Instruction::LdArg(0),
                    Instruction::Call(scale),
                    Instruction::Ret,
                ])),
        )
        .unwrap();

    let host = NativeModule::new("Host").with_type(
        NativeType::class("Host", "Scale").method(
            NativeMethod::new("Apply", |call| Ok(Value::I32(call.arg(0)?.as_i32()? * 3)))
                .param("System.Int32")
                .returns("System.Int32"),
        ),
    );
    let domain = Domain::builder().native_module(host).build();
    domain.load_module(builder.build()).unwrap();
    domain
        .initialize_bindings(false, |tables| {
            tables.register_redirect(method_key("Host.Scale", "Apply", &["System.Int32"]), |frame| {
                let x = frame.arg_i32(0)?;
                frame.set_result(x * 3);
                Ok(())
            })?;
            Ok(())
        })
        .unwrap()
        .wait()
        .unwrap();
    domain
}

/// Benchmark a two argument call with a value slice.
fn bench_invoke_reflection(c: &mut Criterion) {
    let domain = sample_domain();
    let add = domain.find_method("Bench.Math", "Add", 2).unwrap();

    c.bench_function("invoke_add_reflection", |b| {
        b.iter(|| {
            let result = domain
                .invoke(&add, None, black_box(&[Value::I32(40), Value::I32(2)]))
                .unwrap();
            black_box(result)
        });
    });
}

/// Benchmark the same call through a streaming context.
fn bench_invoke_streaming(c: &mut Criterion) {
    let domain = sample_domain();
    let add = domain.find_method("Bench.Math", "Add", 2).unwrap();

    c.bench_function("invoke_add_streaming", |b| {
        b.iter(|| {
            let mut ctx = domain.begin_invoke(&add).unwrap();
            ctx.push_i32(black_box(40)).unwrap();
            ctx.push_i32(black_box(2)).unwrap();
            ctx.invoke().unwrap();
            black_box(ctx.read_i32().unwrap())
        });
    });
}

/// Benchmark a recursive workload dominated by interpreted calls.
fn bench_fib(c: &mut Criterion) {
    let domain = sample_domain();
    let fib = domain.find_method("Bench.Math", "Fib", 1).unwrap();

    c.bench_function("interpret_fib_20", |b| {
        b.iter(|| {
            let result = domain.invoke(&fib, None, &[Value::I32(black_box(20))]).unwrap();
            black_box(result)
        });
    });
}

/// Benchmark an interpreted method calling a redirected native method.
fn bench_redirect(c: &mut Criterion) {
    let domain = sample_domain();
    let scaled = domain.find_method("Bench.Math", "Scaled", 1).unwrap();

    c.bench_function("invoke_native_redirect", |b| {
        b.iter(|| {
            let result = domain.invoke(&scaled, None, &[Value::I32(black_box(14))]).unwrap();
            black_box(result)
        });
    });
}

criterion_group!(
    benches,
    bench_invoke_reflection,
    bench_invoke_streaming,
    bench_fib,
    bench_redirect
);
criterion_main!(benches);
