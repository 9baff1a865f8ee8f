//! Benchmarks for type resolution and string interning.
//!
//! Measures the cached paths hit on every call as well as first use:
//! - Composite names already interned in the registry
//! - First resolution of a fresh registry
//! - User string interning with and without hash collisions

extern crate dotrun;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use dotrun::metadata::{cache::StringCache, module::Module, typesystem::TypeRegistry};
use dotrun::prelude::*;
use std::hint::black_box;

fn sample_module() -> Module {
    let mut builder = ModuleBuilder::new("Bench");
    builder.define_type(TypeDef::class("Bench", "Node"));
    let pair = builder.define_type(TypeDef::class("Bench", "Pair").generic_params(&["A", "B"]));
    builder
        .define_field(pair, FieldDef::new("first", TypeSig::param("A")))
        .unwrap();
    builder.build()
}

/// Benchmark repeated lookups of names that are already interned.
fn bench_resolve_cached(c: &mut Criterion) {
    let registry = TypeRegistry::new();
    registry.load_module(sample_module()).unwrap();
    registry.resolve("Bench.Pair<Bench.Node[],System.Int32>").unwrap();

    c.bench_function("resolve_simple_cached", |b| {
        b.iter(|| black_box(registry.resolve(black_box("Bench.Node")).unwrap()));
    });
    c.bench_function("resolve_composite_cached", |b| {
        b.iter(|| {
            black_box(
                registry
                    .resolve(black_box("Bench.Pair<Bench.Node[],System.Int32>"))
                    .unwrap(),
            )
        });
    });
}

/// Benchmark first-use resolution, which builds every wrapper on the way.
fn bench_resolve_first_use(c: &mut Criterion) {
    c.bench_function("resolve_composite_first_use", |b| {
        b.iter_batched(
            || {
                let registry = TypeRegistry::new();
                registry.load_module(sample_module()).unwrap();
                registry
            },
            |registry| black_box(registry.resolve("Bench.Pair<Bench.Node[][],System.String>").unwrap()),
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark interning of strings that are already present.
fn bench_intern(c: &mut Criterion) {
    let cache = StringCache::new();
    let words: Vec<String> = (0..256).map(|i| format!("literal-{i}")).collect();
    for word in &words {
        cache.intern(word);
    }

    c.bench_function("intern_hit", |b| {
        b.iter(|| {
            for word in &words {
                black_box(cache.intern(black_box(word)));
            }
        });
    });

    fn constant(_: &str) -> u32 {
        7
    }
    let colliding = StringCache::with_hasher(constant);
    let few: Vec<String> = (0..16).map(|i| format!("literal-{i}")).collect();
    for word in &few {
        colliding.intern(word);
    }
    c.bench_function("intern_hit_colliding", |b| {
        b.iter(|| {
            for word in &few {
                black_box(colliding.intern(black_box(word)));
            }
        });
    });
}

criterion_group!(benches, bench_resolve_cached, bench_resolve_first_use, bench_intern);
criterion_main!(benches);
