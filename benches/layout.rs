//! Benchmarks for layout queries.
//!
//! Measures what the native engine pays per callback:
//! - Type descriptor decoding
//! - Object queries served from a warm layout cache
//! - Cold layout computation for a deep class hierarchy
//! - Parallel prewarming

extern crate clrbridge;

use clrbridge::{interop, prelude::*, typesystem::descriptor::encode};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;

const DEPTH: usize = 16;

/// Sixteen classes, each deriving from the previous one and adding a reference and an int.
fn registry() -> TypeRegistry {
    let registry = TypeRegistry::new();
    for level in 0..DEPTH {
        let mut builder = TypeDefBuilder::class("Bench", &format!("Bench.Level{level}"))
            .field(&format!("name{level}"), TypeSig::String)
            .field(&format!("count{level}"), PrimitiveKind::I4.into());
        if level > 0 {
            builder = builder.base(level_sig(level - 1));
        }
        registry.register(builder.build());
    }
    registry.register(
        TypeDefBuilder::structure("Bench", "Bench.Entry")
            .field("key", PrimitiveKind::I8.into())
            .field("value", TypeSig::Object)
            .build(),
    );
    registry
}

fn level_sig(level: usize) -> TypeSig {
    TypeSig::named("Bench", format!("Bench.Level{level}"))
}

/// Benchmark decoding a generic instantiation descriptor.
fn bench_decode_descriptor(c: &mut Criterion) {
    let registry = registry();
    registry.register(
        TypeDefBuilder::class("Bench", "Bench.Map`2")
            .generic_params(2)
            .build(),
    );
    let sig = TypeSig::generic(
        "Bench",
        "Bench.Map`2",
        vec![TypeSig::String, TypeSig::sz_array(level_sig(3))],
    );
    let bytes = encode(&registry, &sig).unwrap();

    c.bench_function("layout_decode_descriptor", |b| {
        b.iter(|| {
            let decoded = TypeDescriptor::new(black_box(&bytes)).decode(&registry).unwrap();
            black_box(decoded)
        });
    });
}

/// Benchmark an object query whose layout is already cached.
fn bench_object_info_warm(c: &mut Criterion) {
    let registry = registry();
    let bytes = encode(&registry, &level_sig(DEPTH - 1)).unwrap();
    interop::object_info(&registry, &bytes).unwrap();

    c.bench_function("layout_object_info_warm", |b| {
        b.iter(|| black_box(interop::object_info(&registry, black_box(&bytes)).unwrap()));
    });
}

/// Benchmark an array query over a struct element.
fn bench_array_info(c: &mut Criterion) {
    let registry = registry();
    let entries = TypeSig::sz_array(TypeSig::named("Bench", "Bench.Entry"));
    let bytes = encode(&registry, &entries).unwrap();

    c.bench_function("layout_array_info_struct", |b| {
        b.iter(|| black_box(interop::array_info(&registry, black_box(&bytes)).unwrap()));
    });
}

/// Benchmark computing the full hierarchy's layouts from an empty cache.
fn bench_layout_cold(c: &mut Criterion) {
    c.bench_function("layout_hierarchy_cold", |b| {
        b.iter_batched(
            registry,
            |registry| black_box(registry.layout(&level_sig(DEPTH - 1)).unwrap()),
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark prewarming every level in parallel.
fn bench_prewarm(c: &mut Criterion) {
    let sigs: Vec<TypeSig> = (0..DEPTH).map(level_sig).collect();

    c.bench_function("layout_prewarm_hierarchy", |b| {
        b.iter_batched(
            registry,
            |registry| {
                registry.prewarm(black_box(&sigs)).unwrap();
                black_box(registry.cached_layouts())
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_decode_descriptor,
    bench_object_info_warm,
    bench_array_info,
    bench_layout_cold,
    bench_prewarm,
);
criterion_main!(benches);
