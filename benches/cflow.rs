//! Benchmarks for the control-flow deobfuscation pipeline.
//!
//! Measures the stages on synthetic flattened bodies:
//! - Block graph construction and rebuild
//! - Dead block elimination
//! - The full per-method pipeline
//! - Parallel module processing

extern crate dotscope_cflow;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use dotscope_cflow::{
    analysis::{rebuild, remove_dead_blocks, BlockGraph},
    prelude::*,
};
use std::hint::black_box;

/// A flattened state machine with `cases` states dispatched through a switch, each guarded by
/// a constant predicate call.
fn flattened_body(guard: MethodRef, cases: usize) -> MethodBody {
    let labels: Vec<String> = (0..cases).map(|i| format!("case{i}")).collect();
    let refs: Vec<&str> = labels.iter().map(String::as_str).collect();

    let mut asm = BodyAssembler::new();
    asm.locals(1);
    asm.emit_ldc_i4(0).unwrap();
    asm.emit_stloc(0).unwrap();
    asm.define_label("dispatch").unwrap();
    asm.emit_ldloc(0).unwrap();
    asm.emit_switch(&refs).unwrap();
    asm.emit_instruction("ret", None).unwrap();

    for (i, label) in labels.iter().enumerate() {
        let next = i32::try_from(i + 1).unwrap();
        asm.define_label(label).unwrap();
        asm.emit_ldc_i4(next).unwrap();
        asm.emit_call("call", guard).unwrap();
        asm.emit_branch("brtrue", "dispatch_store").unwrap();
        asm.emit_instruction("pop", None).unwrap();
        asm.emit_ldc_i4(next).unwrap();
        asm.emit_ldc_i4(3).unwrap();
        asm.emit_instruction("mul", None).unwrap();
        asm.emit_ldc_i4(3).unwrap();
        asm.emit_instruction("div", None).unwrap();
        asm.emit_branch("br", "dispatch_store").unwrap();
    }

    asm.define_label("dispatch_store").unwrap();
    asm.emit_stloc(0).unwrap();
    asm.emit_branch("br", "dispatch").unwrap();
    asm.finalize().unwrap()
}

fn sample_module(methods: u32, cases: usize) -> Module {
    let module = Module::new("bench");

    let mut asm = BodyAssembler::new();
    asm.emit_ldc_i4(0).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    let guard = module
        .insert(
            MethodDef::new(Token::method_def(1), "Guard", "IsFeatureEnabled")
                .with_signature(BOOLEAN_TYPE, 0, false)
                .with_body(asm.finalize().unwrap()),
        )
        .method_ref();

    for row in 2..methods + 2 {
        module.insert(
            MethodDef::new(Token::method_def(row), "Program", &format!("State{row}"))
                .with_body(flattened_body(guard, cases)),
        );
    }
    module
}

fn guard_ref() -> MethodRef {
    MethodRef {
        token: Token::method_def(1),
        params: 0,
        has_this: false,
        returns_value: true,
    }
}

/// Benchmark building a block graph and rebuilding it unchanged.
fn bench_graph_round_trip(c: &mut Criterion) {
    let body = flattened_body(guard_ref(), 32);

    c.bench_function("cflow_graph_round_trip", |b| {
        b.iter(|| {
            let graph = BlockGraph::from_body(black_box(&body)).unwrap();
            black_box(rebuild(&graph).unwrap())
        });
    });
}

/// Benchmark unreachable block removal on a freshly built graph.
fn bench_dead_blocks(c: &mut Criterion) {
    let body = flattened_body(guard_ref(), 32);
    let graph = BlockGraph::from_body(&body).unwrap();

    c.bench_function("cflow_dead_blocks", |b| {
        b.iter_batched(
            || graph.clone(),
            |mut graph| black_box(remove_dead_blocks(&mut graph).unwrap()),
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark the full pipeline on one method.
fn bench_deobfuscate_method(c: &mut Criterion) {
    let module = sample_module(1, 32);
    let method = module.get(Token::method_def(2)).unwrap();
    let original = method.body.read().unwrap().clone();

    c.bench_function("cflow_deobfuscate_method", |b| {
        b.iter(|| {
            *method.body.write().unwrap() = original.clone();
            let engine = CflowDeobfuscator::default();
            black_box(engine.deobfuscate(&method, &module).unwrap())
        });
    });
}

/// Benchmark parallel processing of a module.
fn bench_deobfuscate_module(c: &mut Criterion) {
    c.bench_function("cflow_deobfuscate_module_64", |b| {
        b.iter_batched(
            || sample_module(64, 16),
            |module| {
                let engine = CflowDeobfuscator::default();
                black_box(engine.deobfuscate_module(&module))
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_graph_round_trip,
    bench_dead_blocks,
    bench_deobfuscate_method,
    bench_deobfuscate_module
);
criterion_main!(benches);
