//! Benchmarks for instance-tree construction and array reconciliation.
//!
//! Run with: cargo bench -p tform-tree --bench tree_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Value, json};
use std::hint::black_box;
use tform_tree::{Descriptor, FormEngine};

const ROW_COUNTS: &[usize] = &[10, 100, 1_000];

fn rows(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| json!({ "name": format!("row-{i}"), "start": i, "end": i + 1 }))
        .collect()
}

fn form(count: usize) -> Descriptor {
    Descriptor::form("form")
        .default_value(json!({ "rows": rows(count) }))
        .child(
            Descriptor::array("rows")
                .child(Descriptor::primitive("name"))
                .child(Descriptor::primitive("start"))
                .child(Descriptor::primitive("end").depends_on(["start"])),
        )
}

// =============================================================================
// Build
// =============================================================================

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree/rebuild");
    for &count in ROW_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let engine = FormEngine::default();
                engine.rebuild([form(count)]).unwrap();
                black_box(engine.roots().len())
            });
        });
    }
    group.finish();
}

// =============================================================================
// Array mutations
// =============================================================================

fn bench_array_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree/array");
    for &count in ROW_COUNTS {
        let engine = FormEngine::default();
        engine.rebuild([form(count)]).unwrap();
        let array = engine
            .get_component_instance("form.__children.rows")
            .and_then(|rows| rows.control().array())
            .unwrap();

        group.bench_with_input(BenchmarkId::new("swap_ends", count), &count, |b, &count| {
            b.iter(|| black_box(array.swap(0, count - 1)));
        });
        group.bench_with_input(BenchmarkId::new("prepend_remove", count), &count, |b, _| {
            b.iter(|| {
                array.prepend(vec![json!({ "name": "head" })]);
                black_box(array.remove(0))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rebuild, bench_array_ops);
criterion_main!(benches);
