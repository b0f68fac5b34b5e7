//! Benchmarks for building and syncing checkable trees

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use checkable_core::{checkable, CollSpec, IndexBy, Node, Options, Path, Predicate, Value};
use serde_json::json;

fn row_spec() -> CollSpec {
    CollSpec::record()
        .field("id", Predicate::always_valid())
        .field(
            "name",
            Predicate::from_fn(|v| match v.as_str() {
                Some(s) if !s.is_empty() => Ok(()),
                _ => Err("name is empty".to_string()),
            }),
        )
        .field(
            "qty",
            Predicate::from_fn(|v| match v.as_i64() {
                Some(n) if n >= 0 => Ok(()),
                _ => Err("qty must not be negative".to_string()),
            }),
        )
}

fn rows(count: usize, offset: usize) -> Value {
    let rows: Vec<_> = (0..count)
        .map(|i| json!({"id": i + offset, "name": format!("row {i}"), "qty": i}))
        .collect();
    Value::from(serde_json::Value::Array(rows))
}

fn table(count: usize) -> Node {
    let spec = CollSpec::sequence().spread(row_spec());
    let options = Options::new()
        .active(true)
        .index_by(IndexBy::field("id"));
    checkable(spec, rows(count, 0), options).unwrap()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for count in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| black_box(table(count)))
        });
    }
    group.finish();
}

fn bench_leaf_edit(c: &mut Criterion) {
    let node = table(100);
    let qty = node
        .descendant(&["50", "qty"].into_iter().collect::<Path>())
        .unwrap();
    let mut n = 0i64;

    c.bench_function("leaf_edit_bubbles", |b| {
        b.iter(|| {
            n += 1;
            qty.set(black_box(n));
        })
    });
}

fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");
    for count in [10, 100, 1000] {
        let node = table(count);
        let shifted = rows(count, 1);
        let original = rows(count, 0);
        let mut flip = false;

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                flip = !flip;
                node.set(if flip { shifted.clone() } else { original.clone() });
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_leaf_edit, bench_sync);
criterion_main!(benches);
