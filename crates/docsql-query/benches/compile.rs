mod common;
use common::*;

use bson::doc;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use docsql_query::{Input, compile_find, compile_pipeline, parse_filter};

// ── Filters ─────────────────────────────────────────────────────

fn bench_parse_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_filter");
    for width in [1, 10, 100] {
        let filter = wide_filter(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &filter, |b, filter| {
            b.iter(|| {
                let tree = parse_filter(filter, Input::Document).unwrap();
                (tree.to_sql(Input::Document), tree.values())
            })
        });
    }
    group.finish();
}

fn bench_find(c: &mut Criterion) {
    let filter = wide_filter(10);
    let sort = doc! { "revenue": -1, "name": 1 };
    c.bench_function("compile_find", |b| {
        b.iter(|| compile_find(TABLE, &filter, &sort, Some(20), Some(50)).unwrap())
    });
}

// ── Pipelines ───────────────────────────────────────────────────

fn bench_pipeline(c: &mut Criterion) {
    let pipeline = group_pipeline();
    c.bench_function("compile_pipeline", |b| {
        b.iter(|| compile_pipeline(TABLE, &pipeline).unwrap())
    });
}

criterion_group!(benches, bench_parse_filter, bench_find, bench_pipeline);
criterion_main!(benches);
