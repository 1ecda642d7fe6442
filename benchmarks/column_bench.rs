//! Quarry Column Benchmarks
//!
//! Write-path and query-path costs of the column stacks under ingestion-like
//! workloads.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quarry_column::{
    ByteBlock, ByteBlockColumn, Column, ColumnDetails, ColumnFactory, ExecutionDetails,
    FastAddSortedColumn, RoaringBitmap, SortedColumn, ValueColumn,
};
use quarry_common::config::SortedConfig;
use quarry_common::{LocalId, Operator, Value};

// Benchmark configurations
const SMALL_BATCH: usize = 1_000;
const LARGE_BATCH: usize = 20_000;

fn random_values(n: usize) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n).map(|_| rng.gen_range(-1_000_000..1_000_000)).collect()
}

/// Sorted inserts against fast-add appends plus one commit
fn bench_sorted_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_ingest");

    for size in [SMALL_BATCH, LARGE_BATCH] {
        let values = random_values(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("sorted", size), &values, |b, values| {
            b.iter(|| {
                let mut column = SortedColumn::new(Box::new(ValueColumn::new("v", 0i64))).unwrap();
                for (lid, &v) in values.iter().enumerate() {
                    column.set(lid as LocalId, v).unwrap();
                }
                black_box(column)
            })
        });

        group.bench_with_input(BenchmarkId::new("fast_add", size), &values, |b, values| {
            b.iter(|| {
                let mut column = FastAddSortedColumn::new(
                    Box::new(ValueColumn::new("v", 0i64)),
                    SortedConfig::default(),
                )
                .unwrap();
                for (lid, &v) in values.iter().enumerate() {
                    column.set(lid as LocalId, v).unwrap();
                }
                column.commit().unwrap();
                black_box(column)
            })
        });
    }

    group.finish();
}

/// Range query over a sorted column against a full scan
fn bench_range_query(c: &mut Criterion) {
    let values = random_values(LARGE_BATCH);
    let mut sorted = SortedColumn::new(Box::new(ValueColumn::new("v", 0i64))).unwrap();
    let mut dense = ValueColumn::new("v", 0i64);
    for (lid, &v) in values.iter().enumerate() {
        sorted.set(lid as LocalId, v).unwrap();
        dense.set(lid as LocalId, v).unwrap();
    }

    let mut group = c.benchmark_group("range_query");
    group.bench_function("sorted", |b| {
        b.iter(|| {
            let mut result = RoaringBitmap::new();
            let mut details = ExecutionDetails::new();
            sorted
                .where_matches(Operator::GreaterThan, &black_box(500_000), &mut result, &mut details)
                .unwrap();
            black_box(result)
        })
    });
    group.bench_function("scan", |b| {
        b.iter(|| {
            let mut result = RoaringBitmap::new();
            let mut details = ExecutionDetails::new();
            dense
                .where_matches(Operator::GreaterThan, &black_box(500_000), &mut result, &mut details)
                .unwrap();
            black_box(result)
        })
    });
    group.finish();
}

/// Byte block ingest and rewrite with mixed value sizes
fn bench_byte_block(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let texts: Vec<ByteBlock> = (0..SMALL_BATCH * 4)
        .map(|_| {
            let len = if rng.gen_bool(0.01) { 8_000 } else { rng.gen_range(0..200) };
            ByteBlock::new(vec![b'q'; len])
        })
        .collect();

    let mut group = c.benchmark_group("byte_block");
    group.throughput(Throughput::Elements(texts.len() as u64));

    group.bench_function("append", |b| {
        b.iter(|| {
            let mut column = ByteBlockColumn::new("body", ByteBlock::default());
            for (lid, text) in texts.iter().enumerate() {
                column.set(lid as LocalId, text.clone()).unwrap();
            }
            black_box(column.memory_stats())
        })
    });

    group.bench_function("rewrite", |b| {
        b.iter(|| {
            let mut column = ByteBlockColumn::new("body", ByteBlock::default());
            column.set_size(SMALL_BATCH).unwrap();
            for (i, text) in texts.iter().enumerate() {
                column.set((i % SMALL_BATCH) as LocalId, text.clone()).unwrap();
            }
            black_box(column.memory_stats())
        })
    });

    group.finish();
}

/// Token queries through a factory-built text stack
fn bench_word_query(c: &mut Criterion) {
    const WORDS: [&str; 8] = ["alpha", "beta", "gamma", "delta", "omega", "sigma", "theta", "kappa"];
    let mut rng = StdRng::seed_from_u64(11);
    let mut column = ColumnFactory::default()
        .build(&ColumnDetails::new("body", "string"))
        .unwrap();
    for lid in 0..LARGE_BATCH {
        let text: Vec<&str> = (0..6).map(|_| WORDS[rng.gen_range(0..WORDS.len())]).collect();
        column.set(lid as LocalId, &Value::String(text.join(" "))).unwrap();
    }

    let mut group = c.benchmark_group("word_query");
    for (name, op, query) in [
        ("exact", Operator::MatchesExact, "gamma delta"),
        ("prefix", Operator::Matches, "ga"),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut result = RoaringBitmap::new();
                let mut details = ExecutionDetails::new();
                column
                    .where_matches(op, &Value::from(query), &mut result, &mut details)
                    .unwrap();
                black_box(result)
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_sorted_ingest,
    bench_range_query,
    bench_byte_block,
    bench_word_query,
);

criterion_main!(benches);
