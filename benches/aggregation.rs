//! Aggregation Benchmarks
//!
//! Bucket folding throughput per aggregation kind, overlapping extents,
//! grouped fan-out and end-to-end query execution on the worker pools.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kuba_aggregation::aggregation::{
    Aggregation, AggregationData, AggregationState, BucketKind, KeyProjection,
};
use kuba_aggregation::backend::{MemoryBackend, MetricBackend, WriteMetric};
use kuba_aggregation::concurrency::ReadWriteThreadPools;
use kuba_aggregation::query::{MetricQuery, QueryExecutor};
use kuba_aggregation::sampling::Sampling;
use kuba_aggregation::types::{DataPoint, DateRange, Series, Tags};
use std::collections::BTreeSet;
use std::hint::black_box;
use std::sync::Arc;

// =============================================================================
// Test Data Generators
// =============================================================================

/// One point per second with a slowly varying value
fn create_points(count: usize) -> Vec<DataPoint> {
    (0..count)
        .map(|i| DataPoint::new(i as i64 * 1_000, 100.0 + (i as f64 * 0.1).sin() * 10.0))
        .collect()
}

fn create_series(hosts: usize, dcs: usize) -> Vec<Series> {
    (0..hosts)
        .flat_map(|h| {
            (0..dcs).map(move |d| {
                Series::new(
                    "cpu",
                    [("host", format!("h{}", h)), ("dc", format!("d{}", d))],
                )
            })
        })
        .collect()
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_bucket_kinds(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_fold");
    let points = create_points(100_000);
    let range = DateRange::new(0, 100_000_000).unwrap();
    group.throughput(Throughput::Elements(points.len() as u64));

    for kind in [
        BucketKind::Sum,
        BucketKind::Average,
        BucketKind::Min,
        BucketKind::Max,
        BucketKind::StdDev,
    ] {
        let aggregation = Aggregation::bucket(kind, Sampling::of_size(60_000).unwrap());
        group.bench_with_input(BenchmarkId::from_parameter(kind), &points, |b, points| {
            b.iter(|| {
                let traversal = aggregation.session(Vec::new(), &range).unwrap();
                traversal
                    .session
                    .update(AggregationData::raw(Tags::new(), BTreeSet::new(), points.clone()))
                    .unwrap();
                black_box(traversal.session.result().unwrap())
            })
        });
    }

    group.finish();
}

fn bench_overlapping_extent(c: &mut Criterion) {
    let mut group = c.benchmark_group("overlapping_extent");
    let points = create_points(50_000);
    let range = DateRange::new(0, 50_000_000).unwrap();
    group.throughput(Throughput::Elements(points.len() as u64));

    for ratio in [1i64, 4, 16] {
        let sampling = Sampling::new(60_000, 60_000 * ratio).unwrap();
        let aggregation = Aggregation::bucket(BucketKind::Average, sampling);
        group.bench_with_input(BenchmarkId::new("extent_x", ratio), &points, |b, points| {
            b.iter(|| {
                let traversal = aggregation.session(Vec::new(), &range).unwrap();
                traversal
                    .session
                    .update(AggregationData::raw(Tags::new(), BTreeSet::new(), points.clone()))
                    .unwrap();
                black_box(traversal.session.result().unwrap())
            })
        });
    }

    group.finish();
}

fn bench_grouping_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("grouping_setup");
    let range = DateRange::new(0, 3_600_000).unwrap();
    let aggregation = Aggregation::group(
        KeyProjection::group(["host"]),
        Aggregation::bucket(BucketKind::Sum, Sampling::of_size(60_000).unwrap()),
    );

    for hosts in [10usize, 100, 1_000] {
        let states: Vec<AggregationState> = create_series(hosts, 4)
            .into_iter()
            .map(AggregationState::of_series)
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(hosts), &states, |b, states| {
            b.iter(|| black_box(aggregation.session(states.clone(), &range).unwrap()))
        });
    }

    group.finish();
}

fn bench_query_execution(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_execution");
    group.sample_size(20);

    let pools = Arc::new(ReadWriteThreadPools::new(4, 1).unwrap());
    let backend = Arc::new(MemoryBackend::new(Arc::clone(&pools), 600_000).unwrap());
    let series = create_series(16, 2);
    let points = create_points(3_600);
    for s in &series {
        backend
            .write(WriteMetric::new(s.clone(), points.clone()))
            .wait();
    }

    let executor = QueryExecutor::new(backend, pools);
    let aggregation = Aggregation::group(
        KeyProjection::group(["host"]),
        Aggregation::bucket(BucketKind::Average, Sampling::of_size(60_000).unwrap()),
    );
    let range = DateRange::new(0, 3_600_000).unwrap();

    group.throughput(Throughput::Elements((series.len() * points.len()) as u64));
    group.bench_function("grouped_average_6_rows", |b| {
        b.iter(|| {
            let query = MetricQuery::new("cpu", range, aggregation.clone())
                .with_series(series.iter().cloned());
            black_box(executor.execute(query).wait())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_bucket_kinds,
    bench_overlapping_extent,
    bench_grouping_setup,
    bench_query_execution
);
criterion_main!(benches);
