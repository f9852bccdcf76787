//! Benchmarks for the WaffleDB storage engine
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::tempdir;
use waffledb::storage::{
    decode_timestamps, decode_values_rle, encode_timestamps, encode_values_rle, Chunk, TagMap,
    TimePoint, WalSyncMode, WriteAheadLog,
};

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for size in [100usize, 1000, 10000] {
        let timestamps: Vec<u64> = (0..size as u64).map(|i| 1_700_000_000 + i * 60).collect();
        let values: Vec<f64> = (0..size).map(|i| (i % 8) as f64).collect();

        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("encode_timestamps_{}", size), |b| {
            b.iter(|| encode_timestamps(black_box(&timestamps)))
        });

        let encoded_ts = encode_timestamps(&timestamps);
        group.bench_function(format!("decode_timestamps_{}", size), |b| {
            b.iter(|| decode_timestamps(black_box(&encoded_ts)).unwrap())
        });

        group.bench_function(format!("encode_values_rle_{}", size), |b| {
            b.iter(|| encode_values_rle(black_box(&values)))
        });

        let encoded_vals = encode_values_rle(&values);
        group.bench_function(format!("decode_values_rle_{}", size), |b| {
            b.iter(|| decode_values_rle(black_box(&encoded_vals)).unwrap())
        });
    }

    group.finish();
}

fn bench_wal(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal");

    group.bench_function("append_single", |b| {
        let dir = tempdir().unwrap();
        let mut wal =
            WriteAheadLog::open(dir.path().join("bench.wal"), WalSyncMode::None).unwrap();
        let point = TimePoint::new("bench.metric", 1000, 7.5).tag("source", "bench");

        b.iter(|| wal.append(black_box(&point)).unwrap());
    });

    group.bench_function("append_batch_100", |b| {
        let dir = tempdir().unwrap();
        let mut wal =
            WriteAheadLog::open(dir.path().join("bench.wal"), WalSyncMode::None).unwrap();
        let points: Vec<TimePoint> = (0..100)
            .map(|i| TimePoint::new("bench.metric", i, i as f64))
            .collect();

        b.iter(|| wal.append_batch(black_box(&points)).unwrap());
    });

    group.finish();
}

fn bench_chunk(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk");

    let mut chunk = Chunk::new();
    for i in 0..1000u64 {
        chunk.append(i * 10, (i % 16) as f64, TagMap::new()).unwrap();
    }

    group.bench_function("query_time_range", |b| {
        b.iter(|| chunk.query_time_range(black_box(2000), black_box(8000)))
    });

    group.bench_function("sum_range", |b| {
        b.iter(|| chunk.sum(black_box(2000), black_box(8000)))
    });

    let mut packed = chunk.clone();
    packed.compress();
    group.bench_function("sum_range_packed", |b| {
        b.iter(|| packed.sum(black_box(2000), black_box(8000)))
    });

    group.bench_function("serialize", |b| b.iter(|| chunk.serialize()));

    let data = chunk.serialize();
    group.bench_function("deserialize", |b| {
        b.iter(|| Chunk::deserialize(black_box(&data)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_wal, bench_chunk);
criterion_main!(benches);
