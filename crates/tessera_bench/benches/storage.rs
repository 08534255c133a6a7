//! Storage backend and commit log benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use tessera_bench::utils::random_data;
use tessera_codec::{ObjKey, Value};
use tessera_core::log::{CommitLog, LogRecord, RowOp};
use tessera_core::Version;
use tessera_storage::{FileBackend, InMemoryBackend, StorageBackend};

fn small_commit(version: u64) -> LogRecord {
    LogRecord::Commit {
        version: Version(version),
        next_key: version + 1,
        ops: vec![RowOp::Put {
            class: "Person".into(),
            key: ObjKey::new(version),
            values: vec![Value::Int(version as i64), Value::from("bench"), Value::Int(30)],
        }],
    }
}

/// Benchmark raw appends on both backends.
fn bench_backend_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("backend_append");
    group.sample_size(50);

    for size in [64, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        let data = random_data(*size);

        group.bench_with_input(BenchmarkId::new("memory", size), size, |b, _| {
            let mut backend = InMemoryBackend::new();
            b.iter(|| black_box(backend.append(black_box(&data)).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("file", size), size, |b, _| {
            let temp_dir = TempDir::new().unwrap();
            let mut backend = FileBackend::open(&temp_dir.path().join("bench.log")).unwrap();
            b.iter(|| black_box(backend.append(black_box(&data)).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark positional reads from a backend holding many records.
fn bench_backend_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("backend_read");
    let record_size = 256;
    let record_count = 1000;
    let data = random_data(record_size);

    let mut backend = InMemoryBackend::new();
    let offsets: Vec<u64> = (0..record_count)
        .map(|_| backend.append(&data).unwrap())
        .collect();

    group.throughput(Throughput::Bytes(record_size as u64));
    group.bench_function("memory_scattered", |b| {
        let mut idx = 0;
        b.iter(|| {
            let offset = offsets[(idx * 7) % record_count];
            idx += 1;
            black_box(backend.read_at(black_box(offset), record_size).unwrap())
        });
    });

    group.finish();
}

/// Benchmark framing and appending commit records, with and without a
/// sync per commit.
fn bench_log_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_append");
    group.sample_size(20);

    group.bench_function("memory", |b| {
        let log = CommitLog::new(Box::new(InMemoryBackend::new()), false);
        let mut version = 0;
        b.iter(|| {
            version += 1;
            black_box(log.append(&small_commit(version)).unwrap())
        });
    });

    for sync in [false, true] {
        let name = if sync { "file_sync" } else { "file_nosync" };
        group.bench_function(name, |b| {
            let temp_dir = TempDir::new().unwrap();
            let backend = FileBackend::open(&temp_dir.path().join("commit.log")).unwrap();
            let log = CommitLog::new(Box::new(backend), sync);
            let mut version = 0;
            b.iter(|| {
                version += 1;
                black_box(log.append(&small_commit(version)).unwrap())
            });
        });
    }

    group.finish();
}

/// Benchmark replaying a log from the first record, as done on open.
fn bench_log_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_replay");
    group.sample_size(20);

    for count in [100u64, 1000, 10000].iter() {
        let log = CommitLog::new(Box::new(InMemoryBackend::new()), false);
        for v in 1..=*count {
            log.append(&small_commit(v)).unwrap();
        }
        group.throughput(Throughput::Elements(*count));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| black_box(log.read_all().unwrap().len()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_backend_append,
    bench_backend_read,
    bench_log_append,
    bench_log_replay,
);

criterion_main!(benches);
