//! Storage engine write and read benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use imstore_bench::{group_im, im, populate_peer, temp_storage};
use imstore_storage::{FileBackend, StorageBackend};
use tempfile::TempDir;

/// Benchmark saving peer messages (payload plus offline record).
fn bench_save_peer(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_peer_message");
    group.sample_size(50);

    for size in [64, 1024].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (_dir, storage) = temp_storage();
            let message = im(1, size);
            let mut uid = 0i64;
            b.iter(|| {
                uid = (uid + 1) % 1000;
                black_box(storage.save_peer_message(1, uid, 1, black_box(&message)).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark saving to a super group chain.
fn bench_save_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_group_message");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_group", |b| {
        let (_dir, storage) = temp_storage();
        let message = group_im(9, 1, 64);
        b.iter(|| black_box(storage.save_group_message(1, 9, 1, &message).unwrap()));
    });

    group.finish();
}

/// Benchmark ordinary group fan-out.
fn bench_save_peer_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_peer_group_message");
    group.sample_size(30);

    for members in [10usize, 100].iter() {
        group.throughput(Throughput::Elements(*members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), members, |b, &members| {
            let (_dir, storage) = temp_storage();
            let uids: Vec<i64> = (0..members as i64).collect();
            let message = group_im(9, 1, 64);
            b.iter(|| black_box(storage.save_peer_group_message(1, &uids, 1, &message).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark random reads by id.
fn bench_read_message(c: &mut Criterion) {
    let (_dir, storage) = temp_storage();
    let ids = populate_peer(&storage, 1, 2, 10_000);
    storage.flush().unwrap();

    let mut n = 0usize;
    c.bench_function("read_message", |b| {
        b.iter(|| {
            n = (n + 7919) % ids.len();
            black_box(storage.read_message(ids[n]).unwrap());
        });
    });
}

/// Benchmark a full forward scan of the log.
fn bench_scan(c: &mut Criterion) {
    let (_dir, storage) = temp_storage();
    populate_peer(&storage, 1, 2, 10_000);
    storage.flush().unwrap();

    let mut group = c.benchmark_group("scan");
    group.sample_size(20);
    group.throughput(Throughput::Elements(20_000));
    group.bench_function("full_log", |b| {
        b.iter(|| black_box(storage.scan(0).count()));
    });
    group.finish();
}

/// Benchmark raw file appends with and without sync.
fn bench_file_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_append");
    group.sample_size(50);

    for size in [256, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let path = temp_dir.path().join("message_0");
            std::fs::File::create(&path).unwrap();
            let mut backend = FileBackend::open(&path).unwrap();
            let data = vec![0x5au8; size];

            b.iter(|| black_box(backend.append(black_box(&data)).unwrap()));
        });
    }

    group.bench_function("append_sync_256", |b| {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("message_0");
        std::fs::File::create(&path).unwrap();
        let mut backend = FileBackend::open(&path).unwrap();
        let data = vec![0x5au8; 256];

        b.iter(|| {
            backend.append(&data).unwrap();
            backend.sync().unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_save_peer,
    bench_save_group,
    bench_save_peer_group,
    bench_read_message,
    bench_scan,
    bench_file_append
);
criterion_main!(benches);
