//! Benchmarks for handle bookkeeping and host-device transfers

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use devmem::{DeviceArray, DeviceArray2D, DeviceMemory, HostDevice};

/// Benchmark clone + release of a shared handle
fn bench_clone_release(c: &mut Criterion) {
    let device = HostDevice::new();
    let mem = DeviceMemory::with_size(device, 4096).unwrap();

    c.bench_function("clone_release", |b| {
        b.iter(|| {
            let mut alias = mem.clone();
            black_box(alias.ref_count());
            alias.release();
        })
    });
}

/// Benchmark create when the size already matches
fn bench_create_noop(c: &mut Criterion) {
    let device = HostDevice::new();
    let mut array = DeviceArray::<f32>::with_len(device, 1024).unwrap();

    c.bench_function("create_same_size", |b| {
        b.iter(|| {
            array.create(black_box(1024)).unwrap();
        })
    });
}

/// Benchmark allocate + free through the host device
fn bench_alloc_free(c: &mut Criterion) {
    let device = HostDevice::new();

    c.bench_function("alloc_free_64k", |b| {
        b.iter(|| {
            let mem = DeviceMemory::with_size(device.clone(), 64 * 1024).unwrap();
            black_box(&mem);
            drop(mem);
        })
    });
}

/// Benchmark 1-D upload/download throughput
fn bench_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer_1d");

    for &len in &[256usize, 4096, 65536, 1 << 20] {
        let host: Vec<u32> = (0..len as u32).collect();
        let mut back = vec![0u32; len];
        let mut array = DeviceArray::<u32>::with_len(HostDevice::new(), len).unwrap();
        group.throughput(Throughput::Bytes((len * 4) as u64));

        group.bench_function(format!("upload_{}", len), |b| {
            b.iter(|| array.upload(black_box(&host)).unwrap())
        });
        group.bench_function(format!("download_{}", len), |b| {
            b.iter(|| array.download(black_box(&mut back)).unwrap())
        });
    }

    group.finish();
}

/// Benchmark pitched 2-D transfers
fn bench_transfer_2d(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer_2d");

    for &(rows, cols) in &[(64usize, 60usize), (512, 500), (1024, 1000)] {
        let host = vec![1.0f32; rows * cols];
        let mut grid = DeviceArray2D::<f32>::with_size(HostDevice::new(), rows, cols).unwrap();
        group.throughput(Throughput::Bytes((rows * cols * 4) as u64));

        group.bench_function(format!("upload_{}x{}", rows, cols), |b| {
            b.iter(|| grid.upload(black_box(&host), cols).unwrap())
        });
        group.bench_function(format!("download_{}x{}", rows, cols), |b| {
            let mut back = Vec::with_capacity(rows * cols);
            b.iter(|| grid.download(black_box(&mut back)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_clone_release,
    bench_create_noop,
    bench_alloc_free,
    bench_transfer,
    bench_transfer_2d,
);
criterion_main!(benches);
