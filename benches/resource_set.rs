//! Benchmark for building and serializing the desired object set

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use csi_driver_lvm_extension::managedresources::Registry;
use csi_driver_lvm_extension::{build, ImageVector, MergedConfig, BUNDLE_NAME, NAMESPACE};

fn merged() -> MergedConfig {
    MergedConfig {
        host_write_path: "/var/lib/csi-driver-lvm".into(),
        device_pattern: "/dev/nvme[0-9]n[0-9]".into(),
    }
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("resource_set");
    group.throughput(Throughput::Elements(1));

    let images = ImageVector::embedded().expect("embedded image vector");
    let merged = merged();

    group.bench_function("build", |b| {
        b.iter(|| build(black_box(&merged), NAMESPACE, &images).expect("build"));
    });

    group.finish();
}

fn bench_bundle(c: &mut Criterion) {
    let mut group = c.benchmark_group("resource_set");
    group.throughput(Throughput::Elements(1));

    let images = ImageVector::embedded().expect("embedded image vector");
    let objects = build(&merged(), NAMESPACE, &images).expect("build");

    group.bench_function("serialize_bundle", |b| {
        b.iter(|| {
            Registry::new()
                .add_all(black_box(&objects))
                .expect("serialize")
                .into_bundle(BUNDLE_NAME, NAMESPACE)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_build, bench_bundle);
criterion_main!(benches);
