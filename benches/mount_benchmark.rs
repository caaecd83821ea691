use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fatdisk::volume::fault::FixedRoll;
use fatdisk::volume::MemoryBackend;
use fatdisk::{FatVolume, ImageSpec, MountConfig};

fn mount(image: Vec<u8>, workers: usize) -> FatVolume {
    FatVolume::mount_with_roll(
        Box::new(MemoryBackend::from_data(image)),
        &MountConfig::default().with_workers(workers),
        Box::new(FixedRoll::failed()),
    )
    .unwrap()
}

/// Builds an image with `fanout` directories per level, three levels deep.
fn build_image(fanout: usize) -> (Vec<u8>, usize) {
    let image = ImageSpec::new(20_000, 512).to_bytes().unwrap();
    let mut volume = mount(image, 1);
    let mut directories = 0;

    for a in 0..fanout {
        let a_path = format!("/a{a}");
        volume.create_dir(&format!("a{a}"), "/").unwrap();
        directories += 1;
        for b in 0..fanout {
            let b_path = format!("{a_path}/b{b}");
            volume.create_dir(&format!("b{b}"), &a_path).unwrap();
            directories += 1;
            for c in 0..fanout {
                volume.create_dir(&format!("c{c}"), &b_path).unwrap();
                volume
                    .add_bytes(&format!("f{c}"), &[c as u8; 700], &b_path)
                    .unwrap();
                directories += 1;
            }
        }
    }
    (volume.image_bytes().unwrap(), directories)
}

/// Benchmark the tree load with different worker counts.
fn bench_mount_workers(c: &mut Criterion) {
    let mut group = c.benchmark_group("mount_workers");
    let (image, directories) = build_image(8);

    group.throughput(Throughput::Elements(directories as u64));
    for workers in [1usize, 2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(workers), workers, |b, &workers| {
            b.iter(|| {
                let volume = mount(image.clone(), workers);
                black_box(volume.tree().len());
            });
        });
    }

    group.finish();
}

/// Benchmark adding and removing a multi-cluster file.
fn bench_add_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_remove");

    for size in [512usize, 64 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let image = ImageSpec::new(4096, 512).to_bytes().unwrap();
            let mut volume = mount(image, 1);
            let data = vec![7u8; size];
            b.iter(|| {
                volume.add_bytes("bench.bin", &data, "/").unwrap();
                volume
                    .remove("bench.bin", fatdisk::EntryKind::File)
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mount_workers, bench_add_remove);
criterion_main!(benches);
