use criterion::{Criterion, black_box, criterion_group, criterion_main};
use sfs_device::locate_sector;
use sfs_types::SectorNumber;

fn bench_locate_sector(c: &mut Criterion) {
    let mut group = c.benchmark_group("raid_map");

    group.bench_function("locate_single", |b| {
        b.iter(|| locate_sector(black_box(SectorNumber(12_345))));
    });

    group.bench_function("locate_sequential_8k", |b| {
        b.iter(|| {
            let mut served = 0_usize;
            for logical in 0..8_192_u64 {
                if let Some(loc) = locate_sector(black_box(SectorNumber(logical))) {
                    served += loc.disk;
                }
            }
            black_box(served)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_locate_sector);
criterion_main!(benches);
