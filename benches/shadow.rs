use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sensor_bridge::{BridgeConfig, MemoryBridge};
use std::hint::black_box;

pub fn benchmark_shadow(c: &mut Criterion) {
    let dims = [(320, 240), (640, 480), (1920, 1080), (3840, 2160)];
    let bridge = MemoryBridge::new(BridgeConfig::default());

    let mut group = c.benchmark_group("shadow");
    for dim in dims.iter() {
        let native = vec![0x80u8; dim.0 * dim.1 * 2];

        group.bench_with_input(
            BenchmarkId::new("first", format!("{}x{}", dim.0, dim.1)),
            &native,
            |b, native| {
                b.iter(|| {
                    let memory = unsafe { bridge.access(native.as_ptr(), native.len()).unwrap() };
                    black_box(memory.with_slice(|bytes| bytes[0]));
                })
            },
        );

        let held = unsafe { bridge.access(native.as_ptr(), native.len()).unwrap() };
        group.bench_with_input(
            BenchmarkId::new("shared", format!("{}x{}", dim.0, dim.1)),
            &native,
            |b, native| {
                b.iter(|| {
                    let memory = unsafe { bridge.access(native.as_ptr(), native.len()).unwrap() };
                    black_box(memory.with_slice(|bytes| bytes[0]));
                })
            },
        );
        drop(held);
    }
    group.finish();
}

criterion_group!(benches, benchmark_shadow);
criterion_main!(benches);
