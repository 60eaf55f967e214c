use criterion::{black_box, criterion_group, criterion_main, Criterion};

use copystress::methods::MemcpyMethod;
use copystress::stressor::MEMCPY_MEMSIZE;

fn concrete_methods() -> Vec<MemcpyMethod> {
    MemcpyMethod::ALL_METHODS
        .into_iter()
        .filter(|m| m.funcs().is_some())
        .collect()
}

/// Benchmark 1: straight 2048-byte copies, one group entry per engine.
/// This is where the optimization-level axis of the naive variants shows up.
fn bench_memcpy_engines(c: &mut Criterion) {
    let mut group = c.benchmark_group("memcpy_2048");

    let src = vec![0xA5u8; MEMCPY_MEMSIZE];
    let mut dest = vec![0u8; MEMCPY_MEMSIZE];

    for method in concrete_methods() {
        let funcs = match method.funcs() {
            Some(funcs) => funcs,
            None => continue,
        };
        group.bench_function(method.name(), |b| {
            b.iter(|| unsafe {
                black_box((funcs.memcpy)(
                    black_box(dest.as_mut_ptr()),
                    black_box(src.as_ptr()),
                    MEMCPY_MEMSIZE,
                ));
            })
        });
    }

    group.finish();
}

/// Benchmark 2: the near-overlap move (one byte shift), the hardest case for
/// a naive mover since it forces strict byte ordering.
fn bench_memmove_engines(c: &mut Criterion) {
    let mut group = c.benchmark_group("memmove_overlap_1");

    let mut buf = vec![0x5Au8; MEMCPY_MEMSIZE];

    for method in concrete_methods() {
        let funcs = match method.funcs() {
            Some(funcs) => funcs,
            None => continue,
        };
        group.bench_function(method.name(), |b| {
            b.iter(|| unsafe {
                let base = buf.as_mut_ptr();
                black_box((funcs.memmove)(
                    black_box(base.add(1)),
                    black_box(base as *const u8),
                    MEMCPY_MEMSIZE - 1,
                ));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_memcpy_engines, bench_memmove_engines);
criterion_main!(benches);
