use criterion::{criterion_group, criterion_main, Criterion};
use reactive_atoms::{atom, computed, Computed};

fn deep_update(c: &mut Criterion) {
    c.bench_function("deep_update", |b| {
        b.iter(|| {
            reactive_atoms::__reset();
            let sig = atom(0usize);
            let mut last: Computed<usize> = computed(move || sig.get() + 1);
            for _ in 0..1000 {
                let prev = last;
                last = computed(move || prev.get() + 1);
            }
            assert_eq!(last.get(), 1001);
            sig.set(1);
            assert_eq!(last.get(), 1002);
        });
    });
}

criterion_group!(benches, deep_update);
criterion_main!(benches);
