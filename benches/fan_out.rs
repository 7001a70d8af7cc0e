use criterion::{criterion_group, criterion_main, Criterion};
use reactive_atoms::{atom, computed};

fn fan_out(c: &mut Criterion) {
    c.bench_function("fan_out", |b| {
        b.iter(|| {
            reactive_atoms::__reset();
            let sig = atom(0);
            let memos = (0..1000)
                .map(|_| computed(move || sig.get()))
                .collect::<Vec<_>>();
            assert_eq!(memos.iter().map(|m| m.get()).sum::<i32>(), 0);
            sig.set(1);
            assert_eq!(memos.iter().map(|m| m.get()).sum::<i32>(), 1000);
        });
    });
}

criterion_group!(benches, fan_out);
criterion_main!(benches);
