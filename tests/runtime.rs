use futures::{executor::block_on, StreamExt};
use reactive_atoms::{
    atom, batch, computed, effect, is_computed, ReactiveId, ReactiveKind,
};
use std::{cell::Cell, rc::Rc};

#[test]
fn pooled_buffers_all_return_after_settling() {
    reactive_atoms::__reset();

    let a = atom(0);
    let b = atom(0);
    let sum = computed(move || a.get() + b.get());
    let runs = Rc::new(Cell::new(0));
    let e = effect({
        let runs = Rc::clone(&runs);
        move || {
            sum.get();
            runs.set(runs.get() + 1);
        }
    });

    batch(|| {
        a.set(1);
        b.set(2);
    });
    a.set(10);
    assert_eq!(sum.get(), 12);
    e.dispose();

    #[cfg(debug_assertions)]
    {
        let (scratch, notifications) = reactive_atoms::__pool_stats();
        assert_eq!(scratch.in_use(), 0);
        assert_eq!(notifications.in_use(), 0);
        assert!(scratch.acquired > 0);
    }
}

#[test]
fn reset_tears_down_the_graph() {
    reactive_atoms::__reset();
    let a = atom(1);
    assert_eq!(a.get(), 1);

    reactive_atoms::__reset();
    // handles from before the reset read as disposed
    assert!(a.is_disposed());
    assert!(a.try_set(2).is_err());

    let b = atom(5);
    assert_eq!(b.get(), 5);
}

#[test]
fn handle_kinds_and_ids() {
    let a = atom(0);
    let c = computed(move || a.get());
    let e = effect(move || {
        c.get();
    });

    assert!(!is_computed(&a));
    assert!(is_computed(&c));
    assert!(!is_computed(&e));

    assert_eq!(a.kind(), ReactiveKind::Atom);
    assert_eq!(c.kind(), ReactiveKind::Computed);
    assert_eq!(e.kind(), ReactiveKind::Effect);

    // ids are monotonic in creation order
    assert!(a.id() < c.id());
    assert!(c.id() < e.id());
    e.dispose();
}

#[test]
fn atom_stream_delivers_settled_values() {
    let a = atom(1);
    let mut stream = a.to_stream();

    a.set(2);
    batch(|| {
        a.set(3);
        a.set(4);
    });

    assert_eq!(block_on(stream.next()), Some(1));
    assert_eq!(block_on(stream.next()), Some(2));
    // the batch coalesced into a single emission
    assert_eq!(block_on(stream.next()), Some(4));
}

#[test]
fn dropping_a_stream_unsubscribes() {
    let a = atom(1);
    let stream = a.to_stream();
    drop(stream);
    // no receiver is left; the write must not panic or leak a send
    a.set(2);
    assert_eq!(a.get(), 2);
}

#[test]
fn computed_stream_follows_derived_changes() {
    let a = atom(2);
    let doubled = computed(move || a.get() * 2);
    let mut stream = doubled.to_stream();

    a.set(5);

    assert_eq!(block_on(stream.next()), Some(4));
    assert_eq!(block_on(stream.next()), Some(10));
}
