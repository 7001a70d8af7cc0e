use reactive_atoms::{atom, computed, effect, untracked};
use std::{cell::Cell, rc::Rc};

#[test]
fn untracked_reads_create_no_dependencies() {
    let a = atom(-1);
    let runs = Rc::new(Cell::new(0));

    let _e = effect({
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            untracked(|| a.get());
        }
    });

    assert_eq!(runs.get(), 1);
    a.set(1);
    // the effect never subscribed, so it does not re-run
    assert_eq!(runs.get(), 1);
}

#[test]
fn untracked_inside_a_computed() {
    let tracked = atom(1);
    let ignored = atom(10);

    let c = computed(move || tracked.get() + untracked(|| ignored.get()));
    assert_eq!(c.get(), 11);

    ignored.set(100);
    assert_eq!(c.get(), 11);

    tracked.set(2);
    // recomputation picks up the latest untracked value as a side effect
    assert_eq!(c.get(), 102);
}

#[test]
fn nested_evaluations_inside_untracked_still_track_their_own_reads() {
    let a = atom(1);
    let doubled = computed(move || a.get() * 2);

    // reading the computed under untracked must not break the computed's own
    // dependency on the atom
    let value = untracked(|| doubled.get());
    assert_eq!(value, 2);

    a.set(5);
    assert_eq!(doubled.get(), 10);
}

#[test]
fn untracked_returns_the_closure_value() {
    let a = atom(3);
    assert_eq!(untracked(|| a.get() * 3), 9);
}
