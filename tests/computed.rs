use reactive_atoms::{
    atom, computed, computed_with, try_computed, ComputedOptions,
    ComputedState,
};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

#[test]
fn basic_computed() {
    let c = computed(|| 5);
    assert_eq!(c.get(), 5);
}

#[test]
fn computed_follows_its_inputs() {
    let a = atom(0);
    let b = atom(0);
    let sum = computed(move || a.get() + b.get());
    assert_eq!(sum.get(), 0);
    a.set(5);
    assert_eq!(sum.get(), 5);
    b.set(1);
    assert_eq!(sum.get(), 6);
}

#[test]
fn doubling_bumps_the_version_once_per_change() {
    let a = atom(0);
    let double = computed(move || a.get() * 2);
    assert_eq!(double.get(), 0);

    let before = double.version();
    a.set(5);
    assert_eq!(double.get(), 10);
    assert_eq!(double.version(), before + 1);
}

#[test]
fn computed_runs_only_when_inputs_change() {
    let calls = Rc::new(Cell::new(0));
    let a = atom(0);
    let b = atom(0);

    let c = computed({
        let calls = Rc::clone(&calls);
        move || {
            calls.set(calls.get() + 1);
            a.get() + b.get()
        }
    });

    // lazy: nothing has run yet
    assert_eq!(calls.get(), 0);

    assert_eq!(c.get(), 0);
    assert_eq!(c.get(), 0);
    assert_eq!(c.get(), 0);
    assert_eq!(calls.get(), 1);

    a.set(1);
    assert_eq!(c.get(), 1);
    assert_eq!(calls.get(), 2);
}

#[test]
fn nested_computeds() {
    let a = atom(0);
    let b = atom(0);
    let c = computed(move || a.get() + b.get());
    let d = computed(move || c.get() * 2);
    let e = computed(move || d.get() + 1);
    assert_eq!(d.get(), 0);
    a.set(5);
    assert_eq!(e.get(), 11);
    assert_eq!(d.get(), 10);
    assert_eq!(c.get(), 5);
    b.set(1);
    assert_eq!(e.get(), 13);
    assert_eq!(d.get(), 12);
    assert_eq!(c.get(), 6);
}

#[test]
fn diamond_join_recomputes_once_per_write() {
    let a = atom(1);
    let b = computed(move || a.get() + 1);
    let d = computed(move || a.get() * 10);

    let joins = Rc::new(Cell::new(0));
    let sum = computed({
        let joins = Rc::clone(&joins);
        move || {
            joins.set(joins.get() + 1);
            b.get() + d.get()
        }
    });

    assert_eq!(sum.get(), 12);
    assert_eq!(joins.get(), 1);

    a.set(2);
    assert_eq!(sum.get(), 23);
    // both paths were invalidated, but the join ran once, not twice
    assert_eq!(joins.get(), 2);
}

#[test]
fn unchanged_intermediate_value_short_circuits_downstream() {
    let a = atom(1);
    let small = computed(move || a.get() < 10);

    let downstream_runs = Rc::new(Cell::new(0));
    let label = computed({
        let downstream_runs = Rc::clone(&downstream_runs);
        move || {
            downstream_runs.set(downstream_runs.get() + 1);
            if small.get() { "small" } else { "big" }
        }
    });

    assert_eq!(label.get(), "small");
    assert_eq!(downstream_runs.get(), 1);

    // `small` recomputes but its value is unchanged, so `label` skips
    a.set(5);
    assert_eq!(label.get(), "small");
    assert_eq!(downstream_runs.get(), 1);

    a.set(50);
    assert_eq!(label.get(), "big");
    assert_eq!(downstream_runs.get(), 2);
}

#[derive(Debug)]
struct ZeroInput;

impl std::fmt::Display for ZeroInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "input was zero")
    }
}

impl std::error::Error for ZeroInput {}

#[test]
fn failed_computation_recovers_when_inputs_change() {
    let a = atom(0);
    let c = try_computed(move || {
        if a.get() == 0 {
            Err(ZeroInput)
        } else {
            Ok(a.get())
        }
    });

    assert!(c.try_get().is_err());
    assert!(c.has_error());
    assert_eq!(c.state(), ComputedState::Rejected);

    // the same error is returned again without re-running
    assert!(c.try_get().is_err());

    a.set(1);
    assert_eq!(c.try_get().unwrap(), 1);
    assert!(!c.has_error());
    assert!(c.last_error().is_none());
    assert_eq!(c.state(), ComputedState::Resolved);
}

#[test]
fn on_error_observes_the_failure() {
    let a = atom(0);
    let seen = Rc::new(Cell::new(0));
    let c = reactive_atoms::try_computed_with(
        move || {
            if a.get() == 0 {
                Err(ZeroInput)
            } else {
                Ok(a.get())
            }
        },
        ComputedOptions {
            on_error: Some(Rc::new({
                let seen = Rc::clone(&seen);
                move |_err| seen.set(seen.get() + 1)
            })),
            ..ComputedOptions::default()
        },
    );

    assert!(c.try_get().is_err());
    assert_eq!(seen.get(), 1);
    // repeated reads rethrow without re-reporting
    assert!(c.try_get().is_err());
    assert_eq!(seen.get(), 1);
}

#[test]
fn direct_cycle_fails_on_first_read() {
    let slot = Rc::new(Cell::new(None));
    let c = try_computed({
        let slot = Rc::clone(&slot);
        move || {
            let this: reactive_atoms::Computed<i32> = slot.get().unwrap();
            this.try_get()
        }
    });
    slot.set(Some(c));

    let err = c.try_get().unwrap_err();
    assert!(err.to_string().contains("circular"));
}

#[test]
fn indirect_cycle_fails_on_first_read() {
    let slot = Rc::new(Cell::new(None));
    let first = try_computed({
        let slot = Rc::clone(&slot);
        move || {
            let second: reactive_atoms::Computed<i32> = slot.get().unwrap();
            second.try_get()
        }
    });
    let second = try_computed(move || first.try_get());
    slot.set(Some(second));

    let err = first.try_get().unwrap_err();
    assert!(err.to_string().contains("circular"));
}

#[test]
fn invalidate_forces_a_recomputation() {
    let runs = Rc::new(Cell::new(0));
    let a = atom(1);
    let c = computed({
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            a.get()
        }
    });

    assert_eq!(c.get(), 1);
    assert_eq!(runs.get(), 1);

    // no input changed, but invalidate poisons the cache
    c.invalidate();
    assert_eq!(c.get(), 1);
    assert_eq!(runs.get(), 2);
}

#[test]
fn eager_computed_refreshes_during_the_flush() {
    let runs = Rc::new(Cell::new(0));
    let a = atom(1);
    let _c = computed_with(
        {
            let runs = Rc::clone(&runs);
            move || {
                runs.set(runs.get() + 1);
                a.get()
            }
        },
        ComputedOptions {
            lazy: false,
            ..ComputedOptions::default()
        },
    );

    // eager computeds evaluate at creation
    assert_eq!(runs.get(), 1);

    // and again on write, without anyone reading them
    a.set(2);
    assert_eq!(runs.get(), 2);
}

#[test]
fn observed_computed_notifies_with_new_and_old() {
    let a = atom(1);
    let doubled = computed(move || a.get() * 2);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let _sub = doubled.subscribe({
        let seen = Rc::clone(&seen);
        move |new: &i32, old: &i32| seen.borrow_mut().push((*new, *old))
    });

    a.set(3);
    assert_eq!(*seen.borrow(), [(6, 2)]);

    // equality short-circuit: same doubled value, no notification
    a.set(3);
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn default_value_seeds_the_equality_check() {
    let seeded = computed_with(
        || 5,
        ComputedOptions {
            default_value: Some(5),
            ..ComputedOptions::default()
        },
    );
    let plain = computed(|| 5);

    let seeded_before = seeded.version();
    assert_eq!(seeded.get(), 5);
    // first result equals the seed, so the version is untouched
    assert_eq!(seeded.version(), seeded_before);

    let plain_before = plain.version();
    assert_eq!(plain.get(), 5);
    assert!(plain.version() > plain_before);
}

#[test]
fn state_progression() {
    let a = atom(1);
    let c = computed(move || a.get());
    assert_eq!(c.state(), ComputedState::Idle);
    assert!(!c.is_resolved());

    assert_eq!(c.get(), 1);
    assert_eq!(c.state(), ComputedState::Resolved);
    assert!(c.is_resolved());
    assert!(!c.is_pending());
}

#[test]
fn disposed_computed_keeps_its_cached_value() {
    let a = atom(2);
    let c = computed(move || a.get() * 2);
    assert_eq!(c.get(), 4);

    c.dispose();
    assert!(c.is_disposed());
    assert_eq!(c.get(), 4);
}
