use reactive_atoms::{atom, atom_with, AtomOptions};
use std::{cell::RefCell, rc::Rc};

#[test]
fn atom_reads_and_writes() {
    let count = atom(0);
    assert_eq!(count.get(), 0);
    count.set(5);
    assert_eq!(count.get(), 5);
    count.set(-3);
    assert_eq!(count.with(|n| n * 2), -6);
}

#[test]
fn equal_writes_are_dropped() {
    let count = atom(7);
    let notifications = Rc::new(RefCell::new(Vec::new()));

    let _sub = count.subscribe({
        let notifications = Rc::clone(&notifications);
        move |new: &i32, old: &i32| {
            notifications.borrow_mut().push((*new, *old))
        }
    });

    let before = count.version();
    count.set(7);
    assert_eq!(count.version(), before);
    assert!(notifications.borrow().is_empty());

    count.set(8);
    assert!(count.version() > before);
    assert_eq!(*notifications.borrow(), [(8, 7)]);
}

#[test]
fn version_only_increases() {
    let value = atom("a");
    let mut last = value.version();
    for next in ["b", "c", "c", "d"] {
        value.set(next);
        let current = value.version();
        assert!(current >= last);
        last = current;
    }
}

#[test]
fn subscriber_sees_new_then_old() {
    let name = atom("before".to_string());
    let seen = Rc::new(RefCell::new(Vec::new()));

    let _sub = name.subscribe({
        let seen = Rc::clone(&seen);
        move |new: &String, old: &String| {
            seen.borrow_mut().push((new.clone(), old.clone()))
        }
    });

    name.set("after".to_string());
    assert_eq!(
        *seen.borrow(),
        [("after".to_string(), "before".to_string())]
    );
}

#[test]
fn unsubscribed_listener_is_not_called() {
    let count = atom(0);
    let calls = Rc::new(RefCell::new(0));

    let sub = count.subscribe({
        let calls = Rc::clone(&calls);
        move |_: &i32, _: &i32| *calls.borrow_mut() += 1
    });

    count.set(1);
    assert_eq!(*calls.borrow(), 1);

    sub.unsubscribe();
    count.set(2);
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn raw_listeners_are_not_deduplicated() {
    let count = atom(0);
    let calls = Rc::new(RefCell::new(0));

    let listener = {
        let calls = Rc::clone(&calls);
        move |_: &i32, _: &i32| *calls.borrow_mut() += 1
    };
    let _a = count.subscribe(listener.clone());
    let _b = count.subscribe(listener);

    count.set(1);
    assert_eq!(*calls.borrow(), 2);
}

#[test]
fn removal_during_notification_does_not_skip_or_resurrect() {
    let count = atom(0);
    let log = Rc::new(RefCell::new(Vec::new()));
    let third_slot = Rc::new(RefCell::new(None));

    let _first = count.subscribe({
        let log = Rc::clone(&log);
        let third_slot = Rc::clone(&third_slot);
        move |_: &i32, _: &i32| {
            log.borrow_mut().push("first");
            // remove a later listener while the pass is running
            if let Some(sub) = third_slot.borrow_mut().take() {
                let sub: reactive_atoms::Subscription = sub;
                sub.unsubscribe();
            }
        }
    });
    let _second = count.subscribe({
        let log = Rc::clone(&log);
        move |_: &i32, _: &i32| log.borrow_mut().push("second")
    });
    *third_slot.borrow_mut() = Some(count.subscribe({
        let log = Rc::clone(&log);
        move |_: &i32, _: &i32| log.borrow_mut().push("third")
    }));

    count.set(1);
    // the second listener still ran; the removed third one did not
    assert_eq!(*log.borrow(), ["first", "second"]);
}

#[test]
fn peek_reads_without_tracking() {
    // tracking behavior is covered in the untracked tests; here peek should
    // simply return the value
    let count = atom(3);
    assert_eq!(count.peek(), 3);
    assert_eq!(count.peek_with(|n| n + 1), 4);
}

#[test]
fn custom_comparator_controls_change_detection() {
    // compare only the integral part, so fractional churn is not a change
    let level = atom_with(
        1.25_f64,
        AtomOptions {
            equal: Some(Rc::new(|a: &f64, b: &f64| {
                a.trunc() == b.trunc()
            })),
        },
    );
    let before = level.version();
    level.set(1.75);
    assert_eq!(level.version(), before);
    level.set(2.25);
    assert!(level.version() > before);
}

#[test]
fn disposed_atom_rejects_writes_but_keeps_its_value() {
    let count = atom(5);
    count.dispose();
    assert!(count.is_disposed());
    assert!(count.try_set(6).is_err());
    assert_eq!(count.peek(), 5);
    assert_eq!(count.get(), 5);
}

#[test]
#[should_panic(expected = "disposed")]
fn setting_a_disposed_atom_panics() {
    let count = atom(0);
    count.dispose();
    count.set(1);
}

#[test]
fn dispose_is_idempotent_and_severs_subscribers() {
    let count = atom(0);
    let calls = Rc::new(RefCell::new(0));
    let _sub = count.subscribe({
        let calls = Rc::clone(&calls);
        move |_: &i32, _: &i32| *calls.borrow_mut() += 1
    });

    count.dispose();
    count.dispose();
    assert!(count.try_set(1).is_err());
    assert_eq!(*calls.borrow(), 0);
}
