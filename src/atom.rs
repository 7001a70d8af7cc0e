use crate::{
    error::AtomError,
    node::{erase_equal, NodeId, NodeKind, ReactiveNode},
    runtime::with_runtime,
    stream::ValueStream,
    subscribers::{ListenerFn, Subscription},
};
use std::{any::Any, marker::PhantomData, rc::Rc};

/// Options accepted by [`atom_with`].
pub struct AtomOptions<T> {
    /// Comparator deciding whether a write is a material change. Defaults to
    /// `PartialEq`; comparing references or keys instead of deep contents is
    /// the host's call.
    pub equal: Option<Rc<dyn Fn(&T, &T) -> bool>>,
}

impl<T> Default for AtomOptions<T> {
    fn default() -> Self {
        Self { equal: None }
    }
}

/// Creates a writable reactive cell.
///
/// Reading it inside a computed or effect subscribes that computation to the
/// atom; writing it invalidates and re-runs dependents in the next settling
/// pass.
///
/// ```
/// use reactive_atoms::{atom, computed};
///
/// let count = atom(0);
/// let double = computed(move || count.get() * 2);
/// assert_eq!(double.get(), 0);
/// count.set(5);
/// assert_eq!(double.get(), 10);
/// ```
#[track_caller]
pub fn atom<T>(initial: T) -> Atom<T>
where
    T: PartialEq + 'static,
{
    atom_with(initial, AtomOptions::default())
}

/// Creates an atom with a custom comparator.
#[track_caller]
pub fn atom_with<T>(initial: T, options: AtomOptions<T>) -> Atom<T>
where
    T: PartialEq + 'static,
{
    let equal = erase_equal(
        options
            .equal
            .unwrap_or_else(|| Rc::new(|a: &T, b: &T| a == b)),
    );
    let id = with_runtime(|runtime| {
        runtime.insert_node(|seq| {
            ReactiveNode::new_atom(seq, Rc::new(initial), equal)
        })
    });
    Atom {
        id,
        ty: PhantomData,
        #[cfg(debug_assertions)]
        defined_at: std::panic::Location::caller(),
    }
}

/// A writable reactive cell.
///
/// `Atom` is `Copy` and `'static`, so it moves freely into the closures of
/// computeds and effects. All handles to one atom share the same underlying
/// node.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Atom<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Atom<T> {}

impl<T> Atom<T>
where
    T: 'static,
{
    /// Clones and returns the value, subscribing the running computation.
    #[track_caller]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Applies `f` to the current value without cloning, subscribing the
    /// running computation.
    #[track_caller]
    pub fn with<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        with_runtime(|runtime| runtime.track_dependency(self.id));
        self.read(f)
    }

    /// Clones and returns the value WITHOUT registering a dependency.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.peek_with(T::clone)
    }

    /// Applies `f` to the current value without registering a dependency.
    pub fn peek_with<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        self.read(f)
    }

    fn read<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        let (value, disposed) = with_runtime(|runtime| {
            let nodes = runtime.nodes.borrow();
            let node = nodes.get(self.id).expect(
                "tried to read an atom whose runtime has been reset",
            );
            let value = node
                .value
                .borrow()
                .clone()
                .expect("atom to hold a value");
            (value, node.disposed.get())
        });
        #[cfg(debug_assertions)]
        if disposed {
            crate::macros::debug_warn!(
                "reading an atom (created at {}) after it was disposed; \
                 returning the last value",
                self.defined_at
            );
        }
        _ = disposed;
        let value = value
            .downcast_ref::<T>()
            .expect("atom value to have the handle's type");
        f(value)
    }

    /// Sets the value. Writes that compare equal to the current value are
    /// dropped without bumping the version or notifying anyone.
    ///
    /// # Panics
    /// Panics when the atom has been disposed; use [`Atom::try_set`] to
    /// handle that case.
    #[track_caller]
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            panic!("{err}");
        }
    }

    /// Sets the value, reporting a write to a disposed atom as an error.
    pub fn try_set(&self, value: T) -> Result<(), AtomError> {
        with_runtime(|runtime| {
            let (cell, equal) = {
                let nodes = runtime.nodes.borrow();
                let Some(node) = nodes.get(self.id) else {
                    return Err(AtomError::Disposed);
                };
                if node.disposed.get() {
                    return Err(AtomError::Disposed);
                }
                let NodeKind::Atom { equal } = &node.kind else {
                    unreachable!("atom handle points at a non-atom node")
                };
                (Rc::clone(&node.value), Rc::clone(equal))
            };

            let old = cell.borrow().clone().expect("atom to hold a value");
            if equal(old.as_ref(), &value) {
                return Ok(());
            }

            let new: Rc<dyn Any> = Rc::new(value);
            *cell.borrow_mut() = Some(new);
            {
                let nodes = runtime.nodes.borrow();
                if let Some(node) = nodes.get(self.id) {
                    node.version.set(node.version.get() + 1);
                    // first write of the settling pass captures the old
                    // value; later writes coalesce into it
                    let mut pending = node.pending_old.borrow_mut();
                    if pending.is_none() {
                        *pending = Some(old);
                    }
                }
            }
            runtime.note_tracked_write(self.id);
            crate::scheduler::propagate(runtime, self.id);
            crate::scheduler::flush(runtime);
            Ok(())
        })
    }

    /// Registers a raw listener called with `(new, old)` after each settling
    /// pass in which the value changed.
    pub fn subscribe(&self, f: impl Fn(&T, &T) + 'static) -> Subscription {
        let callback: Rc<ListenerFn> =
            Rc::new(move |new: &dyn Any, old: &dyn Any| {
                if let (Some(new), Some(old)) =
                    (new.downcast_ref::<T>(), old.downcast_ref::<T>())
                {
                    f(new, old);
                }
            });
        let key = with_runtime(|runtime| {
            runtime.subscribe_callback(self.id, callback)
        });
        Subscription {
            source: self.id,
            key,
        }
    }

    /// A [`futures::Stream`] of values, starting with the current one. The
    /// internal subscription is removed when the stream is dropped.
    pub fn to_stream(&self) -> ValueStream<T>
    where
        T: Clone,
    {
        ValueStream::new(self.peek(), |tx| {
            self.subscribe(move |new: &T, _| {
                _ = tx.unbounded_send(new.clone());
            })
        })
    }

    /// Severs all subscribers and rejects further writes. Reads keep
    /// returning the last value. Idempotent.
    pub fn dispose(&self) {
        with_runtime(|runtime| runtime.dispose_node(self.id));
    }

    pub fn is_disposed(&self) -> bool {
        with_runtime(|runtime| {
            runtime
                .nodes
                .borrow()
                .get(self.id)
                .map(|node| node.disposed.get())
                .unwrap_or(true)
        })
    }

    /// The atom's version counter; bumped once per material change.
    pub fn version(&self) -> u64 {
        with_runtime(|runtime| {
            runtime
                .nodes
                .borrow()
                .get(self.id)
                .map(|node| node.version.get())
                .unwrap_or(0)
        })
    }
}
