use crate::{
    error::ComputedError,
    node::{flags, AnyComputation, ComputedData, NodeId, ReactiveNode},
    runtime::{with_runtime, FrameGuard, Runtime},
    scheduler::BatchGuard,
    stream::ValueStream,
    subscribers::{ListenerFn, Subscription},
};
use std::{any::Any, cell::RefCell, marker::PhantomData, rc::Rc};

/// Resting state of a computed, as reported by [`Computed::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// Never evaluated.
    Idle,
    /// Invalidated and queued for refresh in the current flush.
    Pending,
    /// Holding a successfully computed value.
    Resolved,
    /// The last evaluation failed; reads return the stored error until a
    /// dependency changes.
    Rejected,
}

/// Options accepted by [`computed_with`] and [`try_computed_with`].
pub struct ComputedOptions<T> {
    /// Comparator deciding whether a recomputation produced a material
    /// change. Defaults to `PartialEq`.
    pub equal: Option<Rc<dyn Fn(&T, &T) -> bool>>,
    /// Seed for the cache: the first evaluation is compared against it, and
    /// a first result equal to the seed leaves the version untouched.
    pub default_value: Option<T>,
    /// Lazy computeds (the default) recompute when read; eager ones recompute
    /// during the flush that invalidated them.
    pub lazy: bool,
    /// Invoked once per failed evaluation with the captured error.
    pub on_error: Option<Rc<dyn Fn(&ComputedError)>>,
}

impl<T> Default for ComputedOptions<T> {
    fn default() -> Self {
        Self {
            equal: None,
            default_value: None,
            lazy: true,
            on_error: None,
        }
    }
}

/// Creates a derived reactive value.
///
/// The computation runs inside a tracking scope: every atom or computed it
/// reads becomes a dependency. It re-runs only when one of them has actually
/// changed, no matter how often it is read, and it notifies its own
/// dependents only when the computed value itself changes.
///
/// ```
/// use reactive_atoms::{atom, computed};
///
/// let base = atom(2);
/// let squared = computed(move || base.get() * base.get());
/// assert_eq!(squared.get(), 4);
/// base.set(3);
/// assert_eq!(squared.get(), 9);
/// ```
#[track_caller]
pub fn computed<T>(f: impl Fn() -> T + 'static) -> Computed<T>
where
    T: PartialEq + 'static,
{
    computed_with(f, ComputedOptions::default())
}

/// Creates a computed with explicit [`ComputedOptions`].
#[track_caller]
pub fn computed_with<T>(
    f: impl Fn() -> T + 'static,
    options: ComputedOptions<T>,
) -> Computed<T>
where
    T: PartialEq + 'static,
{
    create(move || Ok(f()), options)
}

/// Creates a computed whose computation can fail. The error is captured,
/// reported through `on_error`, and returned from `try_get` on the failing
/// read and every later read until a dependency changes.
#[track_caller]
pub fn try_computed<T, E>(
    f: impl Fn() -> Result<T, E> + 'static,
) -> Computed<T>
where
    T: PartialEq + 'static,
    E: std::error::Error + 'static,
{
    try_computed_with(f, ComputedOptions::default())
}

/// Fallible variant of [`computed_with`].
#[track_caller]
pub fn try_computed_with<T, E>(
    f: impl Fn() -> Result<T, E> + 'static,
    options: ComputedOptions<T>,
) -> Computed<T>
where
    T: PartialEq + 'static,
    E: std::error::Error + 'static,
{
    create(
        move || {
            f().map_err(|err| {
                ComputedError::Evaluation(Rc::new(err))
            })
        },
        options,
    )
}

#[track_caller]
fn create<T>(
    f: impl Fn() -> Result<T, ComputedError> + 'static,
    options: ComputedOptions<T>,
) -> Computed<T>
where
    T: PartialEq + 'static,
{
    let equal = options
        .equal
        .unwrap_or_else(|| Rc::new(|a: &T, b: &T| a == b));
    let computation = Rc::new(Computation { f, equal });
    let initial = options
        .default_value
        .map(|value| Rc::new(value) as Rc<dyn Any>);
    let lazy = options.lazy;
    let data = ComputedData {
        f: computation,
        lazy,
        on_error: options.on_error,
        last_error: RefCell::new(None),
    };
    let id = with_runtime(|runtime| {
        runtime
            .insert_node(|seq| ReactiveNode::new_computed(seq, initial, data))
    });
    // an eager computed evaluates up front so the graph has edges to
    // invalidate it through
    if !lazy {
        _ = with_runtime(|runtime| update_if_necessary(runtime, id));
    }
    Computed {
        id,
        ty: PhantomData,
        #[cfg(debug_assertions)]
        defined_at: std::panic::Location::caller(),
    }
}

struct Computation<T, F> {
    f: F,
    equal: Rc<dyn Fn(&T, &T) -> bool>,
}

impl<T, F> AnyComputation for Computation<T, F>
where
    T: 'static,
    F: Fn() -> Result<T, ComputedError>,
{
    fn run(
        &self,
        value: Rc<RefCell<Option<Rc<dyn Any>>>>,
    ) -> Result<bool, ComputedError> {
        let new = (self.f)()?;
        let mut slot = value.borrow_mut();
        let changed = match slot.as_ref().and_then(|v| v.downcast_ref::<T>()) {
            Some(old) => !(self.equal)(old, &new),
            None => true,
        };
        if changed {
            *slot = Some(Rc::new(new));
        }
        Ok(changed)
    }
}

/// A derived reactive value; see [`computed`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Computed<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Computed<T> {}

impl<T> Computed<T>
where
    T: 'static,
{
    /// Clones and returns the value, recomputing it if stale, and subscribes
    /// the running computation.
    ///
    /// # Panics
    /// Panics when the computation failed or a cycle was detected; use
    /// [`Computed::try_get`] to handle those as values.
    #[track_caller]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.try_get().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible form of [`Computed::get`].
    pub fn try_get(&self) -> Result<T, ComputedError>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Applies `f` to the current value without cloning.
    #[track_caller]
    pub fn with<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        self.try_with(f).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible form of [`Computed::with`]. The dependency on this computed
    /// is registered whether or not the evaluation succeeded, so the caller
    /// re-runs once the computed recovers.
    pub fn try_with<O>(
        &self,
        f: impl FnOnce(&T) -> O,
    ) -> Result<O, ComputedError> {
        let updated = with_runtime(|runtime| {
            let updated = update_if_necessary(runtime, self.id);
            runtime.track_dependency(self.id);
            updated
        });
        updated?;
        let value = with_runtime(|runtime| runtime.value_snapshot(self.id))
            .ok_or(ComputedError::Disposed)?;
        let value = value
            .downcast_ref::<T>()
            .expect("computed value to have the handle's type");
        Ok(f(value))
    }

    /// Returns the value without registering a dependency. Stale values are
    /// still recomputed first.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.peek_with(T::clone)
    }

    /// Applies `f` to the value without registering a dependency.
    pub fn peek_with<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        let updated =
            with_runtime(|runtime| update_if_necessary(runtime, self.id));
        if let Err(err) = updated {
            panic!("{err}");
        }
        let value = with_runtime(|runtime| runtime.value_snapshot(self.id))
            .expect("computed to hold a value after a successful update");
        let value = value
            .downcast_ref::<T>()
            .expect("computed value to have the handle's type");
        f(value)
    }

    /// Current resting state.
    pub fn state(&self) -> ComputedState {
        with_runtime(|runtime| {
            let nodes = runtime.nodes.borrow();
            match nodes.get(self.id) {
                None => ComputedState::Idle,
                Some(node) => {
                    if node.has(flags::REJECTED) {
                        ComputedState::Rejected
                    } else if node.has(flags::PENDING) {
                        ComputedState::Pending
                    } else if node.has(flags::RESOLVED) {
                        ComputedState::Resolved
                    } else {
                        ComputedState::Idle
                    }
                }
            }
        })
    }

    pub fn is_pending(&self) -> bool {
        self.state() == ComputedState::Pending
    }

    pub fn is_resolved(&self) -> bool {
        self.state() == ComputedState::Resolved
    }

    /// True while the last evaluation's error is still standing.
    pub fn has_error(&self) -> bool {
        with_runtime(|runtime| {
            runtime
                .nodes
                .borrow()
                .get(self.id)
                .map(|node| node.has(flags::HAS_ERROR))
                .unwrap_or(false)
        })
    }

    /// The error captured by the last failed evaluation, if it is still
    /// standing.
    pub fn last_error(&self) -> Option<ComputedError> {
        with_runtime(|runtime| {
            let nodes = runtime.nodes.borrow();
            let node = nodes.get(self.id)?;
            let data = node.computed()?;
            let err = data.last_error.borrow().clone();
            err
        })
    }

    /// Registers a raw listener called with `(new, old)` after each settling
    /// pass in which the computed's value changed.
    ///
    /// Subscribing materializes the computed: it is evaluated if it never has
    /// been, so that invalidations can reach it through the graph.
    pub fn subscribe(&self, f: impl Fn(&T, &T) + 'static) -> Subscription {
        _ = with_runtime(|runtime| update_if_necessary(runtime, self.id));
        // change history starts here, unless a notification is already owed
        with_runtime(|runtime| {
            let nodes = runtime.nodes.borrow();
            if let Some(node) = nodes.get(self.id) {
                if !node.has(flags::PENDING) {
                    node.pending_old.borrow_mut().take();
                }
            }
        });
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

    /// A [`futures::Stream`] of values, starting with the current one.
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

    /// Marks the computed stale and propagates, forcing a recomputation even
    /// though no dependency changed: eager or observed computeds refresh in
    /// the flush this schedules, lazy ones on their next read.
    pub fn invalidate(&self) {
        with_runtime(|runtime| {
            {
                let nodes = runtime.nodes.borrow();
                let Some(node) = nodes.get(self.id) else {
                    return;
                };
                if node.disposed.get() {
                    return;
                }
                node.add(flags::DIRTY);
            }
            // poison the captured versions so the no-op check misses
            if let Some(sources) = runtime.node_sources.borrow().get(self.id)
            {
                for (_, rec) in sources.borrow_mut().iter_mut() {
                    rec.version = u64::MAX;
                }
            }
            crate::scheduler::queue_refresh_if_observed(runtime, self.id);
            crate::scheduler::propagate(runtime, self.id);
            crate::scheduler::flush(runtime);
        });
    }

    /// Detaches the computed from the graph. The cached value stays readable.
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

    /// Version counter; bumped once per material change of the cached value.
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

// ---------------------------------------------------------------------------
// Update machinery
// ---------------------------------------------------------------------------

/// Brings the computed up to date: no-op when clean, version-checked skip
/// when only transitively invalidated, full recomputation otherwise.
pub(crate) fn update_if_necessary(
    runtime: &Runtime,
    id: NodeId,
) -> Result<(), ComputedError> {
    enum Freshness {
        Clean,
        CleanRejected(ComputedError),
        MaybeStale,
        FirstRun,
    }

    let freshness = {
        let nodes = runtime.nodes.borrow();
        let Some(node) = nodes.get(id) else {
            return Err(ComputedError::Disposed);
        };
        if node.has(flags::RECOMPUTING) {
            return Err(ComputedError::Cycle);
        }
        if node.disposed.get() {
            return if node.value.borrow().is_some() {
                Ok(())
            } else {
                Err(ComputedError::Disposed)
            };
        }
        if !node.has(flags::DIRTY) && !node.has(flags::IDLE) {
            if node.has(flags::REJECTED) {
                let err = node
                    .computed()
                    .and_then(|data| data.last_error.borrow().clone())
                    .expect("rejected computed to carry its error");
                Freshness::CleanRejected(err)
            } else {
                Freshness::Clean
            }
        } else if node.has(flags::IDLE) {
            Freshness::FirstRun
        } else {
            Freshness::MaybeStale
        }
    };

    match freshness {
        Freshness::Clean => return Ok(()),
        Freshness::CleanRejected(err) => return Err(err),
        Freshness::FirstRun => {}
        Freshness::MaybeStale => {
            if deps_unchanged(runtime, id) {
                let nodes = runtime.nodes.borrow();
                if let Some(node) = nodes.get(id) {
                    node.clear(flags::DIRTY);
                    if node.has(flags::REJECTED) {
                        let err = node
                            .computed()
                            .and_then(|data| {
                                data.last_error.borrow().clone()
                            })
                            .expect("rejected computed to carry its error");
                        return Err(err);
                    }
                    if node.has(flags::PENDING) {
                        node.set_resting(flags::RESOLVED);
                    }
                }
                return Ok(());
            }
        }
    }

    recompute(runtime, id).map(|_| ())
}

/// True when every recorded dependency still has the version captured at the
/// last run and none was disposed. Stale computed dependencies are refreshed
/// first, so a diamond's join sees settled versions.
fn deps_unchanged(runtime: &Runtime, id: NodeId) -> bool {
    let deps: Vec<(NodeId, u64)> = {
        let sources = runtime.node_sources.borrow();
        match sources.get(id) {
            Some(map) => map
                .borrow()
                .iter()
                .map(|(source, rec)| (*source, rec.version))
                .collect(),
            None => Vec::new(),
        }
    };
    for (source, captured) in deps {
        let stale_computed = {
            let nodes = runtime.nodes.borrow();
            match nodes.get(source) {
                None => return false,
                Some(node) => {
                    if node.disposed.get() {
                        return false;
                    }
                    node.computed().is_some()
                        && (node.has(flags::DIRTY) || node.has(flags::IDLE))
                }
            }
        };
        if stale_computed && update_if_necessary(runtime, source).is_err() {
            return false;
        }
        let current = {
            let nodes = runtime.nodes.borrow();
            nodes.get(source).map(|node| node.version.get())
        };
        if current != Some(captured) {
            return false;
        }
    }
    true
}

fn recompute(runtime: &Runtime, id: NodeId) -> Result<bool, ComputedError> {
    let (f, cell, on_error) = {
        let nodes = runtime.nodes.borrow();
        let node = nodes.get(id).ok_or(ComputedError::Disposed)?;
        let data = node
            .computed()
            .expect("computed handle points at a non-computed node");
        node.add(flags::RECOMPUTING);
        (Rc::clone(&data.f), Rc::clone(&node.value), data.on_error.clone())
    };

    #[cfg(debug_assertions)]
    if crate::diagnostics::check_circular(runtime, id) {
        crate::macros::debug_warn!(
            "indirect circular dependency detected before recomputation"
        );
        let err = ComputedError::Cycle;
        settle_error(runtime, id, &err, on_error.as_deref());
        return Err(err);
    }

    let old = cell.borrow().clone();
    let result = {
        let _depth = BatchGuard::enter();
        let _frame = FrameGuard::push(Some(id));
        f.run(Rc::clone(&cell))
    };

    match result {
        Ok(changed) => {
            let nodes = runtime.nodes.borrow();
            if let Some(node) = nodes.get(id) {
                node.clear(flags::RECOMPUTING | flags::DIRTY | flags::HAS_ERROR);
                node.set_resting(flags::RESOLVED);
                if changed {
                    node.version.set(node.version.get() + 1);
                    // snapshot for the value-change notification this node
                    // now owes its raw listeners
                    if let Some(old) = old {
                        let mut pending = node.pending_old.borrow_mut();
                        if pending.is_none() {
                            *pending = Some(old);
                        }
                    }
                }
                if let Some(data) = node.computed() {
                    *data.last_error.borrow_mut() = None;
                }
            }
            Ok(changed)
        }
        Err(err) => {
            settle_error(runtime, id, &err, on_error.as_deref());
            Err(err)
        }
    }
}

fn settle_error(
    runtime: &Runtime,
    id: NodeId,
    err: &ComputedError,
    on_error: Option<&dyn Fn(&ComputedError)>,
) {
    {
        let nodes = runtime.nodes.borrow();
        if let Some(node) = nodes.get(id) {
            node.clear(flags::RECOMPUTING | flags::DIRTY);
            node.add(flags::HAS_ERROR);
            node.set_resting(flags::REJECTED);
            if let Some(data) = node.computed() {
                *data.last_error.borrow_mut() = Some(err.clone());
            }
        }
    }
    if let Some(on_error) = on_error {
        on_error(err);
    }
}

/// Scheduler entry point: refreshes an invalidated computed during a flush
/// and reports whether its raw listeners are owed a notification. A standing
/// old-value capture means the value changed since the last delivery, even
/// when the recomputation happened on an earlier read rather than here.
pub(crate) fn refresh(runtime: &Runtime, id: NodeId) -> bool {
    {
        let nodes = runtime.nodes.borrow();
        let Some(node) = nodes.get(id) else {
            return false;
        };
        if node.disposed.get() {
            return false;
        }
    }
    _ = update_if_necessary(runtime, id);
    let nodes = runtime.nodes.borrow();
    nodes
        .get(id)
        .map(|node| node.pending_old.borrow().is_some())
        .unwrap_or(false)
}
