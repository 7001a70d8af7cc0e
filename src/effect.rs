use crate::{
    error::EffectError,
    macros::debug_warn,
    node::{flags, AnyEffectFn, EffectData, NodeId, ReactiveNode},
    runtime::{with_runtime, FrameGuard, Runtime, EXECUTION_WINDOW_CAP},
    scheduler::BatchGuard,
};
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    marker::PhantomData,
    rc::Rc,
    time::{Duration, Instant},
};

/// Options accepted by [`effect_with`].
#[derive(Clone)]
pub struct EffectOptions {
    /// Sync effects run in the flush's notification phase; async effects (the
    /// default) run in the trailing drain of the same flush, after all
    /// notifications and sync effects have settled.
    pub sync: bool,
    /// Loop guard budget. An effect observed running more often than this
    /// within one second disposes itself.
    pub max_executions_per_second: u32,
    /// Debug aid: warn when the effect writes to an atom it also reads.
    pub track_modifications: bool,
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self {
            sync: false,
            max_executions_per_second: 100,
            track_modifications: false,
        }
    }
}

/// Conversion applied to an effect body's return value. Returning `()` means
/// no cleanup; returning a closure registers it to run before the next
/// execution and on dispose.
pub trait IntoCleanup {
    fn into_cleanup(self) -> Option<Box<dyn FnOnce()>>;
}

impl IntoCleanup for () {
    fn into_cleanup(self) -> Option<Box<dyn FnOnce()>> {
        None
    }
}

impl<F> IntoCleanup for F
where
    F: FnOnce() + 'static,
{
    fn into_cleanup(self) -> Option<Box<dyn FnOnce()>> {
        Some(Box::new(self))
    }
}

struct EffectFn<F, C> {
    f: F,
    ty: PhantomData<C>,
}

impl<F, C> AnyEffectFn for EffectFn<F, C>
where
    F: Fn() -> C,
    C: IntoCleanup,
{
    fn run(&self) -> Option<Box<dyn FnOnce()>> {
        (self.f)().into_cleanup()
    }
}

/// Runs `f` once immediately inside a tracking scope and re-runs it whenever
/// one of the atoms or computeds it read changes.
///
/// Effects are for synchronizing the reactive graph with the outside world.
/// An effect that writes to an atom it reads re-schedules itself; the loop
/// guard disposes it once it exceeds its rate limit.
///
/// ```
/// use reactive_atoms::{atom, effect};
/// use std::{cell::RefCell, rc::Rc};
///
/// let name = atom("world");
/// let log = Rc::new(RefCell::new(Vec::new()));
/// let handle = effect({
///     let log = Rc::clone(&log);
///     move || log.borrow_mut().push(format!("hello, {}", name.get()))
/// });
/// name.set("atoms");
/// assert_eq!(*log.borrow(), ["hello, world", "hello, atoms"]);
/// handle.dispose();
/// ```
#[track_caller]
pub fn effect<C>(f: impl Fn() -> C + 'static) -> EffectHandle
where
    C: IntoCleanup + 'static,
{
    effect_with(f, EffectOptions::default())
}

/// Creates an effect with explicit [`EffectOptions`].
#[track_caller]
pub fn effect_with<C>(
    f: impl Fn() -> C + 'static,
    options: EffectOptions,
) -> EffectHandle
where
    C: IntoCleanup + 'static,
{
    let data = EffectData {
        f: Rc::new(EffectFn {
            f,
            ty: PhantomData,
        }),
        cleanup: RefCell::new(None),
        sync: options.sync,
        rate_limit: options.max_executions_per_second,
        track_modifications: options.track_modifications,
        exec_count: Cell::new(0),
        window: RefCell::new(VecDeque::new()),
    };
    let id = with_runtime(|runtime| {
        runtime.insert_node(|seq| ReactiveNode::new_effect(seq, data))
    });
    with_runtime(|runtime| run_effect(runtime, id));
    EffectHandle {
        id,
        #[cfg(debug_assertions)]
        defined_at: std::panic::Location::caller(),
    }
}

/// Handle to a running effect; see [`effect`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct EffectHandle {
    pub(crate) id: NodeId,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl Clone for EffectHandle {
    fn clone(&self) -> Self {
        *self
    }
}

impl Copy for EffectHandle {}

impl EffectHandle {
    /// Forces a re-run, subject to the same coalescing and rate limiting as a
    /// scheduled run.
    pub fn run(&self) {
        with_runtime(|runtime| run_effect(runtime, self.id));
    }

    /// Runs the pending cleanup, unsubscribes from every dependency, and
    /// marks the effect disposed. Idempotent.
    pub fn dispose(&self) {
        with_runtime(|runtime| dispose(runtime, self.id));
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

    /// How many times the effect body has run, including the initial run.
    pub fn execution_count(&self) -> u64 {
        with_runtime(|runtime| {
            runtime
                .nodes
                .borrow()
                .get(self.id)
                .and_then(|node| node.effect())
                .map(|data| data.exec_count.get())
                .unwrap_or(0)
        })
    }
}

/// Clears the `EXECUTING` bit on every exit path so a panicking effect body
/// does not wedge the node.
struct ExecutingGuard(NodeId);

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        with_runtime(|runtime| {
            if let Some(node) = runtime.nodes.borrow().get(self.0) {
                node.clear(flags::EXECUTING);
            }
        });
    }
}

pub(crate) fn run_scheduled(runtime: &Runtime, id: NodeId) {
    run_effect(runtime, id);
}

pub(crate) fn run_effect(runtime: &Runtime, id: NodeId) {
    let f = {
        let nodes = runtime.nodes.borrow();
        let Some(node) = nodes.get(id) else {
            return;
        };
        // a schedule landing while the body is on the stack is dropped;
        // the write that caused it re-queues the effect for the next pass
        if node.disposed.get() || node.has(flags::EXECUTING) {
            return;
        }
        let Some(data) = node.effect() else {
            return;
        };
        Rc::clone(&data.f)
    };

    let now = Instant::now();
    let over_limit = {
        let nodes = runtime.nodes.borrow();
        let Some(data) = nodes.get(id).and_then(|node| node.effect()) else {
            return;
        };
        let mut window = data.window.borrow_mut();
        if let Some(cutoff) = now.checked_sub(Duration::from_secs(1)) {
            while window.front().is_some_and(|t| *t < cutoff) {
                window.pop_front();
            }
        }
        window.len() as u32 >= data.rate_limit
    };
    if over_limit {
        let rate = {
            let nodes = runtime.nodes.borrow();
            nodes
                .get(id)
                .and_then(|node| node.effect())
                .map(|data| data.rate_limit)
                .unwrap_or(0)
        };
        let err = EffectError::RateLimitExceeded(rate);
        debug_warn!("{err}");
        dispose(runtime, id);
        return;
    }

    let cleanup = {
        let nodes = runtime.nodes.borrow();
        let Some(node) = nodes.get(id) else {
            return;
        };
        let data = node.effect().expect("effect handle points at an effect");
        let mut window = data.window.borrow_mut();
        window.push_back(now);
        if window.len() > EXECUTION_WINDOW_CAP {
            window.pop_front();
        }
        data.exec_count.set(data.exec_count.get() + 1);
        node.add(flags::EXECUTING);
        let taken = data.cleanup.borrow_mut().take();
        taken
    };

    // writes inside the cleanup or the body defer to the guard's flush
    let depth = BatchGuard::enter();
    let executing = ExecutingGuard(id);
    if let Some(cleanup) = cleanup {
        cleanup();
    }
    let new_cleanup = {
        let _frame = FrameGuard::push(Some(id));
        f.run()
    };
    let leftover = {
        let nodes = runtime.nodes.borrow();
        match nodes.get(id) {
            Some(node) if !node.disposed.get() => {
                if let Some(data) = node.effect() {
                    *data.cleanup.borrow_mut() = new_cleanup;
                }
                None
            }
            // the body disposed its own effect; its cleanup runs now
            _ => new_cleanup,
        }
    };
    if let Some(cleanup) = leftover {
        cleanup();
    }
    drop(executing);
    drop(depth);
}

pub(crate) fn dispose(runtime: &Runtime, id: NodeId) {
    let cleanup = {
        let nodes = runtime.nodes.borrow();
        nodes
            .get(id)
            .and_then(|node| node.effect())
            .and_then(|data| data.cleanup.borrow_mut().take())
    };
    if let Some(cleanup) = cleanup {
        cleanup();
    }
    runtime.dispose_node(id);
}
