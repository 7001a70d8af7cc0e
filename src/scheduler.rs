//! Write propagation, batching, and the flush.
//!
//! A committed write propagates immediately: dependents are walked and
//! computeds flip to dirty, so any read — even mid-batch — sees coherent
//! state. Notification and effect runs are what defer: origins land in the
//! filling side of a double-buffered queue, and the flush at batch depth
//! zero drains it in passes until quiescent.

use crate::{
    computed,
    effect,
    error::BatchError,
    macros::debug_warn,
    node::{flags, NodeId, NodeKind},
    runtime::{with_runtime, Runtime, MAX_FLUSH_PASSES},
    subscribers::{Listener, SubscriberKey},
};
use std::{any::Any, collections::VecDeque, rc::Rc};

/// One raw-listener delivery, captured during a flush pass. The listener is
/// looked up again by key at delivery time, so a subscriber removed mid-pass
/// is skipped without disturbing its neighbors.
pub(crate) struct Notification {
    pub source: NodeId,
    pub key: SubscriberKey,
    pub new: Rc<dyn Any>,
    pub old: Rc<dyn Any>,
}

/// Holds a unit of batch depth; the flush at depth zero runs on drop, so
/// committed writes are delivered even when the batched closure unwinds.
pub(crate) struct BatchGuard;

impl BatchGuard {
    pub fn enter() -> Self {
        with_runtime(|runtime| {
            runtime.batch_depth.set(runtime.batch_depth.get() + 1)
        });
        BatchGuard
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        with_runtime(|runtime| {
            let depth = runtime.batch_depth.get() - 1;
            runtime.batch_depth.set(depth);
            if depth == 0 {
                flush(runtime);
            }
        });
    }
}

/// Defers notifications and effect runs until `f` returns, so a burst of
/// writes produces a single settling pass. Batches nest; only the outermost
/// one flushes. The value of `f` is returned verbatim.
///
/// Writes are applied (and computeds invalidated) immediately — reads inside
/// the batch stay coherent; only observers wait.
///
/// ```
/// use reactive_atoms::{atom, batch};
///
/// let a = atom(1);
/// let b = atom(2);
/// let sum = batch(|| {
///     a.set(10);
///     b.set(20);
///     a.peek() + b.peek()
/// });
/// assert_eq!(sum, 30);
/// ```
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    let guard = BatchGuard::enter();
    let value = f();
    drop(guard);
    value
}

/// Propagates a committed change: `origin` queues for listener notification
/// and its dependents are marked immediately, so reads stay coherent even
/// inside a batch.
pub(crate) fn propagate(runtime: &Runtime, origin: NodeId) {
    runtime.enqueue_dirty(origin);
    mark_dependents(runtime, origin);
}

/// Walks `origin`'s dependents breadth-first: computeds flip to dirty
/// (stopping at ones already dirty, whose downstream was marked when they
/// were), refresh-worthy computeds and effects queue for the flush. Also
/// re-run when the origin is drained, which picks up subscriptions that
/// formed after the write — an effect's first run writing to an atom it just
/// read subscribes only as the run exits.
fn mark_dependents(runtime: &Runtime, origin: NodeId) {
    let epoch = runtime.next_epoch();
    if let Some(node) = runtime.nodes.borrow().get(origin) {
        node.last_seen_epoch.set(epoch);
    }

    let mut walk: VecDeque<NodeId> = VecDeque::new();
    walk.push_back(origin);

    while let Some(id) = walk.pop_front() {
        let subscribers: Vec<NodeId> = {
            match runtime.node_subscribers.borrow().get(id) {
                Some(list) => list.borrow().node_ids().collect(),
                None => Vec::new(),
            }
        };
        for sub in subscribers {
            enum Visit {
                FreshComputed,
                Effect,
                Skip,
            }
            let visit = {
                let nodes = runtime.nodes.borrow();
                match nodes.get(sub) {
                    Some(node)
                        if !node.disposed.get()
                            && node.last_seen_epoch.get() != epoch =>
                    {
                        node.last_seen_epoch.set(epoch);
                        match &node.kind {
                            NodeKind::Computed(_) => {
                                if node.has(flags::DIRTY) {
                                    // already invalidated; its dependents
                                    // and effects were queued back then
                                    Visit::Skip
                                } else {
                                    node.add(flags::DIRTY);
                                    Visit::FreshComputed
                                }
                            }
                            NodeKind::Effect(_) => Visit::Effect,
                            NodeKind::Atom { .. } => Visit::Skip,
                        }
                    }
                    _ => Visit::Skip,
                }
            };
            match visit {
                Visit::FreshComputed => {
                    queue_refresh_if_observed(runtime, sub);
                    walk.push_back(sub);
                }
                Visit::Effect => {
                    let fresh = {
                        let nodes = runtime.nodes.borrow();
                        match nodes.get(sub) {
                            Some(node) if !node.has(flags::QUEUED) => {
                                node.add(flags::QUEUED);
                                true
                            }
                            _ => false,
                        }
                    };
                    if fresh {
                        runtime.pending_effects.borrow_mut().push(sub);
                    }
                }
                Visit::Skip => {}
            }
        }
    }
}

/// Queues an invalidated computed for refresh during the flush: eager
/// computeds always, lazy ones only when raw listeners observe them. The
/// `PENDING` resting state marks queue membership.
pub(crate) fn queue_refresh_if_observed(runtime: &Runtime, id: NodeId) {
    let observed = match runtime.node_subscribers.borrow().get(id) {
        Some(list) => list.borrow().has_callbacks(),
        None => false,
    };
    let queued = {
        let nodes = runtime.nodes.borrow();
        match nodes.get(id) {
            Some(node) => match node.computed() {
                Some(data)
                    if (!data.lazy || observed)
                        && !node.has(flags::PENDING) =>
                {
                    node.set_resting(flags::PENDING);
                    true
                }
                _ => false,
            },
            None => false,
        }
    };
    if queued {
        runtime.pending_refresh.borrow_mut().push(id);
    }
}

struct FlushingGuard<'a>(&'a Runtime);

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        self.0.flushing.set(false);
    }
}

/// Drains the queued notifications, refreshes, and effect runs to
/// quiescence. No-op while a batch is open or a flush is already running;
/// re-entrant writes are picked up by the loop.
pub(crate) fn flush(runtime: &Runtime) {
    if runtime.flushing.get() || runtime.batch_depth.get() > 0 {
        return;
    }
    runtime.flushing.set(true);
    let _guard = FlushingGuard(runtime);

    let mut passes = 0usize;
    while pending_work(runtime) {
        passes += 1;
        if passes > MAX_FLUSH_PASSES {
            let err = BatchError::InfiniteLoop(MAX_FLUSH_PASSES);
            debug_warn!("{err}");
            abandon_queues(runtime);
            break;
        }
        run_pass(runtime);
    }
}

fn pending_work(runtime: &Runtime) -> bool {
    !runtime.dirty_queue.borrow().is_empty()
        || !runtime.pending_refresh.borrow().is_empty()
        || !runtime.pending_effects.borrow().is_empty()
}

fn abandon_queues(runtime: &Runtime) {
    let origins = std::mem::take(&mut *runtime.dirty_queue.borrow_mut());
    let effects = std::mem::take(&mut *runtime.pending_effects.borrow_mut());
    let refresh = std::mem::take(&mut *runtime.pending_refresh.borrow_mut());
    let nodes = runtime.nodes.borrow();
    for id in origins.into_iter().chain(effects) {
        if let Some(node) = nodes.get(id) {
            node.clear(flags::QUEUED);
        }
    }
    for id in refresh {
        if let Some(node) = nodes.get(id) {
            if node.has(flags::PENDING) {
                node.set_resting(flags::RESOLVED);
            }
        }
    }
}

/// One settling pass: notification records for changed origins, refreshes
/// for observed computeds, then listeners, then effects (sync before async).
fn run_pass(runtime: &Runtime) {
    // swap the filling queue for the spare, draining side
    let empty = std::mem::take(&mut *runtime.spare_queue.borrow_mut());
    let mut drained =
        std::mem::replace(&mut *runtime.dirty_queue.borrow_mut(), empty);

    let mut notifications = runtime.notification_pool.acquire();

    // origin atoms (and force-invalidated computeds) first, so their
    // listeners precede listeners of derived values
    for origin in drained.drain(..) {
        let is_atom = {
            let nodes = runtime.nodes.borrow();
            let Some(node) = nodes.get(origin) else {
                continue;
            };
            node.clear(flags::QUEUED);
            if node.disposed.get() {
                continue;
            }
            node.is_atom()
        };
        if is_atom {
            push_callback_records(runtime, origin, &mut notifications);
        }
        mark_dependents(runtime, origin);
    }
    *runtime.spare_queue.borrow_mut() = drained;

    // refresh invalidated computeds that someone observes; each one that
    // materially changed notifies its own listeners this pass
    let refresh = std::mem::take(&mut *runtime.pending_refresh.borrow_mut());
    for id in refresh {
        if computed::refresh(runtime, id) {
            push_callback_records(runtime, id, &mut notifications);
        }
    }

    for note in notifications.iter() {
        run_notification(runtime, note);
    }
    runtime.notification_pool.release(notifications);

    // effects: sync ones run in the notification phase proper, async ones in
    // the trailing drain of the same flush — the scheduler never yields
    let pending = std::mem::take(&mut *runtime.pending_effects.borrow_mut());
    let mut deferred: Vec<NodeId> = Vec::new();
    for id in &pending {
        let sync = {
            let nodes = runtime.nodes.borrow();
            match nodes.get(*id) {
                Some(node) => {
                    node.clear(flags::QUEUED);
                    node.effect().map(|data| data.sync).unwrap_or(false)
                }
                None => false,
            }
        };
        if sync {
            effect::run_scheduled(runtime, *id);
        } else {
            deferred.push(*id);
        }
    }
    for id in deferred {
        effect::run_scheduled(runtime, id);
    }
}

/// Builds one notification record per raw listener of `source`, consuming the
/// pending old-value capture. Writes coalesced into one pass share the single
/// capture, so listeners see the initial old value and the final new one.
fn push_callback_records(
    runtime: &Runtime,
    source: NodeId,
    out: &mut Vec<Notification>,
) {
    let (new, old) = {
        let nodes = runtime.nodes.borrow();
        let Some(node) = nodes.get(source) else {
            return;
        };
        let new = node.value.borrow().clone();
        let old = node.pending_old.borrow_mut().take();
        (new, old)
    };
    let Some(new) = new else {
        return;
    };
    let old = old.unwrap_or_else(|| Rc::clone(&new));

    let subscribers = runtime.node_subscribers.borrow();
    let Some(list) = subscribers.get(source) else {
        return;
    };
    for key in list.borrow().callback_keys() {
        out.push(Notification {
            source,
            key,
            new: Rc::clone(&new),
            old: Rc::clone(&old),
        });
    }
}

fn run_notification(runtime: &Runtime, note: &Notification) {
    let listener = {
        match runtime.node_subscribers.borrow().get(note.source) {
            Some(list) => match list.borrow().get(note.key) {
                Some(Listener::Callback(callback)) => Some(Rc::clone(callback)),
                _ => None,
            },
            None => None,
        }
    };
    if let Some(callback) = listener {
        callback(note.new.as_ref(), note.old.as_ref());
    }
}
