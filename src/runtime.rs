use crate::{
    macros::debug_warn,
    node::{flags, NodeId, ReactiveNode},
    pool::{Pool, PoolStats, NOTIFICATION_POOL_MAX, SCRATCH_POOL_MAX},
    scheduler::Notification,
    subscribers::{Listener, ListenerFn, SubscriberKey, SubscriberList},
};
use core::hash::BuildHasherDefault;
use indexmap::IndexMap;
use rustc_hash::FxHasher;
use slotmap::{SecondaryMap, SlotMap};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    rc::Rc,
};

pub(crate) type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Epochs are masked to 31 bits and wrap; zero is reserved for "never seen".
pub(crate) const EPOCH_MASK: u32 = 0x7fff_ffff;
/// Dependency-count cap; exceeding it warns in debug builds but never fails.
pub(crate) const MAX_DEPENDENCIES: usize = 1000;
/// Re-entrancy cap for a single flush; exceeding it abandons the queue.
pub(crate) const MAX_FLUSH_PASSES: usize = 10_000;
/// Cap on the effect loop guard's timestamp window.
pub(crate) const EXECUTION_WINDOW_CAP: usize = 100;

/// One dependency of a re-evaluable node, keyed by source id in the owner's
/// source map. `slot` is the unsubscribe handle into the source's subscriber
/// list; `mark` is the capture epoch of the last run that read the source.
pub(crate) struct DepRecord {
    pub version: u64,
    pub slot: SubscriberKey,
    pub mark: u32,
}

pub(crate) type SourceMap = FxIndexMap<NodeId, DepRecord>;

/// One entry of the tracking stack. `node: None` is an untracked barrier:
/// reads under it register nothing, but nested evaluations push their own
/// frames and track normally.
pub(crate) struct TrackFrame {
    pub node: Option<NodeId>,
    pub capture_epoch: u32,
    pub deps: Vec<(NodeId, u64)>,
}

// The data structure that owns every atom, computed, and effect, plus the
// graph edges and scheduler state between them. One per thread; all handles
// on a thread share it.
pub(crate) struct Runtime {
    pub nodes: RefCell<SlotMap<NodeId, ReactiveNode>>,
    pub node_subscribers: RefCell<SecondaryMap<NodeId, RefCell<SubscriberList>>>,
    pub node_sources: RefCell<SecondaryMap<NodeId, RefCell<SourceMap>>>,
    frames: RefCell<Vec<TrackFrame>>,
    epoch: Cell<u32>,
    seq: Cell<u64>,
    pub batch_depth: Cell<u32>,
    pub flushing: Cell<bool>,
    /// Filling side of the double-buffered dirty queue; the draining side is
    /// swapped out of this at flush entry.
    pub dirty_queue: RefCell<Vec<NodeId>>,
    /// Spare buffer holding the other half of the double buffer between
    /// passes, so the swap reuses its capacity.
    pub spare_queue: RefCell<Vec<NodeId>>,
    /// Effects scheduled by propagation, in insertion order, drained once per
    /// flush pass.
    pub pending_effects: RefCell<Vec<NodeId>>,
    /// Invalidated computeds that someone observes, refreshed once per flush
    /// pass.
    pub pending_refresh: RefCell<Vec<NodeId>>,
    pub scratch_pool: Pool<(NodeId, u64)>,
    pub notification_pool: Pool<Notification>,
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

#[inline(always)]
pub(crate) fn with_runtime<T>(f: impl FnOnce(&Runtime) -> T) -> T {
    RUNTIME.with(|runtime| f(runtime))
}

impl Runtime {
    fn new() -> Self {
        Self {
            nodes: RefCell::new(SlotMap::with_key()),
            node_subscribers: RefCell::new(SecondaryMap::new()),
            node_sources: RefCell::new(SecondaryMap::new()),
            frames: RefCell::new(Vec::new()),
            epoch: Cell::new(0),
            seq: Cell::new(0),
            batch_depth: Cell::new(0),
            flushing: Cell::new(false),
            dirty_queue: RefCell::new(Vec::new()),
            spare_queue: RefCell::new(Vec::new()),
            pending_effects: RefCell::new(Vec::new()),
            pending_refresh: RefCell::new(Vec::new()),
            scratch_pool: Pool::new(SCRATCH_POOL_MAX),
            notification_pool: Pool::new(NOTIFICATION_POOL_MAX),
        }
    }

    pub fn next_epoch(&self) -> u32 {
        let mut epoch = self.epoch.get().wrapping_add(1) & EPOCH_MASK;
        if epoch == 0 {
            epoch = 1;
        }
        self.epoch.set(epoch);
        epoch
    }

    pub fn insert_node(&self, make: impl FnOnce(u64) -> ReactiveNode) -> NodeId {
        let seq = self.seq.get() + 1;
        self.seq.set(seq);
        let id = self.nodes.borrow_mut().insert(make(seq));
        self.node_subscribers
            .borrow_mut()
            .insert(id, RefCell::new(SubscriberList::default()));
        self.node_sources
            .borrow_mut()
            .insert(id, RefCell::new(SourceMap::default()));
        id
    }

    pub fn node_seq(&self, id: NodeId) -> u64 {
        self.nodes.borrow().get(id).map(|n| n.seq).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Tracking context
    // ------------------------------------------------------------------

    /// Pushes a tracking scope. Pass `None` for an untracked barrier.
    pub fn push_frame(&self, node: Option<NodeId>) {
        let deps = if node.is_some() {
            self.scratch_pool.acquire()
        } else {
            Vec::new()
        };
        self.frames.borrow_mut().push(TrackFrame {
            node,
            capture_epoch: self.next_epoch(),
            deps,
        });
    }

    /// Registers `source` with the current tracking scope, if any.
    ///
    /// Membership is checked by epoch stamp first; a nested scope may have
    /// restamped the source, so a miss falls back to a scan of the (small)
    /// capture buffer before appending.
    pub fn track_dependency(&self, source: NodeId) {
        let mut frames = self.frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            return;
        };
        let Some(observer) = frame.node else {
            return;
        };
        // a node cannot depend on itself; reads that got here through a
        // cycle have already been rejected
        if observer == source {
            return;
        }
        let nodes = self.nodes.borrow();
        let Some(node) = nodes.get(source) else {
            return;
        };
        if node.disposed.get() {
            return;
        }
        if node.last_seen_epoch.get() == frame.capture_epoch {
            return;
        }
        if frame.deps.iter().any(|(id, _)| *id == source) {
            node.last_seen_epoch.set(frame.capture_epoch);
            return;
        }
        node.last_seen_epoch.set(frame.capture_epoch);
        frame.deps.push((source, node.version.get()));
        if frame.deps.len() == MAX_DEPENDENCIES + 1 {
            debug_warn!(
                "node tracked more than {MAX_DEPENDENCIES} dependencies in \
                 one evaluation; this is usually a sign of reading inside a \
                 loop that should be untracked"
            );
        }
    }

    /// Pops the top tracking scope and, for node scopes, delta-syncs the
    /// node's subscriptions against the freshly captured dependency set.
    ///
    /// Sources read this run keep their existing slot (the unsubscribe handle
    /// stays valid) with a refreshed captured version; newly read sources are
    /// subscribed; sources no longer read are unsubscribed.
    pub fn pop_frame_and_sync(&self) {
        let frame = self
            .frames
            .borrow_mut()
            .pop()
            .expect("tracking frame underflow");
        let Some(observer) = frame.node else {
            return;
        };
        let mark = frame.capture_epoch;
        let new_deps = frame.deps;

        // a node disposed during its own run must not resubscribe
        let detached = self
            .nodes
            .borrow()
            .get(observer)
            .map(|node| node.disposed.get())
            .unwrap_or(true);
        if detached {
            self.scratch_pool.release(new_deps);
            return;
        }

        let mut dropped: Vec<(NodeId, SubscriberKey)> = Vec::new();
        {
            let sources_map = self.node_sources.borrow();
            let Some(sources) = sources_map.get(observer) else {
                self.scratch_pool.release(new_deps);
                return;
            };
            let mut sources = sources.borrow_mut();
            for (source, version) in new_deps.iter() {
                if let Some(rec) = sources.get_mut(source) {
                    rec.version = *version;
                    rec.mark = mark;
                } else {
                    let slot = self.subscribe_node(*source, observer);
                    sources.insert(
                        *source,
                        DepRecord {
                            version: *version,
                            slot,
                            mark,
                        },
                    );
                }
            }
            sources.retain(|source, rec| {
                if rec.mark == mark {
                    true
                } else {
                    dropped.push((*source, rec.slot));
                    false
                }
            });
        }
        for (source, slot) in dropped {
            self.unsubscribe(source, slot);
        }
        self.scratch_pool.release(new_deps);
    }

    /// Debug check for effects created with `track_modifications`: warns when
    /// the running effect writes to an atom it has already read this run.
    pub fn note_tracked_write(&self, atom: NodeId) {
        #[cfg(debug_assertions)]
        {
            let frames = self.frames.borrow();
            let Some(frame) = frames.last() else {
                return;
            };
            let Some(observer) = frame.node else {
                return;
            };
            if !frame.deps.iter().any(|(id, _)| *id == atom) {
                return;
            }
            let nodes = self.nodes.borrow();
            if let Some(node) = nodes.get(observer) {
                if let Some(effect) = node.effect() {
                    if effect.track_modifications {
                        debug_warn!(
                            "effect writes to an atom it also reads; the \
                             write re-schedules the effect and can loop"
                        );
                    }
                }
            }
        }
        #[cfg(not(debug_assertions))]
        {
            _ = atom;
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub fn subscribe_node(&self, source: NodeId, observer: NodeId) -> SubscriberKey {
        match self.node_subscribers.borrow().get(source) {
            Some(list) => list.borrow_mut().subscribe(Listener::Node(observer)),
            None => 0,
        }
    }

    pub fn subscribe_callback(
        &self,
        source: NodeId,
        callback: Rc<ListenerFn>,
    ) -> SubscriberKey {
        match self.node_subscribers.borrow().get(source) {
            Some(list) => list.borrow_mut().subscribe(Listener::Callback(callback)),
            None => 0,
        }
    }

    pub fn unsubscribe(&self, source: NodeId, key: SubscriberKey) {
        if let Some(list) = self.node_subscribers.borrow().get(source) {
            list.borrow_mut().unsubscribe(key);
        }
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Clones the node's value cell out of the arena so user code can run
    /// without the arena borrow held.
    pub fn value_cell(
        &self,
        id: NodeId,
    ) -> Option<Rc<RefCell<Option<Rc<dyn Any>>>>> {
        self.nodes.borrow().get(id).map(|node| Rc::clone(&node.value))
    }

    pub fn value_snapshot(&self, id: NodeId) -> Option<Rc<dyn Any>> {
        let cell = self.value_cell(id)?;
        let value = cell.borrow().clone();
        value
    }

    // ------------------------------------------------------------------
    // Scheduler plumbing
    // ------------------------------------------------------------------

    /// Adds `id` to the filling queue, once per settling pass.
    pub fn enqueue_dirty(&self, id: NodeId) {
        {
            let nodes = self.nodes.borrow();
            let Some(node) = nodes.get(id) else {
                return;
            };
            if node.has(flags::QUEUED) {
                return;
            }
            node.add(flags::QUEUED);
        }
        self.dirty_queue.borrow_mut().push(id);
    }

    // ------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------

    /// Detaches `id` from the graph: calls every outbound unsubscribe handle,
    /// drains its own subscriber slots, and marks it disposed. The last value
    /// stays readable; idempotent.
    pub fn dispose_node(&self, id: NodeId) {
        let already = match self.nodes.borrow().get(id) {
            None => true,
            Some(node) => node.disposed.replace(true),
        };
        if already {
            return;
        }

        let mut outbound: Vec<(NodeId, SubscriberKey)> = Vec::new();
        if let Some(sources) = self.node_sources.borrow().get(id) {
            let mut sources = sources.borrow_mut();
            for (source, rec) in sources.iter() {
                outbound.push((*source, rec.slot));
            }
            sources.clear();
        }
        for (source, slot) in outbound {
            self.unsubscribe(source, slot);
        }

        if let Some(list) = self.node_subscribers.borrow().get(id) {
            list.borrow_mut().clear();
        }
    }
}

/// Restores the tracking stack on every exit path, including unwinds.
pub(crate) struct FrameGuard;

impl FrameGuard {
    pub fn push(node: Option<NodeId>) -> Self {
        with_runtime(|runtime| runtime.push_frame(node));
        FrameGuard
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        with_runtime(|runtime| runtime.pop_frame_and_sync());
    }
}

/// Runs `f` with the tracking context cleared: reads inside it register no
/// dependencies on the surrounding computation. Evaluations nested inside
/// (a computed recomputing, say) still track their own reads.
///
/// ```
/// use reactive_atoms::{atom, computed, untracked};
///
/// let hits = atom(0);
/// let label = atom("ready");
/// let status = computed(move || {
///     let count = untracked(|| hits.get());
///     format!("{} ({count})", label.get())
/// });
/// assert_eq!(status.get(), "ready (0)");
/// hits.set(10);
/// // `hits` is not a dependency, so the cached value stands
/// assert_eq!(status.get(), "ready (0)");
/// ```
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    let _guard = FrameGuard::push(None);
    f()
}

/// Tears down the thread's runtime: every node, edge, queue, and pool.
/// Intended for tests that need a pristine graph within one thread.
#[doc(hidden)]
pub fn __reset() {
    with_runtime(|runtime| {
        runtime.nodes.borrow_mut().clear();
        runtime.node_subscribers.borrow_mut().clear();
        runtime.node_sources.borrow_mut().clear();
        runtime.frames.borrow_mut().clear();
        runtime.dirty_queue.borrow_mut().clear();
        runtime.spare_queue.borrow_mut().clear();
        runtime.pending_effects.borrow_mut().clear();
        runtime.pending_refresh.borrow_mut().clear();
        runtime.epoch.set(0);
        runtime.seq.set(0);
        runtime.batch_depth.set(0);
        runtime.flushing.set(false);
        runtime.scratch_pool.reset();
        runtime.notification_pool.reset();
    });
}

/// Buffer accounting for the runtime's two pools, `(scratch, notifications)`.
/// Meaningful in debug builds; counters are zero in release.
#[doc(hidden)]
pub fn __pool_stats() -> (PoolStats, PoolStats) {
    with_runtime(|runtime| {
        (
            runtime.scratch_pool.stats(),
            runtime.notification_pool.stats(),
        )
    })
}
