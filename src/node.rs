use crate::error::ComputedError;
use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
    time::Instant,
};

slotmap::new_key_type! {
    /// Unique ID assigned to a reactive node (atom, computed, or effect).
    pub(crate) struct NodeId;
}

/// Node state bits. At rest exactly one of the `RESTING` bits is set;
/// `DIRTY` may co-occur with any of them, `RECOMPUTING` and `EXECUTING` are
/// transient, and `QUEUED` marks membership in the scheduler's filling queue.
pub(crate) mod flags {
    pub const DIRTY: u16 = 1 << 0;
    pub const IDLE: u16 = 1 << 1;
    pub const PENDING: u16 = 1 << 2;
    pub const RESOLVED: u16 = 1 << 3;
    pub const REJECTED: u16 = 1 << 4;
    pub const RECOMPUTING: u16 = 1 << 5;
    pub const HAS_ERROR: u16 = 1 << 6;
    pub const EXECUTING: u16 = 1 << 7;
    pub const QUEUED: u16 = 1 << 8;

    pub const RESTING: u16 = IDLE | PENDING | RESOLVED | REJECTED;
}

/// Type-erased equality, built from the typed comparator at construction.
pub(crate) type EqualFn = dyn Fn(&dyn Any, &dyn Any) -> bool;

/// Erases a typed comparator. Mismatched types compare unequal, which makes
/// the write path treat them as a material change rather than dropping it.
pub(crate) fn erase_equal<T: 'static>(
    equal: Rc<dyn Fn(&T, &T) -> bool>,
) -> Rc<EqualFn> {
    Rc::new(move |a: &dyn Any, b: &dyn Any| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => equal(a, b),
            _ => false,
        }
    })
}

/// Type-erased recomputation table for computed values.
///
/// `run` evaluates the user function, compares the result against the cached
/// value with the computed's comparator, and stores it only when it changed.
/// Returns `Ok(true)` when the stored value materially changed.
pub(crate) trait AnyComputation {
    fn run(
        &self,
        value: Rc<RefCell<Option<Rc<dyn Any>>>>,
    ) -> Result<bool, ComputedError>;
}

/// Type-erased effect body; returns the cleanup to run before the next run,
/// if the user function produced one.
pub(crate) trait AnyEffectFn {
    fn run(&self) -> Option<Box<dyn FnOnce()>>;
}

pub(crate) struct ComputedData {
    pub f: Rc<dyn AnyComputation>,
    pub lazy: bool,
    pub on_error: Option<Rc<dyn Fn(&ComputedError)>>,
    pub last_error: RefCell<Option<ComputedError>>,
}

pub(crate) struct EffectData {
    pub f: Rc<dyn AnyEffectFn>,
    pub cleanup: RefCell<Option<Box<dyn FnOnce()>>>,
    pub sync: bool,
    pub rate_limit: u32,
    pub track_modifications: bool,
    pub exec_count: Cell<u64>,
    /// Sliding window of recent run times for the loop guard, capped at
    /// [`crate::runtime::EXECUTION_WINDOW_CAP`] entries.
    pub window: RefCell<VecDeque<Instant>>,
}

pub(crate) enum NodeKind {
    Atom { equal: Rc<EqualFn> },
    Computed(ComputedData),
    Effect(EffectData),
}

pub(crate) struct ReactiveNode {
    /// Process-unique monotonic sequence number, exposed as the host-facing id.
    pub seq: u64,
    pub state: Cell<u16>,
    /// Bumped only when the value materially changes.
    pub version: Cell<u64>,
    /// Stamp used for O(1) membership checks within one propagation pass or
    /// one tracking scope.
    pub last_seen_epoch: Cell<u32>,
    pub disposed: Cell<bool>,
    /// Current value snapshot. `None` for effects and for computeds that have
    /// not produced a value yet.
    pub value: Rc<RefCell<Option<Rc<dyn Any>>>>,
    /// Pre-write snapshot captured once per settling pass, consumed when the
    /// scheduler builds notification records.
    pub pending_old: RefCell<Option<Rc<dyn Any>>>,
    pub kind: NodeKind,
}

impl ReactiveNode {
    pub fn new_atom(seq: u64, value: Rc<dyn Any>, equal: Rc<EqualFn>) -> Self {
        Self {
            seq,
            state: Cell::new(0),
            version: Cell::new(1),
            last_seen_epoch: Cell::new(0),
            disposed: Cell::new(false),
            value: Rc::new(RefCell::new(Some(value))),
            pending_old: RefCell::new(None),
            kind: NodeKind::Atom { equal },
        }
    }

    pub fn new_computed(
        seq: u64,
        initial: Option<Rc<dyn Any>>,
        data: ComputedData,
    ) -> Self {
        Self {
            seq,
            state: Cell::new(flags::IDLE),
            version: Cell::new(1),
            last_seen_epoch: Cell::new(0),
            disposed: Cell::new(false),
            value: Rc::new(RefCell::new(initial)),
            pending_old: RefCell::new(None),
            kind: NodeKind::Computed(data),
        }
    }

    pub fn new_effect(seq: u64, data: EffectData) -> Self {
        Self {
            seq,
            state: Cell::new(flags::IDLE),
            version: Cell::new(1),
            last_seen_epoch: Cell::new(0),
            disposed: Cell::new(false),
            value: Rc::new(RefCell::new(None)),
            pending_old: RefCell::new(None),
            kind: NodeKind::Effect(data),
        }
    }

    #[inline(always)]
    pub fn has(&self, flag: u16) -> bool {
        self.state.get() & flag != 0
    }

    #[inline(always)]
    pub fn add(&self, flag: u16) {
        self.state.set(self.state.get() | flag);
    }

    #[inline(always)]
    pub fn clear(&self, flag: u16) {
        self.state.set(self.state.get() & !flag);
    }

    /// Replaces the resting state, leaving the transient bits untouched.
    pub fn set_resting(&self, resting: u16) {
        debug_assert_eq!(resting & !flags::RESTING, 0);
        self.state
            .set((self.state.get() & !flags::RESTING) | resting);
    }

    pub fn computed(&self) -> Option<&ComputedData> {
        match &self.kind {
            NodeKind::Computed(data) => Some(data),
            _ => None,
        }
    }

    pub fn effect(&self) -> Option<&EffectData> {
        match &self.kind {
            NodeKind::Effect(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_atom(&self) -> bool {
        matches!(self.kind, NodeKind::Atom { .. })
    }
}
