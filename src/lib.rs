#![forbid(unsafe_code)]

//! A fine-grained reactive computation runtime.
//!
//! The host declares writable values ([`atom`]s), derived values
//! ([`computed`]s), and side effects ([`effect`]s). When atoms change,
//! downstream computeds and effects re-run in a consistent, minimal,
//! well-ordered fashion:
//!
//! - reads inside a computation are collected automatically, so the
//!   dependency graph always matches the last execution;
//! - every node carries a version, and a computed whose dependencies still
//!   hold their captured versions skips recomputation entirely;
//! - writes that compare equal to the current value are dropped before they
//!   touch the graph;
//! - a burst of writes settles in one flush: each subscriber sees a single
//!   notification carrying the initial old value and the final new value,
//!   and a diamond-shaped graph recomputes its join at most once per write.
//!
//! ### Example
//! ```
//! use reactive_atoms::{atom, batch, computed, effect};
//! use std::{cell::RefCell, rc::Rc};
//!
//! let width = atom(2);
//! let height = atom(3);
//! let area = computed(move || width.get() * height.get());
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let _logger = effect({
//!     let seen = Rc::clone(&seen);
//!     move || seen.borrow_mut().push(area.get())
//! });
//!
//! // two writes, one settling pass, one effect run
//! batch(|| {
//!     width.set(4);
//!     height.set(5);
//! });
//! assert_eq!(*seen.borrow(), [6, 20]);
//! ```
//!
//! The runtime is a thread-local singleton: handles are `Copy`, cheap to move
//! into closures, and only usable on the thread that created them. There is
//! no internal locking and a flush never yields.

mod atom;
mod computed;
mod diagnostics;
mod effect;
mod error;
mod macros;
mod node;
mod pool;
mod runtime;
mod scheduler;
mod stream;
mod subscribers;

pub use atom::{atom, atom_with, Atom, AtomOptions};
pub use computed::{
    computed, computed_with, try_computed, try_computed_with, Computed,
    ComputedOptions, ComputedState,
};
pub use effect::{effect, effect_with, EffectHandle, EffectOptions, IntoCleanup};
pub use error::{AtomError, BatchError, ComputedError, EffectError};
pub use pool::PoolStats;
pub use runtime::{untracked, __pool_stats, __reset};
pub use scheduler::batch;
pub use stream::ValueStream;
pub use subscribers::Subscription;

/// The kind of node behind a reactive handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactiveKind {
    Atom,
    Computed,
    Effect,
}

/// Identity shared by every reactive handle.
pub trait ReactiveId {
    /// Process-unique monotonic id of the underlying node, usable as a
    /// stable key for deduplication and ordering.
    fn id(&self) -> u64;

    /// The node kind behind this handle.
    fn kind(&self) -> ReactiveKind;
}

impl<T> ReactiveId for Atom<T> {
    fn id(&self) -> u64 {
        runtime::with_runtime(|rt| rt.node_seq(self.id))
    }

    fn kind(&self) -> ReactiveKind {
        #[cfg(debug_assertions)]
        runtime::with_runtime(|rt| {
            diagnostics::assert_kind(rt, self.id, ReactiveKind::Atom)
        });
        ReactiveKind::Atom
    }
}

impl<T> ReactiveId for Computed<T> {
    fn id(&self) -> u64 {
        runtime::with_runtime(|rt| rt.node_seq(self.id))
    }

    fn kind(&self) -> ReactiveKind {
        #[cfg(debug_assertions)]
        runtime::with_runtime(|rt| {
            diagnostics::assert_kind(rt, self.id, ReactiveKind::Computed)
        });
        ReactiveKind::Computed
    }
}

impl ReactiveId for EffectHandle {
    fn id(&self) -> u64 {
        runtime::with_runtime(|rt| rt.node_seq(self.id))
    }

    fn kind(&self) -> ReactiveKind {
        #[cfg(debug_assertions)]
        runtime::with_runtime(|rt| {
            diagnostics::assert_kind(rt, self.id, ReactiveKind::Effect)
        });
        ReactiveKind::Effect
    }
}

/// True iff `handle` is a [`Computed`]. Debug builds additionally verify the
/// handle against the node it points at.
pub fn is_computed<H: ReactiveId>(handle: &H) -> bool {
    handle.kind() == ReactiveKind::Computed
}
