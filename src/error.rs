//! Error kinds reported by the reactive graph.
//!
//! Accessors come in pairs: the plain form (`get`, `set`) panics with the
//! error's message, the `try_` form returns it. Warnings that are not errors
//! go through `debug_warn!` and are never raised.

use std::rc::Rc;
use thiserror::Error;

/// Errors raised by atom operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AtomError {
    /// The atom was disposed; writes are rejected. Reads still return the
    /// last value, with a warning in debug builds.
    #[error("tried to write to an atom that has been disposed")]
    Disposed,
}

/// Errors raised while reading a computed value.
#[derive(Debug, Clone, Error)]
pub enum ComputedError {
    /// The computed read itself, directly or through other computeds.
    #[error("circular dependency detected while evaluating a computed")]
    Cycle,

    /// The computation returned an error. Repeated reads return the same
    /// error until one of the computed's dependencies changes.
    #[error("computed evaluation failed: {0}")]
    Evaluation(Rc<dyn std::error::Error>),

    /// The computed was disposed.
    #[error("tried to read a computed that has been disposed")]
    Disposed,
}

impl ComputedError {
    /// True for the [`ComputedError::Cycle`] variant.
    pub fn is_cycle(&self) -> bool {
        matches!(self, ComputedError::Cycle)
    }
}

/// Errors raised by the effect runner.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EffectError {
    /// The effect exceeded its executions-per-second budget and disposed
    /// itself.
    #[error("effect exceeded {0} executions per second and was disposed")]
    RateLimitExceeded(u32),

    /// The effect was disposed.
    #[error("tried to run an effect that has been disposed")]
    Disposed,
}

/// Errors raised by the scheduler's batching layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    /// A flush kept producing new writes and hit the re-entrancy cap; the
    /// remaining queue was abandoned.
    #[error("flush did not settle after {0} passes; remaining updates were dropped")]
    InfiniteLoop(usize),
}
