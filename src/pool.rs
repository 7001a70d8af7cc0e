//! Reusable scratch buffers for allocation-sensitive paths.
//!
//! Two pools live on the runtime: one for dependency-capture buffers, one for
//! the notification records built during a flush. Buffers are cleared on
//! release; a release is discarded when the buffer grew past
//! [`MAX_REUSABLE_CAPACITY`] or the pool is at capacity.

use std::cell::{Cell, RefCell};

pub(crate) const SCRATCH_POOL_MAX: usize = 50;
pub(crate) const NOTIFICATION_POOL_MAX: usize = 50;
pub(crate) const MAX_REUSABLE_CAPACITY: usize = 1024;

/// Buffer accounting counters, tracked in debug builds.
///
/// `acquired − released − rejected` is the number of buffers currently
/// checked out; after a flush has fully settled it returns to zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    pub rejected_too_large: u64,
    pub rejected_pool_full: u64,
}

impl PoolStats {
    pub fn rejected(&self) -> u64 {
        self.rejected_too_large + self.rejected_pool_full
    }

    pub fn in_use(&self) -> u64 {
        self.acquired - self.released - self.rejected()
    }
}

pub(crate) struct Pool<T> {
    items: RefCell<Vec<Vec<T>>>,
    max_size: usize,
    acquired: Cell<u64>,
    released: Cell<u64>,
    rejected_too_large: Cell<u64>,
    rejected_pool_full: Cell<u64>,
}

impl<T> Pool<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: RefCell::new(Vec::new()),
            max_size,
            acquired: Cell::new(0),
            released: Cell::new(0),
            rejected_too_large: Cell::new(0),
            rejected_pool_full: Cell::new(0),
        }
    }

    /// Returns a cleared buffer, reusing a pooled one when available.
    pub fn acquire(&self) -> Vec<T> {
        #[cfg(debug_assertions)]
        self.acquired.set(self.acquired.get() + 1);
        self.items.borrow_mut().pop().unwrap_or_default()
    }

    /// Clears and stores `buf`; oversized buffers and releases past the pool
    /// cap are discarded.
    pub fn release(&self, mut buf: Vec<T>) {
        buf.clear();
        if buf.capacity() > MAX_REUSABLE_CAPACITY {
            #[cfg(debug_assertions)]
            self.rejected_too_large.set(self.rejected_too_large.get() + 1);
            return;
        }
        let mut items = self.items.borrow_mut();
        if items.len() >= self.max_size {
            #[cfg(debug_assertions)]
            self.rejected_pool_full.set(self.rejected_pool_full.get() + 1);
            return;
        }
        #[cfg(debug_assertions)]
        self.released.set(self.released.get() + 1);
        items.push(buf);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.acquired.get(),
            released: self.released.get(),
            rejected_too_large: self.rejected_too_large.get(),
            rejected_pool_full: self.rejected_pool_full.get(),
        }
    }

    pub fn reset(&self) {
        self.items.borrow_mut().clear();
        self.acquired.set(0);
        self.released.set(0);
        self.rejected_too_large.set(0);
        self.rejected_pool_full.set(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_round_trip() {
        let pool = Pool::<u32>::new(2);
        let mut a = pool.acquire();
        a.push(1);
        pool.release(a);
        let b = pool.acquire();
        assert!(b.is_empty());
        assert!(b.capacity() >= 1);
    }

    #[test]
    fn release_past_cap_is_discarded() {
        let pool = Pool::<u32>::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.stats().rejected_pool_full, 1);
        assert_eq!(pool.stats().in_use(), 0);
    }

    #[test]
    fn oversized_buffer_is_discarded() {
        let pool = Pool::<u32>::new(4);
        let mut a = pool.acquire();
        a.reserve(MAX_REUSABLE_CAPACITY + 1);
        pool.release(a);
        assert_eq!(pool.stats().rejected_too_large, 1);
        assert!(pool.items.borrow().is_empty());
    }
}
