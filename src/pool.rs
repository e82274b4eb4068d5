//! # Resource Pool Module
//!
//! Bounded free lists that recycle short-lived `Page` and `Pagelet` instances
//! to avoid allocation churn under load.
//!
//! ## Contract
//!
//! Every poolable type implements [`Poolable::reset`], which must return the
//! instance to a blank state and bump its generation counter. Reset happens at
//! release time, so `alloc` hands out instances that are already clean.
//!
//! The free list never grows past its configured capacity: once full, released
//! instances are simply dropped. Callers must not retain references to a
//! released instance; for shared instances, [`Pool::release_shared`] uses
//! `Arc::try_unwrap` to detect a leaked reference and discards the instance
//! instead of recycling it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Implemented by every type the pool can recycle.
///
/// `reset` must clear all per-request state and advance the instance's
/// generation counter so stale callbacks can detect reuse.
pub trait Poolable: Send {
    fn reset(&mut self);
}

/// A bounded free list of reusable instances.
///
/// `alloc` pops from the free list when possible and constructs a fresh
/// instance otherwise. `release` resets the instance and pushes it back only
/// while `free_len() < capacity`; beyond that the instance is dropped.
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    capacity: usize,
    allocated: AtomicU64,
    recycled: AtomicU64,
    discarded: AtomicU64,
}

impl<T: Poolable + Default> Pool<T> {
    pub fn new(capacity: usize) -> Self {
        Pool {
            free: Mutex::new(Vec::new()),
            capacity,
            allocated: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Pop a recycled instance, or construct a new one if the list is empty.
    pub fn alloc(&self) -> T {
        let recycled = self.free.lock().expect("pool free list lock poisoned").pop();
        match recycled {
            Some(item) => {
                self.recycled.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                T::default()
            }
        }
    }

    /// Reset `item` and return it to the free list if there is room.
    ///
    /// The caller gives up ownership; when the list is at capacity the
    /// instance is dropped rather than retained.
    pub fn release(&self, mut item: T) {
        item.reset();
        let mut free = self.free.lock().expect("pool free list lock poisoned");
        if free.len() < self.capacity {
            free.push(item);
        } else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(capacity = self.capacity, "Pool at capacity, instance dropped");
        }
    }

    /// Release an instance that was shared behind `Arc<Mutex<_>>`.
    ///
    /// Returns `false` if another reference to the instance is still alive —
    /// the raced-reuse hazard. The instance is then discarded instead of
    /// recycled, so a stale holder can never observe a reconfigured one.
    pub fn release_shared(&self, item: std::sync::Arc<Mutex<T>>) -> bool {
        match std::sync::Arc::try_unwrap(item) {
            Ok(mutex) => match mutex.into_inner() {
                Ok(inner) => {
                    self.release(inner);
                    true
                }
                Err(_) => {
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                    warn!("Poisoned instance discarded instead of recycled");
                    false
                }
            },
            Err(_) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                warn!("Reference to released instance leaked, discarding instead of recycling");
                false
            }
        }
    }

    /// Current free-list length. Always `<= capacity`.
    pub fn free_len(&self) -> usize {
        self.free.lock().expect("pool free list lock poisoned").len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counters: (fresh allocations, recycled hits, discards).
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.allocated.load(Ordering::Relaxed),
            self.recycled.load(Ordering::Relaxed),
            self.discarded.load(Ordering::Relaxed),
        )
    }
}
