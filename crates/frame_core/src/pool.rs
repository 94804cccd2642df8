//! Pooled value objects
//!
//! The substrate only acquires and releases pooled objects; how a pool stores
//! them is up to the implementation behind [`ObjectPool`].

use crate::utils::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::trace;

/// A value that can be reset and reused
pub trait Poolable: Send + 'static {
    /// Called when the object is handed out
    fn initialize(&mut self) {}

    /// Called when the object is returned; must drop any per-use state
    fn cleanup(&mut self);
}

/// Source of reusable objects
pub trait ObjectPool<T: Poolable>: Send + Sync {
    fn acquire(&self) -> T;
    fn release(&self, item: T);
}

/// Free-list pool backed by a `Vec`.
///
/// Released objects beyond `capacity` are dropped.
pub struct VecPool<T: Poolable + Default> {
    free: Mutex<Vec<T>>,
    capacity: usize,
    created: AtomicU64,
    reused: AtomicU64,
}

impl<T: Poolable + Default> VecPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Objects currently waiting for reuse
    pub fn available(&self) -> usize {
        lock(&self.free).len()
    }

    /// (freshly created, reused) counts since construction
    pub fn usage(&self) -> (u64, u64) {
        (
            self.created.load(Ordering::Relaxed),
            self.reused.load(Ordering::Relaxed),
        )
    }
}

impl<T: Poolable + Default> ObjectPool<T> for VecPool<T> {
    fn acquire(&self) -> T {
        let recycled = lock(&self.free).pop();
        let mut item = match recycled {
            Some(item) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                T::default()
            }
        };
        item.initialize();
        item
    }

    fn release(&self, mut item: T) {
        item.cleanup();
        let mut free = lock(&self.free);
        if free.len() < self.capacity {
            free.push(item);
        } else {
            trace!("🗑️ Pool full ({}), dropping released object", self.capacity);
        }
    }
}
