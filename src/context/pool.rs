//! Free-list of reusable execution contexts
//!
//! `acquire` hands out an idle context or builds a new one; dropping the
//! guard recycles it back into the free list.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Reset a context before it goes back to the pool.
pub trait Recycle {
    fn recycle(&mut self);
}

pub struct ContextPool<T: Recycle> {
    free: Mutex<Vec<T>>,
    factory: Box<dyn Fn(usize) -> T + Send + Sync>,
    max_idle: usize,
    created: AtomicUsize,
}

impl<T: Recycle> ContextPool<T> {
    /// `factory` receives a sequence number unique within this pool.
    pub fn new(max_idle: usize, factory: impl Fn(usize) -> T + Send + Sync + 'static) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            max_idle,
            created: AtomicUsize::new(0),
        }
    }

    pub fn acquire(&self) -> Pooled<'_, T> {
        let item = match self.free.lock().pop() {
            Some(item) => item,
            None => (self.factory)(self.created.fetch_add(1, Ordering::Relaxed)),
        };
        Pooled {
            pool: self,
            item: Some(item),
        }
    }

    /// Contexts waiting in the free list.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    /// Contexts built over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    fn release(&self, mut item: T) {
        item.recycle();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(item);
        }
    }
}

/// A context checked out of a `ContextPool`.
pub struct Pooled<'a, T: Recycle> {
    pool: &'a ContextPool<T>,
    item: Option<T>,
}

impl<T: Recycle> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled context used after release"),
        }
    }
}

impl<T: Recycle> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled context used after release"),
        }
    }
}

impl<T: Recycle> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
