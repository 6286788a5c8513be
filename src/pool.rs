//! Reuse of encoders and accumulation buffers across requests.
//!
//! A [`Pool`] lends values out through [`Pooled`] guards. Dropping a guard
//! recycles the value and puts it back, so a request that errors out or
//! panics still returns everything it borrowed.

use crate::codec::GzipEncoder;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Values that can be returned to a [`Pool`].
pub trait Recycle {
    /// Restores the neutral state the next borrower expects.
    fn recycle(&mut self);
}

impl Recycle for GzipEncoder {
    fn recycle(&mut self) {
        self.reset();
    }
}

impl Recycle for BytesMut {
    fn recycle(&mut self) {
        self.clear();
    }
}

/// A lazily populated pool of reusable values.
///
/// Values are created on demand by the pool's factory and kept after use,
/// so the pool grows to the peak number of concurrent borrowers.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    create: Box<dyn Fn() -> T + Send + Sync>,
    created: AtomicUsize,
}

impl<T: Recycle> Pool<T> {
    /// Creates an empty pool that builds new values with `create`.
    pub fn new<F>(create: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            idle: Mutex::new(Vec::new()),
            create: Box::new(create),
            created: AtomicUsize::new(0),
        }
    }

    /// Borrows a value, creating one if none is idle.
    pub fn acquire(self: &Arc<Self>) -> Pooled<T> {
        let idle = self.idle.lock().pop();
        let value = match idle {
            Some(value) => value,
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                (self.create)()
            }
        };
        Pooled {
            value: Some(value),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut value: T) {
        value.recycle();
        self.idle.lock().push(value);
    }

    /// Number of values waiting to be borrowed.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of values the pool has ever created.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle.lock().len())
            .field("created", &self.created.load(Ordering::Relaxed))
            .finish()
    }
}

/// A value borrowed from a [`Pool`], returned when dropped.
pub struct Pooled<T: Recycle> {
    value: Option<T>,
    pool: Arc<Pool<T>>,
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("pooled value already released")
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("pooled value already released")
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.value).finish()
    }
}
