use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// A bounded resource the scheduler's work pool hands out as permits.
///
/// `ErrMap` waiters call [`Limiter::release`] before parking on a
/// single-flight construction and [`Limiter::acquire`] after they wake up,
/// so a parked waiter does not continue to occupy a work-pool slot while it
/// contributes nothing but waiting (spec.md §4.B, §5).
pub trait Limiter: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// A counting semaphore `Limiter`, the one the scheduler's bounded work pool
/// uses directly: `P` permits are handed out to workers, and parked
/// single-flight waiters give theirs back for the duration of the wait.
#[derive(Debug)]
pub struct Semaphore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<usize>,
    condvar: Condvar,
    capacity: usize,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "semaphore capacity must be non-zero");
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(capacity),
                condvar: Condvar::new(),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn available(&self) -> usize {
        *self.inner.state.lock()
    }
}

impl Clone for Semaphore {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Limiter for Semaphore {
    fn acquire(&self) {
        let mut permits = self.inner.state.lock();
        while *permits == 0 {
            self.inner.condvar.wait(&mut permits);
        }
        *permits -= 1;
    }

    fn release(&self) {
        let mut permits = self.inner.state.lock();
        debug_assert!(*permits < self.inner.capacity, "released more than acquired");
        *permits += 1;
        self.inner.condvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn blocks_past_capacity() {
        let sema = Semaphore::new(1);
        sema.acquire();
        assert_eq!(sema.available(), 0);
        sema.release();
        assert_eq!(sema.available(), 1);
    }

    #[test]
    fn acquire_blocks_until_release() {
        let sema = Arc::new(Semaphore::new(1));
        sema.acquire();
        let sema2 = sema.clone();
        let handle = thread::spawn(move || {
            sema2.acquire();
        });
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!handle.is_finished());
        sema.release();
        handle.join().unwrap();
    }
}
