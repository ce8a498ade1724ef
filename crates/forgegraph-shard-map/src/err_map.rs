use std::{collections::HashMap, hash::Hash, sync::Arc};

use parking_lot::{Condvar, Mutex};

use crate::limiter::Limiter;

enum ErrSlot<V, E> {
    /// Someone is running the constructing function; followers park here.
    Pending,
    Done(Result<V, E>),
}

struct Shard<K, V, E> {
    entries: Mutex<HashMap<K, ErrSlot<V, E>>>,
    condvar: Condvar,
}

impl<K, V, E> Default for Shard<K, V, E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            condvar: Condvar::new(),
        }
    }
}

/// Wraps a value/error slot per key with single-flight construction:
/// `get_or_set` runs its constructing closure exactly once per key even
/// under concurrent callers. If constructed with a [`Limiter`], a waiter
/// releases its permit before parking and reacquires it after waking, so a
/// parked build worker does not continue to occupy a work-pool slot while
/// another worker computes the value it is waiting on (spec.md §4.B, §5).
pub struct ErrMap<K, V, E> {
    shards: Box<[Shard<K, V, E>]>,
    mask: u64,
    limiter: Option<Arc<dyn Limiter>>,
}

impl<K, V, E> ErrMap<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new(shard_count: usize) -> Self {
        Self::with_limiter(shard_count, None)
    }

    pub fn with_limiter(shard_count: usize, limiter: Option<Arc<dyn Limiter>>) -> Self {
        assert!(
            shard_count > 0 && shard_count.is_power_of_two(),
            "ErrMap shard count must be a non-zero power of two"
        );
        let shards = (0..shard_count).map(|_| Shard::default()).collect();
        Self {
            shards,
            mask: (shard_count - 1) as u64,
            limiter,
        }
    }

    fn shard_for(&self, key: &K) -> &Shard<K, V, E> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        use std::hash::Hasher;
        key.hash(&mut hasher);
        let idx = (forgegraph_hash::key_hash64(&hasher.finish().to_le_bytes()) & self.mask) as usize;
        &self.shards[idx]
    }

    /// Runs `f` exactly once for `key` across all concurrent callers. The
    /// first caller becomes the leader and runs `f` without holding any
    /// cross-key lock; every other caller parks until the leader publishes
    /// a result, observing the identical `Result`.
    pub fn get_or_set(&self, key: K, f: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        let shard = self.shard_for(&key);
        let is_leader = {
            let mut entries = shard.entries.lock();
            match entries.get(&key) {
                Some(ErrSlot::Done(r)) => return r.clone(),
                Some(ErrSlot::Pending) => false,
                None => {
                    entries.insert(key.clone(), ErrSlot::Pending);
                    true
                }
            }
        };

        if is_leader {
            let result = f();
            let mut entries = shard.entries.lock();
            entries.insert(key, ErrSlot::Done(result.clone()));
            shard.condvar.notify_all();
            return result;
        }

        if let Some(limiter) = &self.limiter {
            limiter.release();
        }
        let result = {
            let mut entries = shard.entries.lock();
            loop {
                match entries.get(&key) {
                    Some(ErrSlot::Done(r)) => break r.clone(),
                    _ => shard.condvar.wait(&mut entries),
                }
            }
        };
        if let Some(limiter) = &self.limiter {
            limiter.acquire();
        }
        result
    }

    /// Publishes a failure for `key` that every current and future reader
    /// observes, bypassing the single-flight leader path entirely (used by
    /// the scheduler to fan a dependency's terminal failure out to every
    /// target parked on it).
    pub fn set_error(&self, key: K, err: E) {
        let shard = self.shard_for(&key);
        let mut entries = shard.entries.lock();
        entries.insert(key, ErrSlot::Done(Err(err)));
        shard.condvar.notify_all();
    }

    /// Publishes a success for `key` directly, without running a
    /// constructing closure. Used when the value was already computed by a
    /// caller that does not itself hold the slot (e.g. the scheduler
    /// publishing a cache-hit result).
    pub fn set_ok(&self, key: K, value: V) {
        let shard = self.shard_for(&key);
        let mut entries = shard.entries.lock();
        entries.insert(key, ErrSlot::Done(Ok(value)));
        shard.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::{AtomicUsize, Ordering}, thread};

    use super::*;
    use crate::limiter::Semaphore;

    #[test]
    fn single_flight_runs_factory_once() {
        let map: Arc<ErrMap<&'static str, i32, &'static str>> = Arc::new(ErrMap::new(4));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let map = map.clone();
            let calls = calls.clone();
            handles.push(thread::spawn(move || {
                map.get_or_set("k", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(std::time::Duration::from_millis(5));
                    Ok::<_, &'static str>(7)
                })
            }));
        }
        for h in handles {
            assert_eq!(h.join().unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn error_is_observed_by_all_waiters() {
        let map: Arc<ErrMap<&'static str, i32, &'static str>> = Arc::new(ErrMap::new(4));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let map = map.clone();
            handles.push(thread::spawn(move || {
                map.get_or_set("k", || Err::<i32, _>("boom"))
            }));
        }
        for h in handles {
            assert_eq!(h.join().unwrap(), Err("boom"));
        }
    }

    #[test]
    fn waiter_releases_and_reacquires_limiter() {
        let sema = Arc::new(Semaphore::new(1));
        let map: Arc<ErrMap<&'static str, i32, &'static str>> =
            Arc::new(ErrMap::with_limiter(4, Some(sema.clone() as Arc<dyn Limiter>)));

        sema.acquire(); // simulate the leader holding the only work-pool slot
        let leader_map = map.clone();
        let (start_tx, start_rx) = std::sync::mpsc::channel();
        let leader = thread::spawn(move || {
            leader_map.get_or_set("k", move || {
                start_tx.send(()).unwrap();
                thread::sleep(std::time::Duration::from_millis(30));
                Ok::<_, &'static str>(1)
            })
        });
        start_rx.recv().unwrap();

        // A follower should be able to acquire the slot the leader holds,
        // because releasing the slot is the leader's job once it is done
        // computing; what we're verifying here is that a *follower* never
        // needs a slot to park: it can call get_or_set while the semaphore
        // is fully exhausted.
        let follower_map = map.clone();
        let follower = thread::spawn(move || follower_map.get_or_set("k", || Ok::<_, &'static str>(2)));

        assert_eq!(leader.join().unwrap(), Ok(1));
        assert_eq!(follower.join().unwrap(), Ok(1));
    }
}
