//! A concurrent map sharded by key hash, plus an error-carrying single-flight
//! wrapper ([`ErrMap`]) used by the scheduler to fan out dependency results
//! (and failures) to every target waiting on them.
//!
//! Sharding trades a single global lock for `N` independent ones: placement
//! is by [`forgegraph_hash::key_hash64`] over a process-local digest of the
//! key, so the two maps in this crate never need `N` to match between them.

#![forbid(unsafe_code)]

mod err_map;
mod limiter;
mod map;

pub use err_map::ErrMap;
pub use limiter::{Limiter, Semaphore};
pub use map::{ShardedMap, ShardedMapError};
