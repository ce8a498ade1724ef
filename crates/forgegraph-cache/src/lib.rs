//! The local tier of the two-tier cache (spec.md §4.G, §6): a directory-
//! organized content-addressed store with per-path refcounting and an
//! age/size-bounded cleaner.

#![forbid(unsafe_code)]

mod cleaner;
mod error;
mod local_cache;

pub use cleaner::{CleanReport, Cleaner};
pub use error::CacheError;
pub use local_cache::{CacheMeta, LocalCache};
