//! A frozen build-wide configuration value (spec.md §9 Design Notes:
//! replace a global mutable configuration with an explicit `BuildState`
//! passed to every operation that needs it, frozen at scheduler start;
//! spec.md §5: "the configuration is frozen at build start; reading is
//! lock-free").
//!
//! There is deliberately no interior mutability anywhere in [`BuildState`]
//! — it is constructed once, then shared by `Arc` for the rest of the
//! build, so every reader gets the lock-free access spec.md requires
//! without this crate needing to think about synchronization at all.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use forgegraph_paths::AbsoluteSystemPathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    NoWorkers,
}

/// Every build-wide setting the scheduler, hash engine, and cache layers
/// read but never write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    pub os: String,
    pub arch: String,
    pub repo_root: AbsoluteSystemPathBuf,
    pub worker_count: usize,
    pub default_timeout_seconds: Option<u64>,
    pub env: BTreeMap<String, String>,
}

impl BuildState {
    pub fn new(
        os: impl Into<String>,
        arch: impl Into<String>,
        repo_root: AbsoluteSystemPathBuf,
        worker_count: usize,
        default_timeout_seconds: Option<u64>,
        env: BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        if worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(Self {
            os: os.into(),
            arch: arch.into(),
            repo_root,
            worker_count,
            default_timeout_seconds,
            env,
        })
    }

    /// A stable fingerprint of every field here, meant to be passed as
    /// `forgegraph_hash_engine::rule_hash`'s `config_fingerprint`
    /// argument so a configuration change invalidates every target's
    /// cached hash without the hash engine needing to know this crate
    /// exists. `env` is already a `BTreeMap` so iteration order is
    /// stable without an explicit sort here.
    pub fn fingerprint(&self) -> u64 {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.os.as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.arch.as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.repo_root.as_path().as_str().as_bytes());
        buf.push(0);
        buf.extend_from_slice(&self.worker_count.to_le_bytes());
        buf.extend_from_slice(&self.default_timeout_seconds.unwrap_or(0).to_le_bytes());
        buf.push(self.default_timeout_seconds.is_some() as u8);
        for (key, value) in &self.env {
            buf.extend_from_slice(key.as_bytes());
            buf.push(b'=');
            buf.extend_from_slice(value.as_bytes());
            buf.push(0);
        }
        forgegraph_hash::key_hash64(&buf)
    }
}
