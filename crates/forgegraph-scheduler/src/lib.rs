//! Drives registered targets through their build-step state machine over a
//! bounded pool of OS threads (spec.md §4.F, §5).

#![forbid(unsafe_code)]

mod ports;
mod scheduler;

pub use ports::{Artifact, CachePort, ExecutionResult, HookRunner, NoCache, NoopHooks, RuleExecutor};
pub use scheduler::{BuildOutcome, CacheSource, RunSummary, Scheduler, SchedulerError};
