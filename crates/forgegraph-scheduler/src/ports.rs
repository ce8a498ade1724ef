use forgegraph_label::Target;
use forgegraph_paths::AbsoluteSystemPathBuf;

/// One captured build output: a relative output name paired with its bytes.
/// `symlink_target` is set instead of `body` being meaningful when the
/// output is a symlink (spec.md §4.G: `store(path, bytes, symlink_target?)`)
/// — `body` is empty in that case.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub body: Vec<u8>,
    pub symlink_target: Option<String>,
}

impl Artifact {
    pub fn file(name: impl Into<String>, body: Vec<u8>) -> Self {
        Self { name: name.into(), body, symlink_target: None }
    }

    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self { name: name.into(), body: Vec::new(), symlink_target: Some(target.into()) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub artifacts: Vec<Artifact>,
}

/// The external rule executor (spec.md §1: out of scope, a black box).
/// The scheduler's only contract with it is the inputs/outputs boundary:
/// a materialized working directory in, captured artifacts out.
pub trait RuleExecutor: Send + Sync {
    fn execute(&self, target: &Target, working_dir: &AbsoluteSystemPathBuf) -> Result<ExecutionResult, String>;
}

/// Two-tier cache lookup port, implemented by `forgegraph-cache` (local) and
/// `forgegraph-cache-cluster` (shared) respectively. Kept as a trait here,
/// rather than a direct dependency on either crate, so the scheduler can be
/// tested without either cache implementation and so G/H can depend on F's
/// types without a cycle.
pub trait CachePort: Send + Sync {
    fn lookup_local(&self, package: &str, target: &str, hash: &str) -> Option<ExecutionResult>;
    fn lookup_shared(&self, package: &str, target: &str, hash: &str) -> Option<ExecutionResult>;
    fn store_local(&self, package: &str, target: &str, hash: &str, result: &ExecutionResult);
}

/// A no-op cache for tests and for callers that only want in-process builds.
pub struct NoCache;

impl CachePort for NoCache {
    fn lookup_local(&self, _package: &str, _target: &str, _hash: &str) -> Option<ExecutionResult> {
        None
    }

    fn lookup_shared(&self, _package: &str, _target: &str, _hash: &str) -> Option<ExecutionResult> {
        None
    }

    fn store_local(&self, _package: &str, _target: &str, _hash: &str, _result: &ExecutionResult) {}
}

/// Post-build hooks are interpreter callables from the core's viewpoint
/// (spec.md §3); this crate only needs to be able to invoke one by name and
/// observe whether it tried to register a new dependency, which is a
/// protocol violation (spec.md §4.F).
pub trait HookRunner: Send + Sync {
    fn run_post_build(&self, target: &Target) -> Result<(), String>;
}

pub struct NoopHooks;

impl HookRunner for NoopHooks {
    fn run_post_build(&self, _target: &Target) -> Result<(), String> {
        Ok(())
    }
}
