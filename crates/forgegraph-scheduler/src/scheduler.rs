//! The per-target state machine and bounded work pool (spec.md §4.F, §5).
//!
//! Readiness is tracked explicitly rather than via recursive single-flight
//! waits: a target is pushed onto a priority-bucketed ready queue the
//! instant its last dependency finishes, so a worker only ever pops a target
//! whose deps are already terminal. No worker ever blocks on another
//! target's in-flight build, which is why `forgegraph-shard-map::Limiter` is
//! not wired in here — the deadlock it guards against (a waiter holding a
//! pool slot while the target it's waiting on can't get one) cannot arise
//! under this scheduling order. `ErrMap`'s single-flight/`Limiter` pairing is
//! exercised instead by `PathHasher` (forgegraph-hash-engine), where
//! concurrent first-references to the same key are a real possibility. See
//! DESIGN.md component F.
//!
//! Completion is published through a plain `ShardedMap<Label, BuildOutcome>`
//! (component B again) rather than `ErrMap`: the ready-queue guarantees
//! exactly one worker ever computes a given target, so there is no race to
//! arbitrate and no error channel to fan out.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use forgegraph_graph::Graph;
use forgegraph_hash_engine::rule_hash;
use forgegraph_label::{Label, Target, TargetState};
use forgegraph_paths::AbsoluteSystemPathBuf;
use forgegraph_shard_map::ShardedMap;
use parking_lot::{Condvar, Mutex};
use petgraph::Direction;
use thiserror::Error;

use crate::ports::{CachePort, ExecutionResult, HookRunner, RuleExecutor};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("worker count must be at least 1")]
    NoWorkers,
}

/// Where a `Done` outcome's artifacts came from; `None` on every other
/// state. Feeds `RunSummary` so a caller can report cache effectiveness
/// without re-deriving it from `TargetState` (which only remembers the
/// terminal state, not the path that reached it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Executed,
    Local,
    Shared,
}

/// The terminal record for one target's attempt at this build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutcome {
    pub state: TargetState,
    pub rule_hash: Option<u64>,
    pub error: Option<String>,
    pub cache_source: Option<CacheSource>,
    pub duration: Duration,
}

impl BuildOutcome {
    fn done(rule_hash: u64, cache_source: CacheSource, duration: Duration) -> Self {
        Self { state: TargetState::Done, rule_hash: Some(rule_hash), error: None, cache_source: Some(cache_source), duration }
    }

    fn failed(rule_hash: Option<u64>, error: impl Into<String>, duration: Duration) -> Self {
        Self { state: TargetState::Failed, rule_hash, error: Some(error.into()), cache_source: None, duration }
    }

    fn skipped_cancelled() -> Self {
        Self { state: TargetState::SkippedCancelled, rule_hash: None, error: None, cache_source: None, duration: Duration::ZERO }
    }

    fn skipped_dep_failed() -> Self {
        Self { state: TargetState::SkippedDepFailed, rule_hash: None, error: None, cache_source: None, duration: Duration::ZERO }
    }
}

/// A minimal per-build report: every target's terminal outcome plus
/// totals a caller (CLI) can log without walking `targets` itself. Not a
/// second Query Engine — `forgegraph-query` remains the answer for graph
/// questions; this only says what happened during the run that produced
/// it.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub targets: BTreeMap<Label, BuildOutcome>,
    pub wall_time: Duration,
    pub done_count: usize,
    pub cached_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
}

impl RunSummary {
    fn new(targets: BTreeMap<Label, BuildOutcome>, wall_time: Duration) -> Self {
        let mut done_count = 0;
        let mut cached_count = 0;
        let mut failed_count = 0;
        let mut skipped_count = 0;
        for outcome in targets.values() {
            match outcome.state {
                TargetState::Done => {
                    done_count += 1;
                    if matches!(outcome.cache_source, Some(CacheSource::Local) | Some(CacheSource::Shared)) {
                        cached_count += 1;
                    }
                }
                TargetState::Failed => failed_count += 1,
                TargetState::SkippedCancelled | TargetState::SkippedDepFailed => skipped_count += 1,
                _ => {}
            }
        }
        Self { targets, wall_time, done_count, cached_count, failed_count, skipped_count }
    }
}

/// Drives a single build: the set of per-run bookkeeping structures the
/// scheduler's workers share while resolving `roots` and everything they
/// transitively depend on. A fresh `Run` is built for each call to
/// [`Scheduler::build`]; the `Scheduler` itself holds only build-spanning
/// collaborators (graph, executor, cache, hooks).
struct Run {
    remaining_deps: Mutex<HashMap<Label, usize>>,
    priority: HashMap<Label, u64>,
    queue: Mutex<BTreeMap<u64, VecDeque<Label>>>,
    queue_cv: Condvar,
    scheduled: Mutex<HashSet<Label>>,
    outstanding: AtomicUsize,
    outcomes: ShardedMap<Label, BuildOutcome>,
}

impl Run {
    fn new(graph: &Graph, roots: &[Label]) -> Self {
        let closure = graph.transitive_closure(roots, Direction::Outgoing);
        let mut remaining_deps = HashMap::new();
        let mut priority = HashMap::new();
        for label in &closure {
            remaining_deps.insert(label.clone(), graph.dependencies(label).len());
            let rdep_count = graph.transitive_closure(std::slice::from_ref(label), Direction::Incoming).len();
            priority.insert(label.clone(), rdep_count as u64);
        }

        let run = Self {
            remaining_deps: Mutex::new(remaining_deps),
            priority,
            queue: Mutex::new(BTreeMap::new()),
            queue_cv: Condvar::new(),
            scheduled: Mutex::new(HashSet::new()),
            outstanding: AtomicUsize::new(closure.len()),
            outcomes: ShardedMap::new(64).expect("64 is a power of two"),
        };

        for label in &closure {
            if run.remaining_deps.lock()[label] == 0 {
                run.enqueue(label.clone());
            }
        }
        run
    }

    /// Pushes `label` onto its priority bucket, guarding against a label
    /// being enqueued twice (which would otherwise happen if it's both
    /// readied by dependency-count and separately force-skipped).
    fn enqueue(&self, label: Label) {
        if !self.scheduled.lock().insert(label.clone()) {
            return;
        }
        let priority = self.priority.get(&label).copied().unwrap_or(0);
        // Higher rdep-count sorts first; BTreeMap iterates ascending, so
        // invert the key.
        let key = u64::MAX - priority;
        self.queue.lock().entry(key).or_default().push_back(label);
        self.queue_cv.notify_one();
    }

    /// Blocks until a ready target is available or the run has no more
    /// outstanding targets at all.
    fn pop(&self) -> Option<Label> {
        let mut queue = self.queue.lock();
        loop {
            if let Some((&bucket, labels)) = queue.iter_mut().next() {
                if let Some(label) = labels.pop_front() {
                    if labels.is_empty() {
                        queue.remove(&bucket);
                    }
                    return Some(label);
                }
            }
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return None;
            }
            self.queue_cv.wait(&mut queue);
        }
    }

    fn outcome_of(&self, label: &Label) -> Option<BuildOutcome> {
        self.outcomes.peek(label)
    }

    /// Publishes `label`'s outcome and propagates readiness (or forced
    /// skip) to its direct reverse dependencies that are part of this run.
    fn finish(&self, label: Label, outcome: BuildOutcome, cancelled: bool, graph: &Graph) {
        let succeeded = outcome.state == TargetState::Done;
        self.outcomes.set(label.clone(), outcome);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.queue_cv.notify_all();

        for rdep in graph.reverse_dependencies(&label) {
            let in_run = self.remaining_deps.lock().contains_key(&rdep);
            if !in_run {
                continue;
            }
            if succeeded {
                let ready = {
                    let mut remaining = self.remaining_deps.lock();
                    match remaining.get_mut(&rdep) {
                        Some(count) if *count > 0 => {
                            *count -= 1;
                            *count == 0
                        }
                        _ => false,
                    }
                };
                if ready {
                    self.enqueue(rdep);
                }
            } else {
                let forced = if cancelled { BuildOutcome::skipped_cancelled() } else { BuildOutcome::skipped_dep_failed() };
                self.force_skip(rdep, forced, cancelled, graph);
            }
        }
    }

    /// Marks `label` terminal without waiting for its own remaining-dep
    /// count to reach zero; used to cascade a failure or cancellation down
    /// to not-yet-admitted descendants without aborting sibling work that
    /// is already running.
    fn force_skip(&self, label: Label, outcome: BuildOutcome, cancelled: bool, graph: &Graph) {
        if !self.scheduled.lock().insert(label.clone()) {
            return;
        }
        self.finish(label, outcome, cancelled, graph);
    }

    fn collect(&self) -> BTreeMap<Label, BuildOutcome> {
        let mut out = BTreeMap::new();
        self.outcomes.range(|label, outcome| {
            out.insert(label.clone(), outcome.clone());
        });
        out
    }
}

pub struct Scheduler {
    graph: Arc<Graph>,
    executor: Arc<dyn RuleExecutor>,
    cache: Arc<dyn CachePort>,
    hooks: Arc<dyn HookRunner>,
    repo_root: AbsoluteSystemPathBuf,
    config_fingerprint: Option<u64>,
    worker_count: usize,
    cancel: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        graph: Arc<Graph>,
        executor: Arc<dyn RuleExecutor>,
        cache: Arc<dyn CachePort>,
        hooks: Arc<dyn HookRunner>,
        repo_root: AbsoluteSystemPathBuf,
        config_fingerprint: Option<u64>,
        worker_count: usize,
    ) -> Result<Self, SchedulerError> {
        if worker_count == 0 {
            return Err(SchedulerError::NoWorkers);
        }
        Ok(Self {
            graph,
            executor,
            cache,
            hooks,
            repo_root,
            config_fingerprint,
            worker_count,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Requests that all not-yet-terminal targets in the current (or next)
    /// build transition to `SKIPPED(cancelled)` as soon as a worker reaches
    /// them. Already-running work is allowed to finish rather than aborted.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn build(&self, roots: &[Label]) -> RunSummary {
        let started = Instant::now();
        let run = Run::new(&self.graph, roots);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.worker_count)
            .build()
            .expect("thread pool construction with a fixed, validated thread count cannot fail");
        pool.scope(|scope| {
            for _ in 0..self.worker_count {
                scope.spawn(|_| self.worker_loop(&run));
            }
        });
        RunSummary::new(run.collect(), started.elapsed())
    }

    fn worker_loop(&self, run: &Run) {
        while let Some(label) = run.pop() {
            self.process(run, label);
        }
    }

    fn process(&self, run: &Run, label: Label) {
        if self.cancel.load(Ordering::Acquire) {
            run.finish(label, BuildOutcome::skipped_cancelled(), true, &self.graph);
            return;
        }

        let started = Instant::now();
        let target = match self.graph.target_or_die(&label) {
            Ok(target) => target,
            Err(e) => {
                run.finish(label, BuildOutcome::failed(None, e.to_string(), started.elapsed()), false, &self.graph);
                return;
            }
        };
        target.runtime.lock().state = Some(TargetState::Active);

        let deps = self.graph.dependencies(&label);
        let mut dep_hashes = Vec::with_capacity(deps.len());
        let mut dep_failed = false;
        for dep in &deps {
            match run.outcome_of(dep) {
                Some(outcome) if outcome.state == TargetState::Done => {
                    if let Some(h) = outcome.rule_hash {
                        dep_hashes.push(h);
                    }
                }
                _ => dep_failed = true,
            }
        }
        if dep_failed {
            target.runtime.lock().state = Some(TargetState::SkippedDepFailed);
            run.finish(label, BuildOutcome::skipped_dep_failed(), false, &self.graph);
            return;
        }

        let hash = rule_hash(&target, &dep_hashes, self.config_fingerprint, None);
        let hash_hex = forgegraph_hash::key_hash64_hex(&hash.to_le_bytes());
        let package = label.package().to_string();
        let name = label.name().to_string();

        let mut outcome = if let Some(result) = self.cache.lookup_local(&package, &name, &hash_hex) {
            target.runtime.lock().state = Some(TargetState::Cached);
            let _ = result;
            BuildOutcome::done(hash, CacheSource::Local, started.elapsed())
        } else if let Some(result) = self.cache.lookup_shared(&package, &name, &hash_hex) {
            self.cache.store_local(&package, &name, &hash_hex, &result);
            target.runtime.lock().state = Some(TargetState::Cached);
            BuildOutcome::done(hash, CacheSource::Shared, started.elapsed())
        } else {
            self.build_with_retries(&target, &label, hash, &package, &name, &hash_hex, started)
        };

        if outcome.state == TargetState::Done {
            if let Err(e) = self.hooks.run_post_build(&target) {
                outcome = BuildOutcome::failed(Some(hash), format!("post-build hook failed: {e}"), started.elapsed());
            }
        }

        target.runtime.lock().state = Some(outcome.state);
        target.runtime.lock().rule_hash = outcome.rule_hash.map(|h| format!("{h:016x}"));
        run.finish(label, outcome, false, &self.graph);
    }

    fn build_with_retries(
        &self,
        target: &Arc<Target>,
        label: &Label,
        hash: u64,
        package: &str,
        name: &str,
        hash_hex: &str,
        started: Instant,
    ) -> BuildOutcome {
        let attempts = target.flakiness.unwrap_or(0) + 1;
        let mut last_error = String::new();
        for attempt in 0..attempts {
            target.runtime.lock().state = Some(TargetState::Building);
            match self.run_once(target) {
                Ok(result) => {
                    self.cache.store_local(package, name, hash_hex, &result);
                    return BuildOutcome::done(hash, CacheSource::Executed, started.elapsed());
                }
                Err(e) => {
                    last_error = e;
                    if attempt + 1 < attempts {
                        tracing::warn!(%label, attempt, error = %last_error, "retrying flaky target");
                    }
                }
            }
        }
        BuildOutcome::failed(Some(hash), last_error, started.elapsed())
    }

    /// Runs the rule executor once, enforcing `target.build_timeout` if set
    /// via a channel fed by a spawned thread. A timed-out execution's thread
    /// is abandoned rather than killed — Rust has no safe primitive to stop
    /// another thread mid-instruction — so its result, if it ever arrives,
    /// is simply discarded.
    fn run_once(&self, target: &Arc<Target>) -> Result<ExecutionResult, String> {
        match target.build_timeout {
            None => self.executor.execute(target, &self.repo_root),
            Some(timeout_secs) => {
                let (tx, rx) = std::sync::mpsc::channel();
                let executor = self.executor.clone();
                let working_dir = self.repo_root.clone();
                let target = target.clone();
                std::thread::spawn(move || {
                    let result = executor.execute(&target, &working_dir);
                    let _ = tx.send(result);
                });
                rx.recv_timeout(std::time::Duration::from_secs(timeout_secs))
                    .unwrap_or_else(|_| Err(format!("build timed out after {timeout_secs}s")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use forgegraph_label::{Package, PackageKey};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ports::{NoCache, NoopHooks};

    struct CountingExecutor {
        calls: AtomicUsize,
        fail_until: usize,
    }

    impl CountingExecutor {
        fn new(fail_until: usize) -> Self {
            Self { calls: AtomicUsize::new(0), fail_until }
        }
    }

    impl RuleExecutor for CountingExecutor {
        fn execute(&self, _target: &Target, _working_dir: &AbsoluteSystemPathBuf) -> Result<ExecutionResult, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_until {
                Err(format!("attempt {n} fails"))
            } else {
                Ok(ExecutionResult::default())
            }
        }
    }

    struct AlwaysFails;

    impl RuleExecutor for AlwaysFails {
        fn execute(&self, _target: &Target, _working_dir: &AbsoluteSystemPathBuf) -> Result<ExecutionResult, String> {
            Err("boom".to_string())
        }
    }

    struct FixedCache {
        hit: ExecutionResult,
    }

    impl CachePort for FixedCache {
        fn lookup_local(&self, _package: &str, _target: &str, _hash: &str) -> Option<ExecutionResult> {
            Some(self.hit.clone())
        }
        fn lookup_shared(&self, _package: &str, _target: &str, _hash: &str) -> Option<ExecutionResult> {
            None
        }
        fn store_local(&self, _package: &str, _target: &str, _hash: &str, _result: &ExecutionResult) {}
    }

    fn test_graph() -> Arc<Graph> {
        let graph = Graph::new(4, 4).unwrap();
        graph.add_package(Package::new(PackageKey::new("", "pkg"), "BUILD")).unwrap();
        Arc::new(graph)
    }

    fn repo_root() -> AbsoluteSystemPathBuf {
        AbsoluteSystemPathBuf::new("/repo").unwrap()
    }

    #[test]
    fn builds_a_dependency_chain_and_marks_everything_done() {
        let graph = test_graph();
        graph.add_target(Target::new(Label::new("", "pkg", "a"))).unwrap();
        graph.add_target(Target::new(Label::new("", "pkg", "b"))).unwrap();
        graph.add_dependency(Label::new("", "pkg", "a"), Label::new("", "pkg", "b"));

        let executor = Arc::new(CountingExecutor::new(0));
        let scheduler = Scheduler::new(
            graph.clone(),
            executor,
            Arc::new(NoCache),
            Arc::new(NoopHooks),
            repo_root(),
            None,
            2,
        )
        .unwrap();

        let summary = scheduler.build(&[Label::new("", "pkg", "a")]);
        assert_eq!(summary.targets[&Label::new("", "pkg", "a")].state, TargetState::Done);
        assert_eq!(summary.targets[&Label::new("", "pkg", "b")].state, TargetState::Done);
        assert_eq!(summary.done_count, 2);
        assert_eq!(summary.cached_count, 0);
    }

    #[test]
    fn a_failed_dependency_skips_its_dependent() {
        let graph = test_graph();
        graph.add_target(Target::new(Label::new("", "pkg", "a"))).unwrap();
        graph.add_target(Target::new(Label::new("", "pkg", "b"))).unwrap();
        graph.add_dependency(Label::new("", "pkg", "a"), Label::new("", "pkg", "b"));

        let scheduler = Scheduler::new(
            graph.clone(),
            Arc::new(AlwaysFails),
            Arc::new(NoCache),
            Arc::new(NoopHooks),
            repo_root(),
            None,
            2,
        )
        .unwrap();

        let summary = scheduler.build(&[Label::new("", "pkg", "a")]);
        assert_eq!(summary.targets[&Label::new("", "pkg", "b")].state, TargetState::Failed);
        assert_eq!(summary.targets[&Label::new("", "pkg", "a")].state, TargetState::SkippedDepFailed);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.skipped_count, 1);
    }

    #[test]
    fn a_local_cache_hit_skips_the_executor() {
        let graph = test_graph();
        graph.add_target(Target::new(Label::new("", "pkg", "a"))).unwrap();

        let executor = Arc::new(CountingExecutor::new(0));
        let cache = Arc::new(FixedCache { hit: ExecutionResult::default() });
        let scheduler = Scheduler::new(graph.clone(), executor.clone(), cache, Arc::new(NoopHooks), repo_root(), None, 1).unwrap();

        let summary = scheduler.build(&[Label::new("", "pkg", "a")]);
        assert_eq!(summary.targets[&Label::new("", "pkg", "a")].state, TargetState::Done);
        assert_eq!(summary.targets[&Label::new("", "pkg", "a")].cache_source, Some(CacheSource::Local));
        assert_eq!(summary.cached_count, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_flaky_target_succeeds_within_its_retry_budget() {
        let graph = test_graph();
        let mut target = Target::new(Label::new("", "pkg", "a"));
        target.flakiness = Some(2);
        graph.add_target(target).unwrap();

        let executor = Arc::new(CountingExecutor::new(2));
        let scheduler = Scheduler::new(
            graph.clone(),
            executor.clone(),
            Arc::new(NoCache),
            Arc::new(NoopHooks),
            repo_root(),
            None,
            1,
        )
        .unwrap();

        let summary = scheduler.build(&[Label::new("", "pkg", "a")]);
        assert_eq!(summary.targets[&Label::new("", "pkg", "a")].state, TargetState::Done);
        assert_eq!(summary.targets[&Label::new("", "pkg", "a")].cache_source, Some(CacheSource::Executed));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn a_cancelled_build_skips_everything_not_yet_claimed() {
        let graph = test_graph();
        graph.add_target(Target::new(Label::new("", "pkg", "a"))).unwrap();

        let scheduler = Scheduler::new(
            graph.clone(),
            Arc::new(CountingExecutor::new(0)),
            Arc::new(NoCache),
            Arc::new(NoopHooks),
            repo_root(),
            None,
            1,
        )
        .unwrap();
        scheduler.cancel();

        let summary = scheduler.build(&[Label::new("", "pkg", "a")]);
        assert_eq!(summary.targets[&Label::new("", "pkg", "a")].state, TargetState::SkippedCancelled);
        assert_eq!(summary.skipped_count, 1);
    }
}
