use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{build_input::BuildInput, label::Label};

/// Per-target scheduler state (spec.md §4.F). Lives on `Target` itself since
/// a target's mutual-exclusion discipline is scoped to the target, not to
/// whichever scheduler instance happens to be driving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetState {
    Pending,
    Active,
    Cached,
    Building,
    Built,
    Done,
    Failed,
    SkippedCancelled,
    SkippedDepFailed,
}

impl TargetState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TargetState::Done | TargetState::Failed | TargetState::SkippedCancelled | TargetState::SkippedDepFailed
        )
    }
}

/// The subset of a target's fields that can change after the target is
/// registered in the graph: its scheduler state, its cached `rule_hash`, and
/// labels a post-build hook appended. All three are guarded by one lock so a
/// reader never observes, say, `state == Done` with a `rule_hash` that was
/// computed under a stale configuration.
#[derive(Debug, Default)]
pub struct TargetRuntime {
    pub state: Option<TargetState>,
    pub rule_hash: Option<String>,
    pub hook_added_labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    pub flakiness: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub sandbox: bool,
    pub test_only: bool,
}

/// A single declared build target. Immutable after the `DECLARED → ACTIVE`
/// window closes, save for the fields collected in [`TargetRuntime`].
#[derive(Debug, Serialize, Deserialize)]
pub struct Target {
    pub label: Label,
    pub sources: Vec<BuildInput>,
    pub named_sources: BTreeMap<String, Vec<BuildInput>>,
    pub outputs: Vec<String>,
    pub deps: Vec<Label>,
    pub exported_deps: Vec<Label>,
    pub tools: Vec<BuildInput>,
    pub named_tools: BTreeMap<String, Vec<BuildInput>>,
    pub test_tools: Vec<BuildInput>,
    pub data: Vec<BuildInput>,
    pub named_data: BTreeMap<String, Vec<BuildInput>>,
    pub labels: Vec<String>,
    pub requires: Vec<String>,
    pub provides: BTreeMap<String, Label>,
    pub command: Option<String>,
    pub per_config_command: BTreeMap<String, String>,
    pub test_command: Option<String>,
    pub is_binary: bool,
    pub test: Option<TestSpec>,
    pub is_filegroup: bool,
    pub is_remote_file: bool,
    pub pre_build_hook: Option<String>,
    pub post_build_hook: Option<String>,
    pub building_description: Option<String>,
    pub visibility: Vec<Label>,
    pub test_only: bool,
    pub output_is_complete: bool,
    pub needs_transitive_dependencies: bool,
    pub stamp: bool,
    pub flakiness: Option<u32>,
    pub build_timeout: Option<u64>,

    #[serde(skip, default = "default_runtime")]
    pub runtime: Mutex<TargetRuntime>,
}

fn default_runtime() -> Mutex<TargetRuntime> {
    Mutex::new(TargetRuntime::default())
}

impl Target {
    pub fn new(label: Label) -> Self {
        Self {
            label,
            sources: Vec::new(),
            named_sources: BTreeMap::new(),
            outputs: Vec::new(),
            deps: Vec::new(),
            exported_deps: Vec::new(),
            tools: Vec::new(),
            named_tools: BTreeMap::new(),
            test_tools: Vec::new(),
            data: Vec::new(),
            named_data: BTreeMap::new(),
            labels: Vec::new(),
            requires: Vec::new(),
            provides: BTreeMap::new(),
            command: None,
            per_config_command: BTreeMap::new(),
            test_command: None,
            is_binary: false,
            test: None,
            is_filegroup: false,
            is_remote_file: false,
            pre_build_hook: None,
            post_build_hook: None,
            building_description: None,
            visibility: Vec::new(),
            test_only: false,
            output_is_complete: false,
            needs_transitive_dependencies: false,
            stamp: false,
            flakiness: None,
            build_timeout: None,
            runtime: Mutex::new(TargetRuntime::default()),
        }
    }

    /// Appends a label from a post-build hook. Hooks may extend `labels`
    /// but must never add a new dep (spec.md §4.F); enforcing that
    /// restriction is the scheduler's job since only it knows whether a
    /// hook call site attempted to register an edge.
    pub fn add_hook_label(&self, label: impl Into<String>) {
        self.runtime.lock().hook_added_labels.push(label.into());
    }

    pub fn all_labels(&self) -> Vec<String> {
        let mut all = self.labels.clone();
        all.extend(self.runtime.lock().hook_added_labels.iter().cloned());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_target_starts_with_empty_runtime() {
        let target = Target::new(Label::new("", "pkg", "name"));
        assert!(target.runtime.lock().state.is_none());
    }

    #[test]
    fn hook_labels_are_visible_via_all_labels() {
        let mut target = Target::new(Label::new("", "pkg", "name"));
        target.labels.push("declared".to_string());
        target.add_hook_label("from-hook");
        let all = target.all_labels();
        assert_eq!(all, vec!["declared".to_string(), "from-hook".to_string()]);
    }

    #[test]
    fn terminal_states_are_classified() {
        assert!(TargetState::Done.is_terminal());
        assert!(TargetState::Failed.is_terminal());
        assert!(!TargetState::Active.is_terminal());
    }
}
