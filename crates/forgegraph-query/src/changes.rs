use std::collections::{BTreeMap, BTreeSet};

use forgegraph_graph::Graph;
use forgegraph_label::{Label, PackageResolver};
use forgegraph_paths::AnchoredSystemPathBuf;

use crate::affected::affected;

/// A frozen `label -> rule_hash` snapshot, the minimal state `changes`
/// needs to diff two points in a build's history.
pub type RuleHashSnapshot = BTreeMap<Label, String>;

/// Targets affected between `before` and `after`: anything whose
/// `rule_hash` changed or that newly appeared/disappeared, plus anything
/// `affected()` finds from `files`, plus their reverse dependents out to
/// `level` hops.
pub fn changes(
    graph: &Graph,
    resolver: &dyn PackageResolver,
    before: &RuleHashSnapshot,
    after: &RuleHashSnapshot,
    files: &[AnchoredSystemPathBuf],
    level: u32,
) -> Vec<Label> {
    let mut changed: BTreeSet<Label> = BTreeSet::new();
    for (label, after_hash) in after {
        if before.get(label) != Some(after_hash) {
            changed.insert(label.clone());
        }
    }
    for label in before.keys() {
        if !after.contains_key(label) {
            changed.insert(label.clone());
        }
    }
    changed.extend(affected(graph, resolver, files, false, true));

    let mut result = changed.clone();
    let mut frontier: Vec<Label> = changed.into_iter().collect();
    for _ in 0..level {
        let mut next = Vec::new();
        for label in &frontier {
            for rdep in graph.reverse_dependencies(label) {
                if result.insert(rdep.clone()) {
                    next.push(rdep);
                }
            }
        }
        frontier = next;
    }
    result.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use forgegraph_label::{Package, PackageKey, Target};

    use super::*;

    struct NullResolver;
    impl PackageResolver for NullResolver {
        fn package_root(&self, _subrepo: &str, _package: &str) -> Option<AnchoredSystemPathBuf> {
            None
        }
    }

    fn chain_graph() -> Graph {
        let graph = Graph::new(4, 4).unwrap();
        graph.add_package(Package::new(PackageKey::new("", "pkg"), "BUILD")).unwrap();
        for name in ["a", "b", "c"] {
            graph.add_target(Target::new(Label::new("", "pkg", name))).unwrap();
        }
        graph.add_dependency(Label::new("", "pkg", "a"), Label::new("", "pkg", "b"));
        graph.add_dependency(Label::new("", "pkg", "b"), Label::new("", "pkg", "c"));
        graph
    }

    #[test]
    fn rule_hash_diff_flags_changed_target() {
        let graph = chain_graph();
        let before = RuleHashSnapshot::from([(Label::new("", "pkg", "c"), "h1".to_string())]);
        let after = RuleHashSnapshot::from([(Label::new("", "pkg", "c"), "h2".to_string())]);
        let result = changes(&graph, &NullResolver, &before, &after, &[], 0);
        assert_eq!(result, vec![Label::new("", "pkg", "c")]);
    }

    #[test]
    fn level_expands_to_reverse_dependents() {
        let graph = chain_graph();
        let before = RuleHashSnapshot::from([(Label::new("", "pkg", "c"), "h1".to_string())]);
        let after = RuleHashSnapshot::from([(Label::new("", "pkg", "c"), "h2".to_string())]);
        let result = changes(&graph, &NullResolver, &before, &after, &[], 2);
        assert_eq!(
            result,
            vec![Label::new("", "pkg", "a"), Label::new("", "pkg", "b"), Label::new("", "pkg", "c")]
        );
    }

    #[test]
    fn unchanged_snapshot_yields_nothing() {
        let graph = chain_graph();
        let snapshot = RuleHashSnapshot::from([(Label::new("", "pkg", "a"), "h1".to_string())]);
        let result = changes(&graph, &NullResolver, &snapshot, &snapshot, &[], 3);
        assert!(result.is_empty());
    }
}
