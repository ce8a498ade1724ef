use std::collections::HashSet;

use forgegraph_graph::Graph;
use forgegraph_label::{Label, PackageKey, PackageResolver};
use forgegraph_paths::AnchoredSystemPathBuf;
use itertools::Itertools;
use petgraph::Direction;

/// A target is affected if any of its declared sources, its package's
/// build-file, or (transitively, if requested) a subincluded package's
/// sources resolve to one of `files`. A file in a package with no
/// declared targets yields no output, not an error (spec.md §9 open
/// question 3).
///
/// When `transitive` is set, a directly-affected target's own dependents
/// are affected too (spec.md §8 S3: a chain A→B→C with `src/b.go` changed
/// reports `{A, B}`, not just `B`) — the direct-match set is expanded
/// outward over `graph.reverse_dependencies` in addition to the subinclude
/// recursion `target_is_affected` already performs.
pub fn affected(
    graph: &Graph,
    resolver: &dyn PackageResolver,
    files: &[AnchoredSystemPathBuf],
    tests_only: bool,
    transitive: bool,
) -> Vec<Label> {
    let file_set: HashSet<&str> = files.iter().map(|f| f.as_path().as_str()).collect();
    let mut direct = Vec::new();
    for target in graph.all_targets() {
        let mut seen = HashSet::new();
        if target_is_affected(graph, resolver, &target.label, &file_set, transitive, &mut seen) {
            direct.push(target.label.clone());
        }
    }

    let mut result = direct.clone();
    if transitive {
        for label in &direct {
            result.extend(graph.transitive_closure(std::slice::from_ref(label), Direction::Incoming));
        }
    }

    if tests_only {
        result.retain(|label| graph.target(label).map(|t| t.test.is_some()).unwrap_or(false));
    }
    result.into_iter().unique().sorted().collect()
}

fn target_is_affected(
    graph: &Graph,
    resolver: &dyn PackageResolver,
    label: &Label,
    file_set: &HashSet<&str>,
    transitive: bool,
    seen: &mut HashSet<Label>,
) -> bool {
    if !seen.insert(label.clone()) {
        return false;
    }
    let Some(target) = graph.target(label) else {
        return false;
    };
    let package_key = PackageKey::new(label.subrepo(), label.package());
    let Some(package) = graph.package(&package_key) else {
        return false;
    };
    let package = package.lock();
    if let Some(key) = &package.key {
        let build_file = format!("{}/{}", key.path, package.filename);
        if file_set.contains(build_file.as_str()) {
            return true;
        }
    }
    for input in &target.sources {
        if input.paths(resolver).iter().any(|p| file_set.contains(p.as_str())) {
            return true;
        }
    }
    if transitive {
        for subinclude in &package.subincludes {
            if target_is_affected(graph, resolver, subinclude, file_set, transitive, seen) {
                return true;
            }
        }
    }
    false
}
