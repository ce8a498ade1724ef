use std::collections::BTreeSet;

use forgegraph_graph::Graph;
use forgegraph_label::Label;

/// Labels reachable from `roots` within `depth` hops along dependency
/// edges (`deps`), or along reverse edges (`revdeps`). `depth < 0` means
/// unbounded. Roots are always included, mirroring `Graph::transitive_closure`
/// at `depth == -1`.
pub fn deps(graph: &Graph, roots: &[Label], hidden: bool, depth: i64) -> Vec<Label> {
    let visited = bounded_walk(roots, depth, |label| graph.dependencies(label));
    let mut out: Vec<Label> = if hidden {
        visited.into_iter().collect()
    } else {
        visited.into_iter().filter(|label| !label.is_hidden()).collect()
    };
    out.sort();
    out.dedup();
    out
}

/// Reverse traversal. Unlike `deps`, a hidden target isn't dropped when
/// `hidden` is false — it's collapsed to its user-visible parent, since a
/// hidden target's reverse dependents are real findings the caller still
/// needs to see, just addressed by the visible label that owns them.
pub fn revdeps(graph: &Graph, roots: &[Label], hidden: bool, depth: i64) -> Vec<Label> {
    let visited = bounded_walk(roots, depth, |label| graph.reverse_dependencies(label));
    let mut out: Vec<Label> = if hidden {
        visited.into_iter().collect()
    } else {
        visited.into_iter().map(|label| if label.is_hidden() { label.parent() } else { label }).collect()
    };
    out.sort();
    out.dedup();
    out
}

fn bounded_walk(roots: &[Label], depth: i64, neighbors: impl Fn(&Label) -> Vec<Label>) -> BTreeSet<Label> {
    let mut visited: BTreeSet<Label> = roots.iter().cloned().collect();
    let mut frontier: Vec<Label> = roots.to_vec();
    let mut hop = 0i64;
    while !frontier.is_empty() && (depth < 0 || hop < depth) {
        let mut next = Vec::new();
        for label in &frontier {
            for n in neighbors(label) {
                if visited.insert(n.clone()) {
                    next.push(n);
                }
            }
        }
        frontier = next;
        hop += 1;
    }
    visited
}
