use std::collections::{HashMap, HashSet};

use forgegraph_graph::Graph;
use forgegraph_label::Label;

/// Finds a path between `from` and `to` along dependency edges, trying
/// `from -> to` first and `to -> from` second (spec.md: "at least one
/// direction's DFS must find a path"). Hidden intermediates are dropped
/// from the result; the endpoints are always kept even if hidden.
pub fn somepath(graph: &Graph, from: &Label, to: &Label) -> Option<Vec<Label>> {
    if let Some(path) = find_path(graph, from, to) {
        return Some(strip_hidden_intermediates(path));
    }
    let mut path = find_path(graph, to, from)?;
    path.reverse();
    Some(strip_hidden_intermediates(path))
}

fn find_path(graph: &Graph, from: &Label, to: &Label) -> Option<Vec<Label>> {
    if from == to {
        return Some(vec![from.clone()]);
    }
    let mut stack = vec![from.clone()];
    let mut parent: HashMap<Label, Label> = HashMap::new();
    let mut visited: HashSet<Label> = HashSet::new();
    visited.insert(from.clone());

    while let Some(current) = stack.pop() {
        for next in graph.dependencies(&current) {
            if !visited.insert(next.clone()) {
                continue;
            }
            parent.insert(next.clone(), current.clone());
            if &next == to {
                return Some(reconstruct(&parent, from, to));
            }
            stack.push(next);
        }
    }
    None
}

fn reconstruct(parent: &HashMap<Label, Label>, from: &Label, to: &Label) -> Vec<Label> {
    let mut path = vec![to.clone()];
    let mut current = to;
    while current != from {
        let prev = &parent[current];
        path.push(prev.clone());
        current = prev;
    }
    path.reverse();
    path
}

fn strip_hidden_intermediates(path: Vec<Label>) -> Vec<Label> {
    let last = path.len().saturating_sub(1);
    path.into_iter()
        .enumerate()
        .filter(|(i, label)| *i == 0 || *i == last || !label.is_hidden())
        .map(|(_, label)| label)
        .collect()
}

#[cfg(test)]
mod tests {
    use forgegraph_label::{Package, PackageKey, Target};

    use super::*;

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
    fn finds_forward_path() {
        let graph = chain_graph();
        let path = somepath(&graph, &Label::new("", "pkg", "a"), &Label::new("", "pkg", "c")).unwrap();
        assert_eq!(
            path,
            vec![Label::new("", "pkg", "a"), Label::new("", "pkg", "b"), Label::new("", "pkg", "c")]
        );
    }

    #[test]
    fn falls_back_to_reverse_direction() {
        let graph = chain_graph();
        let path = somepath(&graph, &Label::new("", "pkg", "c"), &Label::new("", "pkg", "a")).unwrap();
        assert_eq!(
            path,
            vec![Label::new("", "pkg", "c"), Label::new("", "pkg", "b"), Label::new("", "pkg", "a")]
        );
    }

    #[test]
    fn no_connection_returns_none() {
        let graph = chain_graph();
        graph.add_target(Target::new(Label::new("", "pkg", "isolated"))).unwrap();
        assert!(somepath(&graph, &Label::new("", "pkg", "a"), &Label::new("", "pkg", "isolated")).is_none());
    }

    #[test]
    fn hidden_intermediate_is_dropped() {
        let graph = Graph::new(4, 4).unwrap();
        graph.add_package(Package::new(PackageKey::new("", "pkg"), "BUILD")).unwrap();
        graph.add_target(Target::new(Label::new("", "pkg", "a"))).unwrap();
        graph.add_target(Target::new(Label::new("", "pkg", "_hidden"))).unwrap();
        graph.add_target(Target::new(Label::new("", "pkg", "c"))).unwrap();
        graph.add_dependency(Label::new("", "pkg", "a"), Label::new("", "pkg", "_hidden"));
        graph.add_dependency(Label::new("", "pkg", "_hidden"), Label::new("", "pkg", "c"));

        let path = somepath(&graph, &Label::new("", "pkg", "a"), &Label::new("", "pkg", "c")).unwrap();
        assert_eq!(path, vec![Label::new("", "pkg", "a"), Label::new("", "pkg", "c")]);
    }
}
