use forgegraph_graph::Graph;
use forgegraph_label::{Label, PackageResolver};
use serde::Serialize;

use crate::{deps::deps, render::input_repr};

#[derive(Debug, Clone, Serialize)]
pub struct TargetExport {
    pub label: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub srcs: Vec<String>,
    pub tools: Vec<String>,
    pub deps: Vec<String>,
    pub data: Vec<String>,
    pub labels: Vec<String>,
    pub requires: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub partial_hash: Option<String>,
    pub is_binary: bool,
    pub is_filegroup: bool,
    pub is_remote_file: bool,
    pub test_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageExport {
    pub path: String,
    pub targets: Vec<TargetExport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphExport {
    pub packages: Vec<PackageExport>,
}

/// JSON-serializable snapshot of `roots`' transitive closure (the whole
/// graph if `roots` is `None`), grouped by package and sorted by label
/// within each package.
pub fn graph_export(graph: &Graph, resolver: &dyn PackageResolver, roots: Option<&[Label]>) -> GraphExport {
    let included: Option<std::collections::BTreeSet<Label>> =
        roots.map(|roots| deps(graph, roots, true, -1).into_iter().collect());

    let mut by_package: std::collections::BTreeMap<String, Vec<TargetExport>> = std::collections::BTreeMap::new();
    for target in graph.all_targets() {
        if let Some(included) = &included {
            if !included.contains(&target.label) {
                continue;
            }
        }
        let package_path = target.label.package().to_string();
        let command = if target.is_filegroup || target.is_remote_file { None } else { target.command.clone() };
        let export = TargetExport {
            label: target.label.to_string(),
            inputs: {
                let mut v: Vec<String> = target
                    .sources
                    .iter()
                    .flat_map(|input| input.paths(resolver))
                    .map(|p| p.to_string())
                    .collect();
                v.sort();
                v.dedup();
                v
            },
            outputs: {
                let mut v = target.outputs.clone();
                v.sort();
                v
            },
            srcs: {
                let mut v: Vec<String> = target.sources.iter().map(input_repr).collect();
                v.sort();
                v
            },
            tools: {
                let mut v: Vec<String> = target.tools.iter().map(input_repr).collect();
                v.sort();
                v
            },
            deps: {
                let mut v: Vec<String> = target.deps.iter().map(|l| l.to_string()).collect();
                v.sort();
                v
            },
            data: {
                let mut v: Vec<String> = target.data.iter().map(input_repr).collect();
                v.sort();
                v
            },
            labels: {
                let mut v = target.all_labels();
                v.sort();
                v
            },
            requires: {
                let mut v = target.requires.clone();
                v.sort();
                v
            },
            command,
            partial_hash: target.runtime.lock().rule_hash.clone(),
            is_binary: target.is_binary,
            is_filegroup: target.is_filegroup,
            is_remote_file: target.is_remote_file,
            test_only: target.test_only,
        };
        by_package.entry(package_path).or_default().push(export);
    }

    let packages = by_package
        .into_iter()
        .map(|(path, mut targets)| {
            targets.sort_by(|a, b| a.label.cmp(&b.label));
            PackageExport { path, targets }
        })
        .collect();

    GraphExport { packages }
}
