use forgegraph_graph::Graph;
use forgegraph_label::{Label, PackageKey};

/// Package and label completions for `stem`. The original walks on-disk
/// packages; this workspace has no parser driving a live filesystem tree,
/// so this walks the packages already registered in `graph` instead — the
/// same "narrow until exactly one match" contract, applied to the
/// in-memory package index rather than the disk.
pub fn completions(graph: &Graph, stem: &str, binary: bool, test: bool, hidden: bool) -> Vec<Label> {
    let matches: Vec<PackageKey> = graph
        .all_packages()
        .into_iter()
        .map(|(key, _)| key)
        .filter(|key| key.path.starts_with(stem))
        .collect();

    let [key] = matches.as_slice() else {
        return Vec::new();
    };

    let Some(package) = graph.package(key) else {
        return Vec::new();
    };
    let package = package.lock();

    let mut out: Vec<Label> = package
        .targets()
        .iter()
        .filter(|label| hidden || !label.is_hidden())
        .filter_map(|label| graph.target(label).map(|target| (label.clone(), target)))
        .filter(|(_, target)| !binary || target.is_binary)
        .filter(|(_, target)| !test || target.test.is_some())
        .map(|(label, _)| label)
        .collect();
    out.sort();
    out
}
