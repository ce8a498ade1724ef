use forgegraph_graph::Graph;
use forgegraph_label::{Label, PackageResolver};
use forgegraph_paths::PackageRelativePath;
use itertools::Itertools;

/// For each file in `files`, every target whose declared sources resolve to
/// it. Printed by callers as `file -> target`; returned here as
/// `(file, target)` pairs sorted by file then label.
pub fn whatinputs(graph: &Graph, resolver: &dyn PackageResolver, files: &[String], hidden: bool) -> Vec<(String, Label)> {
    let mut out = Vec::new();
    for target in graph.all_targets() {
        if !hidden && target.label.is_hidden() {
            continue;
        }
        for input in &target.sources {
            for resolved in input.paths(resolver) {
                if let Some(file) = files.iter().find(|f| f.as_str() == resolved.as_str()) {
                    out.push((file.clone(), target.label.clone()));
                }
            }
        }
    }
    out.into_iter().unique().sorted().collect()
}

/// For each file in `files`, every target whose declared outputs resolve to
/// it.
pub fn whatoutputs(graph: &Graph, resolver: &dyn PackageResolver, files: &[String]) -> Vec<(String, Label)> {
    let mut out = Vec::new();
    for target in graph.all_targets() {
        let Some(root) = resolver.package_root(target.label.subrepo(), target.label.package()) else {
            continue;
        };
        for output in &target.outputs {
            let resolved = root.join_package(&PackageRelativePath::new(output.as_str()));
            if let Some(file) = files.iter().find(|f| f.as_str() == resolved.as_path().as_str()) {
                out.push((file.clone(), target.label.clone()));
            }
        }
    }
    out.into_iter().unique().sorted().collect()
}

#[cfg(test)]
mod tests {
    use forgegraph_label::{BuildInput, Package, PackageKey, Target};
    use forgegraph_paths::AnchoredSystemPathBuf;

    use super::*;

    struct FlatResolver;
    impl PackageResolver for FlatResolver {
        fn package_root(&self, _subrepo: &str, package: &str) -> Option<AnchoredSystemPathBuf> {
            AnchoredSystemPathBuf::from_raw(package).ok()
        }
    }

    #[test]
    fn whatinputs_maps_file_to_owning_target() {
        let graph = Graph::new(4, 4).unwrap();
        graph.add_package(Package::new(PackageKey::new("", "pkg"), "BUILD")).unwrap();
        let mut target = Target::new(Label::new("", "pkg", "a"));
        target.sources.push(BuildInput::FileInput { package: "pkg".to_string(), file: "a.go".to_string() });
        graph.add_target(target).unwrap();

        let result = whatinputs(&graph, &FlatResolver, &["pkg/a.go".to_string()], true);
        assert_eq!(result, vec![("pkg/a.go".to_string(), Label::new("", "pkg", "a"))]);
    }

    #[test]
    fn whatinputs_maps_a_system_input_to_its_owning_target() {
        let graph = Graph::new(4, 4).unwrap();
        graph.add_package(Package::new(PackageKey::new("", "pkg"), "BUILD")).unwrap();
        let mut target = Target::new(Label::new("", "pkg", "a"));
        target.sources.push(BuildInput::SystemInput { absolute_path: "/usr/bin/go".to_string() });
        graph.add_target(target).unwrap();

        let result = whatinputs(&graph, &FlatResolver, &["/usr/bin/go".to_string()], true);
        assert_eq!(result, vec![("/usr/bin/go".to_string(), Label::new("", "pkg", "a"))]);
    }

    #[test]
    fn whatoutputs_maps_file_to_producing_target() {
        let graph = Graph::new(4, 4).unwrap();
        graph.add_package(Package::new(PackageKey::new("", "pkg"), "BUILD")).unwrap();
        let mut target = Target::new(Label::new("", "pkg", "a"));
        target.outputs.push("out.bin".to_string());
        graph.add_target(target).unwrap();

        let result = whatoutputs(&graph, &FlatResolver, &["pkg/out.bin".to_string()]);
        assert_eq!(result, vec![("pkg/out.bin".to_string(), Label::new("", "pkg", "a"))]);
    }
}
