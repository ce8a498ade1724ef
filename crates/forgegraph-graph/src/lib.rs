//! The mutable target/package index: dependency edges, reverse edges, and
//! subrepo-qualified package lookups (spec.md §3, §4.D).
//!
//! Node storage is two `ShardedMap`s (one per spec.md §4.B, reused as-is);
//! dependency edges live in a single `petgraph::DiGraph`, so
//! `reverse_deps` is realized as that graph's incoming-edge view rather
//! than a second index kept in sync by hand (see SPEC_FULL.md §4.4).

#![forbid(unsafe_code)]

use std::{collections::HashMap, sync::Arc};

use forgegraph_label::{Label, Package, PackageError, PackageKey, PackageResolver, Target};
use forgegraph_paths::AnchoredSystemPathBuf;
use forgegraph_shard_map::{ShardedMap, ShardedMapError};
use parking_lot::Mutex;
use petgraph::{graph::NodeIndex, visit::Reversed, Direction};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown target {0}")]
    UnknownTarget(Label),
    #[error("target {0} already registered")]
    DuplicateTarget(Label),
    #[error("unknown package {0:?}")]
    UnknownPackage(PackageKey),
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error(transparent)]
    Shard(#[from] ShardedMapError),
}

/// A cheap snapshot of the graph's size, handy for the query engine's
/// `graph()` export and for tests without reaching for tracing/metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphStats {
    pub target_count: usize,
    pub package_count: usize,
    pub edge_count: usize,
    pub hidden_target_count: usize,
}

struct EdgeIndex {
    graph: petgraph::graph::DiGraph<Label, ()>,
    node_of: HashMap<Label, NodeIndex>,
}

impl EdgeIndex {
    fn new() -> Self {
        Self {
            graph: petgraph::graph::DiGraph::new(),
            node_of: HashMap::new(),
        }
    }

    /// Returns the node for `label`, creating one if this is the first time
    /// it's been referenced — by a dep edge or by registration, whichever
    /// comes first. This is how invariant 1 ("every edge endpoint exists or
    /// is registered as awaited") is upheld for edges: the node always
    /// exists in the edge graph even before the target itself is known to
    /// the `targets` map.
    fn get_or_create(&mut self, label: &Label) -> NodeIndex {
        if let Some(&idx) = self.node_of.get(label) {
            return idx;
        }
        let idx = self.graph.add_node(label.clone());
        self.node_of.insert(label.clone(), idx);
        idx
    }
}

pub struct Graph {
    targets: ShardedMap<Label, Arc<Target>>,
    packages: ShardedMap<PackageKey, Arc<Mutex<Package>>>,
    edges: Mutex<EdgeIndex>,
}

impl Graph {
    pub fn new(target_shards: usize, package_shards: usize) -> Result<Self, GraphError> {
        Ok(Self {
            targets: ShardedMap::new(target_shards)?,
            packages: ShardedMap::new(package_shards)?,
            edges: Mutex::new(EdgeIndex::new()),
        })
    }

    /// Registers (or, on reparse, replaces) a package wholesale.
    pub fn add_package(&self, package: Package) -> Result<(), GraphError> {
        let key = package
            .key
            .clone()
            .expect("package must carry a key before being added to the graph");
        self.packages.set(key, Arc::new(Mutex::new(package)));
        Ok(())
    }

    pub fn package(&self, key: &PackageKey) -> Option<Arc<Mutex<Package>>> {
        self.packages.peek(key)
    }

    pub fn package_or_die(&self, key: &PackageKey) -> Result<Arc<Mutex<Package>>, GraphError> {
        self.package(key).ok_or_else(|| GraphError::UnknownPackage(key.clone()))
    }

    /// Registers a freshly-parsed target. Fails with `DuplicateTarget` if
    /// this label was already added; the owning package must already be
    /// registered (the parser always emits a package before its targets).
    ///
    /// This is also where spec.md's "deps are stored as Labels that resolve
    /// into edges after package parse" resolution happens: every label in
    /// `target.deps`/`target.exported_deps` gets a dependency edge here, so
    /// `dependencies`/`reverse_dependencies`/`transitive_closure` see a real
    /// graph without a caller needing to remember to call `add_dependency`
    /// itself.
    pub fn add_target(&self, target: Target) -> Result<(), GraphError> {
        let label = target.label.clone();
        let package_key = PackageKey::new(label.subrepo(), label.package());
        let package = self.package_or_die(&package_key)?;
        {
            let mut package = package.lock();
            package.register_target(label.clone(), &target.outputs)?;
        }

        let deps: Vec<Label> = target.deps.iter().chain(target.exported_deps.iter()).cloned().collect();

        let arc = Arc::new(target);
        if !self.targets.add(label.clone(), arc) {
            return Err(GraphError::DuplicateTarget(label));
        }
        let mut edges = self.edges.lock();
        edges.get_or_create(&label);
        for dep in deps {
            let f = edges.get_or_create(&label);
            let t = edges.get_or_create(&dep);
            edges.graph.add_edge(f, t, ());
        }
        Ok(())
    }

    /// Non-blocking lookup: `None` means "not currently registered", not
    /// "please wait" (contrast with [`Graph::wait_for_target`]).
    pub fn target(&self, label: &Label) -> Option<Arc<Target>> {
        self.targets.peek(label)
    }

    pub fn target_or_die(&self, label: &Label) -> Result<Arc<Target>, GraphError> {
        self.target(label).ok_or_else(|| GraphError::UnknownTarget(label.clone()))
    }

    /// Blocks the caller until `label` is registered, implementing spec.md
    /// §4.B's await-handle contract at the graph level. Used by the
    /// scheduler when it has already committed to waiting on a dependency
    /// edge that is known to eventually resolve.
    pub fn wait_for_target(&self, label: &Label) -> Arc<Target> {
        match self.targets.get(label) {
            Some(target) => target,
            None => self.targets.wait_for(label),
        }
    }

    /// Records that `from` depends on `to`. Both ends are auto-vivified in
    /// the edge graph if not already present, independent of whether
    /// either target has been parsed yet.
    pub fn add_dependency(&self, from: Label, to: Label) {
        let mut edges = self.edges.lock();
        let f = edges.get_or_create(&from);
        let t = edges.get_or_create(&to);
        edges.graph.add_edge(f, t, ());
    }

    /// Direct (non-transitive) dependencies of `label`, sorted.
    pub fn dependencies(&self, label: &Label) -> Vec<Label> {
        self.direct_neighbors(label, Direction::Outgoing)
    }

    /// Direct reverse dependencies ("who depends on me"), sorted.
    pub fn reverse_dependencies(&self, label: &Label) -> Vec<Label> {
        self.direct_neighbors(label, Direction::Incoming)
    }

    fn direct_neighbors(&self, label: &Label, direction: Direction) -> Vec<Label> {
        let edges = self.edges.lock();
        let Some(&node) = edges.node_of.get(label) else {
            return Vec::new();
        };
        let mut out: Vec<Label> = edges
            .graph
            .neighbors_directed(node, direction)
            .map(|idx| edges.graph[idx].clone())
            .collect();
        out.sort();
        out
    }

    /// Every label transitively reachable from `roots` by dependency
    /// edges, roots included, sorted. Mirrors the DFS-over-petgraph
    /// approach used elsewhere in the workspace for the same purpose
    /// (component I's `deps`/`revdeps` queries reuse this).
    pub fn transitive_closure(&self, roots: &[Label], direction: Direction) -> Vec<Label> {
        let edges = self.edges.lock();
        let start: Vec<NodeIndex> = roots.iter().filter_map(|l| edges.node_of.get(l).copied()).collect();
        let mut visited = Vec::new();
        let visitor = |event| {
            if let petgraph::visit::DfsEvent::Discover(n, _) = event {
                visited.push(edges.graph[n].clone());
            }
        };
        match direction {
            Direction::Outgoing => petgraph::visit::depth_first_search(&edges.graph, start, visitor),
            Direction::Incoming => petgraph::visit::depth_first_search(Reversed(&edges.graph), start, visitor),
        };
        visited.sort();
        visited.dedup();
        visited
    }

    /// All currently-registered targets, in no particular order (callers
    /// that need a stable order, such as the query engine, sort by label
    /// themselves).
    pub fn all_targets(&self) -> Vec<Arc<Target>> {
        let mut out = Vec::new();
        self.targets.range(|_, target| out.push(target.clone()));
        out
    }

    /// All currently-registered packages, keyed by [`PackageKey`].
    pub fn all_packages(&self) -> Vec<(PackageKey, Arc<Mutex<Package>>)> {
        let mut out = Vec::new();
        self.packages.range(|key, package| out.push((key.clone(), package.clone())));
        out
    }

    pub fn stats(&self) -> GraphStats {
        let edges = self.edges.lock();
        let mut target_count = 0;
        let mut hidden_target_count = 0;
        self.targets.range(|label, _| {
            target_count += 1;
            if label.is_hidden() {
                hidden_target_count += 1;
            }
        });
        let mut package_count = 0;
        self.packages.range(|_, _| package_count += 1);
        GraphStats {
            target_count,
            package_count,
            edge_count: edges.graph.edge_count(),
            hidden_target_count,
        }
    }

    /// Checks invariant 4: every hidden target's `Parent()` is itself
    /// present in the graph. Intended for use in tests and post-parse
    /// validation passes, not on every mutation.
    pub fn validate_hidden_parents(&self) -> Result<(), GraphError> {
        let mut missing = None;
        self.targets.range(|label, _| {
            if missing.is_some() {
                return;
            }
            if label.is_hidden() {
                let parent = label.parent();
                if self.target(&parent).is_none() {
                    missing = Some(parent);
                }
            }
        });
        match missing {
            Some(parent) => Err(GraphError::UnknownTarget(parent)),
            None => Ok(()),
        }
    }
}

/// A package's root directory, as recorded by its [`PackageKey`], is the
/// anchor every `FileInput` in that package resolves against.
impl PackageResolver for Graph {
    fn package_root(&self, subrepo: &str, package: &str) -> Option<AnchoredSystemPathBuf> {
        let key = PackageKey::new(subrepo, package);
        self.packages.peek(&key)?;
        AnchoredSystemPathBuf::from_raw(key.path).ok()
    }
}
