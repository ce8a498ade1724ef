use forgegraph_paths::{AbsoluteSystemPathBuf, AnchoredSystemPathBuf, ResolvedPath};
use serde::{Deserialize, Serialize};

use crate::label::Label;

/// Resolves a package to its on-disk location. Implemented by the graph
/// crate; kept as a trait here so `BuildInput::paths` can be evaluated
/// without this crate depending on the graph index that owns it.
pub trait PackageResolver {
    fn package_root(&self, subrepo: &str, package: &str) -> Option<AnchoredSystemPathBuf>;
}

/// A declared input to a target. Each variant knows how to resolve itself to
/// concrete repo-anchored paths given a [`PackageResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildInput {
    FileInput { package: String, file: String },
    LabelInput(Label),
    SystemInput { absolute_path: String },
    AnnotatedLabelInput { label: Label, annotation: String },
}

impl BuildInput {
    /// The ordered sequence of paths this input resolves to. A `LabelInput`
    /// or `AnnotatedLabelInput` contributes no paths directly; its outputs
    /// come from the referenced target's own `outputs` once built, which is
    /// the graph's concern rather than this data model's. A `SystemInput`
    /// already holds a concrete absolute path needing no resolver at all.
    pub fn paths(&self, resolver: &dyn PackageResolver) -> Vec<ResolvedPath> {
        match self {
            BuildInput::FileInput { package, file } => resolver
                .package_root("", package)
                .map(|root| ResolvedPath::Anchored(root.join_package(&forgegraph_paths::PackageRelativePath::new(file.as_str()))))
                .into_iter()
                .collect(),
            BuildInput::SystemInput { absolute_path } => {
                AbsoluteSystemPathBuf::new(absolute_path.as_str()).map(ResolvedPath::Absolute).into_iter().collect()
            }
            BuildInput::LabelInput(_) | BuildInput::AnnotatedLabelInput { .. } => Vec::new(),
        }
    }

    pub fn label(&self) -> Option<&Label> {
        match self {
            BuildInput::LabelInput(label) | BuildInput::AnnotatedLabelInput { label, .. } => Some(label),
            BuildInput::FileInput { .. } | BuildInput::SystemInput { .. } => None,
        }
    }
}
