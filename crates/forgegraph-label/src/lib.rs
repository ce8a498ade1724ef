//! Labels, build inputs, targets and packages: the data model every other
//! crate in the workspace builds on (spec.md §3, §4.C).

#![forbid(unsafe_code)]

mod build_input;
mod label;
mod package;
mod target;

pub use build_input::{BuildInput, PackageResolver};
pub use label::{Label, LabelError, ALL};
pub use package::{Package, PackageError, PackageKey};
pub use target::{Target, TargetRuntime, TargetState, TestSpec};
