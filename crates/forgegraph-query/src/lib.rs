//! Read-only traversal queries over a [`forgegraph_graph::Graph`]
//! (spec.md §4.I): `deps`, `revdeps`, `affected`, `changes`, `somepath`,
//! `whatinputs`, `whatoutputs`, the JSON `graph` export, and `completions`.
//!
//! Every query here is a pure function of a `&Graph` (plus, where file
//! paths are involved, a `&dyn PackageResolver`) — there is no mutable
//! query-engine state, mirroring the read-only nature the operations are
//! specified to have. Enumerations are always sorted by label so results
//! are deterministic regardless of shard layout or insertion order.

#![forbid(unsafe_code)]

mod affected;
mod changes;
mod completions;
mod deps;
mod export;
mod inputs;
mod render;
mod somepath;

pub use affected::affected;
pub use changes::{changes, RuleHashSnapshot};
pub use completions::completions;
pub use deps::{deps, revdeps};
pub use export::{graph_export, GraphExport, PackageExport, TargetExport};
pub use inputs::{whatinputs, whatoutputs};
pub use somepath::somepath;
