//! The shared tier of the two-tier cache (spec.md §4.H, §6): an RPC surface
//! over a consistent-hash ring of peer nodes, with degree-2 replication and
//! an optional mTLS read-only/writable split.

#![forbid(unsafe_code)]

mod client;
mod error;
mod server;
mod state;
mod wire;

pub use client::ClusterClient;
pub use error::ClusterError;
pub use server::{router, serve_plain, serve_tls, ClusterServer, TlsIdentity};
pub use state::{authorize, CertKind, ClusterState, RpcOp};
pub use wire::{
    ArtifactRef, DeleteRequest, DeleteResponse, JoinRequest, JoinResponse, ListNodesResponse, NodeInfo, ReplicateRequest,
    ReplicateResponse, RetrieveRequest, RetrieveResponse, StoreRequest, StoreResponse, WireArtifact,
};
