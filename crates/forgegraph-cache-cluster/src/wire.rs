//! Wire message shapes for the six shared-cache RPCs (spec.md §4.H, §6).
//!
//! The spec describes these as "length-prefixed message[s]"; this crate
//! carries them over `axum`/`reqwest` as JSON bodies, which is the teacher's
//! own wire choice for its API client (`turborepo-api-client`). `hash` is
//! carried as a hex string at this layer rather than raw bytes, matching
//! the hex representation `forgegraph-scheduler::CachePort` already uses —
//! only `forgegraph-hash::hash`/`alternate_hash`, which need the raw digest
//! bytes, decode it back.

use serde::{Deserialize, Serialize};

/// One artifact file, carried with its content for Store/Retrieve/Replicate
/// and without it (as a reference) for Delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireArtifact {
    pub package: String,
    pub target: String,
    pub file: String,
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub symlink_target: Option<String>,
}

/// Identifies an artifact without its bytes (Retrieve's request, Delete's
/// targets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub package: String,
    pub target: String,
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub os: String,
    pub arch: String,
    pub hash: String,
    pub artifacts: Vec<WireArtifact>,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub os: String,
    pub arch: String,
    pub hash: String,
    pub artifacts: Vec<ArtifactRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub success: bool,
    pub artifacts: Vec<WireArtifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub os: String,
    pub arch: String,
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub everything: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub address: String,
    pub slot: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub success: bool,
    pub known_nodes: Vec<NodeInfo>,
    pub this_node_slot: u32,
    pub cluster_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub os: String,
    pub arch: String,
    pub hash: String,
    pub artifacts: Vec<WireArtifact>,
    #[serde(default)]
    pub delete: bool,
    pub hostname: String,
    pub peer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListNodesResponse {
    pub nodes: Vec<NodeInfo>,
}
