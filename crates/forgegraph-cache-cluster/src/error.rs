use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("hash {0} is not valid hex")]
    InvalidHash(String),
    #[error("cluster is full (capacity {0})")]
    ClusterFull(u32),
    #[error("peer request to {0} failed: {1}")]
    PeerUnreachable(String, reqwest::Error),
    #[error("peer {0} returned an RPC-level failure")]
    RpcFailed(String),
    #[error("local cache error: {0}")]
    Cache(#[from] forgegraph_cache::CacheError),
    #[error("unauthenticated: no writable or read-only cert presented")]
    Unauthenticated,
    #[error("forbidden: a read-only cert may not Store, Delete, Join, or Replicate")]
    Forbidden,
}
