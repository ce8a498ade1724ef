//! Outbound RPC client for peer-to-peer cluster traffic (Join, Replicate).
//!
//! Grounded on the teacher's `turborepo-cache::http::HTTPCache`/
//! `turborepo-api-client::APIClient`: a thin `reqwest::Client` wrapper with
//! a retry wrapper around transient failures. The teacher retries on a 403
//! by refreshing an auth token; there is no token concept here, so the
//! retry is generalized to "retry a bounded number of times on any
//! connection-level failure", which is the part of that pattern that still
//! applies without an auth layer.
use std::time::Duration;

use reqwest::Client;
use tracing::warn;

use crate::{
    error::ClusterError,
    wire::{JoinRequest, JoinResponse, ReplicateRequest, ReplicateResponse},
};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct ClusterClient {
    http: Client,
}

impl Default for ClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterClient {
    pub fn new() -> Self {
        Self { http: Client::new() }
    }

    async fn post_with_retry<Req, Res>(&self, url: &str, body: &Req) -> Result<Res, ClusterError>
    where
        Req: serde::Serialize + ?Sized,
        Res: serde::de::DeserializeOwned,
    {
        let mut last_err = None;
        for attempt in 0..RETRY_ATTEMPTS {
            match self.http.post(url).json(body).send().await {
                Ok(response) => match response.json::<Res>().await {
                    Ok(parsed) => return Ok(parsed),
                    Err(e) => last_err = Some(ClusterError::PeerUnreachable(url.to_string(), e)),
                },
                Err(e) => {
                    warn!(url, attempt, error = %e, "cluster peer request failed, retrying");
                    last_err = Some(ClusterError::PeerUnreachable(url.to_string(), e));
                }
            }
            if attempt + 1 < RETRY_ATTEMPTS {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    pub async fn join(&self, peer_address: &str, req: &JoinRequest) -> Result<JoinResponse, ClusterError> {
        let resp: JoinResponse = self.post_with_retry(&format!("{peer_address}/cluster/join"), req).await?;
        if !resp.success {
            return Err(ClusterError::RpcFailed(peer_address.to_string()));
        }
        Ok(resp)
    }

    /// Fires the single asynchronous Replicate call spec.md §4.H describes
    /// for degree-2 replication. Callers spawn this rather than awaiting it
    /// inline, matching `ReplicationFailure`'s error-handling contract
    /// (logged, never fails the originating Store).
    pub async fn replicate(&self, peer_address: &str, req: &ReplicateRequest) -> Result<ReplicateResponse, ClusterError> {
        let resp: ReplicateResponse = self.post_with_retry(&format!("{peer_address}/cluster/replicate"), req).await?;
        if !resp.success {
            return Err(ClusterError::RpcFailed(peer_address.to_string()));
        }
        Ok(resp)
    }
}
