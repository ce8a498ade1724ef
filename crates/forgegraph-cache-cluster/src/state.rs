//! Cluster membership and the consistent-hash arc each member owns
//! (spec.md §4.H, §6's join protocol).

use parking_lot::RwLock;

use crate::{error::ClusterError, wire::NodeInfo};

/// Which certificate set a connection was accepted on. Captured by the
/// listener that accepted it (see `server::serve_tls`) rather than dug out
/// of the TLS handshake, since the read-only/writable split is a property
/// of *which port* a client dialed, not of anything this crate needs to
/// parse out of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertKind {
    Unauthenticated,
    ReadOnly,
    Writable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcOp {
    Store,
    Retrieve,
    Delete,
    Join,
    Replicate,
    ListNodes,
}

/// Enforces spec.md §4.H's authentication rule: a writable cert may do
/// anything; a read-only cert may only Retrieve/ListNodes; unauthenticated
/// is allowed only when `mtls_configured` is false (neither cert set
/// configured at all).
pub fn authorize(kind: CertKind, op: RpcOp, mtls_configured: bool) -> Result<(), ClusterError> {
    match kind {
        CertKind::Writable => Ok(()),
        CertKind::ReadOnly => match op {
            RpcOp::Retrieve | RpcOp::ListNodes => Ok(()),
            _ => Err(ClusterError::Forbidden),
        },
        CertKind::Unauthenticated if !mtls_configured => Ok(()),
        CertKind::Unauthenticated => Err(ClusterError::Unauthenticated),
    }
}

/// Membership list plus this node's own identity. `members` is always
/// ordered by `slot`; slot `i` owns the arc `[hash_point(i, n), hash_point(i
/// + 1, n))`.
pub struct ClusterState {
    self_name: String,
    max_nodes: u32,
    members: RwLock<Vec<NodeInfo>>,
}

impl ClusterState {
    pub fn new(self_name: impl Into<String>, self_address: impl Into<String>, max_nodes: u32) -> Self {
        let self_name = self_name.into();
        Self {
            members: RwLock::new(vec![NodeInfo { name: self_name.clone(), address: self_address.into(), slot: 0 }]),
            self_name,
            max_nodes,
        }
    }

    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    pub fn members(&self) -> Vec<NodeInfo> {
        self.members.read().clone()
    }

    pub fn cluster_size(&self) -> u32 {
        self.members.read().len() as u32
    }

    fn self_slot_locked(members: &[NodeInfo], name: &str) -> Option<u32> {
        members.iter().find(|m| m.name == name).map(|m| m.slot)
    }

    pub fn self_slot(&self) -> u32 {
        let members = self.members.read();
        Self::self_slot_locked(&members, &self.self_name).expect("self is always a member")
    }

    /// Returns the member owning `hash`'s arc.
    pub fn owner(&self, hash: u32) -> NodeInfo {
        let members = self.members.read();
        let n = members.len() as u32;
        for member in members.iter() {
            if hash < forgegraph_hash::hash_point(member.slot + 1, n) {
                return member.clone();
            }
        }
        members.last().expect("members is never empty").clone()
    }

    pub fn is_self_owner(&self, hash: u32) -> bool {
        self.owner(hash).name == self.self_name
    }

    /// Accepts or rejects a join request (spec.md §6's cluster join
    /// protocol). Re-joining with a name already present reclaims that same
    /// slot so a restart preserves locality instead of being handed a new
    /// arc.
    pub fn join(&self, name: String, address: String) -> Result<(u32, u32, Vec<NodeInfo>), ClusterError> {
        let mut members = self.members.write();
        if let Some(existing) = members.iter_mut().find(|m| m.name == name) {
            existing.address = address;
            let slot = existing.slot;
            return Ok((slot, members.len() as u32, members.clone()));
        }
        if members.len() as u32 >= self.max_nodes {
            return Err(ClusterError::ClusterFull(self.max_nodes));
        }
        let slot = members.len() as u32;
        members.push(NodeInfo { name, address, slot });
        Ok((slot, members.len() as u32, members.clone()))
    }

    /// Merges a peer's member list into ours (used when we join an existing
    /// cluster and the peer hands back its full view).
    pub fn adopt(&self, known_nodes: Vec<NodeInfo>) {
        let mut members = self.members.write();
        for node in known_nodes {
            if let Some(existing) = members.iter_mut().find(|m| m.slot == node.slot) {
                *existing = node;
            } else {
                members.push(node);
            }
        }
        members.sort_by_key(|m| m.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_lone_node_owns_the_entire_keyspace() {
        let state = ClusterState::new("a", "10.0.0.1:9000", 8);
        assert!(state.is_self_owner(0));
        assert!(state.is_self_owner(u32::MAX));
    }

    #[test]
    fn joining_assigns_increasing_slots_and_full_membership() {
        let state = ClusterState::new("a", "10.0.0.1:9000", 8);
        let (slot_b, size, _) = state.join("b".into(), "10.0.0.2:9000".into()).unwrap();
        assert_eq!(slot_b, 1);
        assert_eq!(size, 2);

        let (slot_c, size, members) = state.join("c".into(), "10.0.0.3:9000".into()).unwrap();
        assert_eq!(slot_c, 2);
        assert_eq!(size, 3);
        assert_eq!(members.len(), 3);
    }

    #[test]
    fn rejoining_with_the_same_name_reclaims_its_slot() {
        let state = ClusterState::new("a", "10.0.0.1:9000", 8);
        let (slot_first, _, _) = state.join("b".into(), "10.0.0.2:9000".into()).unwrap();
        let (slot_second, size, _) = state.join("b".into(), "10.0.0.2:9999".into()).unwrap();
        assert_eq!(slot_first, slot_second);
        assert_eq!(size, 2);
        assert_eq!(state.members()[1].address, "10.0.0.2:9999");
    }

    #[test]
    fn a_full_cluster_rejects_new_joins() {
        let state = ClusterState::new("a", "addr", 1);
        let err = state.join("b".into(), "addr2".into()).unwrap_err();
        assert!(matches!(err, ClusterError::ClusterFull(1)));
    }

    #[test]
    fn three_node_ownership_matches_the_hash_point_arcs() {
        let state = ClusterState::new("a", "addr-a", 3);
        state.join("b".into(), "addr-b".into()).unwrap();
        state.join("c".into(), "addr-c".into()).unwrap();

        assert_eq!(state.owner(0).name, "a");
        assert_eq!(state.owner(1_431_655_765).name, "b");
        assert_eq!(state.owner(2_863_311_530).name, "c");
        assert_eq!(state.owner(u32::MAX).name, "c");
    }

    #[test]
    fn authorize_allows_writable_cert_everything() {
        assert!(authorize(CertKind::Writable, RpcOp::Store, true).is_ok());
        assert!(authorize(CertKind::Writable, RpcOp::Delete, true).is_ok());
    }

    #[test]
    fn authorize_restricts_read_only_cert_to_retrieve_and_list() {
        assert!(authorize(CertKind::ReadOnly, RpcOp::Retrieve, true).is_ok());
        assert!(authorize(CertKind::ReadOnly, RpcOp::ListNodes, true).is_ok());
        assert!(authorize(CertKind::ReadOnly, RpcOp::Store, true).is_err());
    }

    #[test]
    fn authorize_allows_unauthenticated_only_when_mtls_is_off() {
        assert!(authorize(CertKind::Unauthenticated, RpcOp::Store, false).is_ok());
        assert!(authorize(CertKind::Unauthenticated, RpcOp::Store, true).is_err());
    }
}
