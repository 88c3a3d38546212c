//! Compute node membership.
//!
//! Two halves with different owners:
//!
//! - [`RegistrationDesk`]: shared with the Manager's request handlers. It
//!   answers register/unregister immediately (Conflict/NotFound) and queues
//!   the accepted change.
//! - [`NodeRegistry`]: owned by the coordinator. Queued changes reach it only
//!   through [`NodeRegistry::apply`], which the coordinator calls at step
//!   boundaries.

use parking_lot::Mutex;
use stargazer_env::{Endpoint, NodeId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::{Result, StargazerError};
use crate::partition::IndexRange;

/// Health of a registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeHealth {
    /// Eligible for partitioning (once synced)
    Healthy,
    /// Missed a deadline or broke protocol; probed at each boundary
    Unhealthy,
}

/// A registered Compute node as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeNode {
    /// Derived from the node's registration token
    pub id: NodeId,

    /// Where the node listens
    pub endpoint: Endpoint,

    pub health: NodeHealth,

    /// Range assigned for the current step, if any
    pub range: Option<IndexRange>,

    /// Configuration version the node last acknowledged
    pub synced_version: Option<u64>,

    /// Registration order; the partition ordering key
    pub sequence: u64,
}

impl ComputeNode {
    fn new(id: NodeId, endpoint: Endpoint, sequence: u64) -> Self {
        Self {
            id,
            endpoint,
            health: NodeHealth::Healthy,
            range: None,
            synced_version: None,
            sequence,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health == NodeHealth::Healthy
    }

    /// True if the node can be handed a range under `version`.
    pub fn is_eligible(&self, version: u64) -> bool {
        self.is_healthy() && self.synced_version == Some(version)
    }
}

/// A membership change accepted by the desk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Join {
        id: NodeId,
        endpoint: Endpoint,
        sequence: u64,
    },
    Leave {
        id: NodeId,
    },
}

// ============================================================================
// REGISTRATION DESK
// ============================================================================

#[derive(Default)]
struct DeskState {
    /// Identity -> endpoint for every registered node, applied or not
    claimed: HashMap<NodeId, Endpoint>,
    endpoints: HashSet<Endpoint>,
    pending: Vec<MembershipChange>,
    next_sequence: u64,
}

/// Front door for register/unregister requests.
///
/// Decisions are made against the set of *claimed* identities and
/// endpoints, so a request sees the effect of earlier requests even before
/// the coordinator has applied them.
#[derive(Default)]
pub struct RegistrationDesk {
    state: Mutex<DeskState>,
}

impl RegistrationDesk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a registration, or Conflict if the identity or endpoint is
    /// already claimed.
    pub fn register(&self, id: NodeId, endpoint: Endpoint) -> Result<()> {
        let mut state = self.state.lock();

        if state.claimed.contains_key(&id) {
            return Err(StargazerError::conflict("node already registered"));
        }
        if state.endpoints.contains(&endpoint) {
            return Err(StargazerError::conflict("endpoint already registered"));
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.claimed.insert(id, endpoint.clone());
        state.endpoints.insert(endpoint.clone());
        state.pending.push(MembershipChange::Join {
            id,
            endpoint: endpoint.clone(),
            sequence,
        });

        info!(node = %id, endpoint = %endpoint, "Accepted compute registration");
        Ok(())
    }

    /// Accepts an unregistration, or NotFound if the identity is unknown.
    pub fn unregister(&self, id: NodeId) -> Result<()> {
        let mut state = self.state.lock();

        let endpoint = state.claimed.remove(&id).ok_or(StargazerError::NotFound)?;
        state.endpoints.remove(&endpoint);
        state.pending.push(MembershipChange::Leave { id });

        info!(node = %id, "Accepted compute unregistration");
        Ok(())
    }

    /// Takes every queued change, oldest first.
    pub fn drain(&self) -> Vec<MembershipChange> {
        std::mem::take(&mut self.state.lock().pending)
    }

    /// Number of claimed identities.
    pub fn claimed(&self) -> usize {
        self.state.lock().claimed.len()
    }

    /// Number of changes waiting for the next boundary.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }
}

// ============================================================================
// NODE REGISTRY
// ============================================================================

/// Coordinator-owned view of the node pool, in registration order.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<ComputeNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies queued changes. Returns (joined, left).
    pub fn apply(&mut self, changes: Vec<MembershipChange>) -> (usize, usize) {
        let (mut joined, mut left) = (0, 0);

        for change in changes {
            match change {
                MembershipChange::Join {
                    id,
                    endpoint,
                    sequence,
                } => {
                    if self.get(&id).is_some() {
                        warn!(node = %id, "Ignoring duplicate join");
                        continue;
                    }
                    self.nodes.push(ComputeNode::new(id, endpoint, sequence));
                    joined += 1;
                }
                MembershipChange::Leave { id } => {
                    let before = self.nodes.len();
                    self.nodes.retain(|n| n.id != id);
                    left += before - self.nodes.len();
                }
            }
        }

        if joined + left > 0 {
            self.nodes.sort_by_key(|n| n.sequence);
            debug!(joined, left, total = self.nodes.len(), "Applied membership changes");
        }

        (joined, left)
    }

    pub fn get(&self, id: &NodeId) -> Option<&ComputeNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    fn get_mut(&mut self, id: &NodeId) -> Option<&mut ComputeNode> {
        self.nodes.iter_mut().find(|n| &n.id == id)
    }

    /// All nodes, in registration order.
    pub fn nodes(&self) -> &[ComputeNode] {
        &self.nodes
    }

    /// Nodes that may be partitioned under `version`, in registration order.
    pub fn eligible(&self, version: u64) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_eligible(version))
            .map(|n| n.id)
            .collect()
    }

    /// Nodes that need a configure call before they can take part:
    /// Unhealthy ones (reconfirmation) and Healthy ones not yet synced to
    /// `version` (admission).
    pub fn needing_probe(&self, version: u64) -> Vec<(NodeId, Endpoint)> {
        self.nodes
            .iter()
            .filter(|n| !n.is_eligible(version))
            .map(|n| (n.id, n.endpoint.clone()))
            .collect()
    }

    /// Demotes a node. Returns true if it was Healthy.
    pub fn mark_unhealthy(&mut self, id: &NodeId) -> bool {
        match self.get_mut(id) {
            Some(node) => {
                let was = node.is_healthy();
                node.health = NodeHealth::Unhealthy;
                node.range = None;
                was
            }
            None => false,
        }
    }

    /// Records that a node acknowledged `version`, making it Healthy. A
    /// configure clears the node's range on its side, so it is cleared here
    /// too.
    pub fn mark_synced(&mut self, id: &NodeId, version: u64) {
        if let Some(node) = self.get_mut(id) {
            if !node.is_healthy() {
                info!(node = %id, "Compute node healed");
            }
            node.health = NodeHealth::Healthy;
            node.synced_version = Some(version);
            node.range = None;
        }
    }

    /// Records the range a node was assigned for the current step.
    pub fn set_range(&mut self, id: &NodeId, range: IndexRange) {
        if let Some(node) = self.get_mut(id) {
            node.range = Some(range);
        }
    }

    /// Forgets every node's range.
    pub fn clear_ranges(&mut self) {
        for node in &mut self.nodes {
            node.range = None;
        }
    }

    pub fn healthy_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_healthy()).count()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(i: u64) -> Endpoint {
        Endpoint::parse(&format!("http://compute-{}:8000", i)).unwrap()
    }

    #[test]
    fn test_register_conflicts() {
        let desk = RegistrationDesk::new();
        let a = NodeId::from_seed(1);

        desk.register(a, ep(1)).unwrap();

        let err = desk.register(a, ep(2)).unwrap_err();
        assert_eq!(err.status_code(), 409);

        let err = desk.register(NodeId::from_seed(2), ep(1)).unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn test_unregister_unknown_is_not_found() {
        let desk = RegistrationDesk::new();
        let err = desk.unregister(NodeId::from_seed(9)).unwrap_err();
        assert!(matches!(err, StargazerError::NotFound));
    }

    #[test]
    fn test_endpoint_reusable_after_unregister() {
        let desk = RegistrationDesk::new();
        let a = NodeId::from_seed(1);
        desk.register(a, ep(1)).unwrap();
        desk.unregister(a).unwrap();
        desk.register(NodeId::from_seed(2), ep(1)).unwrap();
        assert_eq!(desk.claimed(), 1);
        assert_eq!(desk.pending(), 3);
    }

    #[test]
    fn test_changes_reach_registry_only_when_applied() {
        let desk = RegistrationDesk::new();
        let mut registry = NodeRegistry::new();

        for i in 0..3 {
            desk.register(NodeId::from_seed(i), ep(i)).unwrap();
        }
        assert!(registry.is_empty());

        let (joined, left) = registry.apply(desk.drain());
        assert_eq!((joined, left), (3, 0));
        assert_eq!(desk.pending(), 0);

        desk.unregister(NodeId::from_seed(1)).unwrap();
        assert_eq!(registry.len(), 3);
        registry.apply(desk.drain());

        let order: Vec<NodeId> = registry.nodes().iter().map(|n| n.id).collect();
        assert_eq!(order, vec![NodeId::from_seed(0), NodeId::from_seed(2)]);
    }

    #[test]
    fn test_eligibility_requires_sync() {
        let desk = RegistrationDesk::new();
        let mut registry = NodeRegistry::new();
        let a = NodeId::from_seed(1);
        desk.register(a, ep(1)).unwrap();
        registry.apply(desk.drain());

        assert!(registry.eligible(1).is_empty());
        assert_eq!(registry.needing_probe(1).len(), 1);

        registry.mark_synced(&a, 1);
        assert_eq!(registry.eligible(1), vec![a]);
        assert!(registry.eligible(2).is_empty());

        assert!(registry.mark_unhealthy(&a));
        assert!(!registry.mark_unhealthy(&a));
        assert!(registry.eligible(1).is_empty());
        assert_eq!(registry.healthy_count(), 0);

        registry.mark_synced(&a, 1);
        assert_eq!(registry.eligible(1), vec![a]);
    }
}
