// # Cluster Coordination and Session Affinity
//
// Routing decisions for incoming work. Non-XA sessions may be redirected
// to a healthy peer at connect time, session by session, never within a
// session. XA work is sticky: a branch lives on exactly one node, and any
// request that names a branch known to live elsewhere gets a redirect hint
// to that node. Draining refuses new sessions while letting existing ones
// run to completion.

use crate::cluster::balancer::BalancingStrategy;
use crate::cluster::health::{PeerId, PeerInfo, PeerStatus, PeerTable};
use crate::error::{OjpError, Result};
use crate::xa::registry::XaRegistries;
use crate::xa::xid::XidKey;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Where a request should be handled.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    Local,
    Redirect(PeerInfo),
}

/// Cluster-wide view of which node hosts each live XA branch. Fed locally
/// by the dispatcher; replicated between nodes by the membership layer.
pub type BranchDirectory = DashMap<XidKey, PeerId>;

pub struct ClusterCoordinator {
    node_id: PeerId,
    peers: PeerTable,
    strategy: Box<dyn BalancingStrategy>,
    registries: Arc<XaRegistries>,
    branch_directory: Arc<BranchDirectory>,
    draining: AtomicBool,
}

impl ClusterCoordinator {
    pub fn new(
        node_id: impl Into<PeerId>,
        strategy: Box<dyn BalancingStrategy>,
        registries: Arc<XaRegistries>,
        branch_directory: Arc<BranchDirectory>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            peers: PeerTable::new(),
            strategy,
            registries,
            branch_directory,
            draining: AtomicBool::new(false),
        }
    }

    pub fn node_id(&self) -> &PeerId {
        &self.node_id
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn mark_peer(&self, id: &str, healthy: bool) {
        self.peers.mark(
            id,
            if healthy {
                PeerStatus::Healthy
            } else {
                PeerStatus::Unhealthy
            },
        );
    }

    /// Stop accepting new sessions. In-flight sessions continue.
    pub fn drain(&self) {
        tracing::info!(node = %self.node_id, "draining: refusing new sessions");
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Routing decision for a new session. XA session stickiness overrides
    /// load balancing, so only non-XA connects are eligible to move.
    pub async fn on_session_request(&self, is_xa: bool) -> Result<RoutingDecision> {
        let healthy = self.peers.healthy_peers();
        if self.is_draining() {
            return match healthy.first() {
                Some(peer) => Ok(RoutingDecision::Redirect(peer.clone())),
                None => Err(OjpError::Draining),
            };
        }
        if is_xa {
            return Ok(RoutingDecision::Local);
        }
        Ok(match self.strategy.pick(&healthy) {
            Some(peer) => RoutingDecision::Redirect(peer.clone()),
            None => RoutingDecision::Local,
        })
    }

    /// Routing decision for work on an established session. Sessions are
    /// balanced session-by-session, never within a session, so established
    /// sessions always run locally; for sessions owning live XA branches
    /// this is a hard guarantee rather than a policy choice.
    pub async fn on_session_operation(&self, session_uuid: Uuid) -> RoutingDecision {
        if self.registries.session_has_branch(session_uuid).await {
            tracing::trace!(session = %session_uuid, "session pinned by live XA branch");
        }
        RoutingDecision::Local
    }

    /// Routing decision for an operation naming an XA branch. A branch
    /// hosted on another node yields a redirect hint to that node; a
    /// branch hosted here (or not yet hosted anywhere) is handled locally.
    pub fn on_branch_request(&self, xid: &XidKey) -> RoutingDecision {
        match self.branch_directory.get(xid) {
            Some(host) if *host.value() != self.node_id => {
                match self.peers.get(host.value()) {
                    Some(peer) => RoutingDecision::Redirect(peer),
                    // Host unknown to the peer table: the branch node is
                    // gone, handle locally and let XA recovery sort it out.
                    None => RoutingDecision::Local,
                }
            }
            _ => RoutingDecision::Local,
        }
    }

    /// Record that a branch now lives on this node.
    pub fn record_branch(&self, xid: &XidKey) {
        self.branch_directory
            .insert(xid.clone(), self.node_id.clone());
    }

    /// Remove a terminated branch from the directory.
    pub fn forget_branch(&self, xid: &XidKey) {
        self.branch_directory
            .remove_if(xid, |_, host| *host == self.node_id);
    }
}
