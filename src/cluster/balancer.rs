// # Balancing Strategies
//
// Pluggable selection of a redirect target for new non-XA sessions. The
// coordinator only consults a strategy when stickiness rules allow the
// session to move at all.

use crate::cluster::health::PeerInfo;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks a redirect target among healthy peers, or `None` to keep the
/// session local.
pub trait BalancingStrategy: Send + Sync {
    fn pick<'a>(&self, peers: &'a [PeerInfo]) -> Option<&'a PeerInfo>;

    fn name(&self) -> &str;
}

/// Rotates through healthy peers, including the local node: returning
/// `None` on the local node's turn keeps roughly `1/(n+1)` of sessions
/// here.
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancingStrategy for RoundRobinStrategy {
    fn pick<'a>(&self, peers: &'a [PeerInfo]) -> Option<&'a PeerInfo> {
        if peers.is_empty() {
            return None;
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % (peers.len() + 1);
        // The extra slot is the local node.
        peers.get(slot)
    }

    fn name(&self) -> &str {
        "round-robin"
    }
}

/// Uniform random choice across healthy peers and the local node.
pub struct RandomStrategy;

impl BalancingStrategy for RandomStrategy {
    fn pick<'a>(&self, peers: &'a [PeerInfo]) -> Option<&'a PeerInfo> {
        if peers.is_empty() {
            return None;
        }
        let slot = rand::rng().random_range(0..peers.len() + 1);
        peers.get(slot)
    }

    fn name(&self) -> &str {
        "random"
    }
}
