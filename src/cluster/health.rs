// # Cluster Peer Health
//
// Peer table with per-peer liveness and a last-known-good version vector.
// The table is read on every session request, so state lives behind a
// concurrent map and updates never take a global lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Peer node identifier.
pub type PeerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    /// Accepting redirected sessions.
    Healthy,
    /// Reachable but refusing new sessions.
    Draining,
    /// Not reachable; excluded from balancing.
    Unhealthy,
}

/// One known peer proxy node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub address: String,
    pub port: u16,
    pub status: PeerStatus,
    /// Version observed at the last successful contact.
    pub last_known_version: u64,
    pub last_contact: DateTime<Utc>,
}

impl PeerInfo {
    pub fn new(id: impl Into<PeerId>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            status: PeerStatus::Healthy,
            last_known_version: 0,
            last_contact: Utc::now(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Live peer table.
pub struct PeerTable {
    peers: DashMap<PeerId, PeerInfo>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    pub fn upsert(&self, peer: PeerInfo) {
        self.peers.insert(peer.id.clone(), peer);
    }

    pub fn remove(&self, id: &str) {
        self.peers.remove(id);
    }

    pub fn mark(&self, id: &str, status: PeerStatus) {
        if let Some(mut peer) = self.peers.get_mut(id) {
            peer.status = status;
            peer.last_contact = Utc::now();
        }
    }

    pub fn observe_version(&self, id: &str, version: u64) {
        if let Some(mut peer) = self.peers.get_mut(id) {
            peer.last_known_version = peer.last_known_version.max(version);
            peer.last_contact = Utc::now();
        }
    }

    pub fn get(&self, id: &str) -> Option<PeerInfo> {
        self.peers.get(id).map(|p| p.value().clone())
    }

    /// Peers currently eligible to receive redirected sessions.
    pub fn healthy_peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .peers
            .iter()
            .filter(|p| p.value().status == PeerStatus::Healthy)
            .map(|p| p.value().clone())
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Last-known-good version vector across all peers.
    pub fn version_vector(&self) -> HashMap<PeerId, u64> {
        self.peers
            .iter()
            .map(|p| (p.id.clone(), p.last_known_version))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}
