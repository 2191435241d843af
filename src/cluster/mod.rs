// # Cluster Module
//
// Peer health tracking, pluggable load-balancing strategies, and the
// coordinator enforcing XA session stickiness over balancing policy.

pub mod affinity;
pub mod balancer;
pub mod health;

pub use affinity::{BranchDirectory, ClusterCoordinator, RoutingDecision};
pub use balancer::{BalancingStrategy, RandomStrategy, RoundRobinStrategy};
pub use health::{PeerId, PeerInfo, PeerStatus, PeerTable};
