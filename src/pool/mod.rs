// # Pooling Module
//
// The generic bounded pool with factory lifecycle hooks, per-pool metrics,
// the per-hash circuit breaker, and the connection-hash pool manager that
// brokers every backend acquisition.

pub mod breaker;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod pooled;

pub use breaker::{BreakerState, CircuitBreaker};
pub use manager::{BreakerSettings, PoolManager};
pub use metrics::{PoolMetrics, PoolMetricsSnapshot};
pub use pool::{Borrowed, Pool, PoolSettings};
pub use pooled::{PooledEntry, PooledObjectFactory};
