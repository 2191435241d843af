// # Pooled Object Model
//
// Generic lifecycle hooks for pooled objects and the bookkeeping wrapper the
// pool keeps around each live object. The concrete object type is a raw
// backend connection for standard pools and an XA backend session for XA
// pools.

use crate::error::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Lifecycle hooks for one pooled object type.
#[async_trait]
pub trait PooledObjectFactory<T: Send>: Send + Sync {
    /// Open a new object. Failures surface to the borrower.
    async fn create(&self) -> Result<T>;

    /// Cheap health probe. A `false` result destroys the object.
    async fn validate(&self, obj: &mut T) -> bool;

    /// Prepare an idle object for hand-out.
    async fn activate(&self, _obj: &mut T) -> Result<()> {
        Ok(())
    }

    /// Reset state before the object returns to the idle set.
    async fn passivate(&self, _obj: &mut T) -> Result<()> {
        Ok(())
    }

    /// Tear the object down. Must not fail; errors are logged internally.
    async fn destroy(&self, obj: T);
}

/// A live pooled object plus its bookkeeping.
pub struct PooledEntry<T> {
    pub(crate) obj: T,
    pub(crate) id: u64,
    pub(crate) created_at: Instant,
    pub(crate) last_used: Instant,
    pub(crate) last_validated: Instant,
    pub(crate) borrow_count: u64,
}

impl<T> PooledEntry<T> {
    pub(crate) fn new(obj: T, id: u64) -> Self {
        let now = Instant::now();
        Self {
            obj,
            id,
            created_at: now,
            last_used: now,
            last_validated: now,
            borrow_count: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub(crate) fn past_lifetime(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|max| self.age() > max)
    }

    pub(crate) fn past_idle(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|max| self.idle_for() > max)
    }

    pub(crate) fn due_validation(&self, interval: Duration) -> bool {
        self.last_validated.elapsed() >= interval
    }
}
