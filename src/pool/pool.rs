// # Generic Bounded Pool
//
// Semaphore-gated pool over any object type with factory lifecycle hooks.
// Waiters queue FIFO on the acquisition semaphore; live object count is
// capped by an explicit reservation counter so `active + idle` never
// exceeds the configured maximum. A background maintenance task restores
// the idle floor, evicts aged and idle-expired objects, and reports
// suspected leaks.

use crate::config::datasource::DataSourceConfiguration;
use crate::error::{OjpError, Result};
use crate::pool::metrics::{PoolMetrics, PoolMetricsSnapshot};
use crate::pool::pooled::{PooledEntry, PooledObjectFactory};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

/// Sizing and lifecycle settings for one pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_size: usize,
    pub min_idle: usize,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
    /// Minimum spacing between validation probes per object.
    pub validation_interval: Duration,
    /// Borrows outstanding longer than this are logged as suspected leaks.
    pub leak_detection_threshold: Option<Duration>,
    pub maintenance_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
            validation_interval: Duration::from_secs(30),
            leak_detection_threshold: None,
            maintenance_interval: Duration::from_secs(10),
        }
    }
}

impl From<&DataSourceConfiguration> for PoolSettings {
    fn from(config: &DataSourceConfiguration) -> Self {
        let defaults = Self::default();
        Self {
            max_size: (config.maximum_pool_size as usize).max(1),
            min_idle: (config.minimum_idle as usize).min(config.maximum_pool_size as usize),
            acquire_timeout: config.connection_timeout(),
            idle_timeout: (config.idle_timeout_ms > 0).then(|| config.idle_timeout()),
            max_lifetime: (config.max_lifetime_ms > 0).then(|| config.max_lifetime()),
            ..defaults
        }
    }
}

struct OutstandingBorrow {
    borrowed_at: Instant,
    leak_logged: bool,
}

struct PoolCore<T: Send + 'static> {
    name: String,
    settings: PoolSettings,
    factory: Arc<dyn PooledObjectFactory<T>>,
    idle: Mutex<VecDeque<PooledEntry<T>>>,
    permits: Arc<Semaphore>,
    live: AtomicUsize,
    next_id: AtomicU64,
    outstanding: DashMap<u64, OutstandingBorrow>,
    metrics: Arc<PoolMetrics>,
    closed: AtomicBool,
}

impl<T: Send + 'static> PoolCore<T> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn try_reserve_live(&self) -> bool {
        let mut current = self.live.load(Ordering::SeqCst);
        loop {
            if current >= self.settings.max_size {
                return false;
            }
            match self.live.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release_live(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    async fn destroy_entry(&self, entry: PooledEntry<T>) {
        self.factory.destroy(entry.obj).await;
        self.release_live();
        self.metrics.record_destroyed();
    }

    fn refresh_gauges(&self) {
        self.metrics.set_active(self.outstanding.len());
        self.metrics.set_idle(self.idle.lock().len());
    }
}

/// An object on loan from a pool. Return it via `Pool::release`; dropping it
/// without a release counts as losing the object (the slot is reclaimed and
/// the object torn down by its own `Drop`).
pub struct Borrowed<T: Send + 'static> {
    entry: Option<PooledEntry<T>>,
    _permit: Option<OwnedSemaphorePermit>,
    core: Weak<PoolCore<T>>,
}

impl<T: Send + 'static> Borrowed<T> {
    pub fn entry_id(&self) -> u64 {
        self.entry.as_ref().map(|e| e.id).unwrap_or(0)
    }
}

impl<T: Send + 'static> std::fmt::Debug for Borrowed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Borrowed").field("entry_id", &self.entry_id()).finish()
    }
}

impl<T: Send + 'static> Deref for Borrowed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entry.as_ref().expect("borrowed object already released").obj
    }
}

impl<T: Send + 'static> DerefMut for Borrowed<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.entry.as_mut().expect("borrowed object already released").obj
    }
}

impl<T: Send + 'static> Drop for Borrowed<T> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            if let Some(core) = self.core.upgrade() {
                core.outstanding.remove(&entry.id);
                core.release_live();
                core.metrics.record_destroyed();
                core.refresh_gauges();
                tracing::warn!(pool = %core.name, object = entry.id, "borrowed object dropped without release");
            }
        }
    }
}

/// Bounded pool of `T` with factory-managed lifecycle.
pub struct Pool<T: Send + 'static> {
    core: Arc<PoolCore<T>>,
    maintenance: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<T: Send + 'static> Pool<T> {
    pub fn new(
        name: impl Into<String>,
        settings: PoolSettings,
        factory: Arc<dyn PooledObjectFactory<T>>,
    ) -> Self {
        let settings = PoolSettings {
            max_size: settings.max_size.max(1),
            ..settings
        };
        let max_size = settings.max_size;
        let core = Arc::new(PoolCore {
            name: name.into(),
            settings,
            factory,
            idle: Mutex::new(VecDeque::new()),
            permits: Arc::new(Semaphore::new(max_size)),
            live: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            outstanding: DashMap::new(),
            metrics: Arc::new(PoolMetrics::new()),
            closed: AtomicBool::new(false),
        });

        let pool = Self {
            core,
            maintenance: Mutex::new(None),
        };
        pool.start_maintenance();
        pool
    }

    fn start_maintenance(&self) {
        let core = Arc::downgrade(&self.core);
        let interval = self.core.settings.maintenance_interval;
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(core) = core.upgrade() else { break };
                if core.is_closed() {
                    break;
                }
                Self::run_maintenance(&core).await;
            }
        });
        *self.maintenance.lock() = Some(handle);
    }

    async fn run_maintenance(core: &Arc<PoolCore<T>>) {
        // Evict aged and idle-expired objects. Idle-timeout eviction keeps
        // the idle floor; lifetime eviction is unconditional.
        let mut evicted = Vec::new();
        {
            let mut idle = core.idle.lock();
            let mut kept = VecDeque::with_capacity(idle.len());
            while let Some(entry) = idle.pop_front() {
                let past_lifetime = entry.past_lifetime(core.settings.max_lifetime);
                let past_idle = entry.past_idle(core.settings.idle_timeout)
                    && kept.len() + idle.len() >= core.settings.min_idle;
                if past_lifetime || past_idle {
                    evicted.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            *idle = kept;
        }
        for entry in evicted {
            tracing::debug!(pool = %core.name, object = entry.id, "evicting pooled object");
            core.destroy_entry(entry).await;
        }

        // Restore the idle floor.
        loop {
            let idle_count = core.idle.lock().len();
            if idle_count >= core.settings.min_idle || core.is_closed() {
                break;
            }
            if !core.try_reserve_live() {
                break;
            }
            match core.factory.create().await {
                Ok(obj) => {
                    let id = core.next_id.fetch_add(1, Ordering::SeqCst);
                    core.metrics.record_created();
                    core.idle.lock().push_back(PooledEntry::new(obj, id));
                }
                Err(e) => {
                    core.release_live();
                    tracing::warn!(pool = %core.name, error = %e, "failed to restore idle floor");
                    break;
                }
            }
        }

        // Leak diagnostics: log once per borrow past the threshold.
        if let Some(threshold) = core.settings.leak_detection_threshold {
            for mut item in core.outstanding.iter_mut() {
                if !item.leak_logged && item.borrowed_at.elapsed() > threshold {
                    item.leak_logged = true;
                    tracing::warn!(
                        pool = %core.name,
                        object = *item.key(),
                        outstanding_ms = item.borrowed_at.elapsed().as_millis() as u64,
                        "possible connection leak: borrow exceeded leak detection threshold"
                    );
                }
            }
        }

        core.refresh_gauges();
    }

    /// Borrow an object, waiting up to the acquire timeout. Waiters are
    /// served FIFO by the underlying semaphore.
    pub async fn borrow(&self) -> Result<Borrowed<T>> {
        if self.core.is_closed() {
            return Err(OjpError::PoolClosed);
        }
        let started = Instant::now();
        let deadline = self.core.settings.acquire_timeout;

        match timeout(deadline, self.borrow_inner(started)).await {
            Ok(result) => result,
            Err(_) => {
                self.core.metrics.record_timeout();
                Err(OjpError::PoolTimeout(deadline.as_millis() as u64))
            }
        }
    }

    async fn borrow_inner(&self, started: Instant) -> Result<Borrowed<T>> {
        let core = &self.core;
        let permit = core
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OjpError::PoolClosed)?;

        loop {
            if core.is_closed() {
                return Err(OjpError::PoolClosed);
            }

            loop {
                let popped = { core.idle.lock().pop_front() };
                let Some(mut entry) = popped else { break };
                if entry.past_lifetime(core.settings.max_lifetime) {
                    core.destroy_entry(entry).await;
                    continue;
                }
                if entry.due_validation(core.settings.validation_interval) {
                    if !core.factory.validate(&mut entry.obj).await {
                        core.metrics.record_validation_failure();
                        core.destroy_entry(entry).await;
                        continue;
                    }
                    entry.last_validated = Instant::now();
                }
                if let Err(e) = core.factory.activate(&mut entry.obj).await {
                    tracing::debug!(pool = %core.name, error = %e, "activation failed, discarding object");
                    core.destroy_entry(entry).await;
                    continue;
                }
                return Ok(self.hand_out(entry, permit, started));
            }

            if core.try_reserve_live() {
                let created = core.factory.create().await;
                return match created {
                    Ok(obj) => {
                        let id = core.next_id.fetch_add(1, Ordering::SeqCst);
                        core.metrics.record_created();
                        Ok(self.hand_out(PooledEntry::new(obj, id), permit, started))
                    }
                    Err(e) => {
                        core.release_live();
                        Err(e)
                    }
                };
            }

            // All slots are transiently accounted for; an idle object or a
            // free slot will appear shortly.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn hand_out(
        &self,
        mut entry: PooledEntry<T>,
        permit: OwnedSemaphorePermit,
        started: Instant,
    ) -> Borrowed<T> {
        entry.borrow_count += 1;
        entry.last_used = Instant::now();
        self.core.outstanding.insert(
            entry.id,
            OutstandingBorrow {
                borrowed_at: Instant::now(),
                leak_logged: false,
            },
        );
        self.core.metrics.record_borrow(started.elapsed());
        let borrowed = Borrowed {
            entry: Some(entry),
            _permit: Some(permit),
            core: Arc::downgrade(&self.core),
        };
        self.core.refresh_gauges();
        borrowed
    }

    /// Return a borrowed object. Unhealthy returns are destroyed and their
    /// slot freed for a replacement.
    pub async fn release(&self, mut borrowed: Borrowed<T>, healthy: bool) {
        let Some(mut entry) = borrowed.entry.take() else {
            return;
        };
        let core = &self.core;
        core.outstanding.remove(&entry.id);

        let mut keep = healthy && !core.is_closed() && !entry.past_lifetime(core.settings.max_lifetime);
        if keep {
            if core.factory.passivate(&mut entry.obj).await.is_err() {
                keep = false;
            } else if entry.due_validation(core.settings.validation_interval) {
                if core.factory.validate(&mut entry.obj).await {
                    entry.last_validated = Instant::now();
                } else {
                    core.metrics.record_validation_failure();
                    keep = false;
                }
            }
        }

        if keep {
            entry.last_used = Instant::now();
            core.idle.lock().push_back(entry);
        } else {
            core.destroy_entry(entry).await;
        }
        core.refresh_gauges();
        // Dropping `borrowed` frees the acquisition permit.
    }

    /// Explicitly discard a borrowed object regardless of health.
    pub async fn invalidate(&self, mut borrowed: Borrowed<T>, reason: &str) {
        if let Some(entry) = borrowed.entry.take() {
            tracing::info!(pool = %self.core.name, object = entry.id, reason, "invalidating pooled object");
            self.core.outstanding.remove(&entry.id);
            self.core.destroy_entry(entry).await;
            self.core.refresh_gauges();
        }
    }

    /// Drain the idle set and refuse further borrows. Outstanding objects
    /// are destroyed as they return.
    pub async fn shutdown(&self) {
        self.core.closed.store(true, Ordering::SeqCst);
        self.core.permits.close();
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
        let drained: Vec<_> = {
            let mut idle = self.core.idle.lock();
            idle.drain(..).collect()
        };
        for entry in drained {
            self.core.destroy_entry(entry).await;
        }
        self.core.refresh_gauges();
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.core.metrics.snapshot()
    }

    pub fn active_count(&self) -> usize {
        self.core.outstanding.len()
    }

    pub fn idle_count(&self) -> usize {
        self.core.idle.lock().len()
    }

    pub fn live_count(&self) -> usize {
        self.core.live.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct TestObj {
        serial: u32,
        healthy: bool,
    }

    #[derive(Default)]
    struct TestFactory {
        created: AtomicU32,
        destroyed: AtomicU32,
        fail_creation: AtomicBool,
    }

    #[async_trait::async_trait]
    impl PooledObjectFactory<TestObj> for TestFactory {
        async fn create(&self) -> Result<TestObj> {
            if self.fail_creation.load(Ordering::SeqCst) {
                return Err(OjpError::backend(0, "08001", "refused"));
            }
            let serial = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(TestObj {
                serial,
                healthy: true,
            })
        }

        async fn validate(&self, obj: &mut TestObj) -> bool {
            obj.healthy
        }

        async fn destroy(&self, _obj: TestObj) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn settings(max: usize) -> PoolSettings {
        PoolSettings {
            max_size: max,
            min_idle: 0,
            acquire_timeout: Duration::from_millis(100),
            idle_timeout: None,
            max_lifetime: None,
            validation_interval: Duration::ZERO,
            leak_detection_threshold: None,
            maintenance_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_borrow_release_reuses_object() {
        let factory = Arc::new(TestFactory::default());
        let pool = Pool::new("test", settings(4), factory.clone());

        let first = pool.borrow().await.unwrap();
        let serial = first.serial;
        pool.release(first, true).await;

        let second = pool.borrow().await.unwrap();
        assert_eq!(second.serial, serial);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        pool.release(second, true).await;
    }

    #[tokio::test]
    async fn test_max_size_bounds_and_timeout() {
        let factory = Arc::new(TestFactory::default());
        let pool = Pool::new("test", settings(2), factory.clone());

        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        assert_eq!(pool.live_count(), 2);

        let err = pool.borrow().await.unwrap_err();
        assert!(matches!(err, OjpError::PoolTimeout(_)));
        assert_eq!(pool.metrics().borrow_timeouts, 1);

        pool.release(a, true).await;
        pool.release(b, true).await;
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unhealthy_release_destroys() {
        let factory = Arc::new(TestFactory::default());
        let pool = Pool::new("test", settings(2), factory.clone());

        let obj = pool.borrow().await.unwrap();
        pool.release(obj, false).await;
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.live_count(), 0);

        // The slot is free again for a replacement.
        let replacement = pool.borrow().await.unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        pool.release(replacement, true).await;
    }

    #[tokio::test]
    async fn test_failed_validation_discards_idle_object() {
        let factory = Arc::new(TestFactory::default());
        let pool = Pool::new("test", settings(2), factory.clone());

        let mut obj = pool.borrow().await.unwrap();
        obj.healthy = false;
        // Healthy release stores it, but validation on next borrow rejects it.
        pool.release(obj, true).await;

        let fresh = pool.borrow().await.unwrap();
        assert!(fresh.healthy);
        assert_eq!(pool.metrics().validation_failures, 1);
        pool.release(fresh, true).await;
    }

    #[tokio::test]
    async fn test_waiter_unblocks_on_release() {
        let factory = Arc::new(TestFactory::default());
        let pool = Arc::new(Pool::new("test", settings(1), factory));

        let held = pool.borrow().await.unwrap();
        let contender = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let got = pool.borrow().await.unwrap();
                let serial = got.serial;
                pool.release(got, true).await;
                serial
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let held_serial = held.serial;
        pool.release(held, true).await;
        assert_eq!(contender.await.unwrap(), held_serial);
    }

    #[tokio::test]
    async fn test_min_idle_restored_by_maintenance() {
        let factory = Arc::new(TestFactory::default());
        let pool = Pool::new(
            "test",
            PoolSettings {
                min_idle: 2,
                maintenance_interval: Duration::from_millis(20),
                ..settings(4)
            },
            factory,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.live_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_borrows() {
        let factory = Arc::new(TestFactory::default());
        let pool = Pool::new("test", settings(2), factory.clone());

        let obj = pool.borrow().await.unwrap();
        pool.shutdown().await;
        assert!(matches!(pool.borrow().await.unwrap_err(), OjpError::PoolClosed));

        // Outstanding object is destroyed on return.
        pool.release(obj, true).await;
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test]
    async fn test_creation_failure_surfaces() {
        let factory = Arc::new(TestFactory::default());
        factory.fail_creation.store(true, Ordering::SeqCst);
        let pool = Pool::new("test", settings(1), factory.clone());

        assert!(pool.borrow().await.is_err());
        // The reserved slot was rolled back.
        assert_eq!(pool.live_count(), 0);
    }
}
