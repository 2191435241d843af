// # Connection-Hash Pool Manager
//
// Maps each connection hash to its pool, creating pools lazily through the
// selected provider. A provider whose pool creation fails is demoted and
// the next one is tried. Each hash also gets a circuit breaker fed by
// connection-fault outcomes; an open breaker fails borrows fast instead of
// stacking waiters on a dead backend.

use crate::backend::driver::{BackendConnection, DriverRegistry};
use crate::backend::ConnHash;
use crate::config::datasource::DataSourceConfiguration;
use crate::error::{OjpError, Result};
use crate::pool::breaker::CircuitBreaker;
use crate::pool::metrics::PoolMetricsSnapshot;
use crate::pool::pool::{Borrowed, Pool};
use crate::provider::standard::{direct_settings, ConnectionFactory};
use crate::provider::{ConnectionPool, PoolSpec, ProviderKind, ProviderRegistry, XaSessionPool};
use crate::xa::session::XaBackendSession;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Breaker configuration shared by all hashes.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub threshold: u32,
    pub open_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 3,
            open_timeout: Duration::from_millis(60_000),
        }
    }
}

pub struct PoolManager {
    providers: Arc<ProviderRegistry>,
    drivers: Arc<DriverRegistry>,
    standard: DashMap<ConnHash, Arc<ConnectionPool>>,
    xa: DashMap<ConnHash, Arc<XaSessionPool>>,
    breakers: DashMap<ConnHash, Arc<CircuitBreaker>>,
    breaker_settings: BreakerSettings,
    leak_detection_threshold: Option<Duration>,
}

impl PoolManager {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        drivers: Arc<DriverRegistry>,
        breaker_settings: BreakerSettings,
        leak_detection_threshold: Option<Duration>,
    ) -> Self {
        Self {
            providers,
            drivers,
            standard: DashMap::new(),
            xa: DashMap::new(),
            breakers: DashMap::new(),
            breaker_settings,
            leak_detection_threshold,
        }
    }

    fn spec(
        &self,
        conn_hash: &ConnHash,
        backend_url: &str,
        config: &Arc<DataSourceConfiguration>,
    ) -> PoolSpec {
        PoolSpec {
            conn_hash: conn_hash.clone(),
            backend_url: backend_url.to_string(),
            config: Arc::clone(config),
            drivers: Arc::clone(&self.drivers),
            leak_detection_threshold: self.leak_detection_threshold,
        }
    }

    fn breaker(&self, conn_hash: &ConnHash) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(conn_hash.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    self.breaker_settings.threshold,
                    self.breaker_settings.open_timeout,
                ))
            })
            .value()
            .clone()
    }

    fn record_outcome<T>(&self, conn_hash: &ConnHash, outcome: &Result<T>) {
        let breaker = self.breaker(conn_hash);
        match outcome {
            Ok(_) => breaker.record_success(),
            Err(OjpError::Backend(info)) if info.is_connection_fault() => breaker.record_failure(),
            Err(OjpError::PoolTimeout(_)) => breaker.record_failure(),
            Err(_) => {}
        }
    }

    /// Get or lazily create the standard pool for a hash. Pool creation
    /// runs the provider demotion loop: a provider that fails to create its
    /// first pool is demoted and the next one is tried.
    pub async fn standard_pool(
        &self,
        conn_hash: &ConnHash,
        backend_url: &str,
        config: &Arc<DataSourceConfiguration>,
    ) -> Result<Arc<ConnectionPool>> {
        if let Some(pool) = self.standard.get(conn_hash) {
            return Ok(Arc::clone(pool.value()));
        }

        let spec = self.spec(conn_hash, backend_url, config);
        let pool = if config.pool_enabled {
            self.create_with_demotion(&spec).await?
        } else {
            // Pooling disabled: pass-through pool, no provider involved.
            let factory = Arc::new(ConnectionFactory::for_spec(&spec)?);
            Arc::new(Pool::new(
                conn_hash.to_string(),
                direct_settings(config),
                factory,
            ))
        };

        let entry = self
            .standard
            .entry(conn_hash.clone())
            .or_insert_with(|| Arc::clone(&pool));
        let winner = Arc::clone(entry.value());
        drop(entry);
        if !Arc::ptr_eq(&winner, &pool) {
            // Lost a creation race; discard ours.
            pool.shutdown().await;
        }
        Ok(winner)
    }

    async fn create_with_demotion(&self, spec: &PoolSpec) -> Result<Arc<ConnectionPool>> {
        loop {
            let provider = self.providers.provider_for(ProviderKind::Standard)?;
            let name = provider.descriptor().name;
            match provider.create_standard_pool(spec).await {
                Ok(pool) => return Ok(pool),
                Err(e) => {
                    self.providers.demote(&name, e.to_string());
                    self.providers.reload();
                }
            }
        }
    }

    /// Get or lazily create the XA session pool for a hash.
    pub async fn xa_pool(
        &self,
        conn_hash: &ConnHash,
        backend_url: &str,
        config: &Arc<DataSourceConfiguration>,
    ) -> Result<Arc<XaSessionPool>> {
        if let Some(pool) = self.xa.get(conn_hash) {
            return Ok(Arc::clone(pool.value()));
        }

        let spec = self.spec(conn_hash, backend_url, config);
        let pool = loop {
            let provider = self.providers.provider_for(ProviderKind::Xa)?;
            let name = provider.descriptor().name;
            match provider.create_xa_pool(&spec).await {
                Ok(pool) => break pool,
                Err(e) => {
                    self.providers.demote(&name, e.to_string());
                    self.providers.reload();
                }
            }
        };

        let entry = self
            .xa
            .entry(conn_hash.clone())
            .or_insert_with(|| Arc::clone(&pool));
        let winner = Arc::clone(entry.value());
        drop(entry);
        if !Arc::ptr_eq(&winner, &pool) {
            pool.shutdown().await;
        }
        Ok(winner)
    }

    /// Existing XA pool for a hash, if any.
    pub fn existing_xa_pool(&self, conn_hash: &ConnHash) -> Option<Arc<XaSessionPool>> {
        self.xa.get(conn_hash).map(|e| Arc::clone(e.value()))
    }

    /// Borrow a standard connection, honoring the hash's circuit breaker.
    pub async fn borrow_standard(
        &self,
        conn_hash: &ConnHash,
        backend_url: &str,
        config: &Arc<DataSourceConfiguration>,
    ) -> Result<Borrowed<Box<dyn BackendConnection>>> {
        if !self.breaker(conn_hash).allow() {
            return Err(OjpError::CircuitBreakerOpen(conn_hash.to_string()));
        }
        let pool = self.standard_pool(conn_hash, backend_url, config).await?;
        let outcome = pool.borrow().await;
        self.record_outcome(conn_hash, &outcome);
        outcome
    }

    /// Borrow an XA backend session, honoring the hash's circuit breaker.
    pub async fn borrow_xa(
        &self,
        conn_hash: &ConnHash,
        backend_url: &str,
        config: &Arc<DataSourceConfiguration>,
    ) -> Result<Borrowed<XaBackendSession>> {
        if !self.breaker(conn_hash).allow() {
            return Err(OjpError::CircuitBreakerOpen(conn_hash.to_string()));
        }
        let pool = self.xa_pool(conn_hash, backend_url, config).await?;
        let outcome = pool.borrow().await;
        self.record_outcome(conn_hash, &outcome);
        outcome
    }

    pub async fn release_standard(
        &self,
        conn_hash: &ConnHash,
        borrowed: Borrowed<Box<dyn BackendConnection>>,
        healthy: bool,
    ) {
        if let Some(pool) = self.standard.get(conn_hash).map(|e| Arc::clone(e.value())) {
            pool.release(borrowed, healthy).await;
        }
    }

    pub async fn release_xa(
        &self,
        conn_hash: &ConnHash,
        borrowed: Borrowed<XaBackendSession>,
        healthy: bool,
    ) {
        if let Some(pool) = self.xa.get(conn_hash).map(|e| Arc::clone(e.value())) {
            pool.release(borrowed, healthy).await;
        }
    }

    /// Mark an XA backend session for destruction instead of reuse.
    pub async fn invalidate_xa(
        &self,
        conn_hash: &ConnHash,
        borrowed: Borrowed<XaBackendSession>,
        reason: &str,
    ) {
        if let Some(pool) = self.xa.get(conn_hash).map(|e| Arc::clone(e.value())) {
            pool.invalidate(borrowed, reason).await;
        }
    }

    /// Drain and close the pools of one hash.
    pub async fn shutdown(&self, conn_hash: &ConnHash) {
        if let Some((_, pool)) = self.standard.remove(conn_hash) {
            pool.shutdown().await;
        }
        if let Some((_, pool)) = self.xa.remove(conn_hash) {
            pool.shutdown().await;
        }
        self.breakers.remove(conn_hash);
    }

    pub async fn shutdown_all(&self) {
        let hashes: Vec<ConnHash> = self
            .standard
            .iter()
            .map(|e| e.key().clone())
            .chain(self.xa.iter().map(|e| e.key().clone()))
            .collect();
        for hash in hashes {
            self.shutdown(&hash).await;
        }
    }

    /// Metrics snapshots for every live pool, standard and XA.
    pub fn metrics(&self) -> Vec<(ConnHash, PoolMetricsSnapshot)> {
        self.standard
            .iter()
            .map(|e| (e.key().clone(), e.value().metrics()))
            .chain(self.xa.iter().map(|e| (e.key().clone(), e.value().metrics())))
            .collect()
    }

    pub fn standard_pool_count(&self) -> usize {
        self.standard.len()
    }

    pub fn xa_pool_count(&self) -> usize {
        self.xa.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::connection_hash;
    use crate::backend::memory::MemDatabase;
    use crate::config::datasource::DataSourceConfiguration;
    use crate::provider::{PoolProvider, ProviderDescriptor};

    fn manager() -> PoolManager {
        PoolManager::new(
            Arc::new(ProviderRegistry::with_embedded()),
            Arc::new(DriverRegistry::with_embedded()),
            BreakerSettings::default(),
            None,
        )
    }

    fn config_with(f: impl FnOnce(&mut DataSourceConfiguration)) -> Arc<DataSourceConfiguration> {
        let mut config = DataSourceConfiguration::default();
        f(&mut config);
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_pool_created_lazily_and_cached() {
        MemDatabase::reset("mgr_lazy");
        let mgr = manager();
        let config = config_with(|_| {});
        let hash = connection_hash("mem:mgr_lazy", "", &config);

        assert_eq!(mgr.standard_pool_count(), 0);
        let conn = mgr.borrow_standard(&hash, "mem:mgr_lazy", &config).await.unwrap();
        assert_eq!(mgr.standard_pool_count(), 1);
        mgr.release_standard(&hash, conn, true).await;

        let pool_a = mgr.standard_pool(&hash, "mem:mgr_lazy", &config).await.unwrap();
        let pool_b = mgr.standard_pool(&hash, "mem:mgr_lazy", &config).await.unwrap();
        assert!(Arc::ptr_eq(&pool_a, &pool_b));
    }

    #[tokio::test]
    async fn test_pool_disabled_never_caches() {
        MemDatabase::reset("mgr_direct");
        let mgr = manager();
        let config = config_with(|c| c.pool_enabled = false);
        let hash = connection_hash("mem:mgr_direct", "", &config);

        for _ in 0..3 {
            let conn = mgr.borrow_standard(&hash, "mem:mgr_direct", &config).await.unwrap();
            mgr.release_standard(&hash, conn, true).await;
        }
        assert_eq!(MemDatabase::total_opened("mgr_direct"), 3);
        assert_eq!(MemDatabase::open_connections("mgr_direct"), 0);
    }

    #[tokio::test]
    async fn test_unhealthy_release_destroys_connection() {
        MemDatabase::reset("mgr_unhealthy");
        let mgr = manager();
        let config = config_with(|_| {});
        let hash = connection_hash("mem:mgr_unhealthy", "", &config);

        let conn = mgr.borrow_standard(&hash, "mem:mgr_unhealthy", &config).await.unwrap();
        mgr.release_standard(&hash, conn, false).await;
        assert_eq!(MemDatabase::open_connections("mgr_unhealthy"), 0);

        let conn = mgr.borrow_standard(&hash, "mem:mgr_unhealthy", &config).await.unwrap();
        assert_eq!(MemDatabase::total_opened("mgr_unhealthy"), 2);
        mgr.release_standard(&hash, conn, true).await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_pool() {
        MemDatabase::reset("mgr_shutdown");
        let mgr = manager();
        let config = config_with(|c| c.minimum_idle = 0);
        let hash = connection_hash("mem:mgr_shutdown", "", &config);

        let conn = mgr.borrow_standard(&hash, "mem:mgr_shutdown", &config).await.unwrap();
        mgr.release_standard(&hash, conn, true).await;
        assert_eq!(MemDatabase::open_connections("mgr_shutdown"), 1);

        mgr.shutdown(&hash).await;
        assert_eq!(MemDatabase::open_connections("mgr_shutdown"), 0);
        assert_eq!(mgr.standard_pool_count(), 0);
    }

    struct BrokenProvider;

    #[async_trait::async_trait]
    impl PoolProvider for BrokenProvider {
        fn descriptor(&self) -> ProviderDescriptor {
            ProviderDescriptor::new("broken", 500, ProviderKind::Standard)
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn create_standard_pool(&self, _spec: &PoolSpec) -> Result<Arc<ConnectionPool>> {
            Err(OjpError::Internal("native library failed to load".into()))
        }
    }

    #[tokio::test]
    async fn test_broken_provider_demoted_and_next_tried() {
        MemDatabase::reset("mgr_demote");
        let providers = Arc::new(ProviderRegistry::with_embedded());
        providers.register(Arc::new(BrokenProvider));
        let mgr = PoolManager::new(
            providers.clone(),
            Arc::new(DriverRegistry::with_embedded()),
            BreakerSettings::default(),
            None,
        );
        let config = config_with(|_| {});
        let hash = connection_hash("mem:mgr_demote", "", &config);

        // BrokenProvider has top priority but fails; the embedded pooled
        // provider takes over.
        let conn = mgr.borrow_standard(&hash, "mem:mgr_demote", &config).await.unwrap();
        mgr.release_standard(&hash, conn, true).await;
        assert_eq!(
            providers
                .provider_for(ProviderKind::Standard)
                .unwrap()
                .descriptor()
                .name,
            "ojp-pooled"
        );
    }

    #[tokio::test]
    async fn test_breaker_opens_after_connection_faults() {
        let mgr = manager();
        let config = config_with(|_| {});
        let hash = ConnHash::from_raw("breaker-test");

        for _ in 0..3 {
            let outcome: Result<()> = Err(OjpError::backend(0, "08006", "link down"));
            mgr.record_outcome(&hash, &outcome);
        }
        let err = mgr.borrow_standard(&hash, "mem:unused", &config).await.unwrap_err();
        assert!(matches!(err, OjpError::CircuitBreakerOpen(_)));
    }
}
