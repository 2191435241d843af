// # Embedded Standard Providers
//
// `ojp-pooled` is the default standard provider: a bounded pool of raw
// backend connections. `ojp-direct` is the low-priority fallback with
// pass-through semantics: every borrow opens a fresh connection and every
// release closes it, which is also the path taken when a data source
// disables pooling.

use crate::backend::driver::{BackendConnection, BackendDriver};
use crate::config::datasource::DataSourceConfiguration;
use crate::config::properties::Properties;
use crate::error::Result;
use crate::pool::pool::{Pool, PoolSettings};
use crate::pool::pooled::PooledObjectFactory;
use crate::provider::{ConnectionPool, PoolProvider, PoolSpec, ProviderDescriptor, ProviderKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Factory producing raw backend connections for one (driver, url) pair.
pub struct ConnectionFactory {
    driver: Arc<dyn BackendDriver>,
    url: String,
    props: Properties,
}

impl ConnectionFactory {
    pub fn new(driver: Arc<dyn BackendDriver>, url: String, props: Properties) -> Self {
        Self { driver, url, props }
    }

    pub fn for_spec(spec: &PoolSpec) -> Result<Self> {
        let driver = spec.drivers.driver_for(&spec.backend_url)?;
        Ok(Self::new(
            driver,
            spec.backend_url.clone(),
            spec.config.pass_through.clone(),
        ))
    }
}

#[async_trait]
impl PooledObjectFactory<Box<dyn BackendConnection>> for ConnectionFactory {
    async fn create(&self) -> Result<Box<dyn BackendConnection>> {
        self.driver.connect(&self.url, &self.props).await
    }

    async fn validate(&self, conn: &mut Box<dyn BackendConnection>) -> bool {
        conn.is_valid().await
    }

    async fn passivate(&self, conn: &mut Box<dyn BackendConnection>) -> Result<()> {
        // Discard any transaction state the session left behind.
        conn.rollback().await
    }

    async fn destroy(&self, mut conn: Box<dyn BackendConnection>) {
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "error closing backend connection");
        }
    }
}

fn pooled_settings(spec: &PoolSpec) -> PoolSettings {
    PoolSettings {
        leak_detection_threshold: spec.leak_detection_threshold,
        ..PoolSettings::from(spec.config.as_ref())
    }
}

/// Pass-through settings: nothing is cached, every release destroys.
pub(crate) fn direct_settings(config: &DataSourceConfiguration) -> PoolSettings {
    PoolSettings {
        max_size: 1 << 16,
        min_idle: 0,
        acquire_timeout: config.connection_timeout(),
        idle_timeout: None,
        max_lifetime: Some(Duration::ZERO),
        leak_detection_threshold: None,
        ..PoolSettings::default()
    }
}

/// Default bounded standard pool provider.
pub struct PooledConnectionProvider;

#[async_trait]
impl PoolProvider for PooledConnectionProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new("ojp-pooled", 100, ProviderKind::Standard)
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn create_standard_pool(&self, spec: &PoolSpec) -> Result<Arc<ConnectionPool>> {
        let factory = Arc::new(ConnectionFactory::for_spec(spec)?);
        Ok(Arc::new(Pool::new(
            spec.conn_hash.to_string(),
            pooled_settings(spec),
            factory,
        )))
    }
}

/// Fallback provider with open-per-borrow, close-per-release semantics.
pub struct DirectConnectionProvider;

#[async_trait]
impl PoolProvider for DirectConnectionProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new("ojp-direct", 10, ProviderKind::Standard)
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn create_standard_pool(&self, spec: &PoolSpec) -> Result<Arc<ConnectionPool>> {
        let factory = Arc::new(ConnectionFactory::for_spec(spec)?);
        Ok(Arc::new(Pool::new(
            spec.conn_hash.to_string(),
            direct_settings(&spec.config),
            factory,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::connection_hash;
    use crate::backend::driver::DriverRegistry;
    use crate::backend::memory::MemDatabase;

    fn spec(url: &str, config: DataSourceConfiguration) -> PoolSpec {
        let config = Arc::new(config);
        PoolSpec {
            conn_hash: connection_hash(url, "", &config),
            backend_url: url.to_string(),
            config,
            drivers: Arc::new(DriverRegistry::with_embedded()),
            leak_detection_threshold: None,
        }
    }

    #[tokio::test]
    async fn test_pooled_provider_creates_bounded_pool() {
        MemDatabase::reset("prov_pooled");
        let mut config = DataSourceConfiguration::default();
        config.maximum_pool_size = 2;
        config.minimum_idle = 0;
        let pool = PooledConnectionProvider
            .create_standard_pool(&spec("mem:prov_pooled", config))
            .await
            .unwrap();

        let conn = pool.borrow().await.unwrap();
        pool.release(conn, true).await;
        let again = pool.borrow().await.unwrap();
        pool.release(again, true).await;

        // One physical connection served both borrows.
        assert_eq!(MemDatabase::total_opened("prov_pooled"), 1);
    }

    #[tokio::test]
    async fn test_direct_provider_never_caches() {
        MemDatabase::reset("prov_direct");
        let pool = DirectConnectionProvider
            .create_standard_pool(&spec("mem:prov_direct", DataSourceConfiguration::default()))
            .await
            .unwrap();

        for _ in 0..3 {
            let conn = pool.borrow().await.unwrap();
            pool.release(conn, true).await;
        }

        assert_eq!(MemDatabase::total_opened("prov_direct"), 3);
        assert_eq!(MemDatabase::open_connections("prov_direct"), 0);
        assert_eq!(pool.idle_count(), 0);
    }
}
