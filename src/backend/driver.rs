// # Backend Driver Traits and Registry
//
// A `BackendDriver` opens native connections for one URL scheme family; an
// `XaDriver` opens XA-capable connections. The registries replace dynamic
// class lookup with an explicit scheme map: resolving an unknown family is a
// configuration error, surfaced at session creation.

use crate::backend::url::scheme_of;
use crate::backend::value::{ExecuteOutcome, QueryResult, SqlValue};
use crate::config::properties::Properties;
use crate::error::{OjpError, Result};
use crate::xa::xid::XidKey;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// One live connection to a backend database.
///
/// Implementations are exclusively owned by a pool slot or a session; no
/// internal synchronization is expected of them.
#[async_trait]
pub trait BackendConnection: Send {
    async fn execute_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    async fn execute_update(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecuteOutcome>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    async fn set_savepoint(&mut self, name: &str) -> Result<()>;

    async fn release_savepoint(&mut self, name: &str) -> Result<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()>;

    /// Cheap liveness probe used on pool passivation.
    async fn is_valid(&mut self) -> bool;

    async fn close(&mut self) -> Result<()>;
}

/// An XA-capable connection: the XA resource operations plus access to the
/// derived physical connection for ordinary statement traffic.
#[async_trait]
pub trait XaConnection: Send {
    async fn xa_start(&mut self, xid: &XidKey, flags: u32) -> Result<()>;

    async fn xa_end(&mut self, xid: &XidKey, flags: u32) -> Result<()>;

    /// Returns `XA_OK` or `XA_RDONLY`.
    async fn xa_prepare(&mut self, xid: &XidKey) -> Result<i32>;

    async fn xa_commit(&mut self, xid: &XidKey, one_phase: bool) -> Result<()>;

    async fn xa_rollback(&mut self, xid: &XidKey) -> Result<()>;

    async fn xa_forget(&mut self, xid: &XidKey) -> Result<()>;

    /// Branch identifiers in prepared state at the resource manager.
    async fn xa_recover(&mut self, flags: u32) -> Result<Vec<XidKey>>;

    /// The physical connection derived from this XA connection.
    fn connection(&mut self) -> &mut dyn BackendConnection;

    async fn close(&mut self) -> Result<()>;
}

/// Factory for standard connections of one URL scheme family.
#[async_trait]
pub trait BackendDriver: Send + Sync {
    /// URL scheme this driver accepts, e.g. `h2` or `postgresql`.
    fn scheme(&self) -> &str;

    async fn connect(&self, url: &str, props: &Properties) -> Result<Box<dyn BackendConnection>>;

    /// Lightweight query used for validation probes.
    fn validation_query(&self) -> &str {
        "SELECT 1"
    }
}

/// Factory for XA connections of one URL scheme family.
#[async_trait]
pub trait XaDriver: Send + Sync {
    fn scheme(&self) -> &str;

    async fn connect_xa(&self, url: &str, props: &Properties) -> Result<Box<dyn XaConnection>>;
}

impl std::fmt::Debug for dyn BackendDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDriver").field("scheme", &self.scheme()).finish()
    }
}

/// Scheme-keyed driver registry.
///
/// Embedded drivers are registered at construction; extension drivers are
/// added during startup discovery. Lookups after initialization are
/// read-mostly.
pub struct DriverRegistry {
    standard: RwLock<HashMap<String, Arc<dyn BackendDriver>>>,
    xa: RwLock<HashMap<String, Arc<dyn XaDriver>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            standard: RwLock::new(HashMap::new()),
            xa: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-populated with the embedded in-memory driver family.
    pub fn with_embedded() -> Self {
        let registry = Self::new();
        let mem = Arc::new(crate::backend::memory::MemDriver);
        registry.register(mem.clone());
        registry.register_xa(Arc::new(crate::backend::memory::MemXaDriver));
        // The h2 scheme aliases the in-memory family.
        registry
            .standard
            .write()
            .insert("h2".to_string(), mem as Arc<dyn BackendDriver>);
        registry
            .xa
            .write()
            .insert("h2".to_string(), Arc::new(crate::backend::memory::MemXaDriver));
        registry
    }

    pub fn register(&self, driver: Arc<dyn BackendDriver>) {
        self.standard
            .write()
            .insert(driver.scheme().to_string(), driver);
    }

    pub fn register_xa(&self, driver: Arc<dyn XaDriver>) {
        self.xa.write().insert(driver.scheme().to_string(), driver);
    }

    pub fn driver_for(&self, url: &str) -> Result<Arc<dyn BackendDriver>> {
        let scheme = scheme_of(url);
        self.standard.read().get(scheme).cloned().ok_or_else(|| {
            OjpError::Config(format!("no backend driver registered for scheme '{}'", scheme))
        })
    }

    pub fn xa_driver_for(&self, url: &str) -> Result<Arc<dyn XaDriver>> {
        let scheme = scheme_of(url);
        self.xa.read().get(scheme).cloned().ok_or_else(|| {
            OjpError::Config(format!(
                "no XA driver registered for scheme '{}'",
                scheme
            ))
        })
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_embedded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_drivers_resolve() {
        let registry = DriverRegistry::with_embedded();
        assert!(registry.driver_for("mem:test").is_ok());
        assert!(registry.driver_for("h2:mem:test").is_ok());
        assert!(registry.xa_driver_for("mem:test").is_ok());
    }

    #[test]
    fn test_unknown_scheme_is_config_error() {
        let registry = DriverRegistry::with_embedded();
        let err = registry.driver_for("oracle:thin:@host").unwrap_err();
        assert!(matches!(err, OjpError::Config(_)));
        assert!(err.to_string().contains("oracle"));
    }
}
