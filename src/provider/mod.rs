// # Pool Provider Module
//
// Pluggable pool implementations. The registry discovers providers at
// startup (embedded set plus descriptor files from the extension
// directory), selects one per kind by priority and availability, and
// demotes providers whose first pool creation fails.

pub mod descriptor;
pub mod registry;
pub mod standard;
pub mod xa;

pub use descriptor::{ProviderDescriptor, ProviderKind};
pub use registry::ProviderRegistry;

use crate::backend::driver::{BackendConnection, DriverRegistry};
use crate::backend::ConnHash;
use crate::config::datasource::DataSourceConfiguration;
use crate::error::{OjpError, Result};
use crate::pool::pool::Pool;
use crate::xa::session::XaBackendSession;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Pool of raw backend connections (C3's pooled object).
pub type ConnectionPool = Pool<Box<dyn BackendConnection>>;
/// Pool of XA backend sessions (C4's pooled object).
pub type XaSessionPool = Pool<XaBackendSession>;

/// Everything a provider needs to build one pool.
#[derive(Clone)]
pub struct PoolSpec {
    pub conn_hash: ConnHash,
    pub backend_url: String,
    pub config: Arc<DataSourceConfiguration>,
    pub drivers: Arc<DriverRegistry>,
    pub leak_detection_threshold: Option<Duration>,
}

/// A pluggable pool implementation.
///
/// Availability must be cheap and side-effect-free: it certifies the
/// provider can create pools without failing on missing prerequisites.
#[async_trait]
pub trait PoolProvider: Send + Sync {
    fn descriptor(&self) -> ProviderDescriptor;

    fn is_available(&self) -> bool;

    async fn create_standard_pool(&self, _spec: &PoolSpec) -> Result<Arc<ConnectionPool>> {
        Err(OjpError::Internal(format!(
            "provider {} does not create standard pools",
            self.descriptor().name
        )))
    }

    async fn create_xa_pool(&self, _spec: &PoolSpec) -> Result<Arc<XaSessionPool>> {
        Err(OjpError::Internal(format!(
            "provider {} does not create XA pools",
            self.descriptor().name
        )))
    }
}
