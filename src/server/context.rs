// # Action Context
//
// References every action needs: provider registry, configuration
// resolver, pool manager, XA registries, session manager, and the cluster
// coordinator. Handlers themselves are singleton values without mutable
// state; everything stateful is reached through this context.

use crate::backend::driver::DriverRegistry;
use crate::cluster::affinity::ClusterCoordinator;
use crate::config::datasource::ConfigResolver;
use crate::pool::manager::PoolManager;
use crate::provider::ProviderRegistry;
use crate::session::manager::SessionManager;
use crate::xa::registry::XaRegistries;
use std::sync::Arc;

#[derive(Clone)]
pub struct ActionContext {
    pub providers: Arc<ProviderRegistry>,
    pub drivers: Arc<DriverRegistry>,
    pub resolver: Arc<ConfigResolver>,
    pub pools: Arc<PoolManager>,
    pub registries: Arc<XaRegistries>,
    pub sessions: Arc<SessionManager>,
    pub cluster: Arc<ClusterCoordinator>,
}
