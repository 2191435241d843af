// # Session Manager
//
// Process-wide table of client sessions. Creation resolves the client URL
// (placeholder substitution, prefix stripping), computes the connection
// hash, resolves the data-source configuration, and borrows a backend of
// the right kind. Destruction releases owned resources in reverse creation
// order and returns the backend to its pool, unless an XA branch still
// pins it, in which case the registry releases it when the branch
// terminates. A background sweeper evicts sessions idle past the
// configured window.

use crate::backend::url::{has_xa_indicator, resolve_backend_url};
use crate::backend::connection_hash;
use crate::config::datasource::ConfigResolver;
use crate::config::properties::{substitute_with, Properties};
use crate::error::{OjpError, Result};
use crate::pool::manager::PoolManager;
use crate::session::session::{BackendHandle, Session};
use crate::xa::registry::XaRegistries;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Connect-time request parameters as sent by the client driver.
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub url: String,
    pub user: String,
    pub properties: Properties,
    pub xa: bool,
}

pub struct SessionManager {
    sessions: DashMap<Uuid, Arc<Mutex<Session>>>,
    pools: Arc<PoolManager>,
    resolver: Arc<ConfigResolver>,
    registries: Arc<XaRegistries>,
    /// Process-wide properties backing `${key}` URL placeholders.
    process_props: Properties,
    idle_timeout: Duration,
    sweeper: SyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        pools: Arc<PoolManager>,
        resolver: Arc<ConfigResolver>,
        registries: Arc<XaRegistries>,
        process_props: Properties,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            sessions: DashMap::new(),
            pools,
            resolver,
            registries,
            process_props,
            idle_timeout,
            sweeper: SyncMutex::new(None),
        });
        manager.start_sweeper();
        manager
    }

    fn start_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = (self.idle_timeout / 4).max(Duration::from_millis(250));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                manager.sweep_idle().await;
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    async fn sweep_idle(&self) {
        let mut expired = Vec::new();
        for entry in self.sessions.iter() {
            // A locked session is mid-request and by definition not idle.
            if let Ok(session) = entry.value().try_lock() {
                if session.idle_for() > self.idle_timeout {
                    expired.push(*entry.key());
                }
            }
        }
        for uuid in expired {
            tracing::info!(session = %uuid, "evicting idle session");
            if let Err(e) = self.destroy_session(uuid, true).await {
                tracing::debug!(session = %uuid, error = %e, "idle eviction race");
            }
        }
    }

    /// Create a session for a client connect.
    pub async fn create_session(&self, request: ConnectRequest) -> Result<Uuid> {
        let backend_url = resolve_backend_url(&request.url, &self.process_props)?;
        let config = self.resolver.resolve(&request.properties);
        let user = request
            .properties
            .get("user")
            .cloned()
            .unwrap_or_else(|| request.user.clone());
        let conn_hash = connection_hash(&backend_url, &user, &config);
        let is_xa = request.xa || has_xa_indicator(&backend_url);

        let session = if is_xa {
            let pool = self.pools.xa_pool(&conn_hash, &backend_url, &config).await?;
            let borrowed = self.pools.borrow_xa(&conn_hash, &backend_url, &config).await?;
            let registry = self.registries.registry_for(&conn_hash, &pool);
            let slot = Arc::new(Mutex::new(Some(borrowed)));
            Session::new(
                conn_hash.clone(),
                backend_url,
                config,
                BackendHandle::Xa(slot),
                Some(registry),
            )
        } else {
            let borrowed = self
                .pools
                .borrow_standard(&conn_hash, &backend_url, &config)
                .await?;
            Session::new(
                conn_hash.clone(),
                backend_url,
                config,
                BackendHandle::Standard(Some(borrowed)),
                None,
            )
        };

        let uuid = session.uuid;
        self.sessions.insert(uuid, Arc::new(Mutex::new(session)));
        tracing::info!(session = %uuid, conn_hash = %conn_hash, xa = is_xa, "session created");
        Ok(uuid)
    }

    /// Look up a live session.
    pub fn session(&self, uuid: Uuid) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .get(&uuid)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| OjpError::SessionNotFound(uuid.to_string()))
    }

    /// Destroy a session: release owned resources in reverse creation
    /// order, then return the backend to its pool unless a live branch
    /// still pins it.
    pub async fn destroy_session(&self, uuid: Uuid, backend_healthy: bool) -> Result<()> {
        let (_, session_arc) = self
            .sessions
            .remove(&uuid)
            .ok_or_else(|| OjpError::SessionNotFound(uuid.to_string()))?;
        let mut session = session_arc.lock().await;
        let conn_hash = session.conn_hash.clone();
        let backend = session.close_resources().await;

        match backend {
            BackendHandle::Standard(Some(borrowed)) => {
                self.pools
                    .release_standard(&conn_hash, borrowed, backend_healthy)
                    .await;
            }
            BackendHandle::Standard(None) => {}
            BackendHandle::Xa(slot) => {
                if let Some(registry) = self.registries.get(&conn_hash) {
                    let pinned = registry.mark_slot_orphaned(&slot).await;
                    if pinned > 0 {
                        tracing::info!(session = %uuid, pinned, "backend session stays pinned to live XA branches");
                        return Ok(());
                    }
                }
                let taken = { slot.lock().await.take() };
                if let Some(borrowed) = taken {
                    self.pools.release_xa(&conn_hash, borrowed, backend_healthy).await;
                }
            }
        }
        tracing::info!(session = %uuid, "session destroyed");
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn registries(&self) -> &Arc<XaRegistries> {
        &self.registries
    }

    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    /// Resolve a raw URL the way session creation would, without creating
    /// anything. Exposed for diagnostics.
    pub fn resolve_url(&self, url: &str) -> Result<String> {
        resolve_backend_url(url, &self.process_props)
    }

    /// Substitute placeholders in an arbitrary string from the process
    /// property set.
    pub fn substitute(&self, input: &str) -> Result<String> {
        substitute_with(input, &self.process_props)
    }

    /// Destroy every session and close every pool.
    pub async fn shutdown(&self) {
        let uuids: Vec<Uuid> = self.sessions.iter().map(|e| *e.key()).collect();
        for uuid in uuids {
            if let Err(e) = self.destroy_session(uuid, true).await {
                tracing::debug!(session = %uuid, error = %e, "session already gone at shutdown");
            }
        }
        self.pools.shutdown_all().await;
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::DriverRegistry;
    use crate::backend::memory::MemDatabase;
    use crate::config::properties::parse_properties;
    use crate::pool::manager::BreakerSettings;
    use crate::provider::ProviderRegistry;

    fn build_manager(process_props: Properties, idle_timeout: Duration) -> Arc<SessionManager> {
        let pools = Arc::new(PoolManager::new(
            Arc::new(ProviderRegistry::with_embedded()),
            Arc::new(DriverRegistry::with_embedded()),
            BreakerSettings::default(),
            None,
        ));
        SessionManager::new(
            pools,
            Arc::new(ConfigResolver::new()),
            Arc::new(XaRegistries::new()),
            process_props,
            idle_timeout,
        )
    }

    fn connect(url: &str) -> ConnectRequest {
        ConnectRequest {
            url: url.to_string(),
            ..ConnectRequest::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_destroy_releases_backend() {
        MemDatabase::reset("sm_basic");
        let manager = build_manager(Properties::new(), Duration::from_secs(60));

        let uuid = manager
            .create_session(connect("jdbc:ojp[localhost:1059]_mem:sm_basic"))
            .await
            .unwrap();
        assert_eq!(manager.session_count(), 1);
        assert_eq!(MemDatabase::open_connections("sm_basic"), 1);

        {
            let session = manager.session(uuid).unwrap();
            let mut session = session.lock().await;
            let result = session.execute_query("SELECT 1", &[]).await.unwrap();
            assert_eq!(result.rows[0][0], crate::backend::value::SqlValue::Int(1));
        }

        manager.destroy_session(uuid, true).await.unwrap();
        assert_eq!(manager.session_count(), 0);
        // Backend went back to the pool, not closed.
        let pool_metrics = manager.pools().metrics();
        assert_eq!(pool_metrics.len(), 1);
        assert_eq!(pool_metrics[0].1.active, 0);
        assert_eq!(pool_metrics[0].1.idle, 1);
    }

    #[tokio::test]
    async fn test_unknown_session_lookup_fails() {
        let manager = build_manager(Properties::new(), Duration::from_secs(60));
        assert!(matches!(
            manager.session(Uuid::new_v4()),
            Err(OjpError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_url_placeholder_resolution() {
        MemDatabase::reset("sm_placeholder");
        let props = parse_properties("backend.db=sm_placeholder");
        let manager = build_manager(props, Duration::from_secs(60));

        let uuid = manager
            .create_session(connect("jdbc:ojp[h:1059]_mem:${backend.db}"))
            .await
            .unwrap();
        let session = manager.session(uuid).unwrap();
        assert_eq!(session.lock().await.backend_url, "mem:sm_placeholder");
        manager.destroy_session(uuid, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_placeholder_fails_fast() {
        let manager = build_manager(Properties::new(), Duration::from_secs(60));
        let err = manager
            .create_session(connect("jdbc:ojp[h:1059]_mem:${no.such.key}"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no.such.key"));
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_xa_url_indicator_selects_xa_kind() {
        MemDatabase::reset("sm_xa");
        let manager = build_manager(Properties::new(), Duration::from_secs(60));
        let uuid = manager
            .create_session(connect("mem:sm_xa;xa=true"))
            .await
            .unwrap();
        let session = manager.session(uuid).unwrap();
        assert!(session.lock().await.is_xa);
        manager.destroy_session(uuid, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_session_evicted() {
        MemDatabase::reset("sm_idle");
        let manager = build_manager(Properties::new(), Duration::from_millis(100));
        let _uuid = manager
            .create_session(connect("mem:sm_idle"))
            .await
            .unwrap();
        assert_eq!(manager.session_count(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_shared_pool_across_sessions() {
        MemDatabase::reset("sm_shared");
        let manager = build_manager(Properties::new(), Duration::from_secs(60));

        let mut props = Properties::new();
        props.insert("maximumPoolSize".to_string(), "10".to_string());
        let request = ConnectRequest {
            url: "mem:sm_shared".to_string(),
            properties: props,
            ..ConnectRequest::default()
        };

        let a = manager.create_session(request.clone()).await.unwrap();
        let b = manager.create_session(request.clone()).await.unwrap();
        // Same effective configuration: one pool, two borrowed connections.
        assert_eq!(manager.pools().standard_pool_count(), 1);
        assert_eq!(MemDatabase::open_connections("sm_shared"), 2);

        manager.destroy_session(a, true).await.unwrap();
        manager.destroy_session(b, true).await.unwrap();
    }
}
