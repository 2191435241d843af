// # RPC Server
//
// TCP accept loop over the framed protocol. Each connection gets its own
// task that reads frames in order, dispatches them, and writes the
// responses back, which gives every client session in-order handling for
// free. Action bodies across all connections share a bounded worker
// budget. Sessions opened on a connection are destroyed when its
// transport goes away.

use crate::backend::driver::DriverRegistry;
use crate::cluster::affinity::{BranchDirectory, ClusterCoordinator};
use crate::cluster::balancer::RoundRobinStrategy;
use crate::config::datasource::ConfigResolver;
use crate::config::properties::Properties;
use crate::config::server::ServerConfig;
use crate::error::Result;
use crate::pool::manager::{BreakerSettings, PoolManager};
use crate::provider::ProviderRegistry;
use crate::server::context::ActionContext;
use crate::server::dispatcher::Dispatcher;
use crate::server::protocol::{read_frame, write_frame, Request, Response};
use crate::session::manager::SessionManager;
use crate::xa::registry::XaRegistries;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use uuid::Uuid;

pub struct OjpServer {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    workers: Arc<Semaphore>,
}

impl OjpServer {
    /// Wire the full runtime: driver and provider registries, pool
    /// manager, XA registries, session manager, cluster coordinator, and
    /// the dispatcher over them.
    pub fn build(config: ServerConfig, properties: Properties, node_id: impl Into<String>) -> Self {
        let drivers = Arc::new(DriverRegistry::with_embedded());
        let providers = Arc::new(ProviderRegistry::with_embedded());
        let pools = Arc::new(PoolManager::new(
            Arc::clone(&providers),
            Arc::clone(&drivers),
            BreakerSettings {
                threshold: config.circuit_breaker_threshold,
                open_timeout: config.circuit_breaker_timeout,
            },
            Some(config.connection_idle_timeout * 4),
        ));
        let resolver = Arc::new(ConfigResolver::new());
        let registries = Arc::new(XaRegistries::new());
        let sessions = SessionManager::new(
            Arc::clone(&pools),
            Arc::clone(&resolver),
            Arc::clone(&registries),
            properties,
            config.connection_idle_timeout,
        );
        let cluster = Arc::new(ClusterCoordinator::new(
            node_id,
            Box::new(RoundRobinStrategy::new()),
            Arc::clone(&registries),
            Arc::new(BranchDirectory::new()),
        ));

        let ctx = ActionContext {
            providers,
            drivers,
            resolver,
            pools,
            registries,
            sessions,
            cluster,
        };
        let workers = Arc::new(Semaphore::new(config.thread_pool_size.max(1)));
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new(ctx)),
            workers,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run startup initialization. Fails when no pool provider is usable,
    /// which the binary turns into a nonzero exit.
    pub async fn initialize(&self) -> Result<()> {
        self.dispatcher
            .initialize(self.config.libs_path.as_deref())
            .await
    }

    /// Bind the configured port and serve until the task is cancelled.
    pub async fn bind_and_run(&self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "OJP server listening");
        self.run(listener).await
    }

    /// Serve connections from an existing listener.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            tracing::debug!(peer = %peer, "client connected");
            let dispatcher = Arc::clone(&self.dispatcher);
            let workers = Arc::clone(&self.workers);
            let max_request = self.config.max_request_size;
            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(dispatcher, workers, socket, max_request).await
                {
                    tracing::debug!(peer = %peer, error = %e, "connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(
        dispatcher: Arc<Dispatcher>,
        workers: Arc<Semaphore>,
        mut socket: TcpStream,
        max_request: usize,
    ) -> Result<()> {
        // Sessions opened over this transport, for disconnect cleanup.
        let mut owned_sessions: Vec<Uuid> = Vec::new();
        let outcome = Self::serve_frames(
            &dispatcher,
            &workers,
            &mut socket,
            max_request,
            &mut owned_sessions,
        )
        .await;

        // Transport gone, cleanly or not: destroy whatever the client left.
        for uuid in owned_sessions {
            if let Err(e) = dispatcher
                .context()
                .sessions
                .destroy_session(uuid, true)
                .await
            {
                tracing::debug!(session = %uuid, error = %e, "session already gone at disconnect");
            }
        }
        outcome
    }

    async fn serve_frames(
        dispatcher: &Arc<Dispatcher>,
        workers: &Arc<Semaphore>,
        socket: &mut TcpStream,
        max_request: usize,
        owned_sessions: &mut Vec<Uuid>,
    ) -> Result<()> {
        loop {
            let request: Option<Request> = match read_frame(socket, max_request).await {
                Ok(frame) => frame,
                Err(e) => {
                    // Oversized or undecodable frame: answer with an error
                    // frame and drop the connection.
                    let response = Response::Error(e.to_sql_error());
                    let _ = write_frame(socket, &response).await;
                    return Ok(());
                }
            };
            let Some(request) = request else { return Ok(()) };

            let closed_session = match &request {
                Request::Close { session } => Some(session.uuid),
                _ => None,
            };

            let response = {
                let _permit = workers.acquire().await.map_err(|_| {
                    crate::error::OjpError::Internal("worker pool closed".to_string())
                })?;
                dispatcher.dispatch(request).await
            };

            if let Response::Connected { session } = &response {
                owned_sessions.push(session.uuid);
            }
            if let (Some(uuid), Response::Closed) = (closed_session, &response) {
                owned_sessions.retain(|s| *s != uuid);
            }

            write_frame(socket, &response).await?;
        }
    }

    /// Graceful shutdown: stop accepting sessions, destroy the remainder,
    /// close every pool.
    pub async fn shutdown(&self) {
        let ctx = self.dispatcher.context();
        ctx.cluster.drain();
        ctx.sessions.shutdown().await;
    }
}
