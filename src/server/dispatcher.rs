// # Action Dispatcher
//
// Routes each request to its singleton handler through a request-kind
// table. Before any handler runs, the cluster coordinator gets a say:
// connects may be redirected per balancing policy, and operations naming
// an XA branch hosted elsewhere are answered with a redirect hint instead
// of being executed. Every error becomes a protocol error frame carrying
// the structured SQL error record; nothing a handler does can take the
// process down.

use crate::cluster::affinity::RoutingDecision;
use crate::error::{OjpError, Result};
use crate::provider::ProviderKind;
use crate::server::actions::{all_actions, Action};
use crate::server::context::ActionContext;
use crate::server::protocol::{Request, RequestKind, Response};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Dispatcher {
    ctx: ActionContext,
    table: HashMap<RequestKind, Arc<dyn Action>>,
}

impl Dispatcher {
    pub fn new(ctx: ActionContext) -> Self {
        let mut table: HashMap<RequestKind, Arc<dyn Action>> = HashMap::new();
        for action in all_actions() {
            let kind = action.kind();
            if table.insert(kind, action).is_some() {
                tracing::warn!(?kind, "duplicate action registration, keeping the last");
            }
        }
        Self { ctx, table }
    }

    pub fn context(&self) -> &ActionContext {
        &self.ctx
    }

    /// Startup-only initialization: discover extension providers and warm
    /// the provider selection per kind. A missing provider is fatal.
    pub async fn initialize(&self, libs_path: Option<&std::path::Path>) -> Result<()> {
        self.ctx.providers.discover(libs_path);
        let standard = self.ctx.providers.provider_for(ProviderKind::Standard)?;
        let xa = self.ctx.providers.provider_for(ProviderKind::Xa)?;
        tracing::info!(
            standard = %standard.descriptor().name,
            xa = %xa.descriptor().name,
            "pool providers selected"
        );
        Ok(())
    }

    async fn route(&self, request: &Request) -> Result<RoutingDecision> {
        if let Request::Connect { xa, .. } = request {
            return self.ctx.cluster.on_session_request(*xa).await;
        }
        if let Some(xid) = request.xid() {
            return Ok(self.ctx.cluster.on_branch_request(xid));
        }
        if let Some(info) = request.session() {
            return Ok(self.ctx.cluster.on_session_operation(info.uuid).await);
        }
        Ok(RoutingDecision::Local)
    }

    /// Handle one request to completion. Never panics and never returns a
    /// transport-level error; every failure is an error frame.
    pub async fn dispatch(&self, request: Request) -> Response {
        match self.route(&request).await {
            Ok(RoutingDecision::Local) => {}
            Ok(RoutingDecision::Redirect(peer)) => {
                return Response::Redirect {
                    peer: peer.endpoint(),
                }
            }
            Err(e) => return self.error_frame(e),
        }

        let kind = request.kind();
        let Some(action) = self.table.get(&kind) else {
            return self.error_frame(OjpError::Internal(format!(
                "no handler registered for {:?}",
                kind
            )));
        };
        match action.handle(&self.ctx, request).await {
            Ok(response) => response,
            Err(e) => self.error_frame(e),
        }
    }

    fn error_frame(&self, err: OjpError) -> Response {
        match &err {
            OjpError::Internal(_) | OjpError::Io(_) | OjpError::Serialization(_) => {
                tracing::error!(error = %err, "internal error while handling request");
            }
            other => {
                tracing::debug!(error = %other, "request failed");
            }
        }
        Response::Error(err.to_sql_error())
    }
}
