// # Action Handlers
//
// One singleton, stateless handler per request kind. Handlers reach all
// process state through the `ActionContext`; the dispatcher owns the
// request-kind table that routes to them.

pub mod connection;
pub mod lob;
pub mod statement;
pub mod transaction;
pub mod xa;

use crate::error::{OjpError, Result};
use crate::server::context::ActionContext;
use crate::server::protocol::{Request, RequestKind, Response};
use crate::session::session::Session;
use async_trait::async_trait;
use std::sync::Arc;

/// A request handler. Implementations hold no mutable state.
#[async_trait]
pub trait Action: Send + Sync {
    fn kind(&self) -> RequestKind;

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response>;
}

/// All embedded handlers, in dispatch-table registration order.
pub fn all_actions() -> Vec<Arc<dyn Action>> {
    vec![
        Arc::new(connection::ConnectAction),
        Arc::new(connection::CloseAction),
        Arc::new(connection::PingAction),
        Arc::new(statement::PrepareAction),
        Arc::new(statement::ExecuteAction),
        Arc::new(statement::ExecuteUpdateAction),
        Arc::new(statement::ExecuteQueryAction),
        Arc::new(statement::FetchAction),
        Arc::new(lob::CreateLobBeginAction),
        Arc::new(lob::LobChunkAction),
        Arc::new(lob::CreateLobEndAction),
        Arc::new(lob::ReadLobAction),
        Arc::new(transaction::CommitAction),
        Arc::new(transaction::RollbackAction),
        Arc::new(transaction::SetSavepointAction),
        Arc::new(transaction::ReleaseSavepointAction),
        Arc::new(transaction::RollbackToSavepointAction),
        Arc::new(xa::XaStartAction),
        Arc::new(xa::XaEndAction),
        Arc::new(xa::XaPrepareAction),
        Arc::new(xa::XaCommitAction),
        Arc::new(xa::XaRollbackAction),
        Arc::new(xa::XaForgetAction),
        Arc::new(xa::XaRecoverAction),
    ]
}

/// Record a backend connection fault on the session, so its backend is
/// evicted instead of returned when the session ends.
pub(crate) fn note_backend_fault(session: &mut Session, err: &OjpError) {
    if let OjpError::Backend(info) = err {
        if info.is_connection_fault() {
            tracing::warn!(session = %session.uuid, sql_state = %info.sql_state, "backend connection fault, marking backend for eviction");
            session.mark_backend_faulted();
        }
    }
}
