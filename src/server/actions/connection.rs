// # Connection Actions
//
// Session open and close, plus the liveness ping.

use crate::error::{OjpError, Result};
use crate::server::actions::Action;
use crate::server::context::ActionContext;
use crate::server::protocol::{Request, RequestKind, Response, SessionInfo};
use crate::session::manager::ConnectRequest;
use async_trait::async_trait;

pub struct ConnectAction;

#[async_trait]
impl Action for ConnectAction {
    fn kind(&self) -> RequestKind {
        RequestKind::Connect
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::Connect {
            url,
            user,
            properties,
            xa,
        } = request
        else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };

        let uuid = ctx
            .sessions
            .create_session(ConnectRequest {
                url,
                user,
                properties,
                xa,
            })
            .await?;
        let conn_hash = {
            let session = ctx.sessions.session(uuid)?;
            let session = session.lock().await;
            session.conn_hash.to_string()
        };
        Ok(Response::Connected {
            session: SessionInfo::new(uuid, Some(conn_hash)),
        })
    }
}

pub struct CloseAction;

#[async_trait]
impl Action for CloseAction {
    fn kind(&self) -> RequestKind {
        RequestKind::Close
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::Close { session: info } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let healthy = {
            let session = ctx.sessions.session(info.uuid)?;
            let session = session.lock().await;
            !session.backend_faulted()
        };
        ctx.sessions.destroy_session(info.uuid, healthy).await?;
        Ok(Response::Closed)
    }
}

pub struct PingAction;

#[async_trait]
impl Action for PingAction {
    fn kind(&self) -> RequestKind {
        RequestKind::Ping
    }

    async fn handle(&self, _ctx: &ActionContext, _request: Request) -> Result<Response> {
        Ok(Response::Pong)
    }
}
