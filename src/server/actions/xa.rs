// # XA Actions
//
// Distributed-transaction verbs. Each action resolves the session's
// per-hash transaction registry and drives the branch state machine
// there; branch lifecycle changes are mirrored into the cluster's branch
// directory so other nodes redirect instead of splitting a branch.

use crate::error::{xa_code, OjpError, Result};
use crate::server::actions::Action;
use crate::server::context::ActionContext;
use crate::server::protocol::{Request, RequestKind, Response, SessionInfo};
use crate::xa::registry::XaTransactionRegistry;
use crate::xa::xid::flags;
use async_trait::async_trait;
use std::sync::Arc;

async fn xa_registry(
    ctx: &ActionContext,
    info: &SessionInfo,
) -> Result<Arc<XaTransactionRegistry>> {
    let session = ctx.sessions.session(info.uuid)?;
    let session = session.lock().await;
    session.xa_registry().cloned().ok_or_else(|| {
        OjpError::xa(
            xa_code::XAER_PROTO,
            "session was not opened for distributed transactions",
        )
    })
}

pub struct XaStartAction;

#[async_trait]
impl Action for XaStartAction {
    fn kind(&self) -> RequestKind {
        RequestKind::XaStart
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::XaStart {
            session: info,
            xid,
            flags: start_flags,
        } = request
        else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };

        let session_arc = ctx.sessions.session(info.uuid)?;
        let mut session = session_arc.lock().await;
        session.touch();
        let registry = session.xa_registry().cloned().ok_or_else(|| {
            OjpError::xa(
                xa_code::XAER_PROTO,
                "session was not opened for distributed transactions",
            )
        })?;

        if start_flags & (flags::TMJOIN | flags::TMRESUME) != 0 {
            registry.xa_start(&xid, start_flags, session.uuid).await?;
        } else {
            let slot = session.xa_slot()?;
            registry
                .register_existing_session(&xid, slot, start_flags, session.uuid)
                .await?;
        }
        session.set_active_xid(Some(xid.clone()));
        ctx.cluster.record_branch(&xid);
        Ok(Response::Ok)
    }
}

pub struct XaEndAction;

#[async_trait]
impl Action for XaEndAction {
    fn kind(&self) -> RequestKind {
        RequestKind::XaEnd
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::XaEnd {
            session: info,
            xid,
            flags: end_flags,
        } = request
        else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };

        let session_arc = ctx.sessions.session(info.uuid)?;
        let mut session = session_arc.lock().await;
        session.touch();
        let registry = session.xa_registry().cloned().ok_or_else(|| {
            OjpError::xa(
                xa_code::XAER_PROTO,
                "session was not opened for distributed transactions",
            )
        })?;

        registry.xa_end(&xid, end_flags).await?;
        if session.active_xid() == Some(&xid) {
            session.set_active_xid(None);
        }
        Ok(Response::Ok)
    }
}

pub struct XaPrepareAction;

#[async_trait]
impl Action for XaPrepareAction {
    fn kind(&self) -> RequestKind {
        RequestKind::XaPrepare
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::XaPrepare { session: info, xid } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let registry = xa_registry(ctx, &info).await?;
        let vote = registry.xa_prepare(&xid).await?;
        if !registry.contains(&xid) {
            // Read-only vote completed the branch.
            ctx.cluster.forget_branch(&xid);
        }
        Ok(Response::XaVote(vote))
    }
}

pub struct XaCommitAction;

#[async_trait]
impl Action for XaCommitAction {
    fn kind(&self) -> RequestKind {
        RequestKind::XaCommit
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::XaCommit {
            session: info,
            xid,
            one_phase,
        } = request
        else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let registry = xa_registry(ctx, &info).await?;
        registry.xa_commit(&xid, one_phase).await?;
        ctx.cluster.forget_branch(&xid);
        Ok(Response::Ok)
    }
}

pub struct XaRollbackAction;

#[async_trait]
impl Action for XaRollbackAction {
    fn kind(&self) -> RequestKind {
        RequestKind::XaRollback
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::XaRollback { session: info, xid } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let registry = xa_registry(ctx, &info).await?;
        registry.xa_rollback(&xid).await?;
        ctx.cluster.forget_branch(&xid);
        Ok(Response::Ok)
    }
}

pub struct XaForgetAction;

#[async_trait]
impl Action for XaForgetAction {
    fn kind(&self) -> RequestKind {
        RequestKind::XaForget
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::XaForget { session: info, xid } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let registry = xa_registry(ctx, &info).await?;
        registry.xa_forget(&xid).await?;
        ctx.cluster.forget_branch(&xid);
        Ok(Response::Ok)
    }
}

pub struct XaRecoverAction;

#[async_trait]
impl Action for XaRecoverAction {
    fn kind(&self) -> RequestKind {
        RequestKind::XaRecover
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::XaRecover {
            session: info,
            flags: recover_flags,
        } = request
        else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let registry = xa_registry(ctx, &info).await?;
        let xids = registry.xa_recover(recover_flags).await?;
        Ok(Response::XaRecovered(xids))
    }
}
