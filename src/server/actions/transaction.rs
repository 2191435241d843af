// # Local Transaction Actions
//
// Commit, rollback, and the savepoint verbs against the session's backend.

use crate::error::{OjpError, Result};
use crate::server::actions::{note_backend_fault, Action};
use crate::server::context::ActionContext;
use crate::server::protocol::{Request, RequestKind, Response};
use async_trait::async_trait;

pub struct CommitAction;

#[async_trait]
impl Action for CommitAction {
    fn kind(&self) -> RequestKind {
        RequestKind::Commit
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::Commit { session: info } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        let mut session = session.lock().await;
        match session.commit().await {
            Ok(()) => Ok(Response::Ok),
            Err(e) => {
                note_backend_fault(&mut session, &e);
                Err(e)
            }
        }
    }
}

pub struct RollbackAction;

#[async_trait]
impl Action for RollbackAction {
    fn kind(&self) -> RequestKind {
        RequestKind::Rollback
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::Rollback { session: info } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        let mut session = session.lock().await;
        match session.rollback().await {
            Ok(()) => Ok(Response::Ok),
            Err(e) => {
                note_backend_fault(&mut session, &e);
                Err(e)
            }
        }
    }
}

pub struct SetSavepointAction;

#[async_trait]
impl Action for SetSavepointAction {
    fn kind(&self) -> RequestKind {
        RequestKind::SetSavepoint
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::SetSavepoint { session: info, name } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        session.lock().await.set_savepoint(&name).await?;
        Ok(Response::Ok)
    }
}

pub struct ReleaseSavepointAction;

#[async_trait]
impl Action for ReleaseSavepointAction {
    fn kind(&self) -> RequestKind {
        RequestKind::ReleaseSavepoint
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::ReleaseSavepoint { session: info, name } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        session.lock().await.release_savepoint(&name).await?;
        Ok(Response::Ok)
    }
}

pub struct RollbackToSavepointAction;

#[async_trait]
impl Action for RollbackToSavepointAction {
    fn kind(&self) -> RequestKind {
        RequestKind::RollbackToSavepoint
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::RollbackToSavepoint { session: info, name } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        session.lock().await.rollback_to_savepoint(&name).await?;
        Ok(Response::Ok)
    }
}
