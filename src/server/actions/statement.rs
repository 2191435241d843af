// # Statement Actions
//
// Prepare, the three execute shapes, and result-set paging. SQL passes
// through to the backend verbatim; statements prepared earlier are
// referenced by their server-side id.

use crate::backend::value::ExecuteOutcome;
use crate::error::{OjpError, Result};
use crate::server::actions::{note_backend_fault, Action};
use crate::server::context::ActionContext;
use crate::server::protocol::{Request, RequestKind, Response};
use crate::session::session::Session;
use async_trait::async_trait;
use uuid::Uuid;

fn resolve_sql(session: &Session, sql: Option<String>, statement: Option<Uuid>) -> Result<String> {
    match (sql, statement) {
        (Some(sql), _) => Ok(sql),
        (None, Some(id)) => session.statement_sql(id),
        (None, None) => Err(OjpError::InvalidState(
            "request names neither SQL nor a prepared statement".to_string(),
        )),
    }
}

pub struct PrepareAction;

#[async_trait]
impl Action for PrepareAction {
    fn kind(&self) -> RequestKind {
        RequestKind::Prepare
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::Prepare { session: info, sql } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        let mut session = session.lock().await;
        session.touch();
        let statement = session.prepare_statement(sql);
        Ok(Response::Prepared { statement })
    }
}

pub struct ExecuteAction;

#[async_trait]
impl Action for ExecuteAction {
    fn kind(&self) -> RequestKind {
        RequestKind::Execute
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::Execute {
            session: info,
            sql,
            statement,
            params,
        } = request
        else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        let mut session = session.lock().await;
        let sql = resolve_sql(&session, sql, statement)?;
        match session.execute(&sql, &params).await {
            Ok(ExecuteOutcome::UpdateCount(count)) => Ok(Response::UpdateCount(count)),
            Ok(ExecuteOutcome::Rows(result)) => {
                let (result_set, columns) = session.open_result_set(result);
                Ok(Response::ResultSet { result_set, columns })
            }
            Err(e) => {
                note_backend_fault(&mut session, &e);
                Err(e)
            }
        }
    }
}

pub struct ExecuteUpdateAction;

#[async_trait]
impl Action for ExecuteUpdateAction {
    fn kind(&self) -> RequestKind {
        RequestKind::ExecuteUpdate
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::ExecuteUpdate {
            session: info,
            sql,
            statement,
            params,
        } = request
        else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        let mut session = session.lock().await;
        let sql = resolve_sql(&session, sql, statement)?;
        match session.execute_update(&sql, &params).await {
            Ok(count) => Ok(Response::UpdateCount(count)),
            Err(e) => {
                note_backend_fault(&mut session, &e);
                Err(e)
            }
        }
    }
}

pub struct ExecuteQueryAction;

#[async_trait]
impl Action for ExecuteQueryAction {
    fn kind(&self) -> RequestKind {
        RequestKind::ExecuteQuery
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::ExecuteQuery {
            session: info,
            sql,
            statement,
            params,
        } = request
        else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        let mut session = session.lock().await;
        let sql = resolve_sql(&session, sql, statement)?;
        match session.execute_query(&sql, &params).await {
            Ok(result) => {
                let (result_set, columns) = session.open_result_set(result);
                Ok(Response::ResultSet { result_set, columns })
            }
            Err(e) => {
                note_backend_fault(&mut session, &e);
                Err(e)
            }
        }
    }
}

pub struct FetchAction;

#[async_trait]
impl Action for FetchAction {
    fn kind(&self) -> RequestKind {
        RequestKind::Fetch
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::Fetch {
            session: info,
            result_set,
            max_rows,
        } = request
        else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        let mut session = session.lock().await;
        session.touch();
        let (rows, done) = session.fetch(result_set, max_rows as usize)?;
        Ok(Response::Page { rows, done })
    }
}
