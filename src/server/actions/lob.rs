// # LOB Actions
//
// Upload is a client-to-server stream: a begin frame, any number of chunk
// frames, and an end frame answered by the single `LobCreated` response.
// Reads are plain request/response slices of a stored LOB.

use crate::error::{OjpError, Result};
use crate::server::actions::Action;
use crate::server::context::ActionContext;
use crate::server::protocol::{LobReference, Request, RequestKind, Response};
use async_trait::async_trait;

pub struct CreateLobBeginAction;

#[async_trait]
impl Action for CreateLobBeginAction {
    fn kind(&self) -> RequestKind {
        RequestKind::CreateLobBegin
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::CreateLobBegin { session: info } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        session.lock().await.begin_lob_upload()?;
        Ok(Response::Ok)
    }
}

pub struct LobChunkAction;

#[async_trait]
impl Action for LobChunkAction {
    fn kind(&self) -> RequestKind {
        RequestKind::LobChunk
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::LobChunk {
            session: info,
            data,
        } = request
        else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        session.lock().await.append_lob_chunk(&data)?;
        Ok(Response::Ok)
    }
}

pub struct CreateLobEndAction;

#[async_trait]
impl Action for CreateLobEndAction {
    fn kind(&self) -> RequestKind {
        RequestKind::CreateLobEnd
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::CreateLobEnd { session: info } = request else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        let (lob, size) = session.lock().await.finish_lob_upload()?;
        Ok(Response::LobCreated(LobReference {
            session: info.uuid,
            lob,
            size,
        }))
    }
}

pub struct ReadLobAction;

#[async_trait]
impl Action for ReadLobAction {
    fn kind(&self) -> RequestKind {
        RequestKind::ReadLob
    }

    async fn handle(&self, ctx: &ActionContext, request: Request) -> Result<Response> {
        let Request::ReadLob {
            session: info,
            lob,
            offset,
            length,
        } = request
        else {
            return Err(OjpError::Internal("misrouted request".to_string()));
        };
        let session = ctx.sessions.session(info.uuid)?;
        let mut session = session.lock().await;
        session.touch();
        let data = session.read_lob(lob, offset, length as usize)?;
        Ok(Response::LobData(data))
    }
}
