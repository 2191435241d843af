// # Wire Protocol
//
// Length-prefixed frames carrying bincode-encoded request and response
// messages. Every request after `connect` names its session; errors travel
// as a terminal `Error` frame with the structured SQL error record; LOB
// upload is a client-side stream of chunk frames closed by an end frame;
// result sets page server-to-client through repeated `fetch` calls.

use crate::backend::value::{Row, SqlValue};
use crate::config::properties::Properties;
use crate::error::{OjpError, Result, SqlErrorInfo};
use crate::xa::xid::XidKey;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Frame length prefix is a 4-byte big-endian count of payload bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Client-visible session identity carried on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub uuid: Uuid,
    pub conn_hash: Option<String>,
}

impl SessionInfo {
    pub fn new(uuid: Uuid, conn_hash: Option<String>) -> Self {
        Self { uuid, conn_hash }
    }
}

/// Reference to a server-held LOB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobReference {
    pub session: Uuid,
    pub lob: Uuid,
    pub size: u64,
}

/// Discriminant used to key the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Connect,
    Close,
    Prepare,
    Execute,
    ExecuteUpdate,
    ExecuteQuery,
    Fetch,
    CreateLobBegin,
    LobChunk,
    CreateLobEnd,
    ReadLob,
    Commit,
    Rollback,
    SetSavepoint,
    ReleaseSavepoint,
    RollbackToSavepoint,
    XaStart,
    XaEnd,
    XaPrepare,
    XaCommit,
    XaRollback,
    XaForget,
    XaRecover,
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Connect {
        url: String,
        user: String,
        properties: Properties,
        xa: bool,
    },
    Close {
        session: SessionInfo,
    },
    Prepare {
        session: SessionInfo,
        sql: String,
    },
    Execute {
        session: SessionInfo,
        sql: Option<String>,
        statement: Option<Uuid>,
        params: Vec<SqlValue>,
    },
    ExecuteUpdate {
        session: SessionInfo,
        sql: Option<String>,
        statement: Option<Uuid>,
        params: Vec<SqlValue>,
    },
    ExecuteQuery {
        session: SessionInfo,
        sql: Option<String>,
        statement: Option<Uuid>,
        params: Vec<SqlValue>,
    },
    Fetch {
        session: SessionInfo,
        result_set: Uuid,
        max_rows: u32,
    },
    /// Open a LOB upload stream on the session.
    CreateLobBegin {
        session: SessionInfo,
    },
    /// One chunk of the active upload stream.
    LobChunk {
        session: SessionInfo,
        data: Vec<u8>,
    },
    /// Terminal signal of the upload stream; answered by `LobCreated`.
    CreateLobEnd {
        session: SessionInfo,
    },
    ReadLob {
        session: SessionInfo,
        lob: Uuid,
        offset: u64,
        length: u32,
    },
    Commit {
        session: SessionInfo,
    },
    Rollback {
        session: SessionInfo,
    },
    SetSavepoint {
        session: SessionInfo,
        name: String,
    },
    ReleaseSavepoint {
        session: SessionInfo,
        name: String,
    },
    RollbackToSavepoint {
        session: SessionInfo,
        name: String,
    },
    XaStart {
        session: SessionInfo,
        xid: XidKey,
        flags: u32,
    },
    XaEnd {
        session: SessionInfo,
        xid: XidKey,
        flags: u32,
    },
    XaPrepare {
        session: SessionInfo,
        xid: XidKey,
    },
    XaCommit {
        session: SessionInfo,
        xid: XidKey,
        one_phase: bool,
    },
    XaRollback {
        session: SessionInfo,
        xid: XidKey,
    },
    XaForget {
        session: SessionInfo,
        xid: XidKey,
    },
    XaRecover {
        session: SessionInfo,
        flags: u32,
    },
    Ping,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Connect { .. } => RequestKind::Connect,
            Request::Close { .. } => RequestKind::Close,
            Request::Prepare { .. } => RequestKind::Prepare,
            Request::Execute { .. } => RequestKind::Execute,
            Request::ExecuteUpdate { .. } => RequestKind::ExecuteUpdate,
            Request::ExecuteQuery { .. } => RequestKind::ExecuteQuery,
            Request::Fetch { .. } => RequestKind::Fetch,
            Request::CreateLobBegin { .. } => RequestKind::CreateLobBegin,
            Request::LobChunk { .. } => RequestKind::LobChunk,
            Request::CreateLobEnd { .. } => RequestKind::CreateLobEnd,
            Request::ReadLob { .. } => RequestKind::ReadLob,
            Request::Commit { .. } => RequestKind::Commit,
            Request::Rollback { .. } => RequestKind::Rollback,
            Request::SetSavepoint { .. } => RequestKind::SetSavepoint,
            Request::ReleaseSavepoint { .. } => RequestKind::ReleaseSavepoint,
            Request::RollbackToSavepoint { .. } => RequestKind::RollbackToSavepoint,
            Request::XaStart { .. } => RequestKind::XaStart,
            Request::XaEnd { .. } => RequestKind::XaEnd,
            Request::XaPrepare { .. } => RequestKind::XaPrepare,
            Request::XaCommit { .. } => RequestKind::XaCommit,
            Request::XaRollback { .. } => RequestKind::XaRollback,
            Request::XaForget { .. } => RequestKind::XaForget,
            Request::XaRecover { .. } => RequestKind::XaRecover,
            Request::Ping => RequestKind::Ping,
        }
    }

    /// Session named by the request, when it names one.
    pub fn session(&self) -> Option<&SessionInfo> {
        match self {
            Request::Connect { .. } | Request::Ping => None,
            Request::Close { session }
            | Request::Prepare { session, .. }
            | Request::Execute { session, .. }
            | Request::ExecuteUpdate { session, .. }
            | Request::ExecuteQuery { session, .. }
            | Request::Fetch { session, .. }
            | Request::CreateLobBegin { session }
            | Request::LobChunk { session, .. }
            | Request::CreateLobEnd { session }
            | Request::ReadLob { session, .. }
            | Request::Commit { session }
            | Request::Rollback { session }
            | Request::SetSavepoint { session, .. }
            | Request::ReleaseSavepoint { session, .. }
            | Request::RollbackToSavepoint { session, .. }
            | Request::XaStart { session, .. }
            | Request::XaEnd { session, .. }
            | Request::XaPrepare { session, .. }
            | Request::XaCommit { session, .. }
            | Request::XaRollback { session, .. }
            | Request::XaForget { session, .. }
            | Request::XaRecover { session, .. } => Some(session),
        }
    }

    /// Branch named by the request, for XA stickiness routing.
    pub fn xid(&self) -> Option<&XidKey> {
        match self {
            Request::XaStart { xid, .. }
            | Request::XaEnd { xid, .. }
            | Request::XaPrepare { xid, .. }
            | Request::XaCommit { xid, .. }
            | Request::XaRollback { xid, .. }
            | Request::XaForget { xid, .. } => Some(xid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Connected {
        session: SessionInfo,
    },
    Closed,
    Prepared {
        statement: Uuid,
    },
    UpdateCount(u64),
    /// Opened result set; rows follow through `Fetch`.
    ResultSet {
        result_set: Uuid,
        columns: Vec<String>,
    },
    Page {
        rows: Vec<Row>,
        done: bool,
    },
    LobCreated(LobReference),
    LobData(Vec<u8>),
    XaVote(i32),
    XaRecovered(Vec<XidKey>),
    /// Routing hint: retry against this peer. Not an error.
    Redirect {
        peer: String,
    },
    Error(SqlErrorInfo),
    Ok,
    Pong,
}

/// Write one frame: length prefix plus bincode payload.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serde::encode_to_vec(message, bincode::config::standard())
        .map_err(|e| OjpError::Serialization(e.to_string()))?;
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, enforcing the configured size cap. `Ok(None)` signals a
/// clean peer close.
pub async fn read_frame<R, T>(reader: &mut R, max_size: usize) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > max_size {
        return Err(OjpError::Network(format!(
            "frame of {} bytes exceeds maximum {}",
            len, max_size
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let (message, _) = bincode::serde::decode_from_slice(&payload, bincode::config::standard())
        .map_err(|e| OjpError::Serialization(e.to_string()))?;
    Ok(Some(message))
}
