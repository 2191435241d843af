// # Client Session
//
// A client-visible handle over one borrowed backend object. The session
// tracks every resource the client opens (statements, result sets, LOBs,
// savepoints) in creation order so destruction can release them in
// reverse. While the session participates in an XA branch, statement
// traffic is routed to the branch's pinned backend session instead of the
// session's own backend.

use crate::backend::driver::BackendConnection;
use crate::backend::value::{ExecuteOutcome, QueryResult, Row, SqlValue};
use crate::backend::ConnHash;
use crate::config::datasource::DataSourceConfiguration;
use crate::error::{OjpError, Result};
use crate::pool::pool::Borrowed;
use crate::xa::registry::{XaSlot, XaTransactionRegistry};
use crate::xa::xid::XidKey;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Owned backend of a session.
pub enum BackendHandle {
    Standard(Option<Borrowed<Box<dyn BackendConnection>>>),
    /// XA sessions share their backend through a slot so the transaction
    /// registry can pin it to a branch without taking it away.
    Xa(Arc<XaSlot>),
}

/// Server-held prepared statement.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub sql: String,
}

/// Server-held open result set, paged out to the client via fetch.
pub struct OpenResultSet {
    pub columns: Vec<String>,
    rows: VecDeque<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Statement,
    ResultSet,
    Lob,
    Savepoint,
}

pub struct Session {
    pub uuid: Uuid,
    pub conn_hash: ConnHash,
    pub backend_url: String,
    pub config: Arc<DataSourceConfiguration>,
    pub is_xa: bool,
    backend: BackendHandle,
    xa_registry: Option<Arc<XaTransactionRegistry>>,
    /// Branch this session's statement traffic is currently routed into.
    active_xid: Option<XidKey>,
    statements: HashMap<Uuid, PreparedStatement>,
    result_sets: HashMap<Uuid, OpenResultSet>,
    lobs: HashMap<Uuid, Vec<u8>>,
    savepoints: Vec<String>,
    /// Creation-ordered resource log, replayed in reverse on destruction.
    resource_log: Vec<(ResourceKind, Uuid, String)>,
    /// Buffer of an in-flight LOB upload stream.
    pending_lob: Option<Vec<u8>>,
    /// Set when the backend reported a connection fault; the backend is
    /// then evicted instead of returned on release.
    backend_faulted: bool,
    last_activity: Instant,
}

enum BackendOp<'a> {
    Query(&'a str, &'a [SqlValue]),
    Update(&'a str, &'a [SqlValue]),
    Execute(&'a str, &'a [SqlValue]),
    Commit,
    Rollback,
    SetSavepoint(&'a str),
    ReleaseSavepoint(&'a str),
    RollbackToSavepoint(&'a str),
}

enum OpOutcome {
    Rows(QueryResult),
    Count(u64),
    Either(ExecuteOutcome),
    Unit,
}

async fn apply(conn: &mut dyn BackendConnection, op: BackendOp<'_>) -> Result<OpOutcome> {
    match op {
        BackendOp::Query(sql, params) => conn.execute_query(sql, params).await.map(OpOutcome::Rows),
        BackendOp::Update(sql, params) => {
            conn.execute_update(sql, params).await.map(OpOutcome::Count)
        }
        BackendOp::Execute(sql, params) => conn.execute(sql, params).await.map(OpOutcome::Either),
        BackendOp::Commit => conn.commit().await.map(|_| OpOutcome::Unit),
        BackendOp::Rollback => conn.rollback().await.map(|_| OpOutcome::Unit),
        BackendOp::SetSavepoint(name) => conn.set_savepoint(name).await.map(|_| OpOutcome::Unit),
        BackendOp::ReleaseSavepoint(name) => {
            conn.release_savepoint(name).await.map(|_| OpOutcome::Unit)
        }
        BackendOp::RollbackToSavepoint(name) => {
            conn.rollback_to_savepoint(name).await.map(|_| OpOutcome::Unit)
        }
    }
}

impl Session {
    pub fn new(
        conn_hash: ConnHash,
        backend_url: String,
        config: Arc<DataSourceConfiguration>,
        backend: BackendHandle,
        xa_registry: Option<Arc<XaTransactionRegistry>>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            conn_hash,
            backend_url,
            config,
            is_xa: matches!(backend, BackendHandle::Xa(_)),
            backend,
            xa_registry,
            active_xid: None,
            statements: HashMap::new(),
            result_sets: HashMap::new(),
            lobs: HashMap::new(),
            savepoints: Vec::new(),
            resource_log: Vec::new(),
            pending_lob: None,
            backend_faulted: false,
            last_activity: Instant::now(),
        }
    }

    pub fn mark_backend_faulted(&mut self) {
        self.backend_faulted = true;
    }

    pub fn backend_faulted(&self) -> bool {
        self.backend_faulted
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    pub fn xa_registry(&self) -> Option<&Arc<XaTransactionRegistry>> {
        self.xa_registry.as_ref()
    }

    /// Shared backend slot of an XA session.
    pub fn xa_slot(&self) -> Result<Arc<XaSlot>> {
        match &self.backend {
            BackendHandle::Xa(slot) => Ok(Arc::clone(slot)),
            BackendHandle::Standard(_) => Err(OjpError::InvalidState(
                "session is not XA-capable".to_string(),
            )),
        }
    }

    pub fn active_xid(&self) -> Option<&XidKey> {
        self.active_xid.as_ref()
    }

    pub fn set_active_xid(&mut self, xid: Option<XidKey>) {
        self.active_xid = xid;
    }

    /// Run one backend operation, routing into the pinned branch session
    /// when this session is inside an XA branch.
    async fn run(&mut self, op: BackendOp<'_>) -> Result<OpOutcome> {
        self.touch();
        if let Some(xid) = self.active_xid.clone() {
            let registry = self.xa_registry.as_ref().ok_or_else(|| {
                OjpError::Internal("XA branch active without a registry".to_string())
            })?;
            let slot = registry.pinned_slot(&xid)?;
            let mut guard = slot.lock().await;
            let session = guard.as_mut().ok_or_else(|| {
                OjpError::InvalidState("pinned backend session missing".to_string())
            })?;
            return apply(session.connection(), op).await;
        }

        match &mut self.backend {
            BackendHandle::Standard(Some(borrowed)) => apply(&mut ***borrowed, op).await,
            BackendHandle::Standard(None) => Err(OjpError::InvalidState(
                "session backend already released".to_string(),
            )),
            BackendHandle::Xa(slot) => {
                let mut guard = slot.lock().await;
                let session = guard.as_mut().ok_or_else(|| {
                    OjpError::InvalidState("backend session not in slot".to_string())
                })?;
                apply(session.connection(), op).await
            }
        }
    }

    pub async fn execute_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        match self.run(BackendOp::Query(sql, params)).await? {
            OpOutcome::Rows(result) => Ok(result),
            _ => Err(OjpError::Internal("query produced no rows".to_string())),
        }
    }

    pub async fn execute_update(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        match self.run(BackendOp::Update(sql, params)).await? {
            OpOutcome::Count(count) => Ok(count),
            _ => Err(OjpError::Internal("update produced no count".to_string())),
        }
    }

    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecuteOutcome> {
        match self.run(BackendOp::Execute(sql, params)).await? {
            OpOutcome::Either(outcome) => Ok(outcome),
            _ => Err(OjpError::Internal("execute produced no outcome".to_string())),
        }
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.run(BackendOp::Commit).await.map(|_| ())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.run(BackendOp::Rollback).await.map(|_| ())
    }

    pub async fn set_savepoint(&mut self, name: &str) -> Result<()> {
        self.run(BackendOp::SetSavepoint(name)).await?;
        self.savepoints.push(name.to_string());
        self.resource_log
            .push((ResourceKind::Savepoint, Uuid::new_v4(), name.to_string()));
        Ok(())
    }

    pub async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.run(BackendOp::ReleaseSavepoint(name)).await?;
        self.savepoints.retain(|s| s != name);
        Ok(())
    }

    pub async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.run(BackendOp::RollbackToSavepoint(name)).await.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Server-held resources
    // ------------------------------------------------------------------

    pub fn prepare_statement(&mut self, sql: String) -> Uuid {
        let id = Uuid::new_v4();
        self.statements.insert(id, PreparedStatement { sql });
        self.resource_log
            .push((ResourceKind::Statement, id, String::new()));
        id
    }

    pub fn statement_sql(&self, id: Uuid) -> Result<String> {
        self.statements
            .get(&id)
            .map(|s| s.sql.clone())
            .ok_or_else(|| OjpError::NotFound(format!("statement {}", id)))
    }

    pub fn open_result_set(&mut self, result: QueryResult) -> (Uuid, Vec<String>) {
        let id = Uuid::new_v4();
        let columns = result.columns.clone();
        self.result_sets.insert(
            id,
            OpenResultSet {
                columns: result.columns,
                rows: result.rows.into(),
            },
        );
        self.resource_log
            .push((ResourceKind::ResultSet, id, String::new()));
        (id, columns)
    }

    /// Next page of an open result set. The set closes itself once drained.
    pub fn fetch(&mut self, id: Uuid, max_rows: usize) -> Result<(Vec<Row>, bool)> {
        let rs = self
            .result_sets
            .get_mut(&id)
            .ok_or_else(|| OjpError::NotFound(format!("result set {}", id)))?;
        let take = max_rows.max(1).min(rs.rows.len());
        let page: Vec<Row> = rs.rows.drain(..take).collect();
        let done = rs.rows.is_empty();
        if done {
            self.result_sets.remove(&id);
        }
        Ok((page, done))
    }

    pub fn close_result_set(&mut self, id: Uuid) {
        self.result_sets.remove(&id);
    }

    /// Open a LOB upload stream. Only one stream may be active per session.
    pub fn begin_lob_upload(&mut self) -> Result<()> {
        if self.pending_lob.is_some() {
            return Err(OjpError::InvalidState(
                "a LOB upload is already in progress".to_string(),
            ));
        }
        self.pending_lob = Some(Vec::new());
        self.touch();
        Ok(())
    }

    pub fn append_lob_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.touch();
        match self.pending_lob.as_mut() {
            Some(buffer) => {
                buffer.extend_from_slice(data);
                Ok(())
            }
            None => Err(OjpError::InvalidState(
                "no LOB upload in progress".to_string(),
            )),
        }
    }

    /// Terminal signal of the upload stream: materialize the LOB.
    pub fn finish_lob_upload(&mut self) -> Result<(Uuid, u64)> {
        let data = self.pending_lob.take().ok_or_else(|| {
            OjpError::InvalidState("no LOB upload in progress".to_string())
        })?;
        let size = data.len() as u64;
        Ok((self.create_lob(data), size))
    }

    pub fn create_lob(&mut self, data: Vec<u8>) -> Uuid {
        let id = Uuid::new_v4();
        self.lobs.insert(id, data);
        self.resource_log.push((ResourceKind::Lob, id, String::new()));
        id
    }

    pub fn read_lob(&self, id: Uuid, offset: u64, length: usize) -> Result<Vec<u8>> {
        let lob = self
            .lobs
            .get(&id)
            .ok_or_else(|| OjpError::NotFound(format!("lob {}", id)))?;
        let start = (offset as usize).min(lob.len());
        let end = start.saturating_add(length).min(lob.len());
        Ok(lob[start..end].to_vec())
    }

    pub fn lob_size(&self, id: Uuid) -> Result<u64> {
        self.lobs
            .get(&id)
            .map(|l| l.len() as u64)
            .ok_or_else(|| OjpError::NotFound(format!("lob {}", id)))
    }

    pub fn open_resource_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.statements.len(),
            self.result_sets.len(),
            self.lobs.len(),
            self.savepoints.len(),
        )
    }

    /// Release all owned resources in reverse creation order, then hand the
    /// backend back to the caller for pool release. Savepoint release is
    /// best-effort; the backend may already be unusable.
    pub async fn close_resources(&mut self) -> BackendHandle {
        let log = std::mem::take(&mut self.resource_log);
        for (kind, id, name) in log.into_iter().rev() {
            match kind {
                ResourceKind::Savepoint => {
                    if self.savepoints.contains(&name) {
                        if let Err(e) = self.run(BackendOp::ReleaseSavepoint(&name)).await {
                            tracing::debug!(session = %self.uuid, savepoint = %name, error = %e, "savepoint release failed during session teardown");
                        }
                        self.savepoints.retain(|s| s != &name);
                    }
                }
                ResourceKind::Lob => {
                    self.lobs.remove(&id);
                }
                ResourceKind::ResultSet => {
                    self.result_sets.remove(&id);
                }
                ResourceKind::Statement => {
                    self.statements.remove(&id);
                }
            }
        }
        std::mem::replace(&mut self.backend, BackendHandle::Standard(None))
    }
}
