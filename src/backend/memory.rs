// # In-Memory Backend Driver
//
// Embedded driver family for the `mem:` / `h2:mem:` schemes. Databases are
// named and process-shared, so every connection to `mem:test` sees the same
// tables and the open-connection gauge observed by tests reflects real
// physical connection counts. The dialect is the small subset the proxy's
// own traffic needs; everything else is rejected with a syntax error.
//
// Writes buffer in the connection and apply on commit, which gives the
// driver honest transaction, savepoint, and XA prepare/commit semantics.

use crate::backend::driver::{BackendConnection, BackendDriver, XaConnection, XaDriver};
use crate::backend::value::{ExecuteOutcome, QueryResult, Row, SqlValue};
use crate::config::properties::Properties;
use crate::error::{xa_code, OjpError, Result};
use crate::xa::xid::XidKey;
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

static DATABASES: Lazy<DashMap<String, Arc<MemDatabase>>> = Lazy::new(DashMap::new);

/// Named shared in-memory database.
pub struct MemDatabase {
    tables: RwLock<HashMap<String, Table>>,
    /// Branches prepared but not yet committed, for `xa_recover`.
    prepared: Mutex<HashMap<XidKey, Vec<WriteOp>>>,
    open_connections: AtomicUsize,
    total_opened: AtomicU64,
    peak_connections: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Clone)]
enum WriteOp {
    CreateTable { name: String, columns: Vec<String> },
    DropTable { name: String },
    Insert { table: String, row: Row },
    DeleteAll { table: String },
}

impl MemDatabase {
    /// Fetch or create the database with this name.
    pub fn named(name: &str) -> Arc<MemDatabase> {
        DATABASES
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MemDatabase {
                    tables: RwLock::new(HashMap::new()),
                    prepared: Mutex::new(HashMap::new()),
                    open_connections: AtomicUsize::new(0),
                    total_opened: AtomicU64::new(0),
                    peak_connections: AtomicUsize::new(0),
                })
            })
            .value()
            .clone()
    }

    /// Drop all state for a named database (test isolation).
    pub fn reset(name: &str) {
        DATABASES.remove(name);
    }

    /// Currently open physical connections.
    pub fn open_connections(name: &str) -> usize {
        DATABASES
            .get(name)
            .map(|db| db.open_connections.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Physical connections opened over the database lifetime.
    pub fn total_opened(name: &str) -> u64 {
        DATABASES
            .get(name)
            .map(|db| db.total_opened.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// High-water mark of concurrently open physical connections.
    pub fn peak_connections(name: &str) -> usize {
        DATABASES
            .get(name)
            .map(|db| db.peak_connections.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn connect(self: &Arc<Self>) -> MemConnection {
        let open = self.open_connections.fetch_add(1, Ordering::SeqCst) + 1;
        self.total_opened.fetch_add(1, Ordering::SeqCst);
        self.peak_connections.fetch_max(open, Ordering::SeqCst);
        MemConnection {
            db: Arc::clone(self),
            pending: Vec::new(),
            savepoints: Vec::new(),
            closed: false,
        }
    }

    fn apply(&self, ops: &[WriteOp]) {
        let mut tables = self.tables.write();
        for op in ops {
            match op {
                WriteOp::CreateTable { name, columns } => {
                    tables.entry(name.clone()).or_insert_with(|| Table {
                        columns: columns.clone(),
                        rows: Vec::new(),
                    });
                }
                WriteOp::DropTable { name } => {
                    tables.remove(name);
                }
                WriteOp::Insert { table, row } => {
                    if let Some(t) = tables.get_mut(table) {
                        t.rows.push(row.clone());
                    }
                }
                WriteOp::DeleteAll { table } => {
                    if let Some(t) = tables.get_mut(table) {
                        t.rows.clear();
                    }
                }
            }
        }
    }

    /// Committed table state with a pending-op overlay applied.
    fn read_table(&self, name: &str, pending: &[WriteOp]) -> Option<Table> {
        let mut table = self.tables.read().get(name).cloned();
        for op in pending {
            match op {
                WriteOp::CreateTable { name: n, columns } if n == name && table.is_none() => {
                    table = Some(Table {
                        columns: columns.clone(),
                        rows: Vec::new(),
                    });
                }
                WriteOp::DropTable { name: n } if n == name => table = None,
                WriteOp::Insert { table: t, row } if t == name => {
                    if let Some(ref mut tbl) = table {
                        tbl.rows.push(row.clone());
                    }
                }
                WriteOp::DeleteAll { table: t } if t == name => {
                    if let Some(ref mut tbl) = table {
                        tbl.rows.clear();
                    }
                }
                _ => {}
            }
        }
        table
    }
}

fn syntax_error(sql: &str) -> OjpError {
    OjpError::backend(0, "42000", format!("unsupported statement: {}", sql))
}

fn parse_value(token: &str) -> SqlValue {
    let token = token.trim();
    if token.eq_ignore_ascii_case("null") {
        SqlValue::Null
    } else if let Some(stripped) = token.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        SqlValue::Text(stripped.to_string())
    } else if let Ok(i) = token.parse::<i64>() {
        SqlValue::Int(i)
    } else if let Ok(f) = token.parse::<f64>() {
        SqlValue::Double(f)
    } else if token.eq_ignore_ascii_case("true") || token.eq_ignore_ascii_case("false") {
        SqlValue::Bool(token.eq_ignore_ascii_case("true"))
    } else {
        SqlValue::Text(token.to_string())
    }
}

/// Substitute positional `?` markers with parameter values.
fn bind_params(sql: &str, params: &[SqlValue]) -> Result<String> {
    if params.is_empty() {
        return Ok(sql.to_string());
    }
    let mut out = String::with_capacity(sql.len());
    let mut next = 0usize;
    for ch in sql.chars() {
        if ch == '?' {
            let value = params.get(next).ok_or_else(|| {
                OjpError::backend(0, "07001", "too few parameters bound")
            })?;
            match value {
                SqlValue::Text(s) => {
                    out.push('\'');
                    out.push_str(s);
                    out.push('\'');
                }
                other => out.push_str(&other.to_string()),
            }
            next += 1;
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

/// Standard connection over a named in-memory database.
pub struct MemConnection {
    db: Arc<MemDatabase>,
    pending: Vec<WriteOp>,
    /// `(name, pending length at creation)`, stack-ordered.
    savepoints: Vec<(String, usize)>,
    closed: bool,
}

impl MemConnection {
    fn run(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecuteOutcome> {
        if self.closed {
            return Err(OjpError::backend(0, "08003", "connection is closed"));
        }
        let sql = bind_params(sql.trim().trim_end_matches(';'), params)?;
        let upper = sql.to_ascii_uppercase();

        if let Some(rest) = upper.strip_prefix("SELECT ") {
            let rest_orig = sql["SELECT ".len()..].trim();
            let rest = rest.trim();

            if let Some(table_part) = rest.strip_prefix("COUNT(*) FROM ") {
                let name = table_part.trim().to_ascii_lowercase();
                let count = self
                    .db
                    .read_table(&name, &self.pending)
                    .map(|t| t.rows.len())
                    .ok_or_else(|| table_not_found(&name))?;
                return Ok(ExecuteOutcome::Rows(QueryResult::single(
                    "count",
                    SqlValue::Int(count as i64),
                )));
            }

            if let Some(table_part) = rest.strip_prefix("* FROM ") {
                let name = table_part.trim().to_ascii_lowercase();
                let table = self
                    .db
                    .read_table(&name, &self.pending)
                    .ok_or_else(|| table_not_found(&name))?;
                return Ok(ExecuteOutcome::Rows(QueryResult {
                    columns: table.columns,
                    rows: table.rows,
                }));
            }

            // Literal select: SELECT 1
            if !rest.contains(' ') {
                return Ok(ExecuteOutcome::Rows(QueryResult::single(
                    rest_orig,
                    parse_value(rest_orig),
                )));
            }
            return Err(syntax_error(&sql));
        }

        if let Some(rest) = upper.strip_prefix("CREATE TABLE ") {
            let rest_orig = &sql["CREATE TABLE ".len()..];
            let name = rest
                .split(['(', ' '])
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if name.is_empty() {
                return Err(syntax_error(&sql));
            }
            let columns = rest_orig
                .find('(')
                .and_then(|open| rest_orig.rfind(')').map(|close| (open, close)))
                .map(|(open, close)| {
                    rest_orig[open + 1..close]
                        .split(',')
                        .filter_map(|c| c.trim().split_whitespace().next())
                        .map(|c| c.to_ascii_lowercase())
                        .collect()
                })
                .unwrap_or_default();
            self.pending.push(WriteOp::CreateTable { name, columns });
            return Ok(ExecuteOutcome::UpdateCount(0));
        }

        if let Some(rest) = upper.strip_prefix("DROP TABLE ") {
            let name = rest.trim().to_ascii_lowercase();
            self.pending.push(WriteOp::DropTable { name });
            return Ok(ExecuteOutcome::UpdateCount(0));
        }

        if let Some(rest) = upper.strip_prefix("INSERT INTO ") {
            let rest_orig = &sql["INSERT INTO ".len()..];
            let name = rest
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            let values = rest_orig
                .find('(')
                .and_then(|open| rest_orig.rfind(')').map(|close| (open, close)))
                .map(|(open, close)| {
                    rest_orig[open + 1..close]
                        .split(',')
                        .map(parse_value)
                        .collect::<Row>()
                })
                .ok_or_else(|| syntax_error(&sql))?;
            if self.db.read_table(&name, &self.pending).is_none() {
                return Err(table_not_found(&name));
            }
            self.pending.push(WriteOp::Insert { table: name, row: values });
            return Ok(ExecuteOutcome::UpdateCount(1));
        }

        if let Some(rest) = upper.strip_prefix("DELETE FROM ") {
            let name = rest.trim().to_ascii_lowercase();
            let count = self
                .db
                .read_table(&name, &self.pending)
                .map(|t| t.rows.len() as u64)
                .ok_or_else(|| table_not_found(&name))?;
            self.pending.push(WriteOp::DeleteAll { table: name });
            return Ok(ExecuteOutcome::UpdateCount(count));
        }

        Err(syntax_error(&sql))
    }

    fn take_pending(&mut self) -> Vec<WriteOp> {
        self.savepoints.clear();
        std::mem::take(&mut self.pending)
    }
}

fn table_not_found(name: &str) -> OjpError {
    OjpError::backend(0, "42S02", format!("table not found: {}", name))
}

#[async_trait]
impl BackendConnection for MemConnection {
    async fn execute_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        match self.run(sql, params)? {
            ExecuteOutcome::Rows(result) => Ok(result),
            ExecuteOutcome::UpdateCount(_) => Err(OjpError::backend(
                0,
                "42000",
                "statement does not produce a result set",
            )),
        }
    }

    async fn execute_update(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        match self.run(sql, params)? {
            ExecuteOutcome::UpdateCount(count) => Ok(count),
            ExecuteOutcome::Rows(_) => Err(OjpError::backend(
                0,
                "42000",
                "statement produces a result set",
            )),
        }
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecuteOutcome> {
        self.run(sql, params)
    }

    async fn commit(&mut self) -> Result<()> {
        let ops = self.take_pending();
        self.db.apply(&ops);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.pending.clear();
        self.savepoints.clear();
        Ok(())
    }

    async fn set_savepoint(&mut self, name: &str) -> Result<()> {
        self.savepoints.push((name.to_string(), self.pending.len()));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        match self.savepoints.iter().rposition(|(n, _)| n == name) {
            Some(idx) => {
                self.savepoints.truncate(idx);
                Ok(())
            }
            None => Err(OjpError::backend(0, "3B001", format!("unknown savepoint {}", name))),
        }
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        match self.savepoints.iter().rposition(|(n, _)| n == name) {
            Some(idx) => {
                let mark = self.savepoints[idx].1;
                self.pending.truncate(mark);
                self.savepoints.truncate(idx + 1);
                Ok(())
            }
            None => Err(OjpError::backend(0, "3B001", format!("unknown savepoint {}", name))),
        }
    }

    async fn is_valid(&mut self) -> bool {
        !self.closed
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.db.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.db.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn database_name(url: &str) -> String {
    // mem:test, h2:mem:test, jdbc:h2:mem:test all name the database "test".
    let tail = url.rsplit(':').next().unwrap_or(url);
    tail.split(&['?', ';'][..]).next().unwrap_or(tail).to_string()
}

/// Driver for the embedded in-memory family.
pub struct MemDriver;

#[async_trait]
impl BackendDriver for MemDriver {
    fn scheme(&self) -> &str {
        "mem"
    }

    async fn connect(&self, url: &str, _props: &Properties) -> Result<Box<dyn BackendConnection>> {
        let name = database_name(url);
        Ok(Box::new(MemDatabase::named(&name).connect()))
    }
}

/// XA variant of the in-memory driver.
pub struct MemXaDriver;

#[async_trait]
impl XaDriver for MemXaDriver {
    fn scheme(&self) -> &str {
        "mem"
    }

    async fn connect_xa(&self, url: &str, _props: &Properties) -> Result<Box<dyn XaConnection>> {
        let name = database_name(url);
        let db = MemDatabase::named(&name);
        Ok(Box::new(MemXaConnection {
            inner: db.connect(),
            db,
            active_xid: None,
            detached: HashMap::new(),
        }))
    }
}

/// XA connection: branch writes buffer per Xid until prepared/committed.
pub struct MemXaConnection {
    inner: MemConnection,
    db: Arc<MemDatabase>,
    active_xid: Option<XidKey>,
    /// Work of ended-but-unfinished branches, keyed by Xid.
    detached: HashMap<XidKey, Vec<WriteOp>>,
}

#[async_trait]
impl XaConnection for MemXaConnection {
    async fn xa_start(&mut self, xid: &XidKey, _flags: u32) -> Result<()> {
        if self.active_xid.is_some() {
            return Err(OjpError::xa(
                xa_code::XAER_PROTO,
                "a branch is already associated with this connection",
            ));
        }
        // Resuming restores the branch's buffered work.
        if let Some(ops) = self.detached.remove(xid) {
            self.inner.pending = ops;
        }
        self.active_xid = Some(xid.clone());
        Ok(())
    }

    async fn xa_end(&mut self, xid: &XidKey, _flags: u32) -> Result<()> {
        if self.active_xid.as_ref() != Some(xid) {
            return Err(OjpError::xa(
                xa_code::XAER_NOTA,
                "branch is not associated with this connection",
            ));
        }
        self.detached
            .insert(xid.clone(), self.inner.take_pending());
        self.active_xid = None;
        Ok(())
    }

    async fn xa_prepare(&mut self, xid: &XidKey) -> Result<i32> {
        let ops = self
            .detached
            .remove(xid)
            .ok_or_else(|| OjpError::xa(xa_code::XAER_NOTA, "no work for branch"))?;
        if ops.is_empty() {
            return Ok(xa_code::XA_RDONLY);
        }
        self.db.prepared.lock().insert(xid.clone(), ops);
        Ok(xa_code::XA_OK)
    }

    async fn xa_commit(&mut self, xid: &XidKey, one_phase: bool) -> Result<()> {
        let ops = if one_phase {
            self.detached
                .remove(xid)
                .ok_or_else(|| OjpError::xa(xa_code::XAER_NOTA, "no work for branch"))?
        } else {
            self.db
                .prepared
                .lock()
                .remove(xid)
                .ok_or_else(|| OjpError::xa(xa_code::XAER_NOTA, "branch not prepared"))?
        };
        self.db.apply(&ops);
        Ok(())
    }

    async fn xa_rollback(&mut self, xid: &XidKey) -> Result<()> {
        if self.detached.remove(xid).is_none() {
            self.db.prepared.lock().remove(xid);
        }
        Ok(())
    }

    async fn xa_forget(&mut self, xid: &XidKey) -> Result<()> {
        self.db.prepared.lock().remove(xid);
        Ok(())
    }

    async fn xa_recover(&mut self, _flags: u32) -> Result<Vec<XidKey>> {
        Ok(self.db.prepared.lock().keys().cloned().collect())
    }

    fn connection(&mut self) -> &mut dyn BackendConnection {
        &mut self.inner
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}
