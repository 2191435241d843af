// # XA Backend Session
//
// Pool-pinned wrapper around one XA connection and its derived physical
// connection. At any moment the wrapper is exclusively owned by an idle
// pool slot, a client session outside any branch, or a transaction
// registry entry for the lifetime of a branch.

use crate::backend::driver::{BackendConnection, XaConnection};
use crate::error::Result;
use crate::xa::xid::XidKey;

pub struct XaBackendSession {
    conn: Box<dyn XaConnection>,
    current_xid: Option<XidKey>,
}

impl XaBackendSession {
    pub fn new(conn: Box<dyn XaConnection>) -> Self {
        Self {
            conn,
            current_xid: None,
        }
    }

    /// The physical connection for ordinary statement traffic.
    pub fn connection(&mut self) -> &mut dyn BackendConnection {
        self.conn.connection()
    }

    /// Xid currently associated with this session, if any.
    pub fn current_xid(&self) -> Option<&XidKey> {
        self.current_xid.as_ref()
    }

    pub async fn xa_start(&mut self, xid: &XidKey, flags: u32) -> Result<()> {
        self.conn.xa_start(xid, flags).await?;
        self.current_xid = Some(xid.clone());
        Ok(())
    }

    pub async fn xa_end(&mut self, xid: &XidKey, flags: u32) -> Result<()> {
        self.conn.xa_end(xid, flags).await?;
        if self.current_xid.as_ref() == Some(xid) {
            self.current_xid = None;
        }
        Ok(())
    }

    pub async fn xa_prepare(&mut self, xid: &XidKey) -> Result<i32> {
        self.conn.xa_prepare(xid).await
    }

    pub async fn xa_commit(&mut self, xid: &XidKey, one_phase: bool) -> Result<()> {
        self.conn.xa_commit(xid, one_phase).await
    }

    pub async fn xa_rollback(&mut self, xid: &XidKey) -> Result<()> {
        self.conn.xa_rollback(xid).await
    }

    pub async fn xa_forget(&mut self, xid: &XidKey) -> Result<()> {
        self.conn.xa_forget(xid).await
    }

    pub async fn xa_recover(&mut self, flags: u32) -> Result<Vec<XidKey>> {
        self.conn.xa_recover(flags).await
    }

    pub async fn is_valid(&mut self) -> bool {
        self.conn.connection().is_valid().await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.conn.close().await
    }
}
