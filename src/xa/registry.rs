// # XA Transaction Registry
//
// One registry per connection hash. Tracks active XA branches by `XidKey`
// and pins each branch to exactly one backend session for its lifetime.
// All operations on a single key serialize on the branch entry's lock;
// different keys proceed in parallel. Cluster-wide correctness follows
// from XA session stickiness at the routing layer: a branch only ever
// exists on one node.
//
// State machine per branch:
//
//   (absent) --start NOFLAGS--> ACTIVE
//   ACTIVE --end SUCCESS/FAIL--> IDLE
//   ACTIVE --end SUSPEND--> SUSPENDED
//   SUSPENDED --start RESUME/JOIN--> ACTIVE
//   IDLE --start RESUME/JOIN--> ACTIVE
//   IDLE --prepare--> PREPARED (XA_RDONLY completes the branch instead)
//   IDLE --commit(1pc)/rollback--> COMPLETED (entry removed)
//   PREPARED --commit/rollback--> COMPLETED (entry removed)
//
// Anything else fails with the standard XA error code.

use crate::backend::ConnHash;
use crate::error::{xa_code, OjpError, Result};
use crate::pool::pool::Borrowed;
use crate::provider::XaSessionPool;
use crate::xa::session::XaBackendSession;
use crate::xa::xid::{flags, XidKey};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Shared ownership slot for a pinned backend session. The client session
/// and the registry entry reference the same slot; whoever holds the slot's
/// lock owns the wrapper for that critical section.
pub type XaSlot = Mutex<Option<Borrowed<XaBackendSession>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XaBranchState {
    Active,
    Suspended,
    Idle,
    Prepared,
    Completed,
}

struct XaBranch {
    state: XaBranchState,
    flags: u32,
    owner_session: Uuid,
    /// Set when the owning client session was destroyed mid-branch; the
    /// backend session then returns to the pool on branch termination.
    owner_closed: bool,
}

/// Registry entry: the branch state machine plus the pinned session slot.
/// The slot reference is immutable for the entry's lifetime, so statement
/// traffic can reach the pinned session without taking the branch lock.
#[derive(Clone)]
struct XaEntry {
    slot: Arc<XaSlot>,
    branch: Arc<Mutex<XaBranch>>,
}

/// Per-connection-hash registry of live XA branches.
pub struct XaTransactionRegistry {
    conn_hash: ConnHash,
    pool: Arc<XaSessionPool>,
    entries: DashMap<XidKey, XaEntry>,
}

fn proto(message: impl Into<String>) -> OjpError {
    OjpError::xa(xa_code::XAER_PROTO, message)
}

impl XaTransactionRegistry {
    pub fn new(conn_hash: ConnHash, pool: Arc<XaSessionPool>) -> Self {
        Self {
            conn_hash,
            pool,
            entries: DashMap::new(),
        }
    }

    pub fn conn_hash(&self) -> &ConnHash {
        &self.conn_hash
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, xid: &XidKey) -> bool {
        self.entries.contains_key(xid)
    }

    /// Whether any live branch is owned by this client session.
    pub fn has_branch_for_session(&self, session: Uuid) -> bool {
        self.entries.iter().any(|entry| {
            entry
                .value()
                .branch
                .try_lock()
                .map(|branch| branch.owner_session == session)
                .unwrap_or(true)
        })
    }

    fn entry(&self, xid: &XidKey) -> Result<XaEntry> {
        self.entries
            .get(xid)
            .map(|e| e.value().clone())
            .ok_or_else(|| OjpError::xa(xa_code::XAER_NOTA, format!("unknown branch {}", xid)))
    }

    /// Begin a new branch (`TMNOFLAGS`), pinning the session's already-owned
    /// backend session to it.
    pub async fn register_existing_session(
        &self,
        xid: &XidKey,
        slot: Arc<XaSlot>,
        start_flags: u32,
        owner_session: Uuid,
    ) -> Result<()> {
        if self.entries.contains_key(xid) {
            return Err(OjpError::xa(
                xa_code::XAER_DUPID,
                format!("branch {} already exists", xid),
            ));
        }
        // A backend session backs at most one branch at a time.
        if self.slot_is_pinned(&slot) {
            return Err(proto(
                "backend session is already pinned to another branch",
            ));
        }

        {
            let mut guard = slot.lock().await;
            let session = guard
                .as_mut()
                .ok_or_else(|| proto("session has no backend to pin"))?;
            session.xa_start(xid, flags::TMNOFLAGS).await?;
        }

        let inserted = self.entries.insert(
            xid.clone(),
            XaEntry {
                slot,
                branch: Arc::new(Mutex::new(XaBranch {
                    state: XaBranchState::Active,
                    flags: start_flags,
                    owner_session,
                    owner_closed: false,
                })),
            },
        );
        if inserted.is_some() {
            // Lost a race on the same key; the XA contract makes this the
            // caller's error.
            return Err(OjpError::xa(
                xa_code::XAER_DUPID,
                format!("branch {} registered concurrently", xid),
            ));
        }
        tracing::debug!(conn_hash = %self.conn_hash, xid = %xid, "XA branch started");
        Ok(())
    }

    /// Join or resume an existing branch (`TMJOIN` / `TMRESUME`).
    pub async fn xa_start(&self, xid: &XidKey, start_flags: u32, owner_session: Uuid) -> Result<()> {
        if start_flags & (flags::TMJOIN | flags::TMRESUME) == 0 {
            return Err(OjpError::xa(
                xa_code::XAER_INVAL,
                "start on an existing branch requires TMJOIN or TMRESUME",
            ));
        }
        let entry = self.entry(xid)?;
        let mut branch = entry.branch.lock().await;
        match branch.state {
            XaBranchState::Suspended | XaBranchState::Idle => {
                {
                    let mut guard = entry.slot.lock().await;
                    let session = guard
                        .as_mut()
                        .ok_or_else(|| proto("pinned backend session missing"))?;
                    session.xa_start(xid, start_flags).await?;
                }
                branch.state = XaBranchState::Active;
                branch.flags = start_flags;
                branch.owner_session = owner_session;
                branch.owner_closed = false;
                Ok(())
            }
            other => Err(proto(format!("cannot start branch {} in state {:?}", xid, other))),
        }
    }

    /// Detach work from a branch: `TMSUCCESS`/`TMFAIL` → IDLE,
    /// `TMSUSPEND` → SUSPENDED.
    pub async fn xa_end(&self, xid: &XidKey, end_flags: u32) -> Result<()> {
        let entry = self.entry(xid)?;
        let mut branch = entry.branch.lock().await;
        if branch.state != XaBranchState::Active {
            return Err(proto(format!(
                "cannot end branch {} in state {:?}",
                xid, branch.state
            )));
        }
        let next = if end_flags & flags::TMSUSPEND != 0 {
            XaBranchState::Suspended
        } else if end_flags & (flags::TMSUCCESS | flags::TMFAIL) != 0 {
            XaBranchState::Idle
        } else {
            return Err(OjpError::xa(
                xa_code::XAER_INVAL,
                "end requires TMSUCCESS, TMFAIL or TMSUSPEND",
            ));
        };

        {
            let mut guard = entry.slot.lock().await;
            let session = guard
                .as_mut()
                .ok_or_else(|| proto("pinned backend session missing"))?;
            session.xa_end(xid, end_flags).await?;
        }
        branch.state = next;
        Ok(())
    }

    /// Prepare an idle branch. `XA_RDONLY` completes the branch immediately;
    /// `XA_OK` parks it in PREPARED awaiting the decision.
    pub async fn xa_prepare(&self, xid: &XidKey) -> Result<i32> {
        let entry = self.entry(xid)?;
        let mut branch = entry.branch.lock().await;
        if branch.state != XaBranchState::Idle {
            return Err(proto(format!(
                "cannot prepare branch {} in state {:?}",
                xid, branch.state
            )));
        }
        let vote = {
            let mut guard = entry.slot.lock().await;
            let session = guard
                .as_mut()
                .ok_or_else(|| proto("pinned backend session missing"))?;
            session.xa_prepare(xid).await?
        };
        if vote == xa_code::XA_RDONLY {
            branch.state = XaBranchState::Completed;
            drop(branch);
            self.remove_and_unpin(xid).await;
        } else {
            branch.state = XaBranchState::Prepared;
        }
        Ok(vote)
    }

    /// Commit a branch: one-phase from IDLE, two-phase from PREPARED.
    pub async fn xa_commit(&self, xid: &XidKey, one_phase: bool) -> Result<()> {
        let entry = self.entry(xid)?;
        let mut branch = entry.branch.lock().await;
        let legal = match branch.state {
            XaBranchState::Idle => one_phase,
            XaBranchState::Prepared => !one_phase,
            _ => false,
        };
        if !legal {
            return Err(proto(format!(
                "cannot {}-phase commit branch {} in state {:?}",
                if one_phase { "one" } else { "two" },
                xid,
                branch.state
            )));
        }
        {
            let mut guard = entry.slot.lock().await;
            let session = guard
                .as_mut()
                .ok_or_else(|| proto("pinned backend session missing"))?;
            session.xa_commit(xid, one_phase).await?;
        }
        branch.state = XaBranchState::Completed;
        drop(branch);
        self.remove_and_unpin(xid).await;
        tracing::debug!(conn_hash = %self.conn_hash, xid = %xid, "XA branch committed");
        Ok(())
    }

    /// Roll a branch back from IDLE or PREPARED.
    pub async fn xa_rollback(&self, xid: &XidKey) -> Result<()> {
        let entry = self.entry(xid)?;
        let mut branch = entry.branch.lock().await;
        if !matches!(branch.state, XaBranchState::Idle | XaBranchState::Prepared) {
            return Err(proto(format!(
                "cannot roll back branch {} in state {:?}",
                xid, branch.state
            )));
        }
        {
            let mut guard = entry.slot.lock().await;
            let session = guard
                .as_mut()
                .ok_or_else(|| proto("pinned backend session missing"))?;
            session.xa_rollback(xid).await?;
        }
        branch.state = XaBranchState::Completed;
        drop(branch);
        self.remove_and_unpin(xid).await;
        tracing::debug!(conn_hash = %self.conn_hash, xid = %xid, "XA branch rolled back");
        Ok(())
    }

    /// Forget a heuristically completed branch at the resource manager.
    /// Branches the registry still tracks cannot be forgotten.
    pub async fn xa_forget(&self, xid: &XidKey) -> Result<()> {
        if self.entries.contains_key(xid) {
            return Err(proto(format!("branch {} is still live", xid)));
        }
        let mut session = self.pool.borrow().await?;
        let outcome = session.xa_forget(xid).await;
        self.pool.release(session, outcome.is_ok()).await;
        outcome
    }

    /// Union of node-local PREPARED branches and the branches the resource
    /// manager reports through one pooled backend session.
    pub async fn xa_recover(&self, recover_flags: u32) -> Result<Vec<XidKey>> {
        let mut found: Vec<XidKey> = Vec::new();
        let snapshot: Vec<(XidKey, XaEntry)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (xid, entry) in snapshot {
            let branch = entry.branch.lock().await;
            if branch.state == XaBranchState::Prepared {
                found.push(xid);
            }
        }

        let mut session = self.pool.borrow().await?;
        let backend_report = session.xa_recover(recover_flags).await;
        self.pool.release(session, backend_report.is_ok()).await;

        for xid in backend_report? {
            if !found.contains(&xid) {
                found.push(xid);
            }
        }
        found.sort();
        Ok(found)
    }

    /// Called when the client session owning this backend-session slot is
    /// destroyed. Branches pinned to the slot stay pinned; their backend
    /// session returns to the pool once the branch terminates. Returns the
    /// number of branches left pinned to the slot.
    pub async fn mark_slot_orphaned(&self, slot: &Arc<XaSlot>) -> usize {
        let snapshot: Vec<XaEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        let mut pinned = 0;
        for entry in snapshot {
            if !Arc::ptr_eq(&entry.slot, slot) {
                continue;
            }
            let mut branch = entry.branch.lock().await;
            branch.owner_closed = true;
            pinned += 1;
        }
        pinned
    }

    /// Whether any live branch is pinned to this slot.
    pub fn slot_is_pinned(&self, slot: &Arc<XaSlot>) -> bool {
        self.entries.iter().any(|e| Arc::ptr_eq(&e.value().slot, slot))
    }

    /// Shared slot of a live branch, for statement traffic routed into the
    /// branch's pinned backend session. Slot identity is fixed for the
    /// entry's lifetime, so no branch lock is needed.
    pub fn pinned_slot(&self, xid: &XidKey) -> Result<Arc<XaSlot>> {
        self.entries
            .get(xid)
            .map(|e| Arc::clone(&e.value().slot))
            .ok_or_else(|| OjpError::xa(xa_code::XAER_NOTA, format!("unknown branch {}", xid)))
    }

    async fn remove_and_unpin(&self, xid: &XidKey) {
        let Some((_, entry)) = self.entries.remove(xid) else {
            return;
        };
        let branch = entry.branch.lock().await;
        if branch.owner_closed {
            // Owner is gone: ownership reverts to the pool.
            let returned = { entry.slot.lock().await.take() };
            if let Some(borrowed) = returned {
                self.pool.release(borrowed, true).await;
            }
        }
        // Otherwise the client session keeps its backend session through
        // the shared slot.
    }

    /// Administrative sweep: report branches still live at shutdown.
    pub async fn drain(&self) -> usize {
        let snapshot: Vec<(XidKey, XaEntry)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (xid, entry) in &snapshot {
            let branch = entry.branch.lock().await;
            tracing::warn!(conn_hash = %self.conn_hash, xid = %xid, state = ?branch.state, flags = branch.flags, "branch still live at drain");
        }
        snapshot.len()
    }
}

/// Map of per-connection-hash registries.
pub struct XaRegistries {
    by_hash: DashMap<ConnHash, Arc<XaTransactionRegistry>>,
}

impl XaRegistries {
    pub fn new() -> Self {
        Self {
            by_hash: DashMap::new(),
        }
    }

    /// Fetch or create the registry for a hash, binding it to the hash's
    /// XA session pool on first use.
    pub fn registry_for(
        &self,
        conn_hash: &ConnHash,
        pool: &Arc<XaSessionPool>,
    ) -> Arc<XaTransactionRegistry> {
        self.by_hash
            .entry(conn_hash.clone())
            .or_insert_with(|| {
                Arc::new(XaTransactionRegistry::new(conn_hash.clone(), Arc::clone(pool)))
            })
            .value()
            .clone()
    }

    /// Registry for a hash if one exists (read-side paths).
    pub fn get(&self, conn_hash: &ConnHash) -> Option<Arc<XaTransactionRegistry>> {
        self.by_hash.get(conn_hash).map(|e| Arc::clone(e.value()))
    }

    /// Whether any registry holds a branch owned by this session.
    pub async fn session_has_branch(&self, session: Uuid) -> bool {
        for entry in self.by_hash.iter() {
            if entry.value().has_branch_for_session(session) {
                return true;
            }
        }
        false
    }

    pub fn total_entries(&self) -> usize {
        self.by_hash.iter().map(|e| e.value().entry_count()).sum()
    }
}

impl Default for XaRegistries {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::connection_hash;
    use crate::backend::driver::DriverRegistry;
    use crate::backend::memory::MemDatabase;
    use crate::config::datasource::DataSourceConfiguration;
    use crate::pool::pool::{Pool, PoolSettings};
    use crate::provider::PoolSpec;
    use crate::xa::pool::XaSessionFactory;

    async fn setup(db: &str) -> (Arc<XaSessionPool>, XaTransactionRegistry, Arc<XaSlot>) {
        MemDatabase::reset(db);
        let url = format!("mem:{}", db);
        let config = Arc::new(DataSourceConfiguration::default());
        let spec = PoolSpec {
            conn_hash: connection_hash(&url, "", &config),
            backend_url: url,
            config,
            drivers: Arc::new(DriverRegistry::with_embedded()),
            leak_detection_threshold: None,
        };
        let factory = Arc::new(XaSessionFactory::for_spec(&spec).unwrap());
        let pool = Arc::new(Pool::new(
            spec.conn_hash.to_string(),
            PoolSettings {
                max_size: 4,
                min_idle: 0,
                maintenance_interval: std::time::Duration::from_secs(3600),
                ..PoolSettings::default()
            },
            factory,
        ));
        let registry = XaTransactionRegistry::new(spec.conn_hash.clone(), Arc::clone(&pool));

        let borrowed = pool.borrow().await.unwrap();
        let slot = Arc::new(Mutex::new(Some(borrowed)));
        (pool, registry, slot)
    }

    #[tokio::test]
    async fn test_full_commit_cycle_leaves_no_entry() {
        let (_pool, registry, slot) = setup("xareg_commit").await;
        let xid = XidKey::from_parts(1, "gtx", "b1");
        let owner = Uuid::new_v4();

        registry
            .register_existing_session(&xid, Arc::clone(&slot), flags::TMNOFLAGS, owner)
            .await
            .unwrap();
        registry.xa_end(&xid, flags::TMSUCCESS).await.unwrap();
        assert_eq!(registry.xa_prepare(&xid).await.unwrap(), xa_code::XA_RDONLY);

        // Read-only vote completed the branch.
        assert_eq!(registry.entry_count(), 0);
        // The owning session keeps its backend session.
        assert!(slot.lock().await.is_some());
    }

    #[tokio::test]
    async fn test_two_phase_commit_with_work() {
        let (_pool, registry, slot) = setup("xareg_2pc").await;
        let xid = XidKey::from_parts(1, "gtx2", "b1");
        let owner = Uuid::new_v4();

        {
            let mut guard = slot.lock().await;
            let session = guard.as_mut().unwrap();
            session.connection().execute_update("CREATE TABLE t (v INT)", &[]).await.unwrap();
            session.connection().commit().await.unwrap();
        }

        registry
            .register_existing_session(&xid, Arc::clone(&slot), flags::TMNOFLAGS, owner)
            .await
            .unwrap();
        {
            let mut guard = slot.lock().await;
            let session = guard.as_mut().unwrap();
            session
                .connection()
                .execute_update("INSERT INTO t VALUES (1)", &[])
                .await
                .unwrap();
        }
        registry.xa_end(&xid, flags::TMSUCCESS).await.unwrap();
        assert_eq!(registry.xa_prepare(&xid).await.unwrap(), xa_code::XA_OK);
        registry.xa_commit(&xid, false).await.unwrap();
        assert_eq!(registry.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_start_is_dupid() {
        let (_pool, registry, slot) = setup("xareg_dup").await;
        let xid = XidKey::from_parts(1, "dup", "b1");
        let owner = Uuid::new_v4();

        registry
            .register_existing_session(&xid, Arc::clone(&slot), flags::TMNOFLAGS, owner)
            .await
            .unwrap();
        let err = registry
            .register_existing_session(&xid, Arc::clone(&slot), flags::TMNOFLAGS, owner)
            .await
            .unwrap_err();
        assert!(matches!(err, OjpError::XaProtocol { code, .. } if code == xa_code::XAER_DUPID));
    }

    #[tokio::test]
    async fn test_join_unknown_branch_is_nota() {
        let (_pool, registry, _slot) = setup("xareg_nota").await;
        let err = registry
            .xa_start(&XidKey::from_parts(1, "none", "b"), flags::TMJOIN, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, OjpError::XaProtocol { code, .. } if code == xa_code::XAER_NOTA));
    }

    #[tokio::test]
    async fn test_illegal_transitions_are_proto() {
        let (_pool, registry, slot) = setup("xareg_proto").await;
        let xid = XidKey::from_parts(1, "proto", "b1");
        let owner = Uuid::new_v4();

        registry
            .register_existing_session(&xid, Arc::clone(&slot), flags::TMNOFLAGS, owner)
            .await
            .unwrap();

        // ACTIVE branch cannot prepare or commit.
        assert!(matches!(
            registry.xa_prepare(&xid).await.unwrap_err(),
            OjpError::XaProtocol { code, .. } if code == xa_code::XAER_PROTO
        ));
        assert!(matches!(
            registry.xa_commit(&xid, true).await.unwrap_err(),
            OjpError::XaProtocol { code, .. } if code == xa_code::XAER_PROTO
        ));

        // ACTIVE branch cannot be re-started.
        assert!(matches!(
            registry.xa_start(&xid, flags::TMJOIN, owner).await.unwrap_err(),
            OjpError::XaProtocol { code, .. } if code == xa_code::XAER_PROTO
        ));

        registry.xa_end(&xid, flags::TMSUCCESS).await.unwrap();
        // IDLE branch cannot end again.
        assert!(matches!(
            registry.xa_end(&xid, flags::TMSUCCESS).await.unwrap_err(),
            OjpError::XaProtocol { code, .. } if code == xa_code::XAER_PROTO
        ));

        registry.xa_rollback(&xid).await.unwrap();
        assert_eq!(registry.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_suspend_resume_preserves_backend_identity() {
        let (_pool, registry, slot) = setup("xareg_resume").await;
        let xid = XidKey::from_parts(1, "susp", "b1");
        let owner = Uuid::new_v4();

        registry
            .register_existing_session(&xid, Arc::clone(&slot), flags::TMNOFLAGS, owner)
            .await
            .unwrap();
        let before = { slot.lock().await.as_ref().unwrap().entry_id() };

        registry.xa_end(&xid, flags::TMSUSPEND).await.unwrap();
        registry.xa_start(&xid, flags::TMRESUME, owner).await.unwrap();

        let resumed_slot = registry.pinned_slot(&xid).unwrap();
        let after = { resumed_slot.lock().await.as_ref().unwrap().entry_id() };
        assert_eq!(before, after);

        registry.xa_end(&xid, flags::TMSUCCESS).await.unwrap();
        registry.xa_commit(&xid, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_one_phase_commit_from_idle() {
        let (_pool, registry, slot) = setup("xareg_1pc").await;
        let xid = XidKey::from_parts(1, "one", "b1");
        registry
            .register_existing_session(&xid, Arc::clone(&slot), flags::TMNOFLAGS, Uuid::new_v4())
            .await
            .unwrap();
        registry.xa_end(&xid, flags::TMSUCCESS).await.unwrap();
        registry.xa_commit(&xid, true).await.unwrap();
        assert_eq!(registry.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_orphaned_branch_returns_backend_to_pool() {
        let (pool, registry, slot) = setup("xareg_orphan").await;
        let xid = XidKey::from_parts(1, "orph", "b1");
        let owner = Uuid::new_v4();

        registry
            .register_existing_session(&xid, Arc::clone(&slot), flags::TMNOFLAGS, owner)
            .await
            .unwrap();
        registry.xa_end(&xid, flags::TMSUCCESS).await.unwrap();

        // Owner session goes away mid-branch; the backend stays pinned.
        assert_eq!(registry.mark_slot_orphaned(&slot).await, 1);
        assert!(registry.slot_is_pinned(&slot));
        assert_eq!(pool.active_count(), 1);

        registry.xa_commit(&xid, true).await.unwrap();
        // Branch termination released the orphaned backend to the pool.
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 1);
        assert!(slot.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_recover_unions_local_and_backend() {
        let (_pool, registry, slot) = setup("xareg_recover").await;
        let xid = XidKey::from_parts(1, "rec", "b1");

        {
            let mut guard = slot.lock().await;
            let session = guard.as_mut().unwrap();
            session.connection().execute_update("CREATE TABLE r (v INT)", &[]).await.unwrap();
            session.connection().commit().await.unwrap();
        }

        registry
            .register_existing_session(&xid, Arc::clone(&slot), flags::TMNOFLAGS, Uuid::new_v4())
            .await
            .unwrap();
        {
            let mut guard = slot.lock().await;
            let session = guard.as_mut().unwrap();
            session.connection().execute_update("INSERT INTO r VALUES (9)", &[]).await.unwrap();
        }
        registry.xa_end(&xid, flags::TMSUCCESS).await.unwrap();
        registry.xa_prepare(&xid).await.unwrap();

        let recovered = registry.xa_recover(0).await.unwrap();
        assert_eq!(recovered, vec![xid.clone()]);

        registry.xa_rollback(&xid).await.unwrap();
        assert!(registry.xa_recover(0).await.unwrap().is_empty());
    }
}
