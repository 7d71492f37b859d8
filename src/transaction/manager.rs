//! Ties transaction lifecycle, page locking, and undo application
//! together. Finished transactions are kept (not purged) in the table so
//! `is_committed`/`is_aborted` stay answerable for as long as the process
//! runs; a fully unknown id (never seen, e.g. after a restart) is treated
//! as committed, per the visibility contract.

use crate::buffer::BufferPool;
use crate::common::{ColumnList, PageId, TransactionId, INVALID_TXN_ID};
use crate::error::{DbError, Result};
use crate::storage::table_page::TablePage;
use crate::transaction::locks::LockManager;
use crate::transaction::types::{LockMode, Transaction, TransactionState, UndoOp, UndoRecord};
use crate::transaction::wal::{MutationLocation, WalManager, WalRecordType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Resolves a table's column list so undo can re-encode a restored tuple.
/// Implemented by the catalog; kept as a trait here so the transaction
/// module doesn't depend on it directly.
pub trait SchemaLookup: Send + Sync {
    fn columns(&self, table_name: &str) -> Option<ColumnList>;
}

pub struct TransactionManager {
    next_id: Mutex<TransactionId>,
    txns: Mutex<HashMap<TransactionId, Transaction>>,
    locks: LockManager,
    wal: Arc<WalManager>,
    pool: Arc<BufferPool>,
    schema: Arc<dyn SchemaLookup>,
}

impl TransactionManager {
    pub fn new(pool: Arc<BufferPool>, wal: Arc<WalManager>, schema: Arc<dyn SchemaLookup>) -> Self {
        Self {
            next_id: Mutex::new(1),
            txns: Mutex::new(HashMap::new()),
            locks: LockManager::new(),
            wal,
            pool,
            schema,
        }
    }

    /// Seeds the transaction table from WAL recovery's committed/aborted
    /// sets, and advances the id counter past the highest one seen, so
    /// freshly begun transactions never collide with a recovered id.
    pub fn seed_recovered(&self, committed: &std::collections::HashSet<TransactionId>, aborted: &std::collections::HashSet<TransactionId>) {
        let mut txns = self.txns.lock();
        let mut max_seen = 0;
        for &id in committed {
            let mut t = Transaction::new(id);
            t.state = TransactionState::Committed;
            txns.insert(id, t);
            max_seen = max_seen.max(id);
        }
        for &id in aborted {
            let mut t = Transaction::new(id);
            t.state = TransactionState::Aborted;
            txns.insert(id, t);
            max_seen = max_seen.max(id);
        }
        drop(txns);
        let mut next = self.next_id.lock();
        if *next <= max_seen {
            *next = max_seen + 1;
        }
    }

    pub fn begin(&self) -> Result<TransactionId> {
        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.wal.append_begin(id)?;
        self.txns.lock().insert(id, Transaction::new(id));
        Ok(id)
    }

    pub fn lock_page(&self, txn: TransactionId, page: PageId, mode: LockMode, timeout_ms: u64) -> Result<()> {
        if self.locks.lock_page(txn, page, mode, timeout_ms) {
            if let Some(t) = self.txns.lock().get_mut(&txn) {
                t.locked_pages.insert(page);
            }
            Ok(())
        } else {
            Err(DbError::LockTimeout { page_id: page, lock_type: mode.as_str() })
        }
    }

    pub fn push_undo(&self, txn: TransactionId, record: UndoRecord) -> Result<()> {
        let mut txns = self.txns.lock();
        let t = txns
            .get_mut(&txn)
            .ok_or_else(|| DbError::NotFound(format!("transaction {txn}")))?;
        t.push_undo(record);
        Ok(())
    }

    pub fn append_mutation_wal(&self, txn: TransactionId, record_type: WalRecordType, location: MutationLocation) -> Result<u64> {
        self.wal.append_mutation(record_type, txn, location)
    }

    /// Commits under a no-steal/force-log discipline: the commit record is
    /// flushed before any page, then every page the transaction touched is
    /// forced to disk so a crash right after this call loses nothing.
    pub fn commit(&self, txn: TransactionId) -> Result<()> {
        let mut txns = self.txns.lock();
        let t = txns
            .get_mut(&txn)
            .ok_or_else(|| DbError::NotFound(format!("transaction {txn}")))?;
        if !t.is_active() {
            return Err(DbError::Internal(format!("transaction {txn} already finished")));
        }
        self.wal.append_commit(txn)?;
        t.state = TransactionState::Committed;
        let pages: Vec<PageId> = t.locked_pages.drain().collect();
        drop(txns);

        for &page in &pages {
            match self.pool.flush_page(page) {
                Ok(()) | Err(DbError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        self.locks.release_all(txn, pages);
        info!(txn_id = txn, "transaction committed");
        Ok(())
    }

    /// Walks the undo log in reverse, reversing each mutation directly on
    /// its page through the buffer pool, then releases locks. No WAL
    /// record is written for the undo itself.
    pub fn abort(&self, txn: TransactionId) -> Result<()> {
        let undo_log = {
            let mut txns = self.txns.lock();
            let t = txns
                .get_mut(&txn)
                .ok_or_else(|| DbError::NotFound(format!("transaction {txn}")))?;
            if !t.is_active() {
                return Err(DbError::Internal(format!("transaction {txn} already finished")));
            }
            std::mem::take(&mut t.undo_log)
        };

        for record in undo_log.into_iter().rev() {
            self.apply_undo(txn, &record)?;
        }

        self.wal.append_abort(txn)?;
        let pages = {
            let mut txns = self.txns.lock();
            let t = txns.get_mut(&txn).expect("txn present");
            t.state = TransactionState::Aborted;
            t.locked_pages.drain().collect::<Vec<_>>()
        };
        self.locks.release_all(txn, pages);
        info!(txn_id = txn, "transaction aborted");
        Ok(())
    }

    fn apply_undo(&self, txn: TransactionId, record: &UndoRecord) -> Result<()> {
        self.pool.fetch_page(record.page_id)?;
        let result = self.pool.with_page_mut(record.page_id, |page| match record.op {
            UndoOp::Insert => TablePage::delete_record(page, record.slot_index, txn),
            UndoOp::Delete => TablePage::undelete_record(page, record.slot_index),
            UndoOp::Update => {
                let columns = self
                    .schema
                    .columns(&record.table_name)
                    .ok_or_else(|| DbError::NotFound(format!("table {}", record.table_name)))?;
                let old_values = record
                    .old_values
                    .as_ref()
                    .ok_or_else(|| DbError::Internal("update undo missing old values".into()))?;
                TablePage::update_record(page, &columns, record.slot_index, old_values, txn).map(|_| ())
            }
        })?;
        self.pool.unpin_page(record.page_id, true)?;
        result
    }

    pub fn is_committed(&self, txn: TransactionId) -> bool {
        if txn == INVALID_TXN_ID {
            return true;
        }
        match self.txns.lock().get(&txn) {
            Some(t) => t.state == TransactionState::Committed,
            None => true, // unknown id: existed, finished, purged
        }
    }

    pub fn is_aborted(&self, txn: TransactionId) -> bool {
        match self.txns.lock().get(&txn) {
            Some(t) => t.state == TransactionState::Aborted,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DataType, Value};
    use crate::storage::disk::DiskManager;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    struct FixedSchema(StdHashMap<String, ColumnList>);
    impl SchemaLookup for FixedSchema {
        fn columns(&self, table_name: &str) -> Option<ColumnList> {
            self.0.get(table_name).cloned()
        }
    }

    fn setup() -> (tempfile::TempDir, TransactionManager, Arc<BufferPool>) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("t.db"), false, false).unwrap());
        let pool = Arc::new(BufferPool::new(disk, 8));
        let wal = Arc::new(WalManager::open(dir.path().join("t.wal")).unwrap());
        let mut schemas = StdHashMap::new();
        schemas.insert("users".to_string(), vec![DataType::Int]);
        let schema = Arc::new(FixedSchema(schemas));
        let mgr = TransactionManager::new(pool.clone(), wal, schema);
        (dir, mgr, pool)
    }

    #[test]
    fn begin_commit_releases_locks() {
        let (_d, mgr, _pool) = setup();
        let txn = mgr.begin().unwrap();
        mgr.lock_page(txn, 1, LockMode::Exclusive, 100).unwrap();
        mgr.commit(txn).unwrap();
        let txn2 = mgr.begin().unwrap();
        mgr.lock_page(txn2, 1, LockMode::Exclusive, 100).unwrap();
    }

    #[test]
    fn abort_reverses_insert_via_undo() {
        let (_d, mgr, pool) = setup();
        let txn = mgr.begin().unwrap();
        let page_id = pool.new_page().unwrap();
        pool.with_page_mut(page_id, |p| TablePage::init(p, page_id)).unwrap();
        let cols = vec![DataType::Int];
        let slot = pool
            .with_page_mut(page_id, |p| TablePage::insert_record(p, &cols, 1, &[Value::Int(1)], txn))
            .unwrap()
            .unwrap();
        pool.unpin_page(page_id, true).unwrap();

        mgr.push_undo(
            txn,
            UndoRecord {
                op: UndoOp::Insert,
                table_name: "users".into(),
                page_id,
                slot_index: slot,
                row_id: 1,
                old_values: None,
            },
        )
        .unwrap();

        mgr.abort(txn).unwrap();

        pool.fetch_page(page_id).unwrap();
        let header = pool.with_page(page_id, |p| TablePage::get_record_header(p, slot)).unwrap().unwrap();
        assert!(header.is_deleted());
        pool.unpin_page(page_id, false).unwrap();
    }

    #[test]
    fn commit_twice_is_an_error() {
        let (_d, mgr, _pool) = setup();
        let txn = mgr.begin().unwrap();
        mgr.commit(txn).unwrap();
        assert!(mgr.commit(txn).is_err());
    }

    #[test]
    fn unknown_txn_id_is_treated_as_committed() {
        let (_d, mgr, _pool) = setup();
        assert!(mgr.is_committed(9999));
        assert!(!mgr.is_aborted(9999));
    }

    #[test]
    fn cross_thread_lock_timeout_then_succeeds_after_holder_aborts() {
        let (_d, mgr, _pool) = setup();
        let mgr = Arc::new(mgr);

        let t1 = mgr.begin().unwrap();
        mgr.lock_page(t1, 42, LockMode::Exclusive, 1_000).unwrap();

        let waiter = {
            let mgr = mgr.clone();
            thread::spawn(move || {
                let t2 = mgr.begin().unwrap();
                let timed_out = mgr.lock_page(t2, 42, LockMode::Shared, 50).is_err();
                (mgr, t2, timed_out)
            })
        };
        let (mgr, t2, timed_out) = waiter.join().unwrap();
        assert!(timed_out, "second lock should have timed out while t1 held exclusive");

        mgr.abort(t1).unwrap();
        mgr.lock_page(t2, 42, LockMode::Shared, 1_000).unwrap();
    }
}
