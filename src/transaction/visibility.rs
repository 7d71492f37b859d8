//! MVCC visibility: is a tuple with header `{xmin, xmax}` visible to
//! `current_txn`?
//!
//! Rule order matters: the "xmax equals current_txn" check must run
//! before the "xmax committed" check, or a transaction would see its own
//! deletes.

use crate::common::TransactionId;
use crate::storage::table_page::RecordHeader;
use crate::transaction::manager::TransactionManager;

pub struct VisibilityChecker;

impl VisibilityChecker {
    pub fn is_visible(header: &RecordHeader, current_txn: TransactionId, txns: &TransactionManager) -> bool {
        let xmin_ok = (header.xmin == current_txn || txns.is_committed(header.xmin)) && !txns.is_aborted(header.xmin);
        if !xmin_ok {
            return false;
        }
        if header.xmax == 0 {
            return true;
        }
        header.xmax != current_txn && !txns.is_committed(header.xmax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskManager;
    use crate::transaction::manager::SchemaLookup;
    use crate::{buffer::BufferPool, common::ColumnList, transaction::wal::WalManager};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct NoSchema;
    impl SchemaLookup for NoSchema {
        fn columns(&self, _table_name: &str) -> Option<ColumnList> {
            None
        }
    }

    fn manager() -> (tempfile::TempDir, TransactionManager) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("t.db"), false, false).unwrap());
        let pool = Arc::new(BufferPool::new(disk, 4));
        let wal = Arc::new(WalManager::open(dir.path().join("t.wal")).unwrap());
        let mgr = TransactionManager::new(pool, wal, Arc::new(NoSchema));
        (dir, mgr)
    }

    fn header(xmin: u64, xmax: u64) -> RecordHeader {
        RecordHeader { row_id: 1, xmin, xmax, column_count: 0 }
    }

    #[test]
    fn own_uncommitted_insert_is_visible_to_self() {
        let (_d, mgr) = manager();
        let txn = mgr.begin().unwrap();
        assert!(VisibilityChecker::is_visible(&header(txn, 0), txn, &mgr));
    }

    #[test]
    fn uncommitted_insert_is_invisible_to_others() {
        let (_d, mgr) = manager();
        let writer = mgr.begin().unwrap();
        let reader = mgr.begin().unwrap();
        assert!(!VisibilityChecker::is_visible(&header(writer, 0), reader, &mgr));
    }

    #[test]
    fn committed_insert_is_visible_to_everyone() {
        let (_d, mgr) = manager();
        let writer = mgr.begin().unwrap();
        mgr.commit(writer).unwrap();
        let reader = mgr.begin().unwrap();
        assert!(VisibilityChecker::is_visible(&header(writer, 0), reader, &mgr));
    }

    #[test]
    fn own_delete_is_invisible_to_self_even_though_not_committed() {
        let (_d, mgr) = manager();
        let writer = mgr.begin().unwrap();
        mgr.commit(writer).unwrap();
        let deleter = mgr.begin().unwrap();
        assert!(!VisibilityChecker::is_visible(&header(writer, deleter), deleter, &mgr));
    }

    #[test]
    fn delete_by_other_committed_txn_hides_row() {
        let (_d, mgr) = manager();
        let writer = mgr.begin().unwrap();
        mgr.commit(writer).unwrap();
        let deleter = mgr.begin().unwrap();
        mgr.commit(deleter).unwrap();
        let reader = mgr.begin().unwrap();
        assert!(!VisibilityChecker::is_visible(&header(writer, deleter), reader, &mgr));
    }
}
