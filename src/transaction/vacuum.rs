//! Background reclamation of dead tuples.
//!
//! A full snapshot horizon isn't tracked by this core, so "no live
//! transaction could still observe the tuple" is approximated as "xmax
//! committed" — tightening this is left to an implementer who adds
//! oldest-active-snapshot tracking. A tuple whose inserting transaction
//! aborted is reclaimed unconditionally: nobody can ever see it (rule 1
//! of visibility already hides it for everyone, including the aborting
//! txn once finished), so there is nothing to wait on.

use crate::buffer::BufferPool;
use crate::common::{PageId, INVALID_PAGE_ID};
use crate::error::Result;
use crate::storage::table_page::TablePage;
use crate::transaction::manager::TransactionManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Supplies the set of tables to sweep, as their first page id. Each
/// table's pages are walked via `nextPageId` links in the page header.
pub trait TableDirectory: Send + Sync {
    fn table_first_pages(&self) -> Vec<(String, PageId)>;
}

pub struct VacuumWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl VacuumWorker {
    /// Sweeps every table once, reclaiming slots where `xmax != 0`, `xmax`
    /// is committed, and `xmin` is committed. Returns the number of slots
    /// reclaimed.
    pub fn sweep_once(
        pool: &BufferPool,
        txns: &TransactionManager,
        directory: &dyn TableDirectory,
    ) -> Result<usize> {
        let mut reclaimed = 0;
        for (table, first_page) in directory.table_first_pages() {
            let mut page_id = first_page;
            while page_id != INVALID_PAGE_ID {
                pool.fetch_page(page_id)?;
                let (next, hits) = pool.with_page_mut(page_id, |page| {
                    let slot_count = page.header().slot_count;
                    let mut hits = Vec::new();
                    for slot in 0..slot_count {
                        if let Some(header) = TablePage::get_record_header(page, slot) {
                            let deleted_and_settled = header.xmax != 0
                                && txns.is_committed(header.xmax)
                                && txns.is_committed(header.xmin);
                            let never_existed = txns.is_aborted(header.xmin);
                            if deleted_and_settled || never_existed {
                                hits.push(slot);
                            }
                        }
                    }
                    for &slot in &hits {
                        let _ = TablePage::reclaim_slot(page, slot);
                    }
                    (page.header().next_page_id, hits.len())
                })?;
                pool.unpin_page(page_id, hits > 0)?;
                reclaimed += hits;
                if hits > 0 {
                    debug!(table = %table, page_id, reclaimed = hits, "vacuum reclaimed slots");
                }
                page_id = next;
            }
        }
        Ok(reclaimed)
    }

    /// Spawns a background thread that calls [`Self::sweep_once`] every
    /// `interval`, stopping when the returned handle is dropped or
    /// [`Self::shutdown`] is called.
    pub fn spawn(
        pool: Arc<BufferPool>,
        txns: Arc<TransactionManager>,
        directory: Arc<dyn TableDirectory>,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let handle = thread::spawn(move || {
            while !stop_clone.load(Ordering::Relaxed) {
                thread::sleep(interval);
                if stop_clone.load(Ordering::Relaxed) {
                    break;
                }
                match Self::sweep_once(&pool, &txns, directory.as_ref()) {
                    Ok(n) if n > 0 => info!(reclaimed = n, "vacuum sweep reclaimed slots"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "vacuum sweep failed"),
                }
            }
        });
        Self { stop, handle: Some(handle) }
    }

    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for VacuumWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DataType, Value};
    use crate::storage::disk::DiskManager;
    use crate::storage::table_page::TablePage;
    use crate::transaction::manager::SchemaLookup;
    use crate::transaction::wal::WalManager;
    use tempfile::tempdir;

    struct NoSchema;
    impl SchemaLookup for NoSchema {
        fn columns(&self, _table_name: &str) -> Option<crate::common::ColumnList> {
            None
        }
    }

    struct OneTable(PageId);
    impl TableDirectory for OneTable {
        fn table_first_pages(&self) -> Vec<(String, PageId)> {
            vec![("users".to_string(), self.0)]
        }
    }

    #[test]
    fn sweep_reclaims_slot_whose_deleter_and_inserter_both_committed() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("t.db"), false, false).unwrap());
        let pool = Arc::new(BufferPool::new(disk, 4));
        let wal = Arc::new(WalManager::open(dir.path().join("t.wal")).unwrap());
        let txns = TransactionManager::new(pool.clone(), wal, Arc::new(NoSchema));

        let inserter = txns.begin().unwrap();
        let page_id = pool.new_page().unwrap();
        pool.with_page_mut(page_id, |p| TablePage::init(p, page_id)).unwrap();
        let cols = vec![DataType::Int];
        let slot = pool
            .with_page_mut(page_id, |p| TablePage::insert_record(p, &cols, 1, &[Value::Int(1)], inserter))
            .unwrap()
            .unwrap();
        pool.unpin_page(page_id, true).unwrap();
        txns.commit(inserter).unwrap();

        let deleter = txns.begin().unwrap();
        pool.fetch_page(page_id).unwrap();
        pool.with_page_mut(page_id, |p| TablePage::delete_record(p, slot, deleter)).unwrap();
        pool.unpin_page(page_id, true).unwrap();
        txns.commit(deleter).unwrap();

        let directory = OneTable(page_id);
        let reclaimed = VacuumWorker::sweep_once(&pool, &txns, &directory).unwrap();
        assert_eq!(reclaimed, 1);

        pool.fetch_page(page_id).unwrap();
        let header = pool.with_page(page_id, |p| TablePage::get_record_header(p, slot)).unwrap();
        pool.unpin_page(page_id, false).unwrap();
        assert!(header.is_none(), "reclaimed slot has length 0, so no header decodes");
    }
}
