//! The `Database` facade: wires disk, buffer pool, catalog, row index,
//! transactions, WAL, and vacuum into the operations surface an external
//! executor calls.

use crate::buffer::BufferPool;
use crate::catalog::{Catalog, ColumnDef, IndexDef, RowIdIndex, RowLocation, TableDef};
use crate::common::{IndexKind, PageId, RowId, TransactionId, Value, INVALID_PAGE_ID, INVALID_TXN_ID};
use crate::config::Config;
use crate::error::{DbError, Result};
use crate::index::BPlusTree;
use crate::stats::{StatisticsCollector, TableStats};
use crate::storage::disk::DiskManager;
use crate::storage::table_page::TablePage;
use crate::transaction::manager::{SchemaLookup, TransactionManager};
use crate::transaction::types::{LockMode, UndoOp, UndoRecord};
use crate::transaction::vacuum::{TableDirectory, VacuumWorker};
use crate::transaction::visibility::VisibilityChecker;
use crate::transaction::wal::{MutationLocation, WalManager, WalRecordType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

pub struct Database {
    pool: Arc<BufferPool>,
    catalog: Arc<Catalog>,
    row_index: Arc<RowIdIndex>,
    txns: Arc<TransactionManager>,
    wal: Arc<WalManager>,
    vacuum: Mutex<Option<VacuumWorker>>,
    config: Config,
}

impl Database {
    /// Opens (creating if absent) the database file and WAL described by
    /// `config`, replays the WAL's committed/aborted sets into the
    /// transaction manager, and starts the background vacuum worker.
    /// The catalog itself is never persisted by this core (external
    /// format, per scope) so every table/index definition must be
    /// recreated by the embedder after each process restart.
    pub fn open(config: Config) -> Result<Self> {
        if config.wal_in_db {
            return Err(DbError::NotImplemented("WAL-in-DB-table backend".into()));
        }
        std::fs::create_dir_all(&config.data_dir)?;

        let disk = Arc::new(DiskManager::open(config.database_path(), false, config.wal_in_db)?);
        let pool = Arc::new(BufferPool::new(disk, config.buffer_pool_pages));
        let wal = Arc::new(WalManager::open(config.wal_path())?);

        let outcome = wal.recover()?;
        info!(
            committed = outcome.committed.len(),
            aborted = outcome.aborted.len(),
            redo = outcome.redo.len(),
            "WAL recovery complete"
        );

        let catalog = Arc::new(Catalog::new());
        let row_index = Arc::new(RowIdIndex::new());
        let schema: Arc<dyn SchemaLookup> = catalog.clone();
        let txns = Arc::new(TransactionManager::new(pool.clone(), wal.clone(), schema));
        txns.seed_recovered(&outcome.committed, &outcome.aborted);

        let directory: Arc<dyn TableDirectory> = catalog.clone();
        let vacuum = VacuumWorker::spawn(
            pool.clone(),
            txns.clone(),
            directory,
            Duration::from_secs(config.vacuum_interval_secs),
        );

        Ok(Self { pool, catalog, row_index, txns, wal, vacuum: Mutex::new(Some(vacuum)), config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---- DDL ----

    pub fn create_table(&self, name: &str, columns: Vec<ColumnDef>) -> Result<()> {
        let page_id = self.pool.new_page()?;
        self.pool.with_page_mut(page_id, |p| TablePage::init(p, page_id))?;
        self.pool.unpin_page(page_id, true)?;
        self.catalog.create_table(name, columns, page_id)
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.catalog.drop_table(name).map(|_| ())
    }

    /// Registers a table that already has data pages — the hook an
    /// embedder's own catalog-persistence layer calls after reloading a
    /// `TableDef` it saved before the last restart, since this core never
    /// persists the catalog itself. Rebuilds the row index for the table
    /// from a full page-chain scan rather than trusting any external
    /// state about row locations.
    pub fn open_table(&self, name: &str, columns: Vec<ColumnDef>, first_page_id: PageId) -> Result<()> {
        self.catalog.create_table(name, columns, first_page_id)?;
        self.rebuild_row_index(name, first_page_id)
    }

    fn rebuild_row_index(&self, table: &str, first_page_id: PageId) -> Result<()> {
        let mut max_row_id: RowId = 0;
        let mut page_id = first_page_id;
        while page_id != INVALID_PAGE_ID {
            self.pool.fetch_page(page_id)?;
            let (locations, next) = self.pool.with_page(page_id, |p| {
                let slot_count = p.header().slot_count;
                let mut locations = Vec::new();
                for slot in 0..slot_count {
                    if let Some(header) = TablePage::get_record_header(p, slot) {
                        locations.push((header.row_id, slot));
                    }
                }
                (locations, p.header().next_page_id)
            })?;
            self.pool.unpin_page(page_id, false)?;

            for (row_id, slot) in locations {
                self.row_index.insert(table, row_id, RowLocation { page_id, slot_index: slot });
                max_row_id = max_row_id.max(row_id);
            }
            page_id = next;
        }
        self.catalog.bump_next_row_id(table, max_row_id + 1)
    }

    // ---- DML ----

    pub fn insert_tuple(&self, table: &str, values: &[Value], txn: TransactionId) -> Result<RowId> {
        let def = self.catalog.get_table(table)?;
        let columns = def.column_list();
        let record_size = TablePage::calculate_record_size(&columns, values)?;
        if record_size + 4 > TablePage::max_record_size() {
            return Err(DbError::OutOfSpace(format!("record of {record_size} bytes exceeds page capacity")));
        }

        let row_id = self.catalog.next_row_id(table)?;
        let page_id = self.find_insertion_page(&def, record_size)?;

        self.txns.lock_page(txn, page_id, LockMode::Exclusive, DEFAULT_LOCK_TIMEOUT_MS)?;
        self.pool.fetch_page(page_id)?;
        let slot = self
            .pool
            .with_page_mut(page_id, |p| TablePage::insert_record(p, &columns, row_id, values, txn))??;
        self.pool.unpin_page(page_id, true)?;

        self.row_index.insert(table, row_id, RowLocation { page_id, slot_index: slot });
        self.txns.push_undo(
            txn,
            UndoRecord { op: UndoOp::Insert, table_name: table.to_string(), page_id, slot_index: slot, row_id, old_values: None },
        )?;
        self.txns.append_mutation_wal(
            txn,
            WalRecordType::Insert,
            MutationLocation { table_name: table.to_string(), page_id, slot_index: slot, row_id },
        )?;
        Ok(row_id)
    }

    /// Walks `def`'s page chain for the first page with room for
    /// `record_size`, extending the chain with a freshly allocated page
    /// if none is found.
    fn find_insertion_page(&self, def: &TableDef, record_size: usize) -> Result<PageId> {
        let mut page_id = def.first_page_id;
        loop {
            self.pool.fetch_page(page_id)?;
            let enough = self.pool.with_page(page_id, |p| TablePage::has_enough_space(p, record_size))?;
            let next = self.pool.with_page(page_id, |p| p.header().next_page_id)?;
            self.pool.unpin_page(page_id, false)?;
            if enough {
                return Ok(page_id);
            }
            if next == INVALID_PAGE_ID {
                break;
            }
            page_id = next;
        }

        let new_id = self.pool.new_page()?;
        self.pool.with_page_mut(new_id, |p| {
            TablePage::init(p, new_id);
            let mut header = p.header();
            header.prev_page_id = page_id;
            p.set_header(&header);
        })?;
        self.pool.unpin_page(new_id, true)?;

        self.pool.fetch_page(page_id)?;
        self.pool.with_page_mut(page_id, |p| {
            let mut header = p.header();
            header.next_page_id = new_id;
            p.set_header(&header);
        })?;
        self.pool.unpin_page(page_id, true)?;
        Ok(new_id)
    }

    /// Every visible `(rowId, values)` pair in `table`, under `txn`'s
    /// snapshot (`txn == 0` reads read-committed).
    pub fn scan_table(&self, table: &str, txn: TransactionId) -> Result<Vec<(RowId, Vec<Value>)>> {
        let def = self.catalog.get_table(table)?;
        let columns = def.column_list();
        let mut out = Vec::new();
        let mut page_id = def.first_page_id;
        while page_id != INVALID_PAGE_ID {
            self.pool.fetch_page(page_id)?;
            let records = self.pool.with_page(page_id, |p| TablePage::get_all_records(p, &columns))??;
            let next = self.pool.with_page(page_id, |p| p.header().next_page_id)?;
            self.pool.unpin_page(page_id, false)?;
            for (header, values) in records {
                if VisibilityChecker::is_visible(&header, txn, &self.txns) {
                    out.push((header.row_id, values));
                }
            }
            page_id = next;
        }
        Ok(out)
    }

    pub fn delete_tuple(&self, table: &str, row_id: RowId, txn: TransactionId) -> Result<()> {
        let loc = self
            .row_index
            .lookup(table, row_id)
            .ok_or_else(|| DbError::NotFound(format!("row {row_id} in {table}")))?;

        self.txns.lock_page(txn, loc.page_id, LockMode::Exclusive, DEFAULT_LOCK_TIMEOUT_MS)?;
        self.pool.fetch_page(loc.page_id)?;
        self.pool.with_page_mut(loc.page_id, |p| TablePage::delete_record(p, loc.slot_index, txn))??;
        self.pool.unpin_page(loc.page_id, true)?;

        self.txns.push_undo(
            txn,
            UndoRecord {
                op: UndoOp::Delete,
                table_name: table.to_string(),
                page_id: loc.page_id,
                slot_index: loc.slot_index,
                row_id,
                old_values: None,
            },
        )?;
        self.txns.append_mutation_wal(
            txn,
            WalRecordType::Delete,
            MutationLocation { table_name: table.to_string(), page_id: loc.page_id, slot_index: loc.slot_index, row_id },
        )?;
        Ok(())
    }

    pub fn update_tuple(&self, table: &str, row_id: RowId, new_values: &[Value], txn: TransactionId) -> Result<()> {
        let def = self.catalog.get_table(table)?;
        let columns = def.column_list();
        let loc = self
            .row_index
            .lookup(table, row_id)
            .ok_or_else(|| DbError::NotFound(format!("row {row_id} in {table}")))?;

        self.txns.lock_page(txn, loc.page_id, LockMode::Exclusive, DEFAULT_LOCK_TIMEOUT_MS)?;
        self.pool.fetch_page(loc.page_id)?;
        let (_, old_values) = self
            .pool
            .with_page(loc.page_id, |p| TablePage::get_record(p, loc.slot_index, &columns))??
            .ok_or_else(|| DbError::NotFound(format!("row {row_id} in {table}")))?;

        let fit_in_place = self
            .pool
            .with_page_mut(loc.page_id, |p| TablePage::update_record(p, &columns, loc.slot_index, new_values, txn))??;

        let new_location = if fit_in_place {
            self.pool.unpin_page(loc.page_id, true)?;
            loc
        } else {
            // Record grew past its slot: delete the old copy, insert a
            // fresh one (possibly on a different page), and repoint the
            // row index.
            self.pool.with_page_mut(loc.page_id, |p| TablePage::delete_record(p, loc.slot_index, txn))??;
            self.pool.unpin_page(loc.page_id, true)?;

            let record_size = TablePage::calculate_record_size(&columns, new_values)?;
            if record_size + 4 > TablePage::max_record_size() {
                return Err(DbError::OutOfSpace(format!("record of {record_size} bytes exceeds page capacity")));
            }
            let new_page_id = self.find_insertion_page(&def, record_size)?;
            self.txns.lock_page(txn, new_page_id, LockMode::Exclusive, DEFAULT_LOCK_TIMEOUT_MS)?;
            self.pool.fetch_page(new_page_id)?;
            let slot = self
                .pool
                .with_page_mut(new_page_id, |p| TablePage::insert_record(p, &columns, row_id, new_values, txn))??;
            self.pool.unpin_page(new_page_id, true)?;
            RowLocation { page_id: new_page_id, slot_index: slot }
        };
        self.row_index.update(table, row_id, new_location);

        self.txns.push_undo(
            txn,
            UndoRecord {
                op: UndoOp::Update,
                table_name: table.to_string(),
                page_id: loc.page_id,
                slot_index: loc.slot_index,
                row_id,
                old_values: Some(old_values),
            },
        )?;
        self.txns.append_mutation_wal(
            txn,
            WalRecordType::Update,
            MutationLocation { table_name: table.to_string(), page_id: new_location.page_id, slot_index: new_location.slot_index, row_id },
        )?;
        Ok(())
    }

    // ---- indexes ----

    pub fn create_index(&self, name: &str, table: &str, column: &str, unique: bool) -> Result<()> {
        let def = self.catalog.get_table(table)?;
        let col_idx = def
            .column_index(column)
            .ok_or_else(|| DbError::NotFound(format!("column {column} in {table}")))?;
        let key_type = def.columns[col_idx].data_type;
        if !crate::types::KeyComparator::is_indexable(key_type) {
            return Err(DbError::ConstraintViolation(format!("{key_type:?} is not an indexable type")));
        }

        let tree = BPlusTree::with_max_keys(self.pool.clone(), key_type, self.config.btree_max_keys as u16);
        for (row_id, values) in self.scan_table(table, INVALID_TXN_ID)? {
            tree.insert(&values[col_idx], row_id)?;
        }

        self.catalog.create_index(IndexDef {
            name: name.to_string(),
            table_name: table.to_string(),
            columns: vec![column.to_string()],
            kind: IndexKind::Btree,
            key_type: Some(key_type),
            unique,
            root_page_id: tree.root_page_id(),
        })
    }

    pub fn drop_index(&self, table: &str, index_name: &str) -> Result<()> {
        self.catalog.drop_index(table, index_name).map(|_| ())
    }

    fn open_tree(&self, table: &str, index_name: &str) -> Result<BPlusTree> {
        let idx = self.catalog.get_index(table, index_name)?;
        let key_type = idx.key_type.ok_or_else(|| DbError::NotImplemented(format!("{index_name} is not a btree index")))?;
        Ok(BPlusTree::open(self.pool.clone(), key_type, self.config.btree_max_keys as u16, idx.root_page_id))
    }

    pub fn index_search(&self, table: &str, index_name: &str, key: &Value) -> Result<Option<RowId>> {
        self.open_tree(table, index_name)?.search(key)
    }

    pub fn index_range(&self, table: &str, index_name: &str, lo: &Value, hi: &Value) -> Result<Vec<RowId>> {
        let tree = self.open_tree(table, index_name)?;
        Ok(tree.range(lo, hi)?.into_iter().map(|(_, row_id)| row_id).collect())
    }

    // ---- transactions ----

    pub fn begin(&self) -> Result<TransactionId> {
        self.txns.begin()
    }

    pub fn commit(&self, txn: TransactionId) -> Result<()> {
        self.txns.commit(txn)
    }

    pub fn abort(&self, txn: TransactionId) -> Result<()> {
        self.txns.abort(txn)
    }

    // ---- maintenance ----

    pub fn vacuum(&self, table: Option<&str>) -> Result<usize> {
        match table {
            Some(name) => {
                let def = self.catalog.get_table(name)?;
                let directory = SingleTable { name: name.to_string(), first_page_id: def.first_page_id };
                VacuumWorker::sweep_once(&self.pool, &self.txns, &directory)
            }
            None => VacuumWorker::sweep_once(&self.pool, &self.txns, self.catalog.as_ref()),
        }
    }

    pub fn analyze(&self, table: Option<&str>) -> Result<HashMap<String, TableStats>> {
        let names = match table {
            Some(t) => vec![t.to_string()],
            None => self.catalog.get_all_table_names(),
        };
        let mut out = HashMap::new();
        for name in names {
            let rows = self.scan_table(&name, INVALID_TXN_ID)?;
            let page_count = self.count_pages(&name)?;
            let values: Vec<Vec<Value>> = rows.into_iter().map(|(_, v)| v).collect();
            out.insert(name, StatisticsCollector::collect(&values, page_count));
        }
        Ok(out)
    }

    fn count_pages(&self, table: &str) -> Result<usize> {
        let def = self.catalog.get_table(table)?;
        let mut count = 0;
        let mut page_id = def.first_page_id;
        while page_id != INVALID_PAGE_ID {
            count += 1;
            self.pool.fetch_page(page_id)?;
            let next = self.pool.with_page(page_id, |p| p.header().next_page_id)?;
            self.pool.unpin_page(page_id, false)?;
            page_id = next;
        }
        Ok(count)
    }

    pub fn flush_all(&self) -> Result<()> {
        self.pool.flush_all()?;
        self.wal.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.flush_all()?;
        if let Some(worker) = self.vacuum.lock().take() {
            worker.shutdown();
        }
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}

struct SingleTable {
    name: String,
    first_page_id: PageId,
}

impl TableDirectory for SingleTable {
    fn table_first_pages(&self) -> Vec<(String, PageId)> {
        vec![(self.name.clone(), self.first_page_id)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;
    use crate::common::DataType;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> Config {
        Config { data_dir: dir.to_path_buf(), buffer_pool_pages: 32, wal_in_db: false, vacuum_interval_secs: 3600, btree_max_keys: 4 }
    }

    fn col(name: &str, ty: DataType) -> ColumnDef {
        ColumnDef { name: name.to_string(), data_type: ty, nullable: false, primary_key: false, auto_increment: false }
    }

    // S1: insert + commit is visible to a transaction begun afterward.
    #[test]
    fn s1_commit_then_scan_sees_the_row() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        db.create_table("users", vec![col("id", DataType::Int), col("name", DataType::Varchar(32))]).unwrap();

        let t1 = db.begin().unwrap();
        db.insert_tuple("users", &[Value::Int(1), Value::Varchar("a".into())], t1).unwrap();
        db.commit(t1).unwrap();

        let t2 = db.begin().unwrap();
        let rows = db.scan_table("users", t2).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, vec![Value::Int(1), Value::Varchar("a".into())]);
    }

    // S2: an uncommitted insert is invisible to another reader, visible after commit.
    #[test]
    fn s2_uncommitted_insert_invisible_until_commit() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        db.create_table("users", vec![col("id", DataType::Int)]).unwrap();

        let t1 = db.begin().unwrap();
        db.insert_tuple("users", &[Value::Int(1)], t1).unwrap();
        assert!(db.scan_table("users", INVALID_TXN_ID).unwrap().is_empty());

        db.commit(t1).unwrap();
        assert_eq!(db.scan_table("users", INVALID_TXN_ID).unwrap().len(), 1);
    }

    // S3: abort then vacuum leaves no visible row and a zeroed slot.
    #[test]
    fn s3_abort_then_vacuum_clears_the_row() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        db.create_table("users", vec![col("id", DataType::Int)]).unwrap();

        let t1 = db.begin().unwrap();
        db.insert_tuple("users", &[Value::Int(1)], t1).unwrap();
        db.abort(t1).unwrap();

        assert!(db.scan_table("users", INVALID_TXN_ID).unwrap().is_empty());
        let reclaimed = db.vacuum(Some("users")).unwrap();
        assert_eq!(reclaimed, 1);
    }

    #[test]
    fn update_in_place_preserves_row_id_and_visibility() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        db.create_table("users", vec![col("id", DataType::Int), col("name", DataType::Varchar(32))]).unwrap();

        let t1 = db.begin().unwrap();
        let row_id = db.insert_tuple("users", &[Value::Int(1), Value::Varchar("aaaaaaaa".into())], t1).unwrap();
        db.commit(t1).unwrap();

        let t2 = db.begin().unwrap();
        db.update_tuple("users", row_id, &[Value::Int(2), Value::Varchar("b".into())], t2).unwrap();
        db.commit(t2).unwrap();

        let rows = db.scan_table("users", INVALID_TXN_ID).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, row_id);
        assert_eq!(rows[0].1, vec![Value::Int(2), Value::Varchar("b".into())]);
    }

    #[test]
    fn delete_then_scan_omits_the_row() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        db.create_table("users", vec![col("id", DataType::Int)]).unwrap();

        let t1 = db.begin().unwrap();
        let row_id = db.insert_tuple("users", &[Value::Int(1)], t1).unwrap();
        db.commit(t1).unwrap();

        let t2 = db.begin().unwrap();
        db.delete_tuple("users", row_id, t2).unwrap();
        db.commit(t2).unwrap();

        assert!(db.scan_table("users", INVALID_TXN_ID).unwrap().is_empty());
    }

    #[test]
    fn index_search_and_range_after_create_index() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        db.create_table("users", vec![col("id", DataType::Int)]).unwrap();

        let t1 = db.begin().unwrap();
        for i in 1..=10 {
            db.insert_tuple("users", &[Value::Int(i)], t1).unwrap();
        }
        db.commit(t1).unwrap();

        db.create_index("users_id_idx", "users", "id", true).unwrap();
        assert_eq!(db.index_search("users", "users_id_idx", &Value::Int(5)).unwrap(), Some(5));
        let range = db.index_range("users", "users_id_idx", &Value::Int(3), &Value::Int(7)).unwrap();
        assert_eq!(range.len(), 5);
    }

    #[test]
    fn analyze_reports_row_count_and_min_max() {
        let dir = tempdir().unwrap();
        let db = Database::open(test_config(dir.path())).unwrap();
        db.create_table("users", vec![col("id", DataType::Int)]).unwrap();
        let t1 = db.begin().unwrap();
        for i in 1..=5 {
            db.insert_tuple("users", &[Value::Int(i)], t1).unwrap();
        }
        db.commit(t1).unwrap();

        let stats = db.analyze(Some("users")).unwrap();
        let users = &stats["users"];
        assert_eq!(users.row_count, 5);
        assert_eq!(users.columns[0].min, Some(Value::Int(1)));
        assert_eq!(users.columns[0].max, Some(Value::Int(5)));
    }

    // open_table reattaches a table's existing pages and rebuilds the row
    // index and row-id counter from a full scan, rather than trusting any
    // caller-supplied state about row locations.
    #[test]
    fn open_table_rebuilds_row_index_and_next_row_id_from_scan() {
        let dir = tempdir().unwrap();
        let first_page_id = {
            let db = Database::open(test_config(dir.path())).unwrap();
            db.create_table("users", vec![col("id", DataType::Int)]).unwrap();
            let first_page_id = db.catalog.get_table("users").unwrap().first_page_id;

            let t1 = db.begin().unwrap();
            for i in 1..=3 {
                db.insert_tuple("users", &[Value::Int(i)], t1).unwrap();
            }
            db.commit(t1).unwrap();
            db.flush_all().unwrap();
            std::mem::forget(db);
            first_page_id
        };

        let reopened = Database::open(test_config(dir.path())).unwrap();
        reopened.open_table("users", vec![col("id", DataType::Int)], first_page_id).unwrap();

        assert_eq!(reopened.scan_table("users", INVALID_TXN_ID).unwrap().len(), 3);
        for row_id in 1..=3 {
            assert!(reopened.row_index.lookup("users", row_id).is_some());
        }

        // A fresh insert must not collide with a row id already on disk.
        let t2 = reopened.begin().unwrap();
        let new_id = reopened.insert_tuple("users", &[Value::Int(4)], t2).unwrap();
        reopened.commit(t2).unwrap();
        assert_eq!(new_id, 4);
    }
}
