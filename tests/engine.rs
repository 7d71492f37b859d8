// End-to-end durability check: a transaction commits, the process is
// simulated to die without a clean shutdown, and reopening the storage and
// transaction layers against the same files still sees the committed rows.
//
// The catalog is explicitly not persisted by this crate (see DESIGN.md), so
// this drives the storage/WAL/transaction stack directly for the reopen
// half rather than through `Database::open`, which would hand back an empty
// catalog and mask the thing actually under test.

use qindb::buffer::BufferPool;
use qindb::catalog::ColumnDef;
use qindb::common::{DataType, Value, INVALID_PAGE_ID, INVALID_TXN_ID};
use qindb::storage::disk::DiskManager;
use qindb::storage::table_page::TablePage;
use qindb::transaction::manager::{SchemaLookup, TransactionManager};
use qindb::transaction::visibility::VisibilityChecker;
use qindb::transaction::wal::WalManager;
use qindb::{Config, Database};
use std::sync::Arc;

fn config(dir: &std::path::Path) -> Config {
    Config { data_dir: dir.to_path_buf(), ..Config::default() }
}

fn columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef { name: "id".into(), data_type: DataType::Int, nullable: false, primary_key: true, auto_increment: false },
        ColumnDef { name: "label".into(), data_type: DataType::Varchar(64), nullable: false, primary_key: false, auto_increment: false },
    ]
}

struct NoSchema;
impl SchemaLookup for NoSchema {
    fn columns(&self, _table_name: &str) -> Option<qindb::common::ColumnList> {
        None
    }
}

#[test]
fn committed_rows_survive_a_crash_without_clean_shutdown() {
    let dir = tempfile::tempdir().unwrap();

    {
        let db = Database::open(config(dir.path())).unwrap();
        // The data file is fresh, so `create_table` hands out the very
        // first page id (1) deterministically.
        db.create_table("widgets", columns()).unwrap();

        let txn = db.begin().unwrap();
        for i in 0..3 {
            db.insert_tuple("widgets", &[Value::Int(i), Value::Varchar(format!("w{i}"))], txn).unwrap();
        }
        db.commit(txn).unwrap();

        // Skip `Drop`'s `flush_all` so only the force-at-commit flush from
        // `TransactionManager::commit` is responsible for durability here.
        std::mem::forget(db);
    }

    let cfg = config(dir.path());
    let disk = Arc::new(DiskManager::open(cfg.database_path(), false, cfg.wal_in_db).unwrap());
    let pool = Arc::new(BufferPool::new(disk, cfg.buffer_pool_pages));
    let wal = Arc::new(WalManager::open(cfg.wal_path()).unwrap());
    let outcome = wal.recover().unwrap();
    let txns = TransactionManager::new(pool.clone(), wal, Arc::new(NoSchema));
    txns.seed_recovered(&outcome.committed, &outcome.aborted);

    let first_page_id = 1;
    let cols = vec![DataType::Int, DataType::Varchar(64)];
    let mut rows = Vec::new();
    let mut page_id = first_page_id;
    while page_id != INVALID_PAGE_ID {
        pool.fetch_page(page_id).unwrap();
        let (records, next) = pool
            .with_page(page_id, |p| (TablePage::get_all_records(p, &cols).unwrap(), p.header().next_page_id))
            .unwrap();
        pool.unpin_page(page_id, false).unwrap();
        for (header, values) in records {
            if VisibilityChecker::is_visible(&header, INVALID_TXN_ID, &txns) {
                rows.push(values);
            }
        }
        page_id = next;
    }

    assert_eq!(rows.len(), 3, "all three committed rows must survive the unclean restart");
}
