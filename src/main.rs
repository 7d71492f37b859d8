//! qindb-shell: opens a database at a directory given on the command
//! line (or `./data`) and runs a fixed smoke sequence so the core can
//! be exercised without a SQL front end.

use qindb::catalog::ColumnDef;
use qindb::common::{DataType, Value};
use qindb::{Config, Database};
use std::path::PathBuf;
use tracing::info;

fn main() -> qindb::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let data_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data"));

    print_banner(&data_dir);

    let config = Config { data_dir, ..Config::default() };
    let db = Database::open(config)?;
    info!("database opened");

    if !db_has_table(&db, "greeting") {
        db.create_table(
            "greeting",
            vec![
                ColumnDef { name: "id".into(), data_type: DataType::Int, nullable: false, primary_key: true, auto_increment: false },
                ColumnDef { name: "message".into(), data_type: DataType::Varchar(255), nullable: false, primary_key: false, auto_increment: false },
            ],
        )?;
    }

    let txn = db.begin()?;
    db.insert_tuple("greeting", &[Value::Int(1), Value::Varchar("hello from qindb".into())], txn)?;
    db.commit(txn)?;

    for (row_id, values) in db.scan_table("greeting", 0)? {
        println!("row {row_id}: {values:?}");
    }

    db.close()?;
    info!("database closed");
    Ok(())
}

fn db_has_table(_db: &Database, _name: &str) -> bool {
    // Every process start is a fresh, empty catalog (persistence is
    // external to this core), so this is always false today; kept as
    // the hook an embedder's catalog-reload step would fill in.
    false
}

fn print_banner(data_dir: &std::path::Path) {
    println!("qindb storage and transaction core");
    println!("data directory: {}", data_dir.display());
    println!();
}
