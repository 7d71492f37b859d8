//! Runtime configuration for a database instance.
//!
//! `Config` is constructed programmatically by whatever embeds this crate;
//! there is no TOML/env file loader here, matching the external
//! configuration layer described in the system overview.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the database file, WAL file, and catalog.
    pub data_dir: PathBuf,
    /// Number of 8 KiB frames the buffer pool holds.
    pub buffer_pool_pages: usize,
    /// If true, the WAL and catalog are stored in system tables inside the
    /// database file instead of sibling files. Not yet implemented; see
    /// DESIGN.md.
    pub wal_in_db: bool,
    /// Interval between background vacuum sweeps.
    pub vacuum_interval_secs: u64,
    /// Max keys per B+ tree node before a split.
    pub btree_max_keys: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_pool_pages: 16_384,
            wal_in_db: false,
            vacuum_interval_secs: 60,
            btree_max_keys: 200,
        }
    }
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("qindb.db")
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("qindb.wal")
    }
}
