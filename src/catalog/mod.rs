//! In-memory table and index metadata. Persistence is external: this
//! struct exists only to be consulted (and mutated) by the engine facade
//! while the process is up.

pub mod row_index;

use crate::common::{ColumnList, DataType, IndexKind, PageId, RowId, INVALID_PAGE_ID};
use crate::error::{DbError, Result};
use crate::transaction::manager::SchemaLookup;
use crate::transaction::vacuum::TableDirectory;
use parking_lot::Mutex;
use std::collections::HashMap;

pub use row_index::{RowIdIndex, RowLocation};

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub table_name: String,
    pub columns: Vec<String>,
    pub kind: IndexKind,
    /// Only meaningful for `Btree`; the serialized key type for the
    /// (single, for now) indexed column.
    pub key_type: Option<DataType>,
    pub unique: bool,
    pub root_page_id: PageId,
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub first_page_id: PageId,
    pub next_row_id: RowId,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn column_list(&self) -> ColumnList {
        self.columns.iter().map(|c| c.data_type).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Table and index definitions behind a single mutex, per the
/// lock-ordering rule that the catalog sits above every other subsystem
/// lock and is released before any of them is taken for a mutation.
pub struct Catalog {
    tables: Mutex<HashMap<String, TableDef>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self { tables: Mutex::new(HashMap::new()) }
    }

    pub fn create_table(&self, name: &str, columns: Vec<ColumnDef>, first_page_id: PageId) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.contains_key(name) {
            return Err(DbError::DuplicateKey(format!("table {name} already exists")));
        }
        tables.insert(
            name.to_string(),
            TableDef { name: name.to_string(), columns, first_page_id, next_row_id: 1, indexes: Vec::new() },
        );
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<TableDef> {
        self.tables.lock().remove(name).ok_or_else(|| DbError::NotFound(format!("table {name}")))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.lock().contains_key(name)
    }

    pub fn get_table(&self, name: &str) -> Result<TableDef> {
        self.tables.lock().get(name).cloned().ok_or_else(|| DbError::NotFound(format!("table {name}")))
    }

    pub fn get_all_table_names(&self) -> Vec<String> {
        self.tables.lock().keys().cloned().collect()
    }

    /// Allocates the next row id for `table` and advances the counter.
    pub fn next_row_id(&self, table: &str) -> Result<RowId> {
        let mut tables = self.tables.lock();
        let def = tables.get_mut(table).ok_or_else(|| DbError::NotFound(format!("table {table}")))?;
        let id = def.next_row_id;
        def.next_row_id += 1;
        Ok(id)
    }

    /// Raises `table`'s next-row-id counter to `at_least` if it isn't
    /// already there. Used when a table is reattached to pre-existing
    /// pages so freshly inserted rows never reuse an id already on disk.
    pub fn bump_next_row_id(&self, table: &str, at_least: RowId) -> Result<()> {
        let mut tables = self.tables.lock();
        let def = tables.get_mut(table).ok_or_else(|| DbError::NotFound(format!("table {table}")))?;
        if def.next_row_id < at_least {
            def.next_row_id = at_least;
        }
        Ok(())
    }

    pub fn create_index(&self, index: IndexDef) -> Result<()> {
        let mut tables = self.tables.lock();
        let def = tables
            .get_mut(&index.table_name)
            .ok_or_else(|| DbError::NotFound(format!("table {}", index.table_name)))?;
        if def.indexes.iter().any(|i| i.name == index.name) {
            return Err(DbError::DuplicateKey(format!("index {} already exists", index.name)));
        }
        def.indexes.push(index);
        Ok(())
    }

    pub fn drop_index(&self, table_name: &str, index_name: &str) -> Result<IndexDef> {
        let mut tables = self.tables.lock();
        let def = tables.get_mut(table_name).ok_or_else(|| DbError::NotFound(format!("table {table_name}")))?;
        let pos = def
            .indexes
            .iter()
            .position(|i| i.name == index_name)
            .ok_or_else(|| DbError::NotFound(format!("index {index_name}")))?;
        Ok(def.indexes.remove(pos))
    }

    pub fn get_index(&self, table_name: &str, index_name: &str) -> Result<IndexDef> {
        let tables = self.tables.lock();
        let def = tables.get(table_name).ok_or_else(|| DbError::NotFound(format!("table {table_name}")))?;
        def.indexes
            .iter()
            .find(|i| i.name == index_name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("index {index_name}")))
    }

    pub fn get_table_indexes(&self, table_name: &str) -> Result<Vec<IndexDef>> {
        let tables = self.tables.lock();
        tables
            .get(table_name)
            .map(|d| d.indexes.clone())
            .ok_or_else(|| DbError::NotFound(format!("table {table_name}")))
    }

    /// Records a B+ tree's root page id after it changes (e.g. the first
    /// insert allocates the root, or a root split/merge replaces it).
    pub fn set_index_root(&self, table_name: &str, index_name: &str, root_page_id: PageId) -> Result<()> {
        let mut tables = self.tables.lock();
        let def = tables.get_mut(table_name).ok_or_else(|| DbError::NotFound(format!("table {table_name}")))?;
        let index = def
            .indexes
            .iter_mut()
            .find(|i| i.name == index_name)
            .ok_or_else(|| DbError::NotFound(format!("index {index_name}")))?;
        index.root_page_id = root_page_id;
        Ok(())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaLookup for Catalog {
    fn columns(&self, table_name: &str) -> Option<ColumnList> {
        self.tables.lock().get(table_name).map(|d| d.column_list())
    }
}

impl TableDirectory for Catalog {
    fn table_first_pages(&self) -> Vec<(String, PageId)> {
        self.tables
            .lock()
            .values()
            .filter(|d| d.first_page_id != INVALID_PAGE_ID)
            .map(|d| (d.name.clone(), d.first_page_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: DataType) -> ColumnDef {
        ColumnDef { name: name.to_string(), data_type: ty, nullable: false, primary_key: false, auto_increment: false }
    }

    #[test]
    fn create_then_get_table_round_trips() {
        let catalog = Catalog::new();
        catalog.create_table("users", vec![col("id", DataType::Int)], 1).unwrap();
        let def = catalog.get_table("users").unwrap();
        assert_eq!(def.columns.len(), 1);
        assert_eq!(def.next_row_id, 1);
    }

    #[test]
    fn create_table_twice_is_duplicate_key() {
        let catalog = Catalog::new();
        catalog.create_table("users", vec![col("id", DataType::Int)], 1).unwrap();
        assert!(matches!(catalog.create_table("users", vec![], 1), Err(DbError::DuplicateKey(_))));
    }

    #[test]
    fn next_row_id_is_monotonic_per_table() {
        let catalog = Catalog::new();
        catalog.create_table("users", vec![col("id", DataType::Int)], 1).unwrap();
        assert_eq!(catalog.next_row_id("users").unwrap(), 1);
        assert_eq!(catalog.next_row_id("users").unwrap(), 2);
    }

    #[test]
    fn create_index_then_drop_round_trips() {
        let catalog = Catalog::new();
        catalog.create_table("users", vec![col("id", DataType::Int)], 1).unwrap();
        catalog
            .create_index(IndexDef {
                name: "users_id_idx".into(),
                table_name: "users".into(),
                columns: vec!["id".into()],
                kind: IndexKind::Btree,
                key_type: Some(DataType::Int),
                unique: true,
                root_page_id: INVALID_PAGE_ID,
            })
            .unwrap();
        assert_eq!(catalog.get_table_indexes("users").unwrap().len(), 1);
        catalog.drop_index("users", "users_id_idx").unwrap();
        assert!(catalog.get_table_indexes("users").unwrap().is_empty());
    }

    #[test]
    fn drop_table_removes_it() {
        let catalog = Catalog::new();
        catalog.create_table("users", vec![col("id", DataType::Int)], 1).unwrap();
        catalog.drop_table("users").unwrap();
        assert!(!catalog.table_exists("users"));
    }
}
