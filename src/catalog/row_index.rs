//! In-memory `RowId -> (PageId, slot)` map, populated incrementally as
//! rows are inserted/updated and rebuilt from a full page-chain scan by
//! `Database::open_table` when a table with existing pages is reattached.
//! One map per table, keyed by table name here rather than split into
//! per-table instances, since the engine only ever needs a single
//! process-wide index.

use crate::common::{PageId, RowId};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    pub page_id: PageId,
    pub slot_index: u16,
}

#[derive(Default)]
pub struct RowIdIndex {
    index: RwLock<HashMap<(String, RowId), RowLocation>>,
}

impl RowIdIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, row_id: RowId, location: RowLocation) {
        self.index.write().insert((table.to_string(), row_id), location);
    }

    pub fn remove(&self, table: &str, row_id: RowId) {
        self.index.write().remove(&(table.to_string(), row_id));
    }

    pub fn lookup(&self, table: &str, row_id: RowId) -> Option<RowLocation> {
        self.index.read().get(&(table.to_string(), row_id)).copied()
    }

    pub fn update(&self, table: &str, row_id: RowId, new_location: RowLocation) -> bool {
        let mut index = self.index.write();
        match index.get_mut(&(table.to_string(), row_id)) {
            Some(loc) => {
                *loc = new_location;
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.index.write().clear();
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_update_remove_round_trip() {
        let idx = RowIdIndex::new();
        idx.insert("users", 1, RowLocation { page_id: 3, slot_index: 0 });
        assert_eq!(idx.lookup("users", 1), Some(RowLocation { page_id: 3, slot_index: 0 }));
        assert!(idx.update("users", 1, RowLocation { page_id: 3, slot_index: 1 }));
        assert_eq!(idx.lookup("users", 1).unwrap().slot_index, 1);
        idx.remove("users", 1);
        assert_eq!(idx.lookup("users", 1), None);
    }
}
