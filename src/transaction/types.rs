//! The transaction record itself: state, lock set, and undo log.

use crate::common::{PageId, RowId, TransactionId, Value};
use std::collections::HashSet;
use std::time::Instant;

/// Every transaction starts `Active` and ends in exactly one of the other
/// two states; there is no path back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// Page-level lock strength. `Shared` locks are mutually compatible;
/// everything else conflicts, including `Exclusive` with itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        }
    }
}

/// The mutation an [`UndoRecord`] reverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOp {
    Insert,
    Update,
    Delete,
}

/// One entry of a transaction's undo log, enough to reverse a single
/// mutation without replaying the WAL. `old_values` is populated for
/// `Update` (the pre-image) and unused otherwise. Undo is applied
/// in-process against live pages on abort, never against the WAL, so
/// there is no LSN to carry here.
#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub op: UndoOp,
    pub table_name: String,
    pub page_id: PageId,
    pub slot_index: u16,
    pub row_id: RowId,
    pub old_values: Option<Vec<Value>>,
}

/// A single transaction's lifecycle state, held lock set, and undo log.
/// Owned by the [`super::manager::TransactionManager`]'s transaction table.
#[derive(Debug)]
pub struct Transaction {
    pub id: TransactionId,
    pub state: TransactionState,
    pub start_time: Instant,
    pub locked_pages: HashSet<PageId>,
    pub undo_log: Vec<UndoRecord>,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            start_time: Instant::now(),
            locked_pages: HashSet::new(),
            undo_log: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn push_undo(&mut self, record: UndoRecord) {
        self.undo_log.push(record);
    }
}
