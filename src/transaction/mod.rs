//! Transactions, page locking, the write-ahead log, MVCC visibility, and
//! background vacuum.

pub mod locks;
pub mod manager;
pub mod types;
pub mod vacuum;
pub mod visibility;
pub mod wal;

pub use locks::LockManager;
pub use manager::{SchemaLookup, TransactionManager};
pub use types::{LockMode, Transaction, TransactionState, UndoOp, UndoRecord};
pub use vacuum::{TableDirectory, VacuumWorker};
pub use visibility::VisibilityChecker;
pub use wal::{MutationLocation, WalManager, WalRecord, WalRecordType};
