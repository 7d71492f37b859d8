//! Page-level shared/exclusive lock table.
//!
//! One mutex guards the whole table; `lock_page` retries under it with a
//! short, jittered sleep between attempts rather than parking on a
//! condvar, matching the "blocks by repeatedly retrying" contract this
//! core implements. Deadlock detection is by timeout only.

use crate::common::{PageId, TransactionId};
use crate::transaction::types::LockMode;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

struct PageLock {
    holders: HashMap<TransactionId, LockMode>,
}

impl PageLock {
    fn new() -> Self {
        Self { holders: HashMap::new() }
    }

    fn is_free_for(&self, txn: TransactionId, mode: LockMode) -> bool {
        self.holders.iter().all(|(&holder, &held)| {
            holder == txn || (held == LockMode::Shared && mode == LockMode::Shared)
        })
    }

    /// An upgrade from S to X is allowed only if `txn` is the sole holder.
    fn can_upgrade(&self, txn: TransactionId) -> bool {
        self.holders.len() == 1 && self.holders.contains_key(&txn)
    }
}

const RETRY_INTERVAL_MS: u64 = 2;
const RETRY_JITTER_MS: u64 = 1;

pub struct LockManager {
    table: Mutex<HashMap<PageId, PageLock>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self { table: Mutex::new(HashMap::new()) }
    }

    /// Blocks (by polling) until `mode` can be granted on `page` to `txn`,
    /// or until `timeout_ms` elapses (`0` means wait forever). Returns
    /// `false` on timeout rather than an error, per the manager's contract.
    pub fn lock_page(&self, txn: TransactionId, page: PageId, mode: LockMode, timeout_ms: u64) -> bool {
        let deadline = (timeout_ms != 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));
        loop {
            {
                let mut table = self.table.lock();
                let entry = table.entry(page).or_insert_with(PageLock::new);
                match entry.holders.get(&txn) {
                    Some(&LockMode::Exclusive) => return true,
                    Some(&LockMode::Shared) if mode == LockMode::Shared => return true,
                    Some(&LockMode::Shared) => {
                        // upgrade S -> X
                        if entry.can_upgrade(txn) {
                            entry.holders.insert(txn, LockMode::Exclusive);
                            return true;
                        }
                    }
                    None => {
                        if entry.is_free_for(txn, mode) {
                            entry.holders.insert(txn, mode);
                            return true;
                        }
                    }
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return false;
                }
            }
            let jitter = rand::rng().random_range(0..=RETRY_JITTER_MS);
            thread::sleep(Duration::from_millis(RETRY_INTERVAL_MS + jitter));
        }
    }

    pub fn unlock_page(&self, txn: TransactionId, page: PageId) {
        let mut table = self.table.lock();
        if let Some(entry) = table.get_mut(&page) {
            entry.holders.remove(&txn);
            if entry.holders.is_empty() {
                table.remove(&page);
            }
        }
    }

    /// Releases every lock `txn` holds, across all pages, atomically with
    /// respect to other lock operations.
    pub fn release_all(&self, txn: TransactionId, pages: impl IntoIterator<Item = PageId>) {
        let mut table = self.table.lock();
        for page in pages {
            if let Some(entry) = table.get_mut(&page) {
                entry.holders.remove(&txn);
                if entry.holders.is_empty() {
                    table.remove(&page);
                }
            }
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
