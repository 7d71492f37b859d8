//! Write-ahead log: append-only record stream with a 28-byte header per
//! record, commit-before-ack durability, and redo-only recovery.
//!
//! Only the append-only-file backend is implemented; the alternative
//! backend (`sys_wal_logs`/`sys_wal_meta` tables inside the DB file) is
//! selected by the same magic bit the disk layer already tracks but has
//! no body here — see DESIGN.md.

use crate::common::{PageId, RowId, TransactionId};
use crate::error::{DbError, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

pub const WAL_HEADER_SIZE: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalRecordType {
    Insert = 1,
    Update = 2,
    Delete = 3,
    BeginTxn = 4,
    CommitTxn = 5,
    AbortTxn = 6,
    Checkpoint = 7,
}

impl WalRecordType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => WalRecordType::Insert,
            2 => WalRecordType::Update,
            3 => WalRecordType::Delete,
            4 => WalRecordType::BeginTxn,
            5 => WalRecordType::CommitTxn,
            6 => WalRecordType::AbortTxn,
            7 => WalRecordType::Checkpoint,
            _ => return None,
        })
    }

    pub fn is_data_mutation(&self) -> bool {
        matches!(self, WalRecordType::Insert | WalRecordType::Update | WalRecordType::Delete)
    }
}

/// Location of the tuple a data-mutation record touched; enough for
/// recovery to confirm the effect is already durable on the page.
#[derive(Debug, Clone)]
pub struct MutationLocation {
    pub table_name: String,
    pub page_id: PageId,
    pub slot_index: u16,
    pub row_id: RowId,
}

impl MutationLocation {
    fn encode(&self) -> Vec<u8> {
        let name = self.table_name.as_bytes();
        let mut buf = Vec::with_capacity(2 + name.len() + 4 + 2 + 8);
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(&self.page_id.to_le_bytes());
        buf.extend_from_slice(&self.slot_index.to_le_bytes());
        buf.extend_from_slice(&self.row_id.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(DbError::Corruption("truncated WAL mutation payload".into()));
        }
        let name_len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let mut at = 2;
        if buf.len() < at + name_len + 4 + 2 + 8 {
            return Err(DbError::Corruption("truncated WAL mutation payload".into()));
        }
        let table_name = String::from_utf8_lossy(&buf[at..at + name_len]).into_owned();
        at += name_len;
        let page_id = u32::from_le_bytes(buf[at..at + 4].try_into().unwrap());
        at += 4;
        let slot_index = u16::from_le_bytes(buf[at..at + 2].try_into().unwrap());
        at += 2;
        let row_id = u64::from_le_bytes(buf[at..at + 8].try_into().unwrap());
        Ok(MutationLocation { table_name, page_id, slot_index, row_id })
    }
}

#[derive(Debug, Clone)]
pub struct WalRecord {
    pub record_type: WalRecordType,
    pub txn_id: TransactionId,
    pub lsn: u64,
    pub payload: Vec<u8>,
}

impl WalRecord {
    fn checksum(record_type: WalRecordType, txn_id: TransactionId, lsn: u64, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[record_type as u8]);
        hasher.update(&txn_id.to_le_bytes());
        hasher.update(&lsn.to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; WAL_HEADER_SIZE];
        buf[0] = self.record_type as u8;
        buf[1] = 0;
        buf[2..4].copy_from_slice(&(self.payload.len() as u16).to_le_bytes());
        buf[4..12].copy_from_slice(&self.txn_id.to_le_bytes());
        buf[12..20].copy_from_slice(&self.lsn.to_le_bytes());
        let checksum = Self::checksum(self.record_type, self.txn_id, self.lsn, &self.payload);
        buf[20..24].copy_from_slice(&checksum.to_le_bytes());
        buf[24..28].copy_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    fn mutation(&self) -> Result<MutationLocation> {
        MutationLocation::decode(&self.payload)
    }
}

pub struct RecoveryOutcome {
    pub committed: HashSet<TransactionId>,
    pub aborted: HashSet<TransactionId>,
    /// Data-mutation records whose txn committed, in LSN order.
    pub redo: Vec<(WalRecord, MutationLocation)>,
}

pub struct WalManager {
    path: PathBuf,
    file: Mutex<File>,
    current_lsn: AtomicU64,
}

impl WalManager {
    /// Opens (creating if absent) the append-only WAL file and restores
    /// `currentLSN` by scanning to the highest LSN present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        let max_lsn = Self::scan(&path)?.into_iter().map(|r| r.lsn).max().unwrap_or(0);
        Ok(Self { path, file: Mutex::new(file), current_lsn: AtomicU64::new(max_lsn) })
    }

    /// The DB-table backend is not implemented; callers that see
    /// `wal_in_db` set should treat this as a fatal configuration error.
    pub fn open_in_db() -> Result<Self> {
        Err(DbError::NotImplemented("WAL-in-DB-table backend".into()))
    }

    fn next_lsn(&self) -> u64 {
        self.current_lsn.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn append_record(&self, record_type: WalRecordType, txn_id: TransactionId, payload: Vec<u8>) -> Result<u64> {
        let lsn = self.next_lsn();
        let record = WalRecord { record_type, txn_id, lsn, payload };
        let mut file = self.file.lock();
        file.write_all(&record.encode())?;
        Ok(lsn)
    }

    pub fn append_begin(&self, txn_id: TransactionId) -> Result<u64> {
        self.append_record(WalRecordType::BeginTxn, txn_id, Vec::new())
    }

    /// Commit records are flushed before returning, per the durability
    /// boundary the transaction manager relies on.
    pub fn append_commit(&self, txn_id: TransactionId) -> Result<u64> {
        let lsn = self.append_record(WalRecordType::CommitTxn, txn_id, Vec::new())?;
        self.flush()?;
        Ok(lsn)
    }

    pub fn append_abort(&self, txn_id: TransactionId) -> Result<u64> {
        self.append_record(WalRecordType::AbortTxn, txn_id, Vec::new())
    }

    pub fn append_checkpoint(&self) -> Result<u64> {
        self.append_record(WalRecordType::Checkpoint, 0, Vec::new())
    }

    pub fn append_mutation(&self, record_type: WalRecordType, txn_id: TransactionId, location: MutationLocation) -> Result<u64> {
        debug_assert!(record_type.is_data_mutation());
        self.append_record(record_type, txn_id, location.encode())
    }

    pub fn flush(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn scan(path: &Path) -> Result<Vec<WalRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let mut records = Vec::new();
        let mut at = 0usize;
        while at + WAL_HEADER_SIZE <= bytes.len() {
            let header = &bytes[at..at + WAL_HEADER_SIZE];
            let record_type = match WalRecordType::from_u8(header[0]) {
                Some(t) => t,
                None => {
                    warn!(offset = at, "WAL scan stopped: unknown record type");
                    break;
                }
            };
            let data_size = u16::from_le_bytes([header[2], header[3]]) as usize;
            let txn_id = u64::from_le_bytes(header[4..12].try_into().unwrap());
            let lsn = u64::from_le_bytes(header[12..20].try_into().unwrap());
            let checksum = u32::from_le_bytes(header[20..24].try_into().unwrap());
            if at + WAL_HEADER_SIZE + data_size > bytes.len() {
                warn!(offset = at, "WAL scan stopped: truncated record");
                break;
            }
            let payload = bytes[at + WAL_HEADER_SIZE..at + WAL_HEADER_SIZE + data_size].to_vec();
            if WalRecord::checksum(record_type, txn_id, lsn, &payload) != checksum {
                warn!(offset = at, "WAL scan stopped: checksum mismatch");
                break;
            }
            at += WAL_HEADER_SIZE + data_size;
            records.push(WalRecord { record_type, txn_id, lsn, payload });
        }
        Ok(records)
    }

    /// Reads the whole log in LSN order, builds the committed/aborted
    /// sets, and returns the data-mutation records belonging to committed
    /// transactions for the caller's redo pass.
    pub fn recover(&self) -> Result<RecoveryOutcome> {
        let mut records = Self::scan(&self.path)?;
        records.sort_by_key(|r| r.lsn);

        let mut committed = HashSet::new();
        let mut aborted = HashSet::new();
        for r in &records {
            match r.record_type {
                WalRecordType::CommitTxn => { committed.insert(r.txn_id); }
                WalRecordType::AbortTxn => { aborted.insert(r.txn_id); }
                _ => {}
            }
        }

        let mut redo = Vec::new();
        for r in records {
            if r.record_type.is_data_mutation() && committed.contains(&r.txn_id) {
                let loc = r.mutation()?;
                redo.push((r.clone(), loc));
            }
        }
        Ok(RecoveryOutcome { committed, aborted, redo })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lsn_restored_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = WalManager::open(&path).unwrap();
            wal.append_begin(1).unwrap();
            wal.append_commit(1).unwrap();
        }
        let wal = WalManager::open(&path).unwrap();
        assert_eq!(wal.next_lsn(), 3);
    }

    #[test]
    fn recover_classifies_committed_and_aborted_and_redoes_only_committed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let wal = WalManager::open(&path).unwrap();

        wal.append_begin(1).unwrap();
        wal.append_mutation(
            WalRecordType::Insert,
            1,
            MutationLocation { table_name: "users".into(), page_id: 5, slot_index: 0, row_id: 1 },
        )
        .unwrap();
        wal.append_commit(1).unwrap();

        wal.append_begin(2).unwrap();
        wal.append_mutation(
            WalRecordType::Insert,
            2,
            MutationLocation { table_name: "users".into(), page_id: 5, slot_index: 1, row_id: 2 },
        )
        .unwrap();
        wal.append_abort(2).unwrap();

        let outcome = wal.recover().unwrap();
        assert!(outcome.committed.contains(&1));
        assert!(outcome.aborted.contains(&2));
        assert_eq!(outcome.redo.len(), 1);
        assert_eq!(outcome.redo[0].1.row_id, 1);
    }

    #[test]
    fn truncated_trailing_record_is_dropped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = WalManager::open(&path).unwrap();
            wal.append_begin(1).unwrap();
            wal.append_commit(1).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[9, 0, 0, 0]).unwrap(); // partial garbage header
        }
        let wal = WalManager::open(&path).unwrap();
        let outcome = wal.recover().unwrap();
        assert!(outcome.committed.contains(&1));
    }
}
