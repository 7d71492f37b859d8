//! Owns the database file: page-indexed reads/writes, monotonic page
//! allocation, and the 8-byte magic header.

use crate::common::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::error::{DbError, Result};
use crate::storage::page::Page;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// `"QINDB"` left-aligned in the low 5 bytes, mode bits in the high byte.
const MAGIC_BASE: u64 = 0x0000_0051_4442_4e49;
const MAGIC_BASE_MASK: u64 = 0x00ff_ffff_ffff_ffff;
const MODE_WAL_IN_DB: u8 = 0x01;
const MODE_CATALOG_IN_DB: u8 = 0x02;

fn encode_magic(catalog_in_db: bool, wal_in_db: bool) -> u64 {
    let mode = (if catalog_in_db { MODE_CATALOG_IN_DB } else { 0 })
        | (if wal_in_db { MODE_WAL_IN_DB } else { 0 });
    MAGIC_BASE | ((mode as u64) << 56)
}

fn decode_magic(magic: u64) -> (bool, bool) {
    let mode = ((magic >> 56) & 0xff) as u8;
    (mode & MODE_CATALOG_IN_DB != 0, mode & MODE_WAL_IN_DB != 0)
}

fn is_valid_magic(magic: u64) -> bool {
    magic & MAGIC_BASE_MASK == MAGIC_BASE
}

struct Inner {
    file: File,
    num_pages: u32,
    next_page_id: PageId,
}

/// Owns a single open database file. All operations are serialized behind
/// one mutex.
pub struct DiskManager {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl DiskManager {
    /// Opens `path`, creating it (with a fresh magic header) if absent.
    pub fn open(path: impl AsRef<Path>, catalog_in_db: bool, wal_in_db: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let num_pages;
        if existed && file.metadata()?.len() >= 8 {
            let mut magic_bytes = [0u8; 8];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut magic_bytes)?;
            let magic = u64::from_le_bytes(magic_bytes);
            if !is_valid_magic(magic) {
                return Err(DbError::Corruption(format!(
                    "bad magic in {}: {magic:#x}",
                    path.display()
                )));
            }
            let (got_catalog, got_wal) = decode_magic(magic);
            if got_catalog != catalog_in_db || got_wal != wal_in_db {
                warn!(
                    path = %path.display(),
                    "storage mode mismatch on reopen: file has catalog_in_db={got_catalog} wal_in_db={got_wal}, \
                     requested catalog_in_db={catalog_in_db} wal_in_db={wal_in_db}"
                );
            }
            let data_len = file.metadata()?.len() - 8;
            num_pages = (data_len / PAGE_SIZE as u64) as u32;
        } else {
            file.set_len(8)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&encode_magic(catalog_in_db, wal_in_db).to_le_bytes())?;
            file.flush()?;
            num_pages = 0;
        }

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file,
                num_pages,
                next_page_id: num_pages + 1,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset_of(page_id: PageId) -> u64 {
        8 + (page_id as u64 - 1) * PAGE_SIZE as u64
    }

    /// Reads page `id` into a fresh [`Page`]. Fails with `Corruption` on an
    /// out-of-range ID or a short read.
    pub fn read_page(&self, id: PageId) -> Result<Page> {
        let mut inner = self.inner.lock();
        if id == INVALID_PAGE_ID || id > inner.num_pages {
            return Err(DbError::Corruption(format!(
                "read_page: page {id} out of range (num_pages={})",
                inner.num_pages
            )));
        }
        let mut buf = [0u8; PAGE_SIZE];
        inner.file.seek(SeekFrom::Start(Self::offset_of(id)))?;
        inner.file.read_exact(&mut buf).map_err(|e| {
            DbError::Corruption(format!("short read for page {id}: {e}"))
        })?;
        debug!(page_id = id, "read page from disk");
        Ok(Page::from_bytes(buf))
    }

    /// Writes `page`'s buffer to slot `id`, extending the file with
    /// zero-filled pages if `id` is beyond the current end.
    pub fn write_page(&self, id: PageId, page: &Page) -> Result<()> {
        let mut inner = self.inner.lock();
        if id == INVALID_PAGE_ID {
            return Err(DbError::Internal("write_page: invalid page id 0".into()));
        }
        if id > inner.num_pages {
            let grow_by = id - inner.num_pages;
            Self::extend(&mut inner, grow_by)?;
        }
        inner.file.seek(SeekFrom::Start(Self::offset_of(id)))?;
        inner.file.write_all(page.data())?;
        debug!(page_id = id, "wrote page to disk");
        Ok(())
    }

    fn extend(inner: &mut Inner, num_new_pages: u32) -> Result<()> {
        let zero = [0u8; PAGE_SIZE];
        inner
            .file
            .seek(SeekFrom::Start(8 + inner.num_pages as u64 * PAGE_SIZE as u64))?;
        for _ in 0..num_new_pages {
            inner.file.write_all(&zero)?;
        }
        inner.num_pages += num_new_pages;
        Ok(())
    }

    /// Returns the next unused [`PageId`] and extends the file by one
    /// zero-filled page. Allocation is monotonic; deallocated IDs are not
    /// reused.
    pub fn allocate(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let id = inner.next_page_id;
        Self::extend(&mut inner, 1)?;
        inner.next_page_id += 1;
        Ok(id)
    }

    /// Records `id` as freed. The core does not currently reuse page IDs
    /// (documented limitation); this exists so callers and statistics can
    /// observe the fact of deallocation.
    pub fn deallocate(&self, _id: PageId) -> Result<()> {
        Ok(())
    }

    /// Forces the OS-level write buffer to stable storage.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_data()?;
        Ok(())
    }

    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    pub fn read_magic(&self) -> Result<(bool, bool)> {
        let mut inner = self.inner.lock();
        let mut bytes = [0u8; 8];
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.read_exact(&mut bytes)?;
        let magic = u64::from_le_bytes(bytes);
        if !is_valid_magic(magic) {
            return Err(DbError::Corruption(format!("bad magic: {magic:#x}")));
        }
        Ok(decode_magic(magic))
    }

    pub fn write_magic(&self, catalog_in_db: bool, wal_in_db: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(0))?;
        inner
            .file
            .write_all(&encode_magic(catalog_in_db, wal_in_db).to_le_bytes())?;
        inner.file.flush()?;
        Ok(())
    }
}
