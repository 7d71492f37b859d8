//! Fixed-size frame array with Clock (second-chance) replacement.
//!
//! Each frame's page lives behind its own lock; access goes through a
//! closure so the borrow never outlives the lock — deserializing into an
//! owned value severs it. `fetchPage(id) -> &Page` becomes `with_page` /
//! `with_page_mut` here, with an explicit `unpin_page` closing the loan.

use crate::common::{PageId, INVALID_PAGE_ID};
use crate::error::{DbError, Result};
use crate::storage::disk::DiskManager;
use crate::storage::page::Page;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

struct FrameMeta {
    page_id: PageId,
    ref_bit: bool,
}

struct Table {
    page_table: HashMap<PageId, usize>,
    metas: Vec<FrameMeta>,
    free_list: Vec<usize>,
    clock_hand: usize,
    hit_count: u64,
    miss_count: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BufferPoolStats {
    pub pool_size: usize,
    pub occupied: usize,
    pub dirty: usize,
    pub pinned: usize,
    pub hit_count: u64,
    pub miss_count: u64,
}

/// Caches [`Page`]s in a fixed-size frame array. A single mutex serializes
/// the page table, free list, and clock hand; each frame's page data sits
/// behind its own mutex so readers/writers don't contend for the table
/// lock while copying bytes in or out.
pub struct BufferPool {
    disk: Arc<DiskManager>,
    frames: Vec<Mutex<Page>>,
    table: Mutex<Table>,
}

impl BufferPool {
    pub fn new(disk: Arc<DiskManager>, pool_size: usize) -> Self {
        let frames = (0..pool_size).map(|_| Mutex::new(Page::new())).collect();
        let metas = (0..pool_size)
            .map(|_| FrameMeta { page_id: INVALID_PAGE_ID, ref_bit: false })
            .collect();
        Self {
            disk,
            frames,
            table: Mutex::new(Table {
                page_table: HashMap::new(),
                metas,
                free_list: (0..pool_size).collect(),
                clock_hand: 0,
                hit_count: 0,
                miss_count: 0,
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Loads `id` if not already resident and pins it. Access its bytes
    /// through [`Self::with_page`] / [`Self::with_page_mut`]; release the
    /// pin with [`Self::unpin_page`].
    pub fn fetch_page(&self, id: PageId) -> Result<PageId> {
        let mut table = self.table.lock();
        if let Some(&idx) = table.page_table.get(&id) {
            table.hit_count += 1;
            table.metas[idx].ref_bit = true;
            self.frames[idx].lock().pin();
            trace!(page_id = id, "buffer pool hit");
            return Ok(id);
        }
        table.miss_count += 1;
        let idx = self.find_frame(&mut table)?;
        self.evict_if_occupied(&mut table, idx)?;

        let page = self.disk.read_page(id)?;
        {
            let mut frame = self.frames[idx].lock();
            *frame = page;
            frame.pin();
        }
        table.metas[idx] = FrameMeta { page_id: id, ref_bit: true };
        table.page_table.insert(id, idx);
        debug!(page_id = id, frame = idx, "buffer pool miss, loaded from disk");
        Ok(id)
    }

    /// Allocates a new on-disk page, installs it pinned in a frame, and
    /// returns its id.
    pub fn new_page(&self) -> Result<PageId> {
        let id = self.disk.allocate()?;
        let mut table = self.table.lock();
        let idx = self.find_frame(&mut table)?;
        self.evict_if_occupied(&mut table, idx)?;

        {
            let mut frame = self.frames[idx].lock();
            *frame = Page::new();
            frame.pin();
        }
        table.metas[idx] = FrameMeta { page_id: id, ref_bit: true };
        table.page_table.insert(id, idx);
        Ok(id)
    }

    fn evict_if_occupied(&self, table: &mut Table, idx: usize) -> Result<()> {
        let old_id = table.metas[idx].page_id;
        if old_id != INVALID_PAGE_ID {
            self.writeback_if_dirty(idx, old_id)?;
            table.page_table.remove(&old_id);
        }
        Ok(())
    }

    /// Finds a victim frame via Clock, scanning at most twice the pool
    /// size before giving up with `BufferFull`.
    fn find_frame(&self, table: &mut Table) -> Result<usize> {
        if let Some(idx) = table.free_list.pop() {
            return Ok(idx);
        }
        let n = self.frames.len();
        if n == 0 {
            return Err(DbError::BufferFull);
        }
        for _ in 0..(2 * n) {
            let idx = table.clock_hand;
            table.clock_hand = (table.clock_hand + 1) % n;
            if self.frames[idx].lock().pin_count() > 0 {
                continue;
            }
            if table.metas[idx].ref_bit {
                table.metas[idx].ref_bit = false;
                continue;
            }
            return Ok(idx);
        }
        warn!("buffer pool exhausted: no unpinned frame after two sweeps");
        Err(DbError::BufferFull)
    }

    fn writeback_if_dirty(&self, idx: usize, page_id: PageId) -> Result<()> {
        let mut page = self.frames[idx].lock();
        if page.is_dirty() {
            page.update_checksum();
            self.disk.write_page(page_id, &page)?;
            page.clear_dirty();
        }
        Ok(())
    }

    fn frame_index(&self, id: PageId) -> Result<usize> {
        self.table
            .lock()
            .page_table
            .get(&id)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("page {id} not resident")))
    }

    pub fn with_page<R>(&self, id: PageId, f: impl FnOnce(&Page) -> R) -> Result<R> {
        let idx = self.frame_index(id)?;
        Ok(f(&self.frames[idx].lock()))
    }

    pub fn with_page_mut<R>(&self, id: PageId, f: impl FnOnce(&mut Page) -> R) -> Result<R> {
        let idx = self.frame_index(id)?;
        Ok(f(&mut self.frames[idx].lock()))
    }

    /// Decrements the pin count. `dirty=true` sets the dirty flag;
    /// `dirty=false` never clears one already set.
    pub fn unpin_page(&self, id: PageId, dirty: bool) -> Result<()> {
        let idx = self.frame_index(id)?;
        let mut page = self.frames[idx].lock();
        page.unpin();
        page.mark_dirty(dirty);
        Ok(())
    }

    pub fn flush_page(&self, id: PageId) -> Result<()> {
        let idx = self.frame_index(id)?;
        self.writeback_if_dirty(idx, id)
    }

    pub fn flush_all(&self) -> Result<()> {
        let table = self.table.lock();
        for (&page_id, &idx) in table.page_table.iter() {
            self.writeback_if_dirty(idx, page_id)?;
        }
        Ok(())
    }

    /// Evicts `id`'s frame, if resident, and tells the disk manager the
    /// page is free. Fails if the page is still pinned.
    pub fn delete_page(&self, id: PageId) -> Result<()> {
        let mut table = self.table.lock();
        if let Some(&idx) = table.page_table.get(&id) {
            if self.frames[idx].lock().pin_count() > 0 {
                return Err(DbError::Internal(format!("cannot delete pinned page {id}")));
            }
            table.page_table.remove(&id);
            *self.frames[idx].lock() = Page::new();
            table.metas[idx] = FrameMeta { page_id: INVALID_PAGE_ID, ref_bit: false };
            table.free_list.push(idx);
        }
        drop(table);
        self.disk.deallocate(id)
    }

    pub fn stats(&self) -> BufferPoolStats {
        let table = self.table.lock();
        let occupied = table.page_table.len();
        let mut dirty = 0;
        let mut pinned = 0;
        for &idx in table.page_table.values() {
            let page = self.frames[idx].lock();
            if page.is_dirty() {
                dirty += 1;
            }
            if page.pin_count() > 0 {
                pinned += 1;
            }
        }
        BufferPoolStats {
            pool_size: self.frames.len(),
            occupied,
            dirty,
            pinned,
            hit_count: table.hit_count,
            miss_count: table.miss_count,
        }
    }
}
