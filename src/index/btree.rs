//! Persistent, page-backed B+ tree mapping serialized keys to [`RowId`]s.
//!
//! Each node owns a whole [`crate::storage::page::Page`] frame but uses its
//! own 48-byte [`BPlusTreeHeader`] rather than the table page's header —
//! same frame, different layout. Leaves are doubly-linked in key order for
//! range scans; a coarse tree-level mutex serializes all structural changes.

use crate::buffer::manager::BufferPool;
use crate::common::{DataType, PageId, RowId, Value, BTREE_HEADER_SIZE, INVALID_PAGE_ID, PAGE_SIZE};
use crate::error::{DbError, Result};
use crate::types::comparator::KeyComparator;
use crate::types::serializer::TypeSerializer;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::Arc;

const DEFAULT_MAX_KEYS: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BTreeNodeType {
    Invalid = 0,
    Internal = 1,
    Leaf = 2,
}

impl BTreeNodeType {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => BTreeNodeType::Internal,
            2 => BTreeNodeType::Leaf,
            _ => BTreeNodeType::Invalid,
        }
    }
}

/// 48-byte header occupying the start of a B+ tree page frame:
/// `nodeType(u8) _(u8) numKeys(u16) maxKeys(u16) _(u16) pageId(u32)
/// parentPageId(u32) nextPageId(u32) prevPageId(u32) _(u64) _(u64) _(u64)`.
#[derive(Debug, Clone, Copy)]
pub struct BPlusTreeHeader {
    pub node_type: BTreeNodeType,
    pub num_keys: u16,
    pub max_keys: u16,
    pub page_id: PageId,
    pub parent_page_id: PageId,
    pub next_page_id: PageId,
    pub prev_page_id: PageId,
}

impl BPlusTreeHeader {
    fn new(node_type: BTreeNodeType, page_id: PageId, max_keys: u16) -> Self {
        Self {
            node_type,
            num_keys: 0,
            max_keys,
            page_id,
            parent_page_id: INVALID_PAGE_ID,
            next_page_id: INVALID_PAGE_ID,
            prev_page_id: INVALID_PAGE_ID,
        }
    }

    fn read_from(buf: &[u8]) -> Self {
        Self {
            node_type: BTreeNodeType::from_u8(buf[0]),
            num_keys: u16::from_le_bytes([buf[2], buf[3]]),
            max_keys: u16::from_le_bytes([buf[4], buf[5]]),
            page_id: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            parent_page_id: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            next_page_id: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            prev_page_id: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        }
    }

    fn write_into(&self, buf: &mut [u8]) {
        buf[0] = self.node_type as u8;
        buf[1] = 0;
        buf[2..4].copy_from_slice(&self.num_keys.to_le_bytes());
        buf[4..6].copy_from_slice(&self.max_keys.to_le_bytes());
        buf[6..8].copy_from_slice(&0u16.to_le_bytes());
        buf[8..12].copy_from_slice(&self.page_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.parent_page_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.next_page_id.to_le_bytes());
        buf[20..24].copy_from_slice(&self.prev_page_id.to_le_bytes());
        buf[24..48].fill(0);
    }
}

type LeafEntries = Vec<(Vec<u8>, RowId)>;
type InternalEntries = (PageId, Vec<(Vec<u8>, PageId)>);

fn read_leaf_entries(buf: &[u8], num_keys: u16) -> LeafEntries {
    let mut entries = Vec::with_capacity(num_keys as usize);
    let mut off = BTREE_HEADER_SIZE;
    for _ in 0..num_keys {
        let key_size = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap()) as usize;
        off += 2;
        let key = buf[off..off + key_size].to_vec();
        off += key_size;
        let row_id = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        entries.push((key, row_id));
    }
    entries
}

fn write_leaf_entries(buf: &mut [u8], entries: &LeafEntries) -> Result<()> {
    let mut off = BTREE_HEADER_SIZE;
    for (key, row_id) in entries {
        let needed = 2 + key.len() + 8;
        if off + needed > PAGE_SIZE {
            return Err(DbError::OutOfSpace(format!(
                "b+ tree leaf page overflow writing {needed} bytes"
            )));
        }
        buf[off..off + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
        off += 2;
        buf[off..off + key.len()].copy_from_slice(key);
        off += key.len();
        buf[off..off + 8].copy_from_slice(&row_id.to_le_bytes());
        off += 8;
    }
    Ok(())
}

fn read_internal_entries(buf: &[u8], num_keys: u16) -> InternalEntries {
    let mut off = BTREE_HEADER_SIZE;
    let first_child = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
    off += 4;
    let mut entries = Vec::with_capacity(num_keys as usize);
    for _ in 0..num_keys {
        let key_size = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap()) as usize;
        off += 2;
        let key = buf[off..off + key_size].to_vec();
        off += key_size;
        let child = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        entries.push((key, child));
    }
    (first_child, entries)
}

fn write_internal_entries(buf: &mut [u8], first_child: PageId, entries: &[(Vec<u8>, PageId)]) -> Result<()> {
    let mut off = BTREE_HEADER_SIZE;
    buf[off..off + 4].copy_from_slice(&first_child.to_le_bytes());
    off += 4;
    for (key, child) in entries {
        let needed = 2 + key.len() + 4;
        if off + needed > PAGE_SIZE {
            return Err(DbError::OutOfSpace(format!(
                "b+ tree internal page overflow writing {needed} bytes"
            )));
        }
        buf[off..off + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
        off += 2;
        buf[off..off + key.len()].copy_from_slice(key);
        off += key.len();
        buf[off..off + 4].copy_from_slice(&child.to_le_bytes());
        off += 4;
    }
    Ok(())
}

/// Persistent ordered map from a declared [`DataType`]'s serialized bytes to
/// [`RowId`]. Keys compare via [`KeyComparator::compare_serialized`], never
/// raw byte order.
pub struct BPlusTree {
    pool: Arc<BufferPool>,
    key_type: DataType,
    max_keys: u16,
    root: Mutex<PageId>,
}

impl BPlusTree {
    pub fn create(pool: Arc<BufferPool>, key_type: DataType) -> Self {
        Self::with_max_keys(pool, key_type, DEFAULT_MAX_KEYS)
    }

    pub fn with_max_keys(pool: Arc<BufferPool>, key_type: DataType, max_keys: u16) -> Self {
        Self { pool, key_type, max_keys, root: Mutex::new(INVALID_PAGE_ID) }
    }

    /// Reattaches to an existing tree whose root page id is already known
    /// (as recorded in an `IndexDef`).
    pub fn open(pool: Arc<BufferPool>, key_type: DataType, max_keys: u16, root_page_id: PageId) -> Self {
        Self { pool, key_type, max_keys, root: Mutex::new(root_page_id) }
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.lock()
    }

    fn min_keys(&self) -> usize {
        (self.max_keys as usize + 2) / 2
    }

    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        KeyComparator::compare_serialized(a, b, self.key_type).cmp(&0)
    }

    fn new_page(&self, node_type: BTreeNodeType) -> Result<PageId> {
        let id = self.pool.new_page()?;
        self.pool.with_page_mut(id, |page| {
            let header = BPlusTreeHeader::new(node_type, id, self.max_keys);
            header.write_into(&mut page.data_mut()[..BTREE_HEADER_SIZE]);
        })?;
        self.pool.unpin_page(id, true)?;
        Ok(id)
    }

    fn load_header(&self, id: PageId) -> Result<BPlusTreeHeader> {
        self.pool.fetch_page(id)?;
        let header = self.pool.with_page(id, |page| BPlusTreeHeader::read_from(page.data()))?;
        self.pool.unpin_page(id, false)?;
        Ok(header)
    }

    fn load_leaf(&self, id: PageId) -> Result<(BPlusTreeHeader, LeafEntries)> {
        self.pool.fetch_page(id)?;
        let result = self.pool.with_page(id, |page| {
            let header = BPlusTreeHeader::read_from(page.data());
            let entries = read_leaf_entries(page.data(), header.num_keys);
            (header, entries)
        })?;
        self.pool.unpin_page(id, false)?;
        Ok(result)
    }

    fn store_leaf(&self, header: &mut BPlusTreeHeader, entries: &LeafEntries) -> Result<()> {
        header.num_keys = entries.len() as u16;
        self.pool.fetch_page(header.page_id)?;
        self.pool.with_page_mut(header.page_id, |page| {
            header.write_into(&mut page.data_mut()[..BTREE_HEADER_SIZE]);
            write_leaf_entries(page.data_mut(), entries)
        })??;
        self.pool.unpin_page(header.page_id, true)?;
        Ok(())
    }

    fn load_internal(&self, id: PageId) -> Result<(BPlusTreeHeader, PageId, Vec<(Vec<u8>, PageId)>)> {
        self.pool.fetch_page(id)?;
        let (header, first_child, entries) = self.pool.with_page(id, |page| {
            let header = BPlusTreeHeader::read_from(page.data());
            let (first_child, entries) = read_internal_entries(page.data(), header.num_keys);
            (header, first_child, entries)
        })?;
        self.pool.unpin_page(id, false)?;
        Ok((header, first_child, entries))
    }

    fn store_internal(
        &self,
        header: &mut BPlusTreeHeader,
        first_child: PageId,
        entries: &[(Vec<u8>, PageId)],
    ) -> Result<()> {
        header.num_keys = entries.len() as u16;
        self.pool.fetch_page(header.page_id)?;
        self.pool.with_page_mut(header.page_id, |page| {
            header.write_into(&mut page.data_mut()[..BTREE_HEADER_SIZE]);
            write_internal_entries(page.data_mut(), first_child, entries)
        })??;
        self.pool.unpin_page(header.page_id, true)?;
        Ok(())
    }

    fn set_parent(&self, child_id: PageId, parent_id: PageId) -> Result<()> {
        self.pool.fetch_page(child_id)?;
        self.pool.with_page_mut(child_id, |page| {
            let mut header = BPlusTreeHeader::read_from(page.data());
            header.parent_page_id = parent_id;
            header.write_into(&mut page.data_mut()[..BTREE_HEADER_SIZE]);
        })?;
        self.pool.unpin_page(child_id, true)
    }

    fn find_leaf(&self, key_bytes: &[u8]) -> Result<PageId> {
        let mut id = *self.root.lock();
        loop {
            let header = self.load_header(id)?;
            if header.node_type == BTreeNodeType::Leaf {
                return Ok(id);
            }
            let (_, first_child, entries) = self.load_internal(id)?;
            let idx = entries.partition_point(|(k, _)| self.cmp(k, key_bytes) != Ordering::Greater);
            id = if idx == 0 { first_child } else { entries[idx - 1].1 };
        }
    }

    pub fn search(&self, key: &Value) -> Result<Option<RowId>> {
        let _guard = self.root.lock();
        if *_guard == INVALID_PAGE_ID {
            return Ok(None);
        }
        drop(_guard);
        let key_bytes = TypeSerializer::serialize(key, self.key_type)?;
        let leaf_id = self.find_leaf(&key_bytes)?;
        let (_, entries) = self.load_leaf(leaf_id)?;
        Ok(entries
            .binary_search_by(|(k, _)| self.cmp(k, &key_bytes))
            .ok()
            .map(|idx| entries[idx].1))
    }

    pub fn range(&self, lo: &Value, hi: &Value) -> Result<Vec<(Vec<u8>, RowId)>> {
        if *self.root.lock() == INVALID_PAGE_ID {
            return Ok(Vec::new());
        }
        let lo_bytes = TypeSerializer::serialize(lo, self.key_type)?;
        let hi_bytes = TypeSerializer::serialize(hi, self.key_type)?;
        let mut leaf_id = self.find_leaf(&lo_bytes)?;
        let mut results = Vec::new();
        loop {
            let (header, entries) = self.load_leaf(leaf_id)?;
            for (k, row_id) in &entries {
                if self.cmp(k, &lo_bytes) == Ordering::Less {
                    continue;
                }
                if self.cmp(k, &hi_bytes) == Ordering::Greater {
                    return Ok(results);
                }
                results.push((k.clone(), *row_id));
            }
            if header.next_page_id == INVALID_PAGE_ID {
                return Ok(results);
            }
            leaf_id = header.next_page_id;
        }
    }

    pub fn insert(&self, key: &Value, row_id: RowId) -> Result<()> {
        let mut root = self.root.lock();
        if *root == INVALID_PAGE_ID {
            *root = self.new_page(BTreeNodeType::Leaf)?;
        }
        let root_id = *root;
        drop(root);

        let key_bytes = TypeSerializer::serialize(key, self.key_type)?;
        let leaf_id = self.find_leaf(&key_bytes)?;
        let (mut header, mut entries) = self.load_leaf(leaf_id)?;

        match entries.binary_search_by(|(k, _)| self.cmp(k, &key_bytes)) {
            Ok(idx) => {
                entries[idx].1 = row_id;
                self.store_leaf(&mut header, &entries)?;
                return Ok(());
            }
            Err(idx) => entries.insert(idx, (key_bytes, row_id)),
        }

        if entries.len() <= self.max_keys as usize {
            self.store_leaf(&mut header, &entries)?;
            return Ok(());
        }

        // Split: right half becomes a new leaf linked after `leaf_id`.
        let split_at = entries.len() / 2;
        let right_entries = entries.split_off(split_at);
        let separator = right_entries[0].0.clone();

        let right_id = self.new_page(BTreeNodeType::Leaf)?;
        let mut right_header = self.load_header(right_id)?;
        right_header.parent_page_id = header.parent_page_id;
        right_header.next_page_id = header.next_page_id;
        right_header.prev_page_id = leaf_id;
        self.store_leaf(&mut right_header, &right_entries)?;

        if header.next_page_id != INVALID_PAGE_ID {
            let mut next_header = self.load_header(header.next_page_id)?;
            next_header.prev_page_id = right_id;
            self.store_leaf(&mut next_header, &self.load_leaf(header.next_page_id)?.1)?;
        }
        header.next_page_id = right_id;
        self.store_leaf(&mut header, &entries)?;

        self.insert_into_parent(leaf_id, separator, right_id)
    }

    /// Inserts `(separator, new_child)` immediately after `left_child` in
    /// `left_child`'s parent, splitting and recursing upward as needed.
    fn insert_into_parent(&self, left_child: PageId, separator: Vec<u8>, new_child: PageId) -> Result<()> {
        let left_header = self.load_header(left_child)?;
        let parent_id = left_header.parent_page_id;

        if parent_id == INVALID_PAGE_ID {
            let new_root_id = self.new_page(BTreeNodeType::Internal)?;
            let mut new_root_header = self.load_header(new_root_id)?;
            self.store_internal(&mut new_root_header, left_child, &[(separator, new_child)])?;
            self.set_parent(left_child, new_root_id)?;
            self.set_parent(new_child, new_root_id)?;
            *self.root.lock() = new_root_id;
            return Ok(());
        }

        let (mut parent_header, first_child, mut entries) = self.load_internal(parent_id)?;
        let pos = if first_child == left_child {
            0
        } else {
            entries.iter().position(|(_, c)| *c == left_child).expect("left child present in parent") + 1
        };
        entries.insert(pos, (separator, new_child));
        self.set_parent(new_child, parent_id)?;

        if entries.len() <= self.max_keys as usize {
            self.store_internal(&mut parent_header, first_child, &entries)?;
            return Ok(());
        }

        // Split internal node: median key is removed from both halves and
        // promoted to this node's parent.
        let mid = entries.len() / 2;
        let median_key = entries[mid].0.clone();
        let right_first_child = entries[mid].1;
        let right_entries: Vec<_> = entries.split_off(mid + 1);
        entries.truncate(mid);

        let right_id = self.new_page(BTreeNodeType::Internal)?;
        let mut right_header = self.load_header(right_id)?;
        right_header.parent_page_id = parent_header.parent_page_id;
        self.store_internal(&mut right_header, right_first_child, &right_entries)?;
        self.set_parent(right_first_child, right_id)?;
        for (_, child) in &right_entries {
            self.set_parent(*child, right_id)?;
        }

        self.store_internal(&mut parent_header, first_child, &entries)?;
        self.insert_into_parent(parent_id, median_key, right_id)
    }

    pub fn delete(&self, key: &Value) -> Result<bool> {
        if *self.root.lock() == INVALID_PAGE_ID {
            return Ok(false);
        }
        let key_bytes = TypeSerializer::serialize(key, self.key_type)?;
        let leaf_id = self.find_leaf(&key_bytes)?;
        let (mut header, mut entries) = self.load_leaf(leaf_id)?;

        let idx = match entries.binary_search_by(|(k, _)| self.cmp(k, &key_bytes)) {
            Ok(idx) => idx,
            Err(_) => return Ok(false),
        };
        entries.remove(idx);
        self.store_leaf(&mut header, &entries)?;

        if header.parent_page_id != INVALID_PAGE_ID && entries.len() < self.min_keys() {
            self.rebalance_leaf(leaf_id)?;
        } else if header.parent_page_id == INVALID_PAGE_ID && entries.is_empty() {
            // Empty root leaf stays as the (empty) root; nothing to collapse.
        }
        Ok(true)
    }

    fn rebalance_leaf(&self, leaf_id: PageId) -> Result<()> {
        let (header, entries) = self.load_leaf(leaf_id)?;
        let parent_id = header.parent_page_id;
        let (mut parent_header, first_child, mut parent_entries) = self.load_internal(parent_id)?;
        let children: Vec<PageId> = std::iter::once(first_child)
            .chain(parent_entries.iter().map(|(_, c)| *c))
            .collect();
        let idx = children.iter().position(|&c| c == leaf_id).expect("leaf present in parent");

        let mut entries = entries;
        let mut header = header;

        if idx > 0 {
            let left_id = children[idx - 1];
            let (mut left_header, mut left_entries) = self.load_leaf(left_id)?;
            if left_entries.len() > self.min_keys() {
                let borrowed = left_entries.pop().unwrap();
                entries.insert(0, borrowed);
                self.store_leaf(&mut left_header, &left_entries)?;
                self.store_leaf(&mut header, &entries)?;
                parent_entries[idx - 1].0 = entries[0].0.clone();
                self.store_internal(&mut parent_header, first_child, &parent_entries)?;
                return Ok(());
            }
        }
        if idx + 1 < children.len() {
            let right_id = children[idx + 1];
            let (mut right_header, mut right_entries) = self.load_leaf(right_id)?;
            if right_entries.len() > self.min_keys() {
                let borrowed = right_entries.remove(0);
                entries.push(borrowed);
                self.store_leaf(&mut header, &entries)?;
                self.store_leaf(&mut right_header, &right_entries)?;
                let sep_idx = idx; // separator between `leaf_id` and `right_id`
                parent_entries[sep_idx].0 = right_entries[0].0.clone();
                self.store_internal(&mut parent_header, first_child, &parent_entries)?;
                return Ok(());
            }
        }

        // No sibling has a spare entry: merge.
        if idx > 0 {
            let left_id = children[idx - 1];
            let (mut left_header, mut left_entries) = self.load_leaf(left_id)?;
            left_entries.extend(entries);
            left_header.next_page_id = header.next_page_id;
            self.store_leaf(&mut left_header, &left_entries)?;
            if header.next_page_id != INVALID_PAGE_ID {
                let (mut next_header, next_entries) = self.load_leaf(header.next_page_id)?;
                next_header.prev_page_id = left_id;
                self.store_leaf(&mut next_header, &next_entries)?;
            }
            self.pool.delete_page(leaf_id)?;
            parent_entries.remove(idx - 1);
            self.remove_child_and_rebalance(parent_id, parent_header, first_child, parent_entries, idx - 1, true)
        } else {
            let right_id = children[idx + 1];
            let (right_header, right_entries) = self.load_leaf(right_id)?;
            entries.extend(right_entries);
            header.next_page_id = right_header.next_page_id;
            self.store_leaf(&mut header, &entries)?;
            if right_header.next_page_id != INVALID_PAGE_ID {
                let (mut next_header, next_entries) = self.load_leaf(right_header.next_page_id)?;
                next_header.prev_page_id = leaf_id;
                self.store_leaf(&mut next_header, &next_entries)?;
            }
            self.pool.delete_page(right_id)?;
            parent_entries.remove(idx);
            self.remove_child_and_rebalance(parent_id, parent_header, first_child, parent_entries, idx, false)
        }
    }

    /// After a child merge removed one separator (`removed_idx`, already
    /// spliced out of `entries`), persists the parent and rebalances it if
    /// it underflowed. `merged_into_left` only affects which child array
    /// slot conceptually vanished; the separator removal already accounts
    /// for it.
    fn remove_child_and_rebalance(
        &self,
        parent_id: PageId,
        mut parent_header: BPlusTreeHeader,
        first_child: PageId,
        entries: Vec<(Vec<u8>, PageId)>,
        _removed_idx: usize,
        _merged_into_left: bool,
    ) -> Result<()> {
        if parent_header.parent_page_id == INVALID_PAGE_ID {
            // Root: if it collapses to zero keys, its sole remaining child
            // becomes the new root.
            if entries.is_empty() {
                self.set_parent(first_child, INVALID_PAGE_ID)?;
                self.pool.delete_page(parent_id)?;
                *self.root.lock() = first_child;
                return Ok(());
            }
            self.store_internal(&mut parent_header, first_child, &entries)?;
            return Ok(());
        }

        self.store_internal(&mut parent_header, first_child, &entries)?;
        if entries.len() < self.min_keys() {
            self.rebalance_internal(parent_id)?;
        }
        Ok(())
    }

    fn rebalance_internal(&self, node_id: PageId) -> Result<()> {
        let (mut header, first_child, mut entries) = self.load_internal(node_id)?;
        let parent_id = header.parent_page_id;
        let (mut parent_header, p_first_child, mut parent_entries) = self.load_internal(parent_id)?;
        let children: Vec<PageId> = std::iter::once(p_first_child)
            .chain(parent_entries.iter().map(|(_, c)| *c))
            .collect();
        let idx = children.iter().position(|&c| c == node_id).expect("node present in parent");

        if idx > 0 {
            let left_id = children[idx - 1];
            let (mut left_header, left_first_child, mut left_entries) = self.load_internal(left_id)?;
            if left_entries.len() > self.min_keys() {
                let (borrowed_key, borrowed_child) = left_entries.pop().unwrap();
                let down_separator = parent_entries[idx - 1].0.clone();
                entries.insert(0, (down_separator, first_child));
                self.set_parent(borrowed_child, node_id)?;
                let new_first_child = borrowed_child;
                self.store_internal(&mut left_header, left_first_child, &left_entries)?;
                self.store_internal(&mut header, new_first_child, &entries)?;
                parent_entries[idx - 1].0 = borrowed_key;
                self.store_internal(&mut parent_header, p_first_child, &parent_entries)?;
                return Ok(());
            }
        }
        if idx + 1 < children.len() {
            let right_id = children[idx + 1];
            let (mut right_header, right_first_child, mut right_entries) = self.load_internal(right_id)?;
            if right_entries.len() > self.min_keys() {
                let down_separator = parent_entries[idx].0.clone();
                entries.push((down_separator, right_first_child));
                self.set_parent(right_first_child, node_id)?;
                let (new_right_key, new_right_first_child) = right_entries.remove(0);
                self.store_internal(&mut header, first_child, &entries)?;
                self.store_internal(&mut right_header, new_right_first_child, &right_entries)?;
                parent_entries[idx].0 = new_right_key;
                self.store_internal(&mut parent_header, p_first_child, &parent_entries)?;
                return Ok(());
            }
        }

        if idx > 0 {
            let left_id = children[idx - 1];
            let (mut left_header, left_first_child, mut left_entries) = self.load_internal(left_id)?;
            let down_separator = parent_entries[idx - 1].0.clone();
            left_entries.push((down_separator, first_child));
            self.set_parent(first_child, left_id)?;
            for (_, child) in &entries {
                self.set_parent(*child, left_id)?;
            }
            left_entries.extend(entries);
            self.store_internal(&mut left_header, left_first_child, &left_entries)?;
            self.pool.delete_page(node_id)?;
            parent_entries.remove(idx - 1);
            self.remove_child_and_rebalance(parent_id, parent_header, p_first_child, parent_entries, idx - 1, true)
        } else {
            let right_id = children[idx + 1];
            let (right_header, right_first_child, right_entries) = self.load_internal(right_id)?;
            let down_separator = parent_entries[idx].0.clone();
            entries.push((down_separator, right_first_child));
            self.set_parent(right_first_child, node_id)?;
            for (_, child) in &right_entries {
                self.set_parent(*child, node_id)?;
            }
            entries.extend(right_entries);
            let _ = right_header;
            self.store_internal(&mut header, first_child, &entries)?;
            self.pool.delete_page(right_id)?;
            parent_entries.remove(idx);
            self.remove_child_and_rebalance(parent_id, parent_header, p_first_child, parent_entries, idx, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskManager;
    use tempfile::tempdir;

    fn tree(max_keys: u16) -> (tempfile::TempDir, BPlusTree) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("t.db"), false, false).unwrap());
        let pool = Arc::new(BufferPool::new(disk, 64));
        (dir, BPlusTree::with_max_keys(pool, DataType::Int, max_keys))
    }

    #[test]
    fn insert_and_search_round_trip() {
        let (_d, t) = tree(200);
        for i in 0..20 {
            t.insert(&Value::Int(i), i as u64).unwrap();
        }
        for i in 0..20 {
            assert_eq!(t.search(&Value::Int(i)).unwrap(), Some(i as u64));
        }
        assert_eq!(t.search(&Value::Int(999)).unwrap(), None);
    }

    #[test]
    fn insert_upserts_existing_key() {
        let (_d, t) = tree(200);
        t.insert(&Value::Int(1), 100).unwrap();
        t.insert(&Value::Int(1), 200).unwrap();
        assert_eq!(t.search(&Value::Int(1)).unwrap(), Some(200));
    }

    #[test]
    fn split_and_search_across_many_leaves() {
        let (_d, t) = tree(4);
        for i in 1..=10 {
            t.insert(&Value::Int(i), i as u64).unwrap();
        }
        for i in 1..=10 {
            assert_eq!(t.search(&Value::Int(i)).unwrap(), Some(i as u64));
        }
    }

    #[test]
    fn range_scan_after_splits() {
        let (_d, t) = tree(4);
        for i in 1..=10 {
            t.insert(&Value::Int(i), i as u64).unwrap();
        }
        let results = t.range(&Value::Int(3), &Value::Int(7)).unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results.first().unwrap().1, 3);
        assert_eq!(results.last().unwrap().1, 7);
    }

    #[test]
    fn delete_then_range_skips_removed_key() {
        let (_d, t) = tree(4);
        for i in 1..=10 {
            t.insert(&Value::Int(i), i as u64).unwrap();
        }
        assert!(t.delete(&Value::Int(5)).unwrap());
        assert_eq!(t.search(&Value::Int(5)).unwrap(), None);
        let results = t.range(&Value::Int(3), &Value::Int(7)).unwrap();
        let rows: Vec<u64> = results.iter().map(|(_, r)| *r).collect();
        assert_eq!(rows, vec![3, 4, 6, 7]);
    }

    #[test]
    fn delete_missing_key_returns_false() {
        let (_d, t) = tree(200);
        t.insert(&Value::Int(1), 1).unwrap();
        assert!(!t.delete(&Value::Int(2)).unwrap());
    }
}
