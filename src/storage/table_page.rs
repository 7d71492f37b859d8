//! Slotted table page layout: a forward-growing slot array and a
//! backward-growing record region holding MVCC-headed tuples.

use crate::common::{ColumnList, RowId, TransactionId, INVALID_TXN_ID, PAGE_HEADER_SIZE, PAGE_SIZE, RECORD_HEADER_SIZE};
use crate::error::{DbError, Result};
use crate::storage::page::{Page, PageHeader, PageType};
use crate::types::TypeSerializer;

const SLOT_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u16,
    pub length: u16,
}

impl Slot {
    fn read(buf: &[u8], index: u16) -> Self {
        let at = PAGE_HEADER_SIZE + index as usize * SLOT_SIZE;
        Slot {
            offset: u16::from_le_bytes([buf[at], buf[at + 1]]),
            length: u16::from_le_bytes([buf[at + 2], buf[at + 3]]),
        }
    }

    fn write(&self, buf: &mut [u8], index: u16) {
        let at = PAGE_HEADER_SIZE + index as usize * SLOT_SIZE;
        buf[at..at + 2].copy_from_slice(&self.offset.to_le_bytes());
        buf[at + 2..at + 4].copy_from_slice(&self.length.to_le_bytes());
    }

    pub fn is_live(&self) -> bool {
        self.length > 0
    }
}

/// 26-byte MVCC record header: `rowId(u64) xmin(u64) xmax(u64)
/// columnCount(u16)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub row_id: RowId,
    pub xmin: TransactionId,
    pub xmax: TransactionId,
    pub column_count: u16,
}

impl RecordHeader {
    fn read(buf: &[u8]) -> Self {
        RecordHeader {
            row_id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            xmin: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            xmax: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            column_count: u16::from_le_bytes(buf[24..26].try_into().unwrap()),
        }
    }

    fn write(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.row_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.xmin.to_le_bytes());
        buf[16..24].copy_from_slice(&self.xmax.to_le_bytes());
        buf[24..26].copy_from_slice(&self.column_count.to_le_bytes());
    }

    pub fn is_deleted(&self) -> bool {
        self.xmax != INVALID_TXN_ID
    }
}

pub struct TablePage;

impl TablePage {
    /// Writes a zeroed header with `type=Table`, `freeSpaceOffset=8192`.
    pub fn init(page: &mut Page, page_id: u32) {
        page.reset();
        let header = PageHeader::new(PageType::Table, page_id);
        page.set_header(&header);
        page.mark_dirty(true);
    }

    fn serialize_record(
        columns: &ColumnList,
        row_id: RowId,
        values: &[crate::common::Value],
        txn: TransactionId,
    ) -> Result<Vec<u8>> {
        if values.len() != columns.len() {
            return Err(DbError::ConstraintViolation(format!(
                "expected {} values, got {}",
                columns.len(),
                values.len()
            )));
        }
        let header = RecordHeader {
            row_id,
            xmin: txn,
            xmax: INVALID_TXN_ID,
            column_count: columns.len() as u16,
        };
        let mut buf = vec![0u8; RECORD_HEADER_SIZE];
        header.write(&mut buf);
        for (value, ty) in values.iter().zip(columns.iter()) {
            buf.extend_from_slice(&TypeSerializer::serialize(value, *ty)?);
        }
        Ok(buf)
    }

    fn free_space(header: &PageHeader) -> usize {
        let slots_end = PAGE_HEADER_SIZE + header.slot_count as usize * SLOT_SIZE;
        (header.free_space_offset as usize).saturating_sub(slots_end)
    }

    pub fn get_free_space(page: &Page) -> usize {
        Self::free_space(&page.header())
    }

    pub fn has_enough_space(page: &Page, record_size: usize) -> bool {
        Self::free_space(&page.header()) >= record_size + SLOT_SIZE
    }

    /// Serializes the record and appends it (and a slot) if it fits.
    /// `xmin = txn`, `xmax = 0`. Returns `OutOfSpace` if the page cannot
    /// hold `record + slot`.
    pub fn insert_record(
        page: &mut Page,
        columns: &ColumnList,
        row_id: RowId,
        values: &[crate::common::Value],
        txn: TransactionId,
    ) -> Result<u16> {
        let record = Self::serialize_record(columns, row_id, values, txn)?;
        let record_size = record.len();
        let required = record_size + SLOT_SIZE;

        let mut header = page.header();
        if Self::free_space(&header) < required {
            return Err(DbError::OutOfSpace(format!(
                "page {} cannot fit {required} bytes ({} free)",
                header.page_id,
                Self::free_space(&header)
            )));
        }

        let record_offset = header.free_space_offset - record_size as u16;
        page.data_mut()[record_offset as usize..record_offset as usize + record_size]
            .copy_from_slice(&record);

        let slot_index = header.slot_count;
        Slot { offset: record_offset, length: record_size as u16 }.write(page.data_mut(), slot_index);

        header.slot_count += 1;
        header.free_space_offset = record_offset;
        header.free_space_size = Self::free_space(&header) as u16 - SLOT_SIZE as u16;
        header.last_modified_txn = txn;
        page.set_header(&header);
        page.mark_dirty(true);
        Ok(slot_index)
    }

    fn slot_at(page: &Page, index: u16) -> Option<Slot> {
        let header = page.header();
        if index >= header.slot_count {
            return None;
        }
        Some(Slot::read(&page.data()[..], index))
    }

    fn record_bytes(page: &Page, slot: Slot) -> &[u8] {
        &page.data()[slot.offset as usize..slot.offset as usize + slot.length as usize]
    }

    pub fn get_record_header(page: &Page, slot_index: u16) -> Option<RecordHeader> {
        let slot = Self::slot_at(page, slot_index)?;
        if !slot.is_live() {
            return None;
        }
        Some(RecordHeader::read(Self::record_bytes(page, slot)))
    }

    /// Decodes one record by slot index, header and column values both.
    pub fn get_record(
        page: &Page,
        slot_index: u16,
        columns: &ColumnList,
    ) -> Result<Option<(RecordHeader, Vec<crate::common::Value>)>> {
        let Some(slot) = Self::slot_at(page, slot_index) else { return Ok(None) };
        if !slot.is_live() {
            return Ok(None);
        }
        let bytes = Self::record_bytes(page, slot);
        let header = RecordHeader::read(bytes);
        let mut rest = &bytes[RECORD_HEADER_SIZE..];
        let mut values = Vec::with_capacity(columns.len());
        for ty in columns.iter() {
            let (value, remainder) = TypeSerializer::deserialize_prefix(rest, *ty)?;
            values.push(value);
            rest = remainder;
        }
        Ok(Some((header, values)))
    }

    /// Iterates live slots in order, decoding every column, and returns
    /// each record alongside its MVCC header so the caller can apply a
    /// visibility filter.
    pub fn get_all_records(page: &Page, columns: &ColumnList) -> Result<Vec<(RecordHeader, Vec<crate::common::Value>)>> {
        let header = page.header();
        let mut out = Vec::new();
        for i in 0..header.slot_count {
            let slot = Slot::read(&page.data()[..], i);
            if !slot.is_live() {
                continue;
            }
            let bytes = Self::record_bytes(page, slot);
            let record_header = RecordHeader::read(bytes);
            let mut rest = &bytes[RECORD_HEADER_SIZE..];
            let mut values = Vec::with_capacity(columns.len());
            for ty in columns.iter() {
                let (value, remainder) = TypeSerializer::deserialize_prefix(rest, *ty)?;
                values.push(value);
                rest = remainder;
            }
            out.push((record_header, values));
        }
        Ok(out)
    }

    /// Logical delete: sets `xmax = txn`. Does not reclaim space.
    pub fn delete_record(page: &mut Page, slot_index: u16, txn: TransactionId) -> Result<()> {
        let slot = Self::slot_at(page, slot_index)
            .ok_or_else(|| DbError::NotFound(format!("slot {slot_index}")))?;
        if !slot.is_live() {
            return Err(DbError::NotFound(format!("slot {slot_index} already empty")));
        }
        let offset = slot.offset as usize;
        let mut header = RecordHeader::read(&page.data()[offset..offset + RECORD_HEADER_SIZE]);
        header.xmax = txn;
        header.write(&mut page.data_mut()[offset..offset + RECORD_HEADER_SIZE]);
        let mut page_header = page.header();
        page_header.last_modified_txn = txn;
        page.set_header(&page_header);
        page.mark_dirty(true);
        Ok(())
    }

    /// Clears `xmax` back to `0`, used by rollback of an in-flight delete.
    pub fn undelete_record(page: &mut Page, slot_index: u16) -> Result<()> {
        let slot = Self::slot_at(page, slot_index)
            .ok_or_else(|| DbError::NotFound(format!("slot {slot_index}")))?;
        let offset = slot.offset as usize;
        let mut header = RecordHeader::read(&page.data()[offset..offset + RECORD_HEADER_SIZE]);
        header.xmax = INVALID_TXN_ID;
        header.write(&mut page.data_mut()[offset..offset + RECORD_HEADER_SIZE]);
        page.mark_dirty(true);
        Ok(())
    }

    /// In-place overwrite when the new encoding is no larger than the
    /// slot's current length; retains the original `xmin`. Returns `false`
    /// (not an error) when the caller must fall back to delete+insert.
    pub fn update_record(
        page: &mut Page,
        columns: &ColumnList,
        slot_index: u16,
        new_values: &[crate::common::Value],
        txn: TransactionId,
    ) -> Result<bool> {
        let slot = Self::slot_at(page, slot_index)
            .ok_or_else(|| DbError::NotFound(format!("slot {slot_index}")))?;
        if !slot.is_live() {
            return Err(DbError::NotFound(format!("slot {slot_index} already empty")));
        }
        let offset = slot.offset as usize;
        let old_header = RecordHeader::read(&page.data()[offset..offset + RECORD_HEADER_SIZE]);

        let mut new_bytes = vec![0u8; RECORD_HEADER_SIZE];
        let new_header = RecordHeader {
            row_id: old_header.row_id,
            xmin: old_header.xmin,
            xmax: INVALID_TXN_ID,
            column_count: columns.len() as u16,
        };
        new_header.write(&mut new_bytes);
        for (value, ty) in new_values.iter().zip(columns.iter()) {
            new_bytes.extend_from_slice(&TypeSerializer::serialize(value, *ty)?);
        }

        if new_bytes.len() > slot.length as usize {
            return Ok(false);
        }
        page.data_mut()[offset..offset + new_bytes.len()].copy_from_slice(&new_bytes);
        if new_bytes.len() < slot.length as usize {
            Slot { offset: slot.offset, length: new_bytes.len() as u16 }
                .write(page.data_mut(), slot_index);
        }
        let mut page_header = page.header();
        page_header.last_modified_txn = txn;
        page.set_header(&page_header);
        page.mark_dirty(true);
        Ok(true)
    }

    /// Zeroes a slot's length, marking it reclaimed. Used by vacuum; does
    /// not compact the record region or touch the byte payload.
    pub fn reclaim_slot(page: &mut Page, slot_index: u16) -> Result<()> {
        let slot = Self::slot_at(page, slot_index)
            .ok_or_else(|| DbError::NotFound(format!("slot {slot_index}")))?;
        Slot { offset: slot.offset, length: 0 }.write(page.data_mut(), slot_index);
        page.mark_dirty(true);
        Ok(())
    }

    /// Upper bound on a record's serialized size for `columns`, used by
    /// callers estimating whether a page could ever hold it.
    pub fn calculate_record_size(columns: &ColumnList, values: &[crate::common::Value]) -> Result<usize> {
        let mut size = RECORD_HEADER_SIZE;
        for (value, ty) in values.iter().zip(columns.iter()) {
            size += TypeSerializer::serialized_size(value, *ty)?;
        }
        Ok(size)
    }

    /// Largest record this page could ever hold, after one slot entry.
    pub fn max_record_size() -> usize {
        PAGE_SIZE - PAGE_HEADER_SIZE - SLOT_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DataType, Value};

    fn columns() -> ColumnList {
        vec![DataType::Int, DataType::Varchar(32)]
    }

    #[test]
    fn insert_and_read_back_a_record() {
        let mut page = Page::new();
        TablePage::init(&mut page, 1);
        let cols = columns();
        let values = vec![Value::Int(1), Value::Varchar("a".into())];
        let slot = TablePage::insert_record(&mut page, &cols, 1, &values, 7).unwrap();
        assert_eq!(slot, 0);

        let records = TablePage::get_all_records(&page, &cols).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.row_id, 1);
        assert_eq!(records[0].0.xmin, 7);
        assert_eq!(records[0].1, values);
    }

    #[test]
    fn delete_sets_xmax_and_hides_via_header_not_removal() {
        let mut page = Page::new();
        TablePage::init(&mut page, 1);
        let cols = columns();
        let values = vec![Value::Int(1), Value::Varchar("a".into())];
        let slot = TablePage::insert_record(&mut page, &cols, 1, &values, 7).unwrap();
        TablePage::delete_record(&mut page, slot, 9).unwrap();

        let header = TablePage::get_record_header(&page, slot).unwrap();
        assert!(header.is_deleted());
        assert_eq!(header.xmax, 9);
        // get_all_records does not filter by xmax; that is VisibilityChecker's job.
        assert_eq!(TablePage::get_all_records(&page, &cols).unwrap().len(), 1);
    }

    #[test]
    fn update_in_place_when_it_fits_else_reports_false() {
        let mut page = Page::new();
        TablePage::init(&mut page, 1);
        let cols = columns();
        let values = vec![Value::Int(1), Value::Varchar("abcdefgh".into())];
        let slot = TablePage::insert_record(&mut page, &cols, 1, &values, 1).unwrap();

        let shrunk = vec![Value::Int(2), Value::Varchar("a".into())];
        assert!(TablePage::update_record(&mut page, &cols, slot, &shrunk, 2).unwrap());
        let header = TablePage::get_record_header(&page, slot).unwrap();
        assert_eq!(header.xmin, 1, "in-place update retains original xmin");

        let grown = vec![Value::Int(3), Value::Varchar("this is now much longer than before".into())];
        assert!(!TablePage::update_record(&mut page, &cols, slot, &grown, 3).unwrap());
    }

    #[test]
    fn insert_fails_with_out_of_space_when_record_too_large() {
        let mut page = Page::new();
        TablePage::init(&mut page, 1);
        let cols = vec![DataType::Blob];
        let huge = vec![Value::Blob(vec![0u8; PAGE_SIZE])];
        assert!(matches!(
            TablePage::insert_record(&mut page, &cols, 1, &huge, 1),
            Err(DbError::OutOfSpace(_))
        ));
    }
}
