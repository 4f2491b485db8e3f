//! Slotted page format for fixed-width tuples.
//!
//! Layout of a page of `page_size` bytes holding tuples of `tuple_size` bytes:
//!
//! ```text
//! +----------------------+--------+--------+-----+--------+---------+
//! | occupancy bitmap     | slot 0 | slot 1 | ... | slot n | padding |
//! | ceil(n / 8) bytes    |        |        |     |        | (zero)  |
//! +----------------------+--------+--------+-----+--------+---------+
//! ```
//!
//! `n = floor(page_size * 8 / (tuple_size * 8 + 1))`. Bit `i` of the bitmap is
//! bit `i % 8` (least significant first) of byte `i / 8`; a slot's bytes are
//! only decoded when its bit is set. An all-zero page is a valid empty page.

use crate::access::tuple::{RecordId, Tuple, TupleDesc};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use std::sync::Arc;

pub struct HeapPage {
    pid: PageId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirtier: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Number of tuple slots a page can hold.
    pub fn num_slots(page_size: usize, tuple_size: usize) -> usize {
        (page_size * 8) / (tuple_size * 8 + 1)
    }

    /// Bytes taken by the occupancy bitmap.
    pub fn header_size(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// Decodes a page. The page size is the length of `data`.
    pub fn from_bytes(pid: PageId, desc: Arc<TupleDesc>, data: &[u8]) -> StorageResult<Self> {
        let page_size = data.len();
        let tuple_size = desc.byte_size();
        let num_slots = Self::num_slots(page_size, tuple_size);
        let header_size = Self::header_size(num_slots);

        let header = data[..header_size].to_vec();
        let mut tuples = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if header[slot / 8] & (1 << (slot % 8)) == 0 {
                tuples.push(None);
                continue;
            }
            let start = header_size + slot * tuple_size;
            let mut tuple = Tuple::decode(Arc::clone(&desc), &data[start..start + tuple_size])?;
            tuple.set_record_id(Some(RecordId::new(pid, slot)));
            tuples.push(Some(tuple));
        }

        Ok(Self {
            pid,
            desc,
            page_size,
            header,
            tuples,
            dirtier: None,
            before_image: data.to_vec(),
        })
    }

    /// Re-encodes the page into exactly `page_size` bytes.
    pub fn page_data(&self) -> StorageResult<Vec<u8>> {
        let tuple_size = self.desc.byte_size();
        let mut data = Vec::with_capacity(self.page_size);
        data.extend_from_slice(&self.header);

        for tuple in &self.tuples {
            match tuple {
                Some(tuple) => tuple.encode(&mut data)?,
                None => data.resize(data.len() + tuple_size, 0),
            }
        }

        data.resize(self.page_size, 0);
        Ok(data)
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn slot_count(&self) -> usize {
        self.tuples.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.slot_count())
            .filter(|&slot| !self.is_slot_used(slot))
            .count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.slot_count() && self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_slot(&mut self, slot: usize, used: bool) {
        let mask = 1 << (slot % 8);
        if used {
            self.header[slot / 8] |= mask;
        } else {
            self.header[slot / 8] &= !mask;
        }
    }

    /// Stores `tuple` in the lowest free slot and returns its new record id.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> StorageResult<RecordId> {
        if **tuple.desc() != *self.desc {
            return Err(StorageError::SchemaMismatch);
        }
        let slot = (0..self.slot_count())
            .find(|&slot| !self.is_slot_used(slot))
            .ok_or(StorageError::PageFull(self.pid))?;

        let record_id = RecordId::new(self.pid, slot);
        tuple.set_record_id(Some(record_id));
        self.set_slot(slot, true);
        self.tuples[slot] = Some(tuple);
        Ok(record_id)
    }

    /// Clears the record's slot. Other slots keep their positions.
    pub fn delete_tuple(&mut self, record_id: &RecordId) -> StorageResult<()> {
        if record_id.page_id != self.pid {
            return Err(StorageError::WrongPage {
                page_id: self.pid,
                record_page: record_id.page_id,
            });
        }
        let slot = record_id.slot;
        if slot >= self.slot_count() {
            return Err(StorageError::InvalidSlot {
                slot,
                num_slots: self.slot_count(),
            });
        }
        if !self.is_slot_used(slot) {
            return Err(StorageError::SlotEmpty {
                page_id: self.pid,
                slot,
            });
        }

        self.set_slot(slot, false);
        self.tuples[slot] = None;
        Ok(())
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.tuples.get(slot).and_then(Option::as_ref)
    }

    /// Occupied tuples in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().flatten()
    }

    /// Sets or clears the transaction that last dirtied this page.
    pub fn mark_dirty(&mut self, dirtier: Option<TransactionId>) {
        self.dirtier = dirtier;
    }

    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirtier
    }

    /// Raw bytes of the last loaded or flushed state.
    pub fn before_image_data(&self) -> &[u8] {
        &self.before_image
    }

    /// Decodes the before-image into a standalone page.
    pub fn before_image(&self) -> StorageResult<HeapPage> {
        HeapPage::from_bytes(self.pid, Arc::clone(&self.desc), &self.before_image)
    }

    /// Captures the current content as the before-image. Called right after a
    /// successful flush.
    pub fn set_before_image(&mut self) -> StorageResult<()> {
        self.before_image = self.page_data()?;
        Ok(())
    }
}

impl std::fmt::Debug for HeapPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapPage")
            .field("pid", &self.pid)
            .field("slots", &self.slot_count())
            .field("empty", &self.num_empty_slots())
            .field("dirtier", &self.dirtier)
            .finish()
    }
}
