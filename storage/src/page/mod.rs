use crate::{Result, StorageError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use heapdb_core::{PageId, RecordId, TransactionId, Tuple, TupleDesc};
use std::fmt;
use std::sync::Arc;

pub const PAGE_SIZE: usize = 4096;

static EMPTY_PAGE: [u8; PAGE_SIZE] = [0; PAGE_SIZE];

/// One page of a heap file.
///
/// On disk a page is `[occupancy bitmap][tuple slots][zero padding]`, always
/// exactly [`PAGE_SIZE`] bytes. Every slot costs one tuple plus one bitmap
/// bit, so a page holds `floor(PAGE_SIZE * 8 / (tuple_bytes * 8 + 1))`
/// tuples and `ceil(slots / 8)` header bytes. Bit `i` (least significant
/// bit first within each byte) is set iff slot `i` holds a tuple.
pub struct HeapPage {
    pid: PageId,
    desc: Arc<TupleDesc>,
    header: Vec<u8>,
    slots: Vec<Option<Tuple>>,
    dirty: bool,
    last_dirtied_by: Option<TransactionId>,
    before_image: Bytes,
}

impl HeapPage {
    /// Number of tuple slots on a page for the given schema.
    pub fn slots_for(desc: &TupleDesc) -> usize {
        (PAGE_SIZE * 8) / (desc.byte_size() * 8 + 1)
    }

    /// Number of bitmap bytes needed to track `num_slots` slots.
    pub fn header_len_for(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// Raw bytes of a page with every slot empty.
    pub fn empty_page_bytes() -> Bytes {
        Bytes::from_static(&EMPTY_PAGE)
    }

    pub fn empty(pid: PageId, desc: Arc<TupleDesc>) -> Self {
        let num_slots = Self::slots_for(&desc);
        Self {
            pid,
            header: vec![0; Self::header_len_for(num_slots)],
            slots: vec![None; num_slots],
            desc,
            dirty: false,
            last_dirtied_by: None,
            before_image: Self::empty_page_bytes(),
        }
    }

    /// Decodes a page read from disk and keeps a copy of `data` as the
    /// before-image.
    pub fn from_bytes(pid: PageId, desc: Arc<TupleDesc>, data: &[u8]) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize(data.len()));
        }

        let num_slots = Self::slots_for(&desc);
        let header_len = Self::header_len_for(num_slots);
        let tuple_len = desc.byte_size();

        let mut buf = data;
        let header = buf[..header_len].to_vec();
        buf.advance(header_len);

        let mut slots = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if !bit_is_set(&header, slot) {
                buf.advance(tuple_len);
                slots.push(None);
                continue;
            }

            let mut tuple = Tuple::decode(&desc, &mut buf).map_err(|source| {
                StorageError::CorruptPage {
                    page_id: pid,
                    source,
                }
            })?;
            tuple.set_record_id(Some(RecordId::new(pid, slot)));
            slots.push(Some(tuple));
        }

        Ok(Self {
            pid,
            desc,
            header,
            slots,
            dirty: false,
            last_dirtied_by: None,
            before_image: Bytes::copy_from_slice(data),
        })
    }

    /// Encodes the page. Empty slots are written as zeros, so
    /// `from_bytes(to_bytes(p))` reproduces `p`.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let tuple_len = self.desc.byte_size();
        let mut buf = BytesMut::with_capacity(PAGE_SIZE);

        buf.put_slice(&self.header);
        for (slot, tuple) in self.slots.iter().enumerate() {
            match tuple {
                Some(tuple) if self.is_slot_used(slot) => {
                    tuple
                        .encode(&mut buf)
                        .map_err(|source| StorageError::CorruptPage {
                            page_id: self.pid,
                            source,
                        })?
                }
                _ => buf.put_bytes(0, tuple_len),
            }
        }
        buf.put_bytes(0, PAGE_SIZE - buf.len());

        Ok(buf.freeze())
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.slots.len() && bit_is_set(&self.header, slot)
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.slots.len())
            .filter(|&slot| !self.is_slot_used(slot))
            .count()
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        if self.is_slot_used(slot) {
            self.slots[slot].as_ref()
        } else {
            None
        }
    }

    /// Stores `tuple` in the lowest-numbered empty slot and stamps its record
    /// id. Returns the slot used.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> Result<usize> {
        if tuple.desc().as_ref() != self.desc.as_ref() {
            return Err(StorageError::SchemaMismatch(self.pid));
        }

        let slot = (0..self.slots.len())
            .find(|&slot| !self.is_slot_used(slot))
            .ok_or(StorageError::PageFull(self.pid))?;

        set_bit(&mut self.header, slot, true);
        tuple.set_record_id(Some(RecordId::new(self.pid, slot)));
        self.slots[slot] = Some(tuple.clone());

        Ok(slot)
    }

    /// Empties the slot `tuple` was stored in and clears its record id.
    pub fn delete_tuple(&mut self, tuple: &mut Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        if rid.page_id() != self.pid {
            return Err(StorageError::ForeignRecordId {
                expected: self.pid,
                found: rid.page_id(),
            });
        }

        let slot = rid.slot();
        if slot >= self.slots.len() {
            return Err(StorageError::InvalidSlot {
                page_id: self.pid,
                slot,
            });
        }
        if !self.is_slot_used(slot) {
            return Err(StorageError::SlotEmpty {
                page_id: self.pid,
                slot,
            });
        }

        set_bit(&mut self.header, slot, false);
        self.slots[slot] = None;
        tuple.set_record_id(None);

        Ok(())
    }

    /// Not synchronized; the buffer pool serializes access.
    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirty = dirty;
        if dirty {
            self.last_dirtied_by = Some(tid);
        }
    }

    /// The transaction that last dirtied this page, if it is dirty.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        if self.dirty {
            self.last_dirtied_by
        } else {
            None
        }
    }

    /// The page as it was when last read from or written to disk.
    pub fn before_image(&self) -> Result<HeapPage> {
        HeapPage::from_bytes(self.pid, Arc::clone(&self.desc), &self.before_image)
    }

    pub fn set_before_image(&mut self) -> Result<()> {
        self.before_image = self.to_bytes()?;
        Ok(())
    }

    /// Occupied slots in ascending slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(slot, _)| self.is_slot_used(*slot))
            .filter_map(|(_, tuple)| tuple.as_ref())
    }
}

impl fmt::Debug for HeapPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapPage")
            .field("pid", &self.pid)
            .field("slots", &self.slots.len())
            .field("used", &(self.slots.len() - self.num_empty_slots()))
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[inline]
fn bit_is_set(header: &[u8], i: usize) -> bool {
    (header[i / 8] >> (i % 8)) & 1 == 1
}

#[inline]
fn set_bit(header: &mut [u8], i: usize, value: bool) {
    let mask = 1u8 << (i % 8);
    if value {
        header[i / 8] |= mask;
    } else {
        header[i / 8] &= !mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapdb_core::{DataType, TableId, Value};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn int_desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::from_types([DataType::Integer]))
    }

    // 404-byte tuples leave room for exactly 10 slots.
    fn wide_desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::from_types([DataType::Char(400)]))
    }

    fn pid() -> PageId {
        PageId::new(TableId(1), 0)
    }

    fn int_tuple(desc: &Arc<TupleDesc>, v: i32) -> Tuple {
        Tuple::new(desc.clone(), vec![Value::Integer(v)]).unwrap()
    }

    #[test]
    fn test_int_page_geometry() {
        let page = HeapPage::empty(pid(), int_desc());
        assert_eq!(page.num_slots(), 101);
        assert_eq!(page.header_len(), 13);
        assert_eq!(page.num_empty_slots(), 101);
    }

    #[test]
    fn test_header_covers_every_slot() {
        for width in [1u16, 7, 30, 128, 400, 2000, 5000] {
            let desc = TupleDesc::from_types([DataType::Char(width)]);
            let slots = HeapPage::slots_for(&desc);
            let header = HeapPage::header_len_for(slots);
            assert_eq!(header, slots.div_ceil(8));
            assert!(header + slots * desc.byte_size() <= PAGE_SIZE);
        }
    }

    #[test]
    fn test_empty_bytes_decode_to_empty_page() {
        let page =
            HeapPage::from_bytes(pid(), int_desc(), &HeapPage::empty_page_bytes()).unwrap();
        assert_eq!(page.iter().count(), 0);
        assert_eq!(page.to_bytes().unwrap(), HeapPage::empty_page_bytes());
    }

    #[test]
    fn test_insert_fills_lowest_slots_in_order() {
        let desc = int_desc();
        let mut page = HeapPage::empty(pid(), desc.clone());

        for i in 0..5 {
            let mut tuple = int_tuple(&desc, i * 10);
            let slot = page.insert_tuple(&mut tuple).unwrap();
            assert_eq!(slot, i as usize);
            assert_eq!(tuple.record_id(), Some(RecordId::new(pid(), slot)));
        }
        assert_eq!(page.num_empty_slots(), 96);
    }

    #[test]
    fn test_insert_reuses_lowest_freed_slot() {
        let desc = int_desc();
        let mut page = HeapPage::empty(pid(), desc.clone());
        let mut tuples: Vec<_> = (0..4).map(|i| int_tuple(&desc, i)).collect();
        for tuple in tuples.iter_mut() {
            page.insert_tuple(tuple).unwrap();
        }

        page.delete_tuple(&mut tuples[2]).unwrap();
        page.delete_tuple(&mut tuples[1]).unwrap();

        let mut fresh = int_tuple(&desc, 99);
        assert_eq!(page.insert_tuple(&mut fresh).unwrap(), 1);
    }

    #[test]
    fn test_insert_into_full_page_fails() {
        let desc = wide_desc();
        let mut page = HeapPage::empty(pid(), desc.clone());
        for _ in 0..10 {
            let mut tuple = Tuple::new(desc.clone(), vec!["x".into()]).unwrap();
            page.insert_tuple(&mut tuple).unwrap();
        }

        let mut tuple = Tuple::new(desc.clone(), vec!["x".into()]).unwrap();
        assert!(matches!(
            page.insert_tuple(&mut tuple),
            Err(StorageError::PageFull(_))
        ));
        assert_eq!(tuple.record_id(), None);
    }

    #[test]
    fn test_insert_rejects_other_schema() {
        let mut page = HeapPage::empty(pid(), int_desc());
        let mut tuple = Tuple::new(wide_desc(), vec!["x".into()]).unwrap();
        assert!(matches!(
            page.insert_tuple(&mut tuple),
            Err(StorageError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_delete_twice_fails() {
        let desc = int_desc();
        let mut page = HeapPage::empty(pid(), desc.clone());
        let mut tuple = int_tuple(&desc, 1);
        page.insert_tuple(&mut tuple).unwrap();
        let rid = tuple.record_id();

        page.delete_tuple(&mut tuple).unwrap();
        assert_eq!(tuple.record_id(), None);
        assert!(matches!(
            page.delete_tuple(&mut tuple),
            Err(StorageError::MissingRecordId)
        ));

        // Reusing the stale locator hits the emptied slot.
        tuple.set_record_id(rid);
        assert!(matches!(
            page.delete_tuple(&mut tuple),
            Err(StorageError::SlotEmpty { slot: 0, .. })
        ));
    }

    #[test]
    fn test_delete_rejects_foreign_or_invalid_locator() {
        let desc = int_desc();
        let mut page = HeapPage::empty(pid(), desc.clone());

        let mut tuple = int_tuple(&desc, 1);
        tuple.set_record_id(Some(RecordId::new(PageId::new(TableId(1), 9), 0)));
        assert!(matches!(
            page.delete_tuple(&mut tuple),
            Err(StorageError::ForeignRecordId { .. })
        ));

        tuple.set_record_id(Some(RecordId::new(pid(), 500)));
        assert!(matches!(
            page.delete_tuple(&mut tuple),
            Err(StorageError::InvalidSlot { slot: 500, .. })
        ));
    }

    #[test]
    fn test_sparse_page_survives_round_trip() {
        let desc = wide_desc();
        let mut page = HeapPage::empty(pid(), desc.clone());
        assert_eq!(page.num_slots(), 10);

        let mut tuples: Vec<_> = (0..6)
            .map(|i| Tuple::new(desc.clone(), vec![format!("row-{i}").as_str().into()]).unwrap())
            .collect();
        for tuple in tuples.iter_mut() {
            page.insert_tuple(tuple).unwrap();
        }
        for i in [1, 3, 4] {
            page.delete_tuple(&mut tuples[i]).unwrap();
        }

        let bytes = page.to_bytes().unwrap();
        assert_eq!(bytes.len(), PAGE_SIZE);

        let decoded = HeapPage::from_bytes(pid(), desc, &bytes).unwrap();
        let slots: Vec<_> = decoded
            .iter()
            .map(|t| t.record_id().unwrap().slot())
            .collect();
        let names: Vec<_> = decoded.iter().map(|t| t.to_string()).collect();
        assert_eq!(slots, vec![0, 2, 5]);
        assert_eq!(names, vec!["row-0", "row-2", "row-5"]);
    }

    #[test]
    fn test_trailing_bytes_are_zero() {
        let desc = wide_desc();
        let mut page = HeapPage::empty(pid(), desc.clone());
        let mut tuple = Tuple::new(desc.clone(), vec!["abc".into()]).unwrap();
        page.insert_tuple(&mut tuple).unwrap();

        let bytes = page.to_bytes().unwrap();
        let used = page.header_len() + page.num_slots() * desc.byte_size();
        assert!(bytes[used..].iter().all(|&b| b == 0));
        assert_eq!(bytes[0], 0b0000_0001);
    }

    #[test]
    fn test_wrong_buffer_size_is_rejected() {
        let err = HeapPage::from_bytes(pid(), int_desc(), &[0u8; 100]);
        assert!(matches!(err, Err(StorageError::InvalidPageSize(100))));
    }

    #[test]
    fn test_corrupt_field_is_rejected() {
        let mut raw = vec![0u8; PAGE_SIZE];
        let header_len = HeapPage::header_len_for(10);
        raw[0] = 1;
        // Length prefix larger than the declared width.
        raw[header_len..header_len + 4].copy_from_slice(&1000u32.to_be_bytes());

        let err = HeapPage::from_bytes(pid(), wide_desc(), &raw);
        assert!(matches!(err, Err(StorageError::CorruptPage { .. })));
    }

    #[test]
    fn test_dirty_tracking() {
        let mut page = HeapPage::empty(pid(), int_desc());
        let tid = TransactionId::new();
        assert_eq!(page.is_dirty(), None);

        page.mark_dirty(true, tid);
        assert_eq!(page.is_dirty(), Some(tid));

        page.mark_dirty(false, tid);
        assert_eq!(page.is_dirty(), None);
    }

    #[test]
    fn test_before_image_tracks_last_durable_state() {
        let desc = int_desc();
        let mut page =
            HeapPage::from_bytes(pid(), desc.clone(), &HeapPage::empty_page_bytes()).unwrap();

        let mut tuple = int_tuple(&desc, 7);
        page.insert_tuple(&mut tuple).unwrap();
        assert_eq!(page.before_image().unwrap().iter().count(), 0);

        page.set_before_image().unwrap();
        let image = page.before_image().unwrap();
        assert_eq!(image.iter().cloned().collect::<Vec<_>>(), vec![tuple]);
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_occupancy(
            values in proptest::collection::vec(proptest::option::of(any::<i32>()), 101)
        ) {
            let desc = int_desc();
            let mut page = HeapPage::empty(pid(), desc.clone());
            let mut stored = Vec::new();
            for value in &values {
                let mut tuple = int_tuple(&desc, value.unwrap_or(0));
                page.insert_tuple(&mut tuple).unwrap();
                stored.push(tuple);
            }
            for (tuple, value) in stored.iter_mut().zip(&values) {
                if value.is_none() {
                    page.delete_tuple(tuple).unwrap();
                }
            }

            let decoded = HeapPage::from_bytes(pid(), desc, &page.to_bytes().unwrap()).unwrap();
            for slot in 0..page.num_slots() {
                prop_assert_eq!(decoded.is_slot_used(slot), values[slot].is_some());
                prop_assert_eq!(decoded.tuple(slot), page.tuple(slot));
            }
        }
    }
}
