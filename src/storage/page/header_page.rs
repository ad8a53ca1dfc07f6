use crate::common::{PageId, PAGE_SIZE};

// | record_count (4) | records... |, each record:
// | index name (32, NUL padded) | root_page_id (4) |
const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

fn encode_name(name: &str) -> [u8; NAME_SIZE] {
    let mut out = [0u8; NAME_SIZE];
    let bytes = name.as_bytes();
    assert!(bytes.len() <= NAME_SIZE, "index name too long");
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

/// Read-only view over the reserved header page (page 0), which records
/// the root page id of every index by name.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(
            self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        ) as usize
    }

    fn find(&self, name: &str) -> Option<usize> {
        let encoded = encode_name(name);
        (0..self.record_count()).find(|&i| {
            let offset = record_offset(i);
            self.data[offset..offset + NAME_SIZE] == encoded
        })
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find(name).map(|i| {
            let offset = record_offset(i) + NAME_SIZE;
            PageId::new(u32::from_le_bytes(
                self.data[offset..offset + 4].try_into().unwrap(),
            ))
        })
    }
}

/// Mutable view over the header page.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn as_ref(&self) -> HeaderPageRef<'_> {
        HeaderPageRef::new(self.data)
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn write_record(&mut self, index: usize, name: &str, root_id: PageId) {
        let offset = record_offset(index);
        self.data[offset..offset + NAME_SIZE].copy_from_slice(&encode_name(name));
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root_id.as_u32().to_le_bytes());
    }

    /// Appends a record. Returns false if the name already exists or the
    /// page is full.
    pub fn insert_record(&mut self, name: &str, root_id: PageId) -> bool {
        let count = self.as_ref().record_count();
        if count >= MAX_HEADER_RECORDS || self.as_ref().find(name).is_some() {
            return false;
        }
        self.write_record(count, name, root_id);
        self.set_record_count(count + 1);
        true
    }

    /// Rewrites an existing record. Returns false if the name is unknown.
    pub fn update_record(&mut self, name: &str, root_id: PageId) -> bool {
        let Some(index) = self.as_ref().find(name) else {
            return false;
        };
        self.write_record(index, name, root_id);
        true
    }

    /// Drops a record, compacting the tail. Returns false if unknown.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(index) = self.as_ref().find(name) else {
            return false;
        };
        let count = self.as_ref().record_count();
        self.data
            .copy_within(record_offset(index + 1)..record_offset(count), record_offset(index));
        self.set_record_count(count - 1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);

        assert!(page.insert_record("orders_pk", PageId::new(7)));
        assert!(!page.insert_record("orders_pk", PageId::new(8)));

        let view = HeaderPageRef::new(&data);
        assert_eq!(view.record_count(), 1);
        assert_eq!(view.get_root_id("orders_pk"), Some(PageId::new(7)));
        assert_eq!(view.get_root_id("missing"), None);
    }

    #[test]
    fn test_update() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);

        assert!(!page.update_record("idx", PageId::new(1)));
        assert!(page.insert_record("idx", PageId::new(1)));
        assert!(page.update_record("idx", PageId::new(2)));

        assert_eq!(HeaderPageRef::new(&data).get_root_id("idx"), Some(PageId::new(2)));
    }

    #[test]
    fn test_delete_compacts() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut page = HeaderPage::new(&mut data);

        page.insert_record("a", PageId::new(1));
        page.insert_record("b", PageId::new(2));
        page.insert_record("c", PageId::new(3));

        assert!(page.delete_record("b"));
        let view = HeaderPageRef::new(&data);
        assert_eq!(view.record_count(), 2);
        assert_eq!(view.get_root_id("a"), Some(PageId::new(1)));
        assert_eq!(view.get_root_id("c"), Some(PageId::new(3)));
        assert_eq!(view.get_root_id("b"), None);
    }
}
