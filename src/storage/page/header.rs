use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageNo, SpaceId};
use crate::storage::page::layout::{
    PAGE_CHECKSUM_OFFSET, PAGE_LSN_OFFSET, PAGE_NO_OFFSET, PAGE_SPACE_OFFSET, PAGE_TYPE_OFFSET,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageHeader {
    pub checksum: u32,
    pub page_no: PageNo,
    pub space_id: SpaceId,
    pub lsn: Lsn,
    pub page_type: u16,
}

impl PageHeader {
    // Deserialize header from a page image
    pub fn from_bytes(page: &[u8]) -> Self {
        Self {
            checksum: LittleEndian::read_u32(&page[PAGE_CHECKSUM_OFFSET..PAGE_NO_OFFSET]),
            page_no: LittleEndian::read_u32(&page[PAGE_NO_OFFSET..PAGE_SPACE_OFFSET]),
            space_id: LittleEndian::read_u32(&page[PAGE_SPACE_OFFSET..PAGE_LSN_OFFSET]),
            lsn: LittleEndian::read_u64(&page[PAGE_LSN_OFFSET..PAGE_TYPE_OFFSET]),
            page_type: Self::read_page_type(page),
        }
    }

    // Serialize header into a page image. The checksum field is written
    // as-is; use `write_checksum` once the body is final.
    pub fn write_to(&self, page: &mut [u8]) {
        LittleEndian::write_u32(&mut page[PAGE_CHECKSUM_OFFSET..PAGE_NO_OFFSET], self.checksum);
        LittleEndian::write_u32(&mut page[PAGE_NO_OFFSET..PAGE_SPACE_OFFSET], self.page_no);
        LittleEndian::write_u32(&mut page[PAGE_SPACE_OFFSET..PAGE_LSN_OFFSET], self.space_id);
        LittleEndian::write_u64(&mut page[PAGE_LSN_OFFSET..PAGE_TYPE_OFFSET], self.lsn);
        LittleEndian::write_u16(&mut page[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 2], self.page_type);
    }

    pub fn read_lsn(page: &[u8]) -> Lsn {
        LittleEndian::read_u64(&page[PAGE_LSN_OFFSET..PAGE_TYPE_OFFSET])
    }

    pub fn write_lsn(page: &mut [u8], lsn: Lsn) {
        LittleEndian::write_u64(&mut page[PAGE_LSN_OFFSET..PAGE_TYPE_OFFSET], lsn);
    }

    pub fn read_page_type(page: &[u8]) -> u16 {
        LittleEndian::read_u16(&page[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 2])
    }

    pub fn compute_checksum(page: &[u8]) -> u32 {
        crc32fast::hash(&page[PAGE_NO_OFFSET..])
    }

    pub fn write_checksum(page: &mut [u8]) {
        let checksum = Self::compute_checksum(page);
        LittleEndian::write_u32(&mut page[PAGE_CHECKSUM_OFFSET..PAGE_NO_OFFSET], checksum);
    }

    /// Validate a page image read from disk. All-zero pages were never
    /// written and are accepted.
    pub fn verify(page: &[u8]) -> bool {
        if page.iter().all(|&b| b == 0) {
            return true;
        }
        let stored = LittleEndian::read_u32(&page[PAGE_CHECKSUM_OFFSET..PAGE_NO_OFFSET]);
        stored == Self::compute_checksum(page)
    }
}
