use std::fmt;
use std::sync::Arc;
use parking_lot::RwLock;

use crate::storage::page::header::PageHeader;

/// Default page size in bytes (8KB)
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Smallest supported page size
pub const MIN_PAGE_SIZE: usize = 4096;

/// Largest supported page size
pub const MAX_PAGE_SIZE: usize = 65536;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Tablespace identifier
pub type SpaceId = u32;

/// Page number within a tablespace
pub type PageNo = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Identifies a page: tablespace first, then page number.
///
/// The derived ordering compares `space` before `page_no`, which the redo
/// store relies on for range scans over a single tablespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId {
    space: SpaceId,
    page_no: PageNo,
}

impl PageId {
    pub const fn new(space: SpaceId, page_no: PageNo) -> Self {
        Self { space, page_no }
    }

    pub const fn space(&self) -> SpaceId {
        self.space
    }

    pub const fn page_no(&self) -> PageNo {
        self.page_no
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[page id: space={}, page number={}]", self.space, self.page_no)
    }
}

/// Page structure
///
/// `data` always holds a full page image including the header; the page LSN
/// and identity fields are read from and written into that image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub page_id: PageId,
    pub data: Vec<u8>,
}

impl Page {
    /// Create a zero-filled page
    pub fn new(page_id: PageId, page_size: usize) -> Self {
        Self {
            page_id,
            data: vec![0; page_size],
        }
    }

    /// Wrap an existing page image
    pub fn from_bytes(page_id: PageId, data: Vec<u8>) -> Self {
        Self { page_id, data }
    }

    /// LSN of the latest change applied to this page
    pub fn lsn(&self) -> Lsn {
        PageHeader::read_lsn(&self.data)
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        PageHeader::write_lsn(&mut self.data, lsn);
    }

    /// Write the identity fields and checksum into the page image
    pub fn stamp(&mut self) {
        let header = PageHeader {
            checksum: 0,
            page_no: self.page_id.page_no(),
            space_id: self.page_id.space(),
            lsn: self.lsn(),
            page_type: PageHeader::read_page_type(&self.data),
        };
        header.write_to(&mut self.data);
        PageHeader::write_checksum(&mut self.data);
    }

    /// Whether the on-page identity matches `page_id`. Fresh pages carry no
    /// identity yet and always match.
    pub fn identity_matches(&self) -> bool {
        if self.is_all_zero() {
            return true;
        }
        let header = PageHeader::from_bytes(&self.data);
        header.page_no == self.page_id.page_no() && header.space_id == self.page_id.space()
    }

    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    /// Whether the stored checksum matches the page contents
    pub fn checksum_ok(&self) -> bool {
        PageHeader::verify(&self.data)
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame structure
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

/// Smart pointer to a frame
pub type FramePtr = Arc<RwLock<Frame>>;
