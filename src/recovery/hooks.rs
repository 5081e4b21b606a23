// Collaborators supplied by the engine hosting recovery

use crate::common::types::{Page, PageId, PageNo, SpaceId};
use crate::storage::buffer::BufferPoolError;
use crate::storage::disk::{DiskManager, DiskManagerError};

/// Page cache that owns page frames and performs page I/O
pub trait PageCache: Send + Sync {
    fn page_size(&self) -> usize;

    /// Number of frames in the cache
    fn pool_size(&self) -> usize;

    /// Copy of the current image of a page. Pages past the end of a
    /// tablespace read as zeros.
    fn read_page(&self, page_id: PageId) -> Result<Page, BufferPoolError>;

    /// Hand a modified page back to the cache. The cache stamps its header
    /// and marks it dirty.
    fn write_page(&self, page: &Page) -> Result<(), BufferPoolError>;

    /// Write all dirty pages to disk
    fn flush_all(&self) -> Result<(), BufferPoolError>;
}

/// Knows which tablespaces exist
pub trait TablespaceCatalog: Send + Sync {
    fn space_exists(&self, space_id: SpaceId) -> bool;

    fn create_space(&self, space_id: SpaceId) -> Result<(), DiskManagerError>;

    /// Shrink a tablespace to `pages` pages
    fn truncate_space(&self, space_id: SpaceId, pages: PageNo) -> Result<(), DiskManagerError>;
}

/// Notified of tablespace file operations found in the log
pub trait FileOpObserver: Send + Sync {
    /// `new_name` is set for renames only
    fn log_file_op(&self, space_id: SpaceId, create: bool, name: &[u8], new_name: Option<&[u8]>);
}

impl TablespaceCatalog for DiskManager {
    fn space_exists(&self, space_id: SpaceId) -> bool {
        DiskManager::space_exists(self, space_id)
    }

    fn create_space(&self, space_id: SpaceId) -> Result<(), DiskManagerError> {
        DiskManager::create_space(self, space_id)
    }

    fn truncate_space(&self, space_id: SpaceId, pages: PageNo) -> Result<(), DiskManagerError> {
        DiskManager::truncate_space(self, space_id, pages)
    }
}
