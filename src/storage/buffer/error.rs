use thiserror::Error;
use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

/// Errors raised by the page cache
#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Page {0} is not resident in the buffer pool")]
    PageNotFound(PageId),
    /// Every frame is pinned
    #[error("No free frames available in buffer pool")]
    NoFreeFrames,
    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}
