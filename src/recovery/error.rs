use thiserror::Error;

use crate::common::types::{Lsn, PageId};
use crate::redo::files::LogFileError;
use crate::storage::buffer::BufferPoolError;
use crate::storage::disk::DiskManagerError;

/// Error type for crash recovery
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Log file error: {0}")]
    LogFile(#[from] LogFileError),

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Tablespace error: {0}")]
    Disk(#[from] DiskManagerError),

    #[error("No valid checkpoint found in the redo log")]
    CheckpointNotFound,

    #[error("Unsupported redo log format")]
    UnsupportedFormat,

    #[error("Redo log is corrupted near LSN {0}")]
    LogCorrupted(Lsn),

    #[error("Data files are inconsistent with the redo log: {0}")]
    FilesystemInconsistency(String),

    #[error("Redo log records do not fit in the recovery buffer")]
    MemoryExhausted,

    #[error("Page {0} is corrupted and has no doublewrite copy")]
    CorruptedPage(PageId),

    #[error("Invalid recovery state: {0}")]
    InvalidState(String),

    #[error("Invalid recovery configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;
