// redorecv: crash recovery for a paged storage engine

pub mod common;
pub mod recovery;
pub mod redo;
pub mod storage;

// Re-export key items for convenient access
pub use common::types::{Lsn, Page, PageId};
pub use recovery::{recover, RecoveryConfig, RecoveryError, RecoveryStats, RecvSys};
pub use redo::{LogFiles, LogWriter, MtrBuilder};
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::{DiskManager, DiskManagerError};
