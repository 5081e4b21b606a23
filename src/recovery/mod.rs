// Crash recovery
//
// Scans the redo log from the latest checkpoint, buffers page records per
// page and applies them to the data pages.

pub mod apply;
pub mod arena;
pub mod config;
pub mod dblwr;
pub mod error;
pub mod hooks;
pub mod page_cleaner;
pub mod page_recv;
pub mod parse_buf;
pub mod parser;
pub mod recv_sys;
pub mod scan;
pub mod store;

use std::sync::Arc;

use crate::common::types::Lsn;

pub use config::RecoveryConfig;
pub use error::{RecoveryError, Result};
pub use hooks::{FileOpObserver, PageCache, TablespaceCatalog};
pub use recv_sys::{RecoveryStats, RecvSys};
pub use store::StoreMode;

/// Run the whole recovery pipeline: checkpoint discovery, scanning with any
/// early batches, the final batch and cleanup.
pub fn recover(
    config: RecoveryConfig,
    page_cache: Arc<dyn PageCache>,
    catalog: Arc<dyn TablespaceCatalog>,
    file_ops: Option<Arc<dyn FileOpObserver>>,
    doublewrite_pages: Vec<Vec<u8>>,
    flush_lsn: Lsn,
) -> Result<RecoveryStats> {
    let recv_sys = RecvSys::create(config, page_cache, catalog, file_ops)?;
    recv_sys.load_doublewrite(doublewrite_pages);
    recv_sys.recovery_from_checkpoint_start(flush_lsn)?;
    recv_sys.apply_hashed_log_recs(true)?;
    let stats = recv_sys.recovery_from_checkpoint_finish()?;
    recv_sys.close();
    Ok(stats)
}
