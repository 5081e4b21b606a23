use std::path::PathBuf;

use crate::common::types::{SpaceId, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::recovery::error::{RecoveryError, Result};

/// Number of undo tablespaces tracked for truncation
pub const MAX_UNDO_SPACES: usize = 127;

/// Configuration for crash recovery
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Directory holding the redo log files
    pub log_dir: PathBuf,

    /// Base name of the redo log files
    pub log_file_base_name: String,

    /// Size of data pages in bytes
    pub page_size: usize,

    /// Size of the sliding window used for parsing
    pub parsing_buf_size: usize,

    /// Number of threads applying records to pages
    pub apply_threads: usize,

    /// Non-zero permits discarding corrupted pages and log tails
    pub force_recovery: u8,

    /// First undo tablespace id; undo spaces occupy
    /// `undo_space_start..undo_space_start + MAX_UNDO_SPACES`
    pub undo_space_start: SpaceId,

    /// Cap on page-sized blocks used to buffer log records. Defaults to a
    /// third of the page cache.
    pub max_log_blocks: Option<usize>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_file_base_name: "redo".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            parsing_buf_size: 2 * 1024 * 1024,
            apply_threads: 4,
            force_recovery: 0,
            undo_space_start: 0xFFFF_FF00,
            max_log_blocks: None,
        }
    }
}

impl RecoveryConfig {
    /// Bytes read from the log per scan step
    pub fn scan_size(&self) -> usize {
        4 * self.page_size
    }

    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(RecoveryError::InvalidConfig(format!(
                "page size {} must be a power of two between {} and {}",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        let scan = self.scan_size();
        if self.parsing_buf_size % scan != 0 || self.parsing_buf_size < 2 * scan {
            return Err(RecoveryError::InvalidConfig(format!(
                "parsing buffer size {} must be a multiple of the scan size {} holding at least two scans",
                self.parsing_buf_size, scan
            )));
        }
        if self.apply_threads == 0 {
            return Err(RecoveryError::InvalidConfig(
                "at least one apply thread is required".to_string(),
            ));
        }
        if self.max_log_blocks == Some(0) {
            return Err(RecoveryError::InvalidConfig(
                "max_log_blocks must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Index into the undo truncation table for `space`, if it is an undo space
    pub fn undo_index(&self, space: SpaceId) -> Option<usize> {
        let idx = space.checked_sub(self.undo_space_start)? as usize;
        (idx < MAX_UNDO_SPACES).then_some(idx)
    }
}
