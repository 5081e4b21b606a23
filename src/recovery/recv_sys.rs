// Recovery context
//
// One `RecvSys` is created when recovery starts and threaded through the
// scan, parse and apply phases. It owns the parsing buffer, the buffered
// records and all recovery flags.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::common::types::{Lsn, PageId};
use crate::recovery::arena::LogArena;
use crate::recovery::config::RecoveryConfig;
use crate::recovery::dblwr::RecvDblwr;
use crate::recovery::error::{RecoveryError, Result};
use crate::recovery::hooks::{FileOpObserver, PageCache, TablespaceCatalog};
use crate::recovery::page_cleaner::PageCleaner;
use crate::recovery::parse_buf::ParsingBuffer;
use crate::recovery::parser::SpaceTracker;
use crate::recovery::store::{RedoStore, StoreMode};
use crate::redo::checkpoint::{find_max_checkpoint, Checkpoint};
use crate::redo::files::LogFiles;
use crate::redo::format::{LOG_BLOCK_HDR_SIZE, LOG_BLOCK_SIZE, LOG_BLOCK_TRL_SIZE};

/// Minimum interval between progress reports
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(15);

/// Counters describing a recovery run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub checkpoint_lsn: Lsn,
    /// End of the recovered log
    pub end_lsn: Lsn,
    /// Mini-transactions parsed after the checkpoint
    pub n_mtrs: u64,
    /// Page records buffered
    pub n_records: u64,
    /// Page records applied to pages
    pub n_records_applied: u64,
    /// Pages written back by the apply engine
    pub n_pages_applied: u64,
    /// Apply batches, early ones included
    pub n_batches: u64,
    /// Tablespace file operations seen
    pub n_file_ops: u64,
    /// End LSN of the file checkpoint record matching the checkpoint
    pub file_checkpoint_lsn: Option<Lsn>,
}

pub struct RecvSys {
    pub(crate) config: RecoveryConfig,
    pub(crate) log_files: LogFiles,
    pub(crate) page_cache: Arc<dyn PageCache>,
    pub(crate) catalog: Arc<dyn TablespaceCatalog>,
    pub(crate) file_ops: Option<Arc<dyn FileOpObserver>>,

    pub(crate) parsing: Mutex<ParsingBuffer>,
    pub(crate) store: Mutex<RedoStore>,
    pub(crate) spaces: Mutex<SpaceTracker>,
    pub(crate) dblwr: RwLock<RecvDblwr>,
    pub(crate) page_cleaner: PageCleaner,
    pub(crate) stats: Mutex<RecoveryStats>,
    checkpoint: Mutex<Option<Checkpoint>>,
    progress_time: Mutex<Instant>,

    /// Recovery is running
    pub(crate) recovery_on: AtomicBool,
    /// The log holds records past the checkpoint
    pub(crate) needed_recovery: AtomicBool,
    /// Page LSNs are checked against the log
    pub(crate) lsn_checks_on: AtomicBool,
    pub(crate) found_corrupt_log: AtomicBool,
    pub(crate) found_corrupt_fs: AtomicBool,
    /// The final batch has started
    pub(crate) apply_log_recs: AtomicBool,
    /// An apply batch is running
    pub(crate) apply_batch_on: AtomicBool,
    corrupt_lsn: AtomicU64,
}

impl RecvSys {
    /// Create the recovery context. Nothing is read from the log yet.
    pub fn create(
        config: RecoveryConfig,
        page_cache: Arc<dyn PageCache>,
        catalog: Arc<dyn TablespaceCatalog>,
        file_ops: Option<Arc<dyn FileOpObserver>>,
    ) -> Result<Self> {
        config.validate()?;
        if page_cache.page_size() != config.page_size {
            return Err(RecoveryError::InvalidConfig(format!(
                "page cache uses {}-byte pages, recovery is configured for {}",
                page_cache.page_size(),
                config.page_size
            )));
        }

        let log_files = LogFiles::open(&config.log_dir, &config.log_file_base_name)?;
        let max_blocks = config
            .max_log_blocks
            .unwrap_or(page_cache.pool_size() / 3)
            .max(1);
        info!(
            "Recovery buffer limited to {} blocks of {} bytes",
            max_blocks, config.page_size
        );

        let arena = LogArena::new(config.page_size, max_blocks);
        let parsing = ParsingBuffer::new(config.parsing_buf_size);
        let page_cleaner = PageCleaner::start(page_cache.clone())?;

        Ok(Self {
            log_files,
            page_cache,
            catalog,
            file_ops,
            parsing: Mutex::new(parsing),
            store: Mutex::new(RedoStore::new(arena)),
            spaces: Mutex::new(SpaceTracker::default()),
            dblwr: RwLock::new(RecvDblwr::new()),
            page_cleaner,
            stats: Mutex::new(RecoveryStats::default()),
            checkpoint: Mutex::new(None),
            progress_time: Mutex::new(Instant::now()),
            recovery_on: AtomicBool::new(true),
            needed_recovery: AtomicBool::new(false),
            lsn_checks_on: AtomicBool::new(false),
            found_corrupt_log: AtomicBool::new(false),
            found_corrupt_fs: AtomicBool::new(false),
            apply_log_recs: AtomicBool::new(false),
            apply_batch_on: AtomicBool::new(false),
            corrupt_lsn: AtomicU64::new(0),
            config,
        })
    }

    /// Release all buffered records and stop the page cleaner
    pub fn close(self) {
        self.debug_free();
        self.page_cleaner.shutdown();
        self.recovery_on.store(false, Ordering::SeqCst);
    }

    /// Drop buffered records and parsing state; the context stays usable
    pub fn debug_free(&self) {
        self.store.lock().reset();
        *self.parsing.lock() = ParsingBuffer::new(self.config.parsing_buf_size);
        *self.spaces.lock() = SpaceTracker::default();
        self.dblwr.write().clear();
    }

    /// Make page images from the doublewrite area available for torn-page
    /// repair. Later images take precedence.
    pub fn load_doublewrite<I: IntoIterator<Item = Vec<u8>>>(&self, pages: I) {
        let mut dblwr = self.dblwr.write();
        for page in pages {
            dblwr.add(page);
        }
        if !dblwr.is_empty() {
            info!("Loaded {} pages from the doublewrite buffer", dblwr.len());
        }
    }

    /// Locate the checkpoint and scan the log from it, buffering records and
    /// running early apply batches as memory requires. `flush_lsn` is the
    /// highest LSN known to be in the data files (0 if unknown).
    pub fn recovery_from_checkpoint_start(&self, flush_lsn: Lsn) -> Result<()> {
        let header = self.log_files.read_header()?;
        if !header.validate() {
            error!(
                "Unsupported redo log format: magic {:#x}, version {}",
                header.magic, header.version
            );
            return Err(RecoveryError::UnsupportedFormat);
        }

        let cp = find_max_checkpoint(&self.log_files)?;
        let offset = (cp.lsn % LOG_BLOCK_SIZE as u64) as usize;
        if !(LOG_BLOCK_HDR_SIZE..LOG_BLOCK_SIZE - LOG_BLOCK_TRL_SIZE).contains(&offset) {
            error!("Checkpoint LSN {} does not point into a log block payload", cp.lsn);
            return Err(RecoveryError::LogCorrupted(cp.lsn));
        }
        *self.checkpoint.lock() = Some(cp);
        self.stats.lock().checkpoint_lsn = cp.lsn;
        self.lsn_checks_on.store(true, Ordering::SeqCst);

        let mut store = StoreMode::Yes;
        let mut start_lsn = cp.lsn;
        loop {
            self.group_scan_log_recs(cp.lsn, start_lsn, &mut store)?;
            if store != StoreMode::No || (self.found_corrupt_log() && self.config.force_recovery == 0) {
                break;
            }
            // The buffer filled up: apply what we have, then continue from
            // the last buffered mini-transaction. A corrupt block further on
            // stops the rescan again, so records before it are not lost.
            self.apply_hashed_log_recs(false)?;
            start_lsn = self.store.lock().last_stored_lsn;
            store = StoreMode::IfExists;
            info!("Resuming redo log scan from LSN {}", start_lsn);
        }

        let recovered_lsn = self.parsing.lock().recovered_lsn;
        if self.found_corrupt_log() {
            let lsn = self.corrupt_lsn.load(Ordering::SeqCst);
            if self.config.force_recovery == 0 {
                error!("Redo log is corrupted at LSN {}; set force_recovery to ignore", lsn);
                return Err(RecoveryError::LogCorrupted(lsn));
            }
            warn!(
                "Ignoring redo log from LSN {} on because force_recovery={}",
                lsn, self.config.force_recovery
            );
        }

        if flush_lsn != 0 {
            if flush_lsn > recovered_lsn {
                error!(
                    "The log sequence number {} in the data files is in the future; the redo log ends at {}",
                    flush_lsn, recovered_lsn
                );
                self.found_corrupt_fs.store(true, Ordering::SeqCst);
                if self.config.force_recovery == 0 {
                    return Err(RecoveryError::FilesystemInconsistency(format!(
                        "data files are at LSN {} but the redo log ends at {}",
                        flush_lsn, recovered_lsn
                    )));
                }
            } else if flush_lsn < cp.lsn {
                warn!(
                    "Data files were flushed up to LSN {}, before the checkpoint at {}",
                    flush_lsn, cp.lsn
                );
            }
        }

        self.stats.lock().end_lsn = recovered_lsn;
        if self.needed_recovery() {
            info!(
                "Redo log ends at LSN {}; {} pages have buffered records",
                recovered_lsn,
                self.store.lock().len()
            );
        } else {
            info!("No crash recovery needed, log ends at LSN {}", recovered_lsn);
        }
        Ok(())
    }

    /// Finish recovery after the final batch
    pub fn recovery_from_checkpoint_finish(&self) -> Result<RecoveryStats> {
        {
            let store = self.store.lock();
            if !store.is_empty() {
                return Err(RecoveryError::InvalidState(format!(
                    "{} pages still have unapplied redo",
                    store.len()
                )));
            }
        }
        if self.found_corrupt_fs() && self.config.force_recovery == 0 {
            return Err(RecoveryError::FilesystemInconsistency(
                "tablespaces referenced by the redo log are missing".to_string(),
            ));
        }

        self.page_cache.flush_all()?;

        let truncations: Vec<(usize, u32)> = self.store.lock().truncations().collect();
        for (idx, pages) in truncations {
            let space = self.config.undo_space_start + idx as u32;
            if self.catalog.space_exists(space) {
                info!("Truncating undo tablespace {} to {} pages", space, pages);
                self.catalog.truncate_space(space, pages)?;
            }
        }

        self.page_cleaner.shutdown();
        self.apply_log_recs.store(false, Ordering::SeqCst);
        self.recovery_on.store(false, Ordering::SeqCst);
        let stats = self.stats();
        info!(
            "Crash recovery finished: {} pages, {} records applied in {} batches",
            stats.n_pages_applied, stats.n_records_applied, stats.n_batches
        );
        Ok(stats)
    }

    /// Log progress if the last report is at least `PROGRESS_INTERVAL` old.
    /// Returns whether a report was made.
    pub fn report(&self, time: Instant) -> bool {
        let mut last = self.progress_time.lock();
        if time.saturating_duration_since(*last) < PROGRESS_INTERVAL {
            return false;
        }
        *last = time;
        drop(last);
        info!("To recover: {} pages from log", self.store.lock().len());
        true
    }

    pub(crate) fn flag_corrupt_log(&self, lsn: Lsn) {
        if !self.found_corrupt_log.swap(true, Ordering::SeqCst) {
            self.corrupt_lsn.store(lsn, Ordering::SeqCst);
        }
    }

    pub fn found_corrupt_log(&self) -> bool {
        self.found_corrupt_log.load(Ordering::SeqCst)
    }

    pub fn found_corrupt_fs(&self) -> bool {
        self.found_corrupt_fs.load(Ordering::SeqCst)
    }

    pub fn needed_recovery(&self) -> bool {
        self.needed_recovery.load(Ordering::SeqCst)
    }

    pub fn recovery_on(&self) -> bool {
        self.recovery_on.load(Ordering::SeqCst)
    }

    pub fn lsn_checks_on(&self) -> bool {
        self.lsn_checks_on.load(Ordering::SeqCst)
    }

    pub fn is_applying(&self) -> bool {
        self.apply_batch_on.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        *self.checkpoint.lock()
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats.lock().clone()
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// LSN up to which complete mini-transactions have been parsed
    pub fn recovered_lsn(&self) -> Lsn {
        self.parsing.lock().recovered_lsn
    }

    /// Number of pages with buffered records
    pub fn n_pending_pages(&self) -> usize {
        self.store.lock().len()
    }

    /// Blocks the redo buffer currently uses
    pub fn n_log_blocks(&self) -> usize {
        self.store.lock().arena().n_blocks()
    }

    /// LSNs of the buffered records of a page, in chain order
    pub fn buffered_lsns(&self, page_id: PageId) -> Vec<Lsn> {
        self.store
            .lock()
            .pending_snippets(page_id)
            .into_iter()
            .map(|(_, lsn, _)| lsn)
            .collect()
    }
}
