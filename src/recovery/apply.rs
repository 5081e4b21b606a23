// Applying buffered records to pages
//
// Pages are handed to a pool of workers over a channel. Each worker claims a
// page under the store lock, reads it (unless it is rebuilt from the log),
// applies the records newer than the page LSN in chain order and writes the
// page back to the cache. Different pages are applied concurrently; the
// records of one page are applied by a single worker.

use std::sync::atomic::Ordering;
use std::time::Instant;

use crossbeam::channel;
use log::{error, info, warn};
use parking_lot::Mutex;

use crate::common::types::{Page, PageId};
use crate::recovery::error::{RecoveryError, Result};
use crate::recovery::page_recv::RecvState;
use crate::recovery::recv_sys::RecvSys;
use crate::redo::record::RedoRecord;

impl RecvSys {
    /// Apply the buffered records. An early batch (`last_batch == false`)
    /// ends by flushing the written pages so scanning can resume; after the
    /// last batch no buffered records remain.
    pub fn apply_hashed_log_recs(&self, last_batch: bool) -> Result<()> {
        if last_batch {
            self.apply_log_recs.store(true, Ordering::SeqCst);
        }
        self.apply_batch_on.store(true, Ordering::SeqCst);
        let result = self.apply_batch(last_batch);
        self.apply_batch_on.store(false, Ordering::SeqCst);
        result
    }

    fn apply_batch(&self, last_batch: bool) -> Result<()> {
        self.create_logged_spaces()?;

        let pages = self.store.lock().pending_pages();
        if !pages.is_empty() {
            info!(
                "Starting {} batch of crash recovery for {} pages",
                if last_batch { "the final" } else { "an early" },
                pages.len()
            );
        }

        let n_workers = self.config.apply_threads.min(pages.len()).max(1);
        let (tx, rx) = channel::unbounded::<PageId>();
        for page_id in pages {
            // The receiver outlives this loop
            let _ = tx.send(page_id);
        }
        drop(tx);

        let first_error: Mutex<Option<RecoveryError>> = Mutex::new(None);
        crossbeam::scope(|s| {
            for _ in 0..n_workers {
                let rx = rx.clone();
                let first_error = &first_error;
                s.spawn(move |_| {
                    for page_id in rx.iter() {
                        if first_error.lock().is_some() {
                            break;
                        }
                        if let Err(e) = self.recover_page(page_id) {
                            error!("Failed to recover page {}: {}", page_id, e);
                            first_error.lock().get_or_insert(e);
                            break;
                        }
                        self.report(Instant::now());
                    }
                });
            }
        })
        .map_err(|_| RecoveryError::InvalidState("apply worker panicked".to_string()))?;

        if let Some(e) = first_error.into_inner() {
            return Err(e);
        }

        if last_batch {
            let mut store = self.store.lock();
            if !store.is_empty() {
                return Err(RecoveryError::InvalidState(format!(
                    "{} pages still have buffered redo after the final batch",
                    store.len()
                )));
            }
            store.after_apply = true;
        } else {
            self.page_cleaner.flush()?;
        }
        self.stats.lock().n_batches += 1;
        Ok(())
    }

    /// Create tablespaces that the log created and the catalog lacks
    fn create_logged_spaces(&self) -> Result<()> {
        let created: Vec<_> = self.spaces.lock().created.iter().copied().collect();
        for space in created {
            if !self.catalog.space_exists(space) {
                info!("Creating tablespace {} found in the redo log", space);
                self.catalog.create_space(space)?;
            }
        }
        Ok(())
    }

    /// Apply the buffered records of one page. Pages already claimed by
    /// another worker, or without records, are left alone.
    pub fn recover_page(&self, page_id: PageId) -> Result<()> {
        let will_not_read = {
            let mut store = self.store.lock();
            let Some(recv) = store.get_mut(page_id) else {
                return Ok(());
            };
            let will_not_read = match recv.state {
                RecvState::NotProcessed => false,
                RecvState::WillNotRead => true,
                RecvState::BeingRead | RecvState::BeingProcessed => return Ok(()),
            };
            recv.state = RecvState::BeingRead;
            will_not_read
        };

        let space = page_id.space();
        if !self.catalog.space_exists(space) {
            self.found_corrupt_fs.store(true, Ordering::SeqCst);
            error!("Tablespace {} of page {} is missing", space, page_id);
            return Err(RecoveryError::FilesystemInconsistency(format!(
                "tablespace {} of page {} does not exist",
                space, page_id
            )));
        }

        let page_size = self.config.page_size;
        let mut page = if will_not_read {
            Page::new(page_id, page_size)
        } else {
            match self.read_page_checked(page_id)? {
                Some(page) => page,
                None => return self.corrupted_page(page_id),
            }
        };
        let page_lsn = page.lsn();

        let (snippets, trunc_lsn) = {
            let mut store = self.store.lock();
            if let Some(recv) = store.get_mut(page_id) {
                recv.state = RecvState::BeingProcessed;
            }
            let trunc_lsn = self
                .config
                .undo_index(space)
                .map_or(0, |idx| store.trunc(idx).lsn);
            (store.pending_snippets(page_id), trunc_lsn)
        };

        let mut applied = 0u64;
        let mut end_lsn = page_lsn;
        for (_, lsn, bytes) in &snippets {
            // Already in the page, or superseded by an undo truncation
            if *lsn <= page_lsn || *lsn < trunc_lsn {
                continue;
            }
            let record = RedoRecord::decode(bytes, page_size)
                .ok()
                .flatten()
                .ok_or_else(|| {
                    RecoveryError::InvalidState(format!("undecodable buffered record for {}", page_id))
                })?;
            record.apply_to(&mut page.data);
            end_lsn = *lsn;
            applied += 1;
        }

        if applied > 0 {
            page.set_lsn(end_lsn);
            self.page_cache.write_page(&page)?;
        }

        {
            let mut store = self.store.lock();
            let done = match store.get_mut(page_id) {
                Some(recv) => {
                    recv.last_offset += snippets.len() as u32;
                    recv.pending() == 0
                }
                None => false,
            };
            if done {
                store.clear(page_id);
            }
        }

        let mut stats = self.stats.lock();
        stats.n_pages_applied += 1;
        stats.n_records_applied += applied;
        Ok(())
    }

    /// Read a page, falling back to the doublewrite copy of a torn page.
    /// `None` means the page is corrupted beyond repair.
    fn read_page_checked(&self, page_id: PageId) -> Result<Option<Page>> {
        let page = self.page_cache.read_page(page_id)?;
        if page.checksum_ok() && page.identity_matches() {
            return Ok(Some(page));
        }

        warn!("Page {} is corrupted on disk, looking for a doublewrite copy", page_id);
        let copy = self
            .dblwr
            .read()
            .find_page(page_id)
            .map(|bytes| Page::from_bytes(page_id, bytes.to_vec()));
        match copy {
            Some(copy) if copy.checksum_ok() => {
                info!("Restoring page {} from the doublewrite buffer", page_id);
                self.page_cache.write_page(&copy)?;
                Ok(Some(copy))
            }
            _ => Ok(None),
        }
    }

    fn corrupted_page(&self, page_id: PageId) -> Result<()> {
        if self.config.force_recovery > 0 {
            warn!(
                "Skipping redo for corrupted page {} because force_recovery={}",
                page_id, self.config.force_recovery
            );
            self.store.lock().free_corrupted_page(page_id);
            Ok(())
        } else {
            Err(RecoveryError::CorruptedPage(page_id))
        }
    }
}
