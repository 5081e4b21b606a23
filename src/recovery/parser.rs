// Mini-transaction parser
//
// Consumes the parsing buffer one whole mini-transaction at a time and hands
// page records to the redo store. A mini-transaction cut off by the end of
// the window is left in place until more log is scanned.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use log::{debug, error, info};

use crate::common::types::{Lsn, SpaceId};
use crate::recovery::error::{RecoveryError, Result};
use crate::recovery::recv_sys::RecvSys;
use crate::recovery::store::{RedoStore, StoreMode};
use crate::redo::format::lsn_add_payload;
use crate::redo::record::{RecordError, RecordType, RedoRecord, MTR_END_MARKER, MTR_END_SIZE};

/// Outcome of decoding one mini-transaction
#[derive(Debug)]
pub enum MtrParse<'a> {
    /// The window ends inside the mini-transaction
    Incomplete,
    Corrupt(RecordError),
    Complete {
        records: Vec<RedoRecord<'a>>,
        /// Bytes consumed, end marker included
        len: usize,
    },
}

/// Decode the mini-transaction at the start of `window`
pub fn parse_mtr(window: &[u8], page_size: usize) -> MtrParse<'_> {
    let mut records = Vec::new();
    let mut pos = 0;
    loop {
        let Some(&tag) = window.get(pos) else {
            return MtrParse::Incomplete;
        };
        if tag == MTR_END_MARKER {
            if window.len() < pos + MTR_END_SIZE {
                return MtrParse::Incomplete;
            }
            let stored = u32::from_le_bytes([
                window[pos + 1],
                window[pos + 2],
                window[pos + 3],
                window[pos + 4],
            ]);
            if records.is_empty() {
                return MtrParse::Corrupt(RecordError::EmptyMtr);
            }
            if stored != crc32fast::hash(&window[..pos]) {
                return MtrParse::Corrupt(RecordError::ChecksumMismatch);
            }
            return MtrParse::Complete {
                records,
                len: pos + MTR_END_SIZE,
            };
        }
        match RedoRecord::decode(&window[pos..], page_size) {
            Ok(Some(record)) => {
                pos += record.raw().len();
                records.push(record);
            }
            Ok(None) => return MtrParse::Incomplete,
            Err(e) => return MtrParse::Corrupt(e),
        }
    }
}

/// Tablespace lifecycle seen while parsing
#[derive(Debug, Default)]
pub struct SpaceTracker {
    /// Created by the log and not deleted since
    pub created: BTreeSet<SpaceId>,
    /// Deleted by the log and not re-created since
    pub deleted: BTreeSet<SpaceId>,
    /// End LSN of the last mini-transaction whose file operations were
    /// processed; rescans after an early batch do not repeat them
    pub file_ops_lsn: Lsn,
}

impl RecvSys {
    /// Parse every complete mini-transaction in the parsing buffer.
    ///
    /// Returns `Ok(true)` if corruption was found; the sticky corruption flag
    /// is set as well. Fails only if a single mini-transaction cannot be
    /// buffered even with the redo store empty.
    pub fn parse(&self, checkpoint_lsn: Lsn, store: &mut StoreMode) -> Result<bool> {
        let page_size = self.config.page_size;
        let mut pb = self.parsing.lock();
        let mut redo = self.store.lock();

        loop {
            let start_lsn = pb.recovered_lsn;
            let (len, end_lsn) = {
                let window = pb.window();
                if window.is_empty() {
                    return Ok(false);
                }
                match parse_mtr(window, page_size) {
                    MtrParse::Incomplete => return Ok(false),
                    MtrParse::Corrupt(e) => {
                        error!("Corrupted redo record at LSN {}: {}", start_lsn, e);
                        self.flag_corrupt_log(start_lsn);
                        return Ok(true);
                    }
                    MtrParse::Complete { records, len } => {
                        let end_lsn = lsn_add_payload(start_lsn, len);
                        self.store_mtr(&records, start_lsn, end_lsn, checkpoint_lsn, store, &mut redo)?;
                        (len, end_lsn)
                    }
                }
            };
            pb.recovered_offset += len;
            pb.recovered_lsn = end_lsn;
        }
    }

    fn store_mtr(
        &self,
        records: &[RedoRecord<'_>],
        start_lsn: Lsn,
        end_lsn: Lsn,
        checkpoint_lsn: Lsn,
        store: &mut StoreMode,
        redo: &mut RedoStore,
    ) -> Result<()> {
        let mut spaces = self.spaces.lock();
        if end_lsn > spaces.file_ops_lsn {
            for record in records {
                self.note_space_op(record, end_lsn, checkpoint_lsn, &mut spaces, redo);
            }
            spaces.file_ops_lsn = end_lsn;
            self.stats.lock().n_mtrs += 1;
        }

        let mode = *store;
        if mode == StoreMode::No {
            return Ok(());
        }
        debug_assert!(
            !self.apply_log_recs.load(Ordering::SeqCst),
            "records buffered during the final batch"
        );

        let keep = |space: SpaceId| {
            !spaces.deleted.contains(&space)
                && (mode == StoreMode::Yes
                    || spaces.created.contains(&space)
                    || self.catalog.space_exists(space))
        };
        let page_records: Vec<&RedoRecord<'_>> = records
            .iter()
            .filter(|r| r.rtype().is_page_op() && keep(r.space()))
            .collect();
        let lens: Vec<usize> = page_records.iter().map(|r| r.raw().len()).collect();

        if !redo.can_fit(&lens) {
            if redo.arena().is_empty() {
                error!(
                    "Mini-transaction at LSN {} needs {} bytes, more than the redo buffer holds",
                    start_lsn,
                    lens.iter().sum::<usize>()
                );
                return Err(RecoveryError::MemoryExhausted);
            }
            redo.stop_storing(store, start_lsn);
            return Ok(());
        }

        for record in records {
            let space = record.space();
            let stored = match record.rtype() {
                RecordType::InitPage | RecordType::FreePage if keep(space) => {
                    redo.add_init(record.page_id(), end_lsn, record.raw())
                }
                RecordType::Write | RecordType::Memset if keep(space) => {
                    redo.add(record.page_id(), end_lsn, record.raw())
                }
                RecordType::TrimSpace => {
                    redo.trim_space(space, record.trim_pages(), end_lsn);
                    true
                }
                RecordType::FileDelete => {
                    redo.trim_space(space, 0, end_lsn);
                    true
                }
                _ => true,
            };
            if !stored {
                return Err(RecoveryError::InvalidState(format!(
                    "redo buffer rejected a record at LSN {} after reserving room",
                    end_lsn
                )));
            }
        }
        self.stats.lock().n_records += page_records.len() as u64;

        redo.is_memory_exhausted(store, end_lsn);
        Ok(())
    }

    /// Bookkeeping for records that are not page changes
    fn note_space_op(
        &self,
        record: &RedoRecord<'_>,
        end_lsn: Lsn,
        checkpoint_lsn: Lsn,
        spaces: &mut SpaceTracker,
        redo: &mut RedoStore,
    ) {
        let space = record.space();
        match record.rtype() {
            RecordType::FileCreate => {
                spaces.created.insert(space);
                spaces.deleted.remove(&space);
                if let Some(idx) = self.config.undo_index(space) {
                    redo.set_trunc_lsn(idx, end_lsn);
                }
            }
            RecordType::FileDelete => {
                spaces.deleted.insert(space);
                spaces.created.remove(&space);
            }
            RecordType::TrimSpace => {
                if let Some(idx) = self.config.undo_index(space) {
                    redo.set_trunc_pages(idx, record.trim_pages());
                }
            }
            RecordType::FileCheckpoint => {
                if record.checkpoint_lsn() == checkpoint_lsn {
                    info!("Found the file checkpoint for LSN {} at LSN {}", checkpoint_lsn, end_lsn);
                    self.stats.lock().file_checkpoint_lsn = Some(end_lsn);
                }
            }
            _ => {}
        }
        if !record.rtype().is_file_op() {
            return;
        }

        let (name, new_name) = record.file_names();
        debug!(
            "{:?} of tablespace {} ({}) at LSN {}",
            record.rtype(),
            space,
            String::from_utf8_lossy(name),
            end_lsn
        );
        self.stats.lock().n_file_ops += 1;
        if let Some(observer) = &self.file_ops {
            observer.log_file_op(
                space,
                record.rtype() == RecordType::FileCreate,
                name,
                new_name,
            );
        }
    }
}
