// Log scanning
//
// Reads the log in chunks of `RecoveryConfig::scan_size()` bytes, checks the
// framing of every block and feeds the payload to the parsing buffer.

use std::sync::atomic::Ordering;

use log::{debug, error, info};

use crate::common::types::Lsn;
use crate::recovery::error::Result;
use crate::recovery::recv_sys::RecvSys;
use crate::recovery::store::StoreMode;
use crate::redo::format::{align_down, block_no_for_lsn, LogBlock, LOG_BLOCK_HDR_SIZE, LOG_BLOCK_SIZE};

/// Blocks of headroom the parsing buffer must keep
const PARSING_BUF_MARGIN: usize = 4;

impl RecvSys {
    /// Parse the log from the latest checkpoint to its end without buffering
    /// anything. Returns the checkpoint LSN and the end of the log.
    pub fn scan_only(&self) -> Result<(Lsn, Lsn)> {
        let cp = crate::redo::checkpoint::find_max_checkpoint(&self.log_files)?;
        let mut store = StoreMode::No;
        self.group_scan_log_recs(cp.lsn, cp.lsn, &mut store)?;
        let end_lsn = self.parsing.lock().recovered_lsn;
        self.stats.lock().end_lsn = end_lsn;
        Ok((cp.lsn, end_lsn))
    }

    /// Scan the log from `start_lsn`, which must be the start of a
    /// mini-transaction, until the end of the log or corruption. Returns the
    /// LSN up to which the log was scanned.
    pub(crate) fn group_scan_log_recs(
        &self,
        checkpoint_lsn: Lsn,
        start_lsn: Lsn,
        store: &mut StoreMode,
    ) -> Result<Lsn> {
        debug!("Scanning redo log from LSN {} with {:?}", start_lsn, store);
        self.parsing.lock().reset(start_lsn);

        let scan_size = self.config.scan_size();
        let mut buf = vec![0u8; scan_size];
        let mut read_lsn = align_down(start_lsn);
        let mut scanned_lsn = read_lsn;
        loop {
            self.log_files.read_log_seg(&mut buf, read_lsn)?;
            let finished = self.scan_log_recs(store, &buf, checkpoint_lsn, read_lsn, &mut scanned_lsn)?;
            if finished {
                break;
            }
            read_lsn += scan_size as u64;
        }
        debug!("Scanned redo log up to LSN {}", scanned_lsn);
        Ok(scanned_lsn)
    }

    /// Scan one chunk read at `start_lsn`. Returns true when the end of the
    /// log or corruption was reached in this chunk.
    pub(crate) fn scan_log_recs(
        &self,
        store: &mut StoreMode,
        buf: &[u8],
        checkpoint_lsn: Lsn,
        start_lsn: Lsn,
        group_scanned_lsn: &mut Lsn,
    ) -> Result<bool> {
        let mut scanned_lsn = start_lsn;
        let mut finished = false;
        let mut more_data = false;
        let mut corrupt_at = None;

        {
            let mut pb = self.parsing.lock();
            for bytes in buf.chunks_exact(LOG_BLOCK_SIZE) {
                let block = LogBlock::new(bytes);
                if block.hdr_no() != block_no_for_lsn(scanned_lsn) {
                    // Stale or never written: the log ends here
                    finished = true;
                    break;
                }
                if !block.checksum_is_ok() {
                    error!(
                        "Log block {} at LSN {} has checksum {:#010x}, expected {:#010x}",
                        block.hdr_no(),
                        scanned_lsn,
                        block.stored_checksum(),
                        crate::redo::format::block_checksum(bytes)
                    );
                    corrupt_at = Some(scanned_lsn);
                    finished = true;
                    break;
                }
                let data_len = block.data_len();
                if !(LOG_BLOCK_HDR_SIZE..=LOG_BLOCK_SIZE).contains(&data_len) {
                    error!("Log block at LSN {} has invalid data length {}", scanned_lsn, data_len);
                    corrupt_at = Some(scanned_lsn);
                    finished = true;
                    break;
                }

                if pb.parse_start_lsn == 0 && block.first_rec_group() > 0 {
                    let lsn = scanned_lsn + block.first_rec_group() as u64;
                    pb.parse_start_lsn = lsn;
                    pb.scanned_lsn = lsn;
                    pb.recovered_lsn = lsn;
                }

                let block_end = scanned_lsn + data_len as u64;
                if block_end > pb.scanned_lsn {
                    if !pb.has_room_for(PARSING_BUF_MARGIN) {
                        error!("Log parsing buffer overflow at LSN {}", scanned_lsn);
                        corrupt_at = Some(scanned_lsn);
                        finished = true;
                        break;
                    }
                    more_data |= pb.add_to_parsing_buf(&block, block_end);
                    pb.scanned_lsn = block_end;
                    pb.scanned_checkpoint_no = block.checkpoint_no();
                }

                scanned_lsn = block_end;
                if data_len < LOG_BLOCK_SIZE {
                    finished = true;
                    break;
                }
            }
        }

        *group_scanned_lsn = scanned_lsn;

        if scanned_lsn > checkpoint_lsn && !self.needed_recovery.swap(true, Ordering::SeqCst) {
            info!("Starting crash recovery from checkpoint LSN={}", checkpoint_lsn);
        }

        // Whatever arrived before a bad block is still parsed, also on a
        // rescan that reaches a block already flagged as corrupt
        if more_data {
            if self.parse(checkpoint_lsn, store)? {
                finished = true;
            }
            self.parsing.lock().maybe_justify_left();
        }

        if let Some(lsn) = corrupt_at {
            self.flag_corrupt_log(lsn);
        }
        Ok(finished)
    }
}
