// Sliding window of log record bytes
//
// Blocks read from the log are stripped of their framing and appended here;
// the parser consumes from `recovered_offset`. LSN positions of the window
// are kept alongside so the parser can compute commit LSNs.

use crate::common::types::Lsn;
use crate::redo::format::{LogBlock, LOG_BLOCK_HDR_SIZE, LOG_BLOCK_SIZE, LOG_BLOCK_TRL_SIZE};

pub struct ParsingBuffer {
    buf: Vec<u8>,
    /// Bytes of `buf` holding log data
    pub len: usize,
    /// Offset of the first byte not yet parsed
    pub recovered_offset: usize,
    /// LSN where parsing started; 0 until a start point is known
    pub parse_start_lsn: Lsn,
    /// End of the log data read so far
    pub scanned_lsn: Lsn,
    /// LSN of the byte at `recovered_offset`
    pub recovered_lsn: Lsn,
    /// Checkpoint number seen in the last scanned block
    pub scanned_checkpoint_no: u32,
}

impl ParsingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            len: 0,
            recovered_offset: 0,
            parse_start_lsn: 0,
            scanned_lsn: 0,
            recovered_lsn: 0,
            scanned_checkpoint_no: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Reset the window to start parsing at `lsn`
    pub fn reset(&mut self, lsn: Lsn) {
        self.len = 0;
        self.recovered_offset = 0;
        self.parse_start_lsn = lsn;
        self.scanned_lsn = lsn;
        self.recovered_lsn = lsn;
    }

    /// Unparsed bytes
    pub fn window(&self) -> &[u8] {
        &self.buf[self.recovered_offset..self.len]
    }

    /// Whether `n_blocks` more blocks are guaranteed to fit
    pub fn has_room_for(&self, n_blocks: usize) -> bool {
        self.len + n_blocks * LOG_BLOCK_SIZE < self.buf.len()
    }

    /// Append the new part of `block`, which ends at `scanned_lsn`. Returns
    /// whether anything was appended; nothing is appended before a parse
    /// start point exists.
    pub fn add_to_parsing_buf(&mut self, block: &LogBlock<'_>, scanned_lsn: Lsn) -> bool {
        if self.parse_start_lsn == 0
            || self.parse_start_lsn >= scanned_lsn
            || self.scanned_lsn >= scanned_lsn
        {
            return false;
        }
        let more_len = if self.parse_start_lsn > self.scanned_lsn {
            scanned_lsn - self.parse_start_lsn
        } else {
            scanned_lsn - self.scanned_lsn
        } as usize;

        let data_len = block.data_len();
        let start_offset = data_len.saturating_sub(more_len).max(LOG_BLOCK_HDR_SIZE);
        let end_offset = data_len.min(LOG_BLOCK_SIZE - LOG_BLOCK_TRL_SIZE);

        if start_offset < end_offset {
            let n = end_offset - start_offset;
            if self.len + n > self.buf.len() {
                return false;
            }
            self.buf[self.len..self.len + n]
                .copy_from_slice(&block.bytes()[start_offset..end_offset]);
            self.len += n;
        }
        true
    }

    /// Move the unparsed bytes to the start of the buffer
    pub fn justify_left(&mut self) {
        if self.recovered_offset == 0 {
            return;
        }
        self.buf.copy_within(self.recovered_offset..self.len, 0);
        self.len -= self.recovered_offset;
        self.recovered_offset = 0;
    }

    /// Compact once more than a quarter of the buffer has been consumed
    pub fn maybe_justify_left(&mut self) {
        if self.recovered_offset > self.buf.len() / 4 {
            self.justify_left();
        }
    }
}
