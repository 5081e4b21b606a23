// Checkpoint slots
//
// Two slots live in the header area of the first log file. They are written
// alternately, so after a crash at most one of them can be torn.

use byteorder::{ByteOrder, LittleEndian};
use log::{info, warn};

use crate::common::types::Lsn;
use crate::recovery::error::{RecoveryError, Result};
use crate::redo::files::LogFiles;
use crate::redo::format::{block_checksum, block_seal, LOG_BLOCK_SIZE, LOG_CHECKPOINT_1, LOG_CHECKPOINT_2};

const CHECKPOINT_NO: usize = 0;
const CHECKPOINT_LSN: usize = 8;
const CHECKPOINT_END_LSN: usize = 16;
const CHECKPOINT_CHECKSUM: usize = LOG_BLOCK_SIZE - 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointField {
    First,
    Second,
}

impl CheckpointField {
    pub const ALL: [CheckpointField; 2] = [CheckpointField::First, CheckpointField::Second];

    /// Byte offset of the slot inside the log file header area
    pub fn offset(self) -> usize {
        match self {
            CheckpointField::First => LOG_CHECKPOINT_1,
            CheckpointField::Second => LOG_CHECKPOINT_2,
        }
    }

    /// Slot that receives checkpoint number `no`
    pub fn for_checkpoint_no(no: u64) -> Self {
        if no % 2 == 0 {
            CheckpointField::First
        } else {
            CheckpointField::Second
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub field: CheckpointField,
    pub no: u64,
    /// LSN from which recovery starts parsing
    pub lsn: Lsn,
    /// End of the log when the checkpoint was taken
    pub end_lsn: Lsn,
}

impl Checkpoint {
    pub fn encode(&self) -> Vec<u8> {
        let mut slot = vec![0u8; LOG_BLOCK_SIZE];
        LittleEndian::write_u64(&mut slot[CHECKPOINT_NO..], self.no);
        LittleEndian::write_u64(&mut slot[CHECKPOINT_LSN..], self.lsn);
        LittleEndian::write_u64(&mut slot[CHECKPOINT_END_LSN..], self.end_lsn);
        block_seal(&mut slot);
        slot
    }

    /// Decode one slot. Returns `None` when the checksum fails or the slot
    /// was never written.
    pub fn decode(field: CheckpointField, slot: &[u8]) -> Option<Self> {
        let stored = LittleEndian::read_u32(&slot[CHECKPOINT_CHECKSUM..]);
        if stored != block_checksum(slot) {
            return None;
        }
        let lsn = LittleEndian::read_u64(&slot[CHECKPOINT_LSN..]);
        if lsn == 0 {
            return None;
        }
        Some(Self {
            field,
            no: LittleEndian::read_u64(&slot[CHECKPOINT_NO..]),
            lsn,
            end_lsn: LittleEndian::read_u64(&slot[CHECKPOINT_END_LSN..]),
        })
    }
}

/// Pick the newest valid checkpoint out of a log header area. Ties go to the
/// first slot.
pub fn select_checkpoint(header_area: &[u8]) -> Option<Checkpoint> {
    let mut best: Option<Checkpoint> = None;
    for field in CheckpointField::ALL {
        let offset = field.offset();
        match Checkpoint::decode(field, &header_area[offset..offset + LOG_BLOCK_SIZE]) {
            Some(cp) => {
                if best.is_none_or(|b| cp.lsn > b.lsn) {
                    best = Some(cp);
                }
            }
            None => warn!("Invalid checkpoint in {:?} slot", field),
        }
    }
    best
}

/// Locate the checkpoint to start recovery from
pub fn find_max_checkpoint(files: &LogFiles) -> Result<Checkpoint> {
    let area = files.read_header_area()?;
    let cp = select_checkpoint(&area).ok_or(RecoveryError::CheckpointNotFound)?;
    info!(
        "Using checkpoint {} in {:?} slot, LSN={}",
        cp.no, cp.field, cp.lsn
    );
    Ok(cp)
}
