// Log block framing and LSN arithmetic
//
// The log is a sequence of 512-byte blocks. LSNs address bytes of that
// sequence including block headers and trailers, so a record that spills
// into the next block consumes 16 extra LSN units per crossed boundary.

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::Lsn;

pub const LOG_BLOCK_SIZE: usize = 512;
pub const LOG_BLOCK_HDR_SIZE: usize = 12;
pub const LOG_BLOCK_TRL_SIZE: usize = 4;
/// Bytes of record data a full block carries
pub const LOG_BLOCK_PAYLOAD: usize = LOG_BLOCK_SIZE - LOG_BLOCK_HDR_SIZE - LOG_BLOCK_TRL_SIZE;

const LOG_BLOCK_HDR_NO: usize = 0;
const LOG_BLOCK_HDR_DATA_LEN: usize = 4;
const LOG_BLOCK_FIRST_REC_GROUP: usize = 6;
const LOG_BLOCK_CHECKPOINT_NO: usize = 8;
const LOG_BLOCK_CHECKSUM: usize = LOG_BLOCK_SIZE - LOG_BLOCK_TRL_SIZE;

/// Set in the block number of the first block of a write request
pub const LOG_BLOCK_FLUSH_BIT_MASK: u32 = 0x8000_0000;
const LOG_BLOCK_NO_MASK: u64 = 0x3FFF_FFFF;

/// Size of the header area at the start of every log file
pub const LOG_FILE_HDR_SIZE: usize = 4 * LOG_BLOCK_SIZE;
/// Offset of the first checkpoint slot
pub const LOG_CHECKPOINT_1: usize = LOG_BLOCK_SIZE;
/// Offset of the second checkpoint slot
pub const LOG_CHECKPOINT_2: usize = 3 * LOG_BLOCK_SIZE;

/// LSN of the first log block; the first record starts after its header
pub const LOG_START_LSN: Lsn = 8192;

/// Map an LSN to the number stored in the header of the block containing it
pub fn block_no_for_lsn(lsn: Lsn) -> u32 {
    ((lsn / LOG_BLOCK_SIZE as u64) & LOG_BLOCK_NO_MASK) as u32 + 1
}

/// Start LSN of the block containing `lsn`
pub fn align_down(lsn: Lsn) -> Lsn {
    lsn - lsn % LOG_BLOCK_SIZE as u64
}

/// LSN reached after `len` record bytes are appended at `lsn`.
/// `lsn` must point into the payload area of its block.
pub fn lsn_add_payload(lsn: Lsn, len: usize) -> Lsn {
    let frag_len = (lsn % LOG_BLOCK_SIZE as u64) as usize - LOG_BLOCK_HDR_SIZE;
    debug_assert!(frag_len < LOG_BLOCK_PAYLOAD);
    let crossed = (frag_len + len) / LOG_BLOCK_PAYLOAD;
    lsn + (len + crossed * (LOG_BLOCK_HDR_SIZE + LOG_BLOCK_TRL_SIZE)) as u64
}

/// Read-only view of one log block
#[derive(Clone, Copy)]
pub struct LogBlock<'a> {
    bytes: &'a [u8],
}

impl<'a> LogBlock<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        debug_assert_eq!(bytes.len(), LOG_BLOCK_SIZE);
        Self { bytes }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Block number without the flush bit
    pub fn hdr_no(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes[LOG_BLOCK_HDR_NO..]) & !LOG_BLOCK_FLUSH_BIT_MASK
    }

    pub fn flush_bit(&self) -> bool {
        LittleEndian::read_u32(&self.bytes[LOG_BLOCK_HDR_NO..]) & LOG_BLOCK_FLUSH_BIT_MASK != 0
    }

    /// Bytes used in this block, header included. `LOG_BLOCK_SIZE` for a
    /// full block.
    pub fn data_len(&self) -> usize {
        LittleEndian::read_u16(&self.bytes[LOG_BLOCK_HDR_DATA_LEN..]) as usize
    }

    /// Offset of the first mini-transaction starting in this block, or 0
    pub fn first_rec_group(&self) -> usize {
        LittleEndian::read_u16(&self.bytes[LOG_BLOCK_FIRST_REC_GROUP..]) as usize
    }

    pub fn checkpoint_no(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes[LOG_BLOCK_CHECKPOINT_NO..])
    }

    pub fn stored_checksum(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes[LOG_BLOCK_CHECKSUM..])
    }

    pub fn checksum_is_ok(&self) -> bool {
        self.stored_checksum() == block_checksum(self.bytes)
    }
}

pub fn block_checksum(block: &[u8]) -> u32 {
    crc32fast::hash(&block[..LOG_BLOCK_CHECKSUM])
}

/// Fill in the header of a block being written
pub fn block_init(
    block: &mut [u8],
    lsn: Lsn,
    data_len: usize,
    first_rec_group: usize,
    checkpoint_no: u32,
) {
    LittleEndian::write_u32(&mut block[LOG_BLOCK_HDR_NO..], block_no_for_lsn(lsn));
    LittleEndian::write_u16(&mut block[LOG_BLOCK_HDR_DATA_LEN..], data_len as u16);
    LittleEndian::write_u16(&mut block[LOG_BLOCK_FIRST_REC_GROUP..], first_rec_group as u16);
    LittleEndian::write_u32(&mut block[LOG_BLOCK_CHECKPOINT_NO..], checkpoint_no);
}

/// Compute and store the block trailer
pub fn block_seal(block: &mut [u8]) {
    let checksum = block_checksum(block);
    LittleEndian::write_u32(&mut block[LOG_BLOCK_CHECKSUM..], checksum);
}
