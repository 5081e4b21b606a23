// Redo record encoding
//
// A mini-transaction is a run of records followed by an end marker:
//
//   record:  tag u8 | body_len u16 | space u32 | page_no u32 | body
//   end:     0x01 | crc32 u32 (over every record byte of the mini-transaction)

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::common::types::{Lsn, PageId, PageNo, SpaceId};
use crate::storage::page::layout::PAGE_DATA_OFFSET;

pub const REC_HEADER_SIZE: usize = 11;
pub const MTR_END_MARKER: u8 = 0x01;
pub const MTR_END_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Page is (re)initialised from scratch; its old contents do not matter
    InitPage = 0x10,
    /// Page is freed
    FreePage = 0x11,
    /// Copy bytes into the page body
    Write = 0x20,
    /// Fill a range of the page body with one byte
    Memset = 0x21,
    /// Tablespace is shrunk to a number of pages
    TrimSpace = 0x30,
    FileCreate = 0x40,
    FileDelete = 0x41,
    FileRename = 0x42,
    /// Marks the checkpoint LSN after all file names have been logged
    FileCheckpoint = 0x4F,
}

impl RecordType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x10 => Some(RecordType::InitPage),
            0x11 => Some(RecordType::FreePage),
            0x20 => Some(RecordType::Write),
            0x21 => Some(RecordType::Memset),
            0x30 => Some(RecordType::TrimSpace),
            0x40 => Some(RecordType::FileCreate),
            0x41 => Some(RecordType::FileDelete),
            0x42 => Some(RecordType::FileRename),
            0x4F => Some(RecordType::FileCheckpoint),
            _ => None,
        }
    }

    /// Records that change the contents of one page
    pub fn is_page_op(self) -> bool {
        matches!(
            self,
            RecordType::InitPage | RecordType::FreePage | RecordType::Write | RecordType::Memset
        )
    }

    pub fn is_file_op(self) -> bool {
        matches!(
            self,
            RecordType::FileCreate | RecordType::FileDelete | RecordType::FileRename
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Unknown redo record type {0:#04x}")]
    UnknownType(u8),
    #[error("Malformed {rtype:?} record with body length {len}")]
    BadLength { rtype: RecordType, len: usize },
    #[error("{rtype:?} record for page {page_id} touches bytes {offset}..{end} outside the page body")]
    OutOfPage {
        rtype: RecordType,
        page_id: PageId,
        offset: usize,
        end: usize,
    },
    #[error("Mini-transaction checksum mismatch")]
    ChecksumMismatch,
    #[error("Empty mini-transaction")]
    EmptyMtr,
}

/// One decoded record, borrowing from the buffer it was parsed from
#[derive(Debug, Clone, Copy)]
pub struct RedoRecord<'a> {
    rtype: RecordType,
    page_id: PageId,
    body: &'a [u8],
    raw: &'a [u8],
}

impl<'a> RedoRecord<'a> {
    /// Decode the record at the start of `buf`. `Ok(None)` means the buffer
    /// ends before the record does.
    pub fn decode(buf: &'a [u8], page_size: usize) -> Result<Option<Self>, RecordError> {
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };
        let rtype = RecordType::from_u8(tag).ok_or(RecordError::UnknownType(tag))?;
        if buf.len() < REC_HEADER_SIZE {
            return Ok(None);
        }
        let body_len = LittleEndian::read_u16(&buf[1..3]) as usize;
        let total = REC_HEADER_SIZE + body_len;
        if buf.len() < total {
            return Ok(None);
        }
        let record = Self {
            rtype,
            page_id: PageId::new(
                LittleEndian::read_u32(&buf[3..7]),
                LittleEndian::read_u32(&buf[7..11]),
            ),
            body: &buf[REC_HEADER_SIZE..total],
            raw: &buf[..total],
        };
        record.validate(page_size)?;
        Ok(Some(record))
    }

    fn validate(&self, page_size: usize) -> Result<(), RecordError> {
        let len = self.body.len();
        let bad_length = || RecordError::BadLength {
            rtype: self.rtype,
            len,
        };
        match self.rtype {
            RecordType::InitPage | RecordType::FreePage => {
                if len != 0 {
                    return Err(bad_length());
                }
            }
            RecordType::Write | RecordType::Memset => {
                let (offset, count) = match self.rtype {
                    RecordType::Write if len > 2 => {
                        (LittleEndian::read_u16(self.body) as usize, len - 2)
                    }
                    RecordType::Memset if len == 5 => (
                        LittleEndian::read_u16(self.body) as usize,
                        LittleEndian::read_u16(&self.body[2..]) as usize,
                    ),
                    _ => return Err(bad_length()),
                };
                if offset < PAGE_DATA_OFFSET || offset + count > page_size {
                    return Err(RecordError::OutOfPage {
                        rtype: self.rtype,
                        page_id: self.page_id,
                        offset,
                        end: offset + count,
                    });
                }
            }
            RecordType::TrimSpace => {
                if len != 4 {
                    return Err(bad_length());
                }
            }
            RecordType::FileCreate | RecordType::FileDelete => {
                if len == 0 {
                    return Err(bad_length());
                }
            }
            RecordType::FileRename => {
                if len < 2 {
                    return Err(bad_length());
                }
                let name_len = LittleEndian::read_u16(self.body) as usize;
                if name_len == 0 || 2 + name_len >= len {
                    return Err(bad_length());
                }
            }
            RecordType::FileCheckpoint => {
                if len != 8 {
                    return Err(bad_length());
                }
            }
        }
        Ok(())
    }

    pub fn rtype(&self) -> RecordType {
        self.rtype
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn space(&self) -> SpaceId {
        self.page_id.space()
    }

    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// The whole encoded record, header included
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// New page count of a `TrimSpace` record
    pub fn trim_pages(&self) -> PageNo {
        LittleEndian::read_u32(self.body)
    }

    /// LSN carried by a `FileCheckpoint` record
    pub fn checkpoint_lsn(&self) -> Lsn {
        LittleEndian::read_u64(self.body)
    }

    /// (name, new name) of a file operation
    pub fn file_names(&self) -> (&'a [u8], Option<&'a [u8]>) {
        match self.rtype {
            RecordType::FileRename => {
                let name_len = LittleEndian::read_u16(self.body) as usize;
                (
                    &self.body[2..2 + name_len],
                    Some(&self.body[2 + name_len..]),
                )
            }
            _ => (self.body, None),
        }
    }

    /// Apply a page record to a page image
    pub fn apply_to(&self, page: &mut [u8]) {
        match self.rtype {
            RecordType::InitPage | RecordType::FreePage => page.fill(0),
            RecordType::Write => {
                let offset = LittleEndian::read_u16(self.body) as usize;
                let data = &self.body[2..];
                page[offset..offset + data.len()].copy_from_slice(data);
            }
            RecordType::Memset => {
                let offset = LittleEndian::read_u16(self.body) as usize;
                let count = LittleEndian::read_u16(&self.body[2..]) as usize;
                page[offset..offset + count].fill(self.body[4]);
            }
            _ => {}
        }
    }
}

/// Append one encoded record to `buf`
pub fn encode_record(buf: &mut Vec<u8>, rtype: RecordType, page_id: PageId, body: &[&[u8]]) {
    let body_len: usize = body.iter().map(|part| part.len()).sum();
    let mut header = [0u8; REC_HEADER_SIZE];
    header[0] = rtype as u8;
    LittleEndian::write_u16(&mut header[1..3], body_len as u16);
    LittleEndian::write_u32(&mut header[3..7], page_id.space());
    LittleEndian::write_u32(&mut header[7..11], page_id.page_no());
    buf.extend_from_slice(&header);
    for part in body {
        buf.extend_from_slice(part);
    }
}
