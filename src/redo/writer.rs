// Redo log writer used to produce recoverable logs
//
// Only what tests, benchmarks and the CLI self-check need: append whole
// mini-transactions, write checkpoints, and keep block framing correct.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::common::types::{Lsn, PageId, PageNo, SpaceId};
use crate::redo::checkpoint::{Checkpoint, CheckpointField};
use crate::redo::files::{log_file_path, lsn_to_file_offset, LogFileError, LogFileHeader, Result};
use crate::redo::format::{
    align_down, block_init, block_seal, LOG_BLOCK_HDR_SIZE, LOG_BLOCK_SIZE, LOG_BLOCK_TRL_SIZE,
    LOG_FILE_HDR_SIZE, LOG_START_LSN,
};
use crate::redo::record::{encode_record, RecordType, MTR_END_MARKER};

/// Builds the bytes of one mini-transaction
#[derive(Debug, Default, Clone)]
pub struct MtrBuilder {
    buf: Vec<u8>,
}

impl MtrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_page(mut self, page_id: PageId) -> Self {
        encode_record(&mut self.buf, RecordType::InitPage, page_id, &[]);
        self
    }

    pub fn free_page(mut self, page_id: PageId) -> Self {
        encode_record(&mut self.buf, RecordType::FreePage, page_id, &[]);
        self
    }

    pub fn write(mut self, page_id: PageId, offset: u16, data: &[u8]) -> Self {
        encode_record(
            &mut self.buf,
            RecordType::Write,
            page_id,
            &[&offset.to_le_bytes(), data],
        );
        self
    }

    pub fn memset(mut self, page_id: PageId, offset: u16, count: u16, fill: u8) -> Self {
        encode_record(
            &mut self.buf,
            RecordType::Memset,
            page_id,
            &[&offset.to_le_bytes(), &count.to_le_bytes(), &[fill]],
        );
        self
    }

    pub fn trim_space(mut self, space: SpaceId, pages: PageNo) -> Self {
        encode_record(
            &mut self.buf,
            RecordType::TrimSpace,
            PageId::new(space, 0),
            &[&pages.to_le_bytes()],
        );
        self
    }

    pub fn file_create(mut self, space: SpaceId, name: &str) -> Self {
        encode_record(
            &mut self.buf,
            RecordType::FileCreate,
            PageId::new(space, 0),
            &[name.as_bytes()],
        );
        self
    }

    pub fn file_delete(mut self, space: SpaceId, name: &str) -> Self {
        encode_record(
            &mut self.buf,
            RecordType::FileDelete,
            PageId::new(space, 0),
            &[name.as_bytes()],
        );
        self
    }

    pub fn file_rename(mut self, space: SpaceId, name: &str, new_name: &str) -> Self {
        encode_record(
            &mut self.buf,
            RecordType::FileRename,
            PageId::new(space, 0),
            &[
                &(name.len() as u16).to_le_bytes(),
                name.as_bytes(),
                new_name.as_bytes(),
            ],
        );
        self
    }

    pub fn file_checkpoint(mut self, lsn: Lsn) -> Self {
        encode_record(
            &mut self.buf,
            RecordType::FileCheckpoint,
            PageId::new(0, 0),
            &[&lsn.to_le_bytes()],
        );
        self
    }

    /// Terminate the mini-transaction and return its bytes
    pub fn finish(self) -> Vec<u8> {
        let mut buf = self.buf;
        let checksum = crc32fast::hash(&buf);
        buf.push(MTR_END_MARKER);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }
}

/// Appends mini-transactions to a fresh set of log files
pub struct LogWriter {
    files: Vec<File>,
    paths: Vec<PathBuf>,
    file_size: u64,
    /// Start LSN of the block being filled
    block_lsn: Lsn,
    block: Vec<u8>,
    first_rec_group: usize,
    /// Next LSN to be written
    lsn: Lsn,
    checkpoint_no: u64,
}

impl LogWriter {
    /// Create `n_files` log files of `file_size` bytes each, replacing any
    /// existing ones
    pub fn create(log_dir: &Path, base_name: &str, file_size: u64, n_files: u32) -> Result<Self> {
        if file_size <= LOG_FILE_HDR_SIZE as u64 || file_size % LOG_BLOCK_SIZE as u64 != 0 {
            return Err(LogFileError::InvalidState(format!(
                "Invalid log file size {}",
                file_size
            )));
        }
        std::fs::create_dir_all(log_dir)?;

        let mut files = Vec::with_capacity(n_files as usize);
        let mut paths = Vec::with_capacity(n_files as usize);
        for sequence in 0..n_files {
            let path = log_file_path(log_dir, base_name, sequence);
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.set_len(file_size)?;
            file.write_all(&LogFileHeader::new(LOG_START_LSN, sequence).encode())?;
            files.push(file);
            paths.push(path);
        }

        let mut writer = Self {
            files,
            paths,
            file_size,
            block_lsn: LOG_START_LSN,
            block: vec![0u8; LOG_BLOCK_SIZE],
            first_rec_group: 0,
            lsn: LOG_START_LSN + LOG_BLOCK_HDR_SIZE as u64,
            checkpoint_no: 0,
        };
        writer.write_current_block()?;
        Ok(writer)
    }

    /// Next LSN to be written
    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Append one finished mini-transaction and return its commit LSN
    pub fn append(&mut self, mtr: &[u8]) -> Result<Lsn> {
        let payload_end = LOG_BLOCK_SIZE - LOG_BLOCK_TRL_SIZE;
        if self.first_rec_group == 0 {
            self.first_rec_group = (self.lsn - self.block_lsn) as usize;
        }

        let mut rest = mtr;
        while !rest.is_empty() {
            let offset = (self.lsn - self.block_lsn) as usize;
            let n = rest.len().min(payload_end - offset);
            self.block[offset..offset + n].copy_from_slice(&rest[..n]);
            rest = &rest[n..];
            self.lsn += n as u64;

            if offset + n == payload_end {
                self.write_block(LOG_BLOCK_SIZE)?;
                self.block_lsn += LOG_BLOCK_SIZE as u64;
                self.lsn = self.block_lsn + LOG_BLOCK_HDR_SIZE as u64;
                self.block.fill(0);
                self.first_rec_group = 0;
            }
        }
        self.write_current_block()?;
        Ok(self.lsn)
    }

    /// Write the next checkpoint at `lsn` into the alternate slot
    pub fn checkpoint(&mut self, lsn: Lsn) -> Result<CheckpointField> {
        let field = CheckpointField::for_checkpoint_no(self.checkpoint_no);
        let cp = Checkpoint {
            field,
            no: self.checkpoint_no,
            lsn,
            end_lsn: self.lsn,
        };
        self.write_checkpoint_slot(&cp)?;
        self.checkpoint_no += 1;
        debug!("Wrote checkpoint {} at LSN {} into {:?}", cp.no, lsn, field);
        Ok(field)
    }

    /// Overwrite one checkpoint slot as given
    pub fn write_checkpoint_slot(&mut self, cp: &Checkpoint) -> Result<()> {
        let file = &mut self.files[0];
        file.seek(SeekFrom::Start(cp.field.offset() as u64))?;
        file.write_all(&cp.encode())?;
        Ok(())
    }

    /// Log file and byte offset holding the block that contains `lsn`
    pub fn block_location(&self, lsn: Lsn) -> (PathBuf, u64) {
        let (idx, offset) = lsn_to_file_offset(align_down(lsn), self.file_size);
        (self.paths[idx].clone(), offset)
    }

    pub fn sync(&self) -> Result<()> {
        for file in &self.files {
            file.sync_all()?;
        }
        Ok(())
    }

    fn write_current_block(&mut self) -> Result<()> {
        let data_len = (self.lsn - self.block_lsn) as usize;
        self.write_block(data_len)
    }

    fn write_block(&mut self, data_len: usize) -> Result<()> {
        let (idx, offset) = lsn_to_file_offset(self.block_lsn, self.file_size);
        if idx >= self.files.len() {
            return Err(LogFileError::InvalidState("Redo log files are full".to_string()));
        }
        block_init(
            &mut self.block,
            self.block_lsn,
            data_len,
            self.first_rec_group,
            self.checkpoint_no as u32,
        );
        block_seal(&mut self.block);
        let file = &mut self.files[idx];
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&self.block)?;
        Ok(())
    }
}
