// Redo log file access
//
// The log may be split over several equally sized files named
// `<base>_<NNNNNN>.log`. The LSN space is laid over them in order; each file
// starts with a header area that holds the format header (first file only is
// authoritative) and the two checkpoint slots.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::Lsn;
use crate::redo::format::{LOG_BLOCK_SIZE, LOG_FILE_HDR_SIZE, LOG_START_LSN};

#[derive(Error, Debug)]
pub enum LogFileError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid log file header")]
    InvalidHeader,
    #[error("Invalid log file state: {0}")]
    InvalidState(String),
    #[error("No log files found")]
    NoLogFiles,
    #[error("Log file {path} has size {actual}, expected {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

pub type Result<T> = std::result::Result<T, LogFileError>;

/// Format header stored in block 0 of every log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileHeader {
    pub magic: u32,
    pub version: u32,
    pub start_lsn: Lsn,
    pub file_no: u32,
}

impl LogFileHeader {
    pub const MAGIC: u32 = 0x5245_444F;
    pub const VERSION: u32 = 1;

    pub fn new(start_lsn: Lsn, file_no: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            start_lsn,
            file_no,
        }
    }

    /// Encode into a full 512-byte block with its checksum
    pub fn encode(&self) -> Vec<u8> {
        let mut block = vec![0u8; LOG_BLOCK_SIZE];
        LittleEndian::write_u32(&mut block[0..], self.magic);
        LittleEndian::write_u32(&mut block[4..], self.version);
        LittleEndian::write_u64(&mut block[8..], self.start_lsn);
        LittleEndian::write_u32(&mut block[16..], self.file_no);
        crate::redo::format::block_seal(&mut block);
        block
    }

    /// Decode block 0; `None` if the checksum does not match
    pub fn decode(block: &[u8]) -> Option<Self> {
        if crate::redo::format::LogBlock::new(&block[..LOG_BLOCK_SIZE]).checksum_is_ok() {
            Some(Self {
                magic: LittleEndian::read_u32(&block[0..]),
                version: LittleEndian::read_u32(&block[4..]),
                start_lsn: LittleEndian::read_u64(&block[8..]),
                file_no: LittleEndian::read_u32(&block[16..]),
            })
        } else {
            None
        }
    }

    pub fn validate(&self) -> bool {
        self.magic == Self::MAGIC && self.version == Self::VERSION && self.start_lsn == LOG_START_LSN
    }
}

/// Path of log file `sequence`
pub fn log_file_path(log_dir: &Path, base_name: &str, sequence: u32) -> PathBuf {
    log_dir.join(format!("{}_{:06}.log", base_name, sequence))
}

/// Find all log files in `log_dir`, sorted by sequence number
pub fn find_log_files(log_dir: &Path, base_name: &str) -> Result<Vec<(u32, PathBuf)>> {
    let mut log_files = Vec::new();
    if !log_dir.exists() {
        return Ok(log_files);
    }
    for entry in std::fs::read_dir(log_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Ok(sequence) = extract_sequence_from_path(base_name, &path) {
            log_files.push((sequence, path));
        }
    }
    log_files.sort_by_key(|(sequence, _)| *sequence);
    Ok(log_files)
}

pub fn extract_sequence_from_path(base_name: &str, path: &Path) -> Result<u32> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| LogFileError::InvalidState("Invalid file name".to_string()))?;
    let prefix = format!("{}_", base_name);
    let sequence_str = file_name
        .strip_prefix(&prefix)
        .and_then(|rest| rest.strip_suffix(".log"))
        .ok_or_else(|| LogFileError::InvalidState("Invalid log file name".to_string()))?;
    sequence_str
        .parse::<u32>()
        .map_err(|_| LogFileError::InvalidState(format!("Invalid sequence number: {}", sequence_str)))
}

/// Map an LSN to (file index, byte offset inside that file)
pub fn lsn_to_file_offset(lsn: Lsn, file_size: u64) -> (usize, u64) {
    let capacity = file_size - LOG_FILE_HDR_SIZE as u64;
    let pos = lsn - LOG_START_LSN;
    ((pos / capacity) as usize, LOG_FILE_HDR_SIZE as u64 + pos % capacity)
}

/// Read surface over the set of log files. Files are opened on first access.
pub struct LogFiles {
    paths: Vec<PathBuf>,
    file_size: u64,
    handles: Mutex<Vec<Option<File>>>,
}

impl LogFiles {
    /// Discover the log files of `base_name` in `log_dir`. Only metadata is
    /// touched here.
    pub fn open(log_dir: &Path, base_name: &str) -> Result<Self> {
        let found = find_log_files(log_dir, base_name)?;
        if found.is_empty() {
            return Err(LogFileError::NoLogFiles);
        }

        let mut file_size = None;
        let mut paths = Vec::with_capacity(found.len());
        for (expected_seq, (sequence, path)) in found.into_iter().enumerate() {
            if sequence as usize != expected_seq {
                return Err(LogFileError::InvalidState(format!(
                    "Log file sequence {} is missing",
                    expected_seq
                )));
            }
            let size = std::fs::metadata(&path)?.len();
            match file_size {
                None => file_size = Some(size),
                Some(expected) if expected != size => {
                    return Err(LogFileError::SizeMismatch {
                        path,
                        expected,
                        actual: size,
                    });
                }
                Some(_) => {}
            }
            paths.push(path);
        }

        let file_size = file_size.unwrap_or_default();
        if file_size <= LOG_FILE_HDR_SIZE as u64 || file_size % LOG_BLOCK_SIZE as u64 != 0 {
            return Err(LogFileError::InvalidState(format!(
                "Log file size {} is not a multiple of {} larger than the header",
                file_size, LOG_BLOCK_SIZE
            )));
        }

        debug!("Found {} redo log files of {} bytes", paths.len(), file_size);
        let handles = Mutex::new((0..paths.len()).map(|_| None).collect());
        Ok(Self {
            paths,
            file_size,
            handles,
        })
    }

    pub fn n_files(&self) -> usize {
        self.paths.len()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Aggregate number of log bytes the files can hold
    pub fn files_size(&self) -> u64 {
        (self.file_size - LOG_FILE_HDR_SIZE as u64) * self.paths.len() as u64
    }

    /// First LSN that no longer fits in the files
    pub fn lsn_limit(&self) -> Lsn {
        LOG_START_LSN + self.files_size()
    }

    /// Read at a global offset, where file `i` occupies
    /// `[i * file_size, (i + 1) * file_size)`. Bytes past the end of a file
    /// read as zeros.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let global = offset + done as u64;
            let idx = (global / self.file_size) as usize;
            let in_file = global % self.file_size;
            let n = (buf.len() - done).min((self.file_size - in_file) as usize);
            if idx >= self.paths.len() {
                buf[done..].fill(0);
                break;
            }
            self.read_in_file(idx, in_file, &mut buf[done..done + n])?;
            done += n;
        }
        Ok(())
    }

    /// Read the header area of the first file
    pub fn read_header_area(&self) -> Result<Vec<u8>> {
        let mut area = vec![0u8; LOG_FILE_HDR_SIZE];
        self.read(0, &mut area)?;
        Ok(area)
    }

    pub fn read_header(&self) -> Result<LogFileHeader> {
        let area = self.read_header_area()?;
        LogFileHeader::decode(&area).ok_or(LogFileError::InvalidHeader)
    }

    /// Fill `buf` with the log starting at the block-aligned `start_lsn`.
    /// Anything past the last file reads as zeros.
    pub fn read_log_seg(&self, buf: &mut [u8], start_lsn: Lsn) -> Result<()> {
        if start_lsn < LOG_START_LSN || start_lsn % LOG_BLOCK_SIZE as u64 != 0 {
            return Err(LogFileError::InvalidState(format!(
                "Unaligned log read at LSN {}",
                start_lsn
            )));
        }
        let capacity = self.file_size - LOG_FILE_HDR_SIZE as u64;
        let mut lsn = start_lsn;
        let mut filled = 0;
        while filled < buf.len() {
            let (idx, in_file) = lsn_to_file_offset(lsn, self.file_size);
            if idx >= self.paths.len() {
                buf[filled..].fill(0);
                break;
            }
            let left_in_file = capacity - (in_file - LOG_FILE_HDR_SIZE as u64);
            let n = (buf.len() - filled).min(left_in_file as usize);
            self.read_in_file(idx, in_file, &mut buf[filled..filled + n])?;
            filled += n;
            lsn += n as u64;
        }
        Ok(())
    }

    fn read_in_file(&self, idx: usize, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut handles = self.handles.lock();
        if handles[idx].is_none() {
            debug!("Opening redo log file {}", self.paths[idx].display());
            handles[idx] = Some(OpenOptions::new().read(true).open(&self.paths[idx])?);
        }
        let file = handles[idx]
            .as_mut()
            .ok_or_else(|| LogFileError::InvalidState("log file handle missing".to_string()))?;

        file.seek(SeekFrom::Start(offset))?;
        let mut done = 0;
        while done < buf.len() {
            match file.read(&mut buf[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[done..].fill(0);
        Ok(())
    }
}
