#![allow(dead_code)]

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tempfile::TempDir;

use redorecv::common::types::{Lsn, PageNo, SpaceId};
use redorecv::recovery::{FileOpObserver, RecoveryStats};
use redorecv::storage::disk::DiskManagerError;
use redorecv::{BufferPoolManager, DiskManager, LogWriter, Page, PageId, RecoveryConfig};

pub const PAGE_SIZE: usize = 4096;
pub const POOL_SIZE: usize = 64;
pub const LOG_FILE_SIZE: u64 = 256 * 1024;
pub const DOUBLEWRITE_PAGES: usize = 16;
pub const BASE_NAME: &str = "redo";

/// A data directory plus a fresh redo log with a checkpoint at its start
pub struct TestDb {
    pub dir: TempDir,
    pub writer: LogWriter,
    pub doublewrite: bool,
}

impl TestDb {
    pub fn new() -> Result<Self> {
        Self::with_log(LOG_FILE_SIZE, 1, false)
    }

    pub fn with_doublewrite() -> Result<Self> {
        Self::with_log(LOG_FILE_SIZE, 1, true)
    }

    pub fn with_log(file_size: u64, n_files: u32, doublewrite: bool) -> Result<Self> {
        let dir = TempDir::new()?;
        let mut writer = LogWriter::create(&dir.path().join("log"), BASE_NAME, file_size, n_files)?;
        let start = writer.lsn();
        writer.checkpoint(start)?;
        Ok(Self {
            dir,
            writer,
            doublewrite,
        })
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.path().join("log")
    }

    pub fn config(&self) -> RecoveryConfig {
        RecoveryConfig {
            log_dir: self.log_dir(),
            log_file_base_name: BASE_NAME.to_string(),
            page_size: PAGE_SIZE,
            parsing_buf_size: 64 * 1024,
            apply_threads: 4,
            ..RecoveryConfig::default()
        }
    }

    /// A new disk manager over the data directory, as after a restart
    pub fn open_disk(&self) -> Result<Arc<DiskManager>, DiskManagerError> {
        let disk = DiskManager::new(self.data_dir(), PAGE_SIZE)?;
        let disk = if self.doublewrite {
            disk.with_doublewrite(DOUBLEWRITE_PAGES)?
        } else {
            disk
        };
        Ok(Arc::new(disk))
    }

    pub fn open_pool(&self, disk: Arc<DiskManager>) -> Result<Arc<BufferPoolManager>> {
        Ok(Arc::new(BufferPoolManager::new(POOL_SIZE, disk)?))
    }

    pub fn create_space(&self, space: SpaceId) -> Result<()> {
        self.open_disk()?.create_space(space)?;
        Ok(())
    }

    /// Append a finished mini-transaction and return its commit LSN
    pub fn append(&mut self, mtr: Vec<u8>) -> Result<Lsn> {
        Ok(self.writer.append(&mtr)?)
    }

    /// Write page images straight to the data files
    pub fn write_pages(&self, pages: &[Page]) -> Result<()> {
        self.open_disk()?.write_pages(pages)?;
        Ok(())
    }

    pub fn read_page(&self, page_id: PageId) -> Result<Page> {
        Ok(self.open_disk()?.read_page(page_id)?)
    }

    pub fn space_path(&self, space: SpaceId) -> PathBuf {
        self.data_dir().join(format!("space_{}.dat", space))
    }

    /// Overwrite part of a page in its tablespace file
    pub fn tear_page(&self, page_id: PageId, offset: usize, garbage: &[u8]) -> Result<()> {
        let pos = page_id.page_no() as u64 * PAGE_SIZE as u64 + offset as u64;
        write_at(&self.space_path(page_id.space()), pos, garbage)
    }

    /// Flip one payload byte of the log block holding `lsn`
    pub fn corrupt_log_block(&self, lsn: Lsn) -> Result<()> {
        let (path, offset) = self.writer.block_location(lsn);
        flip_byte(&path, offset + 100)
    }

    /// Full recovery over a freshly opened disk and buffer pool
    pub fn recover(
        &self,
        config: RecoveryConfig,
        observer: Option<Arc<dyn FileOpObserver>>,
    ) -> redorecv::recovery::Result<RecoveryStats> {
        let disk = self.open_disk()?;
        let pool = Arc::new(BufferPoolManager::new(POOL_SIZE, disk.clone())?);
        let doublewrite_pages = match disk.doublewrite() {
            Some(area) => area.load().map_err(DiskManagerError::from)?,
            None => Vec::new(),
        };
        redorecv::recover(config, pool, disk, observer, doublewrite_pages, 0)
    }
}

/// A page image with `data` written at `offset` and a valid header
pub fn stamped_page(page_id: PageId, offset: usize, data: &[u8]) -> Page {
    let mut page = Page::new(page_id, PAGE_SIZE);
    page.data[offset..offset + data.len()].copy_from_slice(data);
    page.stamp();
    page
}

pub fn write_at(path: &Path, pos: u64, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(pos))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

pub fn flip_byte(path: &Path, pos: u64) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut byte)?;
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(pos))?;
    file.write_all(&byte)?;
    file.sync_all()?;
    Ok(())
}

/// One observed tablespace file operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOp {
    pub space: SpaceId,
    pub create: bool,
    pub name: String,
    pub new_name: Option<String>,
}

/// Records every file operation it is told about
#[derive(Default)]
pub struct RecordingObserver {
    pub ops: Mutex<Vec<FileOp>>,
}

impl FileOpObserver for RecordingObserver {
    fn log_file_op(&self, space_id: SpaceId, create: bool, name: &[u8], new_name: Option<&[u8]>) {
        self.ops.lock().push(FileOp {
            space: space_id,
            create,
            name: String::from_utf8_lossy(name).into_owned(),
            new_name: new_name.map(|n| String::from_utf8_lossy(n).into_owned()),
        });
    }
}

/// Page ids `0..n` of one tablespace
pub fn page_range(space: SpaceId, n: PageNo) -> Vec<PageId> {
    (0..n).map(|p| PageId::new(space, p)).collect()
}
