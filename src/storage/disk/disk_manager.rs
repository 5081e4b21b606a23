use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, PageNo, SpaceId};
use crate::storage::doublewrite::DoublewriteArea;

const SPACE_FILE_PREFIX: &str = "space_";
const SPACE_FILE_SUFFIX: &str = ".dat";
const DOUBLEWRITE_FILE: &str = "doublewrite.dat";

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Tablespace {0} does not exist")]
    SpaceNotFound(SpaceId),
    #[error("Page size mismatch: expected {expected}, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },
}

/// DiskManager is responsible for the actual disk I/O of tablespace pages.
///
/// Each tablespace lives in its own file inside the data directory; page
/// `n` of a tablespace starts at byte `n * page_size`.
pub struct DiskManager {
    data_dir: PathBuf,
    page_size: usize,
    spaces: Mutex<HashMap<SpaceId, File>>,
    doublewrite: Option<DoublewriteArea>,
}

impl DiskManager {
    /// Create a DiskManager over the given data directory
    pub fn new(data_dir: impl AsRef<Path>, page_size: usize) -> Result<Self, DiskManagerError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        Ok(Self {
            data_dir,
            page_size,
            spaces: Mutex::new(HashMap::new()),
            doublewrite: None,
        })
    }

    /// Route every batch write through a doublewrite area of `capacity` pages
    pub fn with_doublewrite(mut self, capacity: usize) -> Result<Self, DiskManagerError> {
        let path = self.data_dir.join(DOUBLEWRITE_FILE);
        self.doublewrite = Some(DoublewriteArea::open(path, self.page_size, capacity)?);
        Ok(self)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn doublewrite(&self) -> Option<&DoublewriteArea> {
        self.doublewrite.as_ref()
    }

    fn space_path(&self, space_id: SpaceId) -> PathBuf {
        self.data_dir
            .join(format!("{}{}{}", SPACE_FILE_PREFIX, space_id, SPACE_FILE_SUFFIX))
    }

    /// Create the file backing a tablespace (no-op if it already exists)
    pub fn create_space(&self, space_id: SpaceId) -> Result<(), DiskManagerError> {
        let mut spaces = self.spaces.lock();
        if spaces.contains_key(&space_id) {
            return Ok(());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.space_path(space_id))?;
        debug!("Opened tablespace {} file", space_id);
        spaces.insert(space_id, file);
        Ok(())
    }

    pub fn space_exists(&self, space_id: SpaceId) -> bool {
        self.spaces.lock().contains_key(&space_id) || self.space_path(space_id).is_file()
    }

    /// Number of whole pages currently stored for a tablespace
    pub fn space_size(&self, space_id: SpaceId) -> Result<PageNo, DiskManagerError> {
        self.with_space(space_id, |file, page_size| {
            Ok((file.metadata()?.len() / page_size as u64) as PageNo)
        })
    }

    /// Shrink a tablespace file to `pages` pages
    pub fn truncate_space(&self, space_id: SpaceId, pages: PageNo) -> Result<(), DiskManagerError> {
        self.with_space(space_id, |file, page_size| {
            file.set_len(pages as u64 * page_size as u64)?;
            file.sync_all()?;
            Ok(())
        })
    }

    fn with_space<T>(
        &self,
        space_id: SpaceId,
        f: impl FnOnce(&mut File, usize) -> Result<T, DiskManagerError>,
    ) -> Result<T, DiskManagerError> {
        let mut spaces = self.spaces.lock();
        if !spaces.contains_key(&space_id) {
            let path = self.space_path(space_id);
            if !path.is_file() {
                return Err(DiskManagerError::SpaceNotFound(space_id));
            }
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            spaces.insert(space_id, file);
        }
        let file = spaces
            .get_mut(&space_id)
            .ok_or(DiskManagerError::SpaceNotFound(space_id))?;
        f(file, self.page_size)
    }

    /// Read a page from disk. Pages past the end of the file read as zeros.
    pub fn read_page(&self, page_id: PageId) -> Result<Page, DiskManagerError> {
        let offset = self.page_offset(page_id);

        self.with_space(page_id.space(), |file, page_size| {
            let mut page = Page::new(page_id, page_size);
            let file_size = file.metadata()?.len();
            if offset >= file_size {
                return Ok(page);
            }

            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut page.data)?;
            Ok(page)
        })
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.data.len() != self.page_size {
            return Err(DiskManagerError::PageSizeMismatch {
                expected: self.page_size,
                actual: page.data.len(),
            });
        }
        let offset = self.page_offset(page.page_id);

        self.with_space(page.page_id.space(), |file, _| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&page.data)?;
            file.flush()?;
            Ok(())
        })
    }

    /// Write a batch of pages, staging them in the doublewrite area first
    pub fn write_pages(&self, pages: &[Page]) -> Result<(), DiskManagerError> {
        match &self.doublewrite {
            Some(area) => {
                for chunk in pages.chunks(area.capacity()) {
                    area.write_batch(chunk)?;
                    for page in chunk {
                        self.write_page(page)?;
                    }
                    self.sync_all()?;
                }
            }
            None => {
                for page in pages {
                    self.write_page(page)?;
                }
                self.sync_all()?;
            }
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<(), DiskManagerError> {
        for file in self.spaces.lock().values() {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Calculate the offset of a page in its tablespace file
    fn page_offset(&self, page_id: PageId) -> u64 {
        page_id.page_no() as u64 * self.page_size as u64
    }
}
