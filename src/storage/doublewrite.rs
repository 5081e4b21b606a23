// Doublewrite area
//
// Page images are written here (and synced) before they are written to
// their tablespace files, so that a page torn by a crash can be restored from
// the copy during recovery.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;

use crate::common::types::Page;

const DBLWR_MAGIC: u32 = 0x4442_4C57;

/// On-disk staging area holding up to `capacity` page images
pub struct DoublewriteArea {
    file: Mutex<File>,
    page_size: usize,
    capacity: usize,
}

impl DoublewriteArea {
    pub fn open(path: impl AsRef<Path>, page_size: usize, capacity: usize) -> io::Result<Self> {
        if capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "doublewrite capacity must be non-zero",
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            page_size,
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stage a batch of page images. The slot after the header page holds
    /// the first image.
    pub fn write_batch(&self, pages: &[Page]) -> io::Result<()> {
        if pages.len() > self.capacity {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("batch of {} pages exceeds doublewrite capacity {}", pages.len(), self.capacity),
            ));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.page_size as u64))?;
        for page in pages {
            file.write_all(&page.data)?;
        }

        let mut header = vec![0u8; self.page_size];
        LittleEndian::write_u32(&mut header[0..4], DBLWR_MAGIC);
        LittleEndian::write_u32(&mut header[4..8], pages.len() as u32);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        file.sync_data()
    }

    /// Load every staged page image
    pub fn load(&self) -> io::Result<Vec<Vec<u8>>> {
        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        if len < self.page_size as u64 {
            return Ok(Vec::new());
        }

        let mut header = vec![0u8; self.page_size];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        if LittleEndian::read_u32(&header[0..4]) != DBLWR_MAGIC {
            return Ok(Vec::new());
        }

        let count = (LittleEndian::read_u32(&header[4..8]) as usize).min(self.capacity);
        let mut images = Vec::with_capacity(count);
        for _ in 0..count {
            let mut image = vec![0u8; self.page_size];
            if file.read_exact(&mut image).is_err() {
                // A crash while staging leaves a short file; keep what is whole
                break;
            }
            images.push(image);
        }
        Ok(images)
    }
}
