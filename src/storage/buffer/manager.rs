use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;

use crate::common::types::{Frame, FrameId, FramePtr, Page, PageId, PagePtr};
use crate::recovery::hooks::PageCache;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LRUReplacer;
use crate::storage::disk::DiskManager;

/// Fixed-size page cache over a `DiskManager`.
///
/// Frames are either on the free list, pinned, or tracked by the LRU
/// replacer as eviction candidates. Dirty pages are written back (through
/// the doublewrite area when one is configured) on eviction and on flush.
pub struct BufferPoolManager {
    pool_size: usize,
    page_size: usize,
    frames: Vec<FramePtr>,
    page_table: RwLock<HashMap<PageId, FrameId>>,
    free_list: RwLock<VecDeque<FrameId>>,
    replacer: RwLock<LRUReplacer>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Result<Self, BufferPoolError> {
        if pool_size == 0 {
            return Err(BufferPoolError::InvalidOperation(
                "Buffer pool needs at least one frame".to_string(),
            ));
        }

        let page_size = disk_manager.page_size();
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = i as FrameId;
            let page = Page::new(PageId::new(0, 0), page_size);
            frames.push(Arc::new(RwLock::new(Frame::new(frame_id, Arc::new(RwLock::new(page))))));
            free_list.push_back(frame_id);
        }

        Ok(Self {
            pool_size,
            page_size,
            frames,
            page_table: RwLock::new(HashMap::new()),
            free_list: RwLock::new(free_list),
            replacer: RwLock::new(LRUReplacer::new(pool_size)),
            disk_manager,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Get a reference to the disk manager
    pub fn disk_manager(&self) -> Arc<DiskManager> {
        self.disk_manager.clone()
    }

    /// Number of pages currently resident
    pub fn resident_pages(&self) -> usize {
        self.page_table.read().len()
    }

    /// Fetch a page from the buffer pool or disk. The page is returned pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if let Some(page) = self.pin_resident(page_id) {
            return Ok(page);
        }

        let page = self.disk_manager.read_page(page_id)?;
        self.install(page, false)
    }

    /// Create a zero-filled page without reading it from disk. The page is
    /// returned pinned and dirty.
    pub fn new_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if let Some(page) = self.pin_resident(page_id) {
            return Ok(page);
        }

        self.install(Page::new(page_id, self.page_size), true)
    }

    /// Replace the cached image of a page, marking it dirty
    pub fn put_page(&self, page: &Page) -> Result<(), BufferPoolError> {
        let mut page = page.clone();
        page.stamp();
        let page_id = page.page_id;

        match self.pin_resident(page_id) {
            Some(ptr) => *ptr.write() = page,
            None => {
                self.install(page, true)?;
            }
        }

        self.unpin_page(page_id, true)
    }

    /// Unpin a page, potentially marking it as dirty
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let frame_id = self.frame_of(page_id)?;

        let pin_count = {
            let mut frame_guard = self.frames[frame_id as usize].write();
            if frame_guard.pin_count > 0 {
                frame_guard.pin_count -= 1;
            }
            if is_dirty {
                frame_guard.is_dirty = true;
            }
            frame_guard.pin_count
        };

        // If pin count is now 0, make it available for replacement
        if pin_count == 0 {
            self.replacer.write().record_access(frame_id);
        }

        Ok(())
    }

    /// Flush a specific page to disk
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let frame_id = self.frame_of(page_id)?;
        let frame = &self.frames[frame_id as usize];

        let page_copy = {
            let frame_guard = frame.read();
            if !frame_guard.is_dirty {
                return Ok(());
            }
            let mut page = frame_guard.page.read().clone();
            page.stamp();
            page
        };

        self.disk_manager.write_pages(std::slice::from_ref(&page_copy))?;
        frame.write().is_dirty = false;
        Ok(())
    }

    /// Flush all dirty pages to disk as a single batch
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<(PageId, FrameId)> = self
            .page_table
            .read()
            .iter()
            .map(|(&page_id, &frame_id)| (page_id, frame_id))
            .collect();

        let mut batch = Vec::new();
        let mut flushed = Vec::new();
        for (page_id, frame_id) in resident {
            let frame_guard = self.frames[frame_id as usize].read();
            if !frame_guard.is_dirty {
                continue;
            }
            let mut page = frame_guard.page.read().clone();
            if page.page_id != page_id {
                continue;
            }
            page.stamp();
            batch.push(page);
            flushed.push((page_id, frame_id));
        }

        if batch.is_empty() {
            return Ok(());
        }

        self.disk_manager.write_pages(&batch)?;
        debug!("Flushed {} dirty pages", batch.len());

        for (page_id, frame_id) in flushed {
            let mut frame_guard = self.frames[frame_id as usize].write();
            if frame_guard.page.read().page_id == page_id {
                frame_guard.is_dirty = false;
            }
        }
        Ok(())
    }

    fn frame_of(&self, page_id: PageId) -> Result<FrameId, BufferPoolError> {
        self.page_table
            .read()
            .get(&page_id)
            .copied()
            .ok_or(BufferPoolError::PageNotFound(page_id))
    }

    /// Pin a page if it is resident
    fn pin_resident(&self, page_id: PageId) -> Option<PagePtr> {
        let frame_id = self.page_table.read().get(&page_id).copied()?;

        let page = {
            let mut frame_guard = self.frames[frame_id as usize].write();
            // The frame may have been recycled between the lookup and the lock
            if frame_guard.page.read().page_id != page_id {
                return None;
            }
            frame_guard.pin_count += 1;
            frame_guard.page.clone()
        };

        // Pinned frames are not eviction candidates
        self.replacer.write().remove(frame_id);
        Some(page)
    }

    /// Place a page image into a newly allocated frame, pinned once
    fn install(&self, page: Page, dirty: bool) -> Result<PagePtr, BufferPoolError> {
        let page_id = page.page_id;
        let frame_id = self.allocate_frame()?;
        let frame = &self.frames[frame_id as usize];

        let page_ptr = {
            let mut frame_guard = frame.write();
            *frame_guard.page.write() = page;
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = dirty;
            frame_guard.page.clone()
        };

        self.page_table.write().insert(page_id, frame_id);
        Ok(page_ptr)
    }

    /// Allocate a frame, either from the free list or by page replacement
    fn allocate_frame(&self) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = self.free_list.write().pop_front() {
            return Ok(frame_id);
        }

        let victim_id = self
            .replacer
            .write()
            .victim()
            .ok_or(BufferPoolError::NoFreeFrames)?;
        let frame = &self.frames[victim_id as usize];

        let (page_id, dirty_page) = {
            let frame_guard = frame.read();
            let page_guard = frame_guard.page.read();
            let dirty_page = frame_guard.is_dirty.then(|| {
                let mut page = page_guard.clone();
                page.stamp();
                page
            });
            (page_guard.page_id, dirty_page)
        };

        // Write the victim back before its frame is reused
        if let Some(page) = dirty_page {
            self.disk_manager.write_pages(std::slice::from_ref(&page))?;
            debug!("Evicted dirty page {}", page_id);
        }

        self.page_table.write().remove(&page_id);
        frame.write().is_dirty = false;
        Ok(victim_id)
    }
}

impl PageCache for BufferPoolManager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn pool_size(&self) -> usize {
        self.pool_size
    }

    fn read_page(&self, page_id: PageId) -> Result<Page, BufferPoolError> {
        let page = self.fetch_page(page_id)?.read().clone();
        self.unpin_page(page_id, false)?;
        Ok(page)
    }

    fn write_page(&self, page: &Page) -> Result<(), BufferPoolError> {
        self.put_page(page)
    }

    fn flush_all(&self) -> Result<(), BufferPoolError> {
        self.flush_all_pages()
    }
}
