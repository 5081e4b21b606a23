// Buffered redo records for all pages

use std::collections::BTreeMap;
use std::ops::Bound;

use log::{debug, warn};

use crate::common::types::{Lsn, PageId, PageNo, SpaceId};
use crate::recovery::arena::{LogArena, SnippetId};
use crate::recovery::config::MAX_UNDO_SPACES;
use crate::recovery::page_recv::{PageRecv, RecvState};

/// Whether parsed records are buffered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Parse only
    No,
    /// Buffer every page record
    Yes,
    /// Buffer records of tablespaces that are known to exist
    IfExists,
}

/// Truncation of an undo tablespace seen in the log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trunc {
    /// LSN at which the undo tablespace was re-created; older records of the
    /// space are obsolete
    pub lsn: Lsn,
    /// Page count the tablespace was shrunk to
    pub pages: PageNo,
}

pub struct RedoStore {
    pages: BTreeMap<PageId, PageRecv>,
    arena: LogArena,
    truncated_undo_spaces: [Trunc; MAX_UNDO_SPACES],
    /// Last LSN buffered before the store was switched to `StoreMode::No`
    pub last_stored_lsn: Lsn,
    /// Set after the final batch has been applied
    pub after_apply: bool,
}

impl RedoStore {
    pub fn new(arena: LogArena) -> Self {
        Self {
            pages: BTreeMap::new(),
            arena,
            truncated_undo_spaces: [Trunc::default(); MAX_UNDO_SPACES],
            last_stored_lsn: 0,
            after_apply: false,
        }
    }

    pub fn arena(&self) -> &LogArena {
        &self.arena
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn get(&self, page_id: PageId) -> Option<&PageRecv> {
        self.pages.get(&page_id)
    }

    pub fn get_mut(&mut self, page_id: PageId) -> Option<&mut PageRecv> {
        self.pages.get_mut(&page_id)
    }

    pub fn page_ids(&self) -> impl Iterator<Item = PageId> + '_ {
        self.pages.keys().copied()
    }

    /// Whether `lens` more snippet bytes can be buffered
    pub fn can_fit(&self, lens: &[usize]) -> bool {
        self.arena.can_fit(lens)
    }

    /// Buffer one record for a page. Returns false if the arena is full.
    #[must_use]
    pub fn add(&mut self, page_id: PageId, lsn: Lsn, bytes: &[u8]) -> bool {
        let Some(id) = self.arena.alloc_snippet(lsn, bytes) else {
            return false;
        };
        self.pages
            .entry(page_id)
            .or_default()
            .append(&mut self.arena, id);
        true
    }

    /// Buffer a record that rebuilds the page from scratch. Older records of
    /// the page are obsolete and the page need not be read.
    #[must_use]
    pub fn add_init(&mut self, page_id: PageId, lsn: Lsn, bytes: &[u8]) -> bool {
        self.trim(page_id, lsn);
        if !self.add(page_id, lsn, bytes) {
            return false;
        }
        if let Some(recv) = self.pages.get_mut(&page_id) {
            recv.will_not_read();
        }
        true
    }

    /// Drop records of `page_id` older than `lsn`. Returns true if none are
    /// left, in which case the entry is removed.
    pub fn trim(&mut self, page_id: PageId, lsn: Lsn) -> bool {
        let Some(recv) = self.pages.get_mut(&page_id) else {
            return true;
        };
        if recv.trim(&mut self.arena, lsn) {
            self.pages.remove(&page_id);
            self.release_if_idle();
            true
        } else {
            false
        }
    }

    /// Drop records older than `lsn` of pages at or beyond `pages` in `space`
    pub fn trim_space(&mut self, space: SpaceId, pages: PageNo, lsn: Lsn) {
        let range = (
            Bound::Included(PageId::new(space, pages)),
            Bound::Included(PageId::new(space, PageNo::MAX)),
        );
        let ids: Vec<PageId> = self.pages.range(range).map(|(id, _)| *id).collect();
        if !ids.is_empty() {
            debug!(
                "Trimming {} buffered pages of tablespace {} from page {}",
                ids.len(),
                space,
                pages
            );
        }
        for page_id in ids {
            self.trim(page_id, lsn);
        }
    }

    /// Remove a page after its records were applied
    pub fn clear(&mut self, page_id: PageId) {
        if let Some(mut recv) = self.pages.remove(&page_id) {
            recv.clear(&mut self.arena);
            self.release_if_idle();
        }
    }

    // With no page left the arena holds nothing live; give back its blocks
    fn release_if_idle(&mut self) {
        if self.pages.is_empty() {
            self.arena.clear();
        }
    }

    /// Discard the records of a page that cannot be recovered
    pub fn free_corrupted_page(&mut self, page_id: PageId) {
        if self.pages.contains_key(&page_id) {
            warn!("Discarding buffered redo for corrupted page {}", page_id);
            self.clear(page_id);
        }
    }

    /// Check the memory ceiling. When reached, records the position up to
    /// which records were buffered and stops buffering. Never called during
    /// the final batch, which parses nothing.
    pub fn is_memory_exhausted(&mut self, store: &mut StoreMode, recovered_lsn: Lsn) -> bool {
        if *store == StoreMode::No || self.arena.n_blocks() < self.arena.max_blocks() {
            return false;
        }
        self.stop_storing(store, recovered_lsn);
        true
    }

    /// Stop buffering; scanning resumes from `lsn` after the next batch
    pub fn stop_storing(&mut self, store: &mut StoreMode, lsn: Lsn) {
        if *store != StoreMode::No {
            self.last_stored_lsn = lsn;
            *store = StoreMode::No;
            debug!(
                "Redo buffer full with {} blocks, stopped storing at LSN {}",
                self.arena.n_blocks(),
                lsn
            );
        }
    }

    pub fn trunc(&self, undo_idx: usize) -> Trunc {
        self.truncated_undo_spaces[undo_idx]
    }

    pub fn set_trunc_lsn(&mut self, undo_idx: usize, lsn: Lsn) {
        self.truncated_undo_spaces[undo_idx].lsn = lsn;
    }

    pub fn set_trunc_pages(&mut self, undo_idx: usize, pages: PageNo) {
        self.truncated_undo_spaces[undo_idx].pages = pages;
    }

    /// Undo spaces that were shrunk, as (table index, page count)
    pub fn truncations(&self) -> impl Iterator<Item = (usize, PageNo)> + '_ {
        self.truncated_undo_spaces
            .iter()
            .enumerate()
            .filter(|(_, t)| t.pages != 0)
            .map(|(i, t)| (i, t.pages))
    }

    /// Pages waiting to be applied
    pub fn pending_pages(&self) -> Vec<PageId> {
        self.pages
            .iter()
            .filter(|(_, recv)| {
                matches!(recv.state, RecvState::NotProcessed | RecvState::WillNotRead)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Copy the unapplied snippets of a page, oldest first
    pub fn pending_snippets(&self, page_id: PageId) -> Vec<(SnippetId, Lsn, Vec<u8>)> {
        match self.pages.get(&page_id) {
            Some(recv) => recv
                .log
                .iter(&self.arena)
                .skip(recv.last_offset as usize)
                .map(|(id, s)| (id, s.lsn, self.arena.snippet_bytes(id).to_vec()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Drop every buffered record
    pub fn reset(&mut self) {
        self.pages.clear();
        self.arena.clear();
        self.truncated_undo_spaces = [Trunc::default(); MAX_UNDO_SPACES];
        self.last_stored_lsn = 0;
        self.after_apply = false;
    }
}
