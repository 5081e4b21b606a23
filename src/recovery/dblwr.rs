// Doublewrite copies available during recovery

use std::collections::VecDeque;

use crate::common::types::PageId;
use crate::storage::page::PageHeader;

/// Full-page images loaded from the doublewrite area, newest first
#[derive(Debug, Default)]
pub struct RecvDblwr {
    pages: VecDeque<Vec<u8>>,
}

impl RecvDblwr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a page image; later additions take precedence
    pub fn add(&mut self, page: Vec<u8>) {
        self.pages.push_front(page);
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Most recent copy of a page, if any
    pub fn find_page(&self, page_id: PageId) -> Option<&[u8]> {
        self.pages
            .iter()
            .find(|page| {
                let header = PageHeader::from_bytes(page);
                header.space_id == page_id.space() && header.page_no == page_id.page_no()
            })
            .map(|page| page.as_slice())
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}
