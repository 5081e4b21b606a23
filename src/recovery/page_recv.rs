// Per-page buffered redo

use crate::common::types::Lsn;
use crate::recovery::arena::{LogArena, LogSnippet, SnippetId};

/// Recovery state of a page with buffered records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    /// Records are buffered; the page must be read before applying
    NotProcessed,
    /// The page is recreated from the log alone and is not read first
    WillNotRead,
    /// Claimed by an apply worker that is reading the page
    BeingRead,
    /// Records are being applied to the page
    BeingProcessed,
}

/// Singly linked chain of snippets in append order
#[derive(Debug, Default)]
pub struct RecsChain {
    head: Option<SnippetId>,
    tail: Option<SnippetId>,
    len: usize,
}

impl RecsChain {
    pub fn is_empty(&self) -> bool {
        debug_assert_eq!(self.head.is_none(), self.tail.is_none());
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn append(&mut self, arena: &mut LogArena, id: SnippetId) {
        match self.tail {
            Some(tail) => arena.link(tail, id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    pub fn iter<'a>(&self, arena: &'a LogArena) -> ChainIter<'a> {
        ChainIter {
            arena,
            next: self.head,
        }
    }

    /// Free leading snippets whose LSN is below `lsn`. Returns how many were
    /// freed.
    pub fn trim(&mut self, arena: &mut LogArena, lsn: Lsn) -> usize {
        let mut freed = 0;
        while let Some(head) = self.head {
            match arena.snippet(head) {
                Some(snippet) if snippet.lsn < lsn => {
                    self.head = arena.free_snippet(head);
                    freed += 1;
                }
                _ => break,
            }
        }
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= freed;
        freed
    }

    /// Free every snippet
    pub fn clear(&mut self, arena: &mut LogArena) {
        let mut next = self.head.take();
        while let Some(id) = next {
            next = arena.free_snippet(id);
        }
        self.tail = None;
        self.len = 0;
    }
}

/// Forward iterator over a chain
pub struct ChainIter<'a> {
    arena: &'a LogArena,
    next: Option<SnippetId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (SnippetId, &'a LogSnippet);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let snippet = self.arena.snippet(id)?;
        self.next = snippet.next();
        Some((id, snippet))
    }
}

/// Buffered records of one page
#[derive(Debug)]
pub struct PageRecv {
    pub state: RecvState,
    /// Number of snippets from the chain head already applied to the page
    pub last_offset: u32,
    pub log: RecsChain,
}

impl Default for PageRecv {
    fn default() -> Self {
        Self {
            state: RecvState::NotProcessed,
            last_offset: 0,
            log: RecsChain::default(),
        }
    }
}

impl PageRecv {
    pub fn append(&mut self, arena: &mut LogArena, id: SnippetId) {
        self.log.append(arena, id);
    }

    /// Drop snippets older than `lsn`. Returns true if nothing is left.
    pub fn trim(&mut self, arena: &mut LogArena, lsn: Lsn) -> bool {
        let freed = self.log.trim(arena, lsn) as u32;
        self.last_offset = self.last_offset.saturating_sub(freed);
        self.log.is_empty()
    }

    /// The page will be rebuilt from the log without reading it
    pub fn will_not_read(&mut self) {
        debug_assert!(matches!(
            self.state,
            RecvState::NotProcessed | RecvState::WillNotRead
        ));
        self.state = RecvState::WillNotRead;
    }

    pub fn clear(&mut self, arena: &mut LogArena) {
        self.log.clear(arena);
        self.last_offset = 0;
    }

    /// Snippets not yet applied
    pub fn pending(&self) -> usize {
        self.log.len() - self.last_offset as usize
    }
}
