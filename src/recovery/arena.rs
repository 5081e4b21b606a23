// Storage for buffered redo records
//
// Record bytes are bump-allocated inside page-sized blocks; a block is
// released once every record stored in it has been freed. Records themselves
// are addressed through `SnippetId` handles into a slab, which is what the
// per-page chains link together.
//
// Blocks are owned allocations, not frames borrowed from the page cache, so
// while buffering the process holds the whole pool plus up to `max_blocks`
// extra pages. Only blocks count against `max_blocks`. The slab holds one
// small fixed-size entry per live record and is not capped; freed entries
// are reused.

use std::mem::size_of;

use crate::common::types::Lsn;

const ALIGN: usize = size_of::<usize>();

fn align_up(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

/// Location of bytes returned by `LogArena::alloc`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaPtr {
    block: u32,
    offset: u32,
    len: u32,
}

impl ArenaPtr {
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Handle of a buffered log snippet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnippetId(u32);

/// One page-scoped record: its bytes, the commit LSN of its
/// mini-transaction and the next snippet of the same page
#[derive(Debug)]
pub struct LogSnippet {
    pub lsn: Lsn,
    data: ArenaPtr,
    next: Option<SnippetId>,
}

impl LogSnippet {
    pub fn next(&self) -> Option<SnippetId> {
        self.next
    }
}

struct ArenaBlock {
    data: Box<[u8]>,
    used: usize,
    live: usize,
}

pub struct LogArena {
    block_size: usize,
    max_blocks: usize,
    blocks: Vec<Option<ArenaBlock>>,
    free_slots: Vec<u32>,
    n_blocks: usize,
    current: Option<u32>,
    snippets: Vec<Option<LogSnippet>>,
    free_snippets: Vec<u32>,
}

impl LogArena {
    pub fn new(block_size: usize, max_blocks: usize) -> Self {
        Self {
            block_size,
            max_blocks,
            blocks: Vec::new(),
            free_slots: Vec::new(),
            n_blocks: 0,
            current: None,
            snippets: Vec::new(),
            free_snippets: Vec::new(),
        }
    }

    /// Blocks currently in use
    pub fn n_blocks(&self) -> usize {
        self.n_blocks
    }

    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of live snippets
    pub fn n_snippets(&self) -> usize {
        self.snippets.len() - self.free_snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_blocks == 0
    }

    /// Reserve `len` bytes. Returns `None` when the block cap is reached.
    pub fn alloc(&mut self, len: usize) -> Option<ArenaPtr> {
        if len > self.block_size {
            return None;
        }
        let idx = match self.current {
            Some(idx) if self.room_in(idx) >= len => idx,
            _ => self.new_block()?,
        };
        let block = self.blocks[idx as usize].as_mut()?;
        let offset = block.used;
        block.used = align_up(offset + len).min(self.block_size);
        block.live += 1;
        Some(ArenaPtr {
            block: idx,
            offset: offset as u32,
            len: len as u32,
        })
    }

    /// Release bytes returned by `alloc`
    pub fn free(&mut self, ptr: ArenaPtr) {
        let idx = ptr.block as usize;
        let Some(block) = self.blocks[idx].as_mut() else {
            return;
        };
        debug_assert!(block.live > 0);
        block.live -= 1;
        if block.live > 0 {
            return;
        }
        if self.current == Some(ptr.block) {
            block.used = 0;
        } else {
            self.blocks[idx] = None;
            self.free_slots.push(ptr.block);
            self.n_blocks -= 1;
        }
    }

    pub fn bytes(&self, ptr: ArenaPtr) -> &[u8] {
        match &self.blocks[ptr.block as usize] {
            Some(block) => &block.data[ptr.offset as usize..(ptr.offset + ptr.len) as usize],
            None => &[],
        }
    }

    pub fn bytes_mut(&mut self, ptr: ArenaPtr) -> &mut [u8] {
        match &mut self.blocks[ptr.block as usize] {
            Some(block) => &mut block.data[ptr.offset as usize..(ptr.offset + ptr.len) as usize],
            None => &mut [],
        }
    }

    /// Whether allocations of `lens`, in order, would all succeed
    pub fn can_fit(&self, lens: &[usize]) -> bool {
        let mut room = self.current.map_or(0, |idx| self.room_in(idx));
        let mut blocks = self.n_blocks;
        for &len in lens {
            if len > self.block_size {
                return false;
            }
            if len > room {
                if blocks >= self.max_blocks {
                    return false;
                }
                blocks += 1;
                room = self.block_size;
            }
            room = room.saturating_sub(align_up(len));
        }
        true
    }

    /// Copy `bytes` into the arena as a new unlinked snippet
    pub fn alloc_snippet(&mut self, lsn: Lsn, bytes: &[u8]) -> Option<SnippetId> {
        let data = self.alloc(bytes.len())?;
        self.bytes_mut(data).copy_from_slice(bytes);
        let snippet = LogSnippet {
            lsn,
            data,
            next: None,
        };
        let id = match self.free_snippets.pop() {
            Some(slot) => {
                self.snippets[slot as usize] = Some(snippet);
                slot
            }
            None => {
                self.snippets.push(Some(snippet));
                (self.snippets.len() - 1) as u32
            }
        };
        Some(SnippetId(id))
    }

    /// Free a snippet; returns the snippet it linked to
    pub fn free_snippet(&mut self, id: SnippetId) -> Option<SnippetId> {
        let snippet = self.snippets.get_mut(id.0 as usize)?.take()?;
        self.free_snippets.push(id.0);
        self.free(snippet.data);
        snippet.next
    }

    pub fn snippet(&self, id: SnippetId) -> Option<&LogSnippet> {
        self.snippets.get(id.0 as usize)?.as_ref()
    }

    pub fn snippet_bytes(&self, id: SnippetId) -> &[u8] {
        match self.snippet(id) {
            Some(snippet) => self.bytes(snippet.data),
            None => &[],
        }
    }

    pub(crate) fn link(&mut self, id: SnippetId, next: SnippetId) {
        if let Some(Some(snippet)) = self.snippets.get_mut(id.0 as usize) {
            snippet.next = Some(next);
        }
    }

    /// Drop everything, releasing all blocks
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.free_slots.clear();
        self.n_blocks = 0;
        self.current = None;
        self.snippets.clear();
        self.free_snippets.clear();
    }

    fn room_in(&self, idx: u32) -> usize {
        self.blocks[idx as usize]
            .as_ref()
            .map_or(0, |block| self.block_size - block.used)
    }

    fn new_block(&mut self) -> Option<u32> {
        if self.n_blocks >= self.max_blocks {
            return None;
        }
        // The block being replaced is released once it holds nothing
        if let Some(prev) = self.current.take() {
            if self.blocks[prev as usize].as_ref().is_some_and(|b| b.live == 0) {
                self.blocks[prev as usize] = None;
                self.free_slots.push(prev);
                self.n_blocks -= 1;
            }
        }
        let block = ArenaBlock {
            data: vec![0u8; self.block_size].into_boxed_slice(),
            used: 0,
            live: 0,
        };
        let idx = match self.free_slots.pop() {
            Some(slot) => {
                self.blocks[slot as usize] = Some(block);
                slot
            }
            None => {
                self.blocks.push(Some(block));
                (self.blocks.len() - 1) as u32
            }
        };
        self.n_blocks += 1;
        self.current = Some(idx);
        Some(idx)
    }
}
