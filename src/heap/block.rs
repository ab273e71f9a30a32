use std::collections::TryReserveError;
use std::mem::size_of;

/// Every header field, and the footer, is one machine word wide.
const WORD: usize = size_of::<usize>();

/// Bytes taken by a block header: the block size, the free flag and the
/// link to the next block, one word each.
pub const HEADER_SIZE: usize = 3 * WORD;

/// Bytes taken by the footer, which repeats the block size in the last
/// word of the block.
pub const FOOTER_SIZE: usize = WORD;

/// Smallest block the arena can hold: a header, a footer and a single
/// byte of payload.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE + FOOTER_SIZE + 1;

const SIZE_FIELD: usize = 0;
const FREE_FIELD: usize = WORD;
const NEXT_FIELD: usize = 2 * WORD;

/// Link value stored in the header of the tail block.
const NO_NEXT: usize = usize::MAX;

/// Identifier of a block within the arena. This is in fact just the
/// offset of the block header from the start of the arena.
pub type BlockId = usize;

/// Copy of a block header taken at a given point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header within the arena.
    pub offset: usize,
    /// Total size of the block (header, payload and footer).
    pub size: usize,
    /// Whether the block is available for allocation.
    pub free: bool,
    /// Offset of the next block, `None` for the tail block.
    pub next: Option<usize>,
}

impl BlockInfo {
    /// Number of bytes a caller can use inside the block.
    pub fn payload_size(&self) -> usize {
        self.size.saturating_sub(HEADER_SIZE + FOOTER_SIZE)
    }
}

/// Fixed-size byte region holding the block chain. Block headers and
/// footers are encoded directly in the bytes, the chain starting at
/// offset 0.
pub struct Arena {
    bytes: Box<[u8]>,
}

impl Arena {
    /// Zeroed arena of `capacity` bytes. Fails instead of aborting when
    /// the host cannot provide that much memory.
    pub fn new(capacity: usize) -> Result<Self, TryReserveError> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(capacity)?;
        bytes.resize(capacity, 0);

        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Write a whole header at `block`, followed by the footer at the
    /// end of the block.
    pub fn write_block(
        &mut self,
        block: BlockId,
        size: usize,
        free: bool,
        next: Option<BlockId>,
    ) {
        self.set_size(block, size);
        self.set_free(block, free);
        self.set_next(block, next);
    }

    pub fn size(&self, block: BlockId) -> usize {
        self.read_word(block + SIZE_FIELD)
    }

    /// Update the size of a block. The footer moves with the end of the
    /// block, so it is rewritten every time.
    pub fn set_size(&mut self, block: BlockId, size: usize) {
        self.write_word(block + SIZE_FIELD, size);
        self.write_word(block + size - FOOTER_SIZE, size);
    }

    pub fn is_free(&self, block: BlockId) -> bool {
        self.read_word(block + FREE_FIELD) != 0
    }

    pub fn set_free(&mut self, block: BlockId, free: bool) {
        self.write_word(block + FREE_FIELD, free as usize);
    }

    pub fn next(&self, block: BlockId) -> Option<BlockId> {
        match self.read_word(block + NEXT_FIELD) {
            NO_NEXT => None,
            next => Some(next),
        }
    }

    pub fn set_next(&mut self, block: BlockId, next: Option<BlockId>) {
        self.write_word(block + NEXT_FIELD, next.unwrap_or(NO_NEXT));
    }

    /// Value stored in the footer of a block. The allocator itself never
    /// reads it back; only the consistency check does.
    pub fn footer(&self, block: BlockId) -> usize {
        self.read_word(block + self.size(block) - FOOTER_SIZE)
    }

    pub fn info(&self, block: BlockId) -> BlockInfo {
        BlockInfo {
            offset: block,
            size: self.size(block),
            free: self.is_free(block),
            next: self.next(block),
        }
    }

    /// Walk the chain from the head, in address order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            arena: self,
            current: Some(0),
        }
    }

    /// Payload bytes of a block, between its header and its footer.
    pub fn payload(&self, block: BlockId) -> &[u8] {
        let size = self.size(block);
        &self.bytes[block + HEADER_SIZE..block + size - FOOTER_SIZE]
    }

    pub fn payload_mut(&mut self, block: BlockId) -> &mut [u8] {
        let size = self.size(block);
        &mut self.bytes[block + HEADER_SIZE..block + size - FOOTER_SIZE]
    }

    fn read_word(&self, at: usize) -> usize {
        let mut word = [0; WORD];
        word.copy_from_slice(&self.bytes[at..at + WORD]);
        usize::from_ne_bytes(word)
    }

    fn write_word(&mut self, at: usize, value: usize) {
        self.bytes[at..at + WORD].copy_from_slice(&value.to_ne_bytes());
    }
}

/// Iterator over the block chain, following the `next` links.
pub struct Blocks<'a> {
    arena: &'a Arena,
    current: Option<BlockId>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        let block = self.current?;
        self.current = self.arena.next(block);
        Some(block)
    }
}
