//! Simulated heap over a fixed-size arena.
//!
//! The arena is covered edge to edge by a chain of blocks, each one
//! starting with a header (size, free flag, link to the next block) and
//! ending with a footer repeating its size. Allocation searches the chain
//! with the active [`Strategy`] and splits the chosen block; release marks
//! a block free and merges it with its free neighbours.

mod block;
mod strategy;


use std::fmt;

use log::{debug, info, warn};
use thiserror::Error;

use crate::config::HeapConfig;
use block::{Arena, BlockId};

pub use block::{BlockInfo, FOOTER_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE};
pub use strategy::Strategy;

/// Handle to an allocation: the arena offset of its payload, right after
/// the block header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pointer(usize);

impl Pointer {
    pub fn offset(self) -> usize {
        self.0
    }

    fn block(self) -> Option<BlockId> {
        self.0.checked_sub(HEADER_SIZE)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    #[error("arena of {capacity} bytes cannot hold a block of {minimum} bytes")]
    ArenaTooSmall { capacity: usize, minimum: usize },
    #[error("arena of {capacity} bytes cannot be allocated")]
    ArenaTooLarge { capacity: usize },
}

/// Reasons a release request is turned down. In both cases the heap is
/// left untouched.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeError {
    #[error("block at {ptr} is already free, ignoring free request")]
    DoubleFree { ptr: Pointer },
    #[error("{ptr} is not the payload of any block in this heap")]
    InvalidPointer { ptr: Pointer },
}

/// First inconsistency found in the block chain by [`Heap::check`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("block at {offset:#x} has size {size}, smaller than its header and footer")]
    TooSmall { offset: usize, size: usize },
    #[error("block at {offset:#x} of size {size} runs past the end of the arena")]
    Overrun { offset: usize, size: usize },
    #[error("block at {offset:#x} links to {next:#x} instead of {expected:#x}")]
    Gap { offset: usize, next: usize, expected: usize },
    #[error("chain covers {covered} bytes of a {capacity} byte arena")]
    Coverage { covered: usize, capacity: usize },
    #[error("free blocks at {first:#x} and {second:#x} are adjacent")]
    AdjacentFree { first: usize, second: usize },
    #[error("block at {offset:#x} has size {size} but its footer holds {footer}")]
    FooterMismatch { offset: usize, size: usize, footer: usize },
}

pub struct Heap {
    /// Bytes the whole block chain lives in.
    arena: Arena,
    /// Placement policy of the next allocations.
    strategy: Strategy,
}

impl Heap {
    /// Create a heap of `capacity` bytes, covered by a single free block.
    pub fn new(capacity: usize) -> Result<Self, HeapError> {
        Self::with_strategy(capacity, Strategy::default())
    }

    pub fn from_config(config: &HeapConfig) -> Result<Self, HeapError> {
        Self::with_strategy(config.capacity, config.strategy)
    }

    fn with_strategy(capacity: usize, strategy: Strategy) -> Result<Self, HeapError> {
        if capacity < MIN_BLOCK_SIZE {
            return Err(HeapError::ArenaTooSmall {
                capacity,
                minimum: MIN_BLOCK_SIZE,
            });
        }

        // At first the heap is empty, so the chain is a single free
        // block at offset 0 spanning the entire arena.
        let mut arena =
            Arena::new(capacity).map_err(|_| HeapError::ArenaTooLarge { capacity })?;
        arena.write_block(0, capacity, true, None);
        info!("Heap of {capacity} bytes created ({strategy}).");

        Ok(Self { arena, strategy })
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Change the placement policy. Existing allocations are not moved.
    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.strategy = strategy;
        debug!("Allocation strategy changed to: {strategy}");
    }

    /// Allocate `size` bytes of payload. Returns `None` for a zero-sized
    /// request, or when the active strategy finds no suitable free block.
    pub fn allocate(&mut self, size: usize) -> Option<Pointer> {
        if size == 0 {
            return None;
        }

        // The block has to hold the header and footer on top of the
        // payload itself.
        let total_size = HEADER_SIZE.checked_add(size)?.checked_add(FOOTER_SIZE)?;
        let Some(block) = strategy::find_free_block(&self.arena, total_size, self.strategy) else {
            debug!("No free block for {size} bytes ({}).", self.strategy);
            return None;
        };

        self.split_block(block, total_size);
        Some(Pointer(block + HEADER_SIZE))
    }

    /// Mark `block` occupied, carving `total_size` bytes out of it when
    /// the remainder is large enough to be a block of its own.
    fn split_block(&mut self, block: BlockId, total_size: usize) {
        let size = self.arena.size(block);

        if size >= total_size + MIN_BLOCK_SIZE {
            // The remaining space of the former free block is moved
            // after the allocated part, taking over its link.
            let remainder = block + total_size;
            let next = self.arena.next(block);
            self.arena.write_block(remainder, size - total_size, true, next);
            self.arena.write_block(block, total_size, false, Some(remainder));
            debug!(
                "Split block at {block:#x}: {total_size} bytes taken, {} left at {remainder:#x}.",
                size - total_size
            );
        } else {
            // Too little would be left over, so the whole block goes to
            // the caller.
            self.arena.set_free(block, false);
            debug!("Took whole block at {block:#x} ({size} bytes for {total_size}).");
        }
    }

    /// Release an allocation and merge the block with its free
    /// neighbours.
    pub fn release(&mut self, ptr: Pointer) -> Result<(), FreeError> {
        let Some((block, prev)) = self.locate(ptr) else {
            // A pointer into the middle of a free block is the payload of
            // a block released earlier and since merged into a neighbour.
            if self.enclosing_block(ptr).is_some_and(|block| self.arena.is_free(block)) {
                warn!("Block at {ptr} is already free, ignoring free request.");
                return Err(FreeError::DoubleFree { ptr });
            }
            warn!("Release of {ptr} which is not an allocation of this heap.");
            return Err(FreeError::InvalidPointer { ptr });
        };

        if self.arena.is_free(block) {
            warn!("Block at {ptr} is already free, ignoring free request.");
            return Err(FreeError::DoubleFree { ptr });
        }

        self.arena.set_free(block, true);
        self.merge_block(block, prev);
        Ok(())
    }

    /// Find the block owning `ptr` by walking the chain from the head.
    /// Returns the block and its predecessor.
    fn locate(&self, ptr: Pointer) -> Option<(BlockId, Option<BlockId>)> {
        let target = ptr.block()?;

        let mut prev = None;
        for block in self.arena.blocks() {
            if block == target {
                return Some((block, prev));
            }
            if block > target {
                break;
            }
            prev = Some(block);
        }
        None
    }

    /// Block whose extent contains the header position of `ptr`.
    fn enclosing_block(&self, ptr: Pointer) -> Option<BlockId> {
        let target = ptr.block()?;
        self.arena
            .blocks()
            .take_while(|&block| block <= target)
            .last()
            .filter(|&block| target < block + self.arena.size(block))
    }

    fn merge_block(&mut self, block: BlockId, prev: Option<BlockId>) {
        // Merge with the next block first...
        if let Some(next) = self.arena.next(block) {
            let size = self.arena.size(block);
            if self.arena.is_free(next) && block + size == next {
                let merged = size + self.arena.size(next);
                let after = self.arena.next(next);
                self.arena.set_size(block, merged);
                self.arena.set_next(block, after);
                debug!("Merged block at {next:#x} into {block:#x} ({merged} bytes).");
            }
        }

        // ...then fold the (possibly grown) block into the previous one.
        // The predecessor comes from the head-to-block walk done when
        // locating the block, not from the footer before it.
        if let Some(prev) = prev {
            let prev_size = self.arena.size(prev);
            if self.arena.is_free(prev) && prev + prev_size == block {
                let merged = prev_size + self.arena.size(block);
                let after = self.arena.next(block);
                self.arena.set_size(prev, merged);
                self.arena.set_next(prev, after);
                debug!("Merged block at {block:#x} into {prev:#x} ({merged} bytes).");
            }
        }
    }

    /// Payload bytes of a live allocation, `None` if `ptr` does not name
    /// one.
    pub fn payload(&self, ptr: Pointer) -> Option<&[u8]> {
        let (block, _) = self.locate(ptr)?;
        (!self.arena.is_free(block)).then(|| self.arena.payload(block))
    }

    pub fn payload_mut(&mut self, ptr: Pointer) -> Option<&mut [u8]> {
        let (block, _) = self.locate(ptr)?;
        if self.arena.is_free(block) {
            return None;
        }
        Some(self.arena.payload_mut(block))
    }

    /// Snapshot of the chain in address order.
    pub fn blocks(&self) -> Vec<BlockInfo> {
        self.arena
            .blocks()
            .map(|block| self.arena.info(block))
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Total size of the free blocks, headers and footers included.
    pub fn free_bytes(&self) -> usize {
        self.arena
            .blocks()
            .filter(|&block| self.arena.is_free(block))
            .map(|block| self.arena.size(block))
            .sum()
    }

    pub fn used_bytes(&self) -> usize {
        self.capacity() - self.free_bytes()
    }

    pub fn largest_free_block(&self) -> Option<BlockInfo> {
        self.blocks()
            .into_iter()
            .filter(|info| info.free)
            .reduce(|largest, info| if info.size > largest.size { info } else { largest })
    }

    /// Verify that the chain covers the arena without gaps, that no two
    /// neighbours are both free and that every footer matches its
    /// block size.
    pub fn check(&self) -> Result<(), ChainError> {
        let capacity = self.arena.capacity();
        let mut offset = 0;
        let mut prev_free = None;

        loop {
            // Make sure the header can be read at all before looking at
            // it, then that the whole block is inside the arena.
            if offset + HEADER_SIZE > capacity {
                return Err(ChainError::Overrun { offset, size: HEADER_SIZE });
            }
            let info = self.arena.info(offset);
            if info.size < HEADER_SIZE + FOOTER_SIZE {
                return Err(ChainError::TooSmall { offset, size: info.size });
            }
            if info.size > capacity - offset {
                return Err(ChainError::Overrun { offset, size: info.size });
            }

            let footer = self.arena.footer(offset);
            if footer != info.size {
                return Err(ChainError::FooterMismatch { offset, size: info.size, footer });
            }

            if info.free {
                if let Some(first) = prev_free {
                    return Err(ChainError::AdjacentFree { first, second: offset });
                }
            }
            prev_free = info.free.then_some(offset);

            let end = offset + info.size;
            match info.next {
                Some(next) if next == end => offset = next,
                Some(next) => {
                    return Err(ChainError::Gap { offset, next, expected: end });
                }
                None if end == capacity => return Ok(()),
                None => {
                    return Err(ChainError::Coverage { covered: end, capacity });
                }
            }
        }
    }
}

impl fmt::Display for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Heap status (Strategy: {}):", self.strategy)?;
        for info in self.blocks() {
            write!(
                f,
                "Block at {:#06x}: size = {}, free = {}",
                info.offset, info.size, info.free as u8
            )?;
            if let Some(next) = info.next {
                write!(f, ", next = {next:#06x}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
