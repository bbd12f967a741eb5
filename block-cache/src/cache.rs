use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::ops::RangeInclusive;

use media_error::{MediaError, Result};

use crate::lru::LruTracker;

/// Index of a block: the byte position shifted right by the block shift.
pub type BlockId = u64;

const MAX_BLOCK_SHIFT: u32 = 30;

/// A fixed-capacity chunk of the resource, filled from its start.
///
/// Only the first `filled_len()` bytes are meaningful. A block is written
/// sequentially, so there are never holes below the filled length.
pub struct Block {
    data: Box<[u8]>,
    filled: usize,
}

impl Block {
    pub fn new(capacity: usize) -> Self {
        Block {
            data: vec![0; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled_len(&self) -> usize {
        self.filled
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.data.len()
    }

    /// The filled region of the block.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Copies as much of `bytes` as fits at `offset` and returns how many
    /// bytes were taken.
    ///
    /// `offset` must not lie beyond the filled length, otherwise the block
    /// would claim bytes that were never written.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> usize {
        debug_assert!(
            offset <= self.filled,
            "write at {} would leave a hole after {}",
            offset,
            self.filled
        );
        if offset >= self.capacity() {
            return 0;
        }
        let count = bytes.len().min(self.capacity() - offset);
        self.data[offset..offset + count].copy_from_slice(&bytes[..count]);
        self.filled = self.filled.max(offset + count);
        count
    }
}

/// Ordered map from block id to block, bounded by a memory budget.
///
/// Every block is charged its full capacity against the budget as soon as
/// it is created. Recency is tracked on writes only, so eviction order is
/// least-recently-filled; reads never reorder anything.
pub struct BlockCache {
    /// Label for logging
    label: String,
    block_shift: u32,
    blocks: BTreeMap<BlockId, Block>,
    lru: LruTracker<BlockId>,
    /// The maximum allowable memory usage in bytes.
    max_memory_bytes: usize,
}

impl BlockCache {
    /// Creates an empty cache.
    ///
    /// # Arguments
    /// * `label` - Identifier used in logs
    /// * `block_shift` - Blocks hold `1 << block_shift` bytes
    /// * `max_memory_bytes` - Budget above which `evict` reclaims blocks
    pub fn new(
        label: String,
        block_shift: u32,
        max_memory_bytes: usize,
    ) -> Result<Self> {
        if block_shift == 0 || block_shift > MAX_BLOCK_SHIFT {
            return Err(MediaError::Config(format!(
                "cache/{}: block shift {} is outside 1..={}",
                label, block_shift, MAX_BLOCK_SHIFT
            )));
        }
        let block_size = 1usize << block_shift;
        if max_memory_bytes < block_size {
            return Err(MediaError::Config(format!(
                "cache/{}: memory limit {} is smaller than one block ({})",
                label, max_memory_bytes, block_size
            )));
        }

        log::debug!(
            "cache/{}: initialized with {} byte blocks, {} bytes limit",
            label,
            block_size,
            max_memory_bytes
        );

        Ok(Self {
            label,
            block_shift,
            blocks: BTreeMap::new(),
            lru: LruTracker::new(),
            max_memory_bytes,
        })
    }

    pub fn block_shift(&self) -> u32 {
        self.block_shift
    }

    pub fn block_size(&self) -> usize {
        1 << self.block_shift
    }

    pub fn block_id(&self, position: u64) -> BlockId {
        position >> self.block_shift
    }

    /// First byte position covered by block `id`.
    pub fn block_start(&self, id: BlockId) -> u64 {
        id << self.block_shift
    }

    pub fn offset_in_block(&self, position: u64) -> usize {
        (position & ((1u64 << self.block_shift) - 1)) as usize
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Returns the block for `id`, creating an empty one if missing, and
    /// marks it as the most recently filled block.
    pub fn get_or_create(&mut self, id: BlockId) -> &mut Block {
        let block_size = self.block_size();
        self.lru.touch(id, block_size);
        let label = &self.label;
        self.blocks.entry(id).or_insert_with(|| {
            log::debug!("cache/{}: created block {}", label, id);
            Block::new(block_size)
        })
    }

    /// The cached block with the largest id not greater than `id`.
    pub fn floor(&self, id: BlockId) -> Option<(BlockId, &Block)> {
        self.blocks
            .range(..=id)
            .next_back()
            .map(|(block_id, block)| (*block_id, block))
    }

    /// Cached blocks with ids strictly greater than `id`, in id order.
    pub fn upper_bound(
        &self,
        id: BlockId,
    ) -> impl Iterator<Item = (BlockId, &Block)> + '_ {
        self.blocks
            .range((Excluded(id), Unbounded))
            .map(|(block_id, block)| (*block_id, block))
    }

    pub fn remove(&mut self, id: BlockId) -> Option<Block> {
        self.lru.remove(&id);
        self.blocks.remove(&id)
    }

    /// Ids of all cached blocks, in order.
    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The current memory usage in bytes.
    pub fn memory_used(&self) -> usize {
        self.lru.memory_used()
    }

    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_bytes
    }

    pub fn needs_eviction(&self) -> bool {
        self.memory_used() > self.max_memory_bytes
    }

    /// Drops least-recently-filled blocks until the cache fits its budget.
    ///
    /// Blocks inside any of the `pinned` ranges are never removed, even if
    /// that leaves the cache above its budget. Returns the evicted ids in
    /// eviction order.
    pub fn evict(&mut self, pinned: &[RangeInclusive<BlockId>]) -> Vec<BlockId> {
        let mut evicted = Vec::new();
        if !self.needs_eviction() {
            return evicted;
        }

        let candidates: Vec<BlockId> = self
            .lru
            .iter()
            .filter(|id| !pinned.iter().any(|range| range.contains(*id)))
            .copied()
            .collect();

        for id in candidates {
            if !self.needs_eviction() {
                break;
            }
            self.remove(id);
            evicted.push(id);
        }

        if self.needs_eviction() {
            log::warn!(
                "cache/{}: {} bytes pinned, above the {} bytes limit",
                self.label,
                self.memory_used(),
                self.max_memory_bytes
            );
        }
        log::debug!(
            "cache/{}: evicted blocks {:?}, total {}/{}",
            self.label,
            evicted,
            self.memory_used(),
            self.max_memory_bytes
        );

        evicted
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.lru.clear();
    }
}
