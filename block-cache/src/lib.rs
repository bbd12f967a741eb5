//! In-memory block store for byte ranges of a single remote resource.
//!
//! Blocks are keyed by `position >> block_shift` and kept in key order so
//! callers can ask for "the block at or below this position" and walk the
//! blocks that follow it. Memory is bounded by a byte budget enforced with
//! least-recently-filled eviction that never touches pinned block ranges.

mod cache;
mod lru;

pub use cache::{Block, BlockCache, BlockId};
pub use lru::LruTracker;
