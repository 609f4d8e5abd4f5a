// src/core/block_manager.rs
//! Arena of live blocks addressed by generational handles.

use super::block::Block;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Opaque reference to a block. A handle outlives its block safely: once
/// the block is destroyed, lookups with the old handle return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockHandle {
    index: u32,
    generation: u32,
}

impl BlockHandle {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    block: Option<Block>,
}

#[derive(Debug, Default)]
pub(crate) struct BlockArena {
    slots: Vec<Slot>,
    free_block_ids: VecDeque<usize>,
    live: usize,
}

impl BlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: Block) -> BlockHandle {
        self.live += 1;
        if let Some(index) = self.free_block_ids.pop_front() {
            let slot = &mut self.slots[index];
            slot.block = Some(block);
            return BlockHandle {
                index: index as u32,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            block: Some(block),
        });
        BlockHandle {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn get(&self, handle: BlockHandle) -> Option<&Block> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.block.as_ref())
    }

    pub fn get_mut(&mut self, handle: BlockHandle) -> Option<&mut Block> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.block.as_mut())
    }

    pub fn contains(&self, handle: BlockHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Remove a block, invalidating every outstanding handle to it. Removing
    /// twice is a no-op.
    pub fn remove(&mut self, handle: BlockHandle) -> Option<Block> {
        let slot = self
            .slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)?;
        let block = slot.block.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_block_ids.push_back(handle.index());
        self.live -= 1;
        Some(block)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockHandle, &Block)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.block.as_ref().map(|block| {
                (
                    BlockHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    block,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn block(id: &str) -> Block {
        Block::new(id.to_string(), String::new(), Instant::now())
    }

    #[test]
    fn test_insert_and_get() {
        let mut arena = BlockArena::new();
        let a = arena.insert(block("a"));
        let b = arena.insert(block("b"));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a).unwrap().source_id, "a");
        assert_eq!(arena.get(b).unwrap().source_id, "b");
    }

    #[test]
    fn test_stale_handle_after_remove() {
        let mut arena = BlockArena::new();
        let a = arena.insert(block("a"));
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
        assert!(arena.get(a).is_none());

        // slot reuse bumps generation, old handle stays dead
        let c = arena.insert(block("c"));
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(c).unwrap().source_id, "c");
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_iter_skips_free_slots() {
        let mut arena = BlockArena::new();
        let a = arena.insert(block("a"));
        let _b = arena.insert(block("b"));
        arena.remove(a);
        let ids: Vec<_> = arena.iter().map(|(_, b)| b.source_id.clone()).collect();
        assert_eq!(ids, vec!["b".to_string()]);
    }
}
