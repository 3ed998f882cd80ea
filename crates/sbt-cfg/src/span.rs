//! The `BBMap`: guest-address-keyed basic-block boundaries, with the
//! forward/backward split policy the builder needs while it walks a
//! function in address order.
//!
//! This module tracks spans only — it has no notion of an IR builder or
//! insertion point. The emitter consults it to know when to close the
//! current LLVM basic block and open the next.

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

/// `[start, end)` in guest address space. `end` is `None` while the
/// block is still being filled in by the builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub start: u32,
    pub end: Option<u32>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("split target 0x{target:08x} does not fall strictly inside block starting at 0x{block_start:08x}")]
    TargetNotInBlock { block_start: u32, target: u32 },
    #[error("no basic block contains address 0x{0:08x}")]
    NoContainingBlock(u32),
}

/// Guest-address-keyed basic block table for one function.
#[derive(Clone, Debug, Default)]
pub struct BBMap {
    blocks: BTreeMap<u32, BasicBlock>,
    predecessors: BTreeMap<u32, HashSet<u32>>,
}

impl BBMap {
    /// Start a fresh map with a single open block at `entry`.
    pub fn new(entry: u32) -> Self {
        let mut blocks = BTreeMap::new();
        blocks.insert(entry, BasicBlock { start: entry, end: None });
        BBMap { blocks, predecessors: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains_leader(&self, addr: u32) -> bool {
        self.blocks.contains_key(&addr)
    }

    pub fn get(&self, start: u32) -> Option<&BasicBlock> {
        self.blocks.get(&start)
    }

    /// Smallest known leader strictly greater than `pc`, i.e. the
    /// translator's `nextBB`.
    pub fn next_bb_after(&self, pc: u32) -> Option<u32> {
        self.blocks.range((pc + 1)..).next().map(|(&addr, _)| addr)
    }

    /// The block whose `[start, end)` (or open-ended `[start, ..)` while
    /// still being filled) contains `addr`, if any.
    pub fn block_containing(&self, addr: u32) -> Option<&BasicBlock> {
        self.blocks
            .range(..=addr)
            .next_back()
            .map(|(_, b)| b)
            .filter(|b| addr >= b.start && b.end.is_none_or(|e| addr < e))
    }

    /// Close the block at `start` by recording its end address (the
    /// address of the instruction that follows it).
    pub fn close(&mut self, start: u32, end: u32) {
        if let Some(b) = self.blocks.get_mut(&start) {
            b.end = Some(end);
        }
    }

    pub fn add_predecessor(&mut self, block_start: u32, from: u32) {
        self.predecessors.entry(block_start).or_default().insert(from);
    }

    pub fn predecessors(&self, block_start: u32) -> impl Iterator<Item = u32> + '_ {
        self.predecessors.get(&block_start).into_iter().flatten().copied()
    }

    /// Forward-jump policy (spec.md §4.6): `target > pc` creates a fresh
    /// leader positioned before the next-greater known block.
    pub fn insert_forward_leader(&mut self, target: u32) {
        self.blocks.entry(target).or_insert(BasicBlock { start: target, end: None });
    }

    /// Backward-jump split policy: if `target` falls inside an existing
    /// closed-or-open block, split it into `[old_start, target)` and
    /// `[target, old_end)`, re-pointing predecessors that targeted the
    /// original start but whose edge address is `>= target` onto the new
    /// block (callers patch finer-grained predecessor bookkeeping
    /// themselves; this only performs the address-space split).
    pub fn split(&mut self, target: u32) -> Result<(u32, u32), SplitError> {
        let (&orig_start, orig) = self
            .blocks
            .range(..=target)
            .next_back()
            .ok_or(SplitError::NoContainingBlock(target))?;

        if target == orig_start {
            // Already a leader; nothing to split.
            return Ok((orig_start, orig_start));
        }

        let in_range = match orig.end {
            Some(end) => target < end,
            None => true, // block still open; assume target is in-flight
        };
        if !in_range {
            return Err(SplitError::TargetNotInBlock { block_start: orig_start, target });
        }

        let orig_end = orig.end;
        self.blocks.insert(orig_start, BasicBlock { start: orig_start, end: Some(target) });
        self.blocks.insert(target, BasicBlock { start: target, end: orig_end });

        Ok((orig_start, target))
    }

    pub fn leaders(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_bb_after_finds_smallest_greater_leader() {
        let mut map = BBMap::new(0x1000);
        map.insert_forward_leader(0x1010);
        map.insert_forward_leader(0x1020);
        assert_eq!(map.next_bb_after(0x1004), Some(0x1010));
        assert_eq!(map.next_bb_after(0x1010), Some(0x1020));
        assert_eq!(map.next_bb_after(0x1020), None);
    }

    #[test]
    fn split_divides_a_closed_block() {
        let mut map = BBMap::new(0x1000);
        map.close(0x1000, 0x1020);
        let (left, right) = map.split(0x1010).unwrap();
        assert_eq!(left, 0x1000);
        assert_eq!(right, 0x1010);
        assert_eq!(map.get(0x1000).unwrap().end, Some(0x1010));
        assert_eq!(map.get(0x1010).unwrap().end, Some(0x1020));
    }

    #[test]
    fn split_outside_any_block_is_an_error() {
        let mut map = BBMap::new(0x1000);
        map.close(0x1000, 0x1010);
        assert_eq!(map.split(0x2000), Err(SplitError::NoContainingBlock(0x2000)));
    }

    #[test]
    fn split_at_existing_leader_is_a_no_op() {
        let mut map = BBMap::new(0x1000);
        map.insert_forward_leader(0x1010);
        map.close(0x1000, 0x1010);
        let (left, right) = map.split(0x1010).unwrap();
        assert_eq!(left, 0x1010);
        assert_eq!(right, 0x1010);
    }
}
