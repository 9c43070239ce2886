//! Blocked rank-select addressing, shared by every filter variant.
//!
//! Each filter type (`rsqf`, `ext_filter`, `sel_filter`, `sel_filter_compressed`) owns
//! its own block array and remote array — nothing here is shared mutable state. What
//! *is* shared is the pure index arithmetic that locates runs and runends, since it is
//! bit-for-bit identical across all three upstream variants. `SlotBlock` is the seam:
//! a block type only needs to expose its `occupieds`/`runends`/`offset` to get
//! `rank_select`, `first_unused`, and the offset-maintenance passes for free.

use crate::bitops::{bitrank, bitselect, popcount};

/// Accessor trait for a single 64-slot block's rank-select metadata.
///
/// Implemented by each variant's own block struct; carries no data itself.
pub(crate) trait SlotBlock {
    fn occupieds(&self) -> u64;
    fn runends(&self) -> u64;
    fn offset(&self) -> usize;
    fn set_offset(&mut self, offset: usize);
    fn set_occupied(&mut self, slot_in_block: usize, value: bool);
    fn set_runend(&mut self, slot_in_block: usize, value: bool);

    fn is_occupied(&self, slot_in_block: usize) -> bool {
        self.occupieds() & (1u64 << slot_in_block) != 0
    }

    fn is_runend(&self, slot_in_block: usize) -> bool {
        self.runends() & (1u64 << slot_in_block) != 0
    }

    /// True when the block is in the "negative offset" sentinel state: no run owns or
    /// touches this block's first slot.
    fn is_negative_offset(&self) -> bool {
        !self.is_occupied(0) && self.offset() == 0 && !self.is_runend(0)
    }
}

/// Result of the blocked equivalent of `select(runends, rank(occupieds, x))`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RankSelect {
    /// No run owns `x`.
    Empty,
    /// The run owning `x` ends at this absolute slot index.
    Full(usize),
    /// The computation ran off the end of the block array.
    Overflow,
}

/// Walks forward from `block_index * 64`, consuming `rank` runend-bits, to find the
/// absolute slot index of the `rank`-th (0-indexed) runend at or after that block.
///
/// Returns `None` if it runs off the end of the block array.
pub(crate) fn select_runend<B: SlotBlock>(blocks: &[B], nslots: usize, block_index: usize, rank: usize) -> Option<usize> {
    let mut rank = rank;
    let mut loc = block_index * 64;
    loop {
        let b = &blocks[loc / 64];
        let step = bitselect(b.runends(), if rank >= 64 { 63 } else { rank }) as usize;
        loc += step;
        if step != 64 || loc >= nslots {
            break;
        }
        rank -= popcount(b.runends()) as usize;
    }
    if loc >= nslots {
        None
    } else {
        Some(loc)
    }
}

/// Computes the blocked equivalent of `select(runends, rank(occupieds, x))`.
pub(crate) fn rank_select<B: SlotBlock>(blocks: &[B], nslots: usize, x: usize) -> RankSelect {
    if x >= nslots {
        return RankSelect::Overflow;
    }
    let mut block_i = x / 64;
    let slot_i = x % 64;
    let b = &blocks[block_i];

    if b.is_negative_offset() {
        if slot_i == 0 {
            return RankSelect::Empty;
        }
    } else if slot_i == 0 {
        return RankSelect::Full(block_i * 64 + b.offset());
    } else {
        block_i += b.offset() / 64;
    }

    if block_i >= blocks.len() {
        return RankSelect::Overflow;
    }

    let b = &blocks[x / 64];
    let mut d = bitrank(b.occupieds(), slot_i) as i64 - if b.is_occupied(0) { 1 } else { 0 };

    let offset = blocks[x / 64].offset() % 64;
    let landing = &blocks[block_i];
    d += bitrank(landing.runends(), offset) as i64;

    if d == 0 {
        RankSelect::Empty
    } else {
        match select_runend(blocks, nslots, block_i, (d - 1) as usize) {
            None => RankSelect::Overflow,
            Some(loc) if loc < x => RankSelect::Empty,
            Some(loc) => RankSelect::Full(loc),
        }
    }
}

/// Finds the first unused slot at or after absolute location `x`.
///
/// Returns `None` if the filter has no unused slot before running off the end (the
/// caller must grow the filter by a block in that case).
pub(crate) fn first_unused<B: SlotBlock>(blocks: &[B], nslots: usize, x: usize) -> Option<usize> {
    let mut x = x;
    loop {
        match rank_select(blocks, nslots, x) {
            RankSelect::Empty => return Some(x),
            RankSelect::Overflow => return None,
            RankSelect::Full(loc) => {
                if x <= loc {
                    x = loc + 1;
                } else {
                    return Some(x);
                }
            }
        }
    }
}

/// Increments every block's offset whose (non-negative) target lies in `[a, b]`.
pub(crate) fn inc_offsets<B: SlotBlock>(blocks: &mut [B], a: usize, b: usize) {
    if a > b {
        return;
    }
    let start = std::cmp::min(b / 64 + 1, blocks.len() - 1);
    for i in (0..=start).rev() {
        let block_start = i * 64;
        if blocks[i].is_negative_offset() {
            continue;
        }
        let target = block_start + blocks[i].offset();
        if target < a {
            break;
        } else if target <= b {
            blocks[i].set_offset(blocks[i].offset() + 1);
        }
    }
}

/// Increments unowned offsets in blocks not after `quot` to account for a new run
/// being born at `loc`.
pub(crate) fn inc_offsets_for_new_run<B: SlotBlock>(blocks: &mut [B], quot: usize, loc: usize) {
    let start = std::cmp::min(loc / 64 + 1, blocks.len() - 1);
    for i in (0..=start).rev() {
        let b_start = i * 64;
        if blocks[i].is_negative_offset() {
            continue;
        }
        let target = b_start + blocks[i].offset();
        if target < loc {
            break;
        } else if target == loc && !blocks[i].is_occupied(0) && quot <= b_start {
            blocks[i].set_offset(blocks[i].offset() + 1);
        }
    }
}

/// Shifts runend bits in `[a, b]` forward by one slot into `[a+1, b+1]`, clearing the
/// runend bit at `a`. Callers are responsible for shifting parallel per-slot arrays
/// (remainders, remote entries, extensions/selectors) over the same range.
pub(crate) fn shift_runend_bits<B: SlotBlock>(blocks: &mut [B], a: usize, b: usize) {
    if a > b {
        return;
    }
    for i in (a..=b).rev() {
        let v = blocks[i / 64].is_runend(i % 64);
        blocks[(i + 1) / 64].set_runend((i + 1) % 64, v);
    }
    blocks[a / 64].set_runend(a % 64, false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone)]
    struct TestBlock {
        occupieds: u64,
        runends: u64,
        offset: usize,
    }

    impl SlotBlock for TestBlock {
        fn occupieds(&self) -> u64 {
            self.occupieds
        }
        fn runends(&self) -> u64 {
            self.runends
        }
        fn offset(&self) -> usize {
            self.offset
        }
        fn set_offset(&mut self, offset: usize) {
            self.offset = offset;
        }
        fn set_occupied(&mut self, slot_in_block: usize, value: bool) {
            if value {
                self.occupieds |= 1 << slot_in_block;
            } else {
                self.occupieds &= !(1 << slot_in_block);
            }
        }
        fn set_runend(&mut self, slot_in_block: usize, value: bool) {
            if value {
                self.runends |= 1 << slot_in_block;
            } else {
                self.runends &= !(1 << slot_in_block);
            }
        }
    }

    #[test]
    fn test_rank_select_empty_filter() {
        let blocks = vec![TestBlock::default()];
        assert_eq!(rank_select(&blocks, 64, 0), RankSelect::Empty);
        assert_eq!(rank_select(&blocks, 64, 10), RankSelect::Empty);
    }

    #[test]
    fn test_rank_select_singleton_run() {
        let mut blocks = vec![TestBlock::default()];
        blocks[0].set_occupied(3, true);
        blocks[0].set_runend(3, true);
        assert_eq!(rank_select(&blocks, 64, 3), RankSelect::Full(3));
        assert_eq!(rank_select(&blocks, 64, 4), RankSelect::Empty);
    }

    #[test]
    fn test_first_unused_all_full() {
        let mut blocks = vec![TestBlock::default()];
        blocks[0].occupieds = u64::max_value();
        blocks[0].runends = u64::max_value();
        assert_eq!(first_unused(&blocks, 64, 0), None);
    }

    #[test]
    fn test_first_unused_one_run() {
        let mut blocks = vec![TestBlock::default()];
        blocks[0].set_occupied(0, true);
        blocks[0].set_runend(2, true);
        assert_eq!(first_unused(&blocks, 64, 0), Some(3));
    }
}
