//! Rank-select quotient filter (RSQF): the non-adaptive blocked storage engine that
//! both adaptive variants build on.
//!
//! Slots are grouped into fixed 64-slot blocks. Each block tracks which quotients it
//! owns (`occupieds`), which slots are run-tails (`runends`), and an `offset` letting
//! `rank_select` jump straight to the block holding a given quotient's run without
//! scanning every intervening block.

use crate::addressing::{
    first_unused, inc_offsets, inc_offsets_for_new_run, rank_select, shift_runend_bits,
    RankSelect, SlotBlock,
};
use crate::hash::{fingerprint64, SipHasherBuilder};
use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

const REM_SIZE: u32 = 8;

#[derive(Clone)]
struct Block {
    remainders: [u8; 64],
    occupieds: u64,
    runends: u64,
    offset: usize,
}

impl Default for Block {
    fn default() -> Self {
        Block {
            remainders: [0; 64],
            occupieds: 0,
            runends: 0,
            offset: 0,
        }
    }
}

impl SlotBlock for Block {
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

/// Rounds `n` up to the nearest power of two, with a floor of 64.
fn nearest_pow_of_2_slots(n: usize) -> usize {
    let mut v = std::cmp::max(n, 1);
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v |= v >> 32;
    v += 1;
    std::cmp::max(v, 64)
}

/// A blocked rank-select quotient filter: the non-adaptive storage engine underlying
/// [`crate::ext_filter::ExtensionFilter`] and [`crate::sel_filter::SelectorFilter`].
///
/// # Examples
///
/// ```
/// use aamf::rsqf::RsqfFilter;
///
/// let mut filter = RsqfFilter::<u64>::new(128);
/// filter.insert(&0x123u64);
/// assert!(filter.contains(&0x123u64));
/// assert!(!filter.contains(&0x999u64));
/// ```
#[derive(Clone)]
pub struct RsqfFilter<T, B = SipHasherBuilder> {
    q: u32,
    nslots: usize,
    blocks: Vec<Block>,
    hash_builder: B,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T> RsqfFilter<T> {
    /// Constructs a new `RsqfFilter` with room for at least `capacity` elements before
    /// the load factor implied by `REM_SIZE` starts to degrade accuracy.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::with_hasher(capacity, SipHasherBuilder::from_entropy())
    }
}

impl<T, B> RsqfFilter<T, B>
where
    B: BuildHasher,
{
    /// Constructs a new `RsqfFilter` with a given hasher, for reproducible seeding.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_hasher(capacity: usize, hash_builder: B) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        let nslots = nearest_pow_of_2_slots(capacity);
        let nblocks = nslots / 64;
        RsqfFilter {
            q: (nslots as f64).log2() as u32,
            nslots,
            blocks: vec![Block::default(); nblocks],
            hash_builder,
            len: 0,
            _marker: PhantomData,
        }
    }

    fn calc_quot(&self, hash: u64) -> usize {
        (hash & ((1u64 << self.q) - 1)) as usize
    }

    fn calc_rem(&self, hash: u64) -> u8 {
        ((hash >> self.q) & ((1u64 << REM_SIZE) - 1)) as u8
    }

    fn add_block(&mut self) {
        self.blocks.push(Block::default());
        self.nslots += 64;
    }

    fn shift_rems_and_runends(&mut self, a: usize, b: usize) {
        if a > b {
            return;
        }
        for i in (a..=b).rev() {
            let v = self.blocks[i / 64].remainders[i % 64];
            self.blocks[(i + 1) / 64].remainders[(i + 1) % 64] = v;
        }
        shift_runend_bits(&mut self.blocks, a, b);
    }

    fn raw_insert(&mut self, quot: usize, rem: u8) {
        self.len += 1;
        match rank_select(&self.blocks, self.nslots, quot) {
            RankSelect::Empty => {
                self.blocks[quot / 64].set_occupied(quot % 64, true);
                self.blocks[quot / 64].set_runend(quot % 64, true);
                self.blocks[quot / 64].remainders[quot % 64] = rem;
            }
            RankSelect::Overflow => {
                panic!(
                    "RSQF structural invariant violated: rank_select overflow for quotient {} (nslots={})",
                    quot, self.nslots
                );
            }
            RankSelect::Full(r) => {
                let u = match first_unused(&self.blocks, self.nslots, r + 1) {
                    Some(u) => u,
                    None => {
                        self.add_block();
                        self.nslots - 64
                    }
                };
                inc_offsets(&mut self.blocks, r + 1, u - 1);
                self.shift_rems_and_runends(r + 1, u - 1);

                if self.blocks[quot / 64].is_occupied(quot % 64) {
                    inc_offsets(&mut self.blocks, r, r);
                    self.blocks[r / 64].set_runend(r % 64, false);
                } else {
                    inc_offsets_for_new_run(&mut self.blocks, quot, r);
                    self.blocks[quot / 64].set_occupied(quot % 64, true);
                }
                self.blocks[(r + 1) / 64].set_runend((r + 1) % 64, true);
                self.blocks[(r + 1) / 64].remainders[(r + 1) % 64] = rem;
            }
        }
    }

    fn raw_lookup(&self, quot: usize, rem: u8) -> bool {
        if !self.blocks[quot / 64].is_occupied(quot % 64) {
            return false;
        }
        let mut loc = match rank_select(&self.blocks, self.nslots, quot) {
            RankSelect::Empty | RankSelect::Overflow => return false,
            RankSelect::Full(loc) => loc,
        };
        loop {
            if self.blocks[loc / 64].remainders[loc % 64] == rem {
                return true;
            }
            if loc == quot {
                break;
            }
            loc -= 1;
            if self.blocks[loc / 64].is_runend(loc % 64) {
                break;
            }
        }
        false
    }

    /// Inserts `item` into the filter.
    pub fn insert<U>(&mut self, item: &U)
    where
        T: Borrow<U>,
        U: Hash + ?Sized,
    {
        let hash = fingerprint64(item, &self.hash_builder);
        let quot = self.calc_quot(hash);
        let rem = self.calc_rem(hash);
        self.raw_insert(quot, rem);
    }

    /// Returns `true` if the filter possibly contains `item`.
    pub fn contains<U>(&self, item: &U) -> bool
    where
        T: Borrow<U>,
        U: Hash + ?Sized,
    {
        let hash = fingerprint64(item, &self.hash_builder);
        let quot = self.calc_quot(hash);
        let rem = self.calc_rem(hash);
        self.raw_lookup(quot, rem)
    }

    /// Clears the filter, zeroing all slot state but retaining capacity.
    pub fn clear(&mut self) {
        self.len = 0;
        for block in self.blocks.iter_mut() {
            *block = Block::default();
        }
    }

    /// Returns the number of elements inserted into the filter.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no elements have been inserted.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of slots currently allocated.
    pub fn capacity(&self) -> usize {
        self.nslots
    }

    /// Returns `nelts / nslots`.
    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.nslots as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::tests::{HASH_BUILDER_1, HASH_BUILDER_2};
    use rand::distributions::Standard;
    use rand::{Rng, SeedableRng};
    use rand_xorshift::XorShiftRng;

    const SEED: u64 = 32776517;

    fn new_filter(capacity: usize) -> RsqfFilter<u64> {
        RsqfFilter::with_hasher(capacity, HASH_BUILDER_1)
    }

    #[test]
    fn test_empty_filter() {
        let filter = new_filter(128);
        assert!(!filter.contains(&0xDEADBEEFu64));
        assert_eq!(filter.load_factor(), 0.0);
    }

    #[test]
    fn test_insert_single() {
        let mut filter = new_filter(128);
        filter.insert(&0x123u64);
        assert!(filter.contains(&0x123u64));
        assert!(!filter.contains(&0x999u64));
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_full_block_rollover_no_false_negatives() {
        let mut filter = new_filter(64);
        let elts: Vec<u64> = (0..128).collect();
        for e in &elts {
            filter.insert(e);
        }
        for e in &elts {
            assert!(filter.contains(e), "false negative for {}", e);
        }
        assert!(filter.capacity() > 64);
    }

    #[test]
    fn test_clear_then_insert() {
        let mut filter = new_filter(128);
        filter.insert(&1u64);
        filter.clear();
        assert!(!filter.contains(&1u64));
        assert_eq!(filter.len(), 0);
        filter.insert(&42u64);
        assert!(filter.contains(&42u64));
    }

    #[test]
    fn test_stress_no_false_negatives() {
        let mut filter = RsqfFilter::with_hasher(1024, HASH_BUILDER_2);
        let mut rng = XorShiftRng::seed_from_u64(SEED);
        let elts: Vec<u64> = (&mut rng).sample_iter(Standard).take(800).collect();
        for e in &elts {
            filter.insert(e);
        }
        for e in &elts {
            assert!(filter.contains(e));
        }
    }

    #[test]
    fn test_nearest_pow_of_2_slots() {
        assert_eq!(nearest_pow_of_2_slots(1), 64);
        assert_eq!(nearest_pow_of_2_slots(64), 64);
        assert_eq!(nearest_pow_of_2_slots(65), 128);
        assert_eq!(nearest_pow_of_2_slots(200), 256);
    }
}
