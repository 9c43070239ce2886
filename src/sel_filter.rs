//! AAMF-S: the rank-select quotient filter extended with a per-slot selector byte
//! choosing which `r`-bit slice of the full hash serves as that slot's remainder.
//!
//! On a false positive, the filter adapts by incrementing the stored slot's selector
//! by one mod `MAX_SEL` and rewriting its remainder from the stored hash, unconditionally
//! — convergence on a disambiguating selector happens over a sequence of such single
//! steps, not in one jump. The remote array keeps each slot's full hash alongside its
//! element so a new remainder can be recomputed without rehashing.

use crate::addressing::{
    first_unused, inc_offsets, inc_offsets_for_new_run, rank_select, shift_runend_bits,
    RankSelect, SlotBlock,
};
use crate::hash::{fingerprint64, SipHasherBuilder};
use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

const REM_SIZE: u32 = 8;
/// Selectors cycle through this many values before repeating.
const MAX_SEL: u16 = 256;

#[derive(Clone, Copy, Default)]
struct RemoteElt {
    elt: u64,
    hash: u64,
}

#[derive(Clone)]
struct Block {
    remainders: [u8; 64],
    selectors: [u8; 64],
    occupieds: u64,
    runends: u64,
    offset: usize,
}

impl Default for Block {
    fn default() -> Self {
        Block {
            remainders: [0; 64],
            selectors: [0; 64],
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

/// AAMF-S: a quotient filter whose slots carry a selector byte choosing which hash
/// slice backs the stored remainder, adapting the selector on false positives.
///
/// # Examples
///
/// ```
/// use aamf::sel_filter::SelectorFilter;
///
/// let mut filter = SelectorFilter::<u64>::new(128);
/// filter.insert(&0x123u64);
/// assert!(filter.contains(&0x123u64));
/// ```
#[derive(Clone)]
pub struct SelectorFilter<T, B = SipHasherBuilder> {
    q: u32,
    r: u32,
    nslots: usize,
    blocks: Vec<Block>,
    remote: Vec<RemoteElt>,
    hash_builder: B,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T> SelectorFilter<T> {
    /// Constructs a new `SelectorFilter` with room for at least `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::with_hasher(capacity, SipHasherBuilder::from_entropy())
    }
}

impl<T, B> SelectorFilter<T, B>
where
    B: BuildHasher,
{
    /// Constructs a new `SelectorFilter` with a given hasher, for reproducible seeding.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_hasher(capacity: usize, hash_builder: B) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        let nslots = nearest_pow_of_2_slots(capacity);
        let nblocks = nslots / 64;
        SelectorFilter {
            q: (nslots as f64).log2() as u32,
            r: REM_SIZE,
            nslots,
            blocks: vec![Block::default(); nblocks],
            remote: vec![RemoteElt::default(); nslots],
            hash_builder,
            len: 0,
            _marker: PhantomData,
        }
    }

    fn calc_quot(&self, hash: u64) -> usize {
        (hash & ((1u64 << self.q) - 1)) as usize
    }

    /// Computes the remainder that selector `k` carves out of `hash`: the `r`-bit
    /// slice starting `k` bits past the quotient, wrapping (modulo the number of
    /// available slices) once `k` runs past the top of the hash.
    fn calc_rem(&self, hash: u64, k: u8) -> u8 {
        let n_rems = ((64 - self.q) / self.r).max(1);
        let k = (k as u32) % n_rems;
        let shift = self.q + k * self.r;
        ((hash >> shift) & ((1u64 << self.r) - 1)) as u8
    }

    fn add_block(&mut self) {
        self.blocks.push(Block::default());
        self.remote
            .extend(std::iter::repeat(RemoteElt::default()).take(64));
        self.nslots += 64;
    }

    fn shift_rems_runends_and_sels(&mut self, a: usize, b: usize) {
        if a > b {
            return;
        }
        for i in (a..=b).rev() {
            let r = self.blocks[i / 64].remainders[i % 64];
            let s = self.blocks[i / 64].selectors[i % 64];
            self.blocks[(i + 1) / 64].remainders[(i + 1) % 64] = r;
            self.blocks[(i + 1) / 64].selectors[(i + 1) % 64] = s;
        }
        shift_runend_bits(&mut self.blocks, a, b);
    }

    fn shift_remote_elts(&mut self, a: usize, b: usize) {
        if a > b {
            return;
        }
        for i in (a..=b).rev() {
            self.remote[i + 1] = self.remote[i];
        }
        self.remote[a] = RemoteElt::default();
    }

    /// Advances the selector at `loc` one step mod `MAX_SEL` and rewrites its
    /// remainder from the stored hash. Unconditional: it does not check whether the
    /// new remainder actually disambiguates `in_hash` from `query_hash`, since the
    /// filter relies on repeated single-step adaptation to converge.
    fn adapt_loc(&mut self, loc: usize, in_hash: u64, _query_hash: u64) {
        let block_i = loc / 64;
        let slot_i = loc % 64;
        let new_sel = ((self.blocks[block_i].selectors[slot_i] as u16 + 1) % MAX_SEL) as u8;
        self.blocks[block_i].selectors[slot_i] = new_sel;
        self.blocks[block_i].remainders[slot_i] = self.calc_rem(in_hash, new_sel);
    }

    fn adapt(&mut self, query_hash: u64, elt_matches: &dyn Fn(u64) -> bool, loc: usize, quot: usize, rem: u8) {
        let mut i = loc;
        loop {
            if elt_matches(self.remote[i].elt) {
                return;
            }
            if i == quot {
                break;
            }
            i -= 1;
            if self.blocks[i / 64].is_runend(i % 64) {
                break;
            }
        }

        let mut i = loc;
        loop {
            if self.blocks[i / 64].remainders[i % 64] == rem {
                let sel = self.blocks[i / 64].selectors[i % 64];
                if self.calc_rem(query_hash, sel) == rem {
                    let in_hash = self.remote[i].hash;
                    self.adapt_loc(i, in_hash, query_hash);
                }
            }
            if i == quot {
                break;
            }
            i -= 1;
            if self.blocks[i / 64].is_runend(i % 64) {
                break;
            }
        }
    }

    fn raw_insert(&mut self, elt: u64, hash: u64) {
        let quot = self.calc_quot(hash);
        let rem = self.calc_rem(hash, 0);
        self.len += 1;

        match rank_select(&self.blocks, self.nslots, quot) {
            RankSelect::Empty => {
                self.blocks[quot / 64].set_occupied(quot % 64, true);
                self.blocks[quot / 64].set_runend(quot % 64, true);
                self.blocks[quot / 64].remainders[quot % 64] = rem;
                self.blocks[quot / 64].selectors[quot % 64] = 0;
                self.remote[quot] = RemoteElt { elt, hash };
            }
            RankSelect::Overflow => {
                panic!(
                    "AAMF-S structural invariant violated: rank_select overflow for quotient {} (nslots={})",
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
                self.shift_rems_runends_and_sels(r + 1, u - 1);
                self.shift_remote_elts(r + 1, u - 1);

                if self.blocks[quot / 64].is_occupied(quot % 64) {
                    inc_offsets(&mut self.blocks, r, r);
                    self.blocks[r / 64].set_runend(r % 64, false);
                } else {
                    inc_offsets_for_new_run(&mut self.blocks, quot, r);
                    self.blocks[quot / 64].set_occupied(quot % 64, true);
                }
                self.blocks[(r + 1) / 64].set_runend((r + 1) % 64, true);
                self.blocks[(r + 1) / 64].remainders[(r + 1) % 64] = rem;
                self.blocks[(r + 1) / 64].selectors[(r + 1) % 64] = 0;
                self.remote[r + 1] = RemoteElt { elt, hash };
            }
        }
    }

    fn raw_lookup(&mut self, elt: u64, hash: u64, elt_matches: impl Fn(u64) -> bool) -> bool {
        let quot = self.calc_quot(hash);

        if !self.blocks[quot / 64].is_occupied(quot % 64) {
            return false;
        }
        let mut loc = match rank_select(&self.blocks, self.nslots, quot) {
            RankSelect::Empty | RankSelect::Overflow => return false,
            RankSelect::Full(loc) => loc,
        };

        loop {
            let sel = self.blocks[loc / 64].selectors[loc % 64];
            let rem = self.calc_rem(hash, sel);
            if self.blocks[loc / 64].remainders[loc % 64] == rem {
                if self.remote[loc].elt != elt {
                    self.adapt(hash, &elt_matches, loc, quot, rem);
                }
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
        self.raw_insert(hash, hash);
    }

    /// Returns `true` if the filter possibly contains `item`, adapting internally if
    /// a stored slot's remainder matches but the stored element does not.
    pub fn contains<U>(&mut self, item: &U) -> bool
    where
        T: Borrow<U>,
        U: Hash + ?Sized,
    {
        let hash = fingerprint64(item, &self.hash_builder);
        self.raw_lookup(hash, hash, |stored| stored == hash)
    }

    /// Clears the filter, zeroing all slot state but retaining capacity.
    pub fn clear(&mut self) {
        self.len = 0;
        for block in self.blocks.iter_mut() {
            *block = Block::default();
        }
        for r in self.remote.iter_mut() {
            *r = RemoteElt::default();
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
    use std::collections::HashSet;

    const SEED: u64 = 32776517;

    fn new_filter(capacity: usize) -> SelectorFilter<u64> {
        SelectorFilter::with_hasher(capacity, HASH_BUILDER_1)
    }

    #[test]
    fn test_empty_filter() {
        let mut filter = new_filter(128);
        assert!(!filter.contains(&0xDEADBEEFu64));
        assert_eq!(filter.load_factor(), 0.0);
    }

    #[test]
    fn test_insert_single() {
        let mut filter = new_filter(128);
        filter.insert(&0x123u64);
        assert!(filter.contains(&0x123u64));
    }

    #[test]
    fn test_no_false_negatives_with_rollover() {
        let mut filter = new_filter(64);
        let elts: Vec<u64> = (0..128).collect();
        for e in &elts {
            filter.insert(e);
        }
        for e in &elts {
            assert!(filter.contains(e), "false negative for {}", e);
        }
    }

    #[test]
    fn test_mixed_insert_query_workload() {
        let mut filter = SelectorFilter::with_hasher(1024, HASH_BUILDER_2);
        let mut rng = XorShiftRng::seed_from_u64(SEED);
        let members: HashSet<u64> = (&mut rng).sample_iter(Standard).take(900).collect();
        for m in &members {
            filter.insert(m);
        }
        for m in &members {
            assert!(filter.contains(m));
        }

        let non_members: Vec<u64> = (&mut rng)
            .sample_iter(Standard)
            .filter(|x| !members.contains(x))
            .take(2000)
            .collect();
        let first_pass_fps: usize = non_members.iter().filter(|x| filter.contains(x)).count();
        let second_pass_fps: usize = non_members.iter().filter(|x| filter.contains(x)).count();
        assert!(second_pass_fps <= first_pass_fps);

        for m in &members {
            assert!(filter.contains(m));
        }
    }

    #[test]
    fn test_clear_then_insert() {
        let mut filter = new_filter(128);
        filter.insert(&1u64);
        filter.clear();
        assert!(!filter.contains(&1u64));
        filter.insert(&42u64);
        assert!(filter.contains(&42u64));
    }
}
