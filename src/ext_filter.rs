//! AAMF-E: the rank-select quotient filter extended with per-slot fingerprint
//! extensions, compressed per block by [`crate::arith_coder`].
//!
//! On a false positive (a query whose quotient/remainder match a stored slot but
//! whose element differs from what's actually there), the filter adapts by writing
//! the shortest extension of the *stored* element's hash that disagrees with the
//! query's hash — so the same false positive does not repeat.

use crate::addressing::{
    first_unused, inc_offsets, inc_offsets_for_new_run, rank_select, shift_runend_bits,
    RankSelect, SlotBlock,
};
use crate::arith_coder::{decode_ext, encode_ext, get_code, set_code, Ext, CODE_BYTES};
use crate::bitops::tzcnt;
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
    ext_code: [u8; CODE_BYTES],
}

impl Default for Block {
    fn default() -> Self {
        Block {
            remainders: [0; 64],
            occupieds: 0,
            runends: 0,
            offset: 0,
            ext_code: [0; CODE_BYTES],
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

/// AAMF-E: a quotient filter whose slots carry arithmetic-coded extension bits,
/// adapting on false positives instead of ever returning the same one twice.
///
/// # Examples
///
/// ```
/// use aamf::ext_filter::ExtensionFilter;
///
/// let mut filter = ExtensionFilter::<u64>::new(128);
/// filter.insert(&0x123u64);
/// assert!(filter.contains(&0x123u64));
/// ```
#[derive(Clone)]
pub struct ExtensionFilter<T, B = SipHasherBuilder> {
    q: u32,
    r: u32,
    nslots: usize,
    blocks: Vec<Block>,
    remote: Vec<u64>,
    hash_builder: B,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T> ExtensionFilter<T> {
    /// Constructs a new `ExtensionFilter` with room for at least `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::with_hasher(capacity, SipHasherBuilder::from_entropy())
    }
}

impl<T, B> ExtensionFilter<T, B>
where
    B: BuildHasher,
{
    /// Constructs a new `ExtensionFilter` with a given hasher, for reproducible
    /// seeding.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_hasher(capacity: usize, hash_builder: B) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        let nslots = nearest_pow_of_2_slots(capacity);
        let nblocks = nslots / 64;
        ExtensionFilter {
            q: (nslots as f64).log2() as u32,
            r: REM_SIZE,
            nslots,
            blocks: vec![Block::default(); nblocks],
            remote: vec![0u64; nslots],
            hash_builder,
            len: 0,
            _marker: PhantomData,
        }
    }

    fn calc_quot(&self, hash: u64) -> usize {
        (hash & ((1u64 << self.q) - 1)) as usize
    }

    fn calc_rem(&self, hash: u64) -> u8 {
        ((hash >> self.q) & ((1u64 << self.r) - 1)) as u8
    }

    fn calc_ext_bits(&self, hash: u64, len: u8) -> u64 {
        let fp_len = self.q + self.r;
        (hash >> fp_len) & ((1u64 << len) - 1)
    }

    fn get_ext_code(&self, block_i: usize) -> u64 {
        get_code(&self.blocks[block_i].ext_code)
    }

    fn set_ext_code(&mut self, block_i: usize, code: u64) {
        set_code(&mut self.blocks[block_i].ext_code, code);
    }

    /// Computes the shortest extension of `member_hash` that disagrees with
    /// `non_member_hash` beyond the fingerprint prefix. Returns `None` if the two
    /// hashes are identical there (no extension can discriminate them).
    fn shortest_diff_ext(&self, member_hash: u64, non_member_hash: u64) -> Option<Ext> {
        let a = member_hash >> (self.q + self.r);
        let b = non_member_hash >> (self.q + self.r);
        if a == b {
            return None;
        }
        let len = (tzcnt(a ^ b) + 1) as u8;
        let bits = a & ((1u64 << len) - 1);
        Some(Ext { bits, len })
    }

    fn ext_matches_hash(&self, ext: &Ext, hash: u64) -> bool {
        if ext.len == 0 {
            true
        } else {
            self.calc_ext_bits(hash, ext.len) == ext.bits
        }
    }

    fn add_block(&mut self) {
        self.blocks.push(Block::default());
        self.remote.extend(std::iter::repeat(0u64).take(64));
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

    fn shift_remote_elts(&mut self, a: usize, b: usize) {
        if a > b {
            return;
        }
        for i in (a..=b).rev() {
            self.remote[i + 1] = self.remote[i];
        }
        self.remote[a] = 0;
    }

    /// Re-encodes `block_i`'s extension code after overwriting `exts[b]` with
    /// `prev_tail`, shifting `[0, b)` up by one within the block.
    fn shift_block_exts(&mut self, block_i: usize, mut exts: [Ext; 64], prev_tail: Ext, b: usize) {
        for i in (1..=b).rev() {
            exts[i] = exts[i - 1];
        }
        exts[0] = prev_tail;
        let code = encode_ext(&exts).unwrap_or(0);
        self.set_ext_code(block_i, code);
    }

    fn shift_exts(&mut self, a: usize, b: usize) {
        if a > b {
            return;
        }
        if a / 64 == (b + 1) / 64 {
            let block_i = a / 64;
            let mut exts = decode_ext(self.get_ext_code(block_i));
            for i in ((a % 64 + 1)..=((b + 1) % 64)).rev() {
                exts[i] = exts[i - 1];
            }
            exts[a % 64] = Ext::EMPTY;
            let code = encode_ext(&exts).unwrap_or(0);
            self.set_ext_code(block_i, code);
        } else {
            let mut block_i = (b + 1) / 64;
            let mut exts = decode_ext(self.get_ext_code(block_i));
            let mut prev_exts = decode_ext(self.get_ext_code(block_i - 1));
            self.shift_block_exts(block_i, exts, prev_exts[63], (b + 1) % 64);
            exts = decode_ext(self.get_ext_code(block_i));
            std::mem::swap(&mut exts, &mut prev_exts);

            block_i -= 1;
            while block_i > a / 64 {
                prev_exts = decode_ext(self.get_ext_code(block_i - 1));
                self.shift_block_exts(block_i, exts, prev_exts[63], 63);
                exts = decode_ext(self.get_ext_code(block_i));
                std::mem::swap(&mut exts, &mut prev_exts);
                block_i -= 1;
            }

            for i in ((a % 64 + 1)..=63).rev() {
                exts[i] = exts[i - 1];
            }
            exts[a % 64] = Ext::EMPTY;
            let code = encode_ext(&exts).unwrap_or(0);
            self.set_ext_code(a / 64, code);
        }
    }

    /// Writes the shortest extension distinguishing `in_hash` (the stored member's
    /// hash) from `out_hash` (the querying non-member's hash) into slot `loc`.
    fn adapt_loc(&mut self, loc: usize, in_hash: u64, out_hash: u64) {
        let new_ext = match self.shortest_diff_ext(in_hash, out_hash) {
            Some(ext) => ext,
            None => {
                eprintln!("aamf: adapt_loc saw identical member/query hashes, no-op");
                return;
            }
        };
        let block_i = loc / 64;
        let mut exts = decode_ext(self.get_ext_code(block_i));
        exts[loc % 64] = new_ext;
        let code = match encode_ext(&exts) {
            Some(code) => code,
            None => {
                let mut exts = [Ext::EMPTY; 64];
                exts[loc % 64] = new_ext;
                match encode_ext(&exts) {
                    Some(code) => code,
                    None => {
                        // Even a single extension overflowed the block: give up and
                        // leave this slot empty rather than corrupt the structure.
                        0
                    }
                }
            }
        };
        self.set_ext_code(block_i, code);
    }

    /// Adapts on a query that collided with the stored fingerprint at `loc`, fixing
    /// any other collisions remaining in the same run.
    fn adapt(&mut self, query_hash: u64, elt_matches: &dyn Fn(u64) -> bool, loc: usize, quot: usize, rem: u8) {
        // If the query element is actually stored at an earlier slot in this run,
        // this was a true positive, not a false one: no adaptation needed.
        let mut i = loc;
        loop {
            if elt_matches(self.remote[i]) {
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
        let mut decoded = decode_ext(self.get_ext_code(loc / 64));
        let mut decoded_block = loc / 64;
        loop {
            if i != loc && i % 64 == 63 {
                decoded_block = i / 64;
                decoded = decode_ext(self.get_ext_code(decoded_block));
            }
            if decoded_block != i / 64 {
                decoded_block = i / 64;
                decoded = decode_ext(self.get_ext_code(decoded_block));
            }
            let ext = decoded[i % 64];
            if self.blocks[i / 64].remainders[i % 64] == rem && self.ext_matches_hash(&ext, query_hash) {
                let in_hash = fingerprint64(&self.remote[i], &self.hash_builder);
                self.adapt_loc(i, in_hash, query_hash);
                decoded = decode_ext(self.get_ext_code(i / 64));
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
        let rem = self.calc_rem(hash);
        self.len += 1;

        match rank_select(&self.blocks, self.nslots, quot) {
            RankSelect::Empty => {
                self.blocks[quot / 64].set_occupied(quot % 64, true);
                self.blocks[quot / 64].set_runend(quot % 64, true);
                self.blocks[quot / 64].remainders[quot % 64] = rem;
                self.remote[quot] = elt;
            }
            RankSelect::Overflow => {
                panic!(
                    "AAMF-E structural invariant violated: rank_select overflow for quotient {} (nslots={})",
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
                self.shift_remote_elts(r + 1, u - 1);
                self.shift_exts(r + 1, u - 1);

                if self.blocks[quot / 64].is_occupied(quot % 64) {
                    inc_offsets(&mut self.blocks, r, r);
                    self.blocks[r / 64].set_runend(r % 64, false);
                } else {
                    inc_offsets_for_new_run(&mut self.blocks, quot, r);
                    self.blocks[quot / 64].set_occupied(quot % 64, true);
                }
                self.blocks[(r + 1) / 64].set_runend((r + 1) % 64, true);
                self.blocks[(r + 1) / 64].remainders[(r + 1) % 64] = rem;
                self.remote[r + 1] = elt;
            }
        }
    }

    fn raw_lookup(&mut self, elt: u64, hash: u64, elt_matches: impl Fn(u64) -> bool) -> bool {
        let quot = self.calc_quot(hash);
        let rem = self.calc_rem(hash);

        if !self.blocks[quot / 64].is_occupied(quot % 64) {
            return false;
        }
        let mut loc = match rank_select(&self.blocks, self.nslots, quot) {
            RankSelect::Empty | RankSelect::Overflow => return false,
            RankSelect::Full(loc) => loc,
        };

        let mut decoded = decode_ext(self.get_ext_code(loc / 64));
        let mut decoded_block = loc / 64;
        loop {
            if self.blocks[loc / 64].remainders[loc % 64] == rem {
                if decoded_block != loc / 64 {
                    decoded_block = loc / 64;
                    decoded = decode_ext(self.get_ext_code(decoded_block));
                }
                let ext = decoded[loc % 64];
                if self.ext_matches_hash(&ext, hash) {
                    if self.remote[loc] != elt {
                        self.adapt(hash, &elt_matches, loc, quot, rem);
                    }
                    return true;
                }
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
    /// a stored slot's fingerprint matches but the stored element does not.
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
            *r = 0;
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

    fn new_filter(capacity: usize) -> ExtensionFilter<u64> {
        ExtensionFilter::with_hasher(capacity, HASH_BUILDER_1)
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
    fn test_adaptation_eliminates_repeats() {
        let mut filter = ExtensionFilter::with_hasher(1024, HASH_BUILDER_2);
        let mut rng = XorShiftRng::seed_from_u64(SEED);
        let members: HashSet<u64> = (&mut rng).sample_iter(Standard).take(900).collect();
        for m in &members {
            filter.insert(m);
        }

        let non_members: Vec<u64> = (&mut rng)
            .sample_iter(Standard)
            .filter(|x| !members.contains(x))
            .take(2000)
            .collect();

        let first_pass_fps: usize = non_members.iter().filter(|x| filter.contains(x)).count();
        let second_pass_fps: usize = non_members.iter().filter(|x| filter.contains(x)).count();

        assert!(second_pass_fps <= first_pass_fps);
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
