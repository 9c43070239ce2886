//! # aamf
//!
//! `aamf` implements adaptive approximate membership filters: rank-select quotient
//! filters (RSQFs) that repair their own false positives in place instead of only
//! ever growing more error-prone as they fill up.
//!
//! A plain Bloom or cuckoo filter's false-positive rate is fixed the moment it's
//! built; querying it with the same non-member twice returns the same wrong answer
//! twice. The filters in this crate adapt: the first false positive for a given
//! non-member rewrites enough per-slot state that querying it again is much more
//! likely to return the correct answer.
//!
//! Three variants share the blocked rank-select storage engine in [`rsqf`]:
//!
//! - [`ext_filter`] (AAMF-E) tacks a variable-length "extension" of extra fingerprint
//!   bits onto the slot that triggered a false positive, compressed per 64-slot block
//!   by an arithmetic coder ([`arith_coder`]) so the extensions stay cheap on average.
//! - [`sel_filter`] (AAMF-S) instead rewrites *which* bits of the hash back the
//!   slot's remainder, by advancing a per-slot selector byte.
//! - [`sel_filter_compressed`] is [`sel_filter`] with its selectors arithmetic-coded
//!   the same way [`ext_filter`] codes its extensions.
//!
//! ## References
//!
//!  - [A General-Purpose Counting Filter: Making Every Bit Count](https://www3.cs.stonybrook.edu/~ppandey/files/p775-pandey.pdf)
//!  > Pandey, Prashant, Michael A. Bender, Rob Johnson, and Rob Patro. 2017. “A General-Purpose Counting Filter: Making Every Bit Count.” In *Proceedings of the 2017 ACM International Conference on Management of Data*, 775–87. SIGMOD ’17. New York, NY, USA: ACM. doi:[10.1145/3035918.3035963](https://doi.org/10.1145/3035918.3035963).
//!  - [Telescoping Filter: A Practical Adaptive Filter](https://arxiv.org/abs/2107.02866)
//!  > Bender, Michael A., Martin Farach-Colton, John Kuszmaul, and William Kuszmaul. 2021. “Telescoping Filter: A Practical Adaptive Filter.” *CoRR* abs/2107.02866.

#![warn(missing_docs)]

pub mod arith_coder;
pub(crate) mod addressing;
pub(crate) mod bitops;
pub mod ext_filter;
pub mod hash;
pub mod rsqf;
pub mod sel_filter;
pub mod sel_filter_compressed;
