//! Hashing support shared by every filter variant.
//!
//! The design calls for a 128-bit hash, but every slot-addressing computation in this
//! crate (quotient, remainder, extension, selector) only ever reads the low 64 bits of
//! it, so the adapter implemented here hashes to a single `u64` via the standard
//! [`BuildHasher`]/[`Hasher`] traits, the same way the rest of this crate's teacher
//! lineage does.

use rand::Rng;
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};
use siphasher::sip::SipHasher;
use std::hash::{BuildHasher, Hash, Hasher};

/// The default hash builder for all filter types.
#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SipHasherBuilder {
    k0: u64,
    k1: u64,
}

impl SipHasherBuilder {
    /// Constructs a new `SipHasherBuilder` that uses the thread-local RNG to seed itself.
    ///
    /// # Examples
    ///
    /// ```
    /// use aamf::hash::SipHasherBuilder;
    ///
    /// let hash_builder = SipHasherBuilder::from_entropy();
    /// ```
    pub fn from_entropy() -> Self {
        let mut rng = rand::thread_rng();
        Self::from_seed(rng.gen(), rng.gen())
    }

    /// Constructs a new `SipHasherBuilder` that is seeded with the given keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use aamf::hash::SipHasherBuilder;
    ///
    /// let hash_builder = SipHasherBuilder::from_seed(0, 0);
    /// ```
    pub fn from_seed(k0: u64, k1: u64) -> Self {
        SipHasherBuilder { k0, k1 }
    }
}

impl BuildHasher for SipHasherBuilder {
    type Hasher = SipHasher;
    fn build_hasher(&self) -> SipHasher {
        SipHasher::new_with_keys(self.k0, self.k1)
    }
}

/// Hashes `item` to a single `u64` fingerprint using `hash_builder`.
///
/// This is the one seam every filter variant funnels through: quotient, remainder,
/// extension bits, and selector-chosen remainder slices are all carved out of the
/// value returned here.
pub(crate) fn fingerprint64<U, B>(item: &U, hash_builder: &B) -> u64
where
    U: Hash + ?Sized,
    B: BuildHasher,
{
    let mut hasher = hash_builder.build_hasher();
    item.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
pub mod tests {
    use super::SipHasherBuilder;

    pub static HASH_BUILDER_1: SipHasherBuilder = SipHasherBuilder { k0: 0, k1: 0 };
    pub static HASH_BUILDER_2: SipHasherBuilder = SipHasherBuilder { k0: 1, k1: 1 };

    #[test]
    fn test_from_seed_deterministic() {
        let a = SipHasherBuilder::from_seed(5, 9);
        let b = SipHasherBuilder::from_seed(5, 9);
        assert_eq!(a, b);
    }
}
