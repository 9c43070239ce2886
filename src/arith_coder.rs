//! Arithmetic coder for packing a 64-slot sequence of variable-length extensions (or
//! small-integer selectors) into a bounded integer code.
//!
//! The shift schedules below are bit-exact transcriptions of the upstream encoder: the
//! comments in the original describe the intended probabilities, but the actual shift
//! amounts don't match those comments precisely. Any change to the shift amounts
//! changes which codes round-trip and which overflow, so they are preserved exactly
//! rather than "corrected" to match the commentary.

/// Payload width, in bits, of a block's extension code.
pub const EXT_CODE_LEN: u32 = 56;
/// Payload width, in bits, of a block's selector code.
pub const SEL_CODE_LEN: u32 = 56;
/// Number of bytes backing a 56-bit code.
pub const CODE_BYTES: usize = 7;
/// Largest selector symbol representable by the encoded selector scheme.
pub const MAX_SELECTOR: i32 = 6;

const HIGH: u64 = u64::max_value() >> (64 - SEL_CODE_LEN);

/// A variable-length tie-breaker extension: the low `len` bits of `bits` are
/// significant; `len == 0` means "no extension" and matches any hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ext {
    /// The extension's bit pattern. Only the low `len` bits are meaningful.
    pub bits: u64,
    /// Number of significant low-order bits of `bits`, in `0..=63`.
    pub len: u8,
}

impl Ext {
    /// The empty extension, matching any hash at this slot.
    pub const EMPTY: Ext = Ext { bits: 0, len: 0 };

    fn masked_bits(&self) -> u64 {
        if self.len == 0 {
            0
        } else {
            self.bits & ((1u64 << self.len) - 1)
        }
    }
}

/// Reads 7 bytes of a block's extension-code field, zero-extended to a `u64`.
pub fn get_code(code_bytes: &[u8; CODE_BYTES]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..CODE_BYTES].copy_from_slice(code_bytes);
    u64::from_le_bytes(buf)
}

/// Writes the low 7 bytes of `code` into a block's extension-code field.
pub fn set_code(code_bytes: &mut [u8; CODE_BYTES], code: u64) {
    let buf = code.to_le_bytes();
    code_bytes.copy_from_slice(&buf[..CODE_BYTES]);
}

/// Encodes 64 extensions into a code in `[0, 2^EXT_CODE_LEN)`.
///
/// Returns `None` if the distribution's interval collapses (i.e. `high - low < 2`)
/// before all 64 extensions are accounted for; callers must fall back to zeroing
/// extensions and retrying, per the adaptation protocol.
pub fn encode_ext(exts: &[Ext; 64]) -> Option<u64> {
    let mut low: u64 = 0;
    let mut high: u64 = HIGH;

    for ext in exts.iter() {
        let range = high - low;
        // Multiply range by ~0.90624 (Pr[ext is empty])
        let mut gap = (range >> 1) + (range >> 2) + (range >> 3) + (range >> 5);
        if ext.len == 0 {
            high = low + gap;
        } else {
            low += gap;
            // Set gap to range * ~0.04687
            gap = (range >> 5) + (range >> 6);
            // Account for probability of extension length: length k>0 has
            // probability 2^{-k}.
            for _ in 1..ext.len {
                low += gap;
                gap >>= 1;
            }
            // Account for probability of a particular extension of length k: all
            // equally likely, so divide gap by 2^k and take the bits-th piece.
            gap >>= ext.len;
            low += ext.masked_bits() * gap;
            high = low + gap;
        }
        if high - low < 2 {
            return None;
        }
    }
    Some(low)
}

/// Decodes a code produced by [`encode_ext`] back into 64 extensions.
///
/// Behavior on a `code` that did not originate from `encode_ext` is deterministic but
/// otherwise unspecified.
pub fn decode_ext(code: u64) -> [Ext; 64] {
    let mut exts = [Ext::EMPTY; 64];
    let mut low: u64 = 0;
    let mut high: u64 = HIGH;

    for ext in exts.iter_mut() {
        let range = high - low;
        let mut gap = (range >> 1) + (range >> 2) + (range >> 3) + (range >> 5);
        if low + gap > code {
            high = low + gap;
            *ext = Ext::EMPTY;
        } else {
            low += gap;
            gap = (range >> 5) + (range >> 6);

            let mut len: u8 = 1;
            while low + gap <= code {
                low += gap;
                gap >>= 1;
                len += 1;
            }
            gap >>= len;
            let bits = (code - low) / gap;
            low += bits * gap;
            high = low + gap;

            ext.bits = bits;
            ext.len = len;
        }
    }
    exts
}

/// Encodes 64 selectors (each reduced modulo [`MAX_SELECTOR`]) into a code in
/// `[0, 2^SEL_CODE_LEN)`. Returns `None` if the interval collapses before all 64
/// selectors are accounted for.
pub fn encode_sel(sels: &[u8; 64]) -> Option<u64> {
    let mut low: u64 = 0;
    let mut high: u64 = HIGH;

    for &raw in sels.iter() {
        let mut letter = raw as i32;
        if letter > MAX_SELECTOR {
            letter %= MAX_SELECTOR;
        }
        let range = high - low;

        // Mirrors the upstream fallthrough switch: each case adds its own gap on top
        // of every case below it.
        if letter >= 6 {
            low += (range >> 19) + (range >> 20) + (range >> 23);
        }
        if letter >= 5 {
            low += (range >> 14) + (range >> 16);
        }
        if letter >= 4 {
            low += (range >> 10) + (range >> 11);
        }
        if letter >= 3 {
            low += (range >> 6) + (range >> 8);
        }
        if letter >= 2 {
            low += (range >> 3) + (range >> 4) + (range >> 7) + (range >> 9);
        }
        if letter >= 1 {
            low += (range >> 1) + (range >> 2) + (range >> 5);
        }

        high = low
            + match letter {
                0 => (range >> 1) + (range >> 2) + (range >> 5),
                1 => (range >> 3) + (range >> 4) + (range >> 7) + (range >> 9),
                2 => (range >> 6) + (range >> 8),
                3 => (range >> 10) + (range >> 11),
                4 => (range >> 14) + (range >> 16),
                5 => (range >> 19) + (range >> 20) + (range >> 23),
                6 => (range >> 24) + (range >> 25) + (range >> 26),
                _ => unreachable!("selector reduced modulo MAX_SELECTOR"),
            };

        if high - low < 2 {
            return None;
        }
    }
    Some(low)
}

/// Decodes a code produced by [`encode_sel`] back into 64 selector symbols.
///
/// Symbol `7` is the sentinel the decoder reports once `code` falls outside all seven
/// coded buckets at a step; it never arises from `encode_sel`, only from decoding a
/// code that wasn't produced by it.
pub fn decode_sel(code: u64) -> [u8; 64] {
    let mut out = [0u8; 64];
    let mut low: u64 = 0;
    let mut high: u64 = HIGH;

    for slot in out.iter_mut() {
        let range = high - low;
        let mut gap = (range >> 1) + (range >> 2) + (range >> 5);
        if low + gap > code {
            high = low + gap;
            *slot = 0;
            continue;
        }
        low += gap;
        gap = (range >> 3) + (range >> 4) + (range >> 7) + (range >> 9);
        if low + gap > code {
            high = low + gap;
            *slot = 1;
            continue;
        }
        low += gap;
        gap = (range >> 6) + (range >> 8);
        if low + gap > code {
            high = low + gap;
            *slot = 2;
            continue;
        }
        low += gap;
        gap = (range >> 10) + (range >> 11);
        if low + gap > code {
            high = low + gap;
            *slot = 3;
            continue;
        }
        low += gap;
        gap = (range >> 14) + (range >> 16);
        if low + gap > code {
            high = low + gap;
            *slot = 4;
            continue;
        }
        low += gap;
        gap = (range >> 19) + (range >> 20) + (range >> 23);
        if low + gap > code {
            high = low + gap;
            *slot = 5;
            continue;
        }
        low += gap;
        gap = (range >> 24) + (range >> 25) + (range >> 26);
        if low + gap > code {
            high = low + gap;
            *slot = 6;
            continue;
        }
        *slot = 7;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext_arr_eq(a: &[Ext; 64], b: &[Ext; 64]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| {
            x.len == y.len && x.masked_bits() == y.masked_bits()
        })
    }

    fn ext(bits: u64, len: u8) -> Ext {
        Ext { bits, len }
    }

    #[test]
    fn test_encode_decode_empty() {
        let exts = [Ext::EMPTY; 64];
        let code = encode_ext(&exts).expect("all-empty sequence always fits");
        assert!(ext_arr_eq(&exts, &decode_ext(code)));
    }

    #[test]
    fn test_encode_decode_one() {
        let mut exts = [Ext::EMPTY; 64];
        exts[63] = ext(0, 1);
        let code = encode_ext(&exts).expect("single 1-bit ext fits");
        assert!(ext_arr_eq(&exts, &decode_ext(code)));
    }

    #[test]
    fn test_encode_decode_few() {
        let mut exts = [Ext::EMPTY; 64];
        exts[60] = ext(0b000, 3);
        exts[61] = ext(0b10, 2);
        exts[62] = ext(0b1, 1);
        exts[63] = ext(0b0, 1);
        let code = encode_ext(&exts).expect("few short exts fit");
        assert!(ext_arr_eq(&exts, &decode_ext(code)));
    }

    /// Transcription of spec.md's "concrete numeric smoke test": 56 empties followed
    /// by four short extensions and four trailing empties.
    #[test]
    fn test_numeric_smoke() {
        let mut exts = [Ext::EMPTY; 64];
        exts[56] = ext(0b000, 3);
        exts[57] = ext(0b10, 2);
        exts[58] = ext(0b1, 1);
        exts[59] = ext(0b0, 1);
        let code = encode_ext(&exts).expect("smoke-test sequence fits in 56 bits");
        assert!(ext_arr_eq(&exts, &decode_ext(code)));
    }

    #[test]
    fn test_encode_decode_many_trailing_zero_exts() {
        let mut exts = [Ext::EMPTY; 64];
        for slot in exts.iter_mut().skip(56) {
            *slot = ext(0, 1);
        }
        let code = encode_ext(&exts).expect("8 length-1 exts documented to fit");
        assert!(ext_arr_eq(&exts, &decode_ext(code)));
    }

    #[test]
    fn test_encode_decode_too_many_fails() {
        let mut exts = [Ext::EMPTY; 64];
        for slot in exts.iter_mut().skip(55) {
            *slot = ext(0, 1);
        }
        assert!(encode_ext(&exts).is_none());
    }

    #[test]
    fn test_encode_decode_long() {
        let mut exts = [Ext::EMPTY; 64];
        exts[0] = ext(0b1111111111111111111, 19);
        let code = encode_ext(&exts).expect("single long ext fits");
        assert!(ext_arr_eq(&exts, &decode_ext(code)));
    }

    #[test]
    fn test_encode_decode_capacity_curve() {
        // Mirrors the upstream `test_encode_decode_capacity`: for each length, find
        // the largest n of that-length exts (remainder empty) that still round-trips.
        for len in 1u8..8 {
            let mut n = 0usize;
            for candidate in 1..64 {
                let mut exts = [Ext::EMPTY; 64];
                for slot in exts.iter_mut().take(candidate) {
                    *slot = ext(0, len);
                }
                if encode_ext(&exts).is_none() {
                    break;
                }
                n = candidate;
            }
            assert!(n >= 1, "length {} should hold at least one extension", len);
        }
    }

    #[test]
    fn test_encode_decode_sel_round_trip() {
        let mut sels = [0u8; 64];
        for (i, slot) in sels.iter_mut().enumerate() {
            *slot = (i % 7) as u8;
        }
        let code = encode_sel(&sels).expect("varied low selectors fit");
        let decoded = decode_sel(code);
        assert_eq!(sels, decoded);
    }

    #[test]
    fn test_encode_decode_sel_all_zero() {
        let sels = [0u8; 64];
        let code = encode_sel(&sels).expect("all-zero selectors always fit");
        assert_eq!(decode_sel(code), sels);
    }

    #[test]
    fn test_encode_sel_reduces_modulo_max_selector() {
        let mut sels = [0u8; 64];
        sels[0] = 6 + MAX_SELECTOR as u8; // reduces to 6
        let code = encode_sel(&sels).unwrap();
        let mut expected = [0u8; 64];
        expected[0] = 6;
        assert_eq!(decode_sel(code)[0], expected[0]);
    }

    #[test]
    fn test_get_set_code_round_trip() {
        let mut bytes = [0u8; CODE_BYTES];
        let code: u64 = 0x00AB_CDEF_1234_5;
        set_code(&mut bytes, code);
        assert_eq!(get_code(&bytes), code);
    }
}
