//! Summation-based homomorphic hash over value MACs.

use syncd_core::LTHASH_SIZE;

use crate::crypto::hkdf_sha256;

/// A lattice hash: items are expanded with HKDF and combined by
/// pointwise wrapping addition of little-endian u16 words.
#[derive(Debug, Clone, Copy)]
pub struct LtHash {
    info: &'static [u8],
}

/// The LtHash instance protecting app-state collections.
pub const WAPATCH_INTEGRITY: LtHash = LtHash {
    info: b"WhatsApp Patch Integrity",
};

impl LtHash {
    /// Subtract every item of `subtract` from `base`, then add every item of `add`.
    pub fn subtract_then_add(
        &self,
        base: &[u8; LTHASH_SIZE],
        subtract: &[&[u8]],
        add: &[&[u8]],
    ) -> [u8; LTHASH_SIZE] {
        let mut out = *base;
        for item in subtract {
            self.fold(&mut out, item, u16::wrapping_sub);
        }
        for item in add {
            self.fold(&mut out, item, u16::wrapping_add);
        }
        out
    }

    fn fold(&self, base: &mut [u8; LTHASH_SIZE], item: &[u8], op: fn(u16, u16) -> u16) {
        let mut expanded = [0u8; LTHASH_SIZE];
        hkdf_sha256(item, self.info, &mut expanded);
        for (word, other) in base.chunks_exact_mut(2).zip(expanded.chunks_exact(2)) {
            let x = u16::from_le_bytes([word[0], word[1]]);
            let y = u16::from_le_bytes([other[0], other[1]]);
            word.copy_from_slice(&op(x, y).to_le_bytes());
        }
    }
}
