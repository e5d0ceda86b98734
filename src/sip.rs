//! Keyed edge-endpoint generation.
//!
//! Every candidate edge nonce `n` hashes to one endpoint per side via
//! SipHash-2-4 of `2n + side`, keyed by four u64s derived from the header.
//! The key block is used directly as the initial SipHash state (the miner
//! family's convention, rather than the classic two-key XOR constants), and
//! the keys themselves are the little-endian words of the BLAKE2b-256 digest
//! of the header with the attempt nonce written into its final four bytes.
//!
//! Endpoint hashes for a stripe of edges are consumed in batches of
//! [`SIP_BATCH`] evaluated in straight-line lane-parallel code, which the
//! compiler can turn into SIMD; callers overlap those batches with counter
//! prefetching to hide the latency of the effectively random node indices.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use crate::params::Params;
use crate::{Error, Result};

/// Number of hashes evaluated per batch call.
pub const SIP_BATCH: usize = 4;

type Blake2b256 = Blake2b<U32>;

// ============================================================================
// NodeHasher
// ============================================================================

/// Source of endpoint hashes for edge nonces.
///
/// The production implementation is [`SipKeys`]. Tests substitute synthetic
/// hashers that plant known cycles, which is what makes the cycle-search
/// machinery testable without searching a 2^29-edge space.
pub trait NodeHasher: Sync {
    /// Hashes one doubled index (`2 * nonce + side`) to 64 pseudorandom bits.
    fn hash(&self, index: u64) -> u64;

    /// Hashes a batch of doubled indices.
    ///
    /// Semantically identical to [`NodeHasher::hash`] per lane; overridden
    /// where a lane-parallel evaluation is worthwhile.
    #[inline]
    fn hash_batch(&self, indices: &[u64; SIP_BATCH]) -> [u64; SIP_BATCH] {
        let mut out = [0u64; SIP_BATCH];
        for (o, &ix) in out.iter_mut().zip(indices.iter()) {
            *o = self.hash(ix);
        }
        out
    }

    /// Full node id for `(nonce, side)`: masked hash doubled plus side bit.
    #[inline]
    fn node(&self, params: &Params, nonce: u64, side: u64) -> u64 {
        params.node_id(self.hash(2 * nonce + side) & params.edge_mask(), side)
    }
}

// ============================================================================
// SipKeys
// ============================================================================

/// SipHash-2-4 key block seeded from a header and nonce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SipKeys {
    k0: u64,
    k1: u64,
    k2: u64,
    k3: u64,
}

impl SipKeys {
    /// Derives keys from raw header bytes (nonce already in place).
    pub fn from_header(header: &[u8]) -> Self {
        let digest = Blake2b256::digest(header);
        let word = |i: usize| u64::from_le_bytes(digest[8 * i..8 * i + 8].try_into().unwrap());
        Self {
            k0: word(0),
            k1: word(1),
            k2: word(2),
            k3: word(3),
        }
    }

    /// Writes `nonce` little-endian into the last four header bytes, then
    /// derives keys from the result. This fixed trailing offset is the
    /// attempt-setup contract: header plus nonce determine the whole graph.
    ///
    /// # Errors
    /// Returns [`Error::HeaderTooShort`] if the buffer cannot hold the nonce.
    pub fn from_header_nonce(header: &mut [u8], nonce: u32) -> Result<Self> {
        let len = header.len();
        if len < 4 {
            return Err(Error::HeaderTooShort { len });
        }
        header[len - 4..].copy_from_slice(&nonce.to_le_bytes());
        Ok(Self::from_header(header))
    }

    #[inline(always)]
    fn sipround(v0: &mut u64, v1: &mut u64, v2: &mut u64, v3: &mut u64) {
        *v0 = v0.wrapping_add(*v1);
        *v2 = v2.wrapping_add(*v3);
        *v1 = v1.rotate_left(13);
        *v3 = v3.rotate_left(16);
        *v1 ^= *v0;
        *v3 ^= *v2;
        *v0 = v0.rotate_left(32);
        *v2 = v2.wrapping_add(*v1);
        *v0 = v0.wrapping_add(*v3);
        *v1 = v1.rotate_left(17);
        *v3 = v3.rotate_left(21);
        *v1 ^= *v2;
        *v3 ^= *v0;
        *v2 = v2.rotate_left(32);
    }

    #[inline(always)]
    fn sipround_lanes(
        v0: &mut [u64; SIP_BATCH],
        v1: &mut [u64; SIP_BATCH],
        v2: &mut [u64; SIP_BATCH],
        v3: &mut [u64; SIP_BATCH],
    ) {
        for l in 0..SIP_BATCH {
            Self::sipround(&mut v0[l], &mut v1[l], &mut v2[l], &mut v3[l]);
        }
    }
}

impl NodeHasher for SipKeys {
    #[inline]
    fn hash(&self, index: u64) -> u64 {
        let (mut v0, mut v1, mut v2, mut v3) = (self.k0, self.k1, self.k2, self.k3);
        v3 ^= index;
        Self::sipround(&mut v0, &mut v1, &mut v2, &mut v3);
        Self::sipround(&mut v0, &mut v1, &mut v2, &mut v3);
        v0 ^= index;
        v2 ^= 0xff;
        Self::sipround(&mut v0, &mut v1, &mut v2, &mut v3);
        Self::sipround(&mut v0, &mut v1, &mut v2, &mut v3);
        Self::sipround(&mut v0, &mut v1, &mut v2, &mut v3);
        Self::sipround(&mut v0, &mut v1, &mut v2, &mut v3);
        v0 ^ v1 ^ v2 ^ v3
    }

    #[inline]
    fn hash_batch(&self, indices: &[u64; SIP_BATCH]) -> [u64; SIP_BATCH] {
        let mut v0 = [self.k0; SIP_BATCH];
        let mut v1 = [self.k1; SIP_BATCH];
        let mut v2 = [self.k2; SIP_BATCH];
        let mut v3 = [self.k3; SIP_BATCH];
        for l in 0..SIP_BATCH {
            v3[l] ^= indices[l];
        }
        Self::sipround_lanes(&mut v0, &mut v1, &mut v2, &mut v3);
        Self::sipround_lanes(&mut v0, &mut v1, &mut v2, &mut v3);
        for l in 0..SIP_BATCH {
            v0[l] ^= indices[l];
            v2[l] ^= 0xff;
        }
        Self::sipround_lanes(&mut v0, &mut v1, &mut v2, &mut v3);
        Self::sipround_lanes(&mut v0, &mut v1, &mut v2, &mut v3);
        Self::sipround_lanes(&mut v0, &mut v1, &mut v2, &mut v3);
        Self::sipround_lanes(&mut v0, &mut v1, &mut v2, &mut v3);
        let mut out = [0u64; SIP_BATCH];
        for l in 0..SIP_BATCH {
            out[l] = v0[l] ^ v1[l] ^ v2[l] ^ v3[l];
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> SipKeys {
        SipKeys::from_header(b"lean-cuckoo test header")
    }

    #[test]
    fn hashing_is_deterministic() {
        let k = keys();
        for index in [0u64, 1, 2, 1234, u64::from(u32::MAX)] {
            assert_eq!(k.hash(index), k.hash(index));
        }
        assert_eq!(keys().hash(99), k.hash(99));
    }

    #[test]
    fn batch_matches_scalar() {
        let k = keys();
        let indices = [0u64, 7, 1 << 40, u64::MAX];
        let batch = k.hash_batch(&indices);
        for (l, &ix) in indices.iter().enumerate() {
            assert_eq!(batch[l], k.hash(ix));
        }
    }

    #[test]
    fn different_nonces_give_different_keys() {
        let mut header = vec![0u8; 80];
        let a = SipKeys::from_header_nonce(&mut header, 1).unwrap();
        let b = SipKeys::from_header_nonce(&mut header, 2).unwrap();
        assert_ne!(a, b);
        // Same nonce reproduces the same keys.
        let a2 = SipKeys::from_header_nonce(&mut header, 1).unwrap();
        assert_eq!(a, a2);
    }

    #[test]
    fn nonce_lands_in_trailing_bytes() {
        let mut header = vec![0u8; 12];
        SipKeys::from_header_nonce(&mut header, 0x0403_0201).unwrap();
        assert_eq!(&header[8..], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&header[..8], &[0u8; 8]);
    }

    #[test]
    fn short_header_is_rejected() {
        let mut header = vec![0u8; 3];
        assert!(matches!(
            SipKeys::from_header_nonce(&mut header, 0),
            Err(crate::Error::HeaderTooShort { len: 3 })
        ));
    }

    #[test]
    fn node_ids_respect_side_parity() {
        let params = Params::new(10, 0, 4).unwrap();
        let k = keys();
        for nonce in 0..256u64 {
            let u = k.node(&params, nonce, 0);
            let v = k.node(&params, nonce, 1);
            assert_eq!(u % 2, 0);
            assert_eq!(v % 2, 1);
            assert!(u <= params.node_mask());
            assert!(v <= params.node_mask());
        }
    }
}
