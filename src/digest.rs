//! Hash-to-field and digest helpers.
//!
//! [`hash_to_field`] maps an ordered list of arbitrary-precision integers to
//! `Z_q` by expanding a 512-bit digest over as many salted blocks as needed
//! to cover `bitLength(q) + 1 + t` bits.  It drives every Fiat–Shamir
//! challenge and the deterministic generator derivation.  Short BLAKE2b-256
//! fingerprints are used for proof and audit digests.

use std::fmt;
use std::str::FromStr;

use blake2::digest::consts::U32;
use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use sha2::Digest;

use crate::bytes::int_to_bytes;
use crate::error::{P4pError, P4pResult};
use crate::field::STATISTICAL_SECURITY_BITS;

type Blake2b256 = blake2::Blake2b<U32>;

const HASH_TO_FIELD_DOMAIN: &[u8] = b"p4p:v1:hash-to-field";
const FINGERPRINT_DOMAIN: &[u8] = b"p4p:v1:fingerprint";

/// Digest primitives with at least 512 bits of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// SHA-512 (default).
    #[default]
    Sha512,
    /// SHA3-512.
    Sha3_512,
    /// BLAKE2b with a 512-bit output.
    Blake2b512,
}

impl DigestAlgorithm {
    /// Canonical configuration name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha512 => "sha512",
            Self::Sha3_512 => "sha3-512",
            Self::Blake2b512 => "blake2b-512",
        }
    }

    /// Output size of one digest block in bytes.
    pub fn output_len(&self) -> usize {
        64
    }

    /// Hashes `messages` into `Z_q` with this algorithm.
    pub fn hash_to_field(&self, messages: &[BigInt], q: &BigUint) -> P4pResult<BigUint> {
        if q.is_zero() {
            return Err(P4pError::InvalidParameter(
                "hash_to_field modulus must be non-zero".into(),
            ));
        }
        let wanted_bits = q.bits() as usize + 1 + STATISTICAL_SECURITY_BITS as usize;
        let blocks = wanted_bits / (self.output_len() * 8) + 1;
        let stream = match self {
            Self::Sha512 => expand::<sha2::Sha512>(messages, blocks),
            Self::Sha3_512 => expand::<sha3::Sha3_512>(messages, blocks),
            Self::Blake2b512 => expand::<blake2::Blake2b512>(messages, blocks),
        };
        Ok(BigUint::from_bytes_be(&stream) % q)
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = P4pError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha512" | "sha-512" => Ok(Self::Sha512),
            "sha3-512" | "sha3_512" => Ok(Self::Sha3_512),
            "blake2b-512" | "blake2b512" | "blake2b" => Ok(Self::Blake2b512),
            other => Err(P4pError::DigestUnavailable(other.to_string())),
        }
    }
}

fn expand<D: Digest>(messages: &[BigInt], blocks: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(blocks * <D as Digest>::output_size());
    for block in 0..blocks {
        let mut hasher = D::new();
        hasher.update(HASH_TO_FIELD_DOMAIN);
        for msg in messages {
            let encoded = msg.to_signed_bytes_be();
            hasher.update(int_to_bytes(encoded.len() as i32));
            hasher.update(&encoded);
        }
        // Salt each block with its index.
        hasher.update(int_to_bytes(block as i32));
        out.extend_from_slice(&hasher.finalize());
    }
    out
}

/// Hashes `messages` into `Z_q` using SHA-512.
pub fn hash_to_field(messages: &[BigInt], q: &BigUint) -> P4pResult<BigUint> {
    DigestAlgorithm::Sha512.hash_to_field(messages, q)
}

/// Domain-separated BLAKE2b-256 digest over length-prefixed chunks.
pub fn fingerprint<'a, I>(chunks: I) -> [u8; 32]
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Blake2b256::new();
    hasher.update(FINGERPRINT_DOMAIN);
    for chunk in chunks {
        hasher.update(int_to_bytes(chunk.len() as i32));
        hasher.update(chunk);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(values: &[i64]) -> Vec<BigInt> {
        values.iter().map(|&v| BigInt::from(v)).collect()
    }

    #[test]
    fn hash_is_deterministic_and_reduced() {
        let q = BigUint::from(1_000_003u64);
        let a = hash_to_field(&msgs(&[1, -2, 3]), &q).unwrap();
        let b = hash_to_field(&msgs(&[1, -2, 3]), &q).unwrap();
        assert_eq!(a, b);
        assert!(a < q);
    }

    #[test]
    fn message_boundaries_matter() {
        let q = BigUint::from(u64::MAX);
        let joined = hash_to_field(&msgs(&[0x0102]), &q).unwrap();
        let split = hash_to_field(&msgs(&[0x01, 0x02]), &q).unwrap();
        assert_ne!(joined, split);
    }

    #[test]
    fn algorithms_are_separated() {
        let q = BigUint::from(u64::MAX);
        let m = msgs(&[42]);
        let sha2 = DigestAlgorithm::Sha512.hash_to_field(&m, &q).unwrap();
        let sha3 = DigestAlgorithm::Sha3_512.hash_to_field(&m, &q).unwrap();
        let blake = DigestAlgorithm::Blake2b512.hash_to_field(&m, &q).unwrap();
        assert_ne!(sha2, sha3);
        assert_ne!(sha2, blake);
    }

    #[test]
    fn wide_moduli_use_several_blocks() {
        let q = (BigUint::from(1u8) << 1500u32) + BigUint::from(7u8);
        let h = hash_to_field(&msgs(&[9]), &q).unwrap();
        assert!(h < q);
        // 1500 + 21 bits need three 512-bit blocks, so the value is not capped at 2^512.
        assert!(h.bits() > 1024);
    }

    #[test]
    fn unknown_digest_is_unavailable() {
        let err = "md5".parse::<DigestAlgorithm>().unwrap_err();
        assert_eq!(err, P4pError::DigestUnavailable("md5".into()));
        assert_eq!(
            "SHA3-512".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha3_512
        );
    }

    #[test]
    fn zero_modulus_is_rejected() {
        assert!(hash_to_field(&msgs(&[1]), &BigUint::zero()).is_err());
    }

    #[test]
    fn fingerprint_depends_on_chunking() {
        let a = fingerprint([b"ab".as_slice(), b"c".as_slice()]);
        let b = fingerprint([b"a".as_slice(), b"bc".as_slice()]);
        assert_ne!(a, b);
    }
}
