//! Fiat–Shamir transcript over arbitrary-precision integers.
//!
//! The [`Transcript`] records every public value a prover commits to and
//! derives challenges with [`DigestAlgorithm::hash_to_field`].  A challenge is
//! produced by hashing the domain tag, the recorded words and a monotonic
//! counter; the challenge itself is then absorbed, so prover and verifier stay
//! in lock-step as long as they append the same values in the same order.

use num_bigint::{BigInt, BigUint, Sign};

use crate::digest::DigestAlgorithm;
use crate::error::P4pResult;

/// Stateful helper that derives challenges from a recorded transcript.
#[derive(Debug, Clone)]
pub struct Transcript {
    domain_tag: &'static [u8],
    digest: DigestAlgorithm,
    words: Vec<BigInt>,
    counter: u64,
}

impl Transcript {
    /// Creates an empty transcript associated with the given domain tag.
    pub fn new(domain_tag: &'static [u8], digest: DigestAlgorithm) -> Self {
        Self {
            domain_tag,
            digest,
            words: vec![BigInt::from_bytes_be(Sign::Plus, domain_tag)],
            counter: 0,
        }
    }

    /// Appends a signed integer.
    pub fn append(&mut self, value: impl Into<BigInt>) {
        self.words.push(value.into());
    }

    /// Appends every value of a field vector.
    pub fn append_slice(&mut self, values: &[i64]) {
        self.words.push(BigInt::from(values.len()));
        self.words.extend(values.iter().map(|&v| BigInt::from(v)));
    }

    /// Appends a group element.
    pub fn append_element(&mut self, value: &BigUint) {
        self.words.push(BigInt::from(value.clone()));
    }

    /// Appends an opaque byte string, length-prefixed so that leading zero
    /// bytes are not lost.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.words.push(BigInt::from(bytes.len()));
        self.words.push(BigInt::from_bytes_be(Sign::Plus, bytes));
    }

    /// Returns an immutable view of the accumulated transcript words.
    pub fn snapshot(&self) -> &[BigInt] {
        &self.words
    }

    /// The domain tag this transcript was opened with.
    pub fn domain_tag(&self) -> &'static [u8] {
        self.domain_tag
    }

    /// Derives the next challenge in `[0, q)`.
    pub fn challenge(&mut self, q: &BigUint) -> P4pResult<BigUint> {
        self.words.push(BigInt::from(self.counter));
        let derived = self.digest.hash_to_field(&self.words, q);
        self.words.pop();
        let challenge = derived?;
        self.words.push(BigInt::from(challenge.clone()));
        self.counter = self.counter.wrapping_add(1);
        Ok(challenge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q() -> BigUint {
        BigUint::from(1_000_000_007u64)
    }

    #[test]
    fn identical_transcripts_agree() {
        let mut a = Transcript::new(b"test", DigestAlgorithm::Sha512);
        let mut b = Transcript::new(b"test", DigestAlgorithm::Sha512);
        for t in [&mut a, &mut b] {
            t.append(7i64);
            t.append_slice(&[1, -1, 0]);
            t.append_bytes(b"\0peer");
        }
        assert_eq!(a.challenge(&q()).unwrap(), b.challenge(&q()).unwrap());
        assert_eq!(a.challenge(&q()).unwrap(), b.challenge(&q()).unwrap());
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn successive_challenges_differ() {
        let mut t = Transcript::new(b"test", DigestAlgorithm::Sha512);
        t.append(1i64);
        let first = t.challenge(&q()).unwrap();
        let second = t.challenge(&q()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn domain_and_content_separate_challenges() {
        let mut a = Transcript::new(b"one", DigestAlgorithm::Sha512);
        let mut b = Transcript::new(b"two", DigestAlgorithm::Sha512);
        assert_ne!(a.challenge(&q()).unwrap(), b.challenge(&q()).unwrap());

        let mut c = Transcript::new(b"one", DigestAlgorithm::Sha512);
        let mut d = Transcript::new(b"one", DigestAlgorithm::Sha512);
        c.append_bytes(b"\0a");
        d.append_bytes(b"a");
        assert_ne!(c.challenge(&q()).unwrap(), d.challenge(&q()).unwrap());
        assert_eq!(c.domain_tag(), b"one");
    }
}
