//! Protocol parameters, the commitment group and JSON configuration.
//!
//! [`ProtocolParameters`] is the immutable bundle shared by a peer and both
//! servers: vector dimension `m`, field order `F`, norm bit-length `l` (with
//! `L = 2^l - 1`), soundness iterations `N`, and the Pedersen generators
//! `g, h` of a prime-order subgroup of `Z_p^*`.  Parameters are validated
//! once at construction and never change afterwards.

use std::fs;
use std::path::Path;

use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::digest::{fingerprint, DigestAlgorithm};
use crate::error::{P4pError, P4pResult};
use crate::field::{random_residue, Field};

/// Default number of checksum/challenge rows.
pub const DEFAULT_ZKP_ITERATIONS: usize = 50;

/// Largest supported norm bit-length.
pub const MAX_NORM_BITS: u32 = 30;

/// Name of the built-in commitment group.
pub const DEFAULT_GROUP_NAME: &str = "rfc2409-1024";

const DEFAULT_GENERATOR_SEED: &str = "p4p:v1:generators";

/// The 1024-bit safe prime of RFC 2409, group 2.
const RFC2409_GROUP2_PRIME: [u8; 128] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2,
    0x21, 0x68, 0xC2, 0x34, 0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1,
    0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74, 0x02, 0x0B, 0xBE, 0xA6,
    0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
    0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B, 0x30, 0x2B, 0x0A, 0x6D,
    0xF2, 0x5F, 0x14, 0x37, 0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45,
    0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6, 0xF4, 0x4C, 0x42, 0xE9,
    0xA6, 0x37, 0xED, 0x6B, 0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED,
    0xEE, 0x38, 0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5, 0xAE, 0x9F, 0x24, 0x11,
    0x7C, 0x4B, 0x1F, 0xE6, 0x49, 0x28, 0x66, 0x51, 0xEC, 0xE6, 0x53, 0x81,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

const MILLER_RABIN_BASES: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Order-`q` subgroup of `Z_p^*` for a safe prime `p = 2q + 1`.
///
/// Exponents are reduced modulo `q`; signed exponents are mapped to their
/// non-negative representative first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentGroup {
    p: BigUint,
    q: BigUint,
}

impl CommitmentGroup {
    /// Builds the group from a safe prime, checking `p` and `(p-1)/2` with
    /// Miller–Rabin.
    pub fn from_safe_prime(p: BigUint) -> P4pResult<Self> {
        if p < BigUint::from(7u8) {
            return Err(P4pError::InvalidParameter(
                "commitment modulus must be a safe prime >= 7".into(),
            ));
        }
        let q = (&p - 1u8) >> 1u32;
        if !probably_prime(&p) || !probably_prime(&q) {
            return Err(P4pError::InvalidParameter(
                "commitment modulus is not a safe prime".into(),
            ));
        }
        Ok(Self { p, q })
    }

    /// The 1024-bit safe-prime group of RFC 2409 (Oakley group 2).
    pub fn rfc2409_1024() -> Self {
        let p = BigUint::from_bytes_be(&RFC2409_GROUP2_PRIME);
        let q = (&p - 1u8) >> 1u32;
        Self { p, q }
    }

    /// Resolves a group by configuration name.
    pub fn named(name: &str) -> P4pResult<Self> {
        match name {
            DEFAULT_GROUP_NAME => Ok(Self::rfc2409_1024()),
            other => Err(P4pError::InvalidParameter(format!(
                "unknown commitment group {other}"
            ))),
        }
    }

    /// The prime modulus `p`.
    pub fn modulus(&self) -> &BigUint {
        &self.p
    }

    /// The subgroup order `q`.
    pub fn order(&self) -> &BigUint {
        &self.q
    }

    /// Returns `true` if `x` is an element of the order-`q` subgroup.
    pub fn contains(&self, x: &BigUint) -> bool {
        !x.is_zero() && *x < self.p && x.modpow(&self.q, &self.p).is_one()
    }

    /// Multiplies two group elements.
    pub fn mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.p
    }

    /// Raises `base` to a non-negative exponent.
    pub fn exp(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        base.modpow(exponent, &self.p)
    }

    /// Raises `base` to a signed exponent, reduced modulo `q`.
    pub fn exp_signed(&self, base: &BigUint, exponent: &BigInt) -> BigUint {
        self.exp(base, &self.reduce_exponent(exponent))
    }

    /// Maps a signed integer to its representative in `[0, q)`.
    pub fn reduce_exponent(&self, e: &BigInt) -> BigUint {
        let q = BigInt::from(self.q.clone());
        let r = ((e % &q) + &q) % &q;
        r.magnitude().clone()
    }

    /// Samples a uniform exponent in `[0, q)`.
    pub fn random_exponent(&self) -> P4pResult<BigUint> {
        random_residue(&self.q)
    }

    /// Derives a subgroup generator from `seed` whose discrete logarithm with
    /// respect to any other generator is unknown.
    ///
    /// The seed is hashed into `Z_p` and squared; a counter is mixed in until
    /// the result is neither `0` nor `1`.
    pub fn derive_generator(&self, seed: &[u8], digest: DigestAlgorithm) -> P4pResult<BigUint> {
        let seed = BigInt::from_signed_bytes_be(seed);
        let mut counter = 0u64;
        loop {
            let x = digest.hash_to_field(&[seed.clone(), BigInt::from(counter)], &self.p)?;
            let g = self.mul(&x, &x);
            if !g.is_zero() && !g.is_one() {
                return Ok(g);
            }
            counter += 1;
        }
    }
}

impl Default for CommitmentGroup {
    fn default() -> Self {
        Self::rfc2409_1024()
    }
}

fn probably_prime(n: &BigUint) -> bool {
    let two = BigUint::from(2u8);
    if *n < two {
        return false;
    }
    for &b in &MILLER_RABIN_BASES {
        let b = BigUint::from(b);
        if *n == b {
            return true;
        }
        if (n % &b).is_zero() {
            return false;
        }
    }
    let n_minus_one = n - 1u8;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;
    'witness: for &b in &MILLER_RABIN_BASES {
        let mut x = BigUint::from(b).modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn ceil_sqrt(m: usize) -> u64 {
    let m = m as u128;
    let mut r = (m as f64).sqrt() as u128;
    while r * r < m {
        r += 1;
    }
    while r > 0 && (r - 1) * (r - 1) >= m {
        r -= 1;
    }
    r as u64
}

/// Immutable protocol parameters shared by peers and servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolParameters {
    m: usize,
    field: Field,
    l: u32,
    max_norm: i64,
    n: usize,
    projection_bits: u32,
    g: BigUint,
    h: BigUint,
    group: CommitmentGroup,
    digest: DigestAlgorithm,
}

impl ProtocolParameters {
    /// Validates `(m, F, l, N, g, h)` against the default commitment group.
    pub fn new(m: usize, f: i64, l: u32, n: usize, g: BigUint, h: BigUint) -> P4pResult<Self> {
        Self::with_group(
            m,
            f,
            l,
            n,
            g,
            h,
            CommitmentGroup::default(),
            DigestAlgorithm::default(),
        )
    }

    /// Validates the parameters against an explicit group and digest.
    #[allow(clippy::too_many_arguments)]
    pub fn with_group(
        m: usize,
        f: i64,
        l: u32,
        n: usize,
        g: BigUint,
        h: BigUint,
        group: CommitmentGroup,
        digest: DigestAlgorithm,
    ) -> P4pResult<Self> {
        let field = Field::new(f)?;
        if m == 0 {
            return Err(P4pError::InvalidParameter(
                "vector dimension must be positive".into(),
            ));
        }
        if l == 0 || l > MAX_NORM_BITS {
            return Err(P4pError::InvalidParameter(format!(
                "norm bit-length must be in 1..={MAX_NORM_BITS}, got {l}"
            )));
        }
        if n == 0 {
            return Err(P4pError::InvalidParameter(
                "at least one zkp iteration is required".into(),
            ));
        }
        for (name, element) in [("g", &g), ("h", &h)] {
            if element.is_one() || !group.contains(element) {
                return Err(P4pError::InvalidParameter(format!(
                    "generator {name} is not a non-trivial element of the commitment subgroup"
                )));
            }
        }
        if g == h {
            return Err(P4pError::InvalidParameter(
                "generators g and h must differ".into(),
            ));
        }
        let max_norm = (1i64 << l) - 1;
        let spread = u128::from(max_norm as u64) * u128::from(ceil_sqrt(m));
        let projection_bits = 128 - spread.leading_zeros();
        let bound = 1u128 << projection_bits;
        if 2 * bound >= f as u128 {
            return Err(P4pError::InvalidParameter(format!(
                "projection bound 2^{projection_bits} does not fit below F/2 for F = {f}"
            )));
        }
        // Carry and bit equalities are checked in the exponent, i.e. modulo q.
        // They only pin down the integers when q exceeds their combined span.
        let span = BigUint::from(2 * f as u128 + 2 * bound);
        if *group.order() <= span {
            return Err(P4pError::InvalidParameter(format!(
                "commitment subgroup order {} must exceed 2F + 2^{} = {span}",
                group.order(),
                projection_bits + 1
            )));
        }
        debug!(m, f, l, n, projection_bits, "protocol parameters validated");
        Ok(Self {
            m,
            field,
            l,
            max_norm,
            n,
            projection_bits,
            g,
            h,
            group,
            digest,
        })
    }

    /// Vector dimension `m`.
    pub fn dimension(&self) -> usize {
        self.m
    }

    /// Field order `F`.
    pub fn field_order(&self) -> i64 {
        self.field.order()
    }

    /// The field `Z_F`.
    pub fn field(&self) -> Field {
        self.field
    }

    /// Norm bit-length `l`.
    pub fn norm_bits(&self) -> u32 {
        self.l
    }

    /// Maximum admissible L2-norm `L = 2^l - 1`.
    pub fn max_norm(&self) -> i64 {
        self.max_norm
    }

    /// Number of challenge rows `N`.
    pub fn iterations(&self) -> usize {
        self.n
    }

    /// Exponent `b` of the per-row projection bound `B = 2^b`.
    pub fn projection_bits(&self) -> u32 {
        self.projection_bits
    }

    /// Per-row projection bound `B`; proofs certify `x ∈ [-B, B)`.
    pub fn projection_bound(&self) -> i64 {
        1i64 << self.projection_bits
    }

    /// First commitment generator.
    pub fn g(&self) -> &BigUint {
        &self.g
    }

    /// Second commitment generator.
    pub fn h(&self) -> &BigUint {
        &self.h
    }

    /// Commitment group.
    pub fn group(&self) -> &CommitmentGroup {
        &self.group
    }

    /// Digest used for hash-to-field.
    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    /// Short digest of every parameter, used to tag audit records.
    pub fn fingerprint(&self) -> [u8; 32] {
        let head = format!(
            "m={};F={};l={};N={};digest={}",
            self.m,
            self.field.order(),
            self.l,
            self.n,
            self.digest
        );
        let p = self.group.modulus().to_bytes_be();
        let g = self.g.to_bytes_be();
        let h = self.h.to_bytes_be();
        fingerprint([head.as_bytes(), &p, &g, &h])
    }
}

/// Group selection in a configuration file: a built-in name or a custom
/// safe prime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupConfig {
    /// Built-in group name.
    Named(String),
    /// Custom safe prime as a decimal or `0x` hex string.
    Custom {
        /// The modulus `p`.
        p: String,
    },
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self::Named(DEFAULT_GROUP_NAME.to_string())
    }
}

impl GroupConfig {
    /// Resolves the configured group.
    pub fn resolve(&self) -> P4pResult<CommitmentGroup> {
        match self {
            Self::Named(name) => CommitmentGroup::named(name),
            Self::Custom { p } => CommitmentGroup::from_safe_prime(parse_biguint(p)?),
        }
    }
}

fn default_iterations() -> usize {
    DEFAULT_ZKP_ITERATIONS
}

fn default_digest() -> String {
    DigestAlgorithm::default().name().to_string()
}

fn default_seed() -> String {
    DEFAULT_GENERATOR_SEED.to_string()
}

/// On-disk JSON form of the protocol parameters.
///
/// ```json
/// { "m": 4, "F": 65537, "l": 10, "N": 50, "digest": "sha512" }
/// ```
///
/// When `g` or `h` is omitted it is derived from `generator_seed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Vector dimension.
    pub m: usize,
    /// Field order.
    #[serde(alias = "F")]
    pub field_order: i64,
    /// Norm bit-length.
    pub l: u32,
    /// Number of challenge rows.
    #[serde(alias = "N", default = "default_iterations")]
    pub zkp_iterations: usize,
    /// First generator, decimal or `0x` hex.
    #[serde(default)]
    pub g: Option<String>,
    /// Second generator, decimal or `0x` hex.
    #[serde(default)]
    pub h: Option<String>,
    /// Commitment group.
    #[serde(default)]
    pub group: GroupConfig,
    /// Digest name for hash-to-field.
    #[serde(default = "default_digest")]
    pub digest: String,
    /// Seed for generators that are not given explicitly.
    #[serde(default = "default_seed")]
    pub generator_seed: String,
}

impl ProtocolConfig {
    /// Parses a configuration from JSON text.
    pub fn from_json_str(text: &str) -> P4pResult<Self> {
        serde_json::from_str(text).map_err(|err| P4pError::Config(err.to_string()))
    }

    /// Reads a configuration file.
    pub fn from_path(path: &Path) -> P4pResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| P4pError::Config(format!("{}: {err}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Validates the configuration and produces protocol parameters.
    pub fn into_parameters(&self) -> P4pResult<ProtocolParameters> {
        let digest: DigestAlgorithm = self.digest.parse()?;
        let group = self.group.resolve()?;
        let g = match &self.g {
            Some(text) => parse_biguint(text)?,
            None => group.derive_generator(format!("{}/g", self.generator_seed).as_bytes(), digest)?,
        };
        let h = match &self.h {
            Some(text) => parse_biguint(text)?,
            None => group.derive_generator(format!("{}/h", self.generator_seed).as_bytes(), digest)?,
        };
        ProtocolParameters::with_group(
            self.m,
            self.field_order,
            self.l,
            self.zkp_iterations,
            g,
            h,
            group,
            digest,
        )
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal integer.
pub fn parse_biguint(text: &str) -> P4pResult<BigUint> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => BigUint::parse_bytes(hex.as_bytes(), 16),
        None => BigUint::parse_bytes(text.as_bytes(), 10),
    };
    parsed.ok_or_else(|| P4pError::Config(format!("invalid integer literal {text:?}")))
}

#[cfg(test)]
const TEST_GROUP_PRIME: [u8; 16] = [
    0xA6, 0xCA, 0xF4, 0xA2, 0x82, 0x04, 0x75, 0xDA, 0xA9, 0xDE, 0x24, 0xB4, 0x4B, 0x7B, 0x4C, 0xB3,
];

/// Small safe-prime group that keeps proof-heavy tests fast.
#[cfg(test)]
pub(crate) fn test_group() -> CommitmentGroup {
    let p = BigUint::from_bytes_be(&TEST_GROUP_PRIME);
    let q = (&p - 1u8) >> 1u32;
    CommitmentGroup { p, q }
}

/// Parameters over [`test_group`] with derived generators.
#[cfg(test)]
pub(crate) fn test_parameters(m: usize, f: i64, l: u32, n: usize) -> ProtocolParameters {
    let group = test_group();
    let digest = DigestAlgorithm::default();
    let g = group.derive_generator(b"test/g", digest).unwrap();
    let h = group.derive_generator(b"test/h", digest).unwrap();
    ProtocolParameters::with_group(m, f, l, n, g, h, group, digest).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_safe_primes() {
        let small = test_group();
        assert!(CommitmentGroup::from_safe_prime(small.modulus().clone()).is_ok());
        let rfc = CommitmentGroup::rfc2409_1024();
        assert_eq!(rfc.modulus().bits(), 1024);
        assert!(probably_prime(rfc.order()));
        assert!(rfc.contains(&BigUint::from(4u8)));
        assert!(CommitmentGroup::from_safe_prime(BigUint::from(15u8)).is_err());
        // 13 is prime but (13 - 1) / 2 = 6 is not.
        assert!(CommitmentGroup::from_safe_prime(BigUint::from(13u8)).is_err());
        assert!(CommitmentGroup::from_safe_prime(BigUint::from(23u8)).is_ok());
    }

    #[test]
    fn signed_exponents_wrap_modulo_q() {
        let group = test_group();
        let g = group.derive_generator(b"x", DigestAlgorithm::Sha512).unwrap();
        let forward = group.exp_signed(&g, &BigInt::from(5));
        let back = group.exp_signed(&g, &BigInt::from(-5));
        assert!(group.mul(&forward, &back).is_one());
        assert_eq!(group.reduce_exponent(&BigInt::from(-1)), group.order() - 1u8);
    }

    #[test]
    fn derived_generators_live_in_the_subgroup() {
        let group = test_group();
        let g = group.derive_generator(b"seed/g", DigestAlgorithm::Sha512).unwrap();
        let h = group.derive_generator(b"seed/h", DigestAlgorithm::Sha512).unwrap();
        assert!(group.contains(&g) && group.contains(&h));
        assert_ne!(g, h);
    }

    #[test]
    fn parameters_are_validated() {
        let p = test_parameters(4, 65537, 10, 50);
        assert_eq!(p.max_norm(), 1023);
        assert_eq!(p.projection_bits(), 11);
        assert_eq!(p.projection_bound(), 2048);
        let (g, h) = (p.g().clone(), p.h().clone());
        let group = test_group();
        let build = |m, f, l, n| {
            ProtocolParameters::with_group(
                m,
                f,
                l,
                n,
                g.clone(),
                h.clone(),
                group.clone(),
                DigestAlgorithm::Sha512,
            )
        };
        assert!(matches!(build(4, 0, 10, 50), Err(P4pError::InvalidParameter(_))));
        assert!(matches!(build(4, -3, 10, 50), Err(P4pError::InvalidParameter(_))));
        assert!(build(0, 65537, 10, 50).is_err());
        assert!(build(4, 65537, 0, 50).is_err());
        assert!(build(4, 65537, 10, 0).is_err());
        // B = 2^15 still fits, 2^16 does not.
        assert!(build(4, 65537, 14, 50).is_ok());
        assert!(build(4, 65537, 15, 50).is_err());
        let same = ProtocolParameters::with_group(
            4,
            65537,
            10,
            50,
            g.clone(),
            g.clone(),
            group.clone(),
            DigestAlgorithm::Sha512,
        );
        assert!(same.is_err());
        let outside = ProtocolParameters::with_group(
            4,
            65537,
            10,
            50,
            BigUint::one(),
            h.clone(),
            group,
            DigestAlgorithm::Sha512,
        );
        assert!(outside.is_err());
    }

    #[test]
    fn subgroup_must_outgrow_the_field() {
        // p = 2027 is a safe prime but q = 1013 is far below F = 65537, so
        // bit decompositions would only hold modulo q.
        let tiny = CommitmentGroup::from_safe_prime(BigUint::from(2027u32)).unwrap();
        assert_eq!(tiny.order(), &BigUint::from(1013u32));
        let (g, h) = (BigUint::from(4u8), BigUint::from(9u8));
        assert!(tiny.contains(&g) && tiny.contains(&h));
        let small_q = ProtocolParameters::with_group(
            4,
            65537,
            10,
            50,
            g.clone(),
            h.clone(),
            tiny.clone(),
            DigestAlgorithm::Sha512,
        );
        assert!(matches!(small_q, Err(P4pError::InvalidParameter(_))));
        // q = 1013 > 2 * 251 + 2^(b+1) with l = 1, m = 1: b = 1, span = 506.
        let fits = ProtocolParameters::with_group(1, 251, 1, 1, g, h, tiny, DigestAlgorithm::Sha512);
        assert!(fits.is_ok());

        let cfg = ProtocolConfig::from_json_str(
            r#"{ "m": 4, "F": 65537, "l": 10, "N": 50, "group": { "p": "2027" } }"#,
        )
        .unwrap();
        assert!(cfg.into_parameters().is_err());
    }

    #[test]
    fn config_round_trip() {
        let cfg = ProtocolConfig::from_json_str(
            r#"{ "m": 4, "F": 65537, "l": 10, "group": { "p": "0xA6CAF4A2820475DAA9DE24B44B7B4CB3" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.zkp_iterations, DEFAULT_ZKP_ITERATIONS);
        assert_eq!(cfg.digest, "sha512");
        let params = cfg.into_parameters().unwrap();
        assert_eq!(params.dimension(), 4);
        assert_eq!(params.group(), &test_group());
        assert_eq!(params.fingerprint(), cfg.into_parameters().unwrap().fingerprint());
    }

    #[test]
    fn config_errors_are_typed() {
        let bad_digest = ProtocolConfig::from_json_str(
            r#"{ "m": 4, "F": 65537, "l": 10, "digest": "md5", "group": { "p": "23" } }"#,
        )
        .unwrap();
        assert!(matches!(
            bad_digest.into_parameters(),
            Err(P4pError::DigestUnavailable(_))
        ));
        assert!(matches!(
            ProtocolConfig::from_json_str("{ \"m\": 4 }"),
            Err(P4pError::Config(_))
        ));
        assert!(parse_biguint("0xZZ").is_err());
        assert_eq!(parse_biguint(" 255 ").unwrap(), BigUint::from(255u32));
        assert_eq!(parse_biguint("0xff").unwrap(), BigUint::from(255u32));
    }
}
