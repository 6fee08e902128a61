//! Per-row projection range proofs binding a peer's shares to the challenge
//! matrix.
//!
//! For challenge row `c` a peer holding shares `s1, s2` of `v` sends server
//! `k` the response `y_k = mod(c·s_k, F)` together with the opening of
//! `C_k = Com(y_k)`.  The public part of the row proof shows, without
//! revealing `x = mod(c·v, F)`, that
//!
//! ```text
//! C_1 · C_2 · K^-F  commits to x,   K commits to a carry in {-1, 0, 1},
//! Π B_j^(2^j) = C_1 · C_2 · K^-F · g^B,   every B_j commits to a bit,
//! ```
//!
//! which pins `x + B` into `[0, 2^(b+1))`, i.e. `x ∈ [-B, B)`.  A server
//! checks its own response and opening plus the whole public part; rows are
//! independent and checked in parallel.

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

use num_bigint::{BigInt, BigUint};
use num_traits::One;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::commit::{commit, opens_to, MembershipProof};
use crate::digest::fingerprint;
use crate::error::{P4pError, P4pResult};
use crate::field::canonical_mod_wide;
use crate::params::ProtocolParameters;
use crate::transcript::Transcript;
use crate::vector::inner_product_mod;

const BOUND_PROOF_DOMAIN: &[u8] = b"p4p:v1:bound-proof";
const CARRY_SET: [i64; 3] = [-1, 0, 1];
const BIT_SET: [i64; 2] = [0, 1];

/// Public part of the proof for one challenge row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowProof {
    /// `Com(y_1)` and `Com(y_2)`.
    pub share_commitments: [BigUint; 2],
    /// Commitment to the wrap-around carry.
    pub carry_commitment: BigUint,
    /// Proof that the carry lies in `{-1, 0, 1}`.
    pub carry_proof: MembershipProof,
    /// Commitments to the bits of `x + B`, least significant first.
    pub bit_commitments: Vec<BigUint>,
    /// One bit proof per bit commitment.
    pub bit_proofs: Vec<MembershipProof>,
}

/// Public bound proof over every challenge row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundProof {
    /// One entry per challenge row.
    pub rows: Vec<RowProof>,
}

/// What a peer hands to one server alongside the shared [`BoundProof`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerWitness {
    /// `y_i = mod(c_i · share, F)` for every row.
    pub responses: Vec<i64>,
    /// Opening of this server's share commitment for every row.
    pub openings: Vec<BigUint>,
}

/// Output of [`BoundProof::prove`].
#[derive(Debug, Clone)]
pub struct ProvenBound {
    /// Public proof sent to both servers.
    pub proof: BoundProof,
    /// Per-server responses and openings.
    pub witnesses: [ServerWitness; 2],
    /// Rows whose projection fell outside `[-B, B)`; such rows cannot verify.
    pub out_of_bound_rows: Vec<usize>,
}

/// Identifies the submission a proof belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ProofContext<'a> {
    /// Round the challenge matrix was published for.
    pub round_id: u64,
    /// Submitting peer.
    pub peer_id: &'a str,
}

struct ProvenRow {
    proof: RowProof,
    responses: [i64; 2],
    openings: [BigUint; 2],
    in_bound: bool,
}

impl BoundProof {
    /// Proves every row of `challenge` for the shares `[s1, s2]`.
    pub fn prove(
        params: &ProtocolParameters,
        ctx: ProofContext<'_>,
        challenge: &[Vec<i64>],
        shares: [&[i64]; 2],
    ) -> P4pResult<ProvenBound> {
        check_shape(params, challenge)?;
        for share in shares {
            if share.len() != params.dimension() {
                return Err(P4pError::dimension(params.dimension(), share.len()));
            }
        }
        let rows = map_rows(challenge.len(), |i| prove_row(params, ctx, i, &challenge[i], shares))
            .into_iter()
            .collect::<P4pResult<Vec<_>>>()?;

        let mut proof = BoundProof {
            rows: Vec::with_capacity(rows.len()),
        };
        let mut witnesses = [ServerWitness::default(), ServerWitness::default()];
        let mut out_of_bound_rows = Vec::new();
        for (i, row) in rows.into_iter().enumerate() {
            if !row.in_bound {
                out_of_bound_rows.push(i);
            }
            for (k, (y, r)) in row.responses.into_iter().zip(row.openings).enumerate() {
                witnesses[k].responses.push(y);
                witnesses[k].openings.push(r);
            }
            proof.rows.push(row.proof);
        }
        Ok(ProvenBound {
            proof,
            witnesses,
            out_of_bound_rows,
        })
    }

    /// Verifies the proof from the point of view of server `server` (0 or 1)
    /// holding `share`.
    ///
    /// Fails with [`P4pError::ProofVerificationFailed`] naming the first row
    /// that does not check out.
    pub fn verify(
        &self,
        params: &ProtocolParameters,
        ctx: ProofContext<'_>,
        challenge: &[Vec<i64>],
        server: usize,
        share: &[i64],
        witness: &ServerWitness,
    ) -> P4pResult<()> {
        check_shape(params, challenge)?;
        if server > 1 {
            return Err(P4pError::InvalidParameter(format!(
                "server index must be 0 or 1, got {server}"
            )));
        }
        if share.len() != params.dimension() {
            return Err(P4pError::dimension(params.dimension(), share.len()));
        }
        let n = challenge.len();
        if self.rows.len() != n {
            return Err(P4pError::rejected(
                self.rows.len().min(n),
                format!("proof has {} rows, expected {n}", self.rows.len()),
            ));
        }
        if witness.responses.len() != n || witness.openings.len() != n {
            return Err(P4pError::rejected(0, "responses do not cover every row"));
        }
        let results = map_rows(n, |i| {
            verify_row(
                params,
                ctx,
                i,
                &challenge[i],
                &self.rows[i],
                server,
                share,
                witness.responses[i],
                &witness.openings[i],
            )
            .map_err(|reason| P4pError::rejected(i, reason))
        });
        results.into_iter().collect::<P4pResult<Vec<()>>>()?;
        debug!(rows = n, server, peer = ctx.peer_id, "bound proof verified");
        Ok(())
    }

    /// BLAKE2b-256 digest of the public proof; both servers compute the same
    /// value for the same submission.
    pub fn digest(&self, ctx: ProofContext<'_>) -> [u8; 32] {
        let mut chunks: Vec<Vec<u8>> = vec![
            ctx.round_id.to_le_bytes().to_vec(),
            ctx.peer_id.as_bytes().to_vec(),
        ];
        for row in &self.rows {
            let elements = row
                .share_commitments
                .iter()
                .chain(std::iter::once(&row.carry_commitment))
                .chain(&row.bit_commitments);
            chunks.extend(elements.map(BigUint::to_bytes_be));
            for proof in std::iter::once(&row.carry_proof).chain(&row.bit_proofs) {
                let scalars = proof
                    .announcements
                    .iter()
                    .chain(&proof.challenges)
                    .chain(&proof.responses);
                chunks.extend(scalars.map(BigUint::to_bytes_be));
            }
        }
        fingerprint(chunks.iter().map(Vec::as_slice))
    }
}

fn check_shape(params: &ProtocolParameters, challenge: &[Vec<i64>]) -> P4pResult<()> {
    if challenge.len() != params.iterations() {
        return Err(P4pError::dimension(params.iterations(), challenge.len()));
    }
    if let Some(row) = challenge.iter().find(|row| row.len() != params.dimension()) {
        return Err(P4pError::dimension(params.dimension(), row.len()));
    }
    Ok(())
}

fn map_rows<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    #[cfg(not(target_arch = "wasm32"))]
    {
        if n > 1 && rayon::current_num_threads() > 1 {
            return (0..n).into_par_iter().map(f).collect();
        }
    }
    (0..n).map(f).collect()
}

fn row_transcript(
    params: &ProtocolParameters,
    ctx: ProofContext<'_>,
    row: usize,
    challenge_row: &[i64],
    proof: &RowProof,
) -> Transcript {
    let mut t = Transcript::new(BOUND_PROOF_DOMAIN, params.digest());
    t.append_bytes(&params.fingerprint());
    t.append(ctx.round_id);
    t.append_bytes(ctx.peer_id.as_bytes());
    t.append(row);
    t.append_slice(challenge_row);
    for c in &proof.share_commitments {
        t.append_element(c);
    }
    t.append_element(&proof.carry_commitment);
    for b in &proof.bit_commitments {
        t.append_element(b);
    }
    t
}

fn prove_row(
    params: &ProtocolParameters,
    ctx: ProofContext<'_>,
    row: usize,
    challenge_row: &[i64],
    shares: [&[i64]; 2],
) -> P4pResult<ProvenRow> {
    let group = params.group();
    let f = params.field_order();
    let y = [
        inner_product_mod(challenge_row, shares[0], f)?,
        inner_product_mod(challenge_row, shares[1], f)?,
    ];
    let wide = i128::from(y[0]) + i128::from(y[1]);
    let x = canonical_mod_wide(wide, f);
    let carry = ((wide - i128::from(x)) / i128::from(f)) as i64;

    let openings = [group.random_exponent()?, group.random_exponent()?];
    let carry_randomness = group.random_exponent()?;
    let share_commitments = [
        commit(params, &BigInt::from(y[0]), &openings[0]),
        commit(params, &BigInt::from(y[1]), &openings[1]),
    ];
    let carry_commitment = commit(params, &BigInt::from(carry), &carry_randomness);
    // Randomness of X = C1 · C2 · K^-F.
    let projected_randomness = group.reduce_exponent(
        &(BigInt::from(openings[0].clone()) + BigInt::from(openings[1].clone())
            - BigInt::from(carry_randomness.clone()) * f),
    );

    let width = params.projection_bits() + 1;
    let span = 1i64 << width;
    let shifted = x + params.projection_bound();
    let in_bound = (0..span).contains(&shifted);
    let shifted = shifted.rem_euclid(span);

    let mut bit_randomness = Vec::with_capacity(width as usize);
    bit_randomness.push(BigUint::default());
    let mut weighted = BigInt::default();
    for j in 1..width {
        let r = group.random_exponent()?;
        weighted += BigInt::from(r.clone()) << j;
        bit_randomness.push(r);
    }
    bit_randomness[0] = group.reduce_exponent(&(BigInt::from(projected_randomness) - weighted));
    let bits: Vec<i64> = (0..width).map(|j| (shifted >> j) & 1).collect();
    let bit_commitments = bits
        .iter()
        .zip(&bit_randomness)
        .map(|(&bit, r)| commit(params, &BigInt::from(bit), r))
        .collect();

    let mut proof = RowProof {
        share_commitments,
        carry_commitment,
        carry_proof: MembershipProof::default(),
        bit_commitments,
        bit_proofs: Vec::with_capacity(width as usize),
    };
    let mut transcript = row_transcript(params, ctx, row, challenge_row, &proof);
    proof.carry_proof = MembershipProof::prove(
        params,
        &mut transcript,
        &proof.carry_commitment,
        carry,
        &carry_randomness,
        &CARRY_SET,
    )?;
    for (j, &bit) in bits.iter().enumerate() {
        let bit_proof = MembershipProof::prove(
            params,
            &mut transcript,
            &proof.bit_commitments[j],
            bit,
            &bit_randomness[j],
            &BIT_SET,
        )?;
        proof.bit_proofs.push(bit_proof);
    }
    Ok(ProvenRow {
        proof,
        responses: y,
        openings,
        in_bound,
    })
}

#[allow(clippy::too_many_arguments)]
fn verify_row(
    params: &ProtocolParameters,
    ctx: ProofContext<'_>,
    row: usize,
    challenge_row: &[i64],
    proof: &RowProof,
    server: usize,
    share: &[i64],
    response: i64,
    opening: &BigUint,
) -> Result<(), String> {
    let group = params.group();
    let f = params.field_order();
    let width = params.projection_bits() as usize + 1;
    if proof.bit_commitments.len() != width || proof.bit_proofs.len() != width {
        return Err(format!("expected {width} bit commitments"));
    }
    let expected = inner_product_mod(challenge_row, share, f).map_err(|err| err.to_string())?;
    if response != expected {
        return Err("response does not match the share".into());
    }
    if opening >= group.order() {
        return Err("opening out of range".into());
    }
    if !opens_to(params, &proof.share_commitments[server], &BigInt::from(response), opening) {
        return Err("share commitment does not open to the response".into());
    }
    let all_in_group = proof
        .share_commitments
        .iter()
        .chain(std::iter::once(&proof.carry_commitment))
        .chain(&proof.bit_commitments)
        .all(|c| group.contains(c));
    if !all_in_group {
        return Err("commitment outside the commitment group".into());
    }

    let mut transcript = row_transcript(params, ctx, row, challenge_row, proof);
    proof
        .carry_proof
        .verify(params, &mut transcript, &proof.carry_commitment, &CARRY_SET)?;
    for (bit_proof, commitment) in proof.bit_proofs.iter().zip(&proof.bit_commitments) {
        bit_proof.verify(params, &mut transcript, commitment, &BIT_SET)?;
    }

    let projected = group.mul(
        &group.mul(&proof.share_commitments[0], &proof.share_commitments[1]),
        &group.exp_signed(&proof.carry_commitment, &BigInt::from(-f)),
    );
    let target = group.mul(
        &projected,
        &group.exp_signed(params.g(), &BigInt::from(params.projection_bound())),
    );
    let two = BigUint::from(2u8);
    let recombined = proof
        .bit_commitments
        .iter()
        .rev()
        .fold(BigUint::one(), |acc, b| group.mul(&group.exp(&acc, &two), b));
    if recombined != target {
        return Err("projection is outside the admissible bound".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::test_parameters;

    const CTX: ProofContext<'static> = ProofContext {
        round_id: 1,
        peer_id: "peer-a",
    };

    fn split(v: &[i64], f: i64) -> (Vec<i64>, Vec<i64>) {
        let s1 = crate::vector::uniform_vector(v.len(), f).unwrap();
        let s2 = v
            .iter()
            .zip(&s1)
            .map(|(&a, &b)| crate::field::canonical_mod(a - b, f))
            .collect();
        (s1, s2)
    }

    fn rows(n: usize, m: usize) -> Vec<Vec<i64>> {
        (0..n)
            .map(|i| (0..m).map(|j| [1i64, -1, 0][(i + j) % 3]).collect())
            .collect()
    }

    #[test]
    fn honest_proof_verifies_for_both_servers() {
        let params = test_parameters(4, 65537, 10, 6);
        let v = [3, -5, 12, 0];
        let (s1, s2) = split(&v, 65537);
        let challenge = rows(6, 4);
        let proven = BoundProof::prove(&params, CTX, &challenge, [&s1[..], &s2[..]]).unwrap();
        assert!(proven.out_of_bound_rows.is_empty());
        for (k, share) in [&s1, &s2].into_iter().enumerate() {
            proven
                .proof
                .verify(&params, CTX, &challenge, k, share, &proven.witnesses[k])
                .unwrap();
        }
    }

    #[test]
    fn out_of_bound_projection_is_rejected() {
        let params = test_parameters(4, 65537, 10, 3);
        let v = [30000, 0, 0, 0];
        let (s1, s2) = split(&v, 65537);
        let challenge = vec![vec![0, 1, 0, 0], vec![1, 0, 0, 0], vec![0, 0, 1, 0]];
        let proven = BoundProof::prove(&params, CTX, &challenge, [&s1[..], &s2[..]]).unwrap();
        assert_eq!(proven.out_of_bound_rows, vec![1]);
        let err = proven
            .proof
            .verify(&params, CTX, &challenge, 0, &s1, &proven.witnesses[0])
            .unwrap_err();
        assert!(matches!(err, P4pError::ProofVerificationFailed { row: 1, .. }));
    }

    #[test]
    fn proof_is_bound_to_its_context() {
        let params = test_parameters(4, 65537, 10, 2);
        let (s1, s2) = split(&[1, 2, 3, 4], 65537);
        let challenge = rows(2, 4);
        let proven = BoundProof::prove(&params, CTX, &challenge, [&s1[..], &s2[..]]).unwrap();
        let replay = ProofContext {
            round_id: 2,
            peer_id: "peer-a",
        };
        assert!(proven
            .proof
            .verify(&params, replay, &challenge, 0, &s1, &proven.witnesses[0])
            .is_err());
        assert_ne!(proven.proof.digest(CTX), proven.proof.digest(replay));
    }

    #[test]
    fn mismatched_share_or_response_is_rejected() {
        let params = test_parameters(4, 65537, 10, 2);
        let (s1, s2) = split(&[1, 2, 3, 4], 65537);
        let challenge = rows(2, 4);
        let proven = BoundProof::prove(&params, CTX, &challenge, [&s1[..], &s2[..]]).unwrap();
        // Server 0 receiving the wrong share.
        assert!(proven
            .proof
            .verify(&params, CTX, &challenge, 0, &s2, &proven.witnesses[0])
            .is_err());
        let mut forged = proven.witnesses[1].clone();
        forged.openings[0] = (&forged.openings[0] + 1u8) % params.group().order();
        assert!(proven
            .proof
            .verify(&params, CTX, &challenge, 1, &s2, &forged)
            .is_err());
    }

    #[test]
    fn shape_errors_are_dimension_mismatches() {
        let params = test_parameters(4, 65537, 10, 2);
        let s = vec![0; 4];
        assert!(matches!(
            BoundProof::prove(&params, CTX, &rows(3, 4), [&s[..], &s[..]]),
            Err(P4pError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(matches!(
            BoundProof::prove(&params, CTX, &rows(2, 4), [&s[..], &s[..3]]),
            Err(P4pError::DimensionMismatch { expected: 4, actual: 3 })
        ));
    }
}
