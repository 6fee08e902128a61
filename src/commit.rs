//! Pedersen commitments and OR-membership sigma proofs.
//!
//! `Com(x; r) = g^(x mod q) · h^r mod p`.  A [`MembershipProof`] shows that a
//! commitment opens to one value of a small public set without revealing
//! which one (Cramer–Damgård–Schoenmakers composition of Schnorr proofs for
//! knowledge of `log_h(C · g^-s)`).  Challenges come from the caller's
//! [`Transcript`], so a proof is bound to everything recorded before it.

use num_bigint::{BigInt, BigUint};
use serde::{Deserialize, Serialize};

use crate::error::{P4pError, P4pResult};
use crate::params::ProtocolParameters;
use crate::transcript::Transcript;

/// Commits to a signed value with the given randomness.
pub fn commit(params: &ProtocolParameters, value: &BigInt, randomness: &BigUint) -> BigUint {
    let group = params.group();
    let gx = group.exp_signed(params.g(), value);
    let hr = group.exp(params.h(), randomness);
    group.mul(&gx, &hr)
}

/// Returns `true` if `commitment` opens to `value` under `randomness`.
pub fn opens_to(
    params: &ProtocolParameters,
    commitment: &BigUint,
    value: &BigInt,
    randomness: &BigUint,
) -> bool {
    commit(params, value, randomness) == *commitment
}

/// Non-interactive proof that a commitment opens to a member of a public set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipProof {
    /// First-move commitments `A_j`, one per set member.
    pub announcements: Vec<BigUint>,
    /// Per-branch challenges `e_j`; they sum to the transcript challenge.
    pub challenges: Vec<BigUint>,
    /// Per-branch responses `z_j`.
    pub responses: Vec<BigUint>,
}

impl MembershipProof {
    /// Proves that `commitment = Com(value; randomness)` with `value ∈ set`.
    pub fn prove(
        params: &ProtocolParameters,
        transcript: &mut Transcript,
        commitment: &BigUint,
        value: i64,
        randomness: &BigUint,
        set: &[i64],
    ) -> P4pResult<Self> {
        let group = params.group();
        let q = group.order();
        let real = set.iter().position(|&s| s == value).ok_or_else(|| {
            P4pError::InvalidParameter(format!("value {value} is not in the membership set"))
        })?;

        let mut announcements = Vec::with_capacity(set.len());
        let mut challenges = Vec::with_capacity(set.len());
        let mut responses = Vec::with_capacity(set.len());
        let nonce = group.random_exponent()?;
        for (j, &s) in set.iter().enumerate() {
            if j == real {
                announcements.push(group.exp(params.h(), &nonce));
                challenges.push(BigUint::default());
                responses.push(BigUint::default());
                continue;
            }
            let e = group.random_exponent()?;
            let z = group.random_exponent()?;
            let shifted = shifted_commitment(params, commitment, s);
            let inverse_e = (q - &e) % q;
            let a = group.mul(&group.exp(params.h(), &z), &group.exp(&shifted, &inverse_e));
            announcements.push(a);
            challenges.push(e);
            responses.push(z);
        }

        let e = branch_challenge(transcript, commitment, &announcements, q)?;
        let simulated = challenges
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != real)
            .fold(BigUint::default(), |acc, (_, e_j)| (acc + e_j) % q);
        let e_real = (&e + q - simulated) % q;
        responses[real] = (&nonce + &e_real * randomness) % q;
        challenges[real] = e_real;

        Ok(Self {
            announcements,
            challenges,
            responses,
        })
    }

    /// Checks the proof against `commitment` and the same public set.
    pub fn verify(
        &self,
        params: &ProtocolParameters,
        transcript: &mut Transcript,
        commitment: &BigUint,
        set: &[i64],
    ) -> Result<(), String> {
        let group = params.group();
        let q = group.order();
        if self.announcements.len() != set.len()
            || self.challenges.len() != set.len()
            || self.responses.len() != set.len()
        {
            return Err("membership proof has the wrong number of branches".into());
        }
        if self.challenges.iter().chain(&self.responses).any(|x| x >= q) {
            return Err("membership proof scalar out of range".into());
        }
        if !self.announcements.iter().all(|a| group.contains(a)) {
            return Err("membership announcement outside the commitment group".into());
        }
        let e = branch_challenge(transcript, commitment, &self.announcements, q)
            .map_err(|err| err.to_string())?;
        let total = self
            .challenges
            .iter()
            .fold(BigUint::default(), |acc, e_j| (acc + e_j) % q);
        if total != e {
            return Err("membership challenges do not sum to the transcript challenge".into());
        }
        for (j, &s) in set.iter().enumerate() {
            let shifted = shifted_commitment(params, commitment, s);
            let lhs = group.exp(params.h(), &self.responses[j]);
            let rhs = group.mul(
                &self.announcements[j],
                &group.exp(&shifted, &self.challenges[j]),
            );
            if lhs != rhs {
                return Err(format!("membership branch {j} does not verify"));
            }
        }
        Ok(())
    }
}

/// `C · g^-s`, which equals `h^r` exactly when `C` opens to `s`.
fn shifted_commitment(params: &ProtocolParameters, commitment: &BigUint, s: i64) -> BigUint {
    let group = params.group();
    group.mul(commitment, &group.exp_signed(params.g(), &BigInt::from(-s)))
}

fn branch_challenge(
    transcript: &mut Transcript,
    commitment: &BigUint,
    announcements: &[BigUint],
    q: &BigUint,
) -> P4pResult<BigUint> {
    transcript.append_element(commitment);
    for a in announcements {
        transcript.append_element(a);
    }
    transcript.challenge(q)
}
