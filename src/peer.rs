//! A participant holding one private vector.
//!
//! Each round the peer splits its vector into two additive shares, one per
//! server, and proves the vector's projections onto the published challenge
//! rows are bounded.  Shares are drawn fresh every round and discarded once
//! the proof has been produced.

use num_bigint::BigUint;
use tracing::{debug, warn};

use crate::error::{P4pError, P4pResult};
use crate::messages::{ChallengeMessage, RoundSubmission, ShareSubmission};
use crate::params::ProtocolParameters;
use crate::proof::{BoundProof, ProofContext};
use crate::vector::{l2_norm, uniform_vector, vector_add, FieldVector};

/// Additive split of the peer's vector: `first + second ≡ v (mod F)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSplit {
    /// Share for the first server, uniform over `Z_F^m`.
    pub first: FieldVector,
    /// Share for the second server.
    pub second: FieldVector,
}

impl ShareSplit {
    /// Recombines the two shares modulo `F`.
    pub fn recombine(&self, f: i64) -> P4pResult<FieldVector> {
        let mut out = vec![0; self.first.len()];
        vector_add(&self.first, &self.second, &mut out, f)?;
        Ok(out)
    }
}

/// One protocol participant.
#[derive(Debug, Clone)]
pub struct Peer {
    id: String,
    params: ProtocolParameters,
    vector: FieldVector,
    scratch: Option<ShareSplit>,
}

impl Peer {
    /// Validates `(m, F, l, N, g, h)` and creates a peer holding the zero
    /// vector.
    pub fn new(
        id: impl Into<String>,
        m: usize,
        f: i64,
        l: u32,
        n: usize,
        g: BigUint,
        h: BigUint,
    ) -> P4pResult<Self> {
        let params = ProtocolParameters::new(m, f, l, n, g, h)?;
        Ok(Self::with_params(id, params))
    }

    /// Creates a peer from already validated parameters.
    pub fn with_params(id: impl Into<String>, params: ProtocolParameters) -> Self {
        let m = params.dimension();
        Self {
            id: id.into(),
            params,
            vector: vec![0; m],
            scratch: None,
        }
    }

    /// Peer identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The shared protocol parameters.
    pub fn params(&self) -> &ProtocolParameters {
        &self.params
    }

    /// The private vector.
    pub fn vector(&self) -> &[i64] {
        &self.vector
    }

    /// Replaces the private vector, reducing every coordinate into `Z_F`.
    ///
    /// Any share drawn for the previous vector is discarded.
    pub fn set_vector(&mut self, vector: &[i64]) -> P4pResult<()> {
        let m = self.params.dimension();
        if vector.len() != m {
            return Err(P4pError::dimension(m, vector.len()));
        }
        let field = self.params.field();
        self.vector = vector.iter().map(|&x| field.reduce(x)).collect();
        self.scratch = None;
        Ok(())
    }

    /// Draws a fresh additive split of the current vector.
    pub fn compute_share(&mut self) -> P4pResult<&ShareSplit> {
        let f = self.params.field_order();
        let m = self.params.dimension();
        let first = uniform_vector(m, f)?;
        let field = self.params.field();
        let second = self
            .vector
            .iter()
            .zip(&first)
            .map(|(&v, &s)| field.sub(v, s))
            .collect();
        Ok(self.scratch.insert(ShareSplit { first, second }))
    }

    /// Proves the bound for the published challenge and returns one
    /// submission per server.
    ///
    /// Uses the split from [`Peer::compute_share`] when one is pending and
    /// draws a new one otherwise; the split is consumed either way.  A vector
    /// whose projections exceed the bound still yields a submission, which
    /// the servers will reject.
    pub fn compute_proof_responses(
        &mut self,
        challenge: &ChallengeMessage,
    ) -> P4pResult<RoundSubmission> {
        if self.scratch.is_none() {
            self.compute_share()?;
        }
        let split = self
            .scratch
            .take()
            .ok_or_else(|| P4pError::InvalidParameter("no share available".into()))?;

        let norm = l2_norm(&self.vector);
        if norm > self.params.max_norm() as f64 {
            warn!(
                peer = %self.id,
                norm,
                bound = self.params.max_norm(),
                "vector norm exceeds the admissible bound"
            );
        }
        let ctx = ProofContext {
            round_id: challenge.round_id,
            peer_id: &self.id,
        };
        let proven = BoundProof::prove(
            &self.params,
            ctx,
            challenge.challenge.rows(),
            [split.first.as_slice(), split.second.as_slice()],
        )?;
        if !proven.out_of_bound_rows.is_empty() {
            warn!(
                peer = %self.id,
                round = challenge.round_id,
                rows = ?proven.out_of_bound_rows,
                "projection outside the bound; proof will not verify"
            );
        }
        debug!(peer = %self.id, round = challenge.round_id, "bound proof computed");

        let [first_witness, second_witness] = proven.witnesses;
        Ok(RoundSubmission {
            first: ShareSubmission {
                peer_id: self.id.clone(),
                round_id: challenge.round_id,
                share: split.first,
                witness: first_witness,
                proof: proven.proof.clone(),
            },
            second: ShareSubmission {
                peer_id: self.id.clone(),
                round_id: challenge.round_id,
                share: split.second,
                witness: second_witness,
                proof: proven.proof,
            },
        })
    }
}
