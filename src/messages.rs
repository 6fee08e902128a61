//! Plain data types exchanged between peers, servers and the caller.
//!
//! The crate ships no transport; any RPC, REST or queue layer can carry these
//! values (they all implement `serde::Serialize`/`Deserialize`).

use serde::{Deserialize, Serialize};

use crate::error::{P4pError, P4pResult};
use crate::proof::{BoundProof, ServerWitness};
use crate::vector::FieldVector;

/// `N × m` matrix of challenge rows published once per round.
///
/// Serialized as a bare list of rows; deserialization goes through
/// [`ChallengeMatrix::new`], so a ragged matrix never reaches a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldVector>", into = "Vec<FieldVector>")]
pub struct ChallengeMatrix {
    rows: Vec<FieldVector>,
}

impl TryFrom<Vec<FieldVector>> for ChallengeMatrix {
    type Error = P4pError;

    fn try_from(rows: Vec<FieldVector>) -> P4pResult<Self> {
        Self::new(rows)
    }
}

impl From<ChallengeMatrix> for Vec<FieldVector> {
    fn from(matrix: ChallengeMatrix) -> Self {
        matrix.rows
    }
}

impl ChallengeMatrix {
    /// Wraps rows that must all have the same length.
    pub fn new(rows: Vec<FieldVector>) -> P4pResult<Self> {
        if let Some(first) = rows.first() {
            let m = first.len();
            if let Some(bad) = rows.iter().find(|row| row.len() != m) {
                return Err(P4pError::dimension(m, bad.len()));
            }
        }
        Ok(Self { rows })
    }

    /// The challenge rows.
    pub fn rows(&self) -> &[FieldVector] {
        &self.rows
    }

    /// Number of rows `N`.
    pub fn iterations(&self) -> usize {
        self.rows.len()
    }

    /// Row length `m`, or zero for an empty matrix.
    pub fn dimension(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }
}

/// Server → peer: the challenge for a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeMessage {
    /// Round the matrix belongs to.
    pub round_id: u64,
    /// The published rows.
    pub challenge: ChallengeMatrix,
}

/// Peer → server: one share together with the bound proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareSubmission {
    /// Submitting peer.
    pub peer_id: String,
    /// Round the proof was computed against.
    pub round_id: u64,
    /// The share destined for this server.
    pub share: FieldVector,
    /// Responses and commitment openings for this server.
    pub witness: ServerWitness,
    /// Public proof, identical for both servers.
    pub proof: BoundProof,
}

impl ShareSubmission {
    /// Per-row responses `mod(c_i · share, F)`.
    pub fn responses(&self) -> &[i64] {
        &self.witness.responses
    }
}

/// Everything a peer produces in one round: one submission per server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSubmission {
    /// Submission for the first server.
    pub first: ShareSubmission,
    /// Submission for the second server.
    pub second: ShareSubmission,
}

impl RoundSubmission {
    /// Submission destined for server `index` (0 or 1).
    pub fn for_server(&self, index: usize) -> Option<&ShareSubmission> {
        match index {
            0 => Some(&self.first),
            1 => Some(&self.second),
            _ => None,
        }
    }
}

/// Reply to a share submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitOutcome {
    /// The share was admitted; carries the hex proof digest both servers
    /// compute for this submission.
    Accepted {
        /// Hex BLAKE2b-256 digest of the public proof.
        proof_digest: String,
    },
    /// The share was not admitted.
    Rejected(String),
}

impl SubmitOutcome {
    /// Returns `true` for [`SubmitOutcome::Accepted`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// One admitted peer as recorded by a server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Admission {
    /// Admitted peer.
    pub peer_id: String,
    /// Hex proof digest.
    pub proof_digest: String,
}

/// Server → caller: the finalised accumulator of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMessage {
    /// Round the sum belongs to.
    pub round_id: u64,
    /// This server's accumulator.
    pub sum: FieldVector,
    /// Admitted peers, sorted by peer id.
    pub admitted: Vec<Admission>,
}
