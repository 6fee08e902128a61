//! Error type shared by every protocol component.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type P4pResult<T> = Result<T, P4pError>;

/// Errors raised by field arithmetic, vector algebra, peers and servers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum P4pError {
    #[error("invalid parameter: {0}")]
    /// A protocol parameter or argument is outside its admissible range.
    InvalidParameter(String),
    #[error("dimension mismatch (expected {expected}, got {actual})")]
    /// Two operands of a vector operation have different lengths.
    DimensionMismatch {
        /// Length required by the operation.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },
    #[error("digest unavailable: {0}")]
    /// The requested hash primitive is not provided by this build.
    DigestUnavailable(String),
    #[error("proof verification failed at row {row}: {reason}")]
    /// A peer's responses do not satisfy the bound proof for the current challenge.
    ProofVerificationFailed {
        /// Challenge row whose check failed.
        row: usize,
        /// Human readable description of the failed check.
        reason: String,
    },
    #[error("round {round} is closed")]
    /// The round has been finalised and accepts no further shares.
    RoundClosed {
        /// Identifier of the closed round.
        round: u64,
    },
    #[error("invalid round state (expected {expected}, currently {actual})")]
    /// An operation was attempted in a state that does not permit it.
    InvalidRoundState {
        /// State required by the operation.
        expected: &'static str,
        /// State the server is currently in.
        actual: &'static str,
    },
    #[error("round mismatch (current round {expected}, submission for {actual})")]
    /// A message refers to a round other than the one in progress.
    RoundMismatch {
        /// Round the server is running.
        expected: u64,
        /// Round named by the message.
        actual: u64,
    },
    #[error("peer {peer_id} already submitted a share this round")]
    /// The peer has already been admitted in this round.
    DuplicateSubmission {
        /// Identifier of the offending peer.
        peer_id: String,
    },
    #[error("aggregates disagree: {0}")]
    /// Two server aggregates cannot be combined.
    AggregateMismatch(String),
    #[error("configuration error: {0}")]
    /// A configuration file could not be read or decoded.
    Config(String),
}

impl P4pError {
    /// Returns `true` for outcomes that concern a single submission and leave
    /// the round usable for every other peer.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProofVerificationFailed { .. }
                | Self::DuplicateSubmission { .. }
                | Self::RoundMismatch { .. }
        )
    }

    pub(crate) fn dimension(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    pub(crate) fn rejected(row: usize, reason: impl Into<String>) -> Self {
        Self::ProofVerificationFailed {
            row,
            reason: reason.into(),
        }
    }
}
