//! Aggregation server: challenge publication, share verification and the
//! locked accumulator.
//!
//! A server moves through `Idle → ChallengePublished → Finalized` once per
//! round and returns to `Idle` on [`Server::init`].  Verification of a
//! submission runs under a shared read guard on the round, so many peers can
//! be checked concurrently; only the final fold into `sum` takes the
//! accumulator mutex.  Publishing, finalising and resetting take the write
//! guard and therefore wait for in-flight verifications against the old
//! matrix to drain.
//!
//! Each server admits peers on its own evidence, so a peer can be admitted by
//! one server and rejected by the other.  Admitted shares are kept until the
//! round is reset; after finalising, [`Server::reconcile`] backs out every
//! peer the other server did not admit with the same proof digest, and the
//! two reconciled aggregates then recombine.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::audit::AuditRecord;
use crate::error::{P4pError, P4pResult};
use crate::field::random_field_element_u64;
use crate::messages::{
    Admission, AggregateMessage, ChallengeMatrix, ChallengeMessage, ShareSubmission,
    SubmitOutcome,
};
use crate::params::ProtocolParameters;
use crate::proof::ProofContext;
use crate::vector::{laxpy, vector_add, FieldVector};

/// Lifecycle of a server round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    /// No challenge outstanding.
    Idle,
    /// A challenge is published and shares are accepted.
    ChallengePublished,
    /// The round is closed; the sum can be read.
    Finalized,
}

impl RoundState {
    /// Short name used in errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ChallengePublished => "challenge-published",
            Self::Finalized => "finalized",
        }
    }
}

#[derive(Debug)]
struct AdmittedShare {
    proof_digest: String,
    share: FieldVector,
}

#[derive(Debug)]
struct Accumulator {
    sum: FieldVector,
    admitted: BTreeMap<String, AdmittedShare>,
    rejected: Vec<String>,
}

impl Accumulator {
    fn zero(m: usize) -> Self {
        Self {
            sum: vec![0; m],
            admitted: BTreeMap::new(),
            rejected: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Round {
    state: RoundState,
    round_id: u64,
    challenge: Option<ChallengeMatrix>,
    accumulator: Mutex<Accumulator>,
}

impl Round {
    fn accumulator(&self) -> MutexGuard<'_, Accumulator> {
        self.accumulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn reset(&mut self, m: usize) {
        self.challenge = None;
        *self
            .accumulator
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = Accumulator::zero(m);
    }
}

/// Draws one challenge entry: `-1` and `+1` with probability 1/4 each, `0`
/// otherwise.
fn challenge_entry() -> P4pResult<i64> {
    Ok(match random_field_element_u64(5)? {
        1 => -1,
        2 => 1,
        _ => 0,
    })
}

/// One of the two aggregation servers.
#[derive(Debug)]
pub struct Server {
    index: usize,
    params: ProtocolParameters,
    round: RwLock<Round>,
}

impl Server {
    /// Creates server `index` (0 or 1) in the `Idle` state.
    pub fn new(index: usize, params: ProtocolParameters) -> P4pResult<Self> {
        if index > 1 {
            return Err(P4pError::InvalidParameter(format!(
                "server index must be 0 or 1, got {index}"
            )));
        }
        let m = params.dimension();
        Ok(Self {
            index,
            params,
            round: RwLock::new(Round {
                state: RoundState::Idle,
                round_id: 0,
                challenge: None,
                accumulator: Mutex::new(Accumulator::zero(m)),
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Round> {
        self.round.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Round> {
        self.round.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Which share this server receives.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The shared protocol parameters.
    pub fn params(&self) -> &ProtocolParameters {
        &self.params
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RoundState {
        self.read().state
    }

    /// Identifier of the current (or last) round; zero before the first
    /// publication.
    pub fn round_id(&self) -> u64 {
        self.read().round_id
    }

    /// Resets the accumulator to zero and returns to `Idle`.
    pub fn init(&self) {
        let mut round = self.write();
        round.state = RoundState::Idle;
        round.reset(self.params.dimension());
        debug!(server = self.index, round = round.round_id, "server reset");
    }

    /// Samples a fresh `N × m` challenge matrix and opens the next round.
    ///
    /// Only allowed from `Idle`; a round must be finalised and reset before a
    /// new matrix replaces the old one.
    pub fn generate_challenge_vectors(&self) -> P4pResult<ChallengeMessage> {
        let mut round = self.write();
        if round.state != RoundState::Idle {
            return Err(P4pError::InvalidRoundState {
                expected: RoundState::Idle.as_str(),
                actual: round.state.as_str(),
            });
        }
        let (n, m) = (self.params.iterations(), self.params.dimension());
        let rows = (0..n)
            .map(|_| (0..m).map(|_| challenge_entry()).collect::<P4pResult<Vec<_>>>())
            .collect::<P4pResult<Vec<_>>>()?;
        let challenge = ChallengeMatrix::new(rows)?;
        round.reset(m);
        round.round_id += 1;
        round.challenge = Some(challenge.clone());
        round.state = RoundState::ChallengePublished;
        info!(server = self.index, round = round.round_id, rows = n, "challenge published");
        Ok(ChallengeMessage {
            round_id: round.round_id,
            challenge,
        })
    }

    /// Adopts a challenge published by the other server.
    pub fn install_challenge(&self, message: &ChallengeMessage) -> P4pResult<()> {
        let mut round = self.write();
        if round.state != RoundState::Idle {
            return Err(P4pError::InvalidRoundState {
                expected: RoundState::Idle.as_str(),
                actual: round.state.as_str(),
            });
        }
        if message.round_id <= round.round_id {
            return Err(P4pError::InvalidParameter(format!(
                "round {} is not newer than round {}",
                message.round_id, round.round_id
            )));
        }
        let challenge = &message.challenge;
        if challenge.iterations() != self.params.iterations() {
            return Err(P4pError::dimension(
                self.params.iterations(),
                challenge.iterations(),
            ));
        }
        if challenge.dimension() != self.params.dimension() {
            return Err(P4pError::dimension(
                self.params.dimension(),
                challenge.dimension(),
            ));
        }
        round.reset(self.params.dimension());
        round.round_id = message.round_id;
        round.challenge = Some(challenge.clone());
        round.state = RoundState::ChallengePublished;
        info!(server = self.index, round = round.round_id, "challenge installed");
        Ok(())
    }

    /// Returns the challenge of `round_id` while it is open.
    pub fn publish_challenge(&self, round_id: u64) -> P4pResult<ChallengeMessage> {
        let round = self.read();
        if round.round_id != round_id {
            return Err(P4pError::RoundMismatch {
                expected: round.round_id,
                actual: round_id,
            });
        }
        match (&round.state, &round.challenge) {
            (RoundState::ChallengePublished, Some(challenge)) => Ok(ChallengeMessage {
                round_id,
                challenge: challenge.clone(),
            }),
            (state, _) => Err(P4pError::InvalidRoundState {
                expected: RoundState::ChallengePublished.as_str(),
                actual: state.as_str(),
            }),
        }
    }

    /// Verifies a submission and, if every row checks out, folds its share
    /// into `sum`.
    ///
    /// Returns the admission record.  A rejected share never touches `sum`;
    /// the rejection is recorded for the audit trail and returned as
    /// [`P4pError::ProofVerificationFailed`].
    pub fn verify_and_accumulate(&self, submission: &ShareSubmission) -> P4pResult<Admission> {
        let round = self.read();
        match round.state {
            RoundState::ChallengePublished => {}
            RoundState::Finalized => {
                return Err(P4pError::RoundClosed {
                    round: round.round_id,
                })
            }
            RoundState::Idle => {
                return Err(P4pError::InvalidRoundState {
                    expected: RoundState::ChallengePublished.as_str(),
                    actual: RoundState::Idle.as_str(),
                })
            }
        }
        if submission.round_id != round.round_id {
            return Err(P4pError::RoundMismatch {
                expected: round.round_id,
                actual: submission.round_id,
            });
        }
        let challenge = round.challenge.as_ref().ok_or(P4pError::InvalidRoundState {
            expected: RoundState::ChallengePublished.as_str(),
            actual: RoundState::Idle.as_str(),
        })?;
        let peer_id = submission.peer_id.as_str();
        if round.accumulator().admitted.contains_key(peer_id) {
            return Err(P4pError::DuplicateSubmission {
                peer_id: peer_id.to_string(),
            });
        }

        let ctx = ProofContext {
            round_id: round.round_id,
            peer_id,
        };
        let verified = submission.proof.verify(
            &self.params,
            ctx,
            challenge.rows(),
            self.index,
            &submission.share,
            &submission.witness,
        );
        if let Err(err) = verified {
            if matches!(err, P4pError::ProofVerificationFailed { .. }) {
                round.accumulator().rejected.push(peer_id.to_string());
                warn!(
                    server = self.index,
                    round = round.round_id,
                    peer = peer_id,
                    error = %err,
                    "share rejected"
                );
            }
            return Err(err);
        }
        let proof_digest = hex::encode(submission.proof.digest(ctx));

        let mut acc = round.accumulator();
        if acc.admitted.contains_key(peer_id) {
            return Err(P4pError::DuplicateSubmission {
                peer_id: peer_id.to_string(),
            });
        }
        let mut next = vec![0; acc.sum.len()];
        vector_add(&acc.sum, &submission.share, &mut next, self.params.field_order())?;
        acc.sum = next;
        acc.admitted.insert(
            peer_id.to_string(),
            AdmittedShare {
                proof_digest: proof_digest.clone(),
                share: submission.share.clone(),
            },
        );
        info!(
            server = self.index,
            round = round.round_id,
            peer = peer_id,
            admitted = acc.admitted.len(),
            "share admitted"
        );
        Ok(Admission {
            peer_id: peer_id.to_string(),
            proof_digest,
        })
    }

    /// Transport-facing form of [`Server::verify_and_accumulate`]: per-peer
    /// failures become [`SubmitOutcome::Rejected`], protocol violations stay
    /// errors.
    pub fn submit_share(&self, submission: &ShareSubmission) -> P4pResult<SubmitOutcome> {
        match self.verify_and_accumulate(submission) {
            Ok(admission) => Ok(SubmitOutcome::Accepted {
                proof_digest: admission.proof_digest,
            }),
            Err(err) if err.is_recoverable() => Ok(SubmitOutcome::Rejected(err.to_string())),
            Err(err) => Err(err),
        }
    }

    /// Snapshot of the accumulator without closing the round.
    pub fn current_sum(&self) -> FieldVector {
        self.read().accumulator().sum.clone()
    }

    /// Closes the round and returns `sum`.  Calling it again returns the
    /// same sum.
    pub fn finalize_sum(&self) -> P4pResult<FieldVector> {
        let mut round = self.write();
        match round.state {
            RoundState::ChallengePublished => {
                round.state = RoundState::Finalized;
                let acc = round.accumulator();
                info!(
                    server = self.index,
                    round = round.round_id,
                    admitted = acc.admitted.len(),
                    rejected = acc.rejected.len(),
                    "round finalized"
                );
                Ok(acc.sum.clone())
            }
            RoundState::Finalized => {
                let acc = round.accumulator();
                Ok(acc.sum.clone())
            }
            RoundState::Idle => Err(P4pError::InvalidRoundState {
                expected: RoundState::ChallengePublished.as_str(),
                actual: RoundState::Idle.as_str(),
            }),
        }
    }

    /// The finalised sum of `round_id` with the sorted admission list.
    pub fn get_aggregate(&self, round_id: u64) -> P4pResult<AggregateMessage> {
        let round = self.read();
        if round.state != RoundState::Finalized {
            return Err(P4pError::InvalidRoundState {
                expected: RoundState::Finalized.as_str(),
                actual: round.state.as_str(),
            });
        }
        if round.round_id != round_id {
            return Err(P4pError::RoundMismatch {
                expected: round.round_id,
                actual: round_id,
            });
        }
        let acc = round.accumulator();
        Ok(AggregateMessage {
            round_id,
            sum: acc.sum.clone(),
            admitted: acc
                .admitted
                .iter()
                .map(|(peer_id, entry)| Admission {
                    peer_id: peer_id.clone(),
                    proof_digest: entry.proof_digest.clone(),
                })
                .collect(),
        })
    }

    /// Withdraws every admission that `other` (the other server's aggregate
    /// for the same round) does not share, and returns the reconciled
    /// aggregate.
    ///
    /// A peer stays admitted only if the other server admitted it with the
    /// same proof digest; otherwise its share is subtracted from `sum` and it
    /// is moved to the rejected list.  Running this on both servers, each
    /// against the other's finalised aggregate, leaves both with the
    /// intersection of their admissions.  Reconciling twice is a no-op.
    pub fn reconcile(&self, other: &AggregateMessage) -> P4pResult<AggregateMessage> {
        {
            let round = self.read();
            if round.state != RoundState::Finalized {
                return Err(P4pError::InvalidRoundState {
                    expected: RoundState::Finalized.as_str(),
                    actual: round.state.as_str(),
                });
            }
            if round.round_id != other.round_id {
                return Err(P4pError::RoundMismatch {
                    expected: round.round_id,
                    actual: other.round_id,
                });
            }
            let agreed: BTreeMap<&str, &str> = other
                .admitted
                .iter()
                .map(|a| (a.peer_id.as_str(), a.proof_digest.as_str()))
                .collect();
            let mut acc = round.accumulator();
            let withdrawn: Vec<String> = acc
                .admitted
                .iter()
                .filter(|(peer, entry)| {
                    agreed.get(peer.as_str()).copied() != Some(entry.proof_digest.as_str())
                })
                .map(|(peer, _)| peer.clone())
                .collect();
            for peer in withdrawn {
                if let Some(entry) = acc.admitted.remove(&peer) {
                    laxpy(-1, &entry.share, &mut acc.sum, self.params.field_order())?;
                    warn!(
                        server = self.index,
                        round = round.round_id,
                        peer = %peer,
                        "admission withdrawn; the other server did not admit this proof"
                    );
                    acc.rejected.push(peer);
                }
            }
        }
        self.get_aggregate(other.round_id)
    }

    /// Audit record for the finalised round.
    pub fn audit_record(&self) -> P4pResult<AuditRecord> {
        let round = self.read();
        if round.state != RoundState::Finalized {
            return Err(P4pError::InvalidRoundState {
                expected: RoundState::Finalized.as_str(),
                actual: round.state.as_str(),
            });
        }
        let acc = round.accumulator();
        Ok(AuditRecord {
            round_id: round.round_id,
            params: hex::encode(self.params.fingerprint()),
            admitted: acc
                .admitted
                .iter()
                .map(|(peer, entry)| (peer.clone(), entry.proof_digest.clone()))
                .collect(),
            rejected: acc.rejected.clone(),
            sum: acc.sum.clone(),
        })
    }
}

/// Recombines the two servers' aggregates into the plaintext sum.
///
/// Both servers must report the same round and the same admitted peers with
/// the same proof digests; otherwise the sums cover different sets of peers
/// and [`P4pError::AggregateMismatch`] is returned.  Run [`Server::reconcile`]
/// on both sides first to settle peers only one server admitted.
pub fn combine_aggregates(
    first: &AggregateMessage,
    second: &AggregateMessage,
    f: i64,
) -> P4pResult<FieldVector> {
    if first.round_id != second.round_id {
        return Err(P4pError::AggregateMismatch(format!(
            "rounds differ: {} vs {}",
            first.round_id, second.round_id
        )));
    }
    if first.admitted != second.admitted {
        return Err(P4pError::AggregateMismatch(format!(
            "admitted peers differ in round {}",
            first.round_id
        )));
    }
    let mut out = vec![0; first.sum.len()];
    vector_add(&first.sum, &second.sum, &mut out, f)?;
    Ok(out)
}
