#![deny(missing_docs)]

//! # p4p
//!
//! **p4p** implements two-server private vector aggregation with zero-knowledge
//! norm bounds.  Every peer holds a private integer vector.  It splits the
//! vector into two additive shares over `Z_F`, sends one share to each of two
//! non-colluding servers, and proves that the vector's projections onto the
//! round's challenge rows are small.  That proof bounds its L2 norm without
//! revealing the vector.  Each server verifies and accumulates the shares it
//! receives; adding the two accumulators recovers the sum of every admitted
//! vector and nothing else.
//!
//! ## Layout
//!
//! * [`field`], [`bytes`], [`digest`]: canonical arithmetic in `Z_F`, secure
//!   sampling, hash-to-field and fixed-width byte codecs.
//! * [`vector`]: inner products, `laxpy`, modular vector sums and reductions.
//! * [`params`]: validated [`ProtocolParameters`], the Pedersen
//!   [`CommitmentGroup`] and the JSON [`ProtocolConfig`].
//! * [`commit`], [`transcript`], [`proof`]: commitments, OR-membership sigma
//!   proofs and the per-row bound proof.
//! * [`peer`], [`server`], [`messages`]: the protocol participants and the
//!   plain data they exchange.
//! * [`audit`]: hashed, newline-delimited round records.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use p4p::{combine_aggregates, Peer, ProtocolConfig, Server};
//!
//! let config = ProtocolConfig::from_json_str(r#"{ "m": 4, "F": 65537, "l": 10 }"#)?;
//! let params = config.into_parameters()?;
//! let first = Server::new(0, params.clone())?;
//! let second = Server::new(1, params.clone())?;
//!
//! let challenge = first.generate_challenge_vectors()?;
//! second.install_challenge(&challenge)?;
//!
//! let mut peer = Peer::with_params("alice", params.clone());
//! peer.set_vector(&[3, -5, 12, 0])?;
//! let submission = peer.compute_proof_responses(&challenge)?;
//! first.verify_and_accumulate(&submission.first)?;
//! second.verify_and_accumulate(&submission.second)?;
//!
//! first.finalize_sum()?;
//! second.finalize_sum()?;
//! let total = combine_aggregates(
//!     &first.get_aggregate(challenge.round_id)?,
//!     &second.get_aggregate(challenge.round_id)?,
//!     params.field_order(),
//! )?;
//! assert_eq!(total, vec![3, -5, 12, 0]);
//! # Ok::<(), p4p::P4pError>(())
//! ```

pub mod audit;
pub mod bytes;
pub mod commit;
pub mod digest;
mod error;
pub mod field;
pub mod messages;
pub mod params;
pub mod peer;
pub mod proof;
pub mod server;
pub mod transcript;
pub mod vector;

pub use audit::{parse_record, verify_record_lines, write_record, AuditRecord};
pub use digest::{hash_to_field, DigestAlgorithm};
pub use error::{P4pError, P4pResult};
pub use field::{
    canonical_mod, itor, random_field_element, random_field_element_u64, rtoi, Field,
    STATISTICAL_SECURITY_BITS,
};
pub use messages::{
    Admission, AggregateMessage, ChallengeMatrix, ChallengeMessage, RoundSubmission,
    ShareSubmission, SubmitOutcome,
};
pub use params::{
    CommitmentGroup, GroupConfig, ProtocolConfig, ProtocolParameters, DEFAULT_ZKP_ITERATIONS,
};
pub use peer::{Peer, ShareSplit};
pub use proof::{BoundProof, ServerWitness};
pub use server::{combine_aggregates, RoundState, Server};
pub use vector::{inner_product, laxpy, rand_vector, vector_add, vector_three_add, FieldVector};
