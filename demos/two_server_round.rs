use p4p::{combine_aggregates, P4pError, Peer, ProtocolConfig, Server, SubmitOutcome};

fn main() -> Result<(), P4pError> {
    let params = ProtocolConfig::from_json_str(r#"{ "m": 4, "F": 65537, "l": 10, "N": 20 }"#)?
        .into_parameters()?;
    let first = Server::new(0, params.clone())?;
    let second = Server::new(1, params.clone())?;
    let challenge = first.generate_challenge_vectors()?;
    second.install_challenge(&challenge)?;

    let vectors: [(&str, [i64; 4]); 3] = [
        ("alice", [3, -5, 12, 0]),
        ("bob", [100, 200, -300, 7]),
        ("mallory", [30000, 0, 0, 0]),
    ];
    for (id, vector) in vectors {
        let mut peer = Peer::with_params(id, params.clone());
        peer.set_vector(&vector)?;
        let submission = peer.compute_proof_responses(&challenge)?;
        for (server, share) in [(&first, &submission.first), (&second, &submission.second)] {
            match server.submit_share(share)? {
                SubmitOutcome::Accepted { proof_digest } => {
                    println!("server {} admitted {id} ({})", server.index(), &proof_digest[..16])
                }
                SubmitOutcome::Rejected(reason) => {
                    println!("server {} rejected {id}: {reason}", server.index())
                }
            }
        }
    }

    first.finalize_sum()?;
    second.finalize_sum()?;
    let a = first.get_aggregate(challenge.round_id)?;
    let b = second.get_aggregate(challenge.round_id)?;
    // Keep only peers both servers admitted.
    let total = combine_aggregates(
        &first.reconcile(&b)?,
        &second.reconcile(&a)?,
        params.field_order(),
    )?;
    println!("aggregate of admitted peers: {total:?}");
    Ok(())
}
