//! Command-line driver for in-process P4P rounds.
//!
//! `simulate` runs a set of peers against two servers for one or more rounds
//! and checks the recombined aggregate against the plaintext sum.
//! `verify-audit` checks the digest of a round record written by `simulate`.

use std::{env, fs, path::PathBuf, process};

use p4p::{
    audit::store_record, combine_aggregates, rand_vector, vector_add, Peer, ProtocolConfig,
    ProtocolParameters, Server,
};
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

const DEFAULT_CONFIG: &str = r#"{ "m": 4, "F": 65537, "l": 10 }"#;

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    process::exit(1);
}

fn print_help() {
    println!("Usage: p4p <simulate|verify-audit> ...");
    println!("  simulate [--config FILE] [--peers N] [--norm X] [--rounds R] [--audit-dir DIR] [--log-json]");
    println!("  verify-audit FILE");
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

struct SimulateOptions {
    config: Option<PathBuf>,
    peers: usize,
    norm: Option<f64>,
    rounds: usize,
    audit_dir: Option<PathBuf>,
    log_json: bool,
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> T {
    let value = value.unwrap_or_else(|| fatal(&format!("{flag} needs a value")));
    value
        .parse()
        .unwrap_or_else(|_| fatal(&format!("invalid value for {flag}: {value}")))
}

fn parse_simulate(args: Vec<String>) -> SimulateOptions {
    let mut opts = SimulateOptions {
        config: None,
        peers: 3,
        norm: None,
        rounds: 1,
        audit_dir: None,
        log_json: false,
    };
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => opts.config = Some(parse_value("--config", iter.next())),
            "--peers" => opts.peers = parse_value("--peers", iter.next()),
            "--norm" => opts.norm = Some(parse_value("--norm", iter.next())),
            "--rounds" => opts.rounds = parse_value("--rounds", iter.next()),
            "--audit-dir" => opts.audit_dir = Some(parse_value("--audit-dir", iter.next())),
            "--log-json" => opts.log_json = true,
            "-h" | "--help" => {
                print_help();
                process::exit(0);
            }
            other => fatal(&format!("unknown simulate option {other}")),
        }
    }
    if opts.peers == 0 || opts.rounds == 0 {
        fatal("--peers and --rounds must be positive");
    }
    opts
}

fn load_parameters(path: Option<&PathBuf>) -> ProtocolParameters {
    let config = match path {
        Some(path) => ProtocolConfig::from_path(path),
        None => ProtocolConfig::from_json_str(DEFAULT_CONFIG),
    }
    .unwrap_or_else(|err| fatal(&format!("configuration error: {err}")));
    config
        .into_parameters()
        .unwrap_or_else(|err| fatal(&format!("invalid parameters: {err}")))
}

fn cmd_simulate(args: Vec<String>) {
    let opts = parse_simulate(args);
    init_tracing(opts.log_json);
    let params = load_parameters(opts.config.as_ref());
    let f = params.field_order();
    let m = params.dimension();
    let norm = opts.norm.unwrap_or(params.max_norm() as f64 / 2.0);
    info!(
        m,
        f,
        l = params.norm_bits(),
        n = params.iterations(),
        peers = opts.peers,
        norm,
        "starting simulation"
    );

    let servers = [
        Server::new(0, params.clone()).unwrap_or_else(|err| fatal(&err.to_string())),
        Server::new(1, params.clone()).unwrap_or_else(|err| fatal(&err.to_string())),
    ];
    let mut peers: Vec<Peer> = (0..opts.peers)
        .map(|i| Peer::with_params(format!("peer-{i}"), params.clone()))
        .collect();

    for _ in 0..opts.rounds {
        for server in &servers {
            server.init();
        }
        let challenge = servers[0]
            .generate_challenge_vectors()
            .unwrap_or_else(|err| fatal(&err.to_string()));
        servers[1]
            .install_challenge(&challenge)
            .unwrap_or_else(|err| fatal(&err.to_string()));

        let mut expected = vec![0; m];
        for peer in &mut peers {
            let vector = rand_vector(m, f, norm).unwrap_or_else(|err| fatal(&err.to_string()));
            peer.set_vector(&vector)
                .unwrap_or_else(|err| fatal(&err.to_string()));
            let submission = peer
                .compute_proof_responses(&challenge)
                .unwrap_or_else(|err| fatal(&err.to_string()));
            let outcomes: Vec<bool> = servers
                .iter()
                .enumerate()
                .map(|(k, server)| {
                    let share = submission.for_server(k).unwrap_or_else(|| fatal("no share"));
                    server
                        .submit_share(share)
                        .unwrap_or_else(|err| fatal(&err.to_string()))
                        .is_accepted()
                })
                .collect();
            if outcomes.iter().all(|&ok| ok) {
                let mut next = vec![0; m];
                vector_add(&expected, peer.vector(), &mut next, f)
                    .unwrap_or_else(|err| fatal(&err.to_string()));
                expected = next;
            } else {
                warn!(peer = peer.id(), "peer not admitted by both servers");
            }
        }

        let finalized: Vec<_> = servers
            .iter()
            .map(|server| {
                server
                    .finalize_sum()
                    .and_then(|_| server.get_aggregate(challenge.round_id))
                    .unwrap_or_else(|err| fatal(&err.to_string()))
            })
            .collect();
        let first = servers[0]
            .reconcile(&finalized[1])
            .unwrap_or_else(|err| fatal(&err.to_string()));
        let second = servers[1]
            .reconcile(&finalized[0])
            .unwrap_or_else(|err| fatal(&err.to_string()));
        if let Some(dir) = &opts.audit_dir {
            for (k, server) in servers.iter().enumerate() {
                let record = server
                    .audit_record()
                    .unwrap_or_else(|err| fatal(&err.to_string()));
                let path = store_record(dir, &format!("server{k}"), &record)
                    .unwrap_or_else(|err| fatal(&format!("failed to write audit record: {err}")));
                info!(path = %path.display(), "audit record written");
            }
        }
        let total =
            combine_aggregates(&first, &second, f).unwrap_or_else(|err| fatal(&err.to_string()));
        println!(
            "round {}: admitted {} of {} peers, aggregate {:?}",
            challenge.round_id,
            first.admitted.len(),
            peers.len(),
            total
        );
        if total != expected {
            fatal(&format!(
                "aggregate mismatch in round {}: expected {expected:?}",
                challenge.round_id
            ));
        }
    }
}

fn cmd_verify_audit(args: Vec<String>) {
    let path = args
        .first()
        .unwrap_or_else(|| fatal("Usage: p4p verify-audit FILE"));
    let text = fs::read_to_string(path)
        .unwrap_or_else(|err| fatal(&format!("failed to read {path}: {err}")));
    match p4p::verify_record_lines(text.lines()) {
        Ok(record) => println!(
            "{path}: round {} ok ({} admitted, {} rejected)",
            record.round_id,
            record.admitted.len(),
            record.rejected.len()
        ),
        Err(err) => fatal(&format!("{path}: {err}")),
    }
}

fn main() {
    let mut args = env::args().skip(1);
    let command = args.next();
    match command.as_deref() {
        Some("simulate") => cmd_simulate(args.collect()),
        Some("verify-audit") => cmd_verify_audit(args.collect()),
        Some("-h") | Some("--help") => print_help(),
        _ => {
            print_help();
            process::exit(1);
        }
    }
}
