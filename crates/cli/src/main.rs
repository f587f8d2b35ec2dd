//! `driftwatchd` — wires configuration, logging, and the replication loop
//! together. Everything in this binary is ambient/collaborator material per
//! spec.md §1; the hard core lives in `driftwatch-proto`/`-net`/`-replicator`.
//!
//! Grounded on the teacher's `gamerunner`/`authenticator` binaries for CLI
//! shape (`clap`'s `App`/`Arg` builder, as in `util::gen_keys`) and on
//! `flux::logging::init` for wiring a terminal `slog` sink at startup.

use std::net::SocketAddr;
use std::process;
use std::sync::atomic::Ordering;

use clap::{App, Arg};

use driftwatch_keys::{load_key, load_peers};
use driftwatch_net::QueueManager;
use driftwatch_proto::logging::{self, error, info, warn};
use driftwatch_replicator::Replicator;

fn main() {
    let matches = App::new("driftwatchd")
        .version("0.1.0")
        .about("Peer-to-peer drone-sighting replication daemon")
        .arg(Arg::with_name("NODE_ID").help("This node's id").required(true))
        .arg(Arg::with_name("IP").help("Local bind address").required(true))
        .arg(Arg::with_name("PORT").help("Local bind port").required(true))
        .arg(
            Arg::with_name("offset")
                .long("offset")
                .takes_value(true)
                .default_value("0")
                .help("Simulated clock offset, in seconds"),
        )
        .arg(
            Arg::with_name("time-mult")
                .long("time-mult")
                .takes_value(true)
                .default_value("1.0")
                .help("Simulated time multiplier (2.0 = twice real speed)"),
        )
        .arg(
            Arg::with_name("verbosity")
                .long("verbosity")
                .takes_value(true)
                .default_value("1")
                .help("Log verbosity, 0 (warn) through 3 (trace)"),
        )
        .arg(
            Arg::with_name("key-file")
                .long("key-file")
                .takes_value(true)
                .default_value("driftwatch.key")
                .help("Path to the pre-shared symmetric key"),
        )
        .arg(
            Arg::with_name("peer-file")
                .long("peer-file")
                .takes_value(true)
                .default_value("peers.toml")
                .help("Path to the static peer list"),
        )
        .get_matches();

    let node_id: u32 = matches.value_of("NODE_ID").unwrap().parse().unwrap_or_else(|_| {
        eprintln!("NODE_ID must be a valid 32-bit integer");
        process::exit(2);
    });
    let ip = matches.value_of("IP").unwrap();
    let port: u16 = matches.value_of("PORT").unwrap().parse().unwrap_or_else(|_| {
        eprintln!("PORT must be a valid 16-bit integer");
        process::exit(2);
    });
    let offset: f64 = matches.value_of("offset").unwrap().parse().unwrap_or(0.0);
    let time_mult: f64 = matches.value_of("time-mult").unwrap().parse().unwrap_or(1.0);
    let verbosity: u8 = matches.value_of("verbosity").unwrap().parse().unwrap_or(1);

    let log = logging::init(verbosity);

    let key = match load_key(matches.value_of("key-file").unwrap()) {
        Ok(key) => key,
        Err(e) => {
            error!(log, "failed to load symmetric key"; "error" => %e);
            process::exit(1);
        }
    };

    let peers = match load_peers(matches.value_of("peer-file").unwrap()) {
        Ok(peers) => peers,
        Err(e) => {
            error!(log, "failed to load peer list"; "error" => %e);
            process::exit(1);
        }
    };

    let bind_addr: SocketAddr = match format!("{}:{}", ip, port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(log, "invalid bind address"; "ip" => ip, "port" => port, "error" => %e);
            process::exit(2);
        }
    };

    let mut queue = match QueueManager::new(node_id, key, log.clone()) {
        Ok(queue) => queue,
        Err(e) => {
            error!(log, "failed to initialize queue manager"; "error" => %e);
            process::exit(1);
        }
    };
    for (peer_id, addr) in peers {
        queue.add_peer(peer_id, addr);
    }

    if let Err(e) = queue.bind(bind_addr) {
        error!(log, "failed to bind listening socket"; "address" => %bind_addr, "error" => %e);
        process::exit(1);
    }

    let mut replicator = Replicator::new(node_id, queue, offset, time_mult, log.clone());

    let shutdown_flag = replicator.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::Relaxed);
    }) {
        warn!(log, "failed to install SIGINT/SIGTERM handler"; "error" => %e);
    }

    info!(log, "driftwatchd starting"; "node_id" => node_id, "bind" => %bind_addr);

    if let Err(e) = replicator.run() {
        error!(log, "replication loop exited with an unrecoverable error"; "error" => %e);
        process::exit(1);
    }

    info!(log, "driftwatchd shut down cleanly");
}
