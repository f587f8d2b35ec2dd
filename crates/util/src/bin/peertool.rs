//! Adds or updates a single entry in a peer-list file, creating it if
//! absent. Grounded on `authenticator`'s `gen_users` bin: read the existing
//! config (tolerating a missing file as empty), apply one change, write the
//! whole thing back.

use std::collections::HashMap;
use std::net::SocketAddr;

use clap::{App, Arg};
use driftwatch_keys::{load_peers, write_peers};

fn main() {
    let matches = App::new("driftwatch-peertool")
        .version("0.1.0")
        .about("Adds or updates a peer-list entry")
        .arg(
            Arg::with_name("PEER_FILE")
                .help("Path to the peer-list TOML file")
                .required(true),
        )
        .arg(Arg::with_name("NODE_ID").help("The peer's node id").required(true))
        .arg(
            Arg::with_name("ADDRESS")
                .help("The peer's `ip:port`")
                .required(true),
        )
        .get_matches();

    let peer_file_path = matches.value_of("PEER_FILE").unwrap();
    let node_id: u32 = matches.value_of("NODE_ID").unwrap().parse().unwrap_or_else(|_| {
        eprintln!("NODE_ID must be a valid 32-bit integer");
        std::process::exit(2);
    });
    let address: SocketAddr = matches.value_of("ADDRESS").unwrap().parse().unwrap_or_else(|_| {
        eprintln!("ADDRESS must be a valid `ip:port`");
        std::process::exit(2);
    });

    let mut peers: HashMap<u32, SocketAddr> = match load_peers(peer_file_path) {
        Ok(peers) => peers,
        Err(_) => {
            println!("no existing peer list at `{}`, starting a new one", peer_file_path);
            HashMap::new()
        }
    };

    peers.insert(node_id, address);

    write_peers(peer_file_path, &peers).unwrap_or_else(|e| {
        eprintln!("failed to write peer file `{}`: {}", peer_file_path, e);
        std::process::exit(1);
    });

    println!("peer {} -> {} written to `{}`", node_id, address, peer_file_path);
}
