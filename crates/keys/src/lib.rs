//! Loaders for the two out-of-band inputs the core treats as opaque:
//! the pre-shared symmetric key and the static peer list.
//!
//! Grounded on the teacher's `gamecore::config::GameConfig::load` (TOML via
//! `serdeconv`, `expect`-free only at the public API boundary) and
//! `authenticator`'s `gen_users` bin, which reads/writes its own
//! `HashMap`-shaped TOML config the same way the peer list is shaped here.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use driftwatch_proto::crypto::KEY_SIZE;

#[derive(Debug)]
pub enum KeysError {
    Io(std::io::Error),
    WrongKeyLength { expected: usize, found: usize },
    InvalidPeerList(String),
}

impl fmt::Display for KeysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeysError::Io(e) => write!(f, "io error: {}", e),
            KeysError::WrongKeyLength { expected, found } => {
                write!(f, "key file must be exactly {} bytes, found {}", expected, found)
            }
            KeysError::InvalidPeerList(msg) => write!(f, "invalid peer list: {}", msg),
        }
    }
}

impl std::error::Error for KeysError {}

impl From<std::io::Error> for KeysError {
    fn from(e: std::io::Error) -> Self {
        KeysError::Io(e)
    }
}

/// Reads the pre-shared symmetric key as an opaque block of exactly
/// [`KEY_SIZE`] bytes. The core never interprets this beyond its length.
pub fn load_key<P: AsRef<Path>>(path: P) -> Result<[u8; KEY_SIZE], KeysError> {
    let bytes = fs::read(path)?;
    if bytes.len() != KEY_SIZE {
        return Err(KeysError::WrongKeyLength { expected: KEY_SIZE, found: bytes.len() });
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// On-disk shape of the peer-list file: `node_id -> "ip:port"`, one entry
/// per peer. TOML table keys are always strings, so node ids are quoted on
/// disk and parsed back to `u32` here.
#[derive(Serialize, Deserialize, Default)]
struct PeerFile {
    peers: HashMap<String, String>,
}

/// Loads the static peer list: every other node this daemon replicates to,
/// keyed by `node_id`. Loaded once at startup — spec.md §1 explicitly
/// excludes dynamic cluster membership.
pub fn load_peers<P: AsRef<Path>>(path: P) -> Result<HashMap<u32, SocketAddr>, KeysError> {
    let file: PeerFile =
        serdeconv::from_toml_file(path).map_err(|e| KeysError::InvalidPeerList(e.to_string()))?;

    let mut peers = HashMap::with_capacity(file.peers.len());
    for (node_id_str, addr_str) in file.peers {
        let node_id: u32 = node_id_str
            .parse()
            .map_err(|_| KeysError::InvalidPeerList(format!("`{}` is not a valid node id", node_id_str)))?;
        let addr: SocketAddr = addr_str
            .parse()
            .map_err(|_| KeysError::InvalidPeerList(format!("`{}` is not a valid address", addr_str)))?;
        peers.insert(node_id, addr);
    }
    Ok(peers)
}

/// Writes a peer-list file, used by `driftwatch-util`'s peer-list authoring
/// tool and by tests.
pub fn write_peers<P: AsRef<Path>>(path: P, peers: &HashMap<u32, SocketAddr>) -> Result<(), KeysError> {
    let file = PeerFile {
        peers: peers.iter().map(|(id, addr)| (id.to_string(), addr.to_string())).collect(),
    };
    serdeconv::to_toml_file(&file, path).map_err(|e| KeysError::InvalidPeerList(e.to_string()))
}
