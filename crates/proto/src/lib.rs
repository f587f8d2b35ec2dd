//! Wire-level primitives shared by the daemon's networking and replication
//! layers: tag-bracket framing, AES-CFB encryption, the fixed-width
//! sighting-record codec, and the error/logging plumbing they all lean on.

pub mod crypto;
pub mod error;
pub mod logging;
pub mod record;
pub mod tags;

pub use error::{ErrorKind, ErrorUtils, ProtoError, ProtoResult};
pub use record::{RecordBatch, SightingRecord};
