//! Errors raised while folding a replicated payload into the local log.
//! Always fatal to the *payload*, never to the process or the session that
//! delivered it (spec.md §7).

#[derive(Debug, Eq, PartialEq)]
pub enum ReconcileError {
    /// The payload failed the marshalling gate in
    /// [`crate::driver::ingest_replicated_payload`]: too short, or its
    /// declared count doesn't match the bytes actually present.
    MalformedBatch,
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::MalformedBatch => f.write_str("malformed replication batch"),
        }
    }
}

impl std::error::Error for ReconcileError {}
