//! The replication scheduler and the in-memory log it reconciles into:
//! periodic outbound pushes, clock-skew adjustment, and deduplication.

pub mod driver;
pub mod error;
pub mod reconcile;
pub mod store;

pub use driver::{ingest_replicated_payload, marshal_and_broadcast_new_plots, Replicator, REPL_INTERVAL_SECS};
pub use error::ReconcileError;
pub use reconcile::{reconcile, SKEW_WINDOW};
pub use store::PlotStore;
