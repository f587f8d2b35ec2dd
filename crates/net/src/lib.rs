//! Non-blocking peer-to-peer networking: the framed session state machine
//! and the scheduler that drives a fleet of them.

pub mod buffer;
pub mod queue;
pub mod session;

pub use queue::{Inbound, QueueManager};
pub use session::{Role, Session, SessionEvent};
