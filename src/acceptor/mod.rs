//! Bill acceptor over a poll/response serial protocol.
//!
//! `frames` holds the literal command frames, the denomination table and the
//! response decoder; `session` runs the polling worker that owns the serial
//! handle for the lifetime of one session.

pub mod frames;
pub mod session;

pub use frames::{denomination, ResponseLayout};
pub use session::{AcceptorLink, AcceptorTiming, SessionState};
