//! Control-plane state: SlateDB-backed store, watch event log,
//! secret store client, and leader election.

pub mod client;
pub mod leader;
pub mod secrets;
pub mod watch;
