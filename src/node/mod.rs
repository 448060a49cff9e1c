//! The two node personalities built on the shared core
//!
//! A server node runs on the robot: it owns the motor registry, broadcasts
//! positions and heartbeats, and executes inbound commands. A client node
//! runs on the operator host and transcodes between the wire protocol and
//! line-delimited JSON on stdio.

mod client;
mod server;

pub use client::ClientNode;
pub use server::ServerNode;

/// Scratch buffer size for inbound datagrams, comfortably above
/// [`crate::protocol::MTU_BUDGET`].
const RECV_BUF_SIZE: usize = 4096;
