// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Negotiating the switch from the primary transport to shared memory.

mod protocol;
mod state;

pub use protocol::{
    evaluate_reply, open_command, respond_to_open, OpenRequest, OPEN_ACCEPTED, OPEN_REFUSED,
    PROTOCOL_VERSION,
};
pub use state::{HandshakeState, HandshakeStateMachine};

/// How [`crate::ShmConnection::initiate`] waits for the peer's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeMode {
    /// Block on the primary transport until the reply arrives.
    #[default]
    Synchronous,
    /// Return once the command is sent; the caller feeds the reply back later
    /// through [`crate::ShmConnection::complete_handshake`].
    Deferred,
}

/// Result of a handshake step, as seen by the owning connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Command sent, reply not processed yet.
    Pending,
    /// Payload traffic now goes through shared memory.
    Established,
    /// Shared memory unavailable; the primary transport is still in use.
    Failed,
}
