// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Handshake state machine with typed state transitions.
//!
//! Implements the negotiation lifecycle: Created → CommandSent → Established,
//! with Failed and Closed reachable from every non-terminal state.
//! Invalid transitions result in StateTransitionError.

use std::time::Instant;

use crate::error::StateTransitionError;

/// Handshake lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Region constructed, nothing sent yet.
    Created,

    /// `SHM OPEN` sent over the primary transport, waiting for the reply.
    CommandSent,

    /// Peer acknowledged; payload traffic goes through shared memory.
    Established,

    /// Setup or negotiation failed; the region is gone. Terminal.
    Failed,

    /// Torn down by the owner; the region is gone. Terminal.
    Closed,
}

impl HandshakeState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::CommandSent => "CommandSent",
            Self::Established => "Established",
            Self::Failed => "Failed",
            Self::Closed => "Closed",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: HandshakeState) -> bool {
        matches!(
            (self, target),
            (Self::Created, Self::CommandSent)
                | (Self::Created, Self::Failed)
                | (Self::CommandSent, Self::Established)
                | (Self::CommandSent, Self::Failed)
                | (Self::Created, Self::Closed)
                | (Self::CommandSent, Self::Closed)
                | (Self::Established, Self::Closed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State machine for one connection's handshake.
#[derive(Debug)]
pub struct HandshakeStateMachine {
    current_state: HandshakeState,
    started: Instant,
}

impl Default for HandshakeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: HandshakeState::Created,
            started: Instant::now(),
        }
    }

    /// Get the current state.
    pub fn state(&self) -> HandshakeState {
        self.current_state
    }

    /// Time since the handshake started.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: HandshakeState) -> Result<(), StateTransitionError> {
        if self.current_state.is_terminal() {
            return Err(StateTransitionError::TerminalState {
                state: self.current_state.name(),
            });
        }
        if !self.current_state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            from = self.current_state.name(),
            to = target.name(),
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "Handshake transition"
        );

        self.current_state = target;
        Ok(())
    }

    /// Move to Failed from wherever we are, unless already terminal.
    pub fn fail(&mut self) {
        if !self.current_state.is_terminal() {
            self.current_state = HandshakeState::Failed;
        }
    }

    /// Move to Closed from wherever we are, unless already terminal.
    pub fn close(&mut self) {
        if !self.current_state.is_terminal() {
            tracing::debug!(from = self.current_state.name(), "Handshake closed");
            self.current_state = HandshakeState::Closed;
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self.current_state, HandshakeState::Established)
    }

    /// Waiting for a deferred reply.
    pub fn is_pending(&self) -> bool {
        matches!(self.current_state, HandshakeState::CommandSent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = HandshakeStateMachine::new();
        assert_eq!(sm.state(), HandshakeState::Created);
        assert!(!sm.is_established());
    }

    #[test]
    fn test_valid_transitions() {
        let mut sm = HandshakeStateMachine::new();

        assert!(sm.transition_to(HandshakeState::CommandSent).is_ok());
        assert!(sm.is_pending());

        assert!(sm.transition_to(HandshakeState::Established).is_ok());
        assert!(sm.is_established());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut sm = HandshakeStateMachine::new();

        // Created → Established skips the command
        assert!(sm.transition_to(HandshakeState::Established).is_err());
        assert_eq!(sm.state(), HandshakeState::Created);

        sm.transition_to(HandshakeState::CommandSent).unwrap();
        sm.transition_to(HandshakeState::Established).unwrap();

        // Established never goes back
        assert!(sm.transition_to(HandshakeState::CommandSent).is_err());
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut sm = HandshakeStateMachine::new();
        sm.transition_to(HandshakeState::CommandSent).unwrap();
        sm.transition_to(HandshakeState::Failed).unwrap();

        assert!(matches!(
            sm.transition_to(HandshakeState::Established),
            Err(StateTransitionError::TerminalState { state: "Failed" })
        ));

        sm.fail();
        assert_eq!(sm.state(), HandshakeState::Failed);
        sm.close();
        assert_eq!(sm.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_close_from_established() {
        let mut sm = HandshakeStateMachine::new();
        sm.transition_to(HandshakeState::CommandSent).unwrap();
        sm.transition_to(HandshakeState::Established).unwrap();

        sm.close();
        assert_eq!(sm.state(), HandshakeState::Closed);
        assert!(!sm.is_established());
        assert!(sm.state().is_terminal());

        sm.fail();
        assert_eq!(sm.state(), HandshakeState::Closed);
        assert!(matches!(
            sm.transition_to(HandshakeState::CommandSent),
            Err(StateTransitionError::TerminalState { state: "Closed" })
        ));
    }
}
