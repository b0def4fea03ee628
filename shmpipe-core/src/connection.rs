// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! A primary-transport connection with an optional shared memory fast path.
//!
//! [`ShmConnection`] starts out as a thin wrapper over its primary
//! transport. [`ShmConnection::initiate`] creates a region and offers it to
//! the peer; once the peer acknowledges, payload reads and writes go through
//! the region. Any setup failure is recorded and leaves the connection on the
//! primary transport, so the owner can carry on as if nothing was attempted.

use std::io;

use crate::config::ShmConfig;
use crate::error::ShmError;
use crate::handshake::{
    evaluate_reply, open_command, HandshakeMode, HandshakeOutcome, HandshakeState,
    HandshakeStateMachine,
};
use crate::liveness::FdProbe;
use crate::primary::{PrimaryTransport, Reply};
use crate::shm::{Client, SharedRegion};
use crate::transport::ShmStream;

/// Client-side stream type used once the handshake is established.
pub type ClientStream = ShmStream<Client, FdProbe>;

enum Link {
    /// Plain primary transport.
    Primary,
    /// Region offered, waiting for the peer's reply.
    Offered(SharedRegion<Client>),
    /// Payload goes through shared memory.
    Active(ClientStream),
}

/// Connection that upgrades itself to shared memory when the peer agrees.
pub struct ShmConnection<P: PrimaryTransport> {
    primary: P,
    config: ShmConfig,
    handshake: HandshakeStateMachine,
    link: Link,
    last_error: Option<ShmError>,
}

impl<P: PrimaryTransport> ShmConnection<P> {
    pub fn new(primary: P, config: ShmConfig) -> Self {
        Self {
            primary,
            config,
            handshake: HandshakeStateMachine::new(),
            link: Link::Primary,
            last_error: None,
        }
    }

    /// Create a region and offer it to the peer.
    ///
    /// In [`HandshakeMode::Synchronous`] this blocks on the primary transport
    /// until the reply arrives. In [`HandshakeMode::Deferred`] it returns
    /// `Pending` once the command is sent; the reply must then be passed to
    /// [`Self::complete_handshake`]. Calling it again after the first time
    /// only reports the current outcome.
    pub fn initiate(&mut self, mode: HandshakeMode) -> HandshakeOutcome {
        if self.handshake.state() != HandshakeState::Created {
            return self.outcome();
        }

        let region =
            match SharedRegion::<Client>::create(&self.config.name_prefix, self.config.ring_capacity)
            {
                Ok(region) => region,
                Err(e) => return self.fail(e),
            };

        let command = match region.name() {
            Some(name) => open_command(self.config.protocol_version, name),
            None => {
                return self.fail(ShmError::InvalidLayout {
                    name: region.label().to_string(),
                    reason: "region has no name to advertise".to_string(),
                })
            }
        };
        self.link = Link::Offered(region);

        if let Err(e) = self.primary.send_command(&command) {
            return self.fail(ShmError::ResourceUnavailable {
                step: "sending SHM OPEN",
                source: e,
            });
        }
        self.advance(HandshakeState::CommandSent);

        match mode {
            HandshakeMode::Deferred => HandshakeOutcome::Pending,
            HandshakeMode::Synchronous => match self.primary.read_reply() {
                Ok(reply) => self.complete_handshake(reply),
                Err(e) => self.fail(ShmError::ResourceUnavailable {
                    step: "reading SHM OPEN reply",
                    source: e,
                }),
            },
        }
    }

    /// Apply the peer's reply to a pending handshake.
    ///
    /// Only the integer `1` establishes the fast path; anything else tears the
    /// region down. Without a pending handshake the reply is ignored and the
    /// current outcome is returned.
    pub fn complete_handshake(&mut self, reply: Reply) -> HandshakeOutcome {
        if !self.handshake.is_pending() {
            tracing::warn!(
                state = self.handshake.state().name(),
                reply = reply.type_name(),
                "Ignoring handshake reply with no handshake pending"
            );
            return self.outcome();
        }

        if let Err(e) = evaluate_reply(&reply) {
            return self.fail(e);
        }

        let Link::Offered(mut region) = std::mem::replace(&mut self.link, Link::Primary) else {
            return self.fail(ShmError::ProtocolRejected {
                reason: "no region was offered".to_string(),
            });
        };

        // The peer has attached: the name is no longer needed.
        if let Err(e) = region.unlink() {
            tracing::warn!(name = %region.label(), error = %e, "Failed to unlink shared memory region");
        }

        let probe = match FdProbe::new(&self.primary) {
            Ok(probe) => probe,
            Err(e) => {
                drop(region);
                return self.fail(ShmError::ResourceUnavailable {
                    step: "duplicating primary descriptor",
                    source: e,
                });
            }
        };

        tracing::info!(
            name = %region.label(),
            capacity = region.capacity(),
            elapsed_us = self.handshake.elapsed().as_micros() as u64,
            "Shared memory transport established"
        );
        self.link = Link::Active(ShmStream::new(region, probe, self.config.stream_options()));
        self.advance(HandshakeState::Established);
        HandshakeOutcome::Established
    }

    fn advance(&mut self, target: HandshakeState) {
        if let Err(e) = self.handshake.transition_to(target) {
            tracing::error!(error = %e, "Unexpected handshake transition");
        }
    }

    fn fail(&mut self, error: ShmError) -> HandshakeOutcome {
        tracing::warn!(error = %error, "Shared memory unavailable, staying on primary transport");
        self.link = Link::Primary;
        self.handshake.fail();
        self.last_error = Some(error);
        HandshakeOutcome::Failed
    }

    fn outcome(&self) -> HandshakeOutcome {
        match self.handshake.state() {
            HandshakeState::Created | HandshakeState::CommandSent => HandshakeOutcome::Pending,
            HandshakeState::Established => HandshakeOutcome::Established,
            HandshakeState::Failed | HandshakeState::Closed => HandshakeOutcome::Failed,
        }
    }

    /// Release the region and close the handshake. I/O falls back to the
    /// primary transport. Idempotent.
    pub fn teardown(&mut self) {
        match std::mem::replace(&mut self.link, Link::Primary) {
            Link::Primary => {}
            Link::Offered(region) => region.destroy(),
            Link::Active(stream) => stream.into_region().destroy(),
        }
        self.handshake.close();
    }

    pub fn state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Payload currently goes through shared memory.
    pub fn is_shared_memory_active(&self) -> bool {
        matches!(self.link, Link::Active(_))
    }

    /// The most recent setup failure, if any.
    pub fn last_error(&self) -> Option<&ShmError> {
        self.last_error.as_ref()
    }

    pub fn config(&self) -> &ShmConfig {
        &self.config
    }

    /// Switch shared memory I/O between blocking and non-blocking.
    ///
    /// The primary transport's own mode is left to its owner.
    pub fn set_blocking(&mut self, blocking: bool) {
        self.config.blocking = blocking;
        if let Link::Active(stream) = &mut self.link {
            stream.set_blocking(blocking);
        }
    }

    pub fn stream(&self) -> Option<&ClientStream> {
        match &self.link {
            Link::Active(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn primary_mut(&mut self) -> &mut P {
        &mut self.primary
    }

    /// Tear down and hand back the primary transport.
    pub fn into_primary(mut self) -> P {
        self.teardown();
        self.primary
    }
}

impl<P: PrimaryTransport> io::Read for ShmConnection<P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.link {
            Link::Active(stream) => io::Read::read(stream, buf),
            _ => io::Read::read(&mut self.primary, buf),
        }
    }
}

impl<P: PrimaryTransport> io::Write for ShmConnection<P> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.link {
            Link::Active(stream) => io::Write::write(stream, buf),
            _ => io::Write::write(&mut self.primary, buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.link {
            Link::Active(stream) => io::Write::flush(stream),
            _ => io::Write::flush(&mut self.primary),
        }
    }
}

impl<P: PrimaryTransport> std::fmt::Debug for ShmConnection<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = match &self.link {
            Link::Primary => "primary",
            Link::Offered(_) => "offered",
            Link::Active(_) => "shared-memory",
        };
        f.debug_struct("ShmConnection")
            .field("state", &self.handshake.state())
            .field("link", &link)
            .field("last_error", &self.last_error)
            .finish()
    }
}
