// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! shmpipe Core Library
//!
//! Shared memory fast path for a connection that already has a socket.
//! Provides lock-free SPSC byte rings in a POSIX shared memory region, the
//! `SHM OPEN` handshake that offers the region to the peer, a liveness
//! monitor for spin loops, and a transport adapter with socket-like
//! blocking and non-blocking read/write semantics.

pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod liveness;
pub mod primary;
pub mod shm;
pub mod spin;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigLoader, ShmConfig};
pub use connection::{ClientStream, ShmConnection};
pub use error::{
    HardValidationError, RingError, ShmError, ShmPipeError, ShmResult, StateTransitionError,
};
pub use handshake::{HandshakeMode, HandshakeOutcome, HandshakeState};
pub use liveness::{FdProbe, LivenessMonitor, PeerProbe};
pub use primary::{PrimaryTransport, Reply, RespTransport};
pub use shm::{Client, Server, SharedRegion};
pub use spin::{BusySpin, SpinStrategy, YieldSpin};
pub use transport::{ShmStream, StreamOptions};
pub use types::{RegionName, RingCapacity, SamplingInterval};
