// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for shmpipe.
//!
//! Explicit enum error types, one per concern, folded into [`ShmPipeError`].
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for shmpipe.
#[derive(Debug, Error)]
pub enum ShmPipeError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Handshake State Machine Errors
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    // =========================================================================
    // Shared Memory Transport Errors - Recoverable, Primary Transport Remains
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] ShmError),

    #[error("Ring buffer error: {0}")]
    Ring(#[from] RingError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Hard validation errors reject a configuration before any region exists.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// Handshake state machine errors.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition handshake from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Handshake is in terminal state: {state}")]
    TerminalState { state: &'static str },
}

/// Shared memory transport errors.
///
/// Setup variants (`ResourceExhaustion`, `ResourceUnavailable`,
/// `ProtocolRejected`) mean "shared-memory transport unavailable" and leave
/// the connection on its primary transport. `WouldBlock` is a normal
/// non-blocking outcome.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("Resource exhaustion during {step}: {source}")]
    ResourceExhaustion {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Resource unavailable during {step}: {source}")]
    ResourceUnavailable {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Peer rejected shared memory transport: {reason}")]
    ProtocolRejected { reason: String },

    #[error("Invalid shared memory layout in {name}: {reason}")]
    InvalidLayout { name: String, reason: String },

    #[error("Connection broken - peer closed the primary transport")]
    ConnectionBroken,

    #[error("Operation would block")]
    WouldBlock,
}

impl ShmError {
    /// Whether the connection keeps working on its primary transport.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ConnectionBroken)
    }
}

impl From<ShmError> for io::Error {
    fn from(err: ShmError) -> Self {
        let kind = match &err {
            ShmError::ResourceExhaustion { .. } => io::ErrorKind::OutOfMemory,
            ShmError::ResourceUnavailable { .. } => io::ErrorKind::AddrNotAvailable,
            ShmError::ProtocolRejected { .. } => io::ErrorKind::ConnectionRefused,
            ShmError::InvalidLayout { .. } => io::ErrorKind::InvalidData,
            ShmError::ConnectionBroken => io::ErrorKind::BrokenPipe,
            ShmError::WouldBlock => io::ErrorKind::WouldBlock,
        };
        io::Error::new(kind, err)
    }
}

/// Ring buffer contract violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("Ring buffer full - cannot write {requested} bytes, {available} free")]
    InsufficientSpace { requested: usize, available: usize },

    #[error("Invalid ring capacity: {capacity} (minimum {min})")]
    InvalidCapacity { capacity: usize, min: usize },
}

/// Result type alias using ShmPipeError.
pub type ShmResult<T> = Result<T, ShmPipeError>;
