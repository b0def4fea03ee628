// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Smallest usable ring: one data byte plus the permanently empty slot.
pub const MIN_RING_CAPACITY: usize = 2;
/// Largest ring accepted from configuration: 256 MB.
pub const MAX_RING_CAPACITY: usize = 256 * 1024 * 1024;
/// Ring capacity unless configured otherwise.
pub const DEFAULT_RING_CAPACITY: usize = 4096;

/// POSIX `NAME_MAX` for shared memory object names (including the leading `/`).
const MAX_REGION_NAME_LEN: usize = 255;

/// Validated shared memory object name.
///
/// Must start with a single `/`, contain no further `/` or NUL, and fit in
/// `NAME_MAX`. This is the form `shm_open(3)` expects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionName(String);

impl RegionName {
    /// Create a new RegionName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let name = name.into();

        if !name.starts_with('/') || name.len() < 2 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "region_name",
                value: name,
                reason: "Region name must be '/' followed by at least one character"
                    .to_string(),
            });
        }

        if name.len() > MAX_REGION_NAME_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "region_name",
                value: name.clone(),
                reason: format!(
                    "Region name too long: {} chars (max {})",
                    name.len(),
                    MAX_REGION_NAME_LEN
                ),
            });
        }

        if name[1..].chars().any(|c| c == '/' || c == '\0' || c.is_whitespace()) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "region_name",
                value: name,
                reason: "Region name must not contain '/', NUL or whitespace after the prefix"
                    .to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RegionName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RegionName> for String {
    fn from(name: RegionName) -> Self {
        name.0
    }
}

/// Ring buffer capacity in bytes (usable capacity is one less).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct RingCapacity(usize);

impl RingCapacity {
    pub fn new(bytes: usize) -> Result<Self, HardValidationError> {
        if !(MIN_RING_CAPACITY..=MAX_RING_CAPACITY).contains(&bytes) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "ring_capacity",
                value: bytes.to_string(),
                reason: format!(
                    "Must be between {} and {} bytes",
                    MIN_RING_CAPACITY, MAX_RING_CAPACITY
                ),
            });
        }
        Ok(Self(bytes))
    }

    pub fn bytes(&self) -> usize {
        self.0
    }

    /// Bytes that can be queued at once.
    pub fn usable(&self) -> usize {
        self.0 - 1
    }
}

impl Default for RingCapacity {
    fn default() -> Self {
        Self(DEFAULT_RING_CAPACITY)
    }
}

impl fmt::Display for RingCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

impl TryFrom<usize> for RingCapacity {
    type Error = HardValidationError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RingCapacity> for usize {
    fn from(capacity: RingCapacity) -> Self {
        capacity.0
    }
}

/// Spin iterations between two liveness probes unless configured otherwise.
pub const DEFAULT_LIVENESS_INTERVAL: u64 = 1024;

/// How many spin iterations pass between two liveness probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct SamplingInterval(NonZeroU64);

impl SamplingInterval {
    pub fn new(iterations: u64) -> Result<Self, HardValidationError> {
        NonZeroU64::new(iterations)
            .map(Self)
            .ok_or_else(|| HardValidationError::InvalidFieldValue {
                field: "liveness_interval",
                value: iterations.to_string(),
                reason: "Sampling interval must be greater than 0".to_string(),
            })
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl Default for SamplingInterval {
    fn default() -> Self {
        Self(NonZeroU64::MIN.saturating_add(DEFAULT_LIVENESS_INTERVAL - 1))
    }
}

impl fmt::Display for SamplingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every {} iterations", self.0)
    }
}

impl TryFrom<u64> for SamplingInterval {
    type Error = HardValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SamplingInterval> for u64 {
    fn from(interval: SamplingInterval) -> Self {
        interval.get()
    }
}
