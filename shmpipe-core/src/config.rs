// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Every field has a default, so an empty document is a valid configuration.
//! Any invalid or unknown field results in a HardValidationError before a
//! region is ever created.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HardValidationError, ShmPipeError, ShmResult};
use crate::handshake::PROTOCOL_VERSION;
use crate::transport::{StreamOptions, DEFAULT_ATOMIC_WRITE_THRESHOLD};
use crate::types::{
    RingCapacity, SamplingInterval, DEFAULT_LIVENESS_INTERVAL, DEFAULT_RING_CAPACITY,
};

/// Longest accepted region name prefix.
const MAX_NAME_PREFIX_LEN: usize = 32;

/// Raw configuration as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawShmConfig {
    #[serde(default = "default_ring_capacity")]
    ring_capacity: usize,
    #[serde(default = "default_liveness_interval")]
    liveness_interval: u64,
    #[serde(default = "default_atomic_write_threshold")]
    atomic_write_threshold: usize,
    #[serde(default = "default_protocol_version")]
    protocol_version: u32,
    #[serde(default = "default_name_prefix")]
    name_prefix: String,
    #[serde(default = "default_blocking")]
    blocking: bool,
}

fn default_ring_capacity() -> usize {
    DEFAULT_RING_CAPACITY
}

fn default_liveness_interval() -> u64 {
    DEFAULT_LIVENESS_INTERVAL
}

fn default_atomic_write_threshold() -> usize {
    DEFAULT_ATOMIC_WRITE_THRESHOLD
}

fn default_protocol_version() -> u32 {
    PROTOCOL_VERSION
}

fn default_name_prefix() -> String {
    "shmpipe".to_string()
}

fn default_blocking() -> bool {
    true
}

impl Default for RawShmConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            liveness_interval: default_liveness_interval(),
            atomic_write_threshold: default_atomic_write_threshold(),
            protocol_version: default_protocol_version(),
            name_prefix: default_name_prefix(),
            blocking: default_blocking(),
        }
    }
}

/// Validated shared memory configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShmConfig {
    pub ring_capacity: RingCapacity,
    pub liveness_interval: SamplingInterval,
    pub atomic_write_threshold: usize,
    pub protocol_version: u32,
    pub name_prefix: String,
    pub blocking: bool,
}

impl Default for ShmConfig {
    fn default() -> Self {
        let raw = RawShmConfig::default();
        Self {
            ring_capacity: RingCapacity::default(),
            liveness_interval: SamplingInterval::default(),
            atomic_write_threshold: raw.atomic_write_threshold,
            protocol_version: raw.protocol_version,
            name_prefix: raw.name_prefix,
            blocking: raw.blocking,
        }
    }
}

impl ShmConfig {
    /// I/O options for a stream built from this configuration.
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            blocking: self.blocking,
            atomic_write_threshold: self.atomic_write_threshold,
            liveness_interval: self.liveness_interval,
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> ShmResult<ShmConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ShmPipeError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ShmPipeError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> ShmResult<ShmConfig> {
        // An empty document deserializes to unit, not to a mapping.
        if content.trim().is_empty() {
            return Self::validate(RawShmConfig::default());
        }

        let raw: RawShmConfig =
            serde_yaml::from_str(content).map_err(|e| ShmPipeError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    fn validate(raw: RawShmConfig) -> ShmResult<ShmConfig> {
        let ring_capacity = RingCapacity::new(raw.ring_capacity)?;
        if !ring_capacity.bytes().is_power_of_two() {
            tracing::warn!(
                ring_capacity = ring_capacity.bytes(),
                "Ring capacity is not a power of two"
            );
        }

        let liveness_interval = SamplingInterval::new(raw.liveness_interval)?;

        if raw.protocol_version == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "protocol_version",
                value: raw.protocol_version.to_string(),
                reason: "Protocol version must be at least 1".to_string(),
            }
            .into());
        }

        Self::validate_name_prefix(&raw.name_prefix)?;

        Ok(ShmConfig {
            ring_capacity,
            liveness_interval,
            atomic_write_threshold: raw.atomic_write_threshold,
            protocol_version: raw.protocol_version,
            name_prefix: raw.name_prefix,
            blocking: raw.blocking,
        })
    }

    fn validate_name_prefix(prefix: &str) -> Result<(), HardValidationError> {
        let invalid = |reason: String| HardValidationError::InvalidFieldValue {
            field: "name_prefix",
            value: prefix.to_string(),
            reason,
        };

        if prefix.is_empty() {
            return Err(invalid("Name prefix cannot be empty".to_string()));
        }
        if prefix.len() > MAX_NAME_PREFIX_LEN {
            return Err(invalid(format!(
                "Name prefix too long: {} chars (max {})",
                prefix.len(),
                MAX_NAME_PREFIX_LEN
            )));
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(
                "Name prefix may only contain ASCII letters, digits, '-' and '_'".to_string(),
            ));
        }
        Ok(())
    }
}
