// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared Memory IPC module.
//!
//! POSIX shared memory holding a pair of lock-free SPSC byte rings, one per
//! direction, shared by exactly one client and one server process.

mod region;
mod ring_buffer;

pub use region::{
    region_size, unique_name, Client, Direction, Server, SharedRegion, Side, LAYOUT_VERSION,
};
pub use ring_buffer::{Consumer, LocalRing, Producer, RingBuffer};

#[cfg(test)]
pub(crate) use region::name_is_linked;
