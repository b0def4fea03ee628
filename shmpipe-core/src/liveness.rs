// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Peer liveness detection for spin loops.
//!
//! Nothing in shared memory tells a spinning reader that the other process
//! died. The primary transport's descriptor does, but asking it costs a few
//! syscalls, so [`LivenessMonitor`] only consults its [`PeerProbe`] on every
//! Nth spin iteration.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::types::SamplingInterval;

/// Answers "has the peer gone away?".
///
/// Implementations must not block or panic.
pub trait PeerProbe {
    fn peer_closed(&mut self) -> bool;
}

impl<F: FnMut() -> bool> PeerProbe for F {
    fn peer_closed(&mut self) -> bool {
        self()
    }
}

/// Probes the primary transport's descriptor.
///
/// Polls for readability without waiting. If readable, reads one byte with
/// the descriptor temporarily switched to non-blocking: end-of-file or a hard
/// error means the peer closed the connection. While shared memory carries the
/// payload, nothing else is expected on the descriptor.
#[derive(Debug)]
pub struct FdProbe {
    fd: OwnedFd,
}

impl FdProbe {
    /// Probe a duplicate of `fd`; the duplicate shares the open file description.
    pub fn new(fd: impl AsFd) -> io::Result<Self> {
        Ok(Self {
            fd: fd.as_fd().try_clone_to_owned()?,
        })
    }

    fn readable(&self) -> bool {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(0) | Err(_) => false,
            Ok(_) => fds[0].revents().is_some_and(|ev| !ev.is_empty()),
        }
    }

    fn read_one_byte(&self) -> Result<usize, Errno> {
        let raw = self.fd.as_raw_fd();
        let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
        let was_blocking = !flags.contains(OFlag::O_NONBLOCK);
        if was_blocking {
            fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        }

        let mut byte = [0u8; 1];
        let result = nix::unistd::read(raw, &mut byte);

        if was_blocking {
            if let Err(errno) = fcntl(raw, FcntlArg::F_SETFL(flags)) {
                tracing::warn!(error = %errno, "Failed to restore blocking mode on primary descriptor");
            }
        }
        result
    }
}

impl PeerProbe for FdProbe {
    fn peer_closed(&mut self) -> bool {
        if !self.readable() {
            return false;
        }
        match self.read_one_byte() {
            Ok(0) => true,
            Ok(_) => false,
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => false,
            Err(_) => true,
        }
    }
}

/// Iteration counter and sampling interval for one blocking call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessSample {
    pub iteration: u64,
    pub interval: SamplingInterval,
}

/// Decides on which spin iterations the probe runs.
///
/// Create one per blocking call; the counter starts at zero.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    sample: LivenessSample,
}

impl LivenessMonitor {
    pub fn new(interval: SamplingInterval) -> Self {
        Self {
            sample: LivenessSample {
                iteration: 0,
                interval,
            },
        }
    }

    /// Count one spin iteration and probe if it is a sampled one.
    ///
    /// Returns `true` when the connection is broken.
    #[inline]
    pub fn tick<P: PeerProbe + ?Sized>(&mut self, probe: &mut P) -> bool {
        self.sample.iteration = self.sample.iteration.wrapping_add(1);
        let iteration = self.sample.iteration;
        if iteration == 0 || iteration % self.sample.interval.get() != 0 {
            return false;
        }

        let broken = probe.peer_closed();
        if broken {
            tracing::debug!(iteration = iteration, "Peer closed the primary transport");
        }
        broken
    }

    pub fn sample(&self) -> LivenessSample {
        self.sample
    }

    pub fn reset(&mut self) {
        self.sample.iteration = 0;
    }
}
