// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Byte-stream I/O over an established shared memory region.
//!
//! [`ShmStream`] gives a region the read/write semantics of a socket:
//! blocking calls spin until they make progress or the peer is gone,
//! non-blocking calls make one attempt and report `WouldBlock`.

use std::io;

use crate::error::ShmError;
use crate::liveness::{LivenessMonitor, PeerProbe};
use crate::shm::{SharedRegion, Side};
use crate::spin::{BusySpin, SpinStrategy};
use crate::types::SamplingInterval;

/// Writes up to this many bytes are all-or-nothing by default.
pub const DEFAULT_ATOMIC_WRITE_THRESHOLD: usize = libc::PIPE_BUF;

/// Per-stream I/O behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub blocking: bool,
    /// Requests of at most this many bytes are copied whole or not at all.
    pub atomic_write_threshold: usize,
    pub liveness_interval: SamplingInterval,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            blocking: true,
            atomic_write_threshold: DEFAULT_ATOMIC_WRITE_THRESHOLD,
            liveness_interval: SamplingInterval::default(),
        }
    }
}

/// One side of an established region, used as a byte stream.
///
/// The side type decides which ring is written and which is read. Once the
/// probe reports the peer gone, the stream stays broken: reads drain what is
/// left and then return end-of-stream, writes fail with broken pipe.
pub struct ShmStream<S: Side, P: PeerProbe, W: SpinStrategy = BusySpin> {
    region: SharedRegion<S>,
    probe: P,
    spin: W,
    options: StreamOptions,
    peer_closed: bool,
}

impl<S: Side, P: PeerProbe> ShmStream<S, P, BusySpin> {
    pub fn new(region: SharedRegion<S>, probe: P, options: StreamOptions) -> Self {
        Self::with_spin(region, probe, BusySpin, options)
    }
}

impl<S: Side, P: PeerProbe, W: SpinStrategy> ShmStream<S, P, W> {
    pub fn with_spin(region: SharedRegion<S>, probe: P, spin: W, options: StreamOptions) -> Self {
        Self {
            region,
            probe,
            spin,
            options,
            peer_closed: false,
        }
    }

    pub fn region(&self) -> &SharedRegion<S> {
        &self.region
    }

    pub fn region_mut(&mut self) -> &mut SharedRegion<S> {
        &mut self.region
    }

    pub fn into_region(self) -> SharedRegion<S> {
        self.region
    }

    pub fn options(&self) -> StreamOptions {
        self.options
    }

    pub fn set_blocking(&mut self, blocking: bool) {
        self.options.blocking = blocking;
    }

    pub fn is_blocking(&self) -> bool {
        self.options.blocking
    }

    /// The peer has been confirmed gone.
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Bytes queued for this side to read.
    pub fn available(&self) -> usize {
        self.region.inbound().used_space()
    }

    fn mark_peer_closed(&mut self) {
        if !self.peer_closed {
            tracing::debug!(name = %self.region.label(), side = S::NAME, "Shared memory peer is gone");
            self.peer_closed = true;
        }
    }

    /// Copy `bytes` into the outbound ring.
    ///
    /// Returns how many bytes were copied. Zero-length requests succeed at
    /// once. With no progress the error is `ConnectionBroken` if the peer is
    /// gone, `WouldBlock` otherwise.
    pub fn send(&mut self, bytes: &[u8]) -> Result<usize, ShmError> {
        if bytes.is_empty() {
            return Ok(0);
        }
        if self.peer_closed {
            return Err(ShmError::ConnectionBroken);
        }

        // A request that can never fit whole is chunked regardless of the threshold.
        let usable = self.region.capacity() - 1;
        let atomic = bytes.len() <= self.options.atomic_write_threshold.min(usable);
        let mut monitor = LivenessMonitor::new(self.options.liveness_interval);
        let mut written = 0;

        loop {
            let remaining = &bytes[written..];
            let (mut producer, _) = self.region.split();
            let free = producer.free_space();
            let chunk = if atomic && free < remaining.len() {
                0
            } else {
                free.min(remaining.len())
            };

            if chunk > 0 {
                producer
                    .write(&remaining[..chunk])
                    .map_err(|e| ShmError::InvalidLayout {
                        name: self.region.label().to_string(),
                        reason: e.to_string(),
                    })?;
                written += chunk;
                if written == bytes.len() {
                    return Ok(written);
                }
            }

            if !self.options.blocking {
                break;
            }
            if monitor.tick(&mut self.probe) {
                self.mark_peer_closed();
                break;
            }
            self.spin.idle();
        }

        if written > 0 {
            Ok(written)
        } else if self.peer_closed {
            Err(ShmError::ConnectionBroken)
        } else {
            Err(ShmError::WouldBlock)
        }
    }

    /// Copy up to `buf.len()` bytes out of the inbound ring.
    ///
    /// Returns as soon as anything is available. `Ok(0)` is end-of-stream:
    /// the peer is gone and the ring is drained.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ShmError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut monitor = LivenessMonitor::new(self.options.liveness_interval);
        loop {
            let (_, mut consumer) = self.region.split();
            let n = consumer.read(buf);
            if n > 0 {
                return Ok(n);
            }
            if self.peer_closed {
                return Ok(0);
            }
            if !self.options.blocking {
                return Err(ShmError::WouldBlock);
            }
            if monitor.tick(&mut self.probe) {
                // One more pass drains anything written just before the close.
                self.mark_peer_closed();
                continue;
            }
            self.spin.idle();
        }
    }
}

impl<S: Side, P: PeerProbe, W: SpinStrategy> io::Read for ShmStream<S, P, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf).map_err(io::Error::from)
    }
}

impl<S: Side, P: PeerProbe, W: SpinStrategy> io::Write for ShmStream<S, P, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: Side, P: PeerProbe, W: SpinStrategy> std::fmt::Debug for ShmStream<S, P, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmStream")
            .field("region", &self.region)
            .field("options", &self.options)
            .field("peer_closed", &self.peer_closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::{Client, Server};
    use crate::spin::YieldSpin;
    use crate::types::RingCapacity;
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn regions(capacity: usize) -> (SharedRegion<Client>, SharedRegion<Server>) {
        let client =
            SharedRegion::<Client>::create("shmpipe-test", RingCapacity::new(capacity).unwrap())
                .unwrap();
        let name = client.name().unwrap().clone();
        let server = SharedRegion::<Server>::attach(&name).unwrap();
        (client, server)
    }

    fn options(blocking: bool, threshold: usize) -> StreamOptions {
        StreamOptions {
            blocking,
            atomic_write_threshold: threshold,
            liveness_interval: SamplingInterval::new(1).unwrap(),
        }
    }

    fn alive() -> bool {
        false
    }

    #[test]
    fn test_atomic_write_waits_for_room() {
        let (client, server) = regions(16);
        let mut client = ShmStream::new(client, alive, options(false, 64));
        let mut server = ShmStream::new(server, alive, options(false, 64));

        assert_eq!(client.send(&[1u8; 10]).unwrap(), 10);
        // 5 bytes free, 10 requested: nothing is copied.
        assert!(matches!(client.send(&[2u8; 10]), Err(ShmError::WouldBlock)));

        let mut buf = [0u8; 16];
        assert_eq!(server.recv(&mut buf).unwrap(), 10);
        assert_eq!(client.send(&[2u8; 10]).unwrap(), 10);
        assert_eq!(server.recv(&mut buf).unwrap(), 10);
        assert_eq!(&buf[..10], &[2u8; 10]);
    }

    #[test]
    fn test_blocking_atomic_write_waits_until_room_accrues() {
        let (client, server) = regions(16);
        let mut server = ShmStream::new(server, alive, options(false, 10));
        let attempts = AtomicUsize::new(0);

        std::thread::scope(|s| {
            let writer = s.spawn(|| {
                let probe = || {
                    attempts.fetch_add(1, Ordering::AcqRel);
                    false
                };
                let mut client =
                    ShmStream::with_spin(client, probe, YieldSpin, options(true, 10));
                assert_eq!(client.send(&[1u8; 10]).unwrap(), 10);
                client.send(&[2u8; 10])
            });

            // The second send has retried at least once with only 5 bytes free.
            while attempts.load(Ordering::Acquire) < 3 {
                std::thread::yield_now();
            }
            assert_eq!(server.available(), 10);

            let mut first = [0u8; 5];
            assert_eq!(server.recv(&mut first).unwrap(), 5);
            assert_eq!(first, [1u8; 5]);

            assert_eq!(writer.join().unwrap().unwrap(), 10);
        });

        assert_eq!(server.available(), 15);
        let mut rest = [0u8; 16];
        assert_eq!(server.recv(&mut rest).unwrap(), 15);
        assert_eq!(&rest[..5], &[1u8; 5]);
        assert_eq!(&rest[5..15], &[2u8; 10]);
    }

    #[test]
    fn test_non_atomic_write_is_partial() {
        let (client, _server) = regions(16);
        let mut client = ShmStream::new(client, alive, options(false, 0));

        assert_eq!(client.send(&[1u8; 10]).unwrap(), 10);
        assert_eq!(client.send(&[2u8; 10]).unwrap(), 5);
        assert!(matches!(client.send(&[3u8; 1]), Err(ShmError::WouldBlock)));
    }

    #[test]
    fn test_oversized_request_is_chunked() {
        let (client, _server) = regions(16);
        let mut client = ShmStream::new(client, alive, options(false, 4096));

        // Larger than the ring: never atomic.
        assert_eq!(client.send(&[7u8; 40]).unwrap(), 15);
    }

    #[test]
    fn test_empty_requests() {
        let (client, _server) = regions(16);
        let mut client = ShmStream::new(client, alive, options(false, 0));

        assert_eq!(client.send(&[]).unwrap(), 0);
        assert_eq!(client.recv(&mut []).unwrap(), 0);
    }

    #[test]
    fn test_non_blocking_read_on_empty_ring() {
        let (_client, server) = regions(16);
        let mut server = ShmStream::new(server, alive, options(false, 0));

        let err = server.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_broken_peer_is_end_of_stream() {
        let (client, server) = regions(16);
        let mut client = ShmStream::new(client, alive, options(false, 0));
        let mut server = ShmStream::new(server, || true, options(true, 0));

        client.send(b"last").unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(server.recv(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"last");
        assert_eq!(server.recv(&mut buf).unwrap(), 0);
        assert!(server.is_peer_closed());

        // Sticky, even in non-blocking mode.
        server.set_blocking(false);
        assert_eq!(server.recv(&mut buf).unwrap(), 0);

        let err = server.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_blocking_write_to_full_ring_with_dead_peer() {
        let (client, _server) = regions(16);
        let mut calls = 0;
        let probe = move || {
            calls += 1;
            calls >= 3
        };
        let mut client = ShmStream::new(client, probe, options(true, 0));

        // Fills the ring, then spins until the probe gives up.
        assert_eq!(client.send(&[1u8; 20]).unwrap(), 15);
        assert!(client.is_peer_closed());
        assert!(matches!(client.send(&[1u8; 1]), Err(ShmError::ConnectionBroken)));
    }

    #[test]
    fn test_blocking_transfer_across_threads() {
        let (client, server) = regions(16);
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let done = AtomicBool::new(false);

        let received = std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let probe = || done.load(Ordering::Acquire);
                let mut server =
                    ShmStream::with_spin(server, probe, YieldSpin, options(true, 8));
                let mut out = Vec::new();
                server.read_to_end(&mut out).unwrap();
                out
            });

            let mut client = ShmStream::with_spin(client, alive, YieldSpin, options(true, 8));
            client.write_all(&payload).unwrap();
            // Wait until the reader drained everything before "closing".
            while client.region().outbound().used_space() > 0 {
                std::thread::yield_now();
            }
            done.store(true, Ordering::Release);
            reader.join().unwrap()
        });

        assert_eq!(received, payload);
    }
}
