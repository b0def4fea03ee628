// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmpipe loopback` command - Round trips through an in-process echo peer.
//!
//! The client and the peer share a socketpair as their primary transport.
//! The client offers a region, the peer attaches it, and every message then
//! travels through shared memory and back.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::thread::JoinHandle;
use std::time::Instant;

use shmpipe_core::handshake::respond_to_open;
use shmpipe_core::{
    ConfigLoader, FdProbe, HandshakeMode, HandshakeOutcome, RespTransport, ShmConfig,
    ShmConnection, ShmStream,
};
use thiserror::Error;

#[derive(Debug, Error)]
enum LoopbackError {
    #[error("Shared memory handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Echo mismatch in message {message}")]
    EchoMismatch { message: usize },

    #[error("Message size must be greater than 0")]
    EmptyMessage,
}

pub fn execute(
    config_path: Option<&str>,
    messages: usize,
    size: usize,
    non_blocking: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if size == 0 {
        return Err(LoopbackError::EmptyMessage.into());
    }

    let mut config = match config_path {
        Some(path) => ConfigLoader::load_file(path)?,
        None => ShmConfig::default(),
    };
    let peer_config = config.clone();
    if non_blocking {
        config.blocking = false;
    }

    let (client_sock, peer_sock) = UnixStream::pair()?;
    let peer = spawn_echo_peer(peer_sock, peer_config);

    let mut conn = ShmConnection::new(RespTransport::new(client_sock), config);
    if conn.initiate(HandshakeMode::Synchronous) != HandshakeOutcome::Established {
        let reason = conn
            .last_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Err(LoopbackError::HandshakeFailed(reason).into());
    }

    let chunk_len = conn.config().ring_capacity.usable();
    let message: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let mut echo = vec![0u8; size];

    println!(
        "Sending {} message(s) of {} bytes ({}, ring {})",
        messages,
        size,
        if non_blocking { "non-blocking" } else { "blocking" },
        conn.config().ring_capacity
    );

    let start = Instant::now();
    for index in 0..messages {
        // Never queue more than one ring's worth, or both sides block on full rings.
        for (sent, received) in message.chunks(chunk_len).zip(echo.chunks_mut(chunk_len)) {
            write_fully(&mut conn, sent)?;
            read_fully(&mut conn, received)?;
        }
        if echo != message {
            return Err(LoopbackError::EchoMismatch { message: index }.into());
        }
    }
    let elapsed = start.elapsed();

    // Closing the primary transport tells the peer to stop.
    drop(conn);
    let echoed = peer.join().map_err(|_| "echo peer panicked")??;

    let total = (messages * size) as f64;
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    println!("✓ {} bytes echoed", echoed);
    println!();
    println!("Results:");
    println!("  Elapsed:        {:.3} ms", secs * 1e3);
    println!("  Round trips/s:  {:.0}", messages as f64 / secs);
    println!("  Throughput:     {:.2} MiB/s", total / secs / (1024.0 * 1024.0));
    if messages > 0 {
        println!(
            "  Avg round trip: {:.2} µs",
            elapsed.as_micros() as f64 / messages as f64
        );
    }

    Ok(())
}

fn spawn_echo_peer(stream: UnixStream, config: ShmConfig) -> JoinHandle<io::Result<usize>> {
    std::thread::spawn(move || -> io::Result<usize> {
        let mut primary = RespTransport::new(stream);
        let Some(command) = primary.read_command()? else {
            return Ok(0);
        };
        let (reply, region) = respond_to_open(&command);
        primary.send_reply(&reply)?;

        let Some(region) = region else {
            return Ok(0);
        };
        let probe = FdProbe::new(primary.get_ref())?;
        let mut options = config.stream_options();
        options.blocking = true;
        let mut server = ShmStream::new(region, probe, options);

        let mut echoed = 0;
        let mut buf = vec![0u8; config.ring_capacity.usable()];
        loop {
            let n = server.read(&mut buf)?;
            if n == 0 {
                tracing::debug!(echoed = echoed, "Echo peer done");
                return Ok(echoed);
            }
            server.write_all(&buf[..n])?;
            echoed += n;
        }
    })
}

fn write_fully(conn: &mut impl Write, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match conn.write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::hint::spin_loop(),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn read_fully(conn: &mut impl Read, mut buf: &mut [u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match conn.read(buf) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => buf = &mut std::mem::take(&mut buf)[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::hint::spin_loop(),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
