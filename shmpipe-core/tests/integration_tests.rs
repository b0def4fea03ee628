// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end integration tests for shmpipe.
//!
//! A socketpair stands in for the primary transport; a peer thread plays the
//! server: it answers `SHM OPEN`, attaches the region and echoes whatever
//! arrives through shared memory.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::thread::JoinHandle;

use shmpipe_core::handshake::respond_to_open;
use shmpipe_core::{
    ConfigLoader, FdProbe, HandshakeMode, HandshakeOutcome, HandshakeState, PrimaryTransport,
    Reply, RespTransport, ShmConfig, ShmConnection, ShmError, ShmStream,
};

type Connection = ShmConnection<RespTransport<UnixStream>>;

fn small_config() -> ShmConfig {
    ConfigLoader::load_string("ring_capacity: 64\nliveness_interval: 16\nname_prefix: shmpipe-it")
        .unwrap()
}

fn region_exists(name: &str) -> bool {
    std::path::Path::new("/dev/shm").join(name.trim_start_matches('/')).exists()
}

/// Serve one `SHM OPEN`, then echo shared memory traffic until the client is gone.
fn spawn_echo_peer(stream: UnixStream) -> JoinHandle<usize> {
    std::thread::spawn(move || {
        let mut primary = RespTransport::new(stream);
        let command = primary.read_command().unwrap().unwrap();
        let (reply, region) = respond_to_open(&command);
        primary.send_reply(&reply).unwrap();

        let Some(region) = region else {
            return 0;
        };
        let probe = FdProbe::new(primary.get_ref()).unwrap();
        let mut server = ShmStream::new(region, probe, small_config().stream_options());

        let mut echoed = 0;
        let mut buf = [0u8; 32];
        loop {
            let n = server.read(&mut buf).unwrap();
            if n == 0 {
                return echoed;
            }
            if server.write_all(&buf[..n]).is_err() {
                return echoed;
            }
            echoed += n;
        }
    })
}

/// Answer `SHM OPEN` with a fixed reply and report the advertised name.
fn spawn_scripted_peer(
    stream: UnixStream,
    reply: Reply,
) -> JoinHandle<(String, RespTransport<UnixStream>)> {
    std::thread::spawn(move || {
        let mut primary = RespTransport::new(stream);
        let command = primary.read_command().unwrap().unwrap();
        let name = command.rsplit(' ').next().unwrap().to_string();
        primary.send_reply(&reply).unwrap();
        (name, primary)
    })
}

fn connect(config: ShmConfig) -> (Connection, UnixStream) {
    let (client, server) = UnixStream::pair().unwrap();
    (ShmConnection::new(RespTransport::new(client), config), server)
}

#[test]
fn test_synchronous_handshake_and_echo() {
    let (mut conn, server) = connect(small_config());
    let peer = spawn_echo_peer(server);

    assert_eq!(conn.initiate(HandshakeMode::Synchronous), HandshakeOutcome::Established);
    assert_eq!(conn.state(), HandshakeState::Established);
    assert!(conn.is_shared_memory_active());

    // The name is gone as soon as the peer acknowledged.
    let stream = conn.stream().unwrap();
    assert!(stream.region().name().is_none());
    assert!(!region_exists(stream.region().label()));

    // More than the ring holds, so both directions wrap and block.
    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let mut echoed = vec![0u8; payload.len()];
    let mut sent = 0;
    let mut received = 0;
    while received < payload.len() {
        if sent < payload.len() {
            let end = (sent + 20).min(payload.len());
            conn.write_all(&payload[sent..end]).unwrap();
            sent = end;
        }
        while received < sent {
            received += conn.read(&mut echoed[received..sent]).unwrap();
        }
    }
    assert_eq!(echoed, payload);

    // Closing the primary transport ends the peer's loop.
    drop(conn);
    assert_eq!(peer.join().unwrap(), payload.len());
}

#[test]
fn test_deferred_handshake() {
    let (mut conn, server) = connect(small_config());
    let peer = spawn_echo_peer(server);

    assert_eq!(conn.initiate(HandshakeMode::Deferred), HandshakeOutcome::Pending);
    assert!(!conn.is_shared_memory_active());

    let reply = conn.primary_mut().read_reply().unwrap();
    assert_eq!(conn.complete_handshake(reply), HandshakeOutcome::Established);
    assert!(conn.stream().unwrap().region().name().is_none());

    conn.write_all(b"hello").unwrap();
    let mut buf = [0u8; 5];
    conn.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    drop(conn);
    assert_eq!(peer.join().unwrap(), 5);
}

#[test]
fn test_rejected_handshakes_fall_back_to_primary() {
    for reply in [
        Reply::Integer(0),
        Reply::Error("ERR unknown command 'SHM'".to_string()),
        Reply::Status("OK".to_string()),
        Reply::Bulk(Some(b"1".to_vec())),
    ] {
        let (mut conn, server) = connect(small_config());
        let peer = spawn_scripted_peer(server, reply.clone());

        assert_eq!(
            conn.initiate(HandshakeMode::Synchronous),
            HandshakeOutcome::Failed,
            "{:?}",
            reply
        );
        assert_eq!(conn.state(), HandshakeState::Failed);
        assert!(!conn.is_shared_memory_active());
        assert!(matches!(conn.last_error(), Some(ShmError::ProtocolRejected { .. })));

        let (name, mut peer_primary) = peer.join().unwrap();
        assert!(!region_exists(&name), "{} leaked", name);

        // The primary transport carries on.
        conn.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        peer_primary.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        peer_primary.write_all(b"pong").unwrap();
        conn.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }
}

#[test]
fn test_unsupported_version_is_refused() {
    let mut config = small_config();
    config.protocol_version = 2;
    let (mut conn, server) = connect(config);
    let peer = spawn_echo_peer(server);

    assert_eq!(conn.initiate(HandshakeMode::Synchronous), HandshakeOutcome::Failed);
    assert_eq!(peer.join().unwrap(), 0);
}

#[test]
fn test_peer_exit_is_end_of_stream() {
    let (mut conn, server) = connect(small_config());
    let peer = spawn_scripted_peer(server, Reply::Integer(1));

    // The scripted peer never attaches, but the region was created; an
    // acknowledged reply is enough to switch over.
    assert_eq!(conn.initiate(HandshakeMode::Synchronous), HandshakeOutcome::Established);
    let (_, peer_primary) = peer.join().unwrap();
    drop(peer_primary);

    let mut buf = [0u8; 8];
    assert_eq!(conn.read(&mut buf).unwrap(), 0);

    let err = conn.write(b"x").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
}

#[test]
fn test_non_blocking_would_block() {
    let mut config = small_config();
    config.blocking = false;
    config.atomic_write_threshold = 32;
    let (mut conn, server) = connect(config);
    let peer = spawn_scripted_peer(server, Reply::Integer(1));

    assert_eq!(conn.initiate(HandshakeMode::Synchronous), HandshakeOutcome::Established);
    let (_, _peer_primary) = peer.join().unwrap();

    let mut buf = [0u8; 8];
    let err = conn.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

    // Nobody drains the ring: 63 usable bytes.
    assert_eq!(conn.write(&[1u8; 40]).unwrap(), 40);
    // 23 free, 30 requested under the atomic threshold: all or nothing.
    let err = conn.write(&[2u8; 30]).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    assert_eq!(conn.write(&[2u8; 20]).unwrap(), 20);

    conn.set_blocking(true);
    assert!(conn.stream().unwrap().is_blocking());
}

#[test]
fn test_config_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("shmpipe.yaml");
    std::fs::write(&path, "ring_capacity: 128\nblocking: false\n").unwrap();

    let config = ConfigLoader::load_file(&path).unwrap();
    assert_eq!(config.ring_capacity.bytes(), 128);
    assert!(!config.blocking);

    let (mut conn, server) = connect(config);
    let peer = spawn_scripted_peer(server, Reply::Integer(1));
    conn.initiate(HandshakeMode::Synchronous);
    let _ = peer.join().unwrap();

    let stream = conn.stream().unwrap();
    assert_eq!(stream.region().capacity(), 128);
    assert!(!stream.is_blocking());
}
