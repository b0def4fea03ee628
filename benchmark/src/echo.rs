// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Echo fixtures: a client and a peer thread on either side of a socketpair.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::thread::JoinHandle;

use shmpipe_core::handshake::respond_to_open;
use shmpipe_core::{
    FdProbe, HandshakeMode, HandshakeOutcome, RespTransport, ShmConfig, ShmConnection, ShmStream,
};

/// Client upgraded to shared memory, with an echo peer on the other side.
pub struct ShmEchoPair {
    conn: ShmConnection<RespTransport<UnixStream>>,
    chunk_len: usize,
    _peer: JoinHandle<io::Result<()>>,
}

impl ShmEchoPair {
    pub fn new(config: ShmConfig) -> io::Result<Self> {
        let (client, server) = UnixStream::pair()?;
        let peer_config = config.clone();
        let peer = std::thread::spawn(move || -> io::Result<()> {
            let mut primary = RespTransport::new(server);
            let Some(command) = primary.read_command()? else {
                return Ok(());
            };
            let (reply, region) = respond_to_open(&command);
            primary.send_reply(&reply)?;
            let Some(region) = region else {
                return Ok(());
            };

            let probe = FdProbe::new(primary.get_ref())?;
            let mut stream = ShmStream::new(region, probe, peer_config.stream_options());
            let mut buf = vec![0u8; peer_config.ring_capacity.usable()];
            loop {
                let n = stream.read(&mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                stream.write_all(&buf[..n])?;
            }
        });

        let chunk_len = config.ring_capacity.usable();
        let mut conn = ShmConnection::new(RespTransport::new(client), config);
        if conn.initiate(HandshakeMode::Synchronous) != HandshakeOutcome::Established {
            let reason = conn
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "handshake failed".to_string());
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, reason));
        }

        Ok(Self {
            conn,
            chunk_len,
            _peer: peer,
        })
    }

    /// Send `payload` and read the echo into `out` (same length).
    pub fn round_trip(&mut self, payload: &[u8], out: &mut [u8]) -> io::Result<()> {
        for (sent, received) in payload.chunks(self.chunk_len).zip(out.chunks_mut(self.chunk_len)) {
            self.conn.write_all(sent)?;
            self.conn.read_exact(received)?;
        }
        Ok(())
    }
}

/// The same echo over the plain socket, for comparison.
pub struct UnixEchoPair {
    client: UnixStream,
    _peer: JoinHandle<io::Result<()>>,
}

impl UnixEchoPair {
    pub fn new() -> io::Result<Self> {
        let (client, mut server) = UnixStream::pair()?;
        let peer = std::thread::spawn(move || -> io::Result<()> {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = server.read(&mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                server.write_all(&buf[..n])?;
            }
        });
        Ok(Self {
            client,
            _peer: peer,
        })
    }

    pub fn round_trip(&mut self, payload: &[u8], out: &mut [u8]) -> io::Result<()> {
        self.client.write_all(payload)?;
        self.client.read_exact(out)
    }
}
