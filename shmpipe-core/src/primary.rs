// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The primary (socket) transport, seen through the narrow interface the
//! shared memory layer needs.
//!
//! The handshake sends one textual command and reads one typed reply; the
//! liveness probe needs the descriptor; everything else is plain bytes.
//! [`RespTransport`] is a small reference implementation over any Unix
//! stream: inline commands out, RESP-encoded replies in.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};

/// Largest bulk string accepted from the wire.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted from the wire.
const MAX_NESTING: usize = 32;

/// A typed reply from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::Bulk(Some(_)) => "bulk string",
            Self::Bulk(None) | Self::Array(None) => "nil",
            Self::Array(Some(_)) => "array",
        }
    }

    /// RESP wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Status(s) => out.extend_from_slice(format!("+{}\r\n", s).as_bytes()),
            Self::Error(s) => out.extend_from_slice(format!("-{}\r\n", s).as_bytes()),
            Self::Integer(n) => out.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
            Self::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Self::Bulk(Some(data)) => {
                out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Self::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            Self::Array(Some(items)) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }
}

/// What the shared memory layer needs from the connection it upgrades.
///
/// `Read`/`Write` carry payload while shared memory is not in use; `AsFd`
/// feeds the liveness probe.
pub trait PrimaryTransport: Read + Write + AsFd {
    /// Send one command without waiting for its reply.
    fn send_command(&mut self, command: &str) -> io::Result<()>;

    /// Read the next reply.
    fn read_reply(&mut self) -> io::Result<Reply>;

    /// Send one command and wait for its reply.
    fn command(&mut self, command: &str) -> io::Result<Reply> {
        self.send_command(command)?;
        self.read_reply()
    }
}

/// Inline commands and RESP replies over a Unix stream.
///
/// Works for both ends: a client sends commands and reads replies, a server
/// reads commands and sends replies.
#[derive(Debug)]
pub struct RespTransport<S: Read + Write + AsFd> {
    stream: BufReader<S>,
}

impl<S: Read + Write + AsFd> RespTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    /// Server side: read one inline command. `None` on end of stream.
    pub fn read_command(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.stream.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Server side: send one reply.
    pub fn send_reply(&mut self, reply: &Reply) -> io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(&reply.encode())?;
        stream.flush()
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.stream.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "primary transport closed while reading a reply",
            ));
        }
        if !line.ends_with("\r\n") {
            return Err(invalid_data(format!("reply line not CRLF terminated: {:?}", line)));
        }
        line.truncate(line.len() - 2);
        Ok(line)
    }

    fn parse_reply(&mut self, depth: usize) -> io::Result<Reply> {
        if depth > MAX_NESTING {
            return Err(invalid_data("reply nested too deeply".to_string()));
        }

        let line = self.read_line()?;
        let Some(kind) = line.chars().next() else {
            return Err(invalid_data("empty reply line".to_string()));
        };
        let body = &line[kind.len_utf8()..];

        match kind {
            '+' => Ok(Reply::Status(body.to_string())),
            '-' => Ok(Reply::Error(body.to_string())),
            ':' => body
                .parse::<i64>()
                .map(Reply::Integer)
                .map_err(|e| invalid_data(format!("bad integer reply {:?}: {}", body, e))),
            '$' => {
                let Some(len) = parse_length(body)? else {
                    return Ok(Reply::Bulk(None));
                };
                if len > MAX_BULK_LEN {
                    return Err(invalid_data(format!("bulk reply too large: {}", len)));
                }
                // Grows with what actually arrives, not with the announced length.
                let mut data = Vec::new();
                (&mut self.stream)
                    .take(len as u64 + 2)
                    .read_to_end(&mut data)?;
                if data.len() < len + 2 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                if !data.ends_with(b"\r\n") {
                    return Err(invalid_data("bulk reply not CRLF terminated".to_string()));
                }
                data.truncate(len);
                Ok(Reply::Bulk(Some(data)))
            }
            '*' => {
                let Some(count) = parse_length(body)? else {
                    return Ok(Reply::Array(None));
                };
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.parse_reply(depth + 1)?);
                }
                Ok(Reply::Array(Some(items)))
            }
            other => Err(invalid_data(format!("unknown reply type byte {:?}", other))),
        }
    }
}

fn parse_length(body: &str) -> io::Result<Option<usize>> {
    if body == "-1" {
        return Ok(None);
    }
    body.parse::<usize>()
        .map(Some)
        .map_err(|e| invalid_data(format!("bad length {:?}: {}", body, e)))
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

impl<S: Read + Write + AsFd> PrimaryTransport for RespTransport<S> {
    fn send_command(&mut self, command: &str) -> io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(command.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()
    }

    fn read_reply(&mut self) -> io::Result<Reply> {
        self.parse_reply(0)
    }
}

impl<S: Read + Write + AsFd> Read for RespTransport<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl<S: Read + Write + AsFd> Write for RespTransport<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.get_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.get_mut().flush()
    }
}

impl<S: Read + Write + AsFd> AsFd for RespTransport<S> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.get_ref().as_fd()
    }
}
