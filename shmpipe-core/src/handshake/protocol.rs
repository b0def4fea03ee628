// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The `SHM OPEN` control exchange.
//!
//! The client sends `SHM OPEN <version> <name>` over the primary transport and
//! expects the integer `1`. Any other reply - another integer, an error, a
//! reply of the wrong type - means the peer will not use the region.

use crate::error::ShmError;
use crate::primary::Reply;
use crate::shm::{Server, SharedRegion};
use crate::types::RegionName;

/// Protocol version this crate speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Integer reply acknowledging the region.
pub const OPEN_ACCEPTED: i64 = 1;

/// Integer reply refusing the region (unsupported version, no resources).
pub const OPEN_REFUSED: i64 = 0;

/// Build the control command advertising `name`.
pub fn open_command(version: u32, name: &RegionName) -> String {
    format!("SHM OPEN {} {}", version, name)
}

/// Apply the accept/reject rule to the peer's reply.
pub fn evaluate_reply(reply: &Reply) -> Result<(), ShmError> {
    match reply {
        Reply::Integer(OPEN_ACCEPTED) => Ok(()),
        Reply::Integer(n) => Err(ShmError::ProtocolRejected {
            reason: format!("peer refused with integer reply {}", n),
        }),
        Reply::Error(message) => Err(ShmError::ProtocolRejected {
            reason: format!("peer replied with error: {}", message),
        }),
        other => Err(ShmError::ProtocolRejected {
            reason: format!("expected an integer reply, got {}", other.type_name()),
        }),
    }
}

/// A decoded `SHM OPEN` command, as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub version: u32,
    pub name: RegionName,
}

impl OpenRequest {
    /// Parse `SHM OPEN <version> <name>`; keywords are case-insensitive.
    pub fn parse(command: &str) -> Result<Self, ShmError> {
        let reject = |reason: String| ShmError::ProtocolRejected { reason };
        let mut parts = command.split_ascii_whitespace();

        match (parts.next(), parts.next()) {
            (Some(shm), Some(open))
                if shm.eq_ignore_ascii_case("SHM") && open.eq_ignore_ascii_case("OPEN") => {}
            _ => return Err(reject(format!("not an SHM OPEN command: {:?}", command))),
        }

        let version = parts
            .next()
            .ok_or_else(|| reject("missing protocol version".to_string()))?
            .parse::<u32>()
            .map_err(|e| reject(format!("invalid protocol version: {}", e)))?;

        let name = parts
            .next()
            .ok_or_else(|| reject("missing region name".to_string()))?;
        let name = RegionName::new(name).map_err(|e| reject(e.to_string()))?;

        if parts.next().is_some() {
            return Err(reject("trailing arguments after region name".to_string()));
        }

        Ok(Self { version, name })
    }
}

/// Server side of the exchange: decode, attach, and produce the reply.
///
/// Returns the attached region when the reply is an acknowledgement.
pub fn respond_to_open(command: &str) -> (Reply, Option<SharedRegion<Server>>) {
    let request = match OpenRequest::parse(command) {
        Ok(request) => request,
        Err(e) => return (Reply::Error(format!("ERR {}", e)), None),
    };

    if request.version != PROTOCOL_VERSION {
        tracing::warn!(
            version = request.version,
            supported = PROTOCOL_VERSION,
            "Refusing shared memory: unsupported protocol version"
        );
        return (Reply::Integer(OPEN_REFUSED), None);
    }

    match SharedRegion::<Server>::attach(&request.name) {
        Ok(region) => (Reply::Integer(OPEN_ACCEPTED), Some(region)),
        Err(e) => {
            tracing::warn!(name = %request.name, error = %e, "Refusing shared memory: attach failed");
            (Reply::Integer(OPEN_REFUSED), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> RegionName {
        RegionName::new("/shmpipe-1-00ff").unwrap()
    }

    #[test]
    fn test_open_command_format() {
        assert_eq!(open_command(1, &name()), "SHM OPEN 1 /shmpipe-1-00ff");
    }

    #[test]
    fn test_only_integer_one_is_accepted() {
        assert!(evaluate_reply(&Reply::Integer(1)).is_ok());

        for reply in [
            Reply::Integer(0),
            Reply::Integer(2),
            Reply::Integer(-1),
            Reply::Status("OK".to_string()),
            Reply::Bulk(Some(b"1".to_vec())),
            Reply::Bulk(None),
            Reply::Error("ERR unknown command 'SHM'".to_string()),
            Reply::Array(Some(vec![Reply::Integer(1)])),
        ] {
            assert!(
                matches!(evaluate_reply(&reply), Err(ShmError::ProtocolRejected { .. })),
                "{:?} should be rejected",
                reply
            );
        }
    }

    #[test]
    fn test_parse_round_trip() {
        let request = OpenRequest::parse(&open_command(PROTOCOL_VERSION, &name())).unwrap();
        assert_eq!(request.version, PROTOCOL_VERSION);
        assert_eq!(request.name, name());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let request = OpenRequest::parse("shm open 3 /x").unwrap();
        assert_eq!(request.version, 3);
        assert_eq!(request.name.as_str(), "/x");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for command in [
            "",
            "SHM",
            "SHM CLOSE 1 /x",
            "SHM OPEN",
            "SHM OPEN one /x",
            "SHM OPEN 1",
            "SHM OPEN 1 x",
            "SHM OPEN 1 /x extra",
        ] {
            assert!(OpenRequest::parse(command).is_err(), "{:?}", command);
        }
    }

    #[test]
    fn test_respond_refuses_unknown_version() {
        let (reply, region) = respond_to_open("SHM OPEN 99 /whatever");
        assert_eq!(reply, Reply::Integer(OPEN_REFUSED));
        assert!(region.is_none());
    }

    #[test]
    fn test_respond_refuses_missing_region() {
        let missing = crate::shm::unique_name("missing").unwrap();
        let (reply, region) = respond_to_open(&open_command(PROTOCOL_VERSION, &missing));
        assert_eq!(reply, Reply::Integer(OPEN_REFUSED));
        assert!(region.is_none());
    }

    #[test]
    fn test_respond_to_garbage_is_error_reply() {
        let (reply, region) = respond_to_open("PING");
        assert!(matches!(reply, Reply::Error(_)));
        assert!(region.is_none());
    }
}
