//! stomp-core - a transport-agnostic STOMP 1.0/1.1/1.2 protocol core.
//!
//! The crate is split into layers that mirror the STOMP spec itself:
//!
//! - [`frame`]: the wire representation of a frame and its header escaping.
//! - [`parser`]: an incremental byte-stream decoder.
//! - [`commands`]: pure, version-aware frame construction and validation.
//! - [`session`]: the connection lifecycle state machine.
//! - [`failover`]: the `failover:` URI scheme and reconnect policy.
//!
//! None of these own a socket, a thread, or a timer. A caller (a sync or
//! async client) drives bytes in, drives `Frame`s out, and supplies a clock.
//! See [`codec`] for the one concrete `tokio_util` adapter the crate ships.

pub mod codec;
pub mod commands;
pub mod failover;
pub mod frame;
pub mod parser;
pub mod session;

pub use codec::StompCodec;
pub use commands::{AckMode, AckTarget, FromServer};
pub use failover::{FailoverBroker, FailoverConfig, FailoverRng, FailoverTransport};
pub use frame::Frame;
pub use parser::Parser;
pub use session::{
    DeliveredMessage, ReceiptId, Session, SessionEvent, SessionState, Subscription,
    SubscriptionToken, TransactionId,
};

use std::fmt;
use std::str::FromStr;

/// The three STOMP protocol versions this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StompVersion {
    V1_0,
    V1_1,
    V1_2,
}

impl StompVersion {
    pub const ALL: [StompVersion; 3] = [StompVersion::V1_0, StompVersion::V1_1, StompVersion::V1_2];

    pub fn as_str(&self) -> &'static str {
        match self {
            StompVersion::V1_0 => "1.0",
            StompVersion::V1_1 => "1.1",
            StompVersion::V1_2 => "1.2",
        }
    }

    /// Parses a comma-separated `accept-version` header and returns the
    /// highest version both the client and this crate understand.
    pub fn negotiate(accept_version: &str) -> Option<StompVersion> {
        accept_version
            .split(',')
            .filter_map(|tok| StompVersion::from_str(tok.trim()).ok())
            .max()
    }
}

impl fmt::Display for StompVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StompVersion {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" => Ok(StompVersion::V1_0),
            "1.1" => Ok(StompVersion::V1_1),
            "1.2" => Ok(StompVersion::V1_2),
            other => Err(StompError::ProtocolError(format!(
                "unsupported STOMP version: {other:?}"
            ))),
        }
    }
}

impl Default for StompVersion {
    fn default() -> Self {
        StompVersion::V1_0
    }
}

/// The crate-wide error taxonomy. Every kind named in the protocol core's
/// error design maps to exactly one variant here.
#[derive(Debug, thiserror::Error)]
pub enum StompError {
    /// A command/header combination is illegal for the negotiated version,
    /// or a server frame violates the session's current state.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Bytes could not be parsed as a well-formed frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A `failover:` URI was rejected.
    #[error("malformed failover URI: {0}")]
    MalformedUri(String),

    /// CONNECTED was not received within the caller's negotiation window.
    #[error("timed out waiting for CONNECTED")]
    ConnectionTimeout,

    /// The transport closed unexpectedly.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The failover iterator has exhausted its configured attempt budget.
    #[error("no more brokers to try")]
    NoMoreBrokers,
}

impl From<StompError> for std::io::Error {
    fn from(err: StompError) -> std::io::Error {
        let kind = match &err {
            StompError::MalformedFrame(_) | StompError::MalformedUri(_) => {
                std::io::ErrorKind::InvalidData
            }
            StompError::ConnectionTimeout => std::io::ErrorKind::TimedOut,
            StompError::ConnectionLost(_) => std::io::ErrorKind::ConnectionReset,
            StompError::ProtocolError(_) | StompError::NoMoreBrokers => {
                std::io::ErrorKind::InvalidInput
            }
        };
        std::io::Error::new(kind, err)
    }
}

/// `tokio_util::codec::{Decoder, Encoder}` require their `Error` type to
/// absorb a plain I/O failure (a dropped socket, a read error) alongside
/// whatever protocol-level errors the codec itself raises — this is what
/// lets [`codec::StompCodec`] use `StompError` as that associated type.
impl From<std::io::Error> for StompError {
    fn from(err: std::io::Error) -> StompError {
        StompError::ConnectionLost(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_highest_common_version() {
        assert_eq!(
            StompVersion::negotiate("1.0,1.1,1.2"),
            Some(StompVersion::V1_2)
        );
        assert_eq!(StompVersion::negotiate("1.0,1.1"), Some(StompVersion::V1_1));
        assert_eq!(StompVersion::negotiate("bogus"), None);
    }

    #[test]
    fn version_ordering_follows_token_order() {
        assert!(StompVersion::V1_0 < StompVersion::V1_1);
        assert!(StompVersion::V1_1 < StompVersion::V1_2);
    }
}
