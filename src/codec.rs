//! The one concrete transport adapter this crate ships: a `tokio_util`
//! [`Decoder`]/[`Encoder`] pair wiring the incremental [`Parser`] and
//! [`Frame::serialize`] to a byte stream.
//!
//! Everything else in the crate (parsing, commands, the session state
//! machine) is I/O-free on purpose; `StompCodec` is where those pieces
//! actually meet `tokio::io::{AsyncRead, AsyncWrite}` via `Framed`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::Frame;
use crate::parser::Parser;
use crate::{StompError, StompVersion};

/// A `Decoder`/`Encoder` over [`Frame`], parameterized by the negotiated
/// [`StompVersion`]. Starts at 1.0 (no escaping, bare-LF framing only);
/// call [`StompCodec::set_version`] once CONNECTED has been negotiated so
/// subsequent reads unescape correctly and subsequent writes match the
/// broker's framing rules.
#[derive(Debug)]
pub struct StompCodec {
    parser: Parser,
}

impl StompCodec {
    pub fn new() -> StompCodec {
        StompCodec {
            parser: Parser::new(StompVersion::V1_0),
        }
    }

    pub fn version(&self) -> StompVersion {
        self.parser.version()
    }

    /// Updates the version used by both decoding and encoding. Call this
    /// as soon as a CONNECTED frame negotiates a version other than 1.0.
    pub fn set_version(&mut self, version: StompVersion) {
        self.parser.set_version(version);
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        StompCodec::new()
    }
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = StompError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, StompError> {
        if !src.is_empty() {
            let taken = src.split();
            self.parser.add(&taken);
        }
        self.parser.next()
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = StompError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), StompError> {
        item.serialize(self.parser.version(), dst);
        Ok(())
    }
}
