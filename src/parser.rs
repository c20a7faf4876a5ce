//! Incremental, resumable byte-stream to [`Frame`] decoder.
//!
//! `Parser` retains at most the bytes of the frame currently being read
//! plus whatever input chunk was just handed to it — nothing more. It is
//! fed via [`Parser::add`] in arbitrary-sized chunks and drained via
//! [`Parser::next`] until it returns `Ok(None)`, at which point the caller
//! must supply more bytes. A parse error is unrecoverable for the
//! in-progress frame: the caller must call [`Parser::reset`] before feeding
//! more bytes, since framing is lost.

use bytes::{Buf, BytesMut};

use crate::frame::{self, Frame};
use crate::{StompError, StompVersion};

/// A resumable STOMP frame decoder.
pub struct Parser {
    version: StompVersion,
    buf: BytesMut,
}

impl Parser {
    pub fn new(version: StompVersion) -> Parser {
        Parser {
            version,
            buf: BytesMut::new(),
        }
    }

    /// Changes the version used to interpret subsequently-scanned frames.
    /// Used once a session negotiates a version different from the one it
    /// started with.
    pub fn set_version(&mut self, version: StompVersion) {
        self.version = version;
    }

    pub fn version(&self) -> StompVersion {
        self.version
    }

    /// Appends newly-received bytes to the parser's internal buffer.
    pub fn add(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// True if a call to [`Parser::next`] would return a frame or an error
    /// without needing more bytes first.
    pub fn can_read(&self) -> bool {
        match scan(&self.buf, self.version) {
            Ok(outcome) => !matches!(outcome, Outcome::Incomplete),
            Err(_) => true,
        }
    }

    /// Discards all buffered bytes. Required after a parse error, and safe
    /// to call at any time to abandon an in-progress frame (e.g. when the
    /// surrounding transport reconnects).
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Attempts to decode the next whole frame or heart-beat from the
    /// buffered bytes. Returns `Ok(None)` when more bytes are needed.
    pub fn next(&mut self) -> Result<Option<Frame>, StompError> {
        match scan(&self.buf, self.version)? {
            Outcome::Incomplete => Ok(None),
            Outcome::Frame { consumed, frame } => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
        }
    }
}

enum Outcome {
    Incomplete,
    Frame { consumed: usize, frame: Frame },
}

/// Finds the next literal LF starting at `from`, returning its index.
/// Header-line escaping never produces a literal LF byte (it is always
/// represented as the two-byte sequence `\n`), so a raw LF always marks a
/// genuine line boundary.
fn find_lf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..].iter().position(|&b| b == b'\n').map(|i| i + from)
}

/// Strips one trailing CR immediately before a line's LF, but only for
/// STOMP 1.2, which is the only version the wire format tolerates a CR-LF
/// line ending for.
fn strip_trailing_cr(version: StompVersion, line: &[u8]) -> &[u8] {
    if version == StompVersion::V1_2 {
        if let Some((&b'\r', rest)) = line.split_last() {
            return rest;
        }
    }
    line
}

fn scan(buf: &[u8], version: StompVersion) -> Result<Outcome, StompError> {
    if buf.is_empty() {
        return Ok(Outcome::Incomplete);
    }

    // AWAIT_COMMAND: a bare LF (optionally CR-LF on 1.2) is a heart-beat.
    if buf[0] == b'\r' && version == StompVersion::V1_2 {
        if buf.len() < 2 {
            return Ok(Outcome::Incomplete);
        }
        if buf[1] == b'\n' {
            return Ok(Outcome::Frame {
                consumed: 2,
                frame: Frame::heartbeat(),
            });
        }
        return Err(StompError::MalformedFrame(
            "lone CR is not a valid frame start".into(),
        ));
    }
    if buf[0] == b'\n' {
        return Ok(Outcome::Frame {
            consumed: 1,
            frame: Frame::heartbeat(),
        });
    }

    // READ_COMMAND: until LF.
    let command_end = match find_lf(buf, 0) {
        Some(pos) => pos,
        None => return Ok(Outcome::Incomplete),
    };
    let command_line = strip_trailing_cr(version, &buf[..command_end]);
    reject_bare_cr(version, command_line)?;
    let command = std::str::from_utf8(command_line)
        .map_err(|_| StompError::MalformedFrame("command line is not valid UTF-8".into()))?
        .to_string();
    if command.is_empty() {
        return Err(StompError::MalformedFrame(
            "empty command line".into(),
        ));
    }

    // READ_HEADERS: until a blank line.
    let mut cursor = command_end + 1;
    let mut headers = Vec::new();
    loop {
        let line_end = match find_lf(buf, cursor) {
            Some(pos) => pos,
            None => return Ok(Outcome::Incomplete),
        };
        let raw_line = strip_trailing_cr(version, &buf[cursor..line_end]);
        if raw_line.is_empty() {
            cursor = line_end + 1;
            break;
        }
        reject_bare_cr(version, raw_line)?;
        let colon = raw_line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| StompError::MalformedFrame("header line missing ':'".into()))?;
        let name = frame::unescape(version, &raw_line[..colon])?;
        let value = frame::unescape(version, &raw_line[colon + 1..])?;
        let name = String::from_utf8(name)
            .map_err(|_| StompError::MalformedFrame("header name is not valid UTF-8".into()))?;
        let value = String::from_utf8(value)
            .map_err(|_| StompError::MalformedFrame("header value is not valid UTF-8".into()))?;
        headers.push((name, value));
        cursor = line_end + 1;
    }

    // READ_BODY: exactly content-length bytes then NUL, or up to the first NUL.
    let content_length = match headers.iter().find(|(k, _)| k == "content-length") {
        Some((_, v)) => Some(v.parse::<usize>().map_err(|_| {
            StompError::MalformedFrame(format!("invalid content-length value {v:?}"))
        })?),
        None => None,
    };

    let (body, body_end) = match content_length {
        Some(n) => {
            if buf.len() < cursor + n + 1 {
                return Ok(Outcome::Incomplete);
            }
            let body = buf[cursor..cursor + n].to_vec();
            if buf[cursor + n] != 0 {
                return Err(StompError::MalformedFrame(
                    "content-length mismatch: byte after sized body is not NUL".into(),
                ));
            }
            (body, cursor + n + 1)
        }
        None => match buf[cursor..].iter().position(|&b| b == 0) {
            Some(offset) => (buf[cursor..cursor + offset].to_vec(), cursor + offset + 1),
            None => return Ok(Outcome::Incomplete),
        },
    };

    Ok(Outcome::Frame {
        consumed: body_end,
        frame: Frame::new(command, headers, body),
    })
}

/// STOMP 1.1 defines no escape for CR and this crate's conservative reading
/// of the spec rejects a raw CR appearing in header/command line content
/// (STOMP 1.0 has no escaping at all, so CR is just ordinary data there).
fn reject_bare_cr(version: StompVersion, line: &[u8]) -> Result<(), StompError> {
    if version == StompVersion::V1_1 && line.contains(&b'\r') {
        return Err(StompError::MalformedFrame(
            "unescaped CR is not valid in STOMP 1.1 headers".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_send_frame() {
        let mut parser = Parser::new(StompVersion::V1_2);
        parser.add(b"SEND\ndestination:/queue/a\ncontent-length:5\n\nhello\0");
        let frame = parser.next().unwrap().unwrap();
        assert_eq!(frame.command(), "SEND");
        assert_eq!(frame.get("destination"), Some("/queue/a"));
        assert_eq!(frame.body(), b"hello");
        assert!(parser.next().unwrap().is_none());
    }

    #[test]
    fn resumes_across_arbitrary_chunk_boundaries() {
        let data = b"SEND\ndestination:/queue/a\ncontent-length:5\n\nhello\0";
        let mut parser = Parser::new(StompVersion::V1_2);
        let mut frame = None;
        for byte in data {
            parser.add(&[*byte]);
            if let Some(f) = parser.next().unwrap() {
                frame = Some(f);
            }
        }
        let frame = frame.unwrap();
        assert_eq!(frame.command(), "SEND");
        assert_eq!(frame.body(), b"hello");
    }

    #[test]
    fn concatenated_frames_come_out_in_order() {
        let mut parser = Parser::new(StompVersion::V1_2);
        parser.add(b"BEGIN\ntransaction:t1\n\n\0COMMIT\ntransaction:t1\n\n\0");
        let a = parser.next().unwrap().unwrap();
        let b = parser.next().unwrap().unwrap();
        assert_eq!(a.command(), "BEGIN");
        assert_eq!(b.command(), "COMMIT");
        assert!(parser.next().unwrap().is_none());
    }

    #[test]
    fn body_without_content_length_terminates_at_first_nul() {
        let mut parser = Parser::new(StompVersion::V1_2);
        parser.add(b"MESSAGE\ndestination:d\nmessage-id:1\nsubscription:s\n\nbody\0");
        let frame = parser.next().unwrap().unwrap();
        assert_eq!(frame.body(), b"body");
    }

    #[test]
    fn body_with_nul_bytes_requires_content_length() {
        let body = b"a\x00b";
        let mut data = b"MESSAGE\ndestination:d\nmessage-id:1\nsubscription:s\ncontent-length:3\n\n"
            .to_vec();
        data.extend_from_slice(body);
        data.push(0);
        let mut parser = Parser::new(StompVersion::V1_2);
        parser.add(&data);
        let frame = parser.next().unwrap().unwrap();
        assert_eq!(frame.body(), body);
    }

    #[test]
    fn bare_heartbeat_lf_is_its_own_frame() {
        let mut parser = Parser::new(StompVersion::V1_2);
        parser.add(b"\nSEND\ndestination:d\n\n\0");
        let hb = parser.next().unwrap().unwrap();
        assert!(hb.is_heartbeat());
        let frame = parser.next().unwrap().unwrap();
        assert_eq!(frame.command(), "SEND");
    }

    #[test]
    fn missing_colon_is_malformed() {
        let mut parser = Parser::new(StompVersion::V1_2);
        parser.add(b"SEND\nbadheader\n\n\0");
        assert!(parser.next().is_err());
    }

    #[test]
    fn content_length_mismatch_is_malformed() {
        let mut parser = Parser::new(StompVersion::V1_2);
        parser.add(b"SEND\ndestination:d\ncontent-length:3\n\nhello\0");
        assert!(parser.next().is_err());
    }

    #[test]
    fn reset_discards_in_progress_frame() {
        let mut parser = Parser::new(StompVersion::V1_2);
        parser.add(b"SEND\nbadheader\n\n\0");
        assert!(parser.next().is_err());
        parser.reset();
        parser.add(b"SEND\ndestination:d\n\n\0");
        assert_eq!(parser.next().unwrap().unwrap().command(), "SEND");
    }

    #[test]
    fn crlf_tolerated_on_1_2_only() {
        let mut parser = Parser::new(StompVersion::V1_2);
        parser.add(b"SEND\r\ndestination:d\r\n\r\n\0");
        let frame = parser.next().unwrap().unwrap();
        assert_eq!(frame.get("destination"), Some("d"));
    }

    #[test]
    fn bare_cr_rejected_on_1_1() {
        let mut parser = Parser::new(StompVersion::V1_1);
        parser.add(b"SEND\r\ndestination:d\n\n\0");
        assert!(parser.next().is_err());
    }

    #[test]
    fn can_read_reflects_buffer_completeness() {
        let mut parser = Parser::new(StompVersion::V1_2);
        parser.add(b"SEND\ndestination:d\n\n");
        assert!(!parser.can_read());
        parser.add(b"\0");
        assert!(parser.can_read());
    }
}
