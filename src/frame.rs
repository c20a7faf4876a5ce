//! The STOMP frame: command, ordered headers, and an opaque body.
//!
//! A [`Frame`] is an immutable-once-built value — command name, header list
//! (order preserved, duplicates retained), and body bytes. Construction and
//! serialization never invent or drop bytes beyond what the STOMP wire
//! format requires (escaping per [`StompVersion`], and `content-length`
//! only when the body demands it).

use bytes::{BufMut, BytesMut};

use crate::{StompError, StompVersion};

/// Commands that carry a body and are expected to gain a `content-length`
/// header when that body is non-empty or contains an embedded NUL.
const BODY_BEARING_COMMANDS: &[&str] = &["SEND", "MESSAGE", "ERROR"];

/// A STOMP frame: command, ordered headers, body.
///
/// Two frames are equal iff their command, header list (including order and
/// duplicates), and body bytes are all equal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    command: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Frame {
    /// Builds a frame from a command, an ordered header list, and a body.
    pub fn new(
        command: impl Into<String>,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Frame {
        Frame {
            command: command.into(),
            headers,
            body,
        }
    }

    /// The distinguished heart-beat frame: empty command, no headers, no
    /// body. Serializes as a single LF (1.1+) or the empty byte string on
    /// 1.0.
    pub fn heartbeat() -> Frame {
        Frame::default()
    }

    /// True for the distinguished heart-beat frame.
    pub fn is_heartbeat(&self) -> bool {
        self.command.is_empty() && self.headers.is_empty() && self.body.is_empty()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The first occurrence of a header by name — the authoritative value
    /// per STOMP 1.2's rule on repeated headers.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All occurrences of a header, in wire order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Appends a header, preserving insertion order and permitting
    /// duplicates.
    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// The parsed `content-length` header, if present and well-formed.
    pub fn content_length(&self) -> Option<usize> {
        self.get("content-length").and_then(|v| v.parse().ok())
    }

    /// Whether this frame's body must carry an explicit `content-length`:
    /// a non-empty body, or a body-bearing command whose body contains a
    /// NUL byte (which would otherwise be misread as the frame terminator).
    fn requires_content_length(&self) -> bool {
        if self.body.is_empty() {
            return false;
        }
        if self.content_length().is_some() {
            return true;
        }
        self.body.contains(&0) || BODY_BEARING_COMMANDS.contains(&self.command.as_str())
    }

    /// Serializes this frame to the wire format for `version`, appending to
    /// `buf`. Escapes header names/values per the version's escape table;
    /// never escapes the command line or the body.
    pub fn serialize(&self, version: StompVersion, buf: &mut BytesMut) {
        if self.is_heartbeat() {
            if version != StompVersion::V1_0 {
                buf.put_u8(b'\n');
            }
            return;
        }

        let needs_content_length =
            self.requires_content_length() && self.get("content-length").is_none();

        let estimated = self.command.len()
            + self.body.len()
            + self
                .headers
                .iter()
                .fold(0, |acc, (k, v)| acc + k.len() + v.len() + 2)
            + 32;
        if buf.remaining_mut() < estimated {
            buf.reserve(estimated);
        }

        buf.put_slice(self.command.as_bytes());
        buf.put_u8(b'\n');

        for (name, value) in &self.headers {
            put_escaped(version, name.as_bytes(), buf);
            buf.put_u8(b':');
            put_escaped(version, value.as_bytes(), buf);
            buf.put_u8(b'\n');
        }
        if needs_content_length {
            buf.put_slice(b"content-length:");
            buf.put_slice(self.body.len().to_string().as_bytes());
            buf.put_u8(b'\n');
        }

        buf.put_u8(b'\n');
        buf.put_slice(&self.body);
        buf.put_u8(b'\x00');
    }
}

fn put_escaped(version: StompVersion, bytes: &[u8], buf: &mut BytesMut) {
    for &b in bytes {
        match (version, b) {
            (StompVersion::V1_0, _) => buf.put_u8(b),
            (_, b'\n') => buf.put_slice(b"\\n"),
            (_, b':') => buf.put_slice(b"\\c"),
            (_, b'\\') => buf.put_slice(b"\\\\"),
            (StompVersion::V1_2, b'\r') => buf.put_slice(b"\\r"),
            (_, b) => buf.put_u8(b),
        }
    }
}

/// Escapes a single header name or value for `version`.
pub fn escape(version: StompVersion, s: &str) -> String {
    let mut buf = BytesMut::with_capacity(s.len());
    put_escaped(version, s.as_bytes(), &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Reverses [`escape`] for a raw header byte slice, per `version`'s escape
/// table. Rejects a trailing lone backslash and any escape sequence not in
/// the version's table.
pub fn unescape(version: StompVersion, bytes: &[u8]) -> Result<Vec<u8>, StompError> {
    if version == StompVersion::V1_0 {
        return Ok(bytes.to_vec());
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'c') => out.push(b':'),
            Some(b'\\') => out.push(b'\\'),
            Some(b'r') if version == StompVersion::V1_2 => out.push(b'\r'),
            Some(other) => {
                return Err(StompError::MalformedFrame(format!(
                    "invalid escape sequence '\\{}' for STOMP {}",
                    other as char,
                    version
                )))
            }
            None => {
                return Err(StompError::MalformedFrame(
                    "trailing unescaped backslash in header".into(),
                ))
            }
        }
    }
    Ok(out)
}
