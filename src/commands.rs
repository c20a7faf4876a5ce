//! Stateless, version-aware construction and validation of every STOMP
//! command.
//!
//! Each client→server function takes typed arguments plus the requested or
//! negotiated [`StompVersion`] and returns a fully-formed [`Frame`] or a
//! [`StompError::ProtocolError`] if the combination is illegal for that
//! version — validation always happens before any bytes would be written.
//! Each server→client function decodes a received [`Frame`] into a small
//! record of its semantically meaningful fields.
//!
//! Modeled as free functions dispatched by an explicit `match` on
//! [`StompVersion`], not as a trait-object hierarchy — see the session
//! module for the same "tagged value, not subclasses" approach applied to
//! connection state.

use crate::frame::Frame;
use crate::{StompError, StompVersion};

/// The client's requested acknowledgement mode for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    pub fn parse(s: &str) -> Result<AckMode, StompError> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(StompError::ProtocolError(format!(
                "invalid ack mode: {other:?}"
            ))),
        }
    }
}

fn push_extra(frame: &mut Frame, extra_headers: &[(String, String)]) {
    for (k, v) in extra_headers {
        frame.push_header(k.clone(), v.clone());
    }
}

fn push_receipt(frame: &mut Frame, receipt: Option<&str>) {
    if let Some(r) = receipt {
        frame.push_header("receipt", r);
    }
}

/// Builds a CONNECT (or, on request, its STOMP alias) frame.
///
/// `versions` is the set of protocol versions the client is willing to
/// negotiate, highest first or in any order. On 1.1+ (i.e. whenever
/// `versions` contains anything beyond bare 1.0) `host` is required;
/// STOMP 1.0 alone permits omitting both `accept-version` and `host`.
pub fn connect(
    versions: &[StompVersion],
    host: Option<&str>,
    login: Option<&str>,
    passcode: Option<&str>,
    heart_beat: Option<(u32, u32)>,
    use_stomp_alias: bool,
) -> Result<Frame, StompError> {
    if versions.is_empty() {
        return Err(StompError::ProtocolError(
            "connect requires at least one requested version".into(),
        ));
    }
    let needs_1_1_headers = versions.iter().any(|v| *v != StompVersion::V1_0);
    if needs_1_1_headers && host.map(str::is_empty).unwrap_or(true) {
        return Err(StompError::ProtocolError(
            "host is required when requesting STOMP 1.1 or 1.2".into(),
        ));
    }

    let command = if use_stomp_alias { "STOMP" } else { "CONNECT" };
    let mut frame = Frame::new(command, Vec::new(), Vec::new());
    if needs_1_1_headers {
        let accept_version = versions
            .iter()
            .map(StompVersion::as_str)
            .collect::<Vec<_>>()
            .join(",");
        frame.push_header("accept-version", accept_version);
    }
    if let Some(host) = host {
        frame.push_header("host", host);
    }
    if let Some(login) = login {
        frame.push_header("login", login);
    }
    if let Some(passcode) = passcode {
        frame.push_header("passcode", passcode);
    }
    if let Some((cx, cy)) = heart_beat {
        frame.push_header("heart-beat", format!("{cx},{cy}"));
    }
    Ok(frame)
}

/// Builds a SEND frame.
pub fn send(
    destination: &str,
    body: Vec<u8>,
    transaction: Option<&str>,
    extra_headers: &[(String, String)],
    receipt: Option<&str>,
) -> Result<Frame, StompError> {
    if destination.is_empty() {
        return Err(StompError::ProtocolError(
            "SEND requires a non-empty destination".into(),
        ));
    }
    let mut frame = Frame::new("SEND", Vec::new(), body);
    frame.push_header("destination", destination);
    if let Some(t) = transaction {
        frame.push_header("transaction", t);
    }
    push_extra(&mut frame, extra_headers);
    push_receipt(&mut frame, receipt);
    Ok(frame)
}

/// Builds a SUBSCRIBE frame. `id` is required on 1.1+; STOMP 1.0 permits
/// omitting it, in which case the destination itself is the de-facto
/// subscription token.
pub fn subscribe(
    version: StompVersion,
    destination: &str,
    id: Option<&str>,
    ack: Option<AckMode>,
    extra_headers: &[(String, String)],
    receipt: Option<&str>,
) -> Result<Frame, StompError> {
    if destination.is_empty() {
        return Err(StompError::ProtocolError(
            "SUBSCRIBE requires a non-empty destination".into(),
        ));
    }
    if version != StompVersion::V1_0 && id.map(str::is_empty).unwrap_or(true) {
        return Err(StompError::ProtocolError(
            "SUBSCRIBE requires 'id' on STOMP 1.1+".into(),
        ));
    }
    let mut frame = Frame::new("SUBSCRIBE", Vec::new(), Vec::new());
    frame.push_header("destination", destination);
    if let Some(id) = id {
        frame.push_header("id", id);
    }
    if let Some(ack) = ack {
        frame.push_header("ack", ack.as_str());
    }
    push_extra(&mut frame, extra_headers);
    push_receipt(&mut frame, receipt);
    Ok(frame)
}

/// Builds an UNSUBSCRIBE frame. On 1.1+, `id` must identify the
/// subscription; STOMP 1.0 permits identifying it by `destination` instead.
pub fn unsubscribe(
    version: StompVersion,
    id: Option<&str>,
    destination: Option<&str>,
    receipt: Option<&str>,
) -> Result<Frame, StompError> {
    if version != StompVersion::V1_0 && id.map(str::is_empty).unwrap_or(true) {
        return Err(StompError::ProtocolError(
            "UNSUBSCRIBE requires 'id' on STOMP 1.1+".into(),
        ));
    }
    if id.is_none() && destination.is_none() {
        return Err(StompError::ProtocolError(
            "UNSUBSCRIBE requires either 'id' or 'destination'".into(),
        ));
    }
    let mut frame = Frame::new("UNSUBSCRIBE", Vec::new(), Vec::new());
    if let Some(id) = id {
        frame.push_header("id", id);
    }
    if let Some(destination) = destination {
        frame.push_header("destination", destination);
    }
    push_receipt(&mut frame, receipt);
    Ok(frame)
}

/// The identifying headers an ACK/NACK frame references, which vary by
/// negotiated version:
/// - 1.2 references `id` (the value of the MESSAGE frame's `ack` header).
/// - 1.1 references `message-id` and `subscription`.
/// - 1.0 references `message-id` alone.
#[derive(Debug, Clone, Default)]
pub struct AckTarget {
    pub id: Option<String>,
    pub message_id: Option<String>,
    pub subscription: Option<String>,
}

fn ack_or_nack(
    command: &'static str,
    version: StompVersion,
    target: &AckTarget,
    transaction: Option<&str>,
    receipt: Option<&str>,
) -> Result<Frame, StompError> {
    if command == "NACK" && version == StompVersion::V1_0 {
        return Err(StompError::ProtocolError(
            "NACK is not available on STOMP 1.0".into(),
        ));
    }
    let mut frame = Frame::new(command, Vec::new(), Vec::new());
    match version {
        StompVersion::V1_2 => {
            let id = target.id.as_deref().ok_or_else(|| {
                StompError::ProtocolError(format!("{command} on STOMP 1.2 requires 'id'"))
            })?;
            frame.push_header("id", id);
        }
        StompVersion::V1_1 => {
            let message_id = target.message_id.as_deref().ok_or_else(|| {
                StompError::ProtocolError(format!(
                    "{command} on STOMP 1.1 requires 'message-id'"
                ))
            })?;
            let subscription = target.subscription.as_deref().ok_or_else(|| {
                StompError::ProtocolError(format!(
                    "{command} on STOMP 1.1 requires 'subscription'"
                ))
            })?;
            frame.push_header("message-id", message_id);
            frame.push_header("subscription", subscription);
        }
        StompVersion::V1_0 => {
            let message_id = target.message_id.as_deref().ok_or_else(|| {
                StompError::ProtocolError(format!(
                    "{command} on STOMP 1.0 requires 'message-id'"
                ))
            })?;
            frame.push_header("message-id", message_id);
        }
    }
    if let Some(t) = transaction {
        frame.push_header("transaction", t);
    }
    push_receipt(&mut frame, receipt);
    Ok(frame)
}

/// Builds an ACK frame.
pub fn ack(
    version: StompVersion,
    target: &AckTarget,
    transaction: Option<&str>,
    receipt: Option<&str>,
) -> Result<Frame, StompError> {
    ack_or_nack("ACK", version, target, transaction, receipt)
}

/// Builds a NACK frame. Forbidden on STOMP 1.0.
pub fn nack(
    version: StompVersion,
    target: &AckTarget,
    transaction: Option<&str>,
    receipt: Option<&str>,
) -> Result<Frame, StompError> {
    ack_or_nack("NACK", version, target, transaction, receipt)
}

fn transactional(command: &'static str, transaction: &str, receipt: Option<&str>) -> Result<Frame, StompError> {
    if transaction.is_empty() {
        return Err(StompError::ProtocolError(format!(
            "{command} requires a non-empty transaction id"
        )));
    }
    let mut frame = Frame::new(command, Vec::new(), Vec::new());
    frame.push_header("transaction", transaction);
    push_receipt(&mut frame, receipt);
    Ok(frame)
}

pub fn begin(transaction: &str, receipt: Option<&str>) -> Result<Frame, StompError> {
    transactional("BEGIN", transaction, receipt)
}

pub fn commit(transaction: &str, receipt: Option<&str>) -> Result<Frame, StompError> {
    transactional("COMMIT", transaction, receipt)
}

pub fn abort(transaction: &str, receipt: Option<&str>) -> Result<Frame, StompError> {
    transactional("ABORT", transaction, receipt)
}

pub fn disconnect(receipt: Option<&str>) -> Frame {
    let mut frame = Frame::new("DISCONNECT", Vec::new(), Vec::new());
    push_receipt(&mut frame, receipt);
    frame
}

/// The decoded, semantically meaningful content of a server→client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromServer {
    Connected {
        version: StompVersion,
        session: Option<String>,
        server: Option<String>,
        heart_beat: Option<(u32, u32)>,
    },
    Message {
        destination: String,
        message_id: String,
        subscription: String,
        ack: Option<String>,
        body: Vec<u8>,
    },
    Receipt {
        receipt_id: String,
    },
    Error {
        message: Option<String>,
        body: Vec<u8>,
    },
}

fn require(frame: &Frame, name: &str) -> Result<String, StompError> {
    frame
        .get(name)
        .map(str::to_string)
        .ok_or_else(|| StompError::ProtocolError(format!("expected header {name:?} missing")))
}

fn parse_heart_beat(raw: &str) -> Result<(u32, u32), StompError> {
    let mut parts = raw.splitn(2, ',');
    let cx = parts
        .next()
        .ok_or_else(|| StompError::ProtocolError("malformed heart-beat header".into()))?;
    let cy = parts
        .next()
        .ok_or_else(|| StompError::ProtocolError("malformed heart-beat header".into()))?;
    let cx = cx
        .trim()
        .parse()
        .map_err(|_| StompError::ProtocolError(format!("invalid heart-beat value {cx:?}")))?;
    let cy = cy
        .trim()
        .parse()
        .map_err(|_| StompError::ProtocolError(format!("invalid heart-beat value {cy:?}")))?;
    Ok((cx, cy))
}

impl FromServer {
    /// Decodes a received frame into its typed contents. `CONNECTED`,
    /// `MESSAGE`, `RECEIPT`, and `ERROR` are recognized; anything else is a
    /// protocol error for the caller to surface (the session layer treats
    /// it as violating the current state).
    pub fn decode(frame: &Frame) -> Result<FromServer, StompError> {
        match frame.command() {
            "CONNECTED" => {
                let version = frame
                    .get("version")
                    .map(|v| v.parse::<StompVersion>())
                    .transpose()?
                    .unwrap_or(StompVersion::V1_0);
                Ok(FromServer::Connected {
                    version,
                    session: frame.get("session").map(str::to_string),
                    server: frame.get("server").map(str::to_string),
                    heart_beat: frame.get("heart-beat").map(parse_heart_beat).transpose()?,
                })
            }
            "MESSAGE" => Ok(FromServer::Message {
                destination: require(frame, "destination")?,
                message_id: require(frame, "message-id")?,
                subscription: require(frame, "subscription")?,
                ack: frame.get("ack").map(str::to_string),
                body: frame.body().to_vec(),
            }),
            "RECEIPT" => Ok(FromServer::Receipt {
                receipt_id: require(frame, "receipt-id")?,
            }),
            "ERROR" => Ok(FromServer::Error {
                message: frame.get("message").map(str::to_string),
                body: frame.body().to_vec(),
            }),
            other => Err(StompError::ProtocolError(format!(
                "unrecognized server frame: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_1_0_permits_bare_request() {
        let frame = connect(&[StompVersion::V1_0], None, None, None, None, false).unwrap();
        assert!(frame.get("accept-version").is_none());
        assert!(frame.get("host").is_none());
    }

    #[test]
    fn connect_1_1_requires_host() {
        let err = connect(&[StompVersion::V1_1], None, None, None, None, false).unwrap_err();
        assert!(matches!(err, StompError::ProtocolError(_)));
    }

    #[test]
    fn connect_multi_version_builds_accept_version_header() {
        let frame = connect(
            &[StompVersion::V1_0, StompVersion::V1_1, StompVersion::V1_2],
            Some("broker"),
            None,
            None,
            None,
            false,
        )
        .unwrap();
        assert_eq!(frame.get("accept-version"), Some("1.0,1.1,1.2"));
        assert_eq!(frame.get("host"), Some("broker"));
    }

    #[test]
    fn stomp_alias_changes_command_name() {
        let frame = connect(&[StompVersion::V1_2], Some("h"), None, None, None, true).unwrap();
        assert_eq!(frame.command(), "STOMP");
    }

    #[test]
    fn nack_rejected_on_1_0() {
        let target = AckTarget {
            message_id: Some("1".into()),
            ..Default::default()
        };
        let err = nack(StompVersion::V1_0, &target, None, None).unwrap_err();
        assert!(matches!(err, StompError::ProtocolError(_)));
    }

    #[test]
    fn ack_1_2_uses_id() {
        let target = AckTarget {
            id: Some("msg-1".into()),
            ..Default::default()
        };
        let frame = ack(StompVersion::V1_2, &target, None, None).unwrap();
        assert_eq!(frame.get("id"), Some("msg-1"));
        assert!(frame.get("message-id").is_none());
    }

    #[test]
    fn ack_1_1_uses_message_id_and_subscription() {
        let target = AckTarget {
            message_id: Some("m1".into()),
            subscription: Some("s1".into()),
            ..Default::default()
        };
        let frame = ack(StompVersion::V1_1, &target, None, None).unwrap();
        assert_eq!(frame.get("message-id"), Some("m1"));
        assert_eq!(frame.get("subscription"), Some("s1"));
    }

    #[test]
    fn ack_1_0_uses_message_id_only() {
        let target = AckTarget {
            message_id: Some("m1".into()),
            ..Default::default()
        };
        let frame = ack(StompVersion::V1_0, &target, None, None).unwrap();
        assert_eq!(frame.get("message-id"), Some("m1"));
    }

    #[test]
    fn subscribe_1_2_requires_id() {
        let err = subscribe(StompVersion::V1_2, "/queue/a", None, None, &[], None).unwrap_err();
        assert!(matches!(err, StompError::ProtocolError(_)));
    }

    #[test]
    fn subscribe_1_0_permits_missing_id() {
        let frame = subscribe(StompVersion::V1_0, "/queue/a", None, None, &[], None).unwrap();
        assert_eq!(frame.get("destination"), Some("/queue/a"));
        assert!(frame.get("id").is_none());
    }

    #[test]
    fn receipt_header_attached_when_requested() {
        let frame = begin("tx1", Some("r1")).unwrap();
        assert_eq!(frame.get("receipt"), Some("r1"));
    }

    #[test]
    fn decode_connected_frame() {
        let frame = Frame::new(
            "CONNECTED",
            vec![
                ("version".into(), "1.1".into()),
                ("heart-beat".into(), "500,1000".into()),
            ],
            vec![],
        );
        let decoded = FromServer::decode(&frame).unwrap();
        match decoded {
            FromServer::Connected {
                version, heart_beat, ..
            } => {
                assert_eq!(version, StompVersion::V1_1);
                assert_eq!(heart_beat, Some((500, 1000)));
            }
            _ => panic!("expected Connected"),
        }
    }

    #[test]
    fn decode_message_frame() {
        let frame = Frame::new(
            "MESSAGE",
            vec![
                ("destination".into(), "/queue/a".into()),
                ("message-id".into(), "1".into()),
                ("subscription".into(), "0".into()),
            ],
            b"body".to_vec(),
        );
        let decoded = FromServer::decode(&frame).unwrap();
        assert!(matches!(decoded, FromServer::Message { .. }));
    }

    #[test]
    fn decode_rejects_unknown_command() {
        let frame = Frame::new("BOGUS", vec![], vec![]);
        assert!(FromServer::decode(&frame).is_err());
    }
}
