//! The connection lifecycle state machine: negotiation, subscriptions,
//! transactions, receipts, and heart-beat scheduling — entirely in-memory
//! and I/O-free. A `Session` is a plain value with `&mut self` methods; it
//! never calls a clock or touches a socket. Callers pass `Instant::now()`
//! in, and drive the `Frame`s this type produces out to a transport.
//!
//! Modeled as an explicit tagged [`SessionState`] plus one transition
//! function per event — not per-state subclasses — so the invariants of
//! each transition are checkable in one place.

use std::fmt;
use std::time::{Duration, Instant};

use crate::commands::{self, AckMode, AckTarget, FromServer};
use crate::frame::Frame;
use crate::{StompError, StompVersion};

/// Default multiplier applied to the negotiated receive interval before a
/// missing heart-beat is treated as a peer timeout.
pub const DEFAULT_RECEIVE_SLACK: f64 = 2.0;

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

newtype_id!(SubscriptionToken);
newtype_id!(TransactionId);
newtype_id!(ReceiptId);

/// The connection's lifecycle state. Initial: `Disconnected`. There is no
/// terminal state — a session is reusable across reconnects via
/// [`Session::flush`] and preserves subscriptions across a disconnect via
/// [`Session::replay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A tracked subscription. `context` is opaque to the session: it is
/// stored and handed back on delivery, never inspected or invoked.
#[derive(Debug, Clone)]
pub struct Subscription<Ctx> {
    pub token: SubscriptionToken,
    pub destination: String,
    pub headers: Vec<(String, String)>,
    pub ack_mode: Option<AckMode>,
    pub context: Ctx,
    /// Whether the caller supplied an explicit `id` header. When false (only
    /// possible on STOMP 1.0), the destination itself served as the
    /// subscription token, and `UNSUBSCRIBE` must reference it by
    /// `destination` rather than by `id`.
    explicit_id: bool,
}

/// A decoded `MESSAGE` frame, ready to be ACKed/NACKed or delivered to a
/// subscription's handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub destination: String,
    pub message_id: String,
    pub subscription: SubscriptionToken,
    pub ack_id: Option<String>,
    pub body: Vec<u8>,
}

/// What happened as a result of feeding a received frame to the session.
#[derive(Debug, Clone)]
pub enum SessionEvent<Ctx> {
    /// A single idle heart-beat LF; only the receive timestamp changed.
    HeartBeat,
    /// CONNECTED was received and negotiation completed.
    Connected {
        version: StompVersion,
        session_id: Option<String>,
        server: Option<String>,
    },
    /// A MESSAGE was delivered to a tracked subscription.
    Message {
        context: Ctx,
        message: DeliveredMessage,
    },
    /// A RECEIPT resolved a previously tracked receipt.
    Receipt { receipt_id: ReceiptId },
    /// An ERROR frame was received; the session has moved to Disconnected.
    Error {
        message: Option<String>,
        body: Vec<u8>,
    },
}

struct PendingReceipt {
    id: ReceiptId,
    command: &'static str,
}

/// The connection lifecycle state machine.
///
/// `Ctx` is the opaque per-subscription handler reference (e.g. a channel
/// sender, a callback id); it must be `Clone` because delivering a MESSAGE
/// hands the caller an owned copy without the session giving up its own.
pub struct Session<Ctx> {
    state: SessionState,
    requested_versions: Vec<StompVersion>,
    version: StompVersion,
    requested_heart_beat: (u32, u32),
    negotiated_heart_beat: (u32, u32),
    last_sent_at: Option<Instant>,
    last_received_at: Option<Instant>,
    receive_slack: f64,
    session_id: Option<String>,
    server: Option<String>,
    subscriptions: Vec<Subscription<Ctx>>,
    transactions: Vec<TransactionId>,
    receipts: Vec<PendingReceipt>,
    disconnect_receipt: Option<ReceiptId>,
    next_auto_id: u64,
}

impl<Ctx: Clone> Session<Ctx> {
    /// A fresh, disconnected session. `check` in the upstream client
    /// libraries toggles strict validation; this core always validates
    /// (there is no unchecked mode — see DESIGN.md).
    pub fn new() -> Session<Ctx> {
        Session {
            state: SessionState::Disconnected,
            requested_versions: Vec::new(),
            version: StompVersion::V1_0,
            requested_heart_beat: (0, 0),
            negotiated_heart_beat: (0, 0),
            last_sent_at: None,
            last_received_at: None,
            receive_slack: DEFAULT_RECEIVE_SLACK,
            session_id: None,
            server: None,
            subscriptions: Vec::new(),
            transactions: Vec::new(),
            receipts: Vec::new(),
            disconnect_receipt: None,
            next_auto_id: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn version(&self) -> StompVersion {
        self.version
    }

    pub fn id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// The negotiated (send, receive) heart-beat interval in milliseconds.
    pub fn heart_beat(&self) -> (u32, u32) {
        self.negotiated_heart_beat
    }

    fn require_state(&self, expected: SessionState) -> Result<(), StompError> {
        if self.state != expected {
            return Err(StompError::ProtocolError(format!(
                "operation requires session state {expected:?}, was {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn record_sent(&mut self, now: Instant) {
        self.last_sent_at = Some(now);
    }

    // ---- DISCONNECTED ----------------------------------------------------

    /// `connect(versions, login, passcode, host, heartBeats)` — emits the
    /// CONNECT/STOMP frame and moves to Connecting. Only valid from
    /// Disconnected.
    #[allow(clippy::too_many_arguments)]
    pub fn connect(
        &mut self,
        versions: &[StompVersion],
        login: Option<&str>,
        passcode: Option<&str>,
        host: Option<&str>,
        heart_beat: Option<(u32, u32)>,
        now: Instant,
    ) -> Result<Frame, StompError> {
        self.require_state(SessionState::Disconnected)?;
        let frame = commands::connect(versions, host, login, passcode, heart_beat, false)?;
        self.requested_versions = versions.to_vec();
        self.requested_heart_beat = heart_beat.unwrap_or((0, 0));
        self.state = SessionState::Connecting;
        self.record_sent(now);
        tracing::debug!(?versions, "sending CONNECT, awaiting CONNECTED");
        Ok(frame)
    }

    // ---- receiving server frames -------------------------------------------

    /// Feeds one received frame (or heart-beat) to the session and returns
    /// what happened. The only state-independent rule: while Disconnected,
    /// any server frame is a protocol violation — there is no connection to
    /// receive it on.
    pub fn receive(&mut self, frame: &Frame, now: Instant) -> Result<SessionEvent<Ctx>, StompError> {
        self.last_received_at = Some(now);

        if frame.is_heartbeat() {
            return Ok(SessionEvent::HeartBeat);
        }

        match self.state {
            SessionState::Disconnected => Err(StompError::ProtocolError(
                "received a server frame while disconnected".into(),
            )),
            SessionState::Connecting => self.receive_while_connecting(frame),
            SessionState::Connected | SessionState::Disconnecting => {
                self.receive_while_connected_or_disconnecting(frame)
            }
        }
    }

    fn receive_while_connecting(&mut self, frame: &Frame) -> Result<SessionEvent<Ctx>, StompError> {
        match FromServer::decode(frame)? {
            FromServer::Connected {
                version,
                session: session_id,
                server,
                heart_beat,
            } => {
                if !self.requested_versions.is_empty()
                    && !self.requested_versions.contains(&version)
                {
                    return Err(StompError::ProtocolError(format!(
                        "server negotiated version {version} which was not requested"
                    )));
                }
                let (sx, sy) = heart_beat.unwrap_or((0, 0));
                let (cx, cy) = self.requested_heart_beat;
                let send_interval = if cx == 0 || sy == 0 { 0 } else { cx.max(sy) };
                let receive_interval = if cy == 0 || sx == 0 { 0 } else { cy.max(sx) };
                self.version = version;
                self.negotiated_heart_beat = (send_interval, receive_interval);
                self.session_id = session_id.clone();
                self.server = server.clone();
                self.state = SessionState::Connected;
                tracing::info!(
                    %version,
                    send_interval,
                    receive_interval,
                    "CONNECTED: session established"
                );
                Ok(SessionEvent::Connected {
                    version,
                    session_id,
                    server,
                })
            }
            FromServer::Error { message, body } => {
                tracing::warn!(?message, "ERROR received during negotiation");
                self.state = SessionState::Disconnected;
                Ok(SessionEvent::Error { message, body })
            }
            _ => Err(StompError::ProtocolError(
                "expected CONNECTED or ERROR while connecting".into(),
            )),
        }
    }

    fn receive_while_connected_or_disconnecting(
        &mut self,
        frame: &Frame,
    ) -> Result<SessionEvent<Ctx>, StompError> {
        match FromServer::decode(frame)? {
            FromServer::Message {
                destination,
                message_id,
                subscription,
                ack,
                body,
            } => {
                let token = SubscriptionToken(subscription);
                let context = self
                    .subscriptions
                    .iter()
                    .find(|s| s.token == token)
                    .map(|s| s.context.clone())
                    .ok_or_else(|| {
                        StompError::ProtocolError(format!(
                            "MESSAGE for unknown subscription {token}"
                        ))
                    })?;
                Ok(SessionEvent::Message {
                    context,
                    message: DeliveredMessage {
                        destination,
                        message_id,
                        subscription: token,
                        ack_id: ack,
                        body,
                    },
                })
            }
            FromServer::Receipt { receipt_id } => {
                let receipt_id = ReceiptId(receipt_id);
                self.receipts.retain(|p| p.id != receipt_id);
                if self.state == SessionState::Disconnecting
                    && self.disconnect_receipt.as_ref() == Some(&receipt_id)
                {
                    self.finish_disconnect();
                }
                Ok(SessionEvent::Receipt { receipt_id })
            }
            FromServer::Error { message, body } => {
                tracing::warn!(?message, "ERROR received; closing session");
                self.force_disconnected();
                Ok(SessionEvent::Error { message, body })
            }
            FromServer::Connected { .. } => Err(StompError::ProtocolError(
                "unexpected second CONNECTED frame".into(),
            )),
        }
    }

    /// Forces the session to Disconnected, e.g. because the transport
    /// closed or timed out. Subscriptions are preserved for replay;
    /// transactions and pending receipts are discarded.
    pub fn disconnected(&mut self, reason: StompError) {
        tracing::warn!(%reason, "session forced to disconnected");
        self.force_disconnected();
    }

    fn force_disconnected(&mut self) {
        self.state = SessionState::Disconnected;
        self.transactions.clear();
        self.receipts.clear();
        self.disconnect_receipt = None;
        self.session_id = None;
    }

    fn finish_disconnect(&mut self) {
        tracing::debug!("DISCONNECT receipt received, session disconnected");
        self.force_disconnected();
    }

    // ---- CONNECTED actions -------------------------------------------------

    fn track_receipt(&mut self, receipt: Option<&str>, command: &'static str) {
        if let Some(r) = receipt {
            self.receipts.push(PendingReceipt {
                id: ReceiptId(r.to_string()),
                command,
            });
        }
    }

    fn check_transaction(&self, transaction: Option<&str>) -> Result<(), StompError> {
        if let Some(t) = transaction {
            let tx = TransactionId(t.to_string());
            if !self.transactions.contains(&tx) {
                return Err(StompError::ProtocolError(format!(
                    "transaction {t:?} is not active"
                )));
            }
        }
        Ok(())
    }

    pub fn send(
        &mut self,
        destination: &str,
        body: Vec<u8>,
        transaction: Option<&str>,
        extra_headers: &[(String, String)],
        receipt: Option<&str>,
        now: Instant,
    ) -> Result<Frame, StompError> {
        self.require_state(SessionState::Connected)?;
        self.check_transaction(transaction)?;
        let frame = commands::send(destination, body, transaction, extra_headers, receipt)?;
        self.track_receipt(receipt, "SEND");
        self.record_sent(now);
        Ok(frame)
    }

    fn next_auto_token(&mut self) -> String {
        let id = self.next_auto_id;
        self.next_auto_id += 1;
        format!("sub-{id}")
    }

    /// Subscribes to a destination. `headers` carries `destination`
    /// (required), optional `id` (required on 1.1+; auto-generated here if
    /// omitted), optional `ack`, and any broker-specific extras. Returns the
    /// SUBSCRIBE frame and the stable token to correlate future MESSAGE and
    /// UNSUBSCRIBE traffic.
    pub fn subscribe(
        &mut self,
        headers: Vec<(String, String)>,
        context: Ctx,
        receipt: Option<&str>,
        now: Instant,
    ) -> Result<(Frame, SubscriptionToken), StompError> {
        self.require_state(SessionState::Connected)?;
        let destination = headers
            .iter()
            .find(|(k, _)| k == "destination")
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                StompError::ProtocolError("subscribe requires a 'destination' header".into())
            })?;
        let explicit_id = headers.iter().find(|(k, _)| k == "id").map(|(_, v)| v.clone());
        let ack_mode = headers
            .iter()
            .find(|(k, _)| k == "ack")
            .map(|(_, v)| AckMode::parse(v))
            .transpose()?;
        let (id, explicit) = match explicit_id {
            Some(id) => (id, true),
            None if self.version == StompVersion::V1_0 => (destination.clone(), false),
            None => (self.next_auto_token(), true),
        };
        let extra: Vec<(String, String)> = headers
            .iter()
            .filter(|(k, _)| k != "destination" && k != "id" && k != "ack")
            .cloned()
            .collect();
        let id_header = if explicit { Some(id.as_str()) } else { None };
        let frame = commands::subscribe(
            self.version,
            &destination,
            id_header,
            ack_mode,
            &extra,
            receipt,
        )?;
        let token = SubscriptionToken(id.clone());
        self.subscriptions.push(Subscription {
            token: token.clone(),
            destination,
            headers: extra,
            ack_mode,
            context,
            explicit_id: explicit,
        });
        self.track_receipt(receipt, "SUBSCRIBE");
        self.record_sent(now);
        Ok((frame, token))
    }

    pub fn unsubscribe(
        &mut self,
        token: &SubscriptionToken,
        receipt: Option<&str>,
        now: Instant,
    ) -> Result<Frame, StompError> {
        self.require_state(SessionState::Connected)?;
        let position = self
            .subscriptions
            .iter()
            .position(|s| &s.token == token)
            .ok_or_else(|| StompError::ProtocolError(format!("unknown subscription {token}")))?;
        let sub = self.subscriptions.remove(position);
        let frame = if sub.explicit_id {
            commands::unsubscribe(self.version, Some(&token.0), None, receipt)?
        } else {
            commands::unsubscribe(self.version, None, Some(&sub.destination), receipt)?
        };
        self.track_receipt(receipt, "UNSUBSCRIBE");
        self.record_sent(now);
        Ok(frame)
    }

    pub fn ack(
        &mut self,
        message: &DeliveredMessage,
        transaction: Option<&str>,
        receipt: Option<&str>,
        now: Instant,
    ) -> Result<Frame, StompError> {
        self.require_state(SessionState::Connected)?;
        self.check_transaction(transaction)?;
        let target = self.ack_target(message);
        let frame = commands::ack(self.version, &target, transaction, receipt)?;
        self.track_receipt(receipt, "ACK");
        self.record_sent(now);
        Ok(frame)
    }

    pub fn nack(
        &mut self,
        message: &DeliveredMessage,
        transaction: Option<&str>,
        receipt: Option<&str>,
        now: Instant,
    ) -> Result<Frame, StompError> {
        self.require_state(SessionState::Connected)?;
        self.check_transaction(transaction)?;
        let target = self.ack_target(message);
        let frame = commands::nack(self.version, &target, transaction, receipt)?;
        self.track_receipt(receipt, "NACK");
        self.record_sent(now);
        Ok(frame)
    }

    fn ack_target(&self, message: &DeliveredMessage) -> AckTarget {
        AckTarget {
            id: message.ack_id.clone(),
            message_id: Some(message.message_id.clone()),
            subscription: Some(message.subscription.0.clone()),
        }
    }

    pub fn begin(
        &mut self,
        transaction: &str,
        receipt: Option<&str>,
        now: Instant,
    ) -> Result<Frame, StompError> {
        self.require_state(SessionState::Connected)?;
        let tx = TransactionId(transaction.to_string());
        if self.transactions.contains(&tx) {
            return Err(StompError::ProtocolError(format!(
                "transaction {transaction:?} already active"
            )));
        }
        let frame = commands::begin(transaction, receipt)?;
        self.transactions.push(tx);
        self.track_receipt(receipt, "BEGIN");
        self.record_sent(now);
        Ok(frame)
    }

    fn end_transaction(
        &mut self,
        transaction: &str,
        receipt: Option<&str>,
        now: Instant,
        commit: bool,
    ) -> Result<Frame, StompError> {
        self.require_state(SessionState::Connected)?;
        let tx = TransactionId(transaction.to_string());
        let position = self
            .transactions
            .iter()
            .position(|t| t == &tx)
            .ok_or_else(|| {
                StompError::ProtocolError(format!("transaction {transaction:?} is not active"))
            })?;
        let frame = if commit {
            commands::commit(transaction, receipt)?
        } else {
            commands::abort(transaction, receipt)?
        };
        self.transactions.remove(position);
        self.track_receipt(receipt, if commit { "COMMIT" } else { "ABORT" });
        self.record_sent(now);
        Ok(frame)
    }

    pub fn commit(
        &mut self,
        transaction: &str,
        receipt: Option<&str>,
        now: Instant,
    ) -> Result<Frame, StompError> {
        self.end_transaction(transaction, receipt, now, true)
    }

    pub fn abort(
        &mut self,
        transaction: &str,
        receipt: Option<&str>,
        now: Instant,
    ) -> Result<Frame, StompError> {
        self.end_transaction(transaction, receipt, now, false)
    }

    /// Moves to Disconnecting and emits DISCONNECT. Subscriptions survive;
    /// transactions and pending receipts are cleared once the matching
    /// RECEIPT arrives (or [`Session::disconnected`] is called directly).
    pub fn disconnect(&mut self, receipt: Option<&str>, now: Instant) -> Result<Frame, StompError> {
        self.require_state(SessionState::Connected)?;
        let frame = commands::disconnect(receipt);
        self.state = SessionState::Disconnecting;
        self.disconnect_receipt = receipt.map(|r| ReceiptId(r.to_string()));
        self.track_receipt(receipt, "DISCONNECT");
        self.record_sent(now);
        Ok(frame)
    }

    /// Fully resets the session to a fresh Disconnected state, discarding
    /// subscriptions as well — unlike a normal disconnect/reconnect cycle,
    /// which preserves them for replay.
    pub fn flush(&mut self) {
        self.state = SessionState::Disconnected;
        self.version = StompVersion::V1_0;
        self.requested_versions.clear();
        self.negotiated_heart_beat = (0, 0);
        self.last_sent_at = None;
        self.last_received_at = None;
        self.session_id = None;
        self.server = None;
        self.subscriptions.clear();
        self.transactions.clear();
        self.receipts.clear();
        self.disconnect_receipt = None;
    }

    /// Yields the (headers, context) pairs needed to rebuild every
    /// currently tracked SUBSCRIBE, in original insertion order, for
    /// reissuing after a reconnect. Does not copy subscription state out of
    /// the session — it iterates the existing records.
    pub fn replay(&self) -> impl Iterator<Item = (Vec<(String, String)>, Ctx)> + '_ {
        self.subscriptions.iter().map(|sub| {
            let mut headers = vec![("destination".to_string(), sub.destination.clone())];
            if sub.explicit_id {
                headers.push(("id".to_string(), sub.token.0.clone()));
            }
            if let Some(ack) = sub.ack_mode {
                headers.push(("ack".to_string(), ack.as_str().to_string()));
            }
            headers.extend(sub.headers.iter().cloned());
            (headers, sub.context.clone())
        })
    }

    // ---- heart-beats --------------------------------------------------------

    /// Builds the distinguished heart-beat frame and records that activity
    /// was sent at `now`.
    pub fn send_heart_beat(&mut self, now: Instant) -> Frame {
        self.record_sent(now);
        Frame::heartbeat()
    }

    /// True if the negotiated send interval has elapsed since the last
    /// frame (of any kind) was sent, meaning the transport should emit an
    /// idle heart-beat to keep the connection alive.
    pub fn should_send_heart_beat(&self, now: Instant) -> bool {
        let (send_interval, _) = self.negotiated_heart_beat;
        if send_interval == 0 {
            return false;
        }
        match self.last_sent_at {
            Some(last) => now.saturating_duration_since(last) >= Duration::from_millis(send_interval as u64),
            None => true,
        }
    }

    /// True if no bytes have arrived from the peer for longer than the
    /// negotiated receive interval times [`Session::receive_slack`].
    pub fn peer_timed_out(&self, now: Instant) -> bool {
        let (_, receive_interval) = self.negotiated_heart_beat;
        if receive_interval == 0 {
            return false;
        }
        let deadline =
            Duration::from_millis((receive_interval as f64 * self.receive_slack) as u64);
        match self.last_received_at {
            Some(last) => now.saturating_duration_since(last) >= deadline,
            None => false,
        }
    }

    pub fn receive_slack(&self) -> f64 {
        self.receive_slack
    }

    pub fn set_receive_slack(&mut self, slack: f64) {
        self.receive_slack = slack;
    }

    pub fn is_receipt_pending(&self, id: &ReceiptId) -> bool {
        self.receipts.iter().any(|p| &p.id == id)
    }

    pub fn subscriptions(&self) -> &[Subscription<Ctx>] {
        &self.subscriptions
    }
}

impl<Ctx: Clone> Default for Session<Ctx> {
    fn default() -> Self {
        Session::new()
    }
}
