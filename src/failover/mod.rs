//! The `failover:` transport: a URI scheme naming a broker list plus a
//! reconnect policy, and the policy object that walks it.
//!
//! This module only decides *which broker, after how long*; dialing the
//! broker and driving the STOMP handshake over the resulting socket is the
//! caller's job (typically paired with [`crate::codec::StompCodec`] and
//! [`crate::session::Session`]).

mod transport;
mod uri;

pub use transport::{FailoverTransport, FailoverRng, ThreadRng};
pub use uri::FailoverBroker;

/// The reconnect policy parsed out of a `failover:` URI's query string.
/// Field names mirror the query parameters so `DESIGN.md` and the parser
/// in [`uri`] can be read side by side.
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverConfig {
    pub randomize: bool,
    pub priority_backup: bool,
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub back_off_multiplier: f64,
    pub use_exponential_back_off: bool,
    /// `None` means unlimited attempts.
    pub max_reconnect_attempts: Option<u64>,
    /// Governs only the very first connection sequence, before the
    /// transport has ever connected successfully. `None` inherits
    /// `max_reconnect_attempts`.
    pub startup_max_reconnect_attempts: Option<u64>,
    /// Extra random delay (uniformly `0..=jitter_ms`) added on top of the
    /// computed backoff. Not part of the upstream broker's parameter set;
    /// zero unless explicitly requested, so it never perturbs a URI that
    /// doesn't mention it.
    pub jitter_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        FailoverConfig {
            randomize: true,
            priority_backup: false,
            initial_reconnect_delay_ms: 10,
            max_reconnect_delay_ms: 30_000,
            back_off_multiplier: 2.0,
            use_exponential_back_off: true,
            max_reconnect_attempts: None,
            startup_max_reconnect_attempts: None,
            jitter_ms: 0,
        }
    }
}

/// Parses a `failover:(tcp://host:port,...)?key=value&...` URI into its
/// broker list and reconnect policy.
pub fn parse(uri: &str) -> Result<(Vec<FailoverBroker>, FailoverConfig), crate::StompError> {
    uri::parse(uri)
}
