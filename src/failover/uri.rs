//! Parsing for the `failover:(tcp://host:port,...)?key=value&...` URI
//! scheme: a parenthesized broker list followed by an optional query
//! string of policy overrides.
//!
//! The bracketed list isn't itself a valid URL (commas and parens aren't
//! legal there), so only the individual broker URIs and the trailing query
//! string are handed to the `url` crate; the outer shape is split by hand.

use url::Url;

use super::FailoverConfig;
use crate::StompError;

/// One broker endpoint inside a `failover:` URI's parenthesized list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverBroker {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl FailoverBroker {
    fn parse(raw: &str) -> Result<FailoverBroker, StompError> {
        let url = Url::parse(raw)
            .map_err(|e| StompError::MalformedUri(format!("invalid broker URI {raw:?}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| StompError::MalformedUri(format!("broker URI {raw:?} has no host")))?
            .to_string();
        let port = url
            .port()
            .ok_or_else(|| StompError::MalformedUri(format!("broker URI {raw:?} has no port")))?;
        Ok(FailoverBroker {
            scheme: url.scheme().to_string(),
            host,
            port,
        })
    }
}

/// Parses a complete `failover:(...)?...` URI, or the short form
/// `failover:tcp://h:p` naming exactly one broker with no parentheses and
/// no policy overrides, into the broker list and the reconnect policy it
/// carries. Keys the query string doesn't recognize are rejected as
/// malformed, matching the source format's strictness — a silently-ignored
/// typo in a reconnect parameter is worse than a rejected one.
pub fn parse(uri: &str) -> Result<(Vec<FailoverBroker>, FailoverConfig), StompError> {
    let rest = uri
        .strip_prefix("failover:")
        .ok_or_else(|| StompError::MalformedUri("missing 'failover:' scheme".into()))?;

    let Some(rest) = rest.strip_prefix('(') else {
        // Short form: a single bare broker URI, no query string of overrides.
        let broker = FailoverBroker::parse(rest)?;
        return Ok((vec![broker], FailoverConfig::default()));
    };
    let close = rest
        .find(')')
        .ok_or_else(|| StompError::MalformedUri("unterminated broker list, missing ')'".into()))?;
    let (list, remainder) = rest.split_at(close);
    let query = remainder.strip_prefix(')').unwrap_or("");

    let brokers: Vec<FailoverBroker> = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(FailoverBroker::parse)
        .collect::<Result<_, _>>()?;
    if brokers.is_empty() {
        return Err(StompError::MalformedUri(
            "failover URI names no brokers".into(),
        ));
    }

    let mut config = FailoverConfig::default();
    if let Some(query) = query.strip_prefix('?') {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            apply_param(&mut config, &key, &value)?;
        }
    } else if !query.is_empty() {
        return Err(StompError::MalformedUri(format!(
            "unexpected trailing characters after broker list: {query:?}"
        )));
    }

    Ok((brokers, config))
}

fn apply_param(config: &mut FailoverConfig, key: &str, value: &str) -> Result<(), StompError> {
    fn parse_bool(key: &str, value: &str) -> Result<bool, StompError> {
        value
            .parse()
            .map_err(|_| StompError::MalformedUri(format!("{key} expects true/false, got {value:?}")))
    }
    fn parse_u64(key: &str, value: &str) -> Result<u64, StompError> {
        value
            .parse()
            .map_err(|_| StompError::MalformedUri(format!("{key} expects an integer, got {value:?}")))
    }
    fn parse_f64(key: &str, value: &str) -> Result<f64, StompError> {
        value
            .parse()
            .map_err(|_| StompError::MalformedUri(format!("{key} expects a number, got {value:?}")))
    }
    /// `-1` is the documented sentinel for "no limit" (`maxReconnectAttempts`)
    /// or "inherit the other field" (`startupMaxReconnectAttempts`); any
    /// other negative value is malformed.
    fn parse_attempt_limit(key: &str, value: &str) -> Result<Option<u64>, StompError> {
        let n: i64 = value
            .parse()
            .map_err(|_| StompError::MalformedUri(format!("{key} expects an integer, got {value:?}")))?;
        match n {
            -1 => Ok(None),
            n if n < 0 => Err(StompError::MalformedUri(format!(
                "{key} expects -1 or a non-negative integer, got {value:?}"
            ))),
            n => Ok(Some(n as u64)),
        }
    }

    match key {
        "randomize" => config.randomize = parse_bool(key, value)?,
        "priorityBackup" => config.priority_backup = parse_bool(key, value)?,
        "initialReconnectDelay" => config.initial_reconnect_delay_ms = parse_u64(key, value)?,
        "maxReconnectDelay" => config.max_reconnect_delay_ms = parse_u64(key, value)?,
        "backOffMultiplier" => config.back_off_multiplier = parse_f64(key, value)?,
        "useExponentialBackOff" => config.use_exponential_back_off = parse_bool(key, value)?,
        "maxReconnectAttempts" => {
            config.max_reconnect_attempts = parse_attempt_limit(key, value)?;
        }
        "startupMaxReconnectAttempts" => {
            config.startup_max_reconnect_attempts = parse_attempt_limit(key, value)?;
        }
        "reconnectDelayJitter" => config.jitter_ms = parse_u64(key, value)?,
        other => {
            return Err(StompError::MalformedUri(format!(
                "unrecognized failover parameter: {other:?}"
            )))
        }
    }
    Ok(())
}
