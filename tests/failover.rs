//! End-to-end: parsing a `failover:` URI and walking the resulting
//! reconnect policy produces the exact broker/delay sequence the policy's
//! parameters describe, deterministically.

use std::time::Duration;

use stomp_core::failover::{self, FailoverRng, FailoverTransport};
use stomp_core::StompError;

struct Deterministic;
impl FailoverRng for Deterministic {
    fn shuffle(&mut self, _brokers: &mut [failover::FailoverBroker]) {}
    fn jitter(&mut self, _max_inclusive: u64) -> u64 {
        0
    }
}

#[test]
fn documented_two_broker_sequence_ends_in_no_more_brokers() {
    let (brokers, config) = failover::parse(
        "failover:(tcp://h1:1,tcp://h2:2)?randomize=false&initialReconnectDelay=100&\
         backOffMultiplier=2&useExponentialBackOff=true&maxReconnectDelay=500&\
         maxReconnectAttempts=5",
    )
    .unwrap();
    let mut transport = FailoverTransport::with_rng(brokers, config, Deterministic);

    let expected = [
        ("h1", 0u64),
        ("h2", 100),
        ("h1", 200),
        ("h2", 400),
        ("h1", 500),
    ];
    for (host, delay_ms) in expected {
        let (broker, delay) = transport.next_attempt().unwrap();
        assert_eq!(broker.host, host);
        assert_eq!(delay, Duration::from_millis(delay_ms));
    }
    assert!(matches!(transport.next_attempt(), Err(StompError::NoMoreBrokers)));
}

#[test]
fn short_form_uri_with_no_parens_produces_a_single_broker() {
    let (brokers, config) = failover::parse("failover:tcp://h:61613").unwrap();
    assert_eq!(brokers.len(), 1);
    assert_eq!(brokers[0].host, "h");
    assert_eq!(brokers[0].port, 61613);
    let mut transport = FailoverTransport::with_rng(brokers, config, Deterministic);
    assert_eq!(transport.next_attempt().unwrap().0.host, "h");
}

#[test]
fn malformed_uri_is_rejected_before_any_broker_is_chosen() {
    assert!(failover::parse("failover:(not a url)").is_err());
    assert!(failover::parse("not-failover-at-all").is_err());
}

#[test]
fn reconnecting_after_a_successful_connection_resets_the_backoff() {
    let (brokers, config) = failover::parse(
        "failover:(tcp://only:61613)?initialReconnectDelay=50&maxReconnectAttempts=2",
    )
    .unwrap();
    let mut transport = FailoverTransport::with_rng(brokers, config, Deterministic);

    transport.next_attempt().unwrap();
    transport.next_attempt().unwrap();
    assert!(transport.next_attempt().is_err());

    transport.mark_connected();
    let (_, delay) = transport.next_attempt().unwrap();
    assert_eq!(delay, Duration::ZERO, "backoff restarts after a successful connect");
}
