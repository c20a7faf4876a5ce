//! The reconnect policy: picks the next broker to dial and how long to
//! wait first, given [`FailoverConfig`]. Pure decision logic — it never
//! opens a socket; the caller drives an actual connection attempt and
//! reports success via [`FailoverTransport::mark_connected`].

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng as _;

use super::uri::FailoverBroker;
use super::FailoverConfig;
use crate::StompError;

/// Source of randomness for shuffling the broker list and (optionally)
/// jittering reconnect delays. Injectable so tests and the example
/// scenario in the reconnect policy's own documentation can be
/// deterministic.
pub trait FailoverRng {
    fn shuffle(&mut self, brokers: &mut [FailoverBroker]);
    /// A uniformly distributed value in `0..=max_inclusive`. Only called
    /// when `max_inclusive > 0`.
    fn jitter(&mut self, max_inclusive: u64) -> u64;
}

/// The default [`FailoverRng`], backed by `rand`'s thread-local generator.
#[derive(Debug, Default)]
pub struct ThreadRng;

impl FailoverRng for ThreadRng {
    fn shuffle(&mut self, brokers: &mut [FailoverBroker]) {
        brokers.shuffle(&mut rand::thread_rng());
    }

    fn jitter(&mut self, max_inclusive: u64) -> u64 {
        rand::thread_rng().gen_range(0..=max_inclusive)
    }
}

/// Walks the configured broker list, computing the backoff delay due
/// before each attempt and exhausting after the configured attempt
/// budget. `R` defaults to [`ThreadRng`]; supply a fake for deterministic
/// tests.
pub struct FailoverTransport<R: FailoverRng = ThreadRng> {
    brokers: Vec<FailoverBroker>,
    config: FailoverConfig,
    rng: R,
    attempt: u64,
    connected_once: bool,
    exhausted: bool,
}

impl FailoverTransport<ThreadRng> {
    pub fn new(brokers: Vec<FailoverBroker>, config: FailoverConfig) -> FailoverTransport<ThreadRng> {
        FailoverTransport::with_rng(brokers, config, ThreadRng)
    }
}

impl<R: FailoverRng> FailoverTransport<R> {
    pub fn with_rng(
        mut brokers: Vec<FailoverBroker>,
        config: FailoverConfig,
        mut rng: R,
    ) -> FailoverTransport<R> {
        if config.randomize {
            rng.shuffle(&mut brokers);
        }
        FailoverTransport {
            brokers,
            config,
            rng,
            attempt: 0,
            connected_once: false,
            exhausted: false,
        }
    }

    /// The next `(broker, delay)` pair: how long to wait before dialing,
    /// and which broker to dial. Returns [`StompError::NoMoreBrokers`] once
    /// the attempt budget (startup or steady-state, whichever applies) is
    /// exhausted; stays exhausted on every subsequent call.
    pub fn next_attempt(&mut self) -> Result<(FailoverBroker, Duration), StompError> {
        if self.exhausted {
            return Err(StompError::NoMoreBrokers);
        }
        let limit = if self.connected_once {
            self.config.max_reconnect_attempts
        } else {
            self.config
                .startup_max_reconnect_attempts
                .or(self.config.max_reconnect_attempts)
        };
        if let Some(limit) = limit {
            if self.attempt >= limit {
                self.exhausted = true;
                return Err(StompError::NoMoreBrokers);
            }
        }

        let delay = self.delay_for_attempt(self.attempt);
        let broker = self.broker_for_attempt(self.attempt);
        self.attempt += 1;
        Ok((broker, delay))
    }

    /// Picks the broker for a given attempt index. With `priorityBackup`,
    /// `brokers[0]` is the primary and is retried on every other attempt;
    /// the remaining brokers are the secondaries, cycled one at a time on
    /// the attempts in between (attempt 0 = primary, 1 = secondary[0],
    /// 2 = primary, 3 = secondary[1], ...). Without `priorityBackup`, the
    /// full list is walked round-robin.
    fn broker_for_attempt(&self, attempt: u64) -> FailoverBroker {
        if self.config.priority_backup && self.brokers.len() > 1 {
            let secondaries = &self.brokers[1..];
            if attempt % 2 == 0 {
                self.brokers[0].clone()
            } else {
                let idx = ((attempt - 1) / 2) as usize % secondaries.len();
                secondaries[idx].clone()
            }
        } else {
            self.brokers[(attempt as usize) % self.brokers.len()].clone()
        }
    }

    fn delay_for_attempt(&mut self, attempt: u64) -> Duration {
        let base_ms = if attempt == 0 {
            0
        } else if !self.config.use_exponential_back_off {
            self.config.initial_reconnect_delay_ms
        } else {
            let raw = self.config.initial_reconnect_delay_ms as f64
                * self.config.back_off_multiplier.powi((attempt - 1) as i32);
            (raw.min(self.config.max_reconnect_delay_ms as f64)) as u64
        };
        let jitter_ms = if self.config.jitter_ms > 0 {
            self.rng.jitter(self.config.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base_ms + jitter_ms)
    }

    /// Reports a successful connection: resets the attempt counter (so
    /// backoff restarts from `initialReconnectDelay`) and switches the
    /// attempt budget from `startupMaxReconnectAttempts` to
    /// `maxReconnectAttempts` for any future reconnect.
    pub fn mark_connected(&mut self) {
        self.attempt = 0;
        self.exhausted = false;
        self.connected_once = true;
    }

    pub fn brokers(&self) -> &[FailoverBroker] {
        &self.brokers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoOpRng;
    impl FailoverRng for NoOpRng {
        fn shuffle(&mut self, _brokers: &mut [FailoverBroker]) {}
        fn jitter(&mut self, _max_inclusive: u64) -> u64 {
            0
        }
    }

    fn broker(host: &str, port: u16) -> FailoverBroker {
        FailoverBroker {
            scheme: "tcp".into(),
            host: host.into(),
            port,
        }
    }

    #[test]
    fn documented_scenario_matches_exact_delay_sequence() {
        let config = FailoverConfig {
            randomize: false,
            initial_reconnect_delay_ms: 100,
            max_reconnect_delay_ms: 500,
            back_off_multiplier: 2.0,
            use_exponential_back_off: true,
            max_reconnect_attempts: Some(5),
            ..FailoverConfig::default()
        };
        let mut transport =
            FailoverTransport::with_rng(vec![broker("h1", 1), broker("h2", 2)], config, NoOpRng);

        let expected = [
            ("h1", 0u64),
            ("h2", 100),
            ("h1", 200),
            ("h2", 400),
            ("h1", 500),
        ];
        for (host, delay_ms) in expected {
            let (b, d) = transport.next_attempt().unwrap();
            assert_eq!(b.host, host);
            assert_eq!(d, Duration::from_millis(delay_ms));
        }
        assert!(matches!(
            transport.next_attempt(),
            Err(StompError::NoMoreBrokers)
        ));
        assert!(matches!(
            transport.next_attempt(),
            Err(StompError::NoMoreBrokers)
        ));
    }

    #[test]
    fn mark_connected_resets_backoff_and_switches_attempt_budget() {
        let config = FailoverConfig {
            randomize: false,
            initial_reconnect_delay_ms: 10,
            max_reconnect_delay_ms: 1000,
            back_off_multiplier: 2.0,
            use_exponential_back_off: true,
            startup_max_reconnect_attempts: Some(1),
            max_reconnect_attempts: Some(3),
            ..FailoverConfig::default()
        };
        let mut transport = FailoverTransport::with_rng(vec![broker("h1", 1)], config, NoOpRng);

        transport.next_attempt().unwrap();
        assert!(transport.next_attempt().is_err());

        transport.mark_connected();
        let (_, delay) = transport.next_attempt().unwrap();
        assert_eq!(delay, Duration::ZERO);
        transport.next_attempt().unwrap();
        transport.next_attempt().unwrap();
        assert!(transport.next_attempt().is_err());
    }

    #[test]
    fn constant_backoff_when_exponential_disabled() {
        let config = FailoverConfig {
            randomize: false,
            initial_reconnect_delay_ms: 250,
            use_exponential_back_off: false,
            max_reconnect_attempts: Some(3),
            ..FailoverConfig::default()
        };
        let mut transport = FailoverTransport::with_rng(vec![broker("h1", 1)], config, NoOpRng);
        assert_eq!(transport.next_attempt().unwrap().1, Duration::ZERO);
        assert_eq!(
            transport.next_attempt().unwrap().1,
            Duration::from_millis(250)
        );
        assert_eq!(
            transport.next_attempt().unwrap().1,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn priority_backup_retries_primary_and_cycles_secondaries() {
        let config = FailoverConfig {
            randomize: false,
            priority_backup: true,
            max_reconnect_attempts: Some(6),
            ..FailoverConfig::default()
        };
        let mut transport = FailoverTransport::with_rng(
            vec![broker("primary", 1), broker("sec-a", 2), broker("sec-b", 3)],
            config,
            NoOpRng,
        );
        let hosts: Vec<_> = (0..6)
            .map(|_| transport.next_attempt().unwrap().0.host)
            .collect();
        assert_eq!(
            hosts,
            vec!["primary", "sec-a", "primary", "sec-b", "primary", "sec-a"]
        );
    }

    #[test]
    fn round_robins_over_more_than_two_brokers() {
        let config = FailoverConfig {
            randomize: false,
            max_reconnect_attempts: Some(4),
            ..FailoverConfig::default()
        };
        let mut transport = FailoverTransport::with_rng(
            vec![broker("a", 1), broker("b", 2), broker("c", 3)],
            config,
            NoOpRng,
        );
        let hosts: Vec<_> = (0..4)
            .map(|_| transport.next_attempt().unwrap().0.host)
            .collect();
        assert_eq!(hosts, vec!["a", "b", "c", "a"]);
    }
}
