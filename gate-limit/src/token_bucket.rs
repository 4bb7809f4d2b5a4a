use std::sync::Arc;
use std::time::Duration;

use crate::Decision;
use crate::LimitError;
use crate::Metadata;
use crate::Strategy;
use crate::TimeSource;
use crate::clock::whole_seconds_until;
use crate::storage::Mutation;
use crate::storage::Storage;
use crate::storage::StrategyState;
use crate::validate_quota;

/// A token bucket over keyed, TTL-backed state.
///
/// Each identifier gets a bucket of `limit` tokens refilled continuously at
/// `limit / window` tokens per second. A fresh identifier starts with a full
/// bucket, so bursts up to `limit` in a single instant are allowed by
/// design. State persists on every check, denied or not, so the refill
/// clock always advances to the latest observation.
#[derive(Debug)]
pub struct TokenBucket {
    storage: Arc<dyn Storage>,
    time: TimeSource,
}

impl TokenBucket {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_time_source(storage, TimeSource::system())
    }

    pub fn with_time_source(storage: Arc<dyn Storage>, time: TimeSource) -> Self {
        Self { storage, time }
    }

    /// Project the decision a `check` would reach right now, without
    /// consuming a token or advancing the refill clock.
    pub fn peek(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> Result<Decision, LimitError> {
        validate_quota(limit, window)?;
        let now = self.time.now();
        let tokens = match self.storage.get(identifier)? {
            Some(StrategyState::TokenBucket {
                tokens,
                last_refill,
            }) => refill(tokens, last_refill, now, limit, window),
            _ => limit as f64,
        };
        Ok(decide(tokens >= 1.0, tokens, limit, window, now))
    }
}

impl Strategy for TokenBucket {
    fn check(&self, identifier: &str, limit: u32, window: Duration) -> Result<Decision, LimitError> {
        validate_quota(limit, window)?;
        let now = self.time.now();
        let mut decision = None;

        self.storage.update(identifier, &mut |stored| {
            let tokens = match stored {
                Some(StrategyState::TokenBucket {
                    tokens,
                    last_refill,
                }) => refill(*tokens, *last_refill, now, limit, window),
                // A different variant under this key belonged to another
                // strategy; start over with a full bucket.
                _ => limit as f64,
            };

            let allowed = tokens >= 1.0;
            let tokens = if allowed { tokens - 1.0 } else { tokens };
            decision = Some(decide(allowed, tokens, limit, window, now));

            Mutation::Put {
                state: StrategyState::TokenBucket {
                    tokens,
                    last_refill: now,
                },
                ttl: Some(window * 2),
            }
        })?;

        Ok(decision.expect("storage backend must invoke the update closure"))
    }

    fn reset(&self, identifier: &str, _window: Duration) -> Result<(), LimitError> {
        Ok(self.storage.delete(identifier)?)
    }
}

fn refill(tokens: f64, last_refill: f64, now: f64, limit: u32, window: Duration) -> f64 {
    let rate = limit as f64 / window.as_secs_f64();
    let elapsed = (now - last_refill).max(0.0);
    (tokens + elapsed * rate).min(limit as f64)
}

fn decide(allowed: bool, tokens: f64, limit: u32, window: Duration, now: f64) -> Decision {
    let rate = limit as f64 / window.as_secs_f64();
    // A part-full bucket gains its next whole token at a predictable
    // offset; a full bucket resets "now".
    let reset_at = if tokens < limit as f64 {
        now + (1.0 - tokens.fract()) / rate
    } else {
        now
    };

    Decision {
        allowed,
        metadata: Metadata {
            limit,
            remaining: tokens as u32,
            reset_at: reset_at as u64,
            retry_after: if allowed {
                0
            } else {
                whole_seconds_until(reset_at, now)
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use more_asserts::assert_ge;

    use crate::InMemoryStorage;

    use super::*;

    fn bucket() -> (TokenBucket, Arc<quanta::Mock>) {
        let (time, mock) = TimeSource::mock();
        let storage = Arc::new(InMemoryStorage::with_time_source(time.clone()));
        (TokenBucket::with_time_source(storage, time), mock)
    }

    #[test]
    fn it_allows_bursts_up_to_the_limit() {
        let (rl, _mock) = bucket();

        for expected_remaining in (0..5u32).rev() {
            let decision = rl.check("user1", 5, Duration::from_secs(10)).unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.metadata.remaining, expected_remaining);
        }

        let denied = rl.check("user1", 5, Duration::from_secs(10)).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.metadata.remaining, 0);
        assert_ge!(denied.metadata.retry_after, 1);
    }

    #[test]
    fn it_refills_completely_after_one_window() {
        let (rl, mock) = bucket();

        for _ in 0..3 {
            assert!(rl.check("user1", 3, Duration::from_secs(10)).unwrap().allowed);
        }
        assert!(!rl.check("user1", 3, Duration::from_secs(10)).unwrap().allowed);

        mock.increment(Duration::from_secs(10));

        let decision = rl.check("user1", 3, Duration::from_secs(10)).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.metadata.remaining, 2);
    }

    #[test]
    fn it_refills_partially_at_the_configured_rate() {
        let (rl, mock) = bucket();

        // 5 tokens / 10s = 0.5 tokens per second.
        for _ in 0..5 {
            let _ = rl.check("user1", 5, Duration::from_secs(10)).unwrap();
        }
        assert!(!rl.check("user1", 5, Duration::from_secs(10)).unwrap().allowed);

        mock.increment(Duration::from_secs(2));

        let decision = rl.check("user1", 5, Duration::from_secs(10)).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.metadata.remaining, 0);
        assert!(!rl.check("user1", 5, Duration::from_secs(10)).unwrap().allowed);
    }

    #[test]
    fn a_denied_check_still_advances_the_refill_clock() {
        let (rl, mock) = bucket();
        let window = Duration::from_secs(10);

        assert!(rl.check("user1", 1, window).unwrap().allowed);

        // Half a token has accrued; denied, but the observation persists.
        mock.increment(Duration::from_secs(5));
        assert!(!rl.check("user1", 1, window).unwrap().allowed);

        mock.increment(Duration::from_secs(5));
        assert!(rl.check("user1", 1, window).unwrap().allowed);
    }

    #[test]
    fn retry_after_is_positive_only_when_denied() {
        let (rl, _mock) = bucket();

        let allowed = rl.check("user1", 2, Duration::from_secs(10)).unwrap();
        assert_eq!(allowed.metadata.retry_after, 0);

        let _ = rl.check("user1", 2, Duration::from_secs(10)).unwrap();
        let denied = rl.check("user1", 2, Duration::from_secs(10)).unwrap();
        assert!(!denied.allowed);
        assert_ge!(denied.metadata.retry_after, 1);
    }

    #[test]
    fn identifiers_are_isolated() {
        let (rl, _mock) = bucket();

        for _ in 0..3 {
            let _ = rl.check("user1", 3, Duration::from_secs(10)).unwrap();
        }
        assert!(!rl.check("user1", 3, Duration::from_secs(10)).unwrap().allowed);

        let decision = rl.check("user2", 3, Duration::from_secs(10)).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.metadata.remaining, 2);
    }

    #[test]
    fn reset_restores_a_full_bucket() {
        let (rl, _mock) = bucket();
        let window = Duration::from_secs(10);

        for _ in 0..3 {
            let _ = rl.check("user1", 3, window).unwrap();
        }
        assert!(!rl.check("user1", 3, window).unwrap().allowed);

        rl.reset("user1", window).unwrap();

        let decision = rl.check("user1", 3, window).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.metadata.remaining, 2);
    }

    #[test]
    fn peek_reports_without_consuming() {
        let (rl, _mock) = bucket();
        let window = Duration::from_secs(10);

        let _ = rl.check("user1", 3, window).unwrap();

        let peeked = rl.peek("user1", 3, window).unwrap();
        assert!(peeked.allowed);
        assert_eq!(peeked.metadata.remaining, 2);

        // Peeking again sees the same state; checking consumes from it.
        let peeked = rl.peek("user1", 3, window).unwrap();
        assert_eq!(peeked.metadata.remaining, 2);
        let checked = rl.check("user1", 3, window).unwrap();
        assert_eq!(checked.metadata.remaining, 1);
    }

    #[test]
    fn peek_on_an_unseen_identifier_reports_a_full_bucket() {
        let (rl, _mock) = bucket();

        let peeked = rl.peek("new", 5, Duration::from_secs(10)).unwrap();
        assert!(peeked.allowed);
        assert_eq!(peeked.metadata.remaining, 5);
        assert_eq!(peeked.metadata.retry_after, 0);
    }

    #[test]
    fn foreign_state_under_the_key_starts_a_fresh_bucket() {
        let (time, _mock) = TimeSource::mock();
        let storage = Arc::new(InMemoryStorage::with_time_source(time.clone()));
        storage
            .set(
                "user1",
                StrategyState::SlidingWindow { log: vec![0.0] },
                None,
            )
            .unwrap();

        let rl = TokenBucket::with_time_source(storage, time);
        let decision = rl.check("user1", 5, Duration::from_secs(10)).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.metadata.remaining, 4);
    }

    #[test]
    fn zero_quota_is_a_configuration_error() {
        let (rl, _mock) = bucket();

        assert_eq!(
            rl.check("user1", 0, Duration::from_secs(10)),
            Err(LimitError::InvalidLimit)
        );
        assert_eq!(
            rl.check("user1", 5, Duration::ZERO),
            Err(LimitError::InvalidWindow)
        );
    }

    #[test]
    fn simultaneous_checks_admit_exactly_the_limit() {
        use std::thread;

        let limit = 50;
        let (time, _mock) = TimeSource::mock();
        let storage = Arc::new(InMemoryStorage::with_time_source(time.clone()));
        let rl = Arc::new(TokenBucket::with_time_source(storage, time));

        let handles: Vec<_> = (0..limit + 10)
            .map(|_| {
                let rl = Arc::clone(&rl);
                thread::spawn(move || {
                    rl.check("user1", limit, Duration::from_secs(60))
                        .unwrap()
                        .allowed
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&allowed| allowed)
            .count();
        assert_eq!(admitted, limit as usize);
    }
}
