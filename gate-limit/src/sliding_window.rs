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

/// An exact sliding-window log.
///
/// Keeps the timestamps of admitted requests and prunes everything older
/// than the trailing window on each check, so at most `limit` requests are
/// admitted in *any* interval of `window` seconds. No boundary bursting,
/// at the cost of O(k) work per check where `k` is the log length.
#[derive(Debug)]
pub struct SlidingWindow {
    storage: Arc<dyn Storage>,
    time: TimeSource,
}

impl SlidingWindow {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_time_source(storage, TimeSource::system())
    }

    pub fn with_time_source(storage: Arc<dyn Storage>, time: TimeSource) -> Self {
        Self { storage, time }
    }
}

impl Strategy for SlidingWindow {
    fn check(&self, identifier: &str, limit: u32, window: Duration) -> Result<Decision, LimitError> {
        validate_quota(limit, window)?;
        let now = self.time.now();
        let window_secs = window.as_secs_f64();
        let mut decision = None;

        self.storage.update(identifier, &mut |stored| {
            let mut log = match stored {
                Some(StrategyState::SlidingWindow { log }) => log.clone(),
                _ => Vec::new(),
            };

            // Entries are appended in order, so the head stays the oldest.
            let cutoff = now - window_secs;
            log.retain(|&ts| ts > cutoff);

            let allowed = (log.len() as u32) < limit;
            if allowed {
                log.push(now);
            }

            let remaining = limit.saturating_sub(log.len() as u32);
            let reset_at = log
                .first()
                .map_or(now + window_secs, |&oldest| oldest + window_secs);

            decision = Some(Decision {
                allowed,
                metadata: Metadata {
                    limit,
                    remaining,
                    reset_at: reset_at as u64,
                    retry_after: if allowed {
                        0
                    } else {
                        whole_seconds_until(reset_at, now)
                    },
                },
            });

            if allowed {
                Mutation::Put {
                    state: StrategyState::SlidingWindow { log },
                    ttl: Some(window * 2),
                }
            } else {
                // A denial appends nothing; the stored log stays as-is and
                // its stale entries fall out on the next admission or TTL.
                Mutation::Keep
            }
        })?;

        Ok(decision.expect("storage backend must invoke the update closure"))
    }

    fn reset(&self, identifier: &str, _window: Duration) -> Result<(), LimitError> {
        Ok(self.storage.delete(identifier)?)
    }
}
