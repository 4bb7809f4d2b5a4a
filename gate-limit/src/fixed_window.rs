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

/// Discrete windows aligned to multiples of the window length.
///
/// State is keyed by `identifier:window_id`, so crossing a boundary starts
/// a fresh counter and the old window's key is left to expire via TTL. The
/// cheapest strategy, with the well-known tradeoff that a burst straddling
/// a boundary can admit up to `2×limit` requests; that is accepted behavior
/// for this algorithm, not a defect.
#[derive(Debug)]
pub struct FixedWindow {
    storage: Arc<dyn Storage>,
    time: TimeSource,
}

impl FixedWindow {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_time_source(storage, TimeSource::system())
    }

    pub fn with_time_source(storage: Arc<dyn Storage>, time: TimeSource) -> Self {
        Self { storage, time }
    }

    fn window_key(identifier: &str, window_id: u64) -> String {
        format!("{identifier}:{window_id}")
    }
}

impl Strategy for FixedWindow {
    fn check(&self, identifier: &str, limit: u32, window: Duration) -> Result<Decision, LimitError> {
        validate_quota(limit, window)?;
        let now = self.time.now();
        let window_secs = window.as_secs_f64();
        let window_id = (now / window_secs).floor() as u64;
        let key = Self::window_key(identifier, window_id);
        let mut decision = None;

        self.storage.update(&key, &mut |stored| {
            let count = match stored {
                Some(StrategyState::FixedWindow {
                    count,
                    window_id: stored_id,
                }) if *stored_id == window_id => *count,
                _ => 0,
            };

            let allowed = count < limit;
            let count = if allowed { count + 1 } else { count };

            // Absolute boundary, aligned to multiples of the window; not
            // relative to the first request in it.
            let reset_at = (window_id + 1) as f64 * window_secs;

            decision = Some(Decision {
                allowed,
                metadata: Metadata {
                    limit,
                    remaining: limit.saturating_sub(count),
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
                    state: StrategyState::FixedWindow { count, window_id },
                    ttl: Some(window * 2),
                }
            } else {
                Mutation::Keep
            }
        })?;

        Ok(decision.expect("storage backend must invoke the update closure"))
    }

    fn reset(&self, identifier: &str, window: Duration) -> Result<(), LimitError> {
        // Only the current window's key influences decisions; earlier ones
        // age out via TTL.
        let window_id = (self.time.now() / window.as_secs_f64()).floor() as u64;
        Ok(self
            .storage
            .delete(&Self::window_key(identifier, window_id))?)
    }
}
