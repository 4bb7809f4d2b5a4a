use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Decision;
use crate::FixedWindow;
use crate::LimitError;
use crate::RateLimitConfig;
use crate::SlidingWindow;
use crate::Strategy;
use crate::TimeSource;
use crate::TokenBucket;
use crate::storage::InMemoryStorage;
use crate::storage::Storage;
use crate::validate_quota;

/// Which admission algorithm a limiter runs, chosen once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    TokenBucket,
    SlidingWindow,
    FixedWindow,
}

/// The facade binding one strategy to one storage instance plus defaults.
///
/// Construct one explicitly and pass it by `Arc` through your request
/// context; there is no global limiter. Multiple independently configured
/// limiters coexist cleanly, each owning its own storage (layering several
/// over one shared storage requires disjoint identifier namespaces).
///
/// # Example
///
/// ```rust
/// use gate_limit::RateLimitConfig;
/// use gate_limit::RateLimiter;
///
/// let limiter = RateLimiter::from_config(&RateLimitConfig::moderate()).unwrap();
/// assert!(limiter.check("ip:203.0.113.9").unwrap().allowed);
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    strategy: Box<dyn Strategy>,
    storage: Arc<dyn Storage>,
    default_limit: u32,
    default_window: Duration,
}

impl RateLimiter {
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Build a limiter over a fresh in-memory store from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, LimitError> {
        config.validate()?;
        Self::builder()
            .strategy(config.strategy)
            .default_limit(config.default_limit)
            .default_window(Duration::from_secs(config.default_window_secs))
            .build()
    }

    /// Check whether `identifier` may proceed under the configured
    /// defaults.
    ///
    /// Counting is final: a request that is admitted here and later aborted
    /// by its caller is not refunded.
    pub fn check(&self, identifier: &str) -> Result<Decision, LimitError> {
        self.check_with(identifier, None, None)
    }

    /// Check with per-call overrides; `None` falls back to the defaults.
    pub fn check_with(
        &self,
        identifier: &str,
        limit: Option<u32>,
        window: Option<Duration>,
    ) -> Result<Decision, LimitError> {
        let limit = limit.unwrap_or(self.default_limit);
        let window = window.unwrap_or(self.default_window);
        self.strategy.check(identifier, limit, window)
    }

    /// Clear all strategy state for `identifier`, as if it had never been
    /// seen. Calling this twice in a row is the same as calling it once.
    pub fn reset(&self, identifier: &str) -> Result<(), LimitError> {
        self.strategy.reset(identifier, self.default_window)
    }

    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }

    pub fn default_window(&self) -> Duration {
        self.default_window
    }

    /// The storage instance backing this limiter.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }
}

/// Builder for [`RateLimiter`].
#[derive(Debug)]
pub struct RateLimiterBuilder {
    kind: StrategyKind,
    storage: Option<Arc<dyn Storage>>,
    time: Option<TimeSource>,
    default_limit: u32,
    default_window: Duration,
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self {
            kind: StrategyKind::default(),
            storage: None,
            time: None,
            default_limit: 100,
            default_window: Duration::from_secs(60),
        }
    }
}

impl RateLimiterBuilder {
    pub fn strategy(mut self, kind: StrategyKind) -> Self {
        self.kind = kind;
        self
    }

    /// Use a caller-supplied storage backend instead of a fresh in-memory
    /// store.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use a caller-supplied clock; tests inject [`TimeSource::mock`] here.
    pub fn time_source(mut self, time: TimeSource) -> Self {
        self.time = Some(time);
        self
    }

    pub fn default_limit(mut self, limit: u32) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn default_window(mut self, window: Duration) -> Self {
        self.default_window = window;
        self
    }

    /// # Errors
    ///
    /// Fails fast with [`LimitError::InvalidLimit`] or
    /// [`LimitError::InvalidWindow`] on a zero default.
    pub fn build(self) -> Result<RateLimiter, LimitError> {
        validate_quota(self.default_limit, self.default_window)?;

        let time = self.time.unwrap_or_else(TimeSource::system);
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::with_time_source(time.clone())));

        let strategy: Box<dyn Strategy> = match self.kind {
            StrategyKind::TokenBucket => {
                Box::new(TokenBucket::with_time_source(Arc::clone(&storage), time))
            }
            StrategyKind::SlidingWindow => {
                Box::new(SlidingWindow::with_time_source(Arc::clone(&storage), time))
            }
            StrategyKind::FixedWindow => {
                Box::new(FixedWindow::with_time_source(Arc::clone(&storage), time))
            }
        };

        Ok(RateLimiter {
            strategy,
            storage,
            default_limit: self.default_limit,
            default_window: self.default_window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(kind: StrategyKind, limit: u32, window: Duration) -> RateLimiter {
        let (time, _mock) = TimeSource::mock();
        RateLimiter::builder()
            .strategy(kind)
            .default_limit(limit)
            .default_window(window)
            .time_source(time)
            .build()
            .unwrap()
    }

    #[test]
    fn defaults_fill_in_for_omitted_overrides() {
        let limiter = limiter(StrategyKind::TokenBucket, 3, Duration::from_secs(10));

        for _ in 0..3 {
            assert!(limiter.check("user1").unwrap().allowed);
        }
        let denied = limiter.check("user1").unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.metadata.limit, 3);
    }

    #[test]
    fn per_call_overrides_take_precedence() {
        let limiter = limiter(StrategyKind::TokenBucket, 100, Duration::from_secs(60));

        let decision = limiter
            .check_with("user1", Some(2), Some(Duration::from_secs(10)))
            .unwrap();
        assert_eq!(decision.metadata.limit, 2);
        assert_eq!(decision.metadata.remaining, 1);

        let _ = limiter
            .check_with("user1", Some(2), Some(Duration::from_secs(10)))
            .unwrap();
        let denied = limiter
            .check_with("user1", Some(2), Some(Duration::from_secs(10)))
            .unwrap();
        assert!(!denied.allowed);
    }

    #[test]
    fn every_strategy_kind_enforces_its_default_quota() {
        for kind in [
            StrategyKind::TokenBucket,
            StrategyKind::SlidingWindow,
            StrategyKind::FixedWindow,
        ] {
            let limiter = limiter(kind, 2, Duration::from_secs(30));
            assert!(limiter.check("user1").unwrap().allowed, "{kind:?}");
            assert!(limiter.check("user1").unwrap().allowed, "{kind:?}");
            assert!(!limiter.check("user1").unwrap().allowed, "{kind:?}");
        }
    }

    #[test]
    fn reset_is_idempotent() {
        for kind in [
            StrategyKind::TokenBucket,
            StrategyKind::SlidingWindow,
            StrategyKind::FixedWindow,
        ] {
            let limiter = limiter(kind, 2, Duration::from_secs(30));
            let _ = limiter.check("user1").unwrap();
            let _ = limiter.check("user1").unwrap();

            limiter.reset("user1").unwrap();
            limiter.reset("user1").unwrap();

            let decision = limiter.check("user1").unwrap();
            assert!(decision.allowed, "{kind:?}");
            assert_eq!(decision.metadata.remaining, 1, "{kind:?}");
        }
    }

    #[test]
    fn exhausting_one_identifier_leaves_others_untouched() {
        let limiter = limiter(StrategyKind::SlidingWindow, 2, Duration::from_secs(30));

        let _ = limiter.check("a").unwrap();
        let _ = limiter.check("a").unwrap();
        assert!(!limiter.check("a").unwrap().allowed);

        let decision = limiter.check("b").unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.metadata.remaining, 1);
    }

    #[test]
    fn invalid_defaults_fail_at_build_time() {
        let zero_limit = RateLimiter::builder().default_limit(0).build();
        assert!(matches!(zero_limit, Err(LimitError::InvalidLimit)));

        let zero_window = RateLimiter::builder()
            .default_window(Duration::ZERO)
            .build();
        assert!(matches!(zero_window, Err(LimitError::InvalidWindow)));
    }

    #[test]
    fn invalid_overrides_fail_at_call_time() {
        let limiter = limiter(StrategyKind::TokenBucket, 5, Duration::from_secs(10));

        assert_eq!(
            limiter.check_with("user1", Some(0), None),
            Err(LimitError::InvalidLimit)
        );
        assert_eq!(
            limiter.check_with("user1", None, Some(Duration::ZERO)),
            Err(LimitError::InvalidWindow)
        );
    }

    #[test]
    fn from_config_selects_the_configured_strategy() {
        let config = RateLimitConfig {
            strategy: StrategyKind::FixedWindow,
            default_limit: 2,
            default_window_secs: 30,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::from_config(&config).unwrap();

        assert!(limiter.check("user1").unwrap().allowed);
        assert!(limiter.check("user1").unwrap().allowed);
        assert!(!limiter.check("user1").unwrap().allowed);
    }

    #[test]
    fn from_config_rejects_invalid_values() {
        let config = RateLimitConfig {
            default_limit: 0,
            ..RateLimitConfig::default()
        };
        assert!(matches!(
            RateLimiter::from_config(&config),
            Err(LimitError::InvalidLimit)
        ));
    }

    #[test]
    fn metadata_invariants_hold_across_a_burst() {
        let limiter = limiter(StrategyKind::TokenBucket, 4, Duration::from_secs(10));

        for _ in 0..8 {
            let decision = limiter.check("user1").unwrap();
            let meta = decision.metadata;
            assert!(meta.remaining <= meta.limit);
            assert_eq!(meta.retry_after > 0, !decision.allowed);
        }
    }

    #[test]
    fn require_converts_a_denial_into_a_typed_error() {
        let limiter = limiter(StrategyKind::FixedWindow, 1, Duration::from_secs(10));

        assert!(limiter.check("user1").unwrap().require().is_ok());
        let err = limiter
            .check("user1")
            .unwrap()
            .require()
            .unwrap_err();
        assert_eq!(err.metadata.remaining, 0);
        assert!(err.metadata.retry_after > 0);
    }
}
