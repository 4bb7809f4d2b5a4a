//! # gate-limit
//!
//! `gate-limit` provides strategy driven admission control with keyed,
//! TTL-backed state.
//!
//! ## Core Philosophy
//!
//! Most rate limiters bind one limiter instance to one protected resource.
//! `gate-limit` tracks quota **per caller identifier**: every strategy reads
//! and writes its state through a [`Storage`] backend keyed by an opaque
//! identifier string, so a single limiter serves any number of callers with
//! fully isolated quotas.
//!
//! ## Key Concepts
//!
//! * **Keyed State**: state is created lazily the first time an identifier
//!   is seen and expires via TTL roughly two windows after its last write.
//! * **Strategy Trait**: a unified interface for the three limiting
//!   algorithms; pick one at construction via [`StrategyKind`].
//! * **Atomic Checks**: the full read-compute-write cycle of a check runs
//!   under the storage lock, so two racing requests can never both consume
//!   the last unit of quota.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use gate_limit::RateLimiter;
//! use gate_limit::StrategyKind;
//!
//! let limiter = RateLimiter::builder()
//!     .strategy(StrategyKind::TokenBucket)
//!     .default_limit(100)
//!     .default_window(Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//!
//! let decision = limiter.check("user:42").unwrap();
//! assert!(decision.allowed);
//! assert_eq!(decision.metadata.remaining, 99);
//! ```

use std::fmt::Debug;
use std::time::Duration;

mod clock;
mod config;
mod error;
mod fixed_window;
mod limiter;
mod sliding_window;
mod storage;
mod token_bucket;

pub use clock::TimeSource;
pub use config::EndpointLimit;
pub use config::RateLimitConfig;
pub use error::LimitError;
pub use error::RateLimitExceeded;
pub use fixed_window::FixedWindow;
pub use limiter::RateLimiter;
pub use limiter::RateLimiterBuilder;
pub use limiter::StrategyKind;
pub use sliding_window::SlidingWindow;
pub use storage::InMemoryStorage;
pub use storage::Mutation;
pub use storage::Storage;
pub use storage::StorageError;
pub use storage::StorageStats;
pub use storage::StrategyState;
pub use token_bucket::TokenBucket;

/// Admission metadata returned with every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// The quota in force for this check.
    pub limit: u32,
    /// Whole units of quota left after this check, in `[0, limit]`.
    pub remaining: u32,
    /// Unix timestamp at which more quota becomes available.
    pub reset_at: u64,
    /// Whole seconds to wait before retrying; non-zero exactly when the
    /// request was denied.
    pub retry_after: u64,
}

/// The outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub metadata: Metadata,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Convert a denial into a typed error, for callers that prefer
    /// `?`-style propagation over inspecting a flag.
    pub fn require(self) -> Result<Metadata, RateLimitExceeded> {
        if self.allowed {
            Ok(self.metadata)
        } else {
            Err(RateLimitExceeded {
                metadata: self.metadata,
            })
        }
    }
}

/// The core trait for all admission-control algorithms.
///
/// Strategies read and write per-identifier state through their bound
/// [`Storage`] and must be safe to share across threads via `Arc`.
pub trait Strategy: Send + Sync + Debug {
    /// Decide whether one unit of work for `identifier` may proceed under a
    /// quota of `limit` requests per `window`.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::InvalidLimit`] or [`LimitError::InvalidWindow`]
    /// for a zero quota, and passes storage outages through unchanged. A
    /// denial is not an error; inspect [`Decision::allowed`].
    fn check(&self, identifier: &str, limit: u32, window: Duration) -> Result<Decision, LimitError>;

    /// Drop all state held for `identifier`, as if it had never been seen.
    ///
    /// `window` scopes window-aligned strategies to the right state; the
    /// continuous strategies ignore it. Idempotent.
    fn reset(&self, identifier: &str, window: Duration) -> Result<(), LimitError>;
}

pub(crate) fn validate_quota(limit: u32, window: Duration) -> Result<(), LimitError> {
    if limit == 0 {
        return Err(LimitError::InvalidLimit);
    }
    if window.is_zero() {
        return Err(LimitError::InvalidWindow);
    }
    Ok(())
}
