use crate::Metadata;
use crate::storage::StorageError;

/// Errors produced by the core limiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// The configured or overridden limit is zero.
    ///
    /// Raised at construction or call time, never retried.
    #[error("limit must be at least 1")]
    InvalidLimit,

    /// The configured or overridden window is zero.
    #[error("window must be a non-zero duration")]
    InvalidWindow,

    /// The storage backend could not serve the request.
    ///
    /// The in-memory backend never raises this; it exists for
    /// network-attached backends. The middleware decides whether to fail
    /// open or closed on it.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The typed form of a denial, carrying the full admission metadata.
///
/// Produced only by [`Decision::require`](crate::Decision::require); a
/// denial surfaced through [`Decision`](crate::Decision) itself is normal
/// control flow, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded; retry after {}s", .metadata.retry_after)]
pub struct RateLimitExceeded {
    pub metadata: Metadata,
}
