use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::LimitError;
use crate::StrategyKind;
use crate::validate_quota;

/// A per-path override of the default quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLimit {
    pub limit: u32,
    pub window_secs: u64,
}

/// Rate limiter configuration, consumed from the host's config layer.
///
/// Every field has a default, so a partial document deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Which algorithm to run: `token_bucket`, `sliding_window` or
    /// `fixed_window`.
    pub strategy: StrategyKind,
    /// Max requests per window when no override matches.
    pub default_limit: u32,
    /// Window length in seconds when no override matches.
    pub default_window_secs: u64,
    /// Master switch; when false the middleware forwards everything.
    pub enabled: bool,
    /// Exact request paths exempt from limiting.
    pub skip_paths: HashSet<String>,
    /// Exact request paths with their own quota.
    pub endpoint_limits: HashMap<String, EndpointLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            default_limit: 100,
            default_window_secs: 60,
            enabled: true,
            skip_paths: HashSet::new(),
            endpoint_limits: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Tight limits for sensitive surfaces.
    pub fn strict() -> Self {
        Self {
            strategy: StrategyKind::SlidingWindow,
            default_limit: 10,
            default_window_secs: 60,
            endpoint_limits: HashMap::from([
                (
                    "/v1/auth/login".to_string(),
                    EndpointLimit {
                        limit: 5,
                        window_secs: 300,
                    },
                ),
                (
                    "/v1/auth/register".to_string(),
                    EndpointLimit {
                        limit: 3,
                        window_secs: 3600,
                    },
                ),
            ]),
            ..Self::default()
        }
    }

    /// A sensible default for most APIs.
    pub fn moderate() -> Self {
        Self {
            strategy: StrategyKind::TokenBucket,
            default_limit: 100,
            default_window_secs: 60,
            endpoint_limits: HashMap::from([
                (
                    "/v1/auth/login".to_string(),
                    EndpointLimit {
                        limit: 10,
                        window_secs: 60,
                    },
                ),
                (
                    "/v1/auth/register".to_string(),
                    EndpointLimit {
                        limit: 5,
                        window_secs: 3600,
                    },
                ),
            ]),
            ..Self::default()
        }
    }

    /// Generous limits for development and testing.
    pub fn permissive() -> Self {
        Self {
            strategy: StrategyKind::FixedWindow,
            default_limit: 1000,
            default_window_secs: 60,
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Fails fast on any zero limit or window, default or override.
    pub fn validate(&self) -> Result<(), LimitError> {
        validate_quota(
            self.default_limit,
            Duration::from_secs(self.default_window_secs),
        )?;
        for endpoint in self.endpoint_limits.values() {
            validate_quota(endpoint.limit, Duration::from_secs(endpoint.window_secs))?;
        }
        Ok(())
    }

    /// The quota in force for `path`: its exact-match override, or the
    /// defaults.
    pub fn effective_limit(&self, path: &str) -> (u32, Duration) {
        match self.endpoint_limits.get(path) {
            Some(endpoint) => (endpoint.limit, Duration::from_secs(endpoint.window_secs)),
            None => (
                self.default_limit,
                Duration::from_secs(self.default_window_secs),
            ),
        }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.skip_paths.contains(path)
    }
}
