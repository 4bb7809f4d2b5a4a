use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tower::Layer;

use gate_limit::EndpointLimit;
use gate_limit::LimitError;
use gate_limit::RateLimitConfig;
use gate_limit::RateLimiter;

use crate::service::RateLimitService;
use crate::service::Resolver;

/// What to do when the storage backend reports an outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Forward the request unlimited, trading some quota enforcement for
    /// availability. The recommended default.
    #[default]
    Open,
    /// Reject with [`GateError::Unavailable`](crate::GateError::Unavailable).
    Closed,
}

/// Applies identifier-keyed rate limiting to requests.
///
/// `Req` is the request type of the wrapped service, normally
/// `http::Request<B>`. The resolver names the caller for a request; a
/// `None` from it counts as a resolution failure and the request passes
/// through unlimited.
pub struct RateLimitLayer<Req> {
    limiter: Arc<RateLimiter>,
    resolver: Resolver<Req>,
    skip_paths: HashSet<String>,
    overrides: HashMap<String, EndpointLimit>,
    policy: FailurePolicy,
    enabled: bool,
}

impl<Req> fmt::Debug for RateLimitLayer<Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("limiter", &self.limiter)
            .field("resolver", &"<fn>")
            .field("skip_paths", &self.skip_paths)
            .field("overrides", &self.overrides)
            .field("policy", &self.policy)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl<Req> Clone for RateLimitLayer<Req> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            resolver: Arc::clone(&self.resolver),
            skip_paths: self.skip_paths.clone(),
            overrides: self.overrides.clone(),
            policy: self.policy,
            enabled: self.enabled,
        }
    }
}

impl<Req> RateLimitLayer<Req> {
    /// Create a layer over `limiter`, naming callers with `resolver`.
    pub fn new<F>(limiter: Arc<RateLimiter>, resolver: F) -> Self
    where
        F: Fn(&Req) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            limiter,
            resolver: Arc::new(resolver),
            skip_paths: HashSet::new(),
            overrides: HashMap::new(),
            policy: FailurePolicy::default(),
            enabled: true,
        }
    }

    /// Build the layer and its limiter from configuration: strategy and
    /// defaults, skip paths, per-endpoint overrides and the enabled flag.
    pub fn from_config<F>(config: &RateLimitConfig, resolver: F) -> Result<Self, LimitError>
    where
        F: Fn(&Req) -> Option<String> + Send + Sync + 'static,
    {
        let limiter = Arc::new(RateLimiter::from_config(config)?);
        Ok(Self::new(limiter, resolver)
            .with_skip_paths(config.skip_paths.iter().cloned())
            .with_overrides(config.endpoint_limits.clone())
            .with_enabled(config.enabled))
    }

    /// Exempt an exact request path from limiting.
    pub fn with_skip_path(mut self, path: impl Into<String>) -> Self {
        self.skip_paths.insert(path.into());
        self
    }

    /// Exempt a set of exact request paths from limiting.
    pub fn with_skip_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.skip_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Give an exact request path its own quota.
    pub fn with_override(mut self, path: impl Into<String>, limit: u32, window: Duration) -> Self {
        self.overrides.insert(
            path.into(),
            EndpointLimit {
                limit,
                window_secs: window.as_secs(),
            },
        );
        self
    }

    /// Replace the whole per-endpoint override table.
    pub fn with_overrides(mut self, overrides: HashMap<String, EndpointLimit>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Choose how storage outages are handled.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Master switch; a disabled layer forwards every request untouched.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl<S, Req> Layer<S> for RateLimitLayer<Req> {
    type Service = RateLimitService<S, Req>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
            resolver: Arc::clone(&self.resolver),
            skip_paths: Arc::new(self.skip_paths.clone()),
            overrides: Arc::new(self.overrides.clone()),
            policy: self.policy,
            enabled: self.enabled,
        }
    }
}
