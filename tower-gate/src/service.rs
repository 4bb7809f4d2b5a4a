use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;
use std::time::Duration;

use http::HeaderName;
use http::HeaderValue;
use http::Request;
use http::Response;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;

use gate_limit::EndpointLimit;
use gate_limit::Metadata;
use gate_limit::RateLimiter;

use crate::error::GateError;
use crate::layer::FailurePolicy;

/// Response header names attached by the middleware.
pub mod headers {
    /// Maximum requests allowed in the window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Remaining requests at admission time.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Unix timestamp at which more quota becomes available.
    pub const RESET: &str = "x-ratelimit-reset";
}

pub(crate) type Resolver<Req> = Arc<dyn Fn(&Req) -> Option<String> + Send + Sync>;

/// The middleware service produced by
/// [`RateLimitLayer`](crate::RateLimitLayer).
///
/// Per request: exempt paths pass through untouched; a failed identifier
/// resolution logs and passes through (fail-open); otherwise the effective
/// quota for the path is charged against the shared
/// [`RateLimiter`]. Denials short-circuit with
/// [`GateError::RateLimited`] and never reach the inner service;
/// admissions carry `X-RateLimit-*` headers computed at admission time, so
/// they reflect the state when the request was let in, not when the
/// response left.
pub struct RateLimitService<S, Req> {
    pub(crate) inner: S,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) resolver: Resolver<Req>,
    pub(crate) skip_paths: Arc<HashSet<String>>,
    pub(crate) overrides: Arc<HashMap<String, EndpointLimit>>,
    pub(crate) policy: FailurePolicy,
    pub(crate) enabled: bool,
}

impl<S: fmt::Debug, Req> fmt::Debug for RateLimitService<S, Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitService")
            .field("inner", &self.inner)
            .field("limiter", &self.limiter)
            .field("resolver", &"<fn>")
            .field("skip_paths", &self.skip_paths)
            .field("overrides", &self.overrides)
            .field("policy", &self.policy)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl<S: Clone, Req> Clone for RateLimitService<S, Req> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            resolver: Arc::clone(&self.resolver),
            skip_paths: Arc::clone(&self.skip_paths),
            overrides: Arc::clone(&self.overrides),
            policy: self.policy,
            enabled: self.enabled,
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S, Request<ReqBody>>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>, Error = BoxError>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        if !self.enabled {
            return ResponseFuture::passthrough(self.inner.call(req));
        }

        let path = req.uri().path();
        if self.skip_paths.contains(path) {
            return ResponseFuture::passthrough(self.inner.call(req));
        }

        let Some(identifier) = (self.resolver)(&req) else {
            // Fail open: an unresolvable caller is never worth failing the
            // whole request over.
            tracing::warn!(
                path = %req.uri().path(),
                "identifier resolution failed; request not limited"
            );
            return ResponseFuture::passthrough(self.inner.call(req));
        };

        let (limit, window) = match self.overrides.get(path) {
            Some(endpoint) => (
                Some(endpoint.limit),
                Some(Duration::from_secs(endpoint.window_secs)),
            ),
            None => (None, None),
        };

        match self.limiter.check_with(&identifier, limit, window) {
            Ok(decision) if decision.allowed => {
                ResponseFuture::admitted(self.inner.call(req), admission_headers(&decision.metadata))
            }
            Ok(decision) => ResponseFuture::rejected(GateError::RateLimited {
                metadata: decision.metadata,
            }),
            Err(error) => match self.policy {
                FailurePolicy::Open => {
                    tracing::warn!(%identifier, %error, "rate limit check failed; request not limited");
                    ResponseFuture::passthrough(self.inner.call(req))
                }
                FailurePolicy::Closed => {
                    tracing::error!(%identifier, %error, "rate limit check failed; rejecting");
                    ResponseFuture::rejected(GateError::Unavailable)
                }
            },
        }
    }
}

fn admission_headers(metadata: &Metadata) -> [(HeaderName, HeaderValue); 3] {
    [
        (
            HeaderName::from_static(headers::LIMIT),
            HeaderValue::from(metadata.limit),
        ),
        (
            HeaderName::from_static(headers::REMAINING),
            HeaderValue::from(metadata.remaining),
        ),
        (
            HeaderName::from_static(headers::RESET),
            HeaderValue::from(metadata.reset_at),
        ),
    ]
}

pin_project! {
    #[project = ResponseFutureProj]
    /// Response future for [`RateLimitService`].
    pub enum ResponseFuture<F> {
        /// Forwarded without limiting.
        Passthrough {
            #[pin]
            inner: F,
        },
        /// Admitted; the headers computed at admission are attached to
        /// whatever the downstream produces.
        Admitted {
            #[pin]
            inner: F,
            headers: Option<[(HeaderName, HeaderValue); 3]>,
        },
        /// Denied, or failed closed, before dispatch.
        Rejected {
            error: Option<GateError>,
        },
    }
}

impl<F> ResponseFuture<F> {
    fn passthrough(inner: F) -> Self {
        Self::Passthrough { inner }
    }

    fn admitted(inner: F, headers: [(HeaderName, HeaderValue); 3]) -> Self {
        Self::Admitted {
            inner,
            headers: Some(headers),
        }
    }

    fn rejected(error: GateError) -> Self {
        Self::Rejected { error: Some(error) }
    }
}

impl<F, ResBody> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, BoxError>>,
{
    type Output = Result<Response<ResBody>, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Passthrough { inner } => inner.poll(cx),
            ResponseFutureProj::Admitted { inner, headers } => {
                let result = ready!(inner.poll(cx));
                Poll::Ready(result.map(|mut response| {
                    if let Some(headers) = headers.take() {
                        for (name, value) in headers {
                            response.headers_mut().insert(name, value);
                        }
                    }
                    response
                }))
            }
            ResponseFutureProj::Rejected { error } => {
                let error = error.take().expect("ResponseFuture polled after completion");
                Poll::Ready(Err(Box::new(error)))
            }
        }
    }
}
