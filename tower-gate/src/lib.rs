//! # Tower Gate
//!
//! `tower-gate` is identifier-keyed rate limiting middleware for the
//! [Tower](https://github.com/tower-rs/tower) ecosystem, built over the
//! strategies and keyed storage in [`gate_limit`].
//!
//! ## The Boundary Contract
//!
//! [`RateLimitLayer`] wraps a service and, per request:
//!
//! 1. **Skip list**: exempt paths are forwarded untouched.
//! 2. **Resolution**: a caller-supplied resolver names the caller; if it
//!    fails, the request is forwarded and the failure logged (fail-open),
//!    never turned into a crash.
//! 3. **Check**: the effective quota, a per-endpoint override or the
//!    configured defaults, is charged through
//!    [`gate_limit::RateLimiter::check_with`].
//! 4. **Outcome**: a denial short-circuits with [`GateError::RateLimited`]
//!    carrying the admission metadata, without invoking the downstream
//!    handler; an admission dispatches downstream and attaches the
//!    `X-RateLimit-*` headers computed at admission time.
//!
//! Storage outages follow the configured [`FailurePolicy`]; failing open
//! is the default.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`GateError`], rendering denials
//!   as `429 Too Many Requests` with a structured JSON body plus
//!   `Retry-After` and `X-RateLimit-*` headers, and fail-closed storage
//!   outages as `503 Service Unavailable`.

mod error;
mod layer;
pub mod resolve;
mod service;


pub use error::GateError;
pub use layer::FailurePolicy;
pub use layer::RateLimitLayer;
pub use service::RateLimitService;
pub use service::ResponseFuture;
pub use service::headers;
