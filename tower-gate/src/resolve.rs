//! Identifier resolvers for HTTP requests.
//!
//! A resolver turns a request into the opaque identifier its quota is
//! tracked under. Pass one of these, or any closure with the same shape,
//! to [`RateLimitLayer::new`](crate::RateLimitLayer::new).

use http::Request;

/// Resolve the caller's client IP, namespaced as `ip:<addr>`.
///
/// Prefers the first hop of `X-Forwarded-For`, then `X-Real-IP`, so
/// deployments behind a proxy key on the real client rather than the
/// proxy. Without either header every caller shares the `ip:unknown`
/// bucket.
pub fn client_ip<B>(req: &Request<B>) -> Option<String> {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return Some(format!("ip:{first}"));
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
    {
        let value = value.trim();
        if !value.is_empty() {
            return Some(format!("ip:{value}"));
        }
    }

    Some("ip:unknown".to_string())
}
