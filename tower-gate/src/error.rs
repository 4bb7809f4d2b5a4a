use gate_limit::Metadata;

/// Errors produced by the Tower Gate middleware stack.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GateError {
    /// The request was rejected by the limiter.
    ///
    /// Carries the full admission metadata. When the `axum` feature is
    /// enabled, this converts to `429 Too Many Requests` with a structured
    /// JSON body plus the `Retry-After` and `X-RateLimit-*` headers.
    #[error("rate limit exceeded; retry after {}s", .metadata.retry_after)]
    RateLimited {
        /// State of the quota at the moment of denial.
        metadata: Metadata,
    },

    /// The storage backend was unreachable and the layer is configured to
    /// fail closed.
    ///
    /// When the `axum` feature is enabled, this converts to
    /// `503 Service Unavailable`.
    #[error("rate limit storage unavailable")]
    Unavailable,
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for GateError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        use axum::http::HeaderValue;
        use axum::http::StatusCode;
        use axum::http::header::RETRY_AFTER;

        use crate::service::headers;

        match self {
            Self::RateLimited { metadata } => {
                let body = Json(serde_json::json!({
                    "error": "rate_limit_exceeded",
                    "message": "Too many requests. Please try again later.",
                    "retry_after": metadata.retry_after,
                }));

                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                let response_headers = response.headers_mut();
                response_headers.insert(RETRY_AFTER, HeaderValue::from(metadata.retry_after));
                response_headers.insert(headers::LIMIT, HeaderValue::from(metadata.limit));
                response_headers.insert(headers::REMAINING, HeaderValue::from(metadata.remaining));
                response_headers.insert(headers::RESET, HeaderValue::from(metadata.reset_at));
                response
            }
            Self::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response(),
        }
    }
}
