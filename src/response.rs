use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// 429 response telling the caller how long to wait
pub fn rate_limit_exceeded(cooldown_s: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        format!("Rate limit exceeded. Try again in {} seconds", cooldown_s),
    )
        .into_response();

    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(cooldown_s));

    response
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub rate_limiting: bool,
}

impl HealthResponse {
    pub fn healthy(rate_limiting: bool) -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            rate_limiting,
        }
    }
}
