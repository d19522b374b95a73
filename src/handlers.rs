use axum::{extract::State, response::IntoResponse, Json};

use crate::middleware::RateLimitState;
use crate::response::HealthResponse;

/// Rate limited greeting
pub async fn hello() -> &'static str {
    "Hello, world!"
}

/// Health check endpoint, never rate limited
pub async fn health_check(State(state): State<RateLimitState>) -> impl IntoResponse {
    Json(HealthResponse::healthy(state.limiter.is_enabled()))
}
