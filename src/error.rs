use thiserror::Error;

/// Errors raised while wiring the throttler together.
///
/// Nothing on the request path returns one of these: the limiter is
/// infallible and the counter stores fail soft.
#[derive(Debug, Error)]
pub enum ThrottlerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;
