use crate::error::{ThrottlerError, ThrottlerResult};
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

/// Which counter store backs the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// In-process map, for single-process deployments and tests
    Memory,
    /// Shared Redis instance, for limiting across several processes
    Redis,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "window-throttler", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Counter store implementation
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value_t = StoreBackend::Memory)]
    pub store_backend: StoreBackend,

    /// Redis connection URL, required by the redis backend
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Upper bound on a single Redis round trip
    #[arg(long, env = "REDIS_TIMEOUT_MS", default_value_t = 500)]
    pub redis_timeout_ms: u64,

    /// Permits granted per caller over one period; below 1 disables limiting
    #[arg(long, env = "RATE_LIMIT_PERMITS", default_value_t = 100, allow_negative_numbers = true)]
    pub permits: i64,

    /// Length of the rolling window in seconds
    #[arg(long, env = "RATE_LIMIT_PERIOD_SECS", default_value_t = 3600)]
    pub period_secs: u64,

    /// Take the caller address from X-Forwarded-For / X-Real-IP
    #[arg(long, env = "TRUST_PROXY_HEADERS")]
    pub trust_proxy_headers: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from the command line and environment variables
    pub fn from_env() -> ThrottlerResult<Self> {
        let config = Config::try_parse().map_err(|e| match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => ThrottlerError::Configuration(e.to_string()),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ThrottlerResult<()> {
        if self.period_secs == 0 {
            return Err(ThrottlerError::Configuration(
                "RATE_LIMIT_PERIOD_SECS must be at least 1".to_string(),
            ));
        }

        if self.store_backend == StoreBackend::Redis {
            validate_redis_url(self.redis_url.as_deref())?;
        }

        Ok(())
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }
}

fn validate_redis_url(url: Option<&str>) -> ThrottlerResult<()> {
    let url = match url {
        Some(url) if !url.is_empty() => url,
        _ => {
            return Err(ThrottlerError::Configuration(
                "REDIS_URL must be set when STORE_BACKEND is redis".to_string(),
            ))
        }
    };

    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
        return Err(ThrottlerError::Configuration(
            "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
        ));
    }

    Ok(())
}
