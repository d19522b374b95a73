use crate::config::Config;
use crate::error::ThrottlerResult;
use crate::handlers::{health_check, hello};
use crate::middleware::{logging_middleware, rate_limit_middleware, RateLimitState};
use crate::rate_limiter::RateLimiter;
use crate::store::build_store;
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Build the application router. Only `/` is rate limited.
pub fn create_app(state: RateLimitState) -> Router {
    let limited = Router::new()
        .route("/", get(hello))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .merge(limited)
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> ThrottlerResult<Self> {
        let store = build_store(&config).await?;
        let limiter = RateLimiter::new(config.permits, config.period_secs, store)?;

        if limiter.is_enabled() {
            tracing::info!(
                permits = limiter.permits(),
                period_s = limiter.period_s(),
                "Rate limiting enabled"
            );
        } else {
            tracing::warn!(permits = limiter.permits(), "Rate limiting disabled");
        }

        let state = RateLimitState {
            limiter: Arc::new(limiter),
            trust_proxy_headers: config.trust_proxy_headers,
        };

        Ok(Self {
            app: create_app(state),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> ThrottlerResult<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Throttler server listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
