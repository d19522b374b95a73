pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, StoreBackend};
pub use error::{ThrottlerError, ThrottlerResult};
pub use middleware::RateLimitState;
pub use rate_limiter::RateLimiter;
pub use server::create_app;
pub use store::{CounterStore, MemoryStore, RedisStore};
