pub mod config;
pub mod error;
pub mod limiter;
pub mod permit;

pub use config::LimiterConfig;
pub use config::ReleasePolicy;
pub use error::RateLimitError;
pub use error::Result;
pub use limiter::LimiterStats;
pub use limiter::RateLimiter;
pub use limiter::RateLimiterBuilder;
pub use permit::Permit;
