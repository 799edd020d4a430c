use thiserror::Error;

/// Result type for admission operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors that can occur while configuring or acquiring from a limiter
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// No permit available right now (non-blocking acquisition only)
    #[error("Rate limit exceeded")]
    Exceeded,

    /// Zero permits or zero window
    #[error("Invalid rate limiter configuration: {0}")]
    InvalidConfiguration(&'static str),

    /// The caller's cancellation future or deadline fired while waiting
    #[error("Permit acquisition cancelled")]
    AcquireCancelled,

    /// The limiter was shut down
    #[error("Rate limiter closed")]
    Closed,

    /// Constructed outside a tokio runtime, so the reset task cannot be spawned
    #[error("No tokio runtime available to drive the reset timer")]
    RuntimeUnavailable,
}
