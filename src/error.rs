//! Error types for the aggregation engine

use crate::concurrency::CancelReason;
use thiserror::Error;

/// Main error type for the aggregation engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (bad sampling unit or value, invalid engine config)
    ///
    /// Raised while an aggregation or query is being constructed and is fatal
    /// to that query.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation
    ///
    /// Indicates a mismatch between how states were grouped at setup time and
    /// how updates are routed later. Never recovered from.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// A worker pool rejected work because its queue is full
    #[error("Pool {pool} saturated: {capacity} tasks already queued")]
    PoolSaturated {
        /// Name of the pool that rejected the task
        pool: String,
        /// Configured queue capacity
        capacity: usize,
    },

    /// A pool-scheduled resolver panicked
    #[error("Resolver panicked: {0}")]
    ResolverPanicked(String),

    /// Operation was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(CancelReason),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Shorthand for an invariant violation
    pub fn invariant(message: impl Into<String>) -> Self {
        Error::InvariantViolation(message.into())
    }

    /// Whether this error is a configuration problem
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Whether this error is an internal invariant violation
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::InvariantViolation(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::configuration("unknown time unit 'fortnights'");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("fortnights"));

        let err = Error::PoolSaturated {
            pool: "read".to_string(),
            capacity: 16,
        };
        assert_eq!(err.to_string(), "Pool read saturated: 16 tasks already queued");
    }

    #[test]
    fn test_cancelled_display() {
        let err = Error::Cancelled(CancelReason::BackendDisabled);
        assert!(err.to_string().contains("backend disabled"));
    }
}
