use thiserror::Error;

/// Application-wide error types for jobsync.
#[derive(Error, Debug)]
pub enum AppError {
    /// Feed request returned a non-success HTTP status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Feed request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error while fetching a feed.
    #[error("Network error: {0}")]
    Network(String),

    /// Feed payload could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A record failed required-field checks. Permanent, never retried.
    #[error("Validation error: {field} is required")]
    Validation { field: &'static str },

    /// Record store operation failed. Transient, retried by the task queue.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Task queue infrastructure failure.
    #[error("Queue error: {0}")]
    Queue(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or missing configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    ///
    /// Validation and parse failures are permanent: the same input will
    /// fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network(_)
            | AppError::Timeout(_)
            | AppError::Persistence(_)
            | AppError::Queue(_) => true,
            AppError::Http(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error aborts an entire feed run
    /// (as opposed to a single record).
    pub fn is_feed_level(&self) -> bool {
        matches!(
            self,
            AppError::Http(_) | AppError::Timeout(_) | AppError::Network(_) | AppError::Parse(_)
        )
    }
}
