use thiserror::Error;

/// Errors from the feed processor aggregation layer.
///
/// Classification never fails at runtime; these cover the construction
/// boundary and the hand-off to a downstream transport.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid stream configuration: {field} -- {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("downstream dispatch failed: {0}")]
    Sink(String),
}

impl StreamError {
    pub(crate) fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for aggregation results.
pub type StreamResult<T> = Result<T, StreamError>;
