//! Error handling for event source connections.
//!
//! None of these errors are thrown out of [`EventSource::open`] or
//! [`EventSource::close`]; transport failures reach the caller through the
//! "completed" notification only.
//!
//! [`EventSource::open`]: crate::EventSource::open
//! [`EventSource::close`]: crate::EventSource::close

use std::time::Duration;

use thiserror::Error;

/// The main result type used throughout the crate.
pub type EventSourceResult<T> = Result<T, EventSourceError>;

/// Error type for all event source operations.
#[derive(Error, Debug)]
pub enum EventSourceError {
    /// HTTP request errors (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A header value could not be used in a request
    #[error("Invalid header value for {name}")]
    InvalidHeader { name: String },

    /// The server kept redirecting past the allowed number of hops
    #[error("Too many redirects (limit {limit})")]
    TooManyRedirects { limit: usize },

    /// Connecting did not finish in time
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The stream was cancelled locally
    #[error("Event stream cancelled")]
    Cancelled,

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EventSourceError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid header error.
    pub fn invalid_header(name: impl Into<String>) -> Self {
        Self::InvalidHeader { name: name.into() }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the stream ended because it was cancelled locally.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
