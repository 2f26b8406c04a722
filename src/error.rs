//! Custom error types for servertool.
//!
//! This module provides a centralized error handling system with specific error types
//! for different parts of the application.

use std::fmt;

/// Main error type for servertool operations.
///
/// Variants carry their context as strings so errors stay cloneable; the
/// status cache broadcasts a single refresh outcome to every attached caller.
#[derive(Debug, Clone)]
pub enum Error {
    /// Configuration errors (missing file, invalid values, bad credentials)
    Config(String),
    /// Chat transport errors (session open, message send)
    Transport(String),
    /// Cloud control plane errors (instance start/stop/status calls)
    Upstream(String),
    /// Game server query protocol errors (malformed or unexpected responses)
    Query(String),
    /// An upstream call exceeded its deadline
    Timeout(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Transport(msg) => write!(f, "Transport error: {}", msg),
            Self::Upstream(msg) => write!(f, "Control plane error: {}", msg),
            Self::Query(msg) => write!(f, "Server query error: {}", msg),
            Self::Timeout(msg) => write!(f, "Timed out: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// Implement From traits for automatic error conversion
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<serenity::Error> for Error {
    fn from(err: serenity::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type alias for servertool operations.
pub type Result<T> = std::result::Result<T, Error>;
