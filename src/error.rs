//! Error types for activity-sync
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use thiserror::Error;

/// The main error type for activity-sync
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Contract Errors
    // ============================================================================
    #[error("Contract violation: {message}")]
    Contract { message: String },

    #[error("Malformed endpoint '{endpoint}': {message}")]
    EndpointCodec { endpoint: String, message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Upstream Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Couldn't complete {operation} after {attempts} tries")]
    RetriesExhausted { operation: String, attempts: u32 },

    #[error("No credential available for {wait_seconds}s")]
    PoolExhausted { wait_seconds: u64 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unexpected response: {message}")]
    Decode { message: String },

    // ============================================================================
    // Downstream Errors
    // ============================================================================
    #[error("Settings error: {message}")]
    Settings { message: String },

    #[error("Queue error: {message}")]
    Queue { message: String },

    #[error("Sink error: {message}")]
    Sink { message: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a contract violation error
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract {
            message: message.into(),
        }
    }

    /// Create an endpoint codec error
    pub fn endpoint_codec(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EndpointCodec {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a settings error
    pub fn settings(message: impl Into<String>) -> Self {
        Self::Settings {
            message: message.into(),
        }
    }

    /// Create a queue error
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }

    /// Create a sink error
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }

    /// Transient gateway failure (500, 502, 504)
    pub fn is_gateway(&self) -> bool {
        match self {
            Error::HttpStatus { status, .. } => is_gateway_status(*status),
            _ => false,
        }
    }

    /// Upstream says the credential ran out of budget
    pub fn is_rate_limit_signal(&self) -> bool {
        match self {
            Error::RateLimited { .. } => true,
            Error::HttpStatus { status: 429, .. } => true,
            Error::HttpStatus { status: 403, body } => {
                body.to_ascii_lowercase().contains("rate limit")
            }
            _ => false,
        }
    }

    /// Recommended wait carried by a rate-limit error
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimited {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            Error::PoolExhausted { wait_seconds } => Some(*wait_seconds),
            _ => None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout { .. } => true,
            _ => self.is_gateway(),
        }
    }
}

/// Check if an HTTP status code is a transient gateway failure
pub(crate) fn is_gateway_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 504)
}

/// Result type alias for activity-sync
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}
