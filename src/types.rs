//! Common types used throughout activity-sync
//!
//! This module contains shared type definitions, type aliases,
//! and utility types used across multiple modules.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

// ============================================================================
// Platforms
// ============================================================================

/// Platform an activity originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Slack,
    Twitter,
    Devto,
    Github,
}

impl Platform {
    /// Stable lowercase tag used in ids, queue keys and hashes
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Slack => "slack",
            Platform::Twitter => "twitter",
            Platform::Devto => "devto",
            Platform::Github => "github",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Integrations
// ============================================================================

/// Integration tag carried by trigger and continuation messages.
///
/// One platform may back several integrations (the social platform also
/// drives the follower-count refresh).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Integration {
    #[serde(rename = "slack")]
    Slack,
    #[serde(rename = "twitter")]
    Twitter,
    #[serde(rename = "twitter-followers")]
    TwitterReach,
    #[serde(rename = "devto")]
    Devto,
    #[serde(rename = "github")]
    Github,
}

impl Integration {
    /// Tag as it appears on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Integration::Slack => "slack",
            Integration::Twitter => "twitter",
            Integration::TwitterReach => "twitter-followers",
            Integration::Devto => "devto",
            Integration::Github => "github",
        }
    }

    /// Platform whose API this integration talks to
    pub fn platform(self) -> Platform {
        match self {
            Integration::Slack => Platform::Slack,
            Integration::Twitter | Integration::TwitterReach => Platform::Twitter,
            Integration::Devto => Platform::Devto,
            Integration::Github => Platform::Github,
        }
    }
}

impl fmt::Display for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Log Level
// ============================================================================

/// Log level accepted by the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    #[default]
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    Exponential,
}

// ============================================================================
// Utilities
// ============================================================================

/// Extension trait for Option<String> to handle empty strings
pub trait OptionStringExt {
    /// Returns None if the string is empty
    fn none_if_empty(self) -> Option<String>;
}

impl OptionStringExt for Option<String> {
    fn none_if_empty(self) -> Option<String> {
        self.filter(|s| !s.is_empty())
    }
}

impl OptionStringExt for String {
    fn none_if_empty(self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_serde() {
        let reach: Integration = serde_json::from_str("\"twitter-followers\"").unwrap();
        assert_eq!(reach, Integration::TwitterReach);

        let json = serde_json::to_string(&Integration::Github).unwrap();
        assert_eq!(json, "\"github\"");
    }

    #[test]
    fn test_integration_platform() {
        assert_eq!(Integration::TwitterReach.platform(), Platform::Twitter);
        assert_eq!(Integration::Slack.platform(), Platform::Slack);
        assert_eq!(Integration::TwitterReach.to_string(), "twitter-followers");
    }

    #[test]
    fn test_log_level_to_tracing() {
        assert_eq!(tracing::Level::from(LogLevel::Warn), tracing::Level::WARN);
        let level: LogLevel = serde_json::from_str("\"DEBUG\"").unwrap();
        assert_eq!(tracing::Level::from(level), tracing::Level::DEBUG);
    }

    #[test]
    fn test_backoff_default_is_constant() {
        assert_eq!(BackoffType::default(), BackoffType::Constant);
    }

    #[test]
    fn test_option_string_none_if_empty() {
        assert_eq!(
            Some("test".to_string()).none_if_empty(),
            Some("test".to_string())
        );
        assert_eq!(Some(String::new()).none_if_empty(), None);
        assert_eq!(None::<String>.none_if_empty(), None);
        assert_eq!("test".to_string().none_if_empty(), Some("test".to_string()));
        assert_eq!(String::new().none_if_empty(), None);
    }
}
