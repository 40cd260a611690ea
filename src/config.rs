//! Engine configuration
//!
//! Loaded from YAML, then overridden from the environment. Every field
//! has a default so an empty document is a valid configuration.

use crate::engine::RunMode;
use crate::error::{Error, Result};
use crate::http::{Pacing, RetryPolicy};
use crate::pool::PoolConfig;
use crate::types::Platform;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deployment mode
    #[serde(default)]
    pub mode: DeploymentMode,

    /// Time ceiling of a short-lived invocation
    #[serde(default = "default_max_runtime_secs")]
    pub max_runtime_secs: u64,

    /// Per-platform policy
    #[serde(default)]
    pub platforms: PlatformsConfig,

    /// Gateway retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Credential pool behaviour
    #[serde(default)]
    pub pool: PoolSettings,

    /// Unified API gateway
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_max_runtime_secs() -> u64 {
    12 * 60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::default(),
            max_runtime_secs: default_max_runtime_secs(),
            platforms: PlatformsConfig::default(),
            retry: RetryConfig::default(),
            pool: PoolSettings::default(),
            api: ApiConfig::default(),
        }
    }
}

/// How invocations are hosted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Execution-time ceiling; limits hand off a continuation
    #[default]
    ShortLived,
    /// No ceiling; limits sleep in place
    LongRunning,
}

// ============================================================================
// Platform Config
// ============================================================================

/// Policy of one platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Maximum record age before an endpoint counts as caught up
    #[serde(default)]
    pub retrospect_secs: Option<u64>,
    /// Units per run; unbounded when absent
    #[serde(default)]
    pub global_limit: Option<usize>,
    /// Pacing before each call
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

impl PlatformConfig {
    /// Retrospect window as a duration
    pub fn retrospect(&self) -> Option<Duration> {
        self.retrospect_secs.map(Duration::from_secs)
    }

    /// Call pacing, when configured
    pub fn pacing(&self) -> Option<Pacing> {
        self.requests_per_second.map(Pacing::per_second)
    }
}

/// Policies of every platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformsConfig {
    #[serde(default = "default_slack")]
    pub slack: PlatformConfig,
    #[serde(default = "default_twitter")]
    pub twitter: PlatformConfig,
    #[serde(default)]
    pub devto: PlatformConfig,
    #[serde(default)]
    pub github: PlatformConfig,
}

fn default_slack() -> PlatformConfig {
    PlatformConfig {
        retrospect_secs: Some(3600),
        global_limit: None,
        requests_per_second: Some(1),
    }
}

fn default_twitter() -> PlatformConfig {
    PlatformConfig {
        retrospect_secs: Some(7380),
        global_limit: Some(10_000),
        requests_per_second: None,
    }
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            slack: default_slack(),
            twitter: default_twitter(),
            devto: PlatformConfig::default(),
            github: PlatformConfig::default(),
        }
    }
}

impl PlatformsConfig {
    /// Policy of `platform`
    pub fn get(&self, platform: Platform) -> &PlatformConfig {
        match platform {
            Platform::Slack => &self.slack,
            Platform::Twitter => &self.twitter,
            Platform::Devto => &self.devto,
            Platform::Github => &self.github,
        }
    }

    fn get_mut(&mut self, platform: Platform) -> &mut PlatformConfig {
        match platform {
            Platform::Slack => &mut self.slack,
            Platform::Twitter => &mut self.twitter,
            Platform::Devto => &mut self.devto,
            Platform::Github => &mut self.github,
        }
    }
}

// ============================================================================
// Retry, Pool and API Config
// ============================================================================

/// Gateway retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    2000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Build the retry policy
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

/// Credential pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_short_wait_secs")]
    pub short_wait_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Tokens shared through the pool; `api.token` is used when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
}

fn default_short_wait_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            short_wait_secs: default_short_wait_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            tokens: Vec::new(),
        }
    }
}

impl PoolSettings {
    /// Build the pool config
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            short_wait: Duration::from_secs(self.short_wait_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// Unified API gateway settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bearer token sent with every call
    #[serde(default)]
    pub token: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:8080/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            token: None,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl EngineConfig {
    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = if yaml.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| Error::config(format!("Failed to parse config YAML: {e}")))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("KUBE_MODE") {
            let mode = mode.trim().to_lowercase();
            self.mode = if mode.is_empty() || mode == "false" || mode == "0" {
                DeploymentMode::ShortLived
            } else {
                DeploymentMode::LongRunning
            };
        }

        let overrides: [(&str, Platform, bool); 6] = [
            ("SLACK_MAX_RETROSPECT_IN_SECONDS", Platform::Slack, true),
            ("SLACK_GLOBAL_LIMIT", Platform::Slack, false),
            ("TWITTER_MAX_RETROSPECT_IN_SECONDS", Platform::Twitter, true),
            ("TWITTER_GLOBAL_LIMIT", Platform::Twitter, false),
            ("DEVTO_GLOBAL_LIMIT", Platform::Devto, false),
            ("GITHUB_GLOBAL_LIMIT", Platform::Github, false),
        ];
        for (key, platform, is_retrospect) in overrides {
            let Some(raw) = lookup(key) else { continue };
            let value = parse_env_number(key, &raw)?;
            let target = self.platforms.get_mut(platform);
            if is_retrospect {
                target.retrospect_secs = Some(value);
            } else {
                target.global_limit = Some(value as usize);
            }
        }

        if let Some(url) = lookup("UNIFIED_API_URL") {
            self.api.base_url = url;
        }
        if let Some(token) = lookup("UNIFIED_API_TOKEN") {
            self.api.token = Some(token).filter(|t| !t.is_empty());
        }

        self.validate()
    }

    /// Load from environment variables of this process
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Run mode for the engine
    pub fn run_mode(&self) -> RunMode {
        match self.mode {
            DeploymentMode::ShortLived => RunMode::ShortLived {
                max_runtime: Duration::from_secs(self.max_runtime_secs),
            },
            DeploymentMode::LongRunning => RunMode::LongRunning,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidConfigValue {
                field: "retry.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        url::Url::parse(&self.api.base_url).map_err(|e| Error::InvalidConfigValue {
            field: "api.base_url".to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

fn parse_env_number(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| Error::InvalidConfigValue {
            field: key.to_string(),
            message: format!("'{raw}' is not a number: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = EngineConfig::from_yaml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.run_mode(), RunMode::short_lived_default());
        assert_eq!(config.platforms.get(Platform::Slack).retrospect_secs, Some(3600));
        assert_eq!(config.platforms.get(Platform::Twitter).global_limit, Some(10_000));
        assert_eq!(config.platforms.get(Platform::Github).global_limit, None);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
mode: long_running
platforms:
  devto:
    global_limit: 50
retry:
  max_attempts: 3
  delay_ms: 10
pool:
  short_wait_secs: 5
api:
  base_url: "https://api.example.com/"
  token: "secret"
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.run_mode(), RunMode::LongRunning);
        assert_eq!(config.platforms.devto.global_limit, Some(50));
        // Unlisted platforms keep their defaults
        assert_eq!(config.platforms.slack.requests_per_second, Some(1));
        assert_eq!(config.retry.policy(), RetryPolicy::new(3, Duration::from_millis(10)));
        assert_eq!(config.pool.pool_config().short_wait, Duration::from_secs(5));
        assert_eq!(config.pool.pool_config().poll_interval, Duration::from_secs(1));
        assert_eq!(config.api.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_reject_zero_attempts() {
        let err = EngineConfig::from_yaml_str("retry:\n  max_attempts: 0\n").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidConfigValue { ref field, .. } if field == "retry.max_attempts"
        ));
    }

    #[test]
    fn test_reject_bad_base_url() {
        let err = EngineConfig::from_yaml_str("api:\n  base_url: \"not a url\"\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfigValue { .. }));
    }

    #[test]
    fn test_reject_malformed_yaml() {
        let err = EngineConfig::from_yaml_str("mode: [").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_env(env(&[
                ("KUBE_MODE", "true"),
                ("SLACK_MAX_RETROSPECT_IN_SECONDS", "60"),
                ("TWITTER_GLOBAL_LIMIT", "5"),
                ("GITHUB_GLOBAL_LIMIT", "7"),
                ("UNIFIED_API_URL", "https://gateway.example.com/"),
                ("UNIFIED_API_TOKEN", "tok"),
            ]))
            .unwrap();

        assert_eq!(config.mode, DeploymentMode::LongRunning);
        assert_eq!(config.platforms.slack.retrospect(), Some(Duration::from_secs(60)));
        assert_eq!(config.platforms.twitter.global_limit, Some(5));
        assert_eq!(config.platforms.github.global_limit, Some(7));
        assert_eq!(config.api.base_url, "https://gateway.example.com/");
        assert_eq!(config.api.token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_env_kube_mode_false() {
        let mut config = EngineConfig {
            mode: DeploymentMode::LongRunning,
            ..EngineConfig::default()
        };
        config.apply_env(env(&[("KUBE_MODE", "false")])).unwrap();
        assert_eq!(config.mode, DeploymentMode::ShortLived);
    }

    #[test]
    fn test_env_rejects_non_numeric() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env(env(&[("DEVTO_GLOBAL_LIMIT", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidConfigValue { ref field, .. } if field == "DEVTO_GLOBAL_LIMIT"
        ));
    }

    #[test]
    fn test_pacing() {
        let config = EngineConfig::default();
        assert_eq!(
            config.platforms.slack.pacing(),
            Some(Pacing::per_second(1))
        );
        assert!(config.platforms.twitter.pacing().is_none());
    }
}
