//! Configuration management for the tidecast pipeline
//!
//! Configuration is loaded from a TOML file or from environment
//! variables and validated up front: every recognized key is typed, so
//! a bad value fails the invocation at startup instead of mid-run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::experiment::{AnalysisThresholds, ExperimentDefinition, OptimizerConfig};
use crate::publish::PlatformCredentials;
use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Source provider configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Platform publish configuration
    #[serde(default)]
    pub publish: PublishConfig,

    /// Accounts processed sequentially each publish run
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    /// Experiment definitions
    #[serde(default)]
    pub experiments: Vec<ExperimentDefinition>,

    /// Optimizer thresholds
    #[serde(default)]
    pub optimizer: OptimizerSettings,

    /// Execution lock configuration
    #[serde(default)]
    pub lock: LockConfig,

    /// Optional notification webhook
    #[serde(default)]
    pub notify: Option<crate::notify::WebhookConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Provider API key
    pub api_key: String,

    /// Primary provider host
    pub primary_host: String,

    /// Ordered alternate hosts for the fallback chain
    #[serde(default)]
    pub fallback_hosts: Vec<String>,

    /// Queries executed each collection run (`#tag` or `@user`)
    #[serde(default)]
    pub queries: Vec<String>,

    /// Request timeout in seconds (collection calls are short)
    #[serde(default = "default_source_timeout")]
    pub request_timeout_secs: u64,

    /// Rate limit (requests per second)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_sec: u32,
}

fn default_source_timeout() -> u64 {
    20
}

fn default_rate_limit() -> u32 {
    2
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            primary_host: String::from("https://api.contentmirror.io"),
            fallback_hosts: Vec::new(),
            queries: Vec::new(),
            request_timeout_secs: default_source_timeout(),
            rate_limit_per_sec: default_rate_limit(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path shared by the repositories
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/tidecast.db"),
        }
    }
}

/// Platform publish configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Platform API base URL
    pub api_base: String,

    /// Request timeout in seconds; publish calls may involve
    /// server-side media processing
    #[serde(default = "default_publish_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum retries after the initial attempt
    #[serde(default = "default_publish_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_publish_timeout() -> u64 {
    90
}

fn default_publish_retries() -> u32 {
    2
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            api_base: String::from("https://graph.socialplatform.com/v19.0"),
            request_timeout_secs: default_publish_timeout(),
            max_retries: default_publish_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

/// One publishing account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Local account name used in logs and attempt records
    pub name: String,

    /// Business-account identifier at the platform
    pub account_id: String,

    /// Access token for the account
    pub access_token: String,

    /// Restrict this account to items from one source tag
    #[serde(default)]
    pub source_tag: Option<String>,

    /// Account hashtag set used by the full hashtag strategy
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl AccountConfig {
    /// Platform credentials for this account
    pub fn credentials(&self) -> PlatformCredentials {
        PlatformCredentials {
            account_id: self.account_id.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

/// Optimizer thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Minimum per-variant samples before a variant is judged
    pub min_samples: usize,

    /// Minimum experiment age in hours before a winner can be declared
    pub min_duration_hours: u64,

    /// Minimum winner confidence required to promote
    pub confidence_threshold: f64,

    /// Minimum hours between optimizer cycles
    pub interval_hours: u64,

    /// Relative regression flagging a promotion for rollback (negative)
    pub rollback_threshold: f64,

    /// Minimum post-promotion samples before judging a regression
    pub watch_min_samples: usize,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            min_samples: 30,
            min_duration_hours: 24,
            confidence_threshold: 0.95,
            interval_hours: 6,
            rollback_threshold: -0.15,
            watch_min_samples: 10,
        }
    }
}

impl OptimizerSettings {
    /// Analysis sufficiency thresholds
    pub fn analysis_thresholds(&self) -> AnalysisThresholds {
        AnalysisThresholds {
            min_samples: self.min_samples,
            min_duration: chrono::Duration::hours(self.min_duration_hours as i64),
        }
    }

    /// Promotion cycle configuration
    pub fn optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            confidence_threshold: self.confidence_threshold,
            interval: chrono::Duration::hours(self.interval_hours as i64),
            rollback_threshold: self.rollback_threshold,
            watch_min_samples: self.watch_min_samples,
        }
    }
}

/// Execution lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Directory holding the lock files
    pub dir: PathBuf,

    /// Lock timeout in seconds; older locks are stale
    pub timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/locks"),
            timeout_secs: 1800,
        }
    }
}

impl LockConfig {
    /// Lock timeout as a Duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(key) = std::env::var("TIDECAST_API_KEY") {
            config.source.api_key = key;
        }
        if let Ok(host) = std::env::var("TIDECAST_PRIMARY_HOST") {
            config.source.primary_host = host;
        }
        if let Ok(hosts) = std::env::var("TIDECAST_FALLBACK_HOSTS") {
            config.source.fallback_hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(queries) = std::env::var("TIDECAST_QUERIES") {
            config.source.queries = queries
                .split(',')
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(path) = std::env::var("TIDECAST_DB_PATH") {
            config.database.path = path.into();
        }
        if let Ok(base) = std::env::var("TIDECAST_PLATFORM_BASE") {
            config.publish.api_base = base;
        }
        if let Ok(dir) = std::env::var("TIDECAST_LOCK_DIR") {
            config.lock.dir = dir.into();
        }
        if let Ok(timeout) = std::env::var("TIDECAST_LOCK_TIMEOUT") {
            config.lock.timeout_secs = timeout
                .parse()
                .context("TIDECAST_LOCK_TIMEOUT must be an integer")?;
        }
        if let Ok(url) = std::env::var("TIDECAST_WEBHOOK_URL") {
            config.notify = Some(crate::notify::WebhookConfig::new(url));
        }

        // A single account can be supplied via the environment; more
        // come from the config file.
        if let (Ok(account_id), Ok(token)) = (
            std::env::var("TIDECAST_ACCOUNT_ID"),
            std::env::var("TIDECAST_ACCESS_TOKEN"),
        ) {
            let name =
                std::env::var("TIDECAST_ACCOUNT_NAME").unwrap_or_else(|_| "default".to_string());
            config.accounts.push(AccountConfig {
                name,
                account_id,
                access_token: token,
                source_tag: None,
                hashtags: Vec::new(),
            });
        }

        if let Ok(level) = std::env::var("TIDECAST_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("TIDECAST_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for host in std::iter::once(&self.source.primary_host).chain(&self.source.fallback_hosts) {
            url::Url::parse(host).with_context(|| format!("invalid provider host: {host}"))?;
        }
        if self.source.request_timeout_secs == 0 {
            anyhow::bail!("source.request_timeout_secs must be greater than 0");
        }
        if self.source.rate_limit_per_sec == 0 {
            anyhow::bail!("source.rate_limit_per_sec must be greater than 0");
        }

        url::Url::parse(&self.publish.api_base)
            .with_context(|| format!("invalid platform base: {}", self.publish.api_base))?;
        if self.publish.request_timeout_secs == 0 {
            anyhow::bail!("publish.request_timeout_secs must be greater than 0");
        }

        for account in &self.accounts {
            if account.name.is_empty() || account.account_id.is_empty() {
                anyhow::bail!("accounts need a name and an account_id");
            }
            if account.access_token.is_empty() {
                anyhow::bail!("account '{}' has no access token", account.name);
            }
        }

        if !(0.5..=1.0).contains(&self.optimizer.confidence_threshold) {
            anyhow::bail!("optimizer.confidence_threshold must be in [0.5, 1.0]");
        }
        if self.optimizer.rollback_threshold >= 0.0 {
            anyhow::bail!("optimizer.rollback_threshold must be negative");
        }

        if self.lock.timeout_secs == 0 {
            anyhow::bail!("lock.timeout_secs must be greater than 0");
        }

        if let Some(webhook) = &self.notify {
            webhook.validate().map_err(anyhow::Error::msg)?;
        }

        // Experiment definitions get the registry's full validation
        crate::experiment::ExperimentRegistry::from_definitions(self.experiments.clone())?;

        Ok(())
    }

    /// Source request timeout as a Duration
    #[must_use]
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source.request_timeout_secs)
    }

    /// Publish request timeout as a Duration
    #[must_use]
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish.request_timeout_secs)
    }

    /// Retry schedule for the publish client
    #[must_use]
    pub fn publish_retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.publish.max_retries,
            base_delay_ms: self.publish.base_delay_ms,
            max_delay_ms: self.publish.max_delay_ms,
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_host() {
        let mut config = Config::default();
        config.source.fallback_hosts = vec!["not a url".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.source.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.lock.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = Config::default();
        config.optimizer.confidence_threshold = 0.2;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.optimizer.rollback_threshold = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_credentialless_account() {
        let mut config = Config::default();
        config.accounts.push(AccountConfig {
            name: "main".to_string(),
            account_id: "123".to_string(),
            access_token: String::new(),
            source_tag: None,
            hashtags: Vec::new(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let toml = r##"
            [source]
            api_key = "k"
            primary_host = "https://api.mirror-a.example.com"
            fallback_hosts = ["https://api.mirror-b.example.com"]
            queries = ["#motivation", "@daily_quotes"]

            [database]
            path = "data/test.db"

            [publish]
            api_base = "https://graph.example.com/v19.0"
            max_retries = 4

            [[accounts]]
            name = "main"
            account_id = "17890"
            access_token = "tok"
            hashtags = ["daily"]

            [optimizer]
            min_samples = 10
            min_duration_hours = 12
            confidence_threshold = 0.9
            interval_hours = 3
            rollback_threshold = -0.2
            watch_min_samples = 5

            [lock]
            dir = "data/locks"
            timeout_secs = 900

            [notify]
            url = "https://hooks.example.com/t"

            [logging]
            level = "debug"
            format = "json"
        "##;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.source.fallback_hosts.len(), 1);
        assert_eq!(config.source.queries.len(), 2);
        assert_eq!(config.publish.max_retries, 4);
        assert_eq!(config.accounts[0].name, "main");
        assert_eq!(config.optimizer.interval_hours, 3);
        assert_eq!(config.lock.timeout_secs, 900);
        assert!(config.notify.is_some());
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_publish_retry_schedule() {
        let config = Config::default();
        let retry = config.publish_retry();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.base_delay_ms, 1000);
    }

    #[test]
    fn test_experiments_validated_at_load() {
        let toml = r#"
            [[experiments]]
            id = "exp"
            name = "Exp"
            metric = "engagement_rate"
            start_time = "2026-08-01T00:00:00Z"
            variants = []
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
