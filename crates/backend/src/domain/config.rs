//! Configuration for both pipeline stages.
//!
//! Config priority: environment variables > config file > defaults.
//!
//! The config file is TOML, looked up at an explicit path or the user config
//! directory (see [`crate::dirs::default_config_path`]). Environment variables
//! keep the names the services have always been deployed with (`GITHUB_TOKEN`,
//! `NATS_URL`, `SOURCE_SUBJECT`, ...), so a container can be configured with
//! no file at all.
//!
//! Each component takes only its own section; nothing below the binary sees
//! the whole [`Config`].

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::dirs;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("{0} is required")]
  Missing(&'static str),
  #[error("Invalid value for {key}: {message}")]
  Invalid { key: &'static str, message: String },
}

// ============================================================================
// GitHub Configuration
// ============================================================================

/// Hosting API settings shared by the collector and the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
  /// Organization whose repositories are scanned (collector only)
  pub org: String,

  /// Personal access token, sent as a bearer token
  pub token: String,

  /// API base URL (default: https://api.github.com)
  pub api_url: String,

  /// Per-request timeout in seconds (default: 30)
  pub request_timeout_secs: u64,
}

impl Default for GitHubConfig {
  fn default() -> Self {
    Self {
      org: String::new(),
      token: String::new(),
      api_url: "https://api.github.com".to_string(),
      request_timeout_secs: 30,
    }
  }
}

impl GitHubConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

// ============================================================================
// NATS Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
  /// Server URL (default: nats://localhost:4222)
  pub url: String,
}

impl Default for NatsConfig {
  fn default() -> Self {
    Self {
      url: "nats://localhost:4222".to_string(),
    }
  }
}

// ============================================================================
// Collector Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
  /// Subject repository records are published to
  pub subject: String,

  /// Five-field cron expression (default: weekly, Sunday at midnight)
  pub schedule: String,

  /// Scan once immediately at startup, before the first scheduled run
  pub run_on_startup: bool,

  /// Upper bound for a single scan in seconds (default: 1800)
  pub scan_timeout_secs: u64,
}

impl Default for CollectorConfig {
  fn default() -> Self {
    Self {
      subject: "github.repositories".to_string(),
      schedule: "0 0 * * 0".to_string(),
      run_on_startup: false,
      scan_timeout_secs: 30 * 60,
    }
  }
}

impl CollectorConfig {
  pub fn scan_timeout(&self) -> Duration {
    Duration::from_secs(self.scan_timeout_secs)
  }
}

// ============================================================================
// Validator Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
  /// Subject consumed by the validator
  pub source_subject: String,

  /// Subject for repositories that contain the probe file
  pub valid_subject: String,

  /// Subject for repositories without it, or whose check failed
  pub invalid_subject: String,

  /// Drain messages already queued on the source subject before going live
  pub process_startup_messages: bool,

  /// File probed at the repository root
  pub probe_path: String,

  /// How long the startup drain waits for a message before treating the
  /// queue as empty, in milliseconds (default: 1000)
  pub drain_idle_timeout_ms: u64,

  /// Maximum concurrently processed live messages (default: 64)
  pub max_in_flight: usize,
}

impl Default for ValidatorConfig {
  fn default() -> Self {
    Self {
      source_subject: "github.repositories".to_string(),
      valid_subject: "repos.valid".to_string(),
      invalid_subject: "repos.invalid".to_string(),
      process_startup_messages: true,
      probe_path: crate::DEFAULT_PROBE_PATH.to_string(),
      drain_idle_timeout_ms: 1000,
      max_in_flight: 64,
    }
  }
}

impl ValidatorConfig {
  pub fn drain_idle_timeout(&self) -> Duration {
    Duration::from_millis(self.drain_idle_timeout_ms)
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Log level: error, warn, info, debug, trace (default: info)
  pub level: String,

  /// Write logs to rolling files in this directory instead of the console
  #[serde(skip_serializing_if = "Option::is_none")]
  pub log_dir: Option<PathBuf>,

  /// Rotation for file logs: daily, hourly, never (default: daily)
  pub rotation: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      log_dir: None,
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Root Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub github: GitHubConfig,

  #[serde(default)]
  pub nats: NatsConfig,

  #[serde(default)]
  pub collector: CollectorConfig,

  #[serde(default)]
  pub validator: ValidatorConfig,

  #[serde(default)]
  pub logging: LoggingConfig,
}

impl Config {
  /// Load configuration from a file (if any) and the process environment.
  ///
  /// An explicit `path` must exist. Without one, the user config file is
  /// used when present and defaults otherwise.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let mut config = match path {
      Some(path) => Self::from_file(path)?,
      None => {
        let default_path = dirs::default_config_path();
        if default_path.exists() {
          Self::from_file(&default_path)?
        } else {
          Self::default()
        }
      }
    };

    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_toml(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  /// Apply environment overrides.
  ///
  /// Empty values are ignored, matching how the services treated unset
  /// variables. `RUN_ON_STARTUP` only enables on `"true"`;
  /// `PROCESS_STARTUP_MESSAGES` only disables on `"false"`.
  pub fn apply_env<F>(&mut self, lookup: F)
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = get("GITHUB_ORG") {
      self.github.org = v;
    }
    if let Some(v) = get("GITHUB_TOKEN") {
      self.github.token = v;
    }
    if let Some(v) = get("GITHUB_API_URL") {
      self.github.api_url = v;
    }
    if let Some(v) = get("NATS_URL") {
      self.nats.url = v;
    }
    if let Some(v) = get("NATS_SUBJECT") {
      self.collector.subject = v;
    }
    if let Some(v) = get("CRON_SCHEDULE") {
      self.collector.schedule = v;
    }
    if let Some(v) = get("RUN_ON_STARTUP") {
      self.collector.run_on_startup = v == "true";
    }
    if let Some(v) = get("SOURCE_SUBJECT") {
      self.validator.source_subject = v;
    }
    if let Some(v) = get("VALID_REPOS_SUBJECT") {
      self.validator.valid_subject = v;
    }
    if let Some(v) = get("INVALID_REPOS_SUBJECT") {
      self.validator.invalid_subject = v;
    }
    if let Some(v) = get("PROCESS_STARTUP_MESSAGES") {
      self.validator.process_startup_messages = v != "false";
    }
    if let Some(v) = get("PROBE_PATH") {
      self.validator.probe_path = v;
    }
    if let Some(v) = get("LOG_LEVEL") {
      self.logging.level = v;
    }
  }

  /// Check the settings the collector cannot run without.
  pub fn validate_for_collector(&self) -> Result<(), ConfigError> {
    if self.github.org.is_empty() {
      return Err(ConfigError::Missing("GITHUB_ORG"));
    }
    if self.github.token.is_empty() {
      return Err(ConfigError::Missing("GITHUB_TOKEN"));
    }
    if self.collector.subject.is_empty() {
      return Err(ConfigError::Missing("NATS_SUBJECT"));
    }
    Ok(())
  }

  /// Check the settings the validator cannot run without.
  pub fn validate_for_validator(&self) -> Result<(), ConfigError> {
    if self.github.token.is_empty() {
      return Err(ConfigError::Missing("GITHUB_TOKEN"));
    }
    let v = &self.validator;
    for (key, value) in [
      ("SOURCE_SUBJECT", &v.source_subject),
      ("VALID_REPOS_SUBJECT", &v.valid_subject),
      ("INVALID_REPOS_SUBJECT", &v.invalid_subject),
    ] {
      if value.is_empty() {
        return Err(ConfigError::Missing(key));
      }
    }
    if v.valid_subject == v.invalid_subject {
      return Err(ConfigError::Invalid {
        key: "INVALID_REPOS_SUBJECT",
        message: "must differ from VALID_REPOS_SUBJECT".to_string(),
      });
    }
    if v.probe_path.is_empty() {
      return Err(ConfigError::Missing("PROBE_PATH"));
    }
    if v.max_in_flight == 0 {
      return Err(ConfigError::Invalid {
        key: "validator.max_in_flight",
        message: "must be at least 1".to_string(),
      });
    }
    Ok(())
  }

  /// Render the effective configuration as TOML with the token redacted.
  pub fn to_redacted_toml(&self) -> Result<String, toml::ser::Error> {
    let mut shown = self.clone();
    if !shown.github.token.is_empty() {
      shown.github.token = "<redacted>".to_string();
    }
    toml::to_string_pretty(&shown)
  }
}
