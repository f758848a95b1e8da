//! Daemon configuration
//!
//! Loaded from a TOML file with every section optional. Secrets never live in
//! the file: the bridge token and the webhook URL are read from
//! `FLIPPER_BRIDGE_TOKEN` and `FLIPPER_WEBHOOK_URL`.
//!
//! ```toml
//! ledger_path = "/var/lib/flipper"
//! log_format = "json"
//!
//! [bridge]
//! url = "http://127.0.0.1:8750"
//!
//! [policy]
//! picker_timeout_hours = 18
//! timeout_exempt_tracks = ["MG"]
//! ```

use crate::constants::{
    DEFAULT_BRIDGE_TIMEOUT_SECS, DEFAULT_BRIDGE_URL, DEFAULT_LEDGER_MAX_SIZE_MB,
    DEFAULT_LEDGER_PATH, DEFAULT_TIMEOUT_CHECK_INTERVAL_SECS, DEFAULT_WEBHOOK_TIMEOUT_SECS,
    ENV_BRIDGE_TOKEN, ENV_WEBHOOK_URL,
};
use flipper_core::{ConfigError, PolicyConfig, Track};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Connection to the scoreboard's admin bridge.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub url: String,
    pub timeout_secs: u64,
    #[serde(skip)]
    pub token: Option<SecretString>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BRIDGE_URL.to_string(),
            timeout_secs: DEFAULT_BRIDGE_TIMEOUT_SECS,
            token: None,
        }
    }
}

impl BridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Announcement delivery. Without a URL, announcements only go to the log.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    pub timeout_secs: u64,
    #[serde(skip)]
    pub url: Option<SecretString>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_WEBHOOK_TIMEOUT_SECS,
            url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Seconds between timeout escalator runs
    pub timeout_check_interval_secs: u64,
    /// Tracks that get a maintenance task
    pub tracks: Vec<Track>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timeout_check_interval_secs: DEFAULT_TIMEOUT_CHECK_INTERVAL_SECS,
            tracks: Track::ALL.to_vec(),
        }
    }
}

impl SchedulerConfig {
    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_secs(self.timeout_check_interval_secs)
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub ledger_path: PathBuf,
    pub ledger_max_size_mb: usize,
    pub log_format: LogFormat,
    pub bridge: BridgeConfig,
    pub webhook: WebhookConfig,
    pub scheduler: SchedulerConfig,
    pub policy: PolicyConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            ledger_max_size_mb: DEFAULT_LEDGER_MAX_SIZE_MB,
            log_format: LogFormat::default(),
            bridge: BridgeConfig::default(),
            webhook: WebhookConfig::default(),
            scheduler: SchedulerConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from `path` (defaults when `None`), apply environment secrets and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                Self::from_toml_str(&text).map_err(|e| ConfigError::Unreadable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        tracing::debug!(
            ledger_path = %config.ledger_path.display(),
            bridge_url = %config.bridge.url,
            webhook = config.webhook.url.is_some(),
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Pick up secrets through `lookup`; blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| SecretString::new(v.into()))
        };
        if let Some(token) = secret(ENV_BRIDGE_TOKEN) {
            self.bridge.token = Some(token);
        }
        if let Some(url) = secret(ENV_WEBHOOK_URL) {
            self.webhook.url = Some(url);
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - the lifecycle policy
    /// - the ledger map size and every timeout are non-zero
    /// - the bridge and webhook URLs are http(s)
    /// - at least one track is scheduled
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()?;

        let non_zero = [
            ("ledger_max_size_mb", self.ledger_max_size_mb as u64),
            ("bridge.timeout_secs", self.bridge.timeout_secs),
            ("webhook.timeout_secs", self.webhook.timeout_secs),
            (
                "scheduler.timeout_check_interval_secs",
                self.scheduler.timeout_check_interval_secs,
            ),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if !is_http_url(&self.bridge.url) {
            return Err(ConfigError::InvalidValue {
                field: "bridge.url".to_string(),
                value: self.bridge.url.clone(),
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if let Some(url) = &self.webhook.url {
            if !is_http_url(url.expose_secret()) {
                return Err(ConfigError::InvalidValue {
                    field: ENV_WEBHOOK_URL.to_string(),
                    value: "[REDACTED]".to_string(),
                    reason: "must start with http:// or https://".to_string(),
                });
            }
        }

        if self.scheduler.tracks.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "scheduler.tracks".to_string(),
            });
        }
        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.tracks, Track::ALL.to_vec());
        assert_eq!(config.policy.picker_timeout_hours, 18);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DaemonConfig::from_toml_str(
            r#"
            ledger_path = "/tmp/flipper"
            log_format = "json"

            [policy]
            picker_timeout_hours = 12
            timeout_exempt_tracks = ["MG", "WG-VR"]

            [scheduler]
            tracks = ["DG"]
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger_path, PathBuf::from("/tmp/flipper"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.policy.picker_timeout_hours, 12);
        assert!(config.policy.is_timeout_exempt(Track::WeeklyVr));
        assert_eq!(config.policy.exclusion_window_days, 21);
        assert_eq!(config.scheduler.tracks, vec![Track::DailyGrind]);
        assert_eq!(config.bridge.url, DEFAULT_BRIDGE_URL);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(DaemonConfig::from_toml_str("ledger_pth = \"x\"").is_err());
        assert!(DaemonConfig::from_toml_str("[policy]\npicker_timeout = 3").is_err());
    }

    #[test]
    fn test_secrets_cannot_come_from_file() {
        assert!(DaemonConfig::from_toml_str("[bridge]\ntoken = \"abc\"").is_err());
    }

    #[test]
    fn test_env_secrets() {
        let mut config = DaemonConfig::default();
        config.apply_env(env(&[
            (ENV_BRIDGE_TOKEN, "s3cret"),
            (ENV_WEBHOOK_URL, "  "),
        ]));

        let token = config.bridge.token.as_ref().unwrap();
        assert_eq!(token.expose_secret(), "s3cret");
        assert!(config.webhook.url.is_none());
        assert!(!format!("{:?}", config).contains("s3cret"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DaemonConfig::default();
        config.bridge.url = "ftp://bridge".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "bridge.url"
        ));

        let mut config = DaemonConfig::default();
        config.scheduler.tracks.clear();
        assert!(matches!(config.validate(), Err(ConfigError::MissingRequired { .. })));

        let mut config = DaemonConfig::default();
        config.policy.picker_timeout_hours = 0;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.apply_env(env(&[(ENV_WEBHOOK_URL, "discord.example/hook")]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reports_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(matches!(
            DaemonConfig::load(Some(&path)),
            Err(ConfigError::Unreadable { .. })
        ));

        let path = dir.path().join("flipper.toml");
        std::fs::write(&path, "[scheduler]\ntimeout_check_interval_secs = 60\n").unwrap();
        let config = DaemonConfig::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.timeout_check_interval(), Duration::from_secs(60));
    }
}
