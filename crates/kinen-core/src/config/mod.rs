//! Sync engine configuration.
//!
//! Provides `EngineConfig`, loaded from a JSON file or built from defaults, with
//! `KINEN_*` environment overrides applied on top.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{compact_text, is_http_url, normalize_text_option};
use crate::{Error, Result};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_HISTORY_RETENTION_DAYS: u32 = 30;
const DEFAULT_PERIODIC_SYNC_SECS: u64 = 300;
const DEFAULT_QUEUE_PAGE_SIZE: usize = 32;

/// Runtime configuration of the sync engine.
///
/// Secret credentials may be supplied through `KINEN_REMOTE_TOKEN` instead of
/// being written to disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Base URL of the remote authority
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
    pub request_timeout_secs: u64,
    /// Automatic retry cap per mutation
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Age after which settled conflicts and sync log entries are pruned
    pub history_retention_days: u32,
    /// Interval of the periodic wake trigger; 0 disables it
    pub periodic_sync_secs: u64,
    pub queue_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_token: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            history_retention_days: DEFAULT_HISTORY_RETENTION_DAYS,
            periodic_sync_secs: DEFAULT_PERIODIC_SYNC_SECS,
            queue_page_size: DEFAULT_QUEUE_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Defaults with `KINEN_*` environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a JSON config file, then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            Self::parse(&raw)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse and validate a JSON payload.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|error| {
            Error::InvalidInput(format!("invalid engine config: {}", compact_text(&error.to_string())))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = normalize_text_option(lookup("KINEN_REMOTE_URL")) {
            self.remote_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup("KINEN_REMOTE_TOKEN")) {
            self.remote_token = Some(token);
        }
        if let Some(value) = parse_override(&lookup, "KINEN_MAX_RETRIES")? {
            self.max_retries = value;
        }
        if let Some(value) = parse_override(&lookup, "KINEN_RETRY_BASE_DELAY_MS")? {
            self.retry_base_delay_ms = value;
        }
        if let Some(value) = parse_override(&lookup, "KINEN_RETENTION_DAYS")? {
            self.history_retention_days = value;
        }
        if let Some(value) = parse_override(&lookup, "KINEN_PERIODIC_SYNC_SECS")? {
            self.periodic_sync_secs = value;
        }
        self.validate()
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.remote_url {
            if !is_http_url(url) {
                return Err(Error::InvalidInput(
                    "remote_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidInput(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.queue_page_size == 0 {
            return Err(Error::InvalidInput(
                "queue_page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn history_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.history_retention_days))
    }

    /// `None` when the periodic trigger is disabled.
    pub const fn periodic_sync_interval(&self) -> Option<Duration> {
        if self.periodic_sync_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.periodic_sync_secs))
        }
    }
}

fn parse_override<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = normalize_text_option(lookup(key)) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|_| Error::InvalidInput(format!("{key} must be a non-negative integer, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay(), Duration::from_secs(1));
        assert_eq!(config.history_retention(), chrono::Duration::days(30));
        assert_eq!(
            config.periodic_sync_interval(),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let error = EngineConfig::parse(r#"{ "max_retries": 5, "unexpected": true }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn parse_fills_missing_fields_with_defaults() {
        let config = EngineConfig::parse(r#"{ "remote_url": "https://api.example.com" }"#).unwrap();
        assert_eq!(config.remote_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.queue_page_size, 32);
    }

    #[test]
    fn parse_rejects_non_http_url() {
        assert!(EngineConfig::parse(r#"{ "remote_url": "ftp://example.com" }"#).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(lookup(&[
                ("KINEN_REMOTE_URL", " https://sync.example.com "),
                ("KINEN_MAX_RETRIES", "5"),
                ("KINEN_PERIODIC_SYNC_SECS", "0"),
            ]))
            .unwrap();

        assert_eq!(config.remote_url.as_deref(), Some("https://sync.example.com"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.periodic_sync_interval(), None);
    }

    #[test]
    fn env_override_rejects_garbage() {
        let mut config = EngineConfig::default();
        let error = config
            .apply_overrides(lookup(&[("KINEN_RETRY_BASE_DELAY_MS", "soon")]))
            .unwrap_err();
        assert!(error.to_string().contains("KINEN_RETRY_BASE_DELAY_MS"));
    }
}
