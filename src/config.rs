//! Configuration
//!
//! All timing constants and backend endpoints, with defaults matching the
//! reference deployment. Every value can be overridden from the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaks::DEFAULT_BREAK_MS;
use crate::cooldown::DEFAULT_COOLDOWN_MS;
use crate::error::AdaptError;

/// Default sensor polling interval (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
/// Default backend serving upload and generation endpoints
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";
/// Default path of the upload-and-summarize endpoint
pub const DEFAULT_UPLOAD_PATH: &str = "/upload";
/// Default timeout for backend requests (milliseconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
/// Upper bound for the cooldown window and the break length (24 h)
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

pub const ENV_COOLDOWN_MS: &str = "FOCUS_FLUX_COOLDOWN_MS";
pub const ENV_BREAK_MS: &str = "FOCUS_FLUX_BREAK_MS";
pub const ENV_POLL_MS: &str = "FOCUS_FLUX_POLL_MS";
pub const ENV_BACKEND_URL: &str = "FOCUS_FLUX_BACKEND_URL";
pub const ENV_UPLOAD_PATH: &str = "FOCUS_FLUX_UPLOAD_PATH";
pub const ENV_TIMEOUT_MS: &str = "FOCUS_FLUX_TIMEOUT_MS";

/// Settings of the decision core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Minimum spacing between adaptation actions
    pub cooldown_ms: u64,
    /// Length of a suggested break
    pub break_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            break_ms: DEFAULT_BREAK_MS,
        }
    }
}

impl ControllerConfig {
    /// Cooldown window, capped at [`MAX_DURATION_MS`]
    pub fn cooldown(&self) -> chrono::Duration {
        bounded_millis(self.cooldown_ms)
    }

    /// Break length, capped at [`MAX_DURATION_MS`]
    pub fn break_duration(&self) -> chrono::Duration {
        bounded_millis(self.break_ms)
    }

    pub fn validate(&self) -> Result<(), AdaptError> {
        if self.cooldown_ms > MAX_DURATION_MS {
            return Err(AdaptError::Config(format!(
                "cooldown must be at most {} ms, got {}",
                MAX_DURATION_MS, self.cooldown_ms
            )));
        }
        if self.break_ms == 0 || self.break_ms > MAX_DURATION_MS {
            return Err(AdaptError::Config(format!(
                "break duration must be between 1 and {} ms, got {}",
                MAX_DURATION_MS, self.break_ms
            )));
        }
        Ok(())
    }
}

fn bounded_millis(ms: u64) -> chrono::Duration {
    let ms = i64::try_from(ms.min(MAX_DURATION_MS)).unwrap_or(0);
    chrono::Duration::milliseconds(ms)
}

/// Settings of the whole viewer: core plus the backend plumbing around it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewerConfig {
    pub controller: ControllerConfig,
    /// How often the sensing side emits signals
    pub poll_interval_ms: u64,
    /// Base URL of the summarize / generate backend
    pub backend_url: String,
    pub upload_path: String,
    pub request_timeout_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            upload_path: DEFAULT_UPLOAD_PATH.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl ViewerConfig {
    /// Defaults overridden by `FOCUS_FLUX_*` environment variables
    pub fn from_env() -> Result<Self, AdaptError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Load a JSON config file; missing keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self, AdaptError> {
        let config: ViewerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from any key lookup (the environment in production)
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, AdaptError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_COOLDOWN_MS) {
            self.controller.cooldown_ms = parse_ms(ENV_COOLDOWN_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_BREAK_MS) {
            self.controller.break_ms = parse_ms(ENV_BREAK_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_POLL_MS) {
            self.poll_interval_ms = parse_ms(ENV_POLL_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_BACKEND_URL) {
            self.backend_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup(ENV_UPLOAD_PATH) {
            self.upload_path = v.trim().to_string();
        }
        if let Some(v) = lookup(ENV_TIMEOUT_MS) {
            self.request_timeout_ms = parse_ms(ENV_TIMEOUT_MS, &v)?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), AdaptError> {
        if !(self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://")) {
            return Err(AdaptError::Config(format!(
                "backend URL must be http(s): {}",
                self.backend_url
            )));
        }
        if !self.upload_path.starts_with('/') {
            return Err(AdaptError::Config(format!(
                "upload path must start with '/': {}",
                self.upload_path
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(AdaptError::Config("poll interval must be positive".to_string()));
        }
        self.controller.validate()
    }

    pub fn upload_url(&self) -> String {
        format!("{}{}", self.backend_url.trim_end_matches('/'), self.upload_path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64, AdaptError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| AdaptError::Config(format!("{} must be milliseconds, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ViewerConfig::default();
        assert_eq!(config.controller.cooldown_ms, 10_000);
        assert_eq!(config.controller.break_ms, 300_000);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.upload_url(), "http://127.0.0.1:5000/upload");
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_COOLDOWN_MS, "2500"),
            (ENV_BREAK_MS, " 60000 "),
            (ENV_BACKEND_URL, "https://study.example.org/"),
        ]);

        let config = ViewerConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.controller.cooldown_ms, 2_500);
        assert_eq!(config.controller.break_ms, 60_000);
        assert_eq!(config.upload_url(), "https://study.example.org/upload");
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let result = ViewerConfig::default().with_overrides(|k| {
            (k == ENV_POLL_MS).then(|| "two seconds".to_string())
        });
        assert!(matches!(result, Err(AdaptError::Config(_))));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            ViewerConfig::from_json(r#"{"controller": {"cooldownMs": 5000}, "pollIntervalMs": 1000}"#)
                .unwrap();
        assert_eq!(config.controller.cooldown_ms, 5_000);
        assert_eq!(config.controller.break_ms, DEFAULT_BREAK_MS);
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        for (key, value) in [
            (ENV_COOLDOWN_MS, "9223372036854775808"),
            (ENV_COOLDOWN_MS, "18446744073709551615"),
            (ENV_BREAK_MS, "9223372036854775807"),
            (ENV_BREAK_MS, "0"),
            (ENV_POLL_MS, "0"),
        ] {
            let result = ViewerConfig::default()
                .with_overrides(|k| (k == key).then(|| value.to_string()));
            assert!(
                matches!(result, Err(AdaptError::Config(_))),
                "{}={} accepted",
                key,
                value
            );
        }

        let one_day = MAX_DURATION_MS.to_string();
        let config = ViewerConfig::default()
            .with_overrides(|k| (k == ENV_BREAK_MS).then(|| one_day.clone()))
            .unwrap();
        assert_eq!(config.controller.break_ms, MAX_DURATION_MS);
    }

    #[test]
    fn test_unvalidated_durations_are_capped() {
        let config = ControllerConfig {
            cooldown_ms: u64::MAX,
            break_ms: i64::MAX as u64,
        };
        assert!(config.validate().is_err());
        assert_eq!(config.cooldown(), chrono::Duration::hours(24));
        assert_eq!(config.break_duration(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_invalid_backend_url_rejected() {
        let result = ViewerConfig::from_json(r#"{"backendUrl": "ftp://example.org"}"#);
        assert!(matches!(result, Err(AdaptError::Config(_))));
    }
}
