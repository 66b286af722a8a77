//! Authorization settings
//!
//! Deserialized from whatever configuration source the API server uses;
//! every field has a default so partial documents are accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tenancy_common::retry::Backoff;
use tenancy_common::SPACE_GUID_LABEL;

use crate::cache::DEFAULT_IDENTITY_TTL;
use crate::{Error, Result};

/// Retry schedule for transient forbidden errors
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Delay before the second attempt, in milliseconds
    pub initial_delay_ms: u64,
    /// Multiplier applied after every retry
    pub factor: f64,
    /// Total attempts, including the first
    pub steps: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let backoff = Backoff::default();
        Self {
            initial_delay_ms: backoff.initial_delay.as_millis() as u64,
            factor: backoff.factor,
            steps: backoff.steps,
        }
    }
}

/// Settings for identity resolution, client construction and list scoping
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Namespace holding resources that are not tenant-scoped
    pub root_namespace: String,
    /// How long a resolved identity is reused, in seconds
    pub identity_cache_ttl_secs: u64,
    /// Retry schedule for user clients
    pub retry: RetrySettings,
    /// Label carrying the owning space on tenant resources
    pub space_label: String,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            root_namespace: "cf".to_string(),
            identity_cache_ttl_secs: DEFAULT_IDENTITY_TTL.as_secs(),
            retry: RetrySettings::default(),
            space_label: SPACE_GUID_LABEL.to_string(),
        }
    }
}

impl AuthorizationConfig {
    /// Reject settings that would disable scoping or retries entirely
    pub fn validate(&self) -> Result<()> {
        if self.root_namespace.is_empty() {
            return Err(Error::config("root_namespace must not be empty"));
        }
        if self.space_label.is_empty() {
            return Err(Error::config("space_label must not be empty"));
        }
        if self.retry.steps == 0 {
            return Err(Error::config("retry.steps must be at least 1"));
        }
        if !self.retry.factor.is_finite() || self.retry.factor < 1.0 {
            return Err(Error::config(format!(
                "retry.factor must be at least 1.0, got {}",
                self.retry.factor
            )));
        }
        Ok(())
    }

    /// Identity cache TTL
    pub fn identity_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_cache_ttl_secs)
    }

    /// Backoff schedule for user clients
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            factor: self.retry.factor,
            steps: self.retry.steps,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthorizationConfig::default();
        assert_eq!(config.root_namespace, "cf");
        assert_eq!(config.identity_cache_ttl(), Duration::from_secs(120));
        assert_eq!(config.backoff(), Backoff::default());
        assert_eq!(config.space_label, SPACE_GUID_LABEL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: AuthorizationConfig =
            serde_json::from_str(r#"{"root_namespace":"korifi","retry":{"steps":3}}"#).unwrap();

        assert_eq!(config.root_namespace, "korifi");
        assert_eq!(config.identity_cache_ttl_secs, 120);
        assert_eq!(config.backoff().steps, 3);
        assert_eq!(config.backoff().initial_delay, Duration::from_millis(5));
    }

    #[test]
    fn test_validation_rejects_unusable_settings() {
        let mut config = AuthorizationConfig::default();
        config.retry.steps = 0;
        assert!(config.validate().unwrap_err().to_string().contains("retry.steps"));

        let mut config = AuthorizationConfig::default();
        config.retry.factor = 0.5;
        assert!(config.validate().unwrap_err().to_string().contains("retry.factor"));

        let mut config = AuthorizationConfig::default();
        config.root_namespace.clear();
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }
}
