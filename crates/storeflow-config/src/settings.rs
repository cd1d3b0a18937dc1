//! Provider settings loaded from `storeflow.yaml`

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

/// Longest accepted operation timeout or poll interval (30 days)
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Top-level provider configuration
///
/// Every field has a default, so an empty file (or no file at all) yields
/// a usable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub subscription_id: Option<String>,
    pub management_endpoint: String,
    pub features: FeatureFlags,
    pub timeouts: TimeoutSettings,
    pub poller: PollerSettings,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            subscription_id: None,
            management_endpoint: DEFAULT_MANAGEMENT_ENDPOINT.to_string(),
            features: FeatureFlags::default(),
            timeouts: TimeoutSettings::default(),
            poller: PollerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Wait for data-plane endpoints before touching them. Turn off in
    /// environments where the data plane is unreachable from the host.
    pub data_plane_available: bool,
    /// Delete the destination policy when the source side of an object
    /// replication pair fails to create.
    pub compensate_partial_replication: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            data_plane_available: true,
            compensate_partial_replication: false,
        }
    }
}

/// Per-operation timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub create: u64,
    pub read: u64,
    pub update: u64,
    pub delete: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            create: 60 * 60,
            read: 5 * 60,
            update: 60 * 60,
            delete: 60 * 60,
        }
    }
}

impl TimeoutSettings {
    pub fn create(&self) -> Duration {
        Duration::from_secs(self.create)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read)
    }

    pub fn update(&self) -> Duration {
        Duration::from_secs(self.update)
    }

    pub fn delete(&self) -> Duration {
        Duration::from_secs(self.delete)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    pub initial_delay_secs: u64,
    pub interval_secs: u64,
    pub max_interval_secs: u64,
    pub backoff_multiplier: f64,
    pub dropped_connection_tolerance: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: 10,
            interval_secs: 10,
            max_interval_secs: 60,
            backoff_multiplier: 1.0,
            dropped_connection_tolerance: 3,
        }
    }
}

impl ProviderConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Environment variables win over file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(subscription) = std::env::var("ARM_SUBSCRIPTION_ID")
            && !subscription.is_empty()
        {
            self.subscription_id = Some(subscription);
        }

        if let Ok(flag) = std::env::var("STOREFLOW_DATA_PLANE_AVAILABLE") {
            match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.features.data_plane_available = true,
                "0" | "false" | "no" => self.features.data_plane_available = false,
                other => tracing::warn!(
                    "ignoring STOREFLOW_DATA_PLANE_AVAILABLE={:?}: expected true or false",
                    other
                ),
            }
        }

        if let Ok(endpoint) = std::env::var("ARM_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.management_endpoint = endpoint;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timeouts;
        for (name, secs) in [
            ("create", t.create),
            ("read", t.read),
            ("update", t.update),
            ("delete", t.delete),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{} must be greater than zero",
                    name
                )));
            }
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{} ({}s) exceeds the maximum of {}s",
                    name, secs, MAX_DURATION_SECS
                )));
            }
        }

        let p = &self.poller;
        for (name, secs) in [
            ("initial_delay_secs", p.initial_delay_secs),
            ("interval_secs", p.interval_secs),
            ("max_interval_secs", p.max_interval_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "poller.{} ({}s) exceeds the maximum of {}s",
                    name, secs, MAX_DURATION_SECS
                )));
            }
        }

        if self.poller.backoff_multiplier <= 0.0 || self.poller.backoff_multiplier.is_nan() {
            return Err(ConfigError::Invalid(format!(
                "poller.backoff_multiplier must be positive, got {}",
                self.poller.backoff_multiplier
            )));
        }

        if self.poller.interval_secs > self.poller.max_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "poller.interval_secs ({}) exceeds poller.max_interval_secs ({})",
                self.poller.interval_secs, self.poller.max_interval_secs
            )));
        }

        if self.management_endpoint.is_empty() {
            return Err(ConfigError::Invalid(
                "management_endpoint must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
