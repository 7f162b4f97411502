//! Operator configuration
//!
//! Values come from built-in defaults, optionally overlaid by a YAML file
//! named in `EXPOSURE_OPERATOR_CONFIG`, then by per-field environment
//! variables (`EXPOSURE_OPERATOR_WORKERS`, `EXPOSURE_OPERATOR_POLL_INTERVAL_SECS`, ...).

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable naming an optional YAML config file
pub const CONFIG_PATH_ENV: &str = "EXPOSURE_OPERATOR_CONFIG";

const ENV_PREFIX: &str = "EXPOSURE_OPERATOR_";

/// Runtime settings of the operator
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Number of concurrent reconcile workers
    pub workers: usize,

    /// Re-check interval for a parent blocked by dependents
    pub poll_interval_secs: u64,

    /// First retry delay after a failed pass
    pub backoff_base_millis: u64,

    /// Ceiling for the retry delay
    pub backoff_max_secs: u64,

    /// Immediate refetch-and-retry attempts on a version conflict
    pub conflict_retries: u32,

    /// Page size used when scanning dependents
    pub dependent_page_size: u32,

    /// Port of the metrics and health endpoints
    pub metrics_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            poll_interval_secs: 30,
            backoff_base_millis: 500,
            backoff_max_secs: 300,
            conflict_retries: 1,
            dependent_page_size: 250,
            metrics_port: 8080,
        }
    }
}

impl OperatorConfig {
    /// Load defaults, the optional config file, then environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML config file; absent fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply `EXPOSURE_OPERATOR_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_field(&lookup, "WORKERS", &mut self.workers)?;
        override_field(&lookup, "POLL_INTERVAL_SECS", &mut self.poll_interval_secs)?;
        override_field(&lookup, "BACKOFF_BASE_MILLIS", &mut self.backoff_base_millis)?;
        override_field(&lookup, "BACKOFF_MAX_SECS", &mut self.backoff_max_secs)?;
        override_field(&lookup, "CONFLICT_RETRIES", &mut self.conflict_retries)?;
        override_field(&lookup, "DEPENDENT_PAGE_SIZE", &mut self.dependent_page_size)?;
        override_field(&lookup, "METRICS_PORT", &mut self.metrics_port)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::config("pollIntervalSecs must be at least 1"));
        }
        if self.dependent_page_size == 0 {
            return Err(Error::config("dependentPageSize must be at least 1"));
        }
        if self.backoff_base() > self.backoff_max() {
            return Err(Error::config(format!(
                "backoffBaseMillis ({}) exceeds backoffMaxSecs ({})",
                self.backoff_base_millis, self.backoff_max_secs
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_millis)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

fn override_field<F, T>(lookup: &F, field: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{}{}", ENV_PREFIX, field);
    if let Some(raw) = lookup(&key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("Invalid value '{}' for {}: {}", raw, key, e)))?;
    }
    Ok(())
}
