//! # Configuration Settings
//!
//! Settings for the quota compilation layer. Reserved wire names are
//! constants in the `xds` modules; only deployment-specific values live here.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    #[validate(nested)]
    pub rate_limit: RateLimitSettings,

    #[validate(nested)]
    pub ext_proc: ExtProcSettings,

    #[validate(nested)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.rate_limit.domain.trim().is_empty() {
            return Err(Error::validation_field("rate limit domain must not be blank", "rate_limit.domain"));
        }

        if let Some(cluster) = &self.ext_proc.cluster_name {
            if cluster.trim().is_empty() {
                return Err(Error::validation_field(
                    "ext_proc cluster name must not be blank when set",
                    "ext_proc.cluster_name",
                ));
            }
        }

        Ok(())
    }
}

/// Rate-limit service and filter settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Domain the compiled descriptors are scoped to on the rate-limit service
    #[validate(length(min = 1, message = "Rate limit domain cannot be empty"))]
    pub domain: String,

    /// DNS name of the rate-limit service
    #[validate(length(min = 1, message = "Rate limit service host cannot be empty"))]
    pub service_host: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub service_port: u32,

    /// Timeout the rate-limit filter waits for a decision
    #[validate(range(min = 1, max = 60000, message = "Timeout must be between 1ms and 60s"))]
    pub timeout_ms: u64,

    #[validate(range(min = 1, max = 300, message = "Connect timeout must be between 1 and 300 seconds"))]
    pub connect_timeout_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            domain: "ai-gateway-quota".to_string(),
            service_host: "envoy-ai-gateway-ratelimit".to_string(),
            service_port: 8081,
            timeout_ms: 5000,
            connect_timeout_secs: 5,
        }
    }
}

impl RateLimitSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Request-inspection (ext_proc) filter settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct ExtProcSettings {
    /// Cluster serving the request-inspection processor. When unset the
    /// listener patch leaves HTTP filter chains alone.
    pub cluster_name: Option<String>,

    #[validate(range(min = 1, max = 300, message = "ext_proc timeout must be between 1 and 300 seconds"))]
    pub timeout_secs: u64,
}

impl Default for ExtProcSettings {
    fn default() -> Self {
        Self { cluster_name: None, timeout_secs: 30 }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
