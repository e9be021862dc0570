//! # Configuration Management
//!
//! Loads [`Settings`] from built-in defaults, an optional file and
//! `QUOTAPLANE__`-prefixed environment variables, in that order of precedence.
//!
//! ```text
//! QUOTAPLANE_CONFIG=/etc/quotaplane/config.yaml
//! QUOTAPLANE__RATE_LIMIT__SERVICE_PORT=9091
//! QUOTAPLANE__EXT_PROC__CLUSTER_NAME=ai-gateway-extproc
//! ```

pub mod settings;

pub use settings::{ExtProcSettings, LoggingSettings, RateLimitSettings, Settings};

use crate::errors::Result;

/// Environment variable naming an optional settings file
pub const CONFIG_FILE_ENV: &str = "QUOTAPLANE_CONFIG";

const ENV_PREFIX: &str = "QUOTAPLANE";

impl Settings {
    /// Load settings from the file named by `QUOTAPLANE_CONFIG` (if any) and the environment.
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok();
        Self::load_from(file.as_deref())
    }

    /// Load settings from an explicit file path (if any) and the environment.
    pub fn load_from(file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }
}
