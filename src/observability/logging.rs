//! # Structured Logging
//!
//! Span macros and subscriber setup on top of the tracing ecosystem.

use crate::config::{LoggingSettings, Settings};
use crate::errors::{Error, Result};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Create a tracing span covering one translation pass.
///
/// Every pass gets a fresh `operation_id` so log lines from overlapping
/// passes can be told apart.
///
/// ```rust,ignore
/// let span = translate_span!("post_translate_modify", clusters = clusters.len());
/// ```
#[macro_export]
macro_rules! translate_span {
    ($operation:expr) => {
        tracing::info_span!(
            "translate",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!(
            "translate",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Calling this twice
/// returns a configuration error instead of panicking.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| Error::config(format!("Invalid log level '{}': {}", settings.level, e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if settings.json {
        registry
            .with(fmt::layer().json().flatten_event(true).with_target(true).with_ansi(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| Error::config(format!("Failed to install tracing subscriber: {}", e)))
}

/// Log the effective settings at startup
pub fn log_settings(settings: &Settings) {
    info!(
        domain = %settings.rate_limit.domain,
        rate_limit_service = %format!("{}:{}", settings.rate_limit.service_host, settings.rate_limit.service_port),
        rate_limit_timeout_ms = settings.rate_limit.timeout_ms,
        ext_proc_cluster = settings.ext_proc.cluster_name.as_deref().unwrap_or("<disabled>"),
        "Quota translator configuration loaded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_macros_compile() {
        let _span = translate_span!("post_translate_modify");
        let _span = translate_span!("post_listener_modify", listener = "default/gw/http");
    }

    #[test]
    fn test_log_settings() {
        log_settings(&Settings::default());
    }

    #[test]
    fn test_bad_level_is_config_error() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let settings = LoggingSettings { level: "quotaplane=loud".to_string(), json: false };
        let err = init_logging(&settings).expect_err("malformed directive must fail");
        assert!(matches!(err, Error::Config(_)));
    }
}
