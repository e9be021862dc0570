//! # Observability
//!
//! Structured logging for the quota translator.

pub mod logging;

pub use logging::{init_logging, log_settings};
