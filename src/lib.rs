//! # Quotaplane
//!
//! Quotaplane is the quota policy compilation layer of an AI gateway control
//! plane. On every configuration pass it reads QuotaPolicy objects from a
//! resource store and patches the Envoy configuration the gateway controller
//! already generated:
//!
//! ```text
//! ResourceStore ──► PolicyResolver ──► descriptor compiler ──► per-route RateLimitPerRoute
//!                        │
//!                        └──────────► filter chain editor ───► cluster upstream filters
//!                                                             listener ext_proc filter
//! original-destination patch ─────────────────────────────► fallback cluster + routes
//! ```
//!
//! All transforms are pure: inputs are borrowed, patched copies are returned
//! and a repeated pass over its own output changes nothing.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use quotaplane::{store::InMemoryStore, QuotaTranslator, Result, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::load()?;
//!     quotaplane::observability::init_logging(&settings.logging)?;
//!
//!     let store = InMemoryStore::from_yaml(&std::fs::read_to_string("policies.yaml")?)?;
//!     let translator = QuotaTranslator::new(store, settings)?;
//!     let output = translator.post_translate_modify(&[], &[]).await?;
//!     println!("{} clusters", output.clusters.len());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod observability;
pub mod rls;
pub mod store;
pub mod translator;
pub mod xds;

pub use config::Settings;
pub use errors::{Error, Result};
pub use translator::{PassError, PassReport, QuotaTranslator, ResourceKind, TranslateOutput};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }
}
