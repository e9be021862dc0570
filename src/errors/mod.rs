//! # Error Handling
//!
//! Error types for the quota compilation layer, built on `thiserror`.
//!
//! Errors fall into three buckets at the call site: conditions that are not
//! ours to handle (never constructed as errors at all), data errors scoped to
//! one cluster or route (`Decode`, `Encode`), and store lookups. The store
//! distinguishes `NotFound` so callers can fold a miss into "no policy applies".

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the quota compilation layer
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors raised by policy admission checks
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// A resource store lookup found nothing
    #[error("Resource not found: {kind} '{name}'")]
    NotFound { kind: String, name: String },

    /// Resource store failures other than not-found
    #[error("Store error: {0}")]
    Store(String),

    /// Malformed wire payload on a resource handed in by the control plane
    #[error("Failed to decode {resource}: {source}")]
    Decode {
        resource: String,
        #[source]
        source: prost::DecodeError,
    },

    /// Failure packing a message into its wire form
    #[error("Failed to encode {resource}: {source}")]
    Encode {
        resource: String,
        #[source]
        source: prost::EncodeError,
    },

    /// Manifest (de)serialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a new validation error tied to a field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a new not-found error
    pub fn not_found<K: Into<String>, N: Into<String>>(kind: K, name: N) -> Self {
        Self::NotFound { kind: kind.into(), name: name.into() }
    }

    /// Create a new store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store(message.into())
    }

    pub fn decode<S: Into<String>>(resource: S, source: prost::DecodeError) -> Self {
        Self::Decode { resource: resource.into(), source }
    }

    pub fn encode<S: Into<String>>(resource: S, source: prost::EncodeError) -> Self {
        Self::Encode { resource: resource.into(), source }
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(context: S, source: serde_yaml::Error) -> Self {
        Self::Serialization { context: context.into(), source }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// True when the error is a store miss rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or_else(|| e.code.to_string(), |m| m.to_string()))
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        // Nested struct and list errors do not show up in field_errors.
        let message = if message.is_empty() { errors.to_string() } else { message };

        Self::validation(format!("Validation failed: {}", message))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
