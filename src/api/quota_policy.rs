//! QuotaPolicy object model.
//!
//! Mirrors the manifest shape stored in the resource store. Compilation never
//! rejects a policy; [`QuotaPolicy::validate`] is the admission-time check the
//! store loader runs before accepting a manifest.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::ObjectMeta;

/// A quota/rate-limit intent scoped to one or more backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuotaPolicy {
    #[validate(nested)]
    pub metadata: ObjectMeta,

    #[validate(nested)]
    #[serde(default)]
    pub spec: QuotaPolicySpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuotaPolicySpec {
    /// Backends in the policy's namespace this policy applies to
    #[validate(nested)]
    #[serde(default)]
    pub target_refs: Vec<TargetRef>,

    #[validate(nested)]
    #[serde(default)]
    pub per_model_quotas: Vec<PerModelQuota>,

    /// Whole-service limit, independent of the model
    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_quota: Option<ServiceQuota>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[validate(length(min = 1, max = 253, message = "Target name must be 1-253 characters"))]
    pub name: String,
}

/// The quota tree for one model.
///
/// Both fields are optional on the wire. Entries missing either one are
/// skipped by the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerModelQuota {
    #[validate(length(min = 1, message = "Model name cannot be empty"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDefinition {
    #[validate(nested)]
    #[serde(default)]
    pub bucket_rules: Vec<BucketRule>,

    /// Fallback bucket; a zero limit disables it
    #[validate(nested)]
    #[serde(default)]
    pub default_bucket: QuotaValue,
}

/// A conditional sub-limit matched on client attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct BucketRule {
    #[validate(nested)]
    #[serde(default)]
    pub client_selectors: Vec<ClientSelector>,

    #[validate(nested)]
    pub quota: QuotaValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_mode: Option<bool>,
}

impl BucketRule {
    /// All header predicates of the rule, flattened across selectors in declaration order.
    pub fn headers(&self) -> impl Iterator<Item = &HeaderMatch> {
        self.client_selectors.iter().flat_map(|s| s.headers.iter())
    }

    pub fn is_shadow(&self) -> bool {
        self.shadow_mode.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientSelector {
    #[validate(nested)]
    #[serde(default)]
    pub headers: Vec<HeaderMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HeaderMatchType {
    #[default]
    Exact,
    RegularExpression,
    Distinct,
}

/// One header predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_header_match"))]
pub struct HeaderMatch {
    #[validate(length(min = 1, max = 256, message = "Header name must be 1-256 characters"))]
    pub name: String,

    #[serde(default, rename = "type")]
    pub match_type: HeaderMatchType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invert: Option<bool>,
}

impl HeaderMatch {
    pub fn exact(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            match_type: HeaderMatchType::Exact,
            value: Some(value.into()),
            invert: None,
        }
    }

    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            match_type: HeaderMatchType::RegularExpression,
            value: Some(pattern.into()),
            invert: None,
        }
    }

    pub fn distinct(name: impl Into<String>) -> Self {
        Self { name: name.into(), match_type: HeaderMatchType::Distinct, value: None, invert: None }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = Some(true);
        self
    }

    pub fn is_inverted(&self) -> bool {
        self.invert.unwrap_or(false)
    }
}

fn validate_header_match(header: &HeaderMatch) -> std::result::Result<(), ValidationError> {
    match header.match_type {
        HeaderMatchType::Distinct => Ok(()),
        HeaderMatchType::Exact => match header.value {
            Some(_) => Ok(()),
            None => Err(ValidationError::new("header_match_value_required")
                .with_message("Exact header match requires a value".into())),
        },
        HeaderMatchType::RegularExpression => {
            let pattern = header.value.as_deref().ok_or_else(|| {
                ValidationError::new("header_match_value_required")
                    .with_message("RegularExpression header match requires a value".into())
            })?;
            regex::Regex::new(pattern).map(|_| ()).map_err(|_| {
                ValidationError::new("invalid_header_regex")
                    .with_message(format!("Invalid header regex '{}'", pattern).into())
            })
        }
    }
}

/// A limit over a time window, e.g. 100 per `1m`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuotaValue {
    #[serde(default)]
    pub limit: u32,

    #[validate(custom(function = "validate_window"))]
    #[serde(default)]
    pub duration: String,
}

impl QuotaValue {
    pub fn new(limit: u32, duration: impl Into<String>) -> Self {
        Self { limit, duration: duration.into() }
    }
}

fn validate_window(duration: &str) -> std::result::Result<(), ValidationError> {
    if duration.is_empty() {
        return Ok(());
    }
    crate::rls::parse_window(duration).map(|_| ()).map_err(|_| {
        ValidationError::new("invalid_duration")
            .with_message(format!("Invalid quota duration '{}'", duration).into())
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceQuota {
    #[validate(nested)]
    pub quota: QuotaValue,
}

impl QuotaPolicy {
    /// Admission check. Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;

        if self.spec.target_refs.is_empty() {
            return Err(Error::validation_field(
                format!("QuotaPolicy '{}' has no targetRefs", self.metadata.key()),
                "spec.targetRefs",
            ));
        }

        Ok(())
    }

    /// Stable identity used to deduplicate policies reached through several backends.
    pub fn identity(&self) -> String {
        match &self.metadata.uid {
            Some(uid) if !uid.is_empty() => uid.clone(),
            _ => self.metadata.key(),
        }
    }
}
