//! Rate-limit service configuration for the quota domain.
//!
//! The proxy side sends descriptors built by [`crate::xds::descriptors`]; the
//! service needs the matching descriptor tree with the actual limits:
//!
//! ```text
//! backend_name = default/my-backend
//! └── model_name_override = gpt-4
//!     ├── rule-gpt-4-0-match-0 = rule-gpt-4-0-match-0    100/minute
//!     └── rule-gpt-4-1-match--1 = rule-gpt-4-1-match--1  10/minute
//! ```
//!
//! Keys come from the same functions the compiler uses, so both sides always
//! agree.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::{BucketRule, HeaderMatchType, QuotaDefinition, QuotaPolicy, QuotaValue};
use crate::errors::{Error, Result};
use crate::xds::descriptors::{bucket_rule_key, default_bucket_key, BACKEND_NAME_KEY, MODEL_NAME_KEY};
use crate::xds::PolicyIndex;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl RateLimitUnit {
    fn seconds(self) -> u64 {
        match self {
            Self::Second => 1,
            Self::Minute => SECS_PER_MINUTE,
            Self::Hour => SECS_PER_HOUR,
            Self::Day => SECS_PER_DAY,
        }
    }

    /// Largest unit that divides `window` exactly, with the number of units.
    pub fn for_window(window: Duration) -> (u64, Self) {
        let secs = window.as_secs();
        let unit = [Self::Day, Self::Hour, Self::Minute]
            .into_iter()
            .find(|u| secs % u.seconds() == 0)
            .unwrap_or(Self::Second);
        (secs / unit.seconds(), unit)
    }
}

/// Parse a quota window such as `10s`, `5m`, `1h30m` or `1d`.
///
/// Windows must be a positive whole number of seconds.
pub fn parse_window(raw: &str) -> Result<Duration> {
    let invalid = |reason: &str| Error::validation_field(format!("invalid duration '{raw}': {reason}"), "duration");

    let mut total: u64 = 0;
    let mut digits = String::new();

    for c in raw.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let unit = match c {
            'd' => SECS_PER_DAY,
            'h' => SECS_PER_HOUR,
            'm' => SECS_PER_MINUTE,
            's' => 1,
            _ => return Err(invalid("unknown unit")),
        };
        if digits.is_empty() {
            return Err(invalid("missing number before unit"));
        }
        let amount: u64 = digits.parse().map_err(|_| invalid("number out of range"))?;
        digits.clear();

        total = amount
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| invalid("number out of range"))?;
    }

    if !digits.is_empty() {
        return Err(invalid("missing unit"));
    }
    if total == 0 {
        return Err(invalid("must be positive"));
    }
    Ok(Duration::from_secs(total))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub unit: RateLimitUnit,
    pub requests_per_unit: u32,
}

impl RateLimitPolicy {
    /// `limit` requests per window, expressed in the largest exact unit.
    pub fn from_quota(quota: &QuotaValue) -> Result<Self> {
        let (units, unit) = RateLimitUnit::for_window(parse_window(&quota.duration)?);
        let requests_per_unit = u64::from(quota.limit)
            .checked_mul(units)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                Error::validation_field(
                    format!("limit {} per '{}' overflows requests_per_unit", quota.limit, quota.duration),
                    "limit",
                )
            })?;
        Ok(Self { unit, requests_per_unit })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDescriptor {
    pub key: String,
    /// Absent for per-value descriptors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitPolicy>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shadow_mode: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub descriptors: Vec<RateLimitDescriptor>,
}

impl RateLimitDescriptor {
    fn keyed(key: impl Into<String>, value: Option<String>) -> Self {
        Self { key: key.into(), value, rate_limit: None, shadow_mode: false, descriptors: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitServiceConfig {
    pub domain: String,
    #[serde(default)]
    pub descriptors: Vec<RateLimitDescriptor>,
}

impl RateLimitServiceConfig {
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::serialization("rate limit service config", e))
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Build the service configuration for every backend in the index.
///
/// Backends come out in key order; a backend whose policies contribute no
/// descriptors is left out. Policies are deduplicated per backend by
/// identity. Distinct policies giving the same model different limits are
/// kept side by side and logged, since their nested keys collide. An
/// unparseable window fails the whole build, naming the policy.
pub fn build_rate_limit_config(domain: &str, index: &PolicyIndex) -> Result<RateLimitServiceConfig> {
    let mut descriptors = Vec::new();

    for backend in index.backends() {
        let mut seen = HashSet::new();
        let mut model_descriptors = Vec::new();

        for policy in index.policies_for(backend) {
            if !seen.insert(policy.identity()) {
                continue;
            }
            for descriptor in policy_descriptors(policy)? {
                if model_descriptors.contains(&descriptor) {
                    continue;
                }
                if model_descriptors.iter().any(|d| d.key == descriptor.key && d.value == descriptor.value) {
                    warn!(
                        backend,
                        policy = %policy.metadata.key(),
                        key = %descriptor.key,
                        value = ?descriptor.value,
                        "Conflicting rate limit descriptors for the same model, the service honours only one"
                    );
                }
                model_descriptors.push(descriptor);
            }
        }

        if model_descriptors.is_empty() {
            debug!(backend, "No rate limit descriptors for backend");
            continue;
        }

        let mut backend_descriptor = RateLimitDescriptor::keyed(BACKEND_NAME_KEY, Some(backend.to_string()));
        backend_descriptor.descriptors = model_descriptors;
        descriptors.push(backend_descriptor);
    }

    Ok(RateLimitServiceConfig { domain: domain.to_string(), descriptors })
}

fn policy_descriptors(policy: &QuotaPolicy) -> Result<Vec<RateLimitDescriptor>> {
    let in_policy = |e: Error| Error::validation(format!("QuotaPolicy '{}': {e}", policy.metadata.key()));
    let mut descriptors = Vec::new();

    for per_model in &policy.spec.per_model_quotas {
        let (Some(model), Some(quota)) = (per_model.model_name.as_deref(), per_model.quota.as_ref()) else {
            continue;
        };
        descriptors.push(model_descriptor(model, quota).map_err(in_policy)?);
    }

    if let Some(service) = policy.spec.service_quota.as_ref().filter(|s| s.quota.limit > 0) {
        let mut catch_all = RateLimitDescriptor::keyed(MODEL_NAME_KEY, None);
        catch_all.rate_limit = Some(RateLimitPolicy::from_quota(&service.quota).map_err(in_policy)?);
        descriptors.push(catch_all);
    }

    Ok(descriptors)
}

fn model_descriptor(model: &str, quota: &QuotaDefinition) -> Result<RateLimitDescriptor> {
    let mut descriptor = RateLimitDescriptor::keyed(MODEL_NAME_KEY, Some(model.to_string()));

    if quota.bucket_rules.is_empty() {
        descriptor.rate_limit = Some(RateLimitPolicy::from_quota(&quota.default_bucket)?);
        return Ok(descriptor);
    }

    for (rule_index, rule) in quota.bucket_rules.iter().enumerate() {
        descriptor.descriptors.push(bucket_rule_descriptor(model, rule_index, rule)?);
    }

    if quota.default_bucket.limit > 0 {
        let key = default_bucket_key(model, quota.bucket_rules.len());
        let mut default = RateLimitDescriptor::keyed(&key, Some(key.clone()));
        default.rate_limit = Some(RateLimitPolicy::from_quota(&quota.default_bucket)?);
        descriptor.descriptors.push(default);
    }

    Ok(descriptor)
}

/// One nesting level per header, outermost first; the innermost level
/// carries the limit. A rule without headers is a single catch-all level.
fn bucket_rule_descriptor(model: &str, rule_index: usize, rule: &BucketRule) -> Result<RateLimitDescriptor> {
    let mut levels: Vec<RateLimitDescriptor> = rule
        .headers()
        .enumerate()
        .map(|(match_index, header)| {
            let key = bucket_rule_key(model, rule_index, match_index);
            let value = match header.match_type {
                HeaderMatchType::Distinct => None,
                HeaderMatchType::Exact | HeaderMatchType::RegularExpression => Some(key.clone()),
            };
            RateLimitDescriptor::keyed(key, value)
        })
        .collect();

    if levels.is_empty() {
        let key = bucket_rule_key(model, rule_index, 0);
        levels.push(RateLimitDescriptor::keyed(&key, Some(key.clone())));
    }

    let Some(mut current) = levels.pop() else {
        return Err(Error::internal("bucket rule produced no descriptor levels"));
    };
    current.rate_limit = Some(RateLimitPolicy::from_quota(&rule.quota)?);
    current.shadow_mode = rule.is_shadow();

    while let Some(mut outer) = levels.pop() {
        outer.descriptors.push(current);
        current = outer;
    }

    Ok(current)
}
