//! Rate limit descriptor compilation.
//!
//! Turns the QuotaPolicies that apply to a route into the ordered list of
//! route-level `RateLimit` entries sent with the quota filter's per-route
//! config. Every entry starts with two metadata actions that read the backend
//! and model identity written by the request-inspection filter:
//!
//! ```text
//! [backend_name] [model_name_override]                       base
//! [backend_name] [model_name_override] [rule-gpt-4-0-match-0]  bucket rule 0
//! [backend_name] [model_name_override] [rule-gpt-4-1-match--1] default bucket
//! ```
//!
//! Descriptor keys are pure functions of the model name and rule/header
//! position, so the same policy state always compiles to the same bytes. The
//! rate-limit service configuration in [`crate::rls`] uses the same keys.

use std::collections::HashSet;

use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier,
    rate_limit::{
        action::{
            meta_data::Source as MetadataSource, ActionSpecifier, GenericKey, HeaderValueMatch, MetaData,
            RequestHeaders,
        },
        Action,
    },
    HeaderMatcher, RateLimit,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, RegexMatcher, StringMatcher};
use envoy_types::pb::envoy::r#type::metadata::v3::{
    metadata_key::{path_segment::Segment, PathSegment},
    MetadataKey,
};
use envoy_types::pb::google::protobuf::BoolValue;
use tracing::debug;

use crate::api::{BucketRule, HeaderMatch, HeaderMatchType, QuotaPolicy};

/// Dynamic metadata namespace written by the request-inspection filter.
pub const METADATA_NAMESPACE: &str = "io.envoy.ai_gateway";
pub const BACKEND_NAME_KEY: &str = "backend_name";
pub const MODEL_NAME_KEY: &str = "model_name_override";

/// Descriptor key for header `match_index` of bucket rule `rule_index`.
pub fn bucket_rule_key(model: &str, rule_index: usize, match_index: usize) -> String {
    format!("rule-{model}-{rule_index}-match-{match_index}")
}

/// Descriptor key for a model's default bucket. Uses a match index of -1 so
/// it can never collide with a bucket rule key.
pub fn default_bucket_key(model: &str, rule_count: usize) -> String {
    format!("rule-{model}-{rule_count}-match--1")
}

/// Compile the descriptor entries for a set of policies.
///
/// The base entry is always first. Policies are visited once each (by
/// identity) in the given order; identical entries are emitted once.
pub fn compile<'a, I>(policies: I) -> Vec<RateLimit>
where
    I: IntoIterator<Item = &'a QuotaPolicy>,
{
    let mut entries = vec![entry(Vec::new())];
    let mut seen_policies = HashSet::new();

    for policy in policies {
        if !seen_policies.insert(policy.identity()) {
            continue;
        }

        for compiled in compile_policy(policy) {
            if !entries.contains(&compiled) {
                entries.push(compiled);
            }
        }
    }

    entries
}

/// Entries contributed by one policy, excluding the shared base entry.
fn compile_policy(policy: &QuotaPolicy) -> Vec<RateLimit> {
    let mut entries = Vec::new();

    for per_model in &policy.spec.per_model_quotas {
        let (Some(model), Some(quota)) = (per_model.model_name.as_deref(), per_model.quota.as_ref()) else {
            debug!(policy = %policy.metadata.key(), "Skipping per-model quota without model name or quota");
            continue;
        };

        if quota.bucket_rules.is_empty() {
            continue;
        }

        for (rule_index, rule) in quota.bucket_rules.iter().enumerate() {
            entries.push(entry(bucket_rule_actions(model, rule_index, rule)));
        }

        if quota.default_bucket.limit > 0 {
            let key = default_bucket_key(model, quota.bucket_rules.len());
            entries.push(entry(vec![generic_key(&key)]));
        }
    }

    entries
}

fn bucket_rule_actions(model: &str, rule_index: usize, rule: &BucketRule) -> Vec<Action> {
    let actions: Vec<Action> = rule
        .headers()
        .enumerate()
        .map(|(match_index, header)| header_action(&bucket_rule_key(model, rule_index, match_index), header))
        .collect();

    if actions.is_empty() {
        vec![generic_key(&bucket_rule_key(model, rule_index, 0))]
    } else {
        actions
    }
}

fn header_action(key: &str, header: &HeaderMatch) -> Action {
    match header.match_type {
        HeaderMatchType::Distinct => action(ActionSpecifier::RequestHeaders(RequestHeaders {
            header_name: header.name.clone(),
            descriptor_key: key.to_string(),
            skip_if_absent: false,
        })),
        HeaderMatchType::Exact | HeaderMatchType::RegularExpression => {
            // A missing value matches only an empty header.
            let value = header.value.clone().unwrap_or_default();
            let pattern = match header.match_type {
                HeaderMatchType::RegularExpression if header.value.is_some() => {
                    MatchPattern::SafeRegex(RegexMatcher { regex: value, ..Default::default() })
                }
                _ => MatchPattern::Exact(value),
            };

            action(ActionSpecifier::HeaderValueMatch(HeaderValueMatch {
                descriptor_key: key.to_string(),
                descriptor_value: key.to_string(),
                expect_match: Some(BoolValue { value: !header.is_inverted() }),
                headers: vec![HeaderMatcher {
                    name: header.name.clone(),
                    header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
                        match_pattern: Some(pattern),
                        ignore_case: false,
                    })),
                    invert_match: false,
                    treat_missing_header_as_empty: false,
                }],
                ..Default::default()
            }))
        }
    }
}

fn entry(extra: Vec<Action>) -> RateLimit {
    let mut actions = base_actions();
    actions.extend(extra);
    RateLimit { actions, ..Default::default() }
}

/// The two metadata actions every entry starts with.
pub fn base_actions() -> Vec<Action> {
    vec![metadata_action(BACKEND_NAME_KEY), metadata_action(MODEL_NAME_KEY)]
}

fn metadata_action(field: &str) -> Action {
    action(ActionSpecifier::Metadata(MetaData {
        descriptor_key: field.to_string(),
        metadata_key: Some(MetadataKey {
            key: METADATA_NAMESPACE.to_string(),
            path: vec![PathSegment { segment: Some(Segment::Key(field.to_string())) }],
        }),
        source: MetadataSource::Dynamic as i32,
        ..Default::default()
    }))
}

fn generic_key(key: &str) -> Action {
    action(ActionSpecifier::GenericKey(GenericKey {
        descriptor_value: key.to_string(),
        descriptor_key: key.to_string(),
        ..Default::default()
    }))
}

fn action(specifier: ActionSpecifier) -> Action {
    Action { action_specifier: Some(specifier) }
}
