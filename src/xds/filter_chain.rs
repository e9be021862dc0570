//! Ordering-aware HTTP filter list editing.
//!
//! Envoy runs HTTP filters in list order, and the gateway controller already
//! placed its own filters before we get the list. Placement is decided by a
//! single table mapping filter name prefixes to a stage:
//!
//! * `Late`: processing filters our filters must run ahead of
//! * `Terminal`: the router / upstream codec that ends every chain
//!
//! Filters the table does not know keep their place and are never jumped.
//!
//! Names match a table entry when equal to it or when they extend it with a
//! `.` or `/` suffix (`envoy.filters.http.ext_proc/aigateway`).

use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStage {
    Late,
    Terminal,
}

pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
pub const UPSTREAM_CODEC_FILTER_NAME: &str = "envoy.filters.http.upstream_codec";

/// Known filter name prefixes and their stage.
pub const FILTER_STAGES: &[(&str, FilterStage)] = &[
    ("envoy.filters.http.ext_proc", FilterStage::Late),
    ("envoy.filters.http.wasm", FilterStage::Late),
    ("envoy.filters.http.rbac", FilterStage::Late),
    ("envoy.filters.http.local_ratelimit", FilterStage::Late),
    ("envoy.filters.http.ratelimit", FilterStage::Late),
    ("envoy.filters.http.custom_response", FilterStage::Late),
    ("envoy.filters.http.credential_injector", FilterStage::Late),
    ("envoy.filters.http.compressor", FilterStage::Late),
    (ROUTER_FILTER_NAME, FilterStage::Terminal),
    (UPSTREAM_CODEC_FILTER_NAME, FilterStage::Terminal),
];

impl FilterStage {
    /// Stage of a filter name, `None` for filters the table does not know.
    pub fn of(name: &str) -> Option<Self> {
        FILTER_STAGES
            .iter()
            .find(|(prefix, _)| matches_prefix(name, prefix))
            .map(|(_, stage)| *stage)
    }
}

/// Prefixes in the `Late` stage, in table order.
pub fn late_filter_prefixes() -> Vec<&'static str> {
    FILTER_STAGES
        .iter()
        .filter(|(_, stage)| *stage == FilterStage::Late)
        .map(|(prefix, _)| *prefix)
        .collect()
}

fn matches_prefix(name: &str, prefix: &str) -> bool {
    match name.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.') || rest.starts_with('/'),
        None => false,
    }
}

/// Insert `filter` into a copy of `filters`.
///
/// The filter goes immediately before the earliest filter matching one of
/// `late` prefixes; with no such filter, immediately before the last
/// `Terminal` filter, or the final filter when the chain ends in a terminal
/// the table does not know; into an empty list, as its only element.
/// Returns `None` when a filter with the same name already exists anywhere
/// in the list.
pub fn insert_filter(filters: &[HttpFilter], filter: HttpFilter, late: &[&str]) -> Option<Vec<HttpFilter>> {
    if filters.iter().any(|f| f.name == filter.name) {
        return None;
    }

    let position = filters
        .iter()
        .position(|f| late.iter().any(|prefix| matches_prefix(&f.name, prefix)))
        .or_else(|| filters.iter().rposition(|f| FilterStage::of(&f.name) == Some(FilterStage::Terminal)))
        .unwrap_or_else(|| filters.len().saturating_sub(1));

    Some(insert_at(filters, filter, position))
}

/// Insert `filter` immediately before the last filter of the chain,
/// whatever that filter is.
pub fn insert_before_last(filters: &[HttpFilter], filter: HttpFilter) -> Option<Vec<HttpFilter>> {
    if filters.iter().any(|f| f.name == filter.name) {
        return None;
    }
    Some(insert_at(filters, filter, filters.len().saturating_sub(1)))
}

fn insert_at(filters: &[HttpFilter], filter: HttpFilter, position: usize) -> Vec<HttpFilter> {
    let mut updated = Vec::with_capacity(filters.len() + 1);
    updated.extend_from_slice(&filters[..position]);
    updated.push(filter);
    updated.extend_from_slice(&filters[position..]);
    updated
}
