//! Original-destination fallback.
//!
//! Requests carrying the sentinel header are sent straight to the `ip:port`
//! in that header through an ORIGINAL_DST cluster, bypassing endpoint
//! selection. Both the cluster and the route are added at most once,
//! identified by their reserved names.

use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    self, ClusterDiscoveryType, DiscoveryType, DnsLookupFamily, LbPolicy,
};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, route::Action, route_action::ClusterSpecifier,
    route_match::PathSpecifier, HeaderMatcher, Route, RouteAction, RouteMatch, VirtualHost,
};
use envoy_types::pb::google::protobuf::Duration;

pub const ORIGINAL_DST_CLUSTER_NAME: &str = "original_destination_cluster";
pub const ORIGINAL_DST_ROUTE_NAME: &str = "original_destination_route";

/// Request header holding the `ip:port` to route to.
pub const ORIGINAL_DST_HEADER: &str = "x-ai-eg-original-dst";

const ORIGINAL_DST_CONNECT_TIMEOUT_SECS: i64 = 60;

/// Copy of `clusters` with the original-destination cluster appended, or
/// `None` when it is already there.
pub fn patch_clusters(clusters: &[Cluster]) -> Option<Vec<Cluster>> {
    if clusters.iter().any(|c| c.name == ORIGINAL_DST_CLUSTER_NAME) {
        return None;
    }

    let mut updated = clusters.to_vec();
    updated.push(original_destination_cluster());
    Some(updated)
}

pub fn original_destination_cluster() -> Cluster {
    Cluster {
        name: ORIGINAL_DST_CLUSTER_NAME.to_string(),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::OriginalDst as i32)),
        lb_policy: LbPolicy::ClusterProvided as i32,
        dns_lookup_family: DnsLookupFamily::V4Only as i32,
        lb_config: Some(cluster::LbConfig::OriginalDstLbConfig(cluster::OriginalDstLbConfig {
            use_http_header: true,
            http_header_name: ORIGINAL_DST_HEADER.to_string(),
            ..Default::default()
        })),
        connect_timeout: Some(Duration { seconds: ORIGINAL_DST_CONNECT_TIMEOUT_SECS, nanos: 0 }),
        ..Default::default()
    }
}

/// Copy of `vhost` with the header-gated fallback route appended.
///
/// Returns `None` when the route already exists or the virtual host has no
/// routes to copy per-filter configuration from.
pub fn patch_virtual_host(vhost: &VirtualHost) -> Option<VirtualHost> {
    let first = vhost.routes.first()?;

    if vhost.routes.iter().any(|r| r.name == ORIGINAL_DST_ROUTE_NAME) {
        return None;
    }

    #[allow(deprecated)]
    let fallback = Route {
        name: ORIGINAL_DST_ROUTE_NAME.to_string(),
        r#match: Some(RouteMatch {
            path_specifier: Some(PathSpecifier::Prefix("/".to_string())),
            headers: vec![HeaderMatcher {
                name: ORIGINAL_DST_HEADER.to_string(),
                header_match_specifier: Some(HeaderMatchSpecifier::PresentMatch(true)),
                ..Default::default()
            }],
            ..Default::default()
        }),
        action: Some(Action::Route(RouteAction {
            cluster_specifier: Some(ClusterSpecifier::Cluster(ORIGINAL_DST_CLUSTER_NAME.to_string())),
            ..Default::default()
        })),
        // Keeps mandatory request-inspection filters active on the fallback path.
        typed_per_filter_config: first.typed_per_filter_config.clone(),
        ..Default::default()
    };

    let mut updated = vhost.clone();
    updated.routes.push(fallback);
    Some(updated)
}
