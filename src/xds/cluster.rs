//! Upstream (cluster-side) filter injection and the rate-limit service cluster.
//!
//! Gateway-generated clusters carry their upstream HTTP filter chain inside
//! the `HttpProtocolOptions` typed extension. Every backend cluster first gets
//! the upstream request processor, which writes the metadata the quota
//! descriptors read; policy-bearing clusters then get the quota filter. Both
//! go immediately before the last filter, which by convention is the upstream
//! codec, so the final chain reads `ext_proc, ratelimit, upstream_codec`.

use std::collections::HashMap;

use envoy_types::pb::envoy::config::cluster::v3::cluster::{ClusterDiscoveryType, DiscoveryType, DnsLookupFamily};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address, Address, Http1ProtocolOptions, Http2ProtocolOptions,
    Metadata, SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::extensions::filters::http::upstream_codec::v3::UpstreamCodec;
use envoy_types::pb::envoy::extensions::upstreams::http::v3::http_protocol_options::explicit_http_config::ProtocolConfig;
use envoy_types::pb::envoy::extensions::upstreams::http::v3::{
    http_protocol_options::{ExplicitHttpConfig, UpstreamProtocolOptions},
    HttpProtocolOptions as UpstreamHttpProtocolOptionsV3,
};
use envoy_types::pb::google::protobuf::{value::Kind, Any, Value};
use tracing::debug;

use crate::api::AiGatewayRoute;
use crate::config::RateLimitSettings;
use crate::errors::Result;
use crate::xds::descriptors::{BACKEND_NAME_KEY, METADATA_NAMESPACE};
use crate::xds::filter_chain::{insert_before_last, UPSTREAM_CODEC_FILTER_NAME};
use crate::xds::filters::http::rate_limit::proto_duration;
use crate::xds::filters::http::{
    ExtProcFilter, QuotaRateLimitFilter, AI_GATEWAY_EXT_PROC_FILTER_NAME, QUOTA_RATE_LIMIT_FILTER_NAME,
    RATE_LIMIT_CLUSTER_NAME,
};
use crate::xds::filters::{pack, typed_http_filter, unpack};

/// Key of the upstream HTTP protocol options in `typed_extension_protocol_options`.
pub const HTTP_PROTOCOL_OPTIONS_KEY: &str = "envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
pub const HTTP_PROTOCOL_OPTIONS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";

/// Endpoint filter metadata namespace read by the upstream processor.
pub const ENDPOINT_METADATA_NAMESPACE: &str = "aigateway.envoy.io";

const UPSTREAM_CODEC_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.upstream_codec.v3.UpstreamCodec";

/// Prepare a backend cluster generated for rule `rule_index` of `route`.
///
/// Tags every endpoint with the `backend_name` of the backend reference it
/// was generated from (`name.namespace`), then inserts the upstream request
/// processor before the chain's last filter. A cluster without protocol
/// options gets explicit HTTP/1 options; an empty chain gets the upstream
/// codec appended after the processor.
///
/// Returns `Ok(None)` when the cluster is already prepared, has no load
/// assignment, or its localities do not line up with the rule's backends.
pub fn prepare_backend_cluster(
    cluster: &Cluster,
    route: &AiGatewayRoute,
    rule_index: usize,
) -> Result<Option<Cluster>> {
    let Some(rule) = route.spec.rules.get(rule_index) else {
        return Ok(None);
    };
    let Some(load_assignment) = &cluster.load_assignment else {
        debug!(cluster = %cluster.name, "Cluster has no load assignment");
        return Ok(None);
    };
    if load_assignment.endpoints.len() != rule.backend_refs.len() {
        debug!(
            cluster = %cluster.name,
            localities = load_assignment.endpoints.len(),
            backend_refs = rule.backend_refs.len(),
            "Cluster localities do not match the rule's backends"
        );
        return Ok(None);
    }

    let mut updated = cluster.clone();
    let mut changed = false;
    if let Some(load_assignment) = updated.load_assignment.as_mut() {
        for (locality, backend) in load_assignment.endpoints.iter_mut().zip(&rule.backend_refs) {
            let backend_name = format!("{}.{}", backend.name, route.metadata.namespace);
            for endpoint in locality.lb_endpoints.iter_mut() {
                changed |= tag_backend(endpoint, &backend_name);
            }
        }
    }

    let mut options = match updated.typed_extension_protocol_options.get(HTTP_PROTOCOL_OPTIONS_KEY) {
        Some(raw) => unpack(raw, &format!("HttpProtocolOptions of cluster '{}'", cluster.name))?,
        None => http1_protocol_options(),
    };
    if options.http_filters.iter().any(|f| f.name == AI_GATEWAY_EXT_PROC_FILTER_NAME) {
        return Ok(changed.then_some(updated));
    }

    let processor = ExtProcFilter::upstream(&route.metadata.namespace, &route.metadata.name, METADATA_NAMESPACE);
    let processor = typed_http_filter(AI_GATEWAY_EXT_PROC_FILTER_NAME, processor.to_any()?);
    if options.http_filters.is_empty() {
        let codec = typed_http_filter(UPSTREAM_CODEC_FILTER_NAME, pack(UPSTREAM_CODEC_TYPE_URL, &UpstreamCodec {})?);
        options.http_filters = vec![processor, codec];
    } else if let Some(http_filters) = insert_before_last(&options.http_filters, processor) {
        options.http_filters = http_filters;
    }

    updated
        .typed_extension_protocol_options
        .insert(HTTP_PROTOCOL_OPTIONS_KEY.to_string(), pack(HTTP_PROTOCOL_OPTIONS_TYPE_URL, &options)?);
    Ok(Some(updated))
}

/// Set `backend_name` in the endpoint's filter metadata. True when it changed.
fn tag_backend(endpoint: &mut LbEndpoint, backend_name: &str) -> bool {
    let fields = &mut endpoint
        .metadata
        .get_or_insert_with(Metadata::default)
        .filter_metadata
        .entry(ENDPOINT_METADATA_NAMESPACE.to_string())
        .or_default()
        .fields;

    let value = Value { kind: Some(Kind::StringValue(backend_name.to_string())) };
    if fields.get(BACKEND_NAME_KEY) == Some(&value) {
        return false;
    }
    fields.insert(BACKEND_NAME_KEY.to_string(), value);
    true
}

fn http1_protocol_options() -> UpstreamHttpProtocolOptionsV3 {
    UpstreamHttpProtocolOptionsV3 {
        upstream_protocol_options: Some(UpstreamProtocolOptions::ExplicitHttpConfig(ExplicitHttpConfig {
            protocol_config: Some(ProtocolConfig::HttpProtocolOptions(Http1ProtocolOptions::default())),
        })),
        ..Default::default()
    }
}

/// Insert the quota rate limit filter into a cluster's upstream filter chain.
///
/// Returns `Ok(None)` when there is nothing to do: no upstream protocol
/// options, or the filter is already present. A protocol options payload
/// that does not decode is an error for this cluster only.
pub fn inject_cluster_filter(cluster: &Cluster, filter: &QuotaRateLimitFilter) -> Result<Option<Cluster>> {
    let Some(raw) = cluster.typed_extension_protocol_options.get(HTTP_PROTOCOL_OPTIONS_KEY) else {
        debug!(cluster = %cluster.name, "Cluster has no upstream HTTP protocol options");
        return Ok(None);
    };

    let mut options: UpstreamHttpProtocolOptionsV3 =
        unpack(raw, &format!("HttpProtocolOptions of cluster '{}'", cluster.name))?;

    if options.http_filters.iter().any(|f| f.name == QUOTA_RATE_LIMIT_FILTER_NAME) {
        return Ok(None);
    }

    let rate_limit_filter = typed_http_filter(QUOTA_RATE_LIMIT_FILTER_NAME, filter.to_any()?);
    let Some(http_filters) = insert_before_last(&options.http_filters, rate_limit_filter) else {
        return Ok(None);
    };
    options.http_filters = http_filters;

    let mut updated = cluster.clone();
    updated
        .typed_extension_protocol_options
        .insert(HTTP_PROTOCOL_OPTIONS_KEY.to_string(), pack(HTTP_PROTOCOL_OPTIONS_TYPE_URL, &options)?);
    Ok(Some(updated))
}

/// Build the STRICT_DNS, HTTP/2 cluster the quota filter calls.
pub fn rate_limit_service_cluster(settings: &RateLimitSettings) -> Result<Cluster> {
    Ok(Cluster {
        name: RATE_LIMIT_CLUSTER_NAME.to_string(),
        connect_timeout: Some(proto_duration(settings.connect_timeout())),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32)),
        dns_lookup_family: DnsLookupFamily::V4Only as i32,
        typed_extension_protocol_options: http2_protocol_options()?,
        load_assignment: Some(ClusterLoadAssignment {
            cluster_name: RATE_LIMIT_CLUSTER_NAME.to_string(),
            endpoints: vec![LocalityLbEndpoints {
                lb_endpoints: vec![LbEndpoint {
                    host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
                        address: Some(Address {
                            address: Some(AddressType::SocketAddress(SocketAddress {
                                address: settings.service_host.clone(),
                                port_specifier: Some(socket_address::PortSpecifier::PortValue(
                                    settings.service_port,
                                )),
                                ..Default::default()
                            })),
                        }),
                        ..Default::default()
                    })),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Copy of `clusters` with the rate-limit service cluster appended, or
/// `None` when a cluster with the reserved name already exists.
pub fn ensure_rate_limit_cluster(clusters: &[Cluster], settings: &RateLimitSettings) -> Result<Option<Vec<Cluster>>> {
    if clusters.iter().any(|c| c.name == RATE_LIMIT_CLUSTER_NAME) {
        return Ok(None);
    }

    let mut updated = clusters.to_vec();
    updated.push(rate_limit_service_cluster(settings)?);
    Ok(Some(updated))
}

fn http2_protocol_options() -> Result<HashMap<String, Any>> {
    let options = UpstreamHttpProtocolOptionsV3 {
        upstream_protocol_options: Some(UpstreamProtocolOptions::ExplicitHttpConfig(ExplicitHttpConfig {
            protocol_config: Some(ProtocolConfig::Http2ProtocolOptions(Http2ProtocolOptions::default())),
        })),
        ..Default::default()
    };

    Ok(HashMap::from([(
        HTTP_PROTOCOL_OPTIONS_KEY.to_string(),
        pack(HTTP_PROTOCOL_OPTIONS_TYPE_URL, &options)?,
    )]))
}
