//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::endpoint::v3::{ClusterLoadAssignment, LbEndpoint, LocalityLbEndpoints};
use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, Route, RouteAction, RouteConfiguration, VirtualHost,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpFilter;
use envoy_types::pb::envoy::extensions::upstreams::http::v3::HttpProtocolOptions;
use envoy_types::pb::google::protobuf::{value::Kind, Any};
use quotaplane::store::InMemoryStore;
use quotaplane::xds::cluster::{ENDPOINT_METADATA_NAMESPACE, HTTP_PROTOCOL_OPTIONS_KEY, HTTP_PROTOCOL_OPTIONS_TYPE_URL};
use quotaplane::xds::descriptors::BACKEND_NAME_KEY;
use quotaplane::xds::filter_chain::UPSTREAM_CODEC_FILTER_NAME;
use quotaplane::xds::filters::{pack, unpack};
use quotaplane::{QuotaTranslator, Settings};

pub const POLICY_CLUSTER: &str = "httproute/default/chat/rule/0";
pub const FREE_CLUSTER: &str = "httproute/default/chat/rule/1";
pub const FOREIGN_CLUSTER: &str = "envoy-gateway/default/static";

/// Route `default/chat` with a policy-bearing rule 0 (`my-backend`) and a
/// free rule 1 (`free-backend`).
pub const MANIFESTS: &str = r#"
kind: AIGatewayRoute
metadata:
  namespace: default
  name: chat
spec:
  rules:
    - backendRefs:
        - name: my-backend
    - backendRefs:
        - name: free-backend
---
kind: QuotaPolicy
metadata:
  namespace: default
  name: premium
  uid: 6f1c2a
spec:
  targetRefs:
    - group: aigateway.envoyproxy.io
      kind: AIServiceBackend
      name: my-backend
  perModelQuotas:
    - modelName: gpt-4
      quota:
        defaultBucket:
          limit: 10
          duration: 1m
        bucketRules:
          - clientSelectors:
              - headers:
                  - name: x-api-key
                    type: Exact
                    value: premium
            quota:
              limit: 100
              duration: 1m
"#;

pub fn translator() -> QuotaTranslator<InMemoryStore> {
    let store = InMemoryStore::from_yaml(MANIFESTS).expect("manifests load");
    QuotaTranslator::new(store, Settings::default()).expect("translator")
}

pub fn gateway_cluster(name: &str) -> Cluster {
    let options = HttpProtocolOptions {
        http_filters: vec![
            HttpFilter { name: "envoy.filters.http.ext_proc/aigateway-upstream".into(), ..Default::default() },
            HttpFilter { name: UPSTREAM_CODEC_FILTER_NAME.into(), ..Default::default() },
        ],
        ..Default::default()
    };
    Cluster {
        name: name.to_string(),
        typed_extension_protocol_options: HashMap::from([(
            HTTP_PROTOCOL_OPTIONS_KEY.to_string(),
            pack(HTTP_PROTOCOL_OPTIONS_TYPE_URL, &options).expect("pack"),
        )]),
        ..Default::default()
    }
}

/// Cluster as generated for a one-backend rule: a single locality and no
/// upstream protocol options yet.
pub fn backend_cluster(name: &str) -> Cluster {
    Cluster {
        name: name.to_string(),
        load_assignment: Some(ClusterLoadAssignment {
            cluster_name: name.to_string(),
            endpoints: vec![LocalityLbEndpoints { lb_endpoints: vec![LbEndpoint::default()], ..Default::default() }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn endpoint_backend_names(cluster: &Cluster) -> Vec<String> {
    let Some(load_assignment) = &cluster.load_assignment else {
        return Vec::new();
    };
    load_assignment
        .endpoints
        .iter()
        .flat_map(|locality| &locality.lb_endpoints)
        .filter_map(|endpoint| endpoint.metadata.as_ref()?.filter_metadata.get(ENDPOINT_METADATA_NAMESPACE))
        .filter_map(|fields| match fields.fields.get(BACKEND_NAME_KEY)?.kind.as_ref()? {
            Kind::StringValue(name) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

pub fn malformed_cluster(name: &str) -> Cluster {
    Cluster {
        name: name.to_string(),
        typed_extension_protocol_options: HashMap::from([(
            HTTP_PROTOCOL_OPTIONS_KEY.to_string(),
            Any { type_url: HTTP_PROTOCOL_OPTIONS_TYPE_URL.to_string(), value: vec![0xff, 0xff, 0xff] },
        )]),
        ..Default::default()
    }
}

pub fn upstream_filter_names(cluster: &Cluster) -> Vec<String> {
    let options: HttpProtocolOptions =
        unpack(&cluster.typed_extension_protocol_options[HTTP_PROTOCOL_OPTIONS_KEY], "test").expect("decode");
    options.http_filters.into_iter().map(|f| f.name).collect()
}

pub fn route_to(name: &str, cluster: &str) -> Route {
    Route {
        name: name.to_string(),
        action: Some(Action::Route(RouteAction {
            cluster_specifier: Some(ClusterSpecifier::Cluster(cluster.to_string())),
            ..Default::default()
        })),
        ..Default::default()
    }
}

pub fn route_config() -> RouteConfiguration {
    RouteConfiguration {
        name: "default/gw/http".into(),
        virtual_hosts: vec![VirtualHost {
            name: "default/gw/http/*".into(),
            domains: vec!["*".into()],
            routes: vec![
                route_to("httproute/default/chat/rule/0/match/0", POLICY_CLUSTER),
                route_to("httproute/default/chat/rule/1/match/0", FREE_CLUSTER),
                route_to("static", FOREIGN_CLUSTER),
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}
