//! Tests for `QuotaTranslator::post_listener_modify`.

mod common;

use envoy_types::pb::envoy::config::listener::v3::{filter::ConfigType, Filter, FilterChain, Listener};
use envoy_types::pb::envoy::config::route::v3::{RouteConfiguration, VirtualHost};
use envoy_types::pb::envoy::extensions::filters::http::ext_proc::v3::ExternalProcessor;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, http_filter, HttpConnectionManager, HttpFilter,
};
use quotaplane::store::InMemoryStore;
use quotaplane::xds::filter_chain::ROUTER_FILTER_NAME;
use quotaplane::xds::filters::http::AI_GATEWAY_EXT_PROC_FILTER_NAME;
use quotaplane::xds::filters::{pack, unpack};
use quotaplane::xds::helpers::{HCM_FILTER_NAME, HCM_TYPE_URL};
use quotaplane::xds::original_dst::ORIGINAL_DST_ROUTE_NAME;
use quotaplane::{QuotaTranslator, Result, Settings};

fn translator_with_ext_proc() -> QuotaTranslator<InMemoryStore> {
    let mut settings = Settings::default();
    settings.ext_proc.cluster_name = Some("envoy-ai-gateway-extproc".into());
    QuotaTranslator::new(InMemoryStore::new(), settings).expect("translator")
}

fn hcm(filters: &[&str]) -> HttpConnectionManager {
    HttpConnectionManager {
        stat_prefix: "http".into(),
        http_filters: filters.iter().map(|n| HttpFilter { name: n.to_string(), ..Default::default() }).collect(),
        route_specifier: Some(RouteSpecifier::RouteConfig(RouteConfiguration {
            name: "inline".into(),
            virtual_hosts: vec![VirtualHost {
                name: "inline/*".into(),
                routes: vec![common::route_to("httproute/default/chat/rule/0/match/0", common::POLICY_CLUSTER)],
                ..Default::default()
            }],
            ..Default::default()
        })),
        ..Default::default()
    }
}

fn hcm_chain(hcm: &HttpConnectionManager) -> FilterChain {
    FilterChain {
        filters: vec![Filter {
            name: HCM_FILTER_NAME.into(),
            config_type: Some(ConfigType::TypedConfig(pack(HCM_TYPE_URL, hcm).expect("pack"))),
        }],
        ..Default::default()
    }
}

fn decode(chain: &FilterChain) -> HttpConnectionManager {
    match &chain.filters[0].config_type {
        Some(ConfigType::TypedConfig(any)) => unpack(any, "test").expect("decode"),
        other => panic!("unexpected config type: {other:?}"),
    }
}

#[test]
fn patches_every_connection_manager() -> Result<()> {
    let listener = Listener {
        name: "default/gw/http".into(),
        filter_chains: vec![hcm_chain(&hcm(&["envoy.filters.http.local_ratelimit", ROUTER_FILTER_NAME]))],
        default_filter_chain: Some(hcm_chain(&hcm(&[ROUTER_FILTER_NAME]))),
        ..Default::default()
    };

    let patched = translator_with_ext_proc().post_listener_modify(&listener)?.expect("patched");

    let first = decode(&patched.filter_chains[0]);
    let names: Vec<_> = first.http_filters.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec![AI_GATEWAY_EXT_PROC_FILTER_NAME, "envoy.filters.http.local_ratelimit", ROUTER_FILTER_NAME]);

    let Some(http_filter::ConfigType::TypedConfig(any)) = &first.http_filters[0].config_type else {
        panic!("ext_proc filter must carry a typed config");
    };
    let ext_proc: ExternalProcessor = unpack(any, "test")?;
    assert!(ext_proc.grpc_service.is_some());

    let default_chain = decode(patched.default_filter_chain.as_ref().expect("default chain"));
    let names: Vec<_> = default_chain.http_filters.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec![AI_GATEWAY_EXT_PROC_FILTER_NAME, ROUTER_FILTER_NAME]);

    let Some(RouteSpecifier::RouteConfig(inline)) = default_chain.route_specifier else {
        panic!("inline route config expected");
    };
    assert_eq!(inline.virtual_hosts[0].routes.last().map(|r| r.name.as_str()), Some(ORIGINAL_DST_ROUTE_NAME));
    Ok(())
}

#[test]
fn patched_listener_is_left_alone() -> Result<()> {
    let translator = translator_with_ext_proc();
    let listener = Listener {
        name: "default/gw/http".into(),
        filter_chains: vec![hcm_chain(&hcm(&[ROUTER_FILTER_NAME]))],
        ..Default::default()
    };

    let patched = translator.post_listener_modify(&listener)?.expect("patched");
    assert!(translator.post_listener_modify(&patched)?.is_none());
    Ok(())
}

#[test]
fn rds_listener_without_ext_proc_is_unchanged() -> Result<()> {
    let translator = QuotaTranslator::new(InMemoryStore::new(), Settings::default())?;
    let mut rds = hcm(&[ROUTER_FILTER_NAME]);
    rds.route_specifier = None;
    let listener =
        Listener { name: "default/gw/http".into(), filter_chains: vec![hcm_chain(&rds)], ..Default::default() };

    assert!(translator.post_listener_modify(&listener)?.is_none());
    Ok(())
}
