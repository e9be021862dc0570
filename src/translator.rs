//! # Quota Translator
//!
//! Entry points the control plane calls once per configuration pass. Each
//! pass lists the QuotaPolicies, works out which clusters and routes they
//! reach and returns patched copies of the inputs:
//!
//! - backend clusters get the upstream request processor and endpoint
//!   metadata; policy-bearing ones also get the quota rate limit filter
//! - policy-bearing routes get their compiled descriptors as per-route config
//! - the rate-limit service cluster is added while any policy exists
//! - the original-destination cluster and fallback routes are always added
//!
//! Malformed resources fail only themselves and are listed in the
//! [`PassReport`]; a store failure aborts the pass.

use std::sync::Arc;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, Route, RouteConfiguration, VirtualHost,
};
use tracing::{debug, info, warn, Instrument};

use crate::api::{AiGatewayRoute, QuotaPolicy};
use crate::config::Settings;
use crate::errors::{Error, Result};
use crate::rls::{build_rate_limit_config, RateLimitServiceConfig};
use crate::store::ResourceStore;
use crate::translate_span;
use crate::xds::cluster::{ensure_rate_limit_cluster, inject_cluster_filter, prepare_backend_cluster};
use crate::xds::descriptors;
use crate::xds::filters::http::{
    ExtProcFilter, QuotaRateLimitFilter, RateLimitPerRouteConfig, QUOTA_RATE_LIMIT_FILTER_NAME,
};
use crate::xds::listener::patch_listener;
use crate::xds::original_dst::{patch_clusters, patch_virtual_host};
use crate::xds::{PolicyIndex, PolicyResolver};

/// Outcome of one `post_translate_modify` pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslateOutput {
    pub clusters: Vec<Cluster>,
    pub route_configs: Vec<RouteConfiguration>,
    pub report: PassReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Resources left unpatched this pass because their payload was malformed
    pub errors: Vec<PassError>,
    pub patched_clusters: usize,
    pub patched_routes: usize,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Cluster,
    Route,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassError {
    pub kind: ResourceKind,
    pub name: String,
    pub message: String,
}

impl PassError {
    fn new(kind: ResourceKind, name: impl Into<String>, error: &Error) -> Self {
        Self { kind, name: name.into(), message: error.to_string() }
    }
}

pub struct QuotaTranslator<S: ResourceStore> {
    store: S,
    settings: Settings,
    rate_limit_filter: QuotaRateLimitFilter,
    ext_proc: Option<ExtProcFilter>,
}

impl<S: ResourceStore> QuotaTranslator<S> {
    /// Build a translator. Settings and the filter configs derived from them
    /// are validated up front so passes never fail on configuration.
    pub fn new(store: S, settings: Settings) -> Result<Self> {
        settings.validate()?;

        let rate_limit_filter = QuotaRateLimitFilter::new(&settings.rate_limit.domain, settings.rate_limit.timeout());
        rate_limit_filter.validate()?;

        let ext_proc = settings
            .ext_proc
            .cluster_name
            .as_ref()
            .map(|cluster| {
                ExtProcFilter::new(
                    cluster,
                    std::time::Duration::from_secs(settings.ext_proc.timeout_secs),
                    descriptors::METADATA_NAMESPACE,
                )
            });
        if let Some(filter) = &ext_proc {
            filter.validate()?;
        }

        Ok(Self { store, settings, rate_limit_filter, ext_proc })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Patch the full cluster and route configuration set of one pass.
    ///
    /// Inputs are never modified; the output holds fresh copies.
    pub async fn post_translate_modify(
        &self,
        clusters: &[Cluster],
        route_configs: &[RouteConfiguration],
    ) -> Result<TranslateOutput> {
        let span = translate_span!(
            "post_translate_modify",
            clusters = clusters.len(),
            route_configs = route_configs.len()
        );

        async move {
            let index = PolicyIndex::build(self.store.list_quota_policies().await?);
            let mut resolver = PolicyResolver::new(&self.store, index);
            let mut report = PassReport::default();

            let clusters = self.patch_clusters(clusters, &mut resolver, &mut report).await?;
            let route_configs = self.patch_route_configs(route_configs, &mut resolver, &mut report).await?;

            if report.is_clean() {
                info!(
                    backends = resolver.index().len(),
                    patched_clusters = report.patched_clusters,
                    patched_routes = report.patched_routes,
                    "Quota translation pass complete"
                );
            } else {
                warn!(
                    backends = resolver.index().len(),
                    patched_clusters = report.patched_clusters,
                    patched_routes = report.patched_routes,
                    errors = report.errors.len(),
                    "Quota translation pass complete with errors"
                );
            }

            Ok::<_, Error>(TranslateOutput { clusters, route_configs, report })
        }
        .instrument(span)
        .await
    }

    /// Patch one listener. `Ok(None)` means keep the original.
    pub fn post_listener_modify(&self, listener: &Listener) -> Result<Option<Listener>> {
        let span = translate_span!("post_listener_modify", listener = %listener.name);
        let _enter = span.enter();

        patch_listener(listener, self.ext_proc.as_ref()).inspect_err(|e| {
            warn!(listener = %listener.name, error = %e, "Failed to patch listener");
        })
    }

    /// Rate-limit service configuration matching the descriptors the passes
    /// attach, for the current policy snapshot.
    pub async fn rate_limit_service_config(&self) -> Result<RateLimitServiceConfig> {
        let index = PolicyIndex::build(self.store.list_quota_policies().await?);
        build_rate_limit_config(&self.settings.rate_limit.domain, &index)
    }

    async fn patch_clusters(
        &self,
        clusters: &[Cluster],
        resolver: &mut PolicyResolver<'_, S>,
        report: &mut PassReport,
    ) -> Result<Vec<Cluster>> {
        let mut patched = Vec::with_capacity(clusters.len() + 2);

        for cluster in clusters {
            let Some((route, rule_index)) = resolver.resolve_rule(&cluster.name).await? else {
                patched.push(cluster.clone());
                continue;
            };
            let has_policy = !resolver.index().is_empty() && resolver.cluster_has_policy(&cluster.name).await?;

            match self.patch_backend_cluster(cluster, &route, rule_index, has_policy) {
                Ok(Some(updated)) => {
                    debug!(cluster = %cluster.name, has_policy, "Patched backend cluster");
                    report.patched_clusters += 1;
                    patched.push(updated);
                }
                Ok(None) => patched.push(cluster.clone()),
                Err(e) => {
                    warn!(cluster = %cluster.name, error = %e, "Failed to patch backend cluster");
                    report.errors.push(PassError::new(ResourceKind::Cluster, &cluster.name, &e));
                    patched.push(cluster.clone());
                }
            }
        }

        if !resolver.index().is_empty() {
            if let Some(with_service) = ensure_rate_limit_cluster(&patched, &self.settings.rate_limit)? {
                patched = with_service;
            }
        }

        Ok(patch_clusters(&patched).unwrap_or(patched))
    }

    /// Upstream processor and endpoint metadata first, then the quota filter
    /// when the cluster's backends carry a policy.
    fn patch_backend_cluster(
        &self,
        cluster: &Cluster,
        route: &AiGatewayRoute,
        rule_index: usize,
        has_policy: bool,
    ) -> Result<Option<Cluster>> {
        let prepared = prepare_backend_cluster(cluster, route, rule_index)?;
        if !has_policy {
            return Ok(prepared);
        }

        let base = prepared.as_ref().unwrap_or(cluster);
        Ok(inject_cluster_filter(base, &self.rate_limit_filter)?.or(prepared))
    }

    async fn patch_route_configs(
        &self,
        route_configs: &[RouteConfiguration],
        resolver: &mut PolicyResolver<'_, S>,
        report: &mut PassReport,
    ) -> Result<Vec<RouteConfiguration>> {
        let mut patched = Vec::with_capacity(route_configs.len());

        for route_config in route_configs {
            let mut updated = route_config.clone();
            for vhost in updated.virtual_hosts.iter_mut() {
                // The fallback copies the gateway's per-filter config, never ours.
                if let Some(with_fallback) = patch_virtual_host(vhost) {
                    *vhost = with_fallback;
                }
                if !resolver.index().is_empty() {
                    self.attach_rate_limits(vhost, resolver, report).await?;
                }
            }
            patched.push(updated);
        }

        Ok(patched)
    }

    async fn attach_rate_limits(
        &self,
        vhost: &mut VirtualHost,
        resolver: &mut PolicyResolver<'_, S>,
        report: &mut PassReport,
    ) -> Result<()> {
        for route in vhost.routes.iter_mut() {
            let targets = route_clusters(route);
            if targets.is_empty() {
                continue;
            }

            let policies = resolver.policies_for_clusters(targets.iter().map(String::as_str)).await?;
            if policies.is_empty() {
                continue;
            }

            match self.per_route_config(&policies) {
                Ok(config) => {
                    let previous = route.typed_per_filter_config.insert(QUOTA_RATE_LIMIT_FILTER_NAME.to_string(), config.clone());
                    if previous.as_ref() != Some(&config) {
                        debug!(route = %route.name, policies = policies.len(), "Attached quota descriptors");
                        report.patched_routes += 1;
                    }
                }
                Err(e) => {
                    warn!(route = %route.name, error = %e, "Failed to attach quota descriptors");
                    report.errors.push(PassError::new(ResourceKind::Route, &route.name, &e));
                }
            }
        }

        Ok(())
    }

    fn per_route_config(&self, policies: &[Arc<QuotaPolicy>]) -> Result<envoy_types::pb::google::protobuf::Any> {
        RateLimitPerRouteConfig {
            domain: self.settings.rate_limit.domain.clone(),
            rate_limits: descriptors::compile(policies.iter().map(Arc::as_ref)),
        }
        .to_any()
    }
}

/// Clusters a route forwards to: its single cluster or every weighted one.
fn route_clusters(route: &Route) -> Vec<String> {
    let Some(Action::Route(action)) = &route.action else {
        return Vec::new();
    };

    match &action.cluster_specifier {
        Some(ClusterSpecifier::Cluster(name)) => vec![name.clone()],
        Some(ClusterSpecifier::WeightedClusters(weighted)) => {
            weighted.clusters.iter().map(|c| c.name.clone()).collect()
        }
        _ => Vec::new(),
    }
}
