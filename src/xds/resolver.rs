//! Policy resolution: which QuotaPolicies apply to a given cluster or route.
//!
//! Policies are indexed by backend key (`namespace/backend`). A cluster name
//! is decoded with [`RouteRuleKey`], the originating AIGatewayRoute is fetched
//! and the rule's backend references are looked up in the index. Every miss
//! along the way (foreign name, unknown route, rule index out of range)
//! resolves to "no policy".

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::naming::RouteRuleKey;
use crate::api::{backend_key, AiGatewayRoute, QuotaPolicy};
use crate::errors::Result;
use crate::store::ResourceStore;

/// Policies grouped by the backend they target. Policies from different
/// objects accumulate side by side and are never merged.
#[derive(Debug, Clone, Default)]
pub struct PolicyIndex {
    by_backend: BTreeMap<String, Vec<Arc<QuotaPolicy>>>,
}

impl PolicyIndex {
    pub fn build(policies: impl IntoIterator<Item = QuotaPolicy>) -> Self {
        let mut by_backend: BTreeMap<String, Vec<Arc<QuotaPolicy>>> = BTreeMap::new();

        for policy in policies.into_iter().map(Arc::new) {
            for target in &policy.spec.target_refs {
                by_backend
                    .entry(backend_key(&policy.metadata.namespace, &target.name))
                    .or_default()
                    .push(Arc::clone(&policy));
            }
        }

        Self { by_backend }
    }

    pub fn is_empty(&self) -> bool {
        self.by_backend.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_backend.len()
    }

    pub fn policies_for(&self, backend: &str) -> &[Arc<QuotaPolicy>] {
        self.by_backend.get(backend).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, backend: &str) -> bool {
        self.by_backend.contains_key(backend)
    }

    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.by_backend.keys().map(String::as_str)
    }
}

/// Per-pass resolver. Route lookups are memoised for the lifetime of the
/// value only; nothing is carried between passes.
pub struct PolicyResolver<'a, S: ResourceStore + ?Sized> {
    store: &'a S,
    index: PolicyIndex,
    routes: HashMap<(String, String), Option<Arc<AiGatewayRoute>>>,
}

impl<'a, S: ResourceStore + ?Sized> PolicyResolver<'a, S> {
    pub fn new(store: &'a S, index: PolicyIndex) -> Self {
        Self { store, index, routes: HashMap::new() }
    }

    pub fn index(&self) -> &PolicyIndex {
        &self.index
    }

    /// Backend keys referenced by the rule a cluster was generated for.
    ///
    /// Only store failures other than not-found are errors.
    pub async fn resolve_cluster(&mut self, cluster_name: &str) -> Result<Vec<String>> {
        Ok(self
            .resolve_rule(cluster_name)
            .await?
            .and_then(|(route, rule_index)| route.rule_backend_keys(rule_index))
            .unwrap_or_default())
    }

    /// The AIGatewayRoute and in-range rule index a cluster was generated
    /// for, or `None` for foreign names, unknown routes and stale indexes.
    pub async fn resolve_rule(&mut self, cluster_name: &str) -> Result<Option<(Arc<AiGatewayRoute>, usize)>> {
        let Some(key) = RouteRuleKey::decode(cluster_name) else {
            return Ok(None);
        };

        let Some(route) = self.gateway_route(&key.namespace, &key.route).await? else {
            return Ok(None);
        };

        if key.rule_index >= route.spec.rules.len() {
            debug!(
                cluster = %cluster_name,
                rules = route.spec.rules.len(),
                "Rule index out of range for AIGatewayRoute, no policy applies"
            );
            return Ok(None);
        }
        Ok(Some((route, key.rule_index)))
    }

    /// True when any backend behind the cluster has at least one policy.
    pub async fn cluster_has_policy(&mut self, cluster_name: &str) -> Result<bool> {
        let backends = self.resolve_cluster(cluster_name).await?;
        Ok(backends.iter().any(|b| self.index.contains(b)))
    }

    /// Policies applying to a set of clusters, deduplicated by identity in
    /// first-seen order.
    pub async fn policies_for_clusters<'n, I>(&mut self, cluster_names: I) -> Result<Vec<Arc<QuotaPolicy>>>
    where
        I: IntoIterator<Item = &'n str>,
    {
        let mut seen = HashSet::new();
        let mut policies = Vec::new();

        for name in cluster_names {
            for backend in self.resolve_cluster(name).await? {
                for policy in self.index.policies_for(&backend) {
                    if seen.insert(policy.identity()) {
                        policies.push(Arc::clone(policy));
                    }
                }
            }
        }

        Ok(policies)
    }

    async fn gateway_route(&mut self, namespace: &str, name: &str) -> Result<Option<Arc<AiGatewayRoute>>> {
        let cache_key = (namespace.to_string(), name.to_string());
        if let Some(cached) = self.routes.get(&cache_key) {
            return Ok(cached.clone());
        }

        let route = match self.store.get_gateway_route(namespace, name).await {
            Ok(route) => Some(Arc::new(route)),
            Err(err) if err.is_not_found() => {
                debug!(namespace = %namespace, route = %name, "AIGatewayRoute not found, no policy applies");
                None
            }
            Err(err) => return Err(err),
        };

        self.routes.insert(cache_key, route.clone());
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AiGatewayRouteRule, AiGatewayRouteSpec, BackendRef, ObjectMeta, TargetRef};
    use crate::store::InMemoryStore;

    fn policy(name: &str, uid: &str, targets: &[&str]) -> QuotaPolicy {
        let mut policy = QuotaPolicy { metadata: ObjectMeta::new("default", name), ..Default::default() };
        policy.metadata.uid = Some(uid.to_string());
        policy.spec.target_refs =
            targets.iter().map(|t| TargetRef { name: t.to_string(), ..Default::default() }).collect();
        policy
    }

    fn route(name: &str, rules: &[&[&str]]) -> AiGatewayRoute {
        AiGatewayRoute {
            metadata: ObjectMeta::new("default", name),
            spec: AiGatewayRouteSpec {
                rules: rules
                    .iter()
                    .map(|backends| AiGatewayRouteRule {
                        backend_refs: backends.iter().map(|b| BackendRef { name: b.to_string() }).collect(),
                    })
                    .collect(),
            },
        }
    }

    #[test]
    fn index_accumulates_policies_per_backend() {
        let index = PolicyIndex::build(vec![
            policy("a", "uid-a", &["openai", "bedrock"]),
            policy("b", "uid-b", &["openai"]),
        ]);

        assert_eq!(index.len(), 2);
        let names: Vec<_> =
            index.policies_for("default/openai").iter().map(|p| p.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(index.policies_for("default/bedrock").len(), 1);
        assert!(index.policies_for("other/openai").is_empty());
    }

    #[tokio::test]
    async fn resolves_cluster_to_rule_backends() {
        let store = InMemoryStore::new();
        store.apply_route(route("chat", &[&["openai"], &["bedrock", "openai"]])).await;
        let mut resolver = PolicyResolver::new(&store, PolicyIndex::default());

        assert_eq!(
            resolver.resolve_cluster("httproute/default/chat/rule/1").await.unwrap(),
            vec!["default/bedrock".to_string(), "default/openai".to_string()]
        );
    }

    #[tokio::test]
    async fn resolves_rule_of_generated_cluster() {
        let store = InMemoryStore::new();
        store.apply_route(route("chat", &[&["openai"], &["bedrock"]])).await;
        let mut resolver = PolicyResolver::new(&store, PolicyIndex::default());

        let (route, rule_index) = resolver.resolve_rule("httproute/default/chat/rule/1").await.unwrap().expect("rule");
        assert_eq!(route.metadata.name, "chat");
        assert_eq!(rule_index, 1);
        assert!(resolver.resolve_rule("httproute/default/chat/rule/2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn misses_resolve_to_nothing() {
        let store = InMemoryStore::new();
        store.apply_route(route("chat", &[&["openai"]])).await;
        let mut resolver = PolicyResolver::new(&store, PolicyIndex::default());

        for name in [
            "httproute/default/chat/rule/7",
            "httproute/default/missing/rule/0",
            "outbound|443||api.openai.com",
            "httproute/default/chat/rule/x",
        ] {
            assert!(resolver.resolve_cluster(name).await.unwrap().is_empty(), "{name}");
        }
    }

    #[tokio::test]
    async fn policies_are_deduplicated_across_clusters() {
        let store = InMemoryStore::new();
        store.apply_route(route("chat", &[&["openai"], &["openai", "bedrock"]])).await;
        let index = PolicyIndex::build(vec![
            policy("shared", "uid-shared", &["openai", "bedrock"]),
            policy("bedrock-only", "uid-bedrock", &["bedrock"]),
        ]);
        let mut resolver = PolicyResolver::new(&store, index);

        let policies = resolver
            .policies_for_clusters(["httproute/default/chat/rule/0", "httproute/default/chat/rule/1"])
            .await
            .unwrap();
        let names: Vec<_> = policies.iter().map(|p| p.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["shared", "bedrock-only"]);

        assert!(resolver.cluster_has_policy("httproute/default/chat/rule/0").await.unwrap());
        assert!(!resolver.cluster_has_policy("httproute/default/nope/rule/0").await.unwrap());
    }
}
