//! In-memory [`ResourceStore`] backed by ordered maps.
//!
//! Keys are `namespace/name`, so listing is deterministic across passes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::ResourceStore;
use crate::api::{AiGatewayRoute, QuotaPolicy};
use crate::errors::{Error, Result};

pub const QUOTA_POLICY_KIND: &str = "QuotaPolicy";
pub const GATEWAY_ROUTE_KIND: &str = "AIGatewayRoute";

#[derive(Debug, Default)]
pub struct InMemoryStore {
    policies: RwLock<BTreeMap<String, QuotaPolicy>>,
    routes: RwLock<BTreeMap<String, AiGatewayRoute>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a multi-document YAML stream of manifests.
    ///
    /// Documents of unknown kind are skipped. QuotaPolicies that fail
    /// admission validation are skipped with a warning.
    pub fn from_yaml(manifests: &str) -> Result<Self> {
        let mut policies = BTreeMap::new();
        let mut routes = BTreeMap::new();

        for (idx, document) in serde_yaml::Deserializer::from_str(manifests).enumerate() {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| Error::serialization(format!("manifest document {idx}"), e))?;

            if value.is_null() {
                continue;
            }

            let kind = value.get("kind").and_then(|k| k.as_str()).unwrap_or_default().to_string();
            match kind.as_str() {
                QUOTA_POLICY_KIND => {
                    let policy: QuotaPolicy = serde_yaml::from_value(value)
                        .map_err(|e| Error::serialization(format!("QuotaPolicy document {idx}"), e))?;
                    if let Err(err) = policy.validate() {
                        warn!(policy = %policy.metadata.key(), error = %err, "Skipping invalid QuotaPolicy");
                        continue;
                    }
                    policies.insert(policy.metadata.key(), policy);
                }
                GATEWAY_ROUTE_KIND => {
                    let route: AiGatewayRoute = serde_yaml::from_value(value).map_err(|e| {
                        Error::serialization(format!("AIGatewayRoute document {idx}"), e)
                    })?;
                    routes.insert(route.metadata.key(), route);
                }
                other => debug!(document = idx, kind = %other, "Ignoring manifest of unrelated kind"),
            }
        }

        Ok(Self { policies: RwLock::new(policies), routes: RwLock::new(routes) })
    }

    /// Insert or replace a policy.
    pub async fn apply_policy(&self, policy: QuotaPolicy) {
        self.policies.write().await.insert(policy.metadata.key(), policy);
    }

    pub async fn delete_policy(&self, namespace: &str, name: &str) -> Option<QuotaPolicy> {
        self.policies.write().await.remove(&format!("{namespace}/{name}"))
    }

    /// Insert or replace a route.
    pub async fn apply_route(&self, route: AiGatewayRoute) {
        self.routes.write().await.insert(route.metadata.key(), route);
    }

    pub async fn delete_route(&self, namespace: &str, name: &str) -> Option<AiGatewayRoute> {
        self.routes.write().await.remove(&format!("{namespace}/{name}"))
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn list_quota_policies(&self) -> Result<Vec<QuotaPolicy>> {
        Ok(self.policies.read().await.values().cloned().collect())
    }

    async fn get_gateway_route(&self, namespace: &str, name: &str) -> Result<AiGatewayRoute> {
        let key = format!("{namespace}/{name}");
        self.routes
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(GATEWAY_ROUTE_KIND, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ObjectMeta;

    const MANIFESTS: &str = r#"
kind: AIGatewayRoute
metadata:
  namespace: default
  name: chat
spec:
  rules:
    - backendRefs:
        - name: openai
---
kind: QuotaPolicy
metadata:
  namespace: default
  name: premium
spec:
  targetRefs:
    - name: openai
---
kind: QuotaPolicy
metadata:
  namespace: default
  name: broken
spec:
  targetRefs: []
---
kind: ConfigMap
metadata:
  namespace: default
  name: unrelated
"#;

    #[tokio::test]
    async fn loads_known_kinds_and_skips_invalid_policies() {
        let store = InMemoryStore::from_yaml(MANIFESTS).unwrap();

        let policies = store.list_quota_policies().await.unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].metadata.name, "premium");

        let route = store.get_gateway_route("default", "chat").await.unwrap();
        assert_eq!(route.spec.rules.len(), 1);
    }

    #[tokio::test]
    async fn missing_route_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_gateway_route("default", "absent").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn listing_is_ordered_by_key() {
        let store = InMemoryStore::new();
        for name in ["zeta", "alpha", "mid"] {
            store
                .apply_policy(QuotaPolicy { metadata: ObjectMeta::new("default", name), ..Default::default() })
                .await;
        }

        let names: Vec<_> = store
            .list_quota_policies()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.metadata.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);

        assert!(store.delete_policy("default", "mid").await.is_some());
        assert_eq!(store.list_quota_policies().await.unwrap().len(), 2);
    }

    #[test]
    fn malformed_yaml_is_a_serialization_error() {
        let err = InMemoryStore::from_yaml("kind: QuotaPolicy\nmetadata: [").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
