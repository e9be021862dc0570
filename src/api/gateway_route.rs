//! AIGatewayRoute object model.
//!
//! Only the parts the resolver reads are modelled: the ordered rule list and
//! each rule's backend references.

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ObjectMeta;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct AiGatewayRoute {
    #[validate(nested)]
    pub metadata: ObjectMeta,

    #[validate(nested)]
    #[serde(default)]
    pub spec: AiGatewayRouteSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct AiGatewayRouteSpec {
    #[validate(nested)]
    #[serde(default)]
    pub rules: Vec<AiGatewayRouteRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct AiGatewayRouteRule {
    #[validate(nested)]
    #[serde(default)]
    pub backend_refs: Vec<BackendRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    #[validate(length(min = 1, max = 253))]
    pub name: String,
}

impl AiGatewayRoute {
    /// Backend keys (`namespace/name`) referenced by rule `index`, or `None`
    /// when the index is out of range.
    pub fn rule_backend_keys(&self, index: usize) -> Option<Vec<String>> {
        self.spec.rules.get(index).map(|rule| {
            rule.backend_refs
                .iter()
                .map(|backend| super::backend_key(&self.metadata.namespace, &backend.name))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_backend_keys_are_namespaced() {
        let route: AiGatewayRoute = serde_yaml::from_str(
            r#"
metadata:
  namespace: default
  name: chat
spec:
  rules:
    - backendRefs:
        - name: openai
        - name: bedrock
    - backendRefs: []
"#,
        )
        .unwrap();

        assert_eq!(
            route.rule_backend_keys(0),
            Some(vec!["default/openai".to_string(), "default/bedrock".to_string()])
        );
        assert_eq!(route.rule_backend_keys(1), Some(vec![]));
        assert_eq!(route.rule_backend_keys(2), None);
    }
}
