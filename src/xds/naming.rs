//! Cluster and route naming convention shared with the gateway controller.
//!
//! The controller names every cluster (and route) it generates for a route
//! rule as `httproute/{namespace}/{route}/rule/{index}`. That string is the
//! only link between a wire-level resource and the policy objects, so parsing
//! is strict: anything that is not exactly this shape is not ours.

use std::fmt;

const ROUTE_PREFIX: &str = "httproute";
const RULE_SEPARATOR: &str = "rule";

/// Decoded cluster/route key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteRuleKey {
    pub namespace: String,
    pub route: String,
    pub rule_index: usize,
}

impl RouteRuleKey {
    pub fn new(namespace: impl Into<String>, route: impl Into<String>, rule_index: usize) -> Self {
        Self { namespace: namespace.into(), route: route.into(), rule_index }
    }

    /// Parse a cluster or route name. Returns `None` for any other shape.
    pub fn decode(name: &str) -> Option<Self> {
        let mut parts = name.split('/');
        let (prefix, namespace, route, separator, index) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?, parts.next()?);

        if parts.next().is_some() || prefix != ROUTE_PREFIX || separator != RULE_SEPARATOR {
            return None;
        }

        if namespace.is_empty() || route.is_empty() {
            return None;
        }

        // usize::from_str accepts a leading '+', the controller never emits one.
        if !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let rule_index = index.parse().ok()?;
        Some(Self::new(namespace, route, rule_index))
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RouteRuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ROUTE_PREFIX}/{}/{}/{RULE_SEPARATOR}/{}",
            self.namespace, self.route, self.rule_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_well_formed_key() {
        assert_eq!(
            RouteRuleKey::decode("httproute/default/myroute/rule/2"),
            Some(RouteRuleKey::new("default", "myroute", 2))
        );
    }

    #[test]
    fn rejects_malformed_names() {
        for name in [
            "",
            "httproute",
            "httproute/default/myroute/rule",
            "httproute/default/myroute/rule/2/extra",
            "grpcroute/default/myroute/rule/2",
            "HTTPRoute/default/myroute/rule/2",
            "httproute/default/myroute/rules/2",
            "httproute/default/myroute/rule/two",
            "httproute/default/myroute/rule/-1",
            "httproute/default/myroute/rule/+1",
            "httproute/default/myroute/rule/",
            "httproute//myroute/rule/0",
            "httproute/default//rule/0",
            "ai_gateway_ratelimit_cluster",
            "original_destination_cluster",
            "/httproute/default/myroute/rule/0",
        ] {
            assert_eq!(RouteRuleKey::decode(name), None, "{name:?} should not decode");
        }
    }

    #[test]
    fn rejects_index_overflow() {
        let name = format!("httproute/default/myroute/rule/{}0", usize::MAX);
        assert_eq!(RouteRuleKey::decode(&name), None);
    }

    proptest! {
        #[test]
        fn encode_then_decode_is_identity(
            namespace in "[a-z0-9]([a-z0-9-]{0,20}[a-z0-9])?",
            route in "[a-z0-9]([a-z0-9.-]{0,30}[a-z0-9])?",
            index in 0usize..10_000,
        ) {
            let key = RouteRuleKey::new(namespace, route, index);
            prop_assert_eq!(RouteRuleKey::decode(&key.encode()), Some(key));
        }

        #[test]
        fn wrong_segment_count_never_decodes(segments in proptest::collection::vec("[a-z0-9]{1,8}", 0..10)) {
            prop_assume!(segments.len() != 5);
            let name = segments.join("/");
            prop_assert_eq!(RouteRuleKey::decode(&name), None);
        }
    }
}
