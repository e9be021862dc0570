//! # Policy Object Model
//!
//! Serde representations of the resource-store objects this crate reads:
//! `QuotaPolicy` and `AIGatewayRoute`. Field names follow the camelCase
//! manifest convention so objects load directly from YAML or JSON.

pub mod gateway_route;
pub mod quota_policy;

pub use gateway_route::{AiGatewayRoute, AiGatewayRouteRule, AiGatewayRouteSpec, BackendRef};
pub use quota_policy::{
    BucketRule, ClientSelector, HeaderMatch, HeaderMatchType, PerModelQuota, QuotaDefinition,
    QuotaPolicy, QuotaPolicySpec, QuotaValue, ServiceQuota, TargetRef,
};

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Namespaced object identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[validate(length(min = 1, max = 63, message = "Namespace must be 1-63 characters"))]
    pub namespace: String,

    #[validate(length(min = 1, max = 253, message = "Name must be 1-253 characters"))]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into(), uid: None }
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Key under which a backend's policies are indexed: `namespace/backendName`.
pub fn backend_key(namespace: &str, backend: &str) -> String {
    format!("{namespace}/{backend}")
}
