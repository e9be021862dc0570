//! # Resource Store
//!
//! Read-only access to the policy objects and high-level route objects the
//! translator consults once per pass. "Not found" is reported as
//! [`Error::NotFound`](crate::Error::NotFound) so callers can tell a miss
//! apart from a store failure.

pub mod memory;

pub use memory::InMemoryStore;

use crate::api::{AiGatewayRoute, QuotaPolicy};
use crate::errors::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List every QuotaPolicy, in a stable order.
    async fn list_quota_policies(&self) -> Result<Vec<QuotaPolicy>>;

    /// Fetch one AIGatewayRoute by namespace and name.
    async fn get_gateway_route(&self, namespace: &str, name: &str) -> Result<AiGatewayRoute>;
}

#[async_trait]
impl<S: ResourceStore + ?Sized> ResourceStore for std::sync::Arc<S> {
    async fn list_quota_policies(&self) -> Result<Vec<QuotaPolicy>> {
        (**self).list_quota_policies().await
    }

    async fn get_gateway_route(&self, namespace: &str, name: &str) -> Result<AiGatewayRoute> {
        (**self).get_gateway_route(namespace, name).await
    }
}
