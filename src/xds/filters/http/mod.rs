//! HTTP filters injected by the quota translator.

pub mod ext_proc;
pub mod rate_limit;

pub use ext_proc::{ExtProcFilter, AI_GATEWAY_EXT_PROC_FILTER_NAME, UPSTREAM_HOST_METADATA_ATTRIBUTE};
pub use rate_limit::{
    QuotaRateLimitFilter, RateLimitPerRouteConfig, QUOTA_RATE_LIMIT_FILTER_NAME, RATE_LIMIT_CLUSTER_NAME,
};
