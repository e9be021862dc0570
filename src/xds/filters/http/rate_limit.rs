//! Global rate limit HTTP filter configuration.
//!
//! The quota filter calls an external rate-limit service over gRPC. It is
//! injected into upstream (cluster) filter chains and receives its descriptor
//! actions per route through [`RateLimitPerRouteConfig`].

use std::time::Duration;

use crate::errors::Result;
use crate::xds::filters::{invalid_config, pack};
use envoy_types::pb::envoy::config::core::v3::{
    grpc_service::{EnvoyGrpc, TargetSpecifier},
    ApiVersion, GrpcService,
};
use envoy_types::pb::envoy::config::ratelimit::v3::RateLimitServiceConfig;
use envoy_types::pb::envoy::config::route::v3::RateLimit as RouteRateLimit;
use envoy_types::pb::envoy::extensions::filters::http::ratelimit::v3::{
    rate_limit::XRateLimitHeadersRfcVersion, RateLimit as RateLimitProto,
    RateLimitPerRoute as RateLimitPerRouteProto,
};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, Duration as ProtoDuration};

pub const RATE_LIMIT_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.ratelimit.v3.RateLimit";
pub const RATE_LIMIT_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.ratelimit.v3.RateLimitPerRoute";

/// Reserved name of the quota rate limit filter.
pub const QUOTA_RATE_LIMIT_FILTER_NAME: &str = "envoy.filters.http.ratelimit/ai-gateway-quota";

/// Reserved name of the rate-limit service cluster.
pub const RATE_LIMIT_CLUSTER_NAME: &str = "ai_gateway_ratelimit_cluster";

/// Quota rate limit filter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaRateLimitFilter {
    /// Domain sent to the rate-limit service
    pub domain: String,
    /// Cluster serving the rate-limit service
    pub cluster_name: String,
    pub timeout: Duration,
    /// Fail closed when the service is unreachable
    pub failure_mode_deny: bool,
    pub x_ratelimit_headers: bool,
    pub disable_x_envoy_ratelimited_header: bool,
}

impl QuotaRateLimitFilter {
    /// Fail-open filter with draft-03 response headers pointed at the reserved cluster.
    pub fn new(domain: impl Into<String>, timeout: Duration) -> Self {
        Self {
            domain: domain.into(),
            cluster_name: RATE_LIMIT_CLUSTER_NAME.to_string(),
            timeout,
            failure_mode_deny: false,
            x_ratelimit_headers: true,
            disable_x_envoy_ratelimited_header: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(invalid_config("RateLimit domain cannot be empty"));
        }
        if self.cluster_name.trim().is_empty() {
            return Err(invalid_config("RateLimit service cluster_name cannot be empty"));
        }
        if self.timeout.is_zero() {
            return Err(invalid_config("RateLimit timeout must be positive"));
        }
        Ok(())
    }

    pub fn to_proto(&self) -> Result<RateLimitProto> {
        self.validate()?;

        let enable_x_ratelimit_headers = if self.x_ratelimit_headers {
            XRateLimitHeadersRfcVersion::DraftVersion03
        } else {
            XRateLimitHeadersRfcVersion::Off
        };

        Ok(RateLimitProto {
            domain: self.domain.clone(),
            timeout: Some(proto_duration(self.timeout)),
            failure_mode_deny: self.failure_mode_deny,
            enable_x_ratelimit_headers: enable_x_ratelimit_headers as i32,
            disable_x_envoy_ratelimited_header: self.disable_x_envoy_ratelimited_header,
            rate_limit_service: Some(rate_limit_service(&self.cluster_name)),
            ..Default::default()
        })
    }

    pub fn to_any(&self) -> Result<EnvoyAny> {
        pack(RATE_LIMIT_TYPE_URL, &self.to_proto()?)
    }
}

fn rate_limit_service(cluster_name: &str) -> RateLimitServiceConfig {
    let grpc_service = GrpcService {
        timeout: None,
        target_specifier: Some(TargetSpecifier::EnvoyGrpc(EnvoyGrpc {
            cluster_name: cluster_name.to_string(),
            authority: String::new(),
            retry_policy: None,
            max_receive_message_length: None,
            skip_envoy_headers: false,
        })),
        initial_metadata: Vec::new(),
        retry_policy: None,
    };

    RateLimitServiceConfig {
        grpc_service: Some(grpc_service),
        transport_api_version: ApiVersion::V3 as i32,
    }
}

pub(crate) fn proto_duration(duration: Duration) -> ProtoDuration {
    ProtoDuration { seconds: duration.as_secs() as i64, nanos: duration.subsec_nanos() as i32 }
}

/// Per-route descriptor actions for the quota filter.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPerRouteConfig {
    pub domain: String,
    pub rate_limits: Vec<RouteRateLimit>,
}

impl RateLimitPerRouteConfig {
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(invalid_config("RateLimitPerRoute domain cannot be empty"));
        }
        Ok(())
    }

    pub fn to_proto(&self) -> Result<RateLimitPerRouteProto> {
        self.validate()?;
        Ok(RateLimitPerRouteProto {
            vh_rate_limits: 0,
            override_option: 0,
            rate_limits: self.rate_limits.clone(),
            domain: self.domain.clone(),
        })
    }

    pub fn to_any(&self) -> Result<EnvoyAny> {
        pack(RATE_LIMIT_PER_ROUTE_TYPE_URL, &self.to_proto()?)
    }
}
