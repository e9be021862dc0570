//! External processor filter for request inspection.
//!
//! The inspection processor reads the model from the request body and writes
//! `backend_name` / `model_name_override` into dynamic metadata, which the
//! compiled rate limit descriptors read back at request time.

use std::time::Duration;

use crate::errors::Result;
use crate::xds::filters::http::rate_limit::proto_duration;
use crate::xds::filters::{invalid_config, pack};
use envoy_types::pb::envoy::config::core::v3::{
    grpc_service::{EnvoyGrpc, TargetSpecifier},
    GrpcService,
};
use envoy_types::pb::envoy::extensions::filters::http::ext_proc::v3::{
    metadata_options::MetadataNamespaces, ExternalProcessor as ExternalProcessorProto, MetadataOptions,
    ProcessingMode as ProcessingModeProto,
};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;

pub const EXT_PROC_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.ext_proc.v3.ExternalProcessor";

/// Reserved name of the request-inspection filter.
pub const AI_GATEWAY_EXT_PROC_FILTER_NAME: &str = "envoy.filters.http.ext_proc/aigateway";

/// Attribute that hands the selected endpoint's metadata to the processor.
pub const UPSTREAM_HOST_METADATA_ATTRIBUTE: &str = "xds.upstream_host_metadata";

const UPSTREAM_EXT_PROC_TIMEOUT: Duration = Duration::from_secs(30);

// ProcessingMode.HeaderSendMode
const HEADER_SEND: i32 = 1;
const HEADER_SKIP: i32 = 2;
// ProcessingMode.BodySendMode
const BODY_BUFFERED: i32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtProcFilter {
    /// Cluster serving the external processor
    pub cluster_name: String,
    pub timeout: Duration,
    /// Dynamic metadata namespaces the processor may write
    pub receiving_namespaces: Vec<String>,
    /// Envoy attributes sent along with each request
    pub request_attributes: Vec<String>,
}

impl ExtProcFilter {
    pub fn new(cluster_name: impl Into<String>, timeout: Duration, namespace: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            timeout,
            receiving_namespaces: vec![namespace.into()],
            request_attributes: Vec::new(),
        }
    }

    /// Upstream processor of one AIGatewayRoute. It runs after endpoint
    /// selection and reads the backend from the upstream host metadata.
    pub fn upstream(route_namespace: &str, route_name: &str, namespace: impl Into<String>) -> Self {
        let cluster_name = format!("envoyextensionpolicy/{route_namespace}/ai-eg-route-extproc-{route_name}/extproc/0");
        Self {
            request_attributes: vec![UPSTREAM_HOST_METADATA_ATTRIBUTE.to_string()],
            ..Self::new(cluster_name, UPSTREAM_EXT_PROC_TIMEOUT, namespace)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(invalid_config("ExtProc cluster_name cannot be empty"));
        }
        if self.timeout.is_zero() {
            return Err(invalid_config("ExtProc timeout must be positive"));
        }
        Ok(())
    }

    pub fn to_proto(&self) -> Result<ExternalProcessorProto> {
        self.validate()?;

        let grpc_service = GrpcService {
            target_specifier: Some(TargetSpecifier::EnvoyGrpc(EnvoyGrpc {
                cluster_name: self.cluster_name.clone(),
                authority: String::new(),
                retry_policy: None,
                max_receive_message_length: None,
                skip_envoy_headers: false,
            })),
            timeout: Some(proto_duration(self.timeout)),
            initial_metadata: Vec::new(),
            retry_policy: None,
        };

        // Request bodies are buffered so the processor can read the model name.
        let processing_mode = ProcessingModeProto {
            request_header_mode: HEADER_SEND,
            response_header_mode: HEADER_SEND,
            request_body_mode: BODY_BUFFERED,
            response_body_mode: BODY_BUFFERED,
            request_trailer_mode: HEADER_SKIP,
            response_trailer_mode: HEADER_SKIP,
        };

        Ok(ExternalProcessorProto {
            grpc_service: Some(grpc_service),
            processing_mode: Some(processing_mode),
            allow_mode_override: true,
            request_attributes: self.request_attributes.clone(),
            metadata_options: Some(MetadataOptions {
                receiving_namespaces: Some(MetadataNamespaces {
                    untyped: self.receiving_namespaces.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    pub fn to_any(&self) -> Result<EnvoyAny> {
        pack(EXT_PROC_TYPE_URL, &self.to_proto()?)
    }
}
