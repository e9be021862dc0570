//! Typed HTTP filter builders and `Any` packing helpers.
//!
//! Every filter this crate injects is described by a small Rust config struct
//! with `validate()` and `to_any()`, so call sites never hand-assemble protobuf
//! payloads.

pub mod http;

use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_filter::ConfigType as HttpFilterConfigType, HttpFilter,
};
use envoy_types::pb::google::protobuf::Any;
use prost::Message;

use crate::errors::{Error, Result};

/// Pack a message into an `Any`, surfacing encode failures.
pub fn pack<M: Message>(type_url: &str, message: &M) -> Result<Any> {
    let mut value = Vec::with_capacity(message.encoded_len());
    message.encode(&mut value).map_err(|e| Error::encode(type_url, e))?;
    Ok(Any { type_url: type_url.to_string(), value })
}

/// Decode the payload of an `Any`. `resource` names what is being decoded in errors.
pub fn unpack<M: Message + Default>(any: &Any, resource: &str) -> Result<M> {
    M::decode(any.value.as_slice()).map_err(|e| Error::decode(resource, e))
}

/// Wrap a typed config into a named HTTP filter.
pub fn typed_http_filter(name: &str, typed_config: Any) -> HttpFilter {
    HttpFilter {
        name: name.to_string(),
        config_type: Some(HttpFilterConfigType::TypedConfig(typed_config)),
        is_optional: false,
        disabled: false,
    }
}

pub(crate) fn invalid_config<S: Into<String>>(msg: S) -> Error {
    Error::config(msg)
}
