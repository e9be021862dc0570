//! Listener-side patching.
//!
//! Every HTTP connection manager of a gateway listener gets the
//! request-inspection ext_proc filter (placed ahead of the late filters) and
//! its inline virtual hosts get the original-destination fallback route.

use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, HttpConnectionManager, HttpFilter,
};
use tracing::debug;

use crate::errors::Result;
use crate::xds::filter_chain::{insert_filter, late_filter_prefixes};
use crate::xds::filters::http::{ExtProcFilter, AI_GATEWAY_EXT_PROC_FILTER_NAME};
use crate::xds::filters::typed_http_filter;
use crate::xds::helpers::ListenerModifier;
use crate::xds::original_dst::patch_virtual_host;

/// Patch a listener. `Ok(None)` means the listener needs no change.
///
/// A connection manager payload that does not decode fails this listener
/// only.
pub fn patch_listener(listener: &Listener, ext_proc: Option<&ExtProcFilter>) -> Result<Option<Listener>> {
    let inspection_filter = match ext_proc {
        Some(filter) => Some(typed_http_filter(AI_GATEWAY_EXT_PROC_FILTER_NAME, filter.to_any()?)),
        None => None,
    };
    let late = late_filter_prefixes();

    let mut modifier = ListenerModifier::new(listener);
    let changed = modifier.for_each_hcm(|hcm| Ok(patch_hcm(hcm, inspection_filter.as_ref(), &late)))?;

    if changed > 0 {
        debug!(listener = %modifier.name(), connection_managers = changed, "Patched listener");
    }
    Ok(modifier.finish_if_modified())
}

fn patch_hcm(hcm: &mut HttpConnectionManager, inspection_filter: Option<&HttpFilter>, late: &[&str]) -> bool {
    let mut changed = false;

    if let Some(filter) = inspection_filter {
        if let Some(filters) = insert_filter(&hcm.http_filters, filter.clone(), late) {
            hcm.http_filters = filters;
            changed = true;
        }
    }

    // RDS-backed managers are handled through the route configuration pass.
    if let Some(RouteSpecifier::RouteConfig(route_config)) = &mut hcm.route_specifier {
        for vhost in route_config.virtual_hosts.iter_mut() {
            if let Some(patched) = patch_virtual_host(vhost) {
                *vhost = patched;
                changed = true;
            }
        }
    }

    changed
}
