//! Helper for editing the HTTP connection managers inside a Listener.
//!
//! Works on a private copy of the listener: the caller's value is never
//! touched, and [`ListenerModifier::finish_if_modified`] hands back the copy
//! only when some HCM actually changed.

use envoy_types::pb::envoy::config::listener::v3::filter::ConfigType;
use envoy_types::pb::envoy::config::listener::v3::{FilterChain, Listener};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpConnectionManager;

use crate::errors::Result;
use crate::xds::filters::{pack, unpack};

pub const HCM_FILTER_NAME: &str = "envoy.filters.network.http_connection_manager";
pub const HCM_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";

pub struct ListenerModifier {
    listener: Listener,
    modified: bool,
}

impl ListenerModifier {
    pub fn new(listener: &Listener) -> Self {
        Self { listener: listener.clone(), modified: false }
    }

    pub fn name(&self) -> &str {
        &self.listener.name
    }

    /// Apply `f` to every HTTP connection manager, in the listener's filter
    /// chains and its default filter chain.
    ///
    /// The callback returns `Ok(true)` when it changed the HCM; only then is
    /// the HCM re-encoded. Returns the number of HCMs changed.
    pub fn for_each_hcm<F>(&mut self, mut f: F) -> Result<usize>
    where
        F: FnMut(&mut HttpConnectionManager) -> Result<bool>,
    {
        let name = self.listener.name.clone();
        let mut modified_count = 0;

        let chains = self.listener.filter_chains.iter_mut().chain(self.listener.default_filter_chain.as_mut());
        for chain in chains {
            modified_count += edit_chain(chain, &name, &mut f)?;
        }

        if modified_count > 0 {
            self.modified = true;
        }
        Ok(modified_count)
    }

    /// The edited listener, or `None` when nothing changed.
    pub fn finish_if_modified(self) -> Option<Listener> {
        self.modified.then_some(self.listener)
    }
}

fn edit_chain<F>(chain: &mut FilterChain, listener: &str, f: &mut F) -> Result<usize>
where
    F: FnMut(&mut HttpConnectionManager) -> Result<bool>,
{
    let mut modified_count = 0;

    for filter in chain.filters.iter_mut().filter(|f| f.name == HCM_FILTER_NAME) {
        let Some(ConfigType::TypedConfig(typed_config)) = &mut filter.config_type else {
            continue;
        };

        let mut hcm: HttpConnectionManager =
            unpack(typed_config, &format!("HttpConnectionManager of listener '{listener}'"))?;

        if f(&mut hcm)? {
            *typed_config = pack(HCM_TYPE_URL, &hcm)?;
            modified_count += 1;
        }
    }

    Ok(modified_count)
}
