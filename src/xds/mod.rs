//! Envoy xDS transforms applied on top of gateway-generated configuration.
//!
//! Everything here is a pure function over already-assembled resources:
//! inputs are borrowed, outputs are fresh copies, and `None` means the input
//! needs no change.

pub mod cluster;
pub mod descriptors;
pub mod filter_chain;
pub mod filters;
pub mod helpers;
pub mod listener;
pub mod naming;
pub mod original_dst;
pub mod resolver;

pub use naming::RouteRuleKey;
pub use resolver::{PolicyIndex, PolicyResolver};
