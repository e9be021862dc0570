//! Helpers for navigating and editing already-assembled xDS resources.

mod listener_modifier;

pub use listener_modifier::{ListenerModifier, HCM_FILTER_NAME, HCM_TYPE_URL};
