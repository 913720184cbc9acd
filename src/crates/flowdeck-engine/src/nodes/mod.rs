//! Built-in node types
//!
//! The set the server ships with: a cron trigger, an HTTP fetch/send node,
//! a grid output, an env-seeding init node, and a timer stream source.
//! Embedders add their own types through [`NodeRegistry::register`].
//!
//! [`NodeRegistry::register`]: crate::registry::NodeRegistry::register

use std::sync::Arc;

use serde_json::Value;

use crate::node::NodeFactory;

pub mod grid;
pub mod http_request;
pub mod schedule_trigger;
pub mod table_set;
pub mod timer_source;

pub use grid::GridFactory;
pub use http_request::HttpRequestFactory;
pub use schedule_trigger::ScheduleTriggerFactory;
pub use table_set::TableSetFactory;
pub use timer_source::TimerSourceFactory;

/// Factories for every built-in node type.
pub fn builtin_factories() -> Vec<Arc<dyn NodeFactory>> {
    vec![
        Arc::new(ScheduleTriggerFactory::new()),
        Arc::new(HttpRequestFactory::new()),
        Arc::new(GridFactory::new()),
        Arc::new(TableSetFactory::new()),
        Arc::new(TimerSourceFactory::new()),
    ]
}

// Config accessors shared by the built-ins. Node config is free-form JSON;
// a missing or null document reads as empty.

pub(crate) fn cfg<'a>(config: &'a Value, key: &str) -> Option<&'a Value> {
    config.as_object().and_then(|map| map.get(key))
}

pub(crate) fn cfg_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    cfg(config, key).and_then(Value::as_str)
}

pub(crate) fn cfg_u64(config: &Value, key: &str, default: u64) -> u64 {
    cfg(config, key).and_then(Value::as_u64).unwrap_or(default)
}

pub(crate) fn cfg_f64(config: &Value, key: &str, default: f64) -> f64 {
    cfg(config, key).and_then(Value::as_f64).unwrap_or(default)
}
