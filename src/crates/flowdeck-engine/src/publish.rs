//! Registry of published (running) streaming pipelines
//!
//! One entry per `"<project_slug>/<pipeline_name>"` key. The environment
//! and executor of an entry are created together and removed together;
//! `register` overwrites silently, so callers that need exclusivity check
//! `get` first (the publish lifecycle does).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::env::TableEnv;
use crate::streaming::StreamingExecutor;

/// A running streaming pipeline: its environment and its executor.
#[derive(Clone)]
pub struct PublishEntry {
    pub env: Arc<TableEnv>,
    pub executor: Arc<StreamingExecutor>,
}

/// Thread-safe map of running pipelines.
#[derive(Default)]
pub struct PublishRegistry {
    running: Mutex<HashMap<String, PublishEntry>>,
}

impl PublishRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, env: Arc<TableEnv>, executor: Arc<StreamingExecutor>) {
        self.running
            .lock()
            .insert(key.into(), PublishEntry { env, executor });
    }

    /// Atomically remove and return the entry. The caller is responsible
    /// for stopping the executor. Idempotent: a missing key returns `None`.
    pub fn unregister(&self, key: &str) -> Option<PublishEntry> {
        self.running.lock().remove(key)
    }

    pub fn get(&self, key: &str) -> Option<PublishEntry> {
        self.running.lock().get(key).cloned()
    }

    /// Keys of all running pipelines, sorted.
    pub fn list_running(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.running.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeRegistry;

    fn entry() -> (Arc<TableEnv>, Arc<StreamingExecutor>) {
        let registry = Arc::new(NodeRegistry::with_builtins());
        (
            Arc::new(TableEnv::new()),
            StreamingExecutor::new(registry),
        )
    }

    #[test]
    fn test_register_and_list() {
        let registry = PublishRegistry::new();
        assert!(registry.list_running().is_empty());

        let (env, executor) = entry();
        registry.register("proj/pipe1", env, executor);
        assert_eq!(registry.list_running(), vec!["proj/pipe1"]);
    }

    #[test]
    fn test_unregister_round_trip() {
        let registry = PublishRegistry::new();
        let (env, executor) = entry();
        registry.register("proj/pipe1", env, executor);

        assert!(registry.unregister("proj/pipe1").is_some());
        assert!(registry.get("proj/pipe1").is_none());
        assert!(registry.list_running().is_empty());
        // Second unregister is a no-op.
        assert!(registry.unregister("proj/pipe1").is_none());
    }

    #[test]
    fn test_get_missing() {
        let registry = PublishRegistry::new();
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_entry_env_identity() {
        let registry = PublishRegistry::new();
        let (env, executor) = entry();
        registry.register("proj/pipe1", Arc::clone(&env), executor);
        let got = registry.get("proj/pipe1").unwrap();
        assert!(Arc::ptr_eq(&got.env, &env));
    }
}
