//! Shared named-table environment for streaming pipelines
//!
//! One [`TableEnv`] exists per published pipeline. Init nodes seed it,
//! processing nodes read and update it on every tick, and dashboard fetches
//! read it concurrently. Tick writers are already serialized by the
//! executor's tick lock, so this lock only guards against concurrent
//! dashboard reads.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::Mutex;
use serde_json::Value;

use crate::table::TableRef;

/// A value stored in the environment: either an opaque table handle or
/// plain JSON (e.g. a pre-flattened `{rows, columns, total}` dict).
#[derive(Clone)]
pub enum TableValue {
    Json(Value),
    Table(TableRef),
}

impl TableValue {
    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            TableValue::Table(table) => Some(table),
            TableValue::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            TableValue::Json(value) => Some(value),
            TableValue::Table(_) => None,
        }
    }
}

impl fmt::Debug for TableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableValue::Json(value) => f.debug_tuple("Json").field(value).finish(),
            TableValue::Table(table) => f
                .debug_struct("Table")
                .field("rows", &table.len())
                .finish(),
        }
    }
}

/// Thread-safe named-value environment.
#[derive(Default)]
pub struct TableEnv {
    tables: Mutex<HashMap<String, TableValue>>,
}

impl TableEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>, value: TableValue) {
        self.tables.lock().insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<TableValue> {
        self.tables.lock().get(name).cloned()
    }

    pub fn remove(&self, name: &str) {
        self.tables.lock().remove(name);
    }

    /// Current table names, sorted for stable notification payloads.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.tables.lock().clear();
    }

    /// Row counts for the entries that are table handles.
    pub fn row_counts(&self) -> BTreeMap<String, usize> {
        self.tables
            .lock()
            .iter()
            .filter_map(|(name, value)| value.as_table().map(|t| (name.clone(), t.len())))
            .collect()
    }
}
