//! Live dashboard channel
//!
//! Dashboards connect per pipeline key, subscribe widgets to named tables
//! in the published environment, and pull pages on demand. When a tick
//! completes, the streaming executor calls [`DashboardChannel::notify_data_changed`]
//! from its tick thread; delivery to the socket tasks goes through bounded
//! per-connection channels, and a slow viewer drops notifications instead
//! of blocking the tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use flowdeck_engine::{table, TableValue};

/// Outbound queue depth per connection; notifications beyond this are
/// dropped for that connection.
const NOTIFY_BUFFER: usize = 32;

fn default_page_size() -> usize {
    50
}

/// Client -> server messages on the dashboard socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DashboardRequest {
    /// Register (or overwrite) a widget's view of a table
    Subscribe {
        widget_id: String,
        table: String,
        #[serde(default)]
        page: usize,
        #[serde(default = "default_page_size")]
        page_size: usize,
        #[serde(default)]
        sort: Option<Value>,
        #[serde(default)]
        filters: Option<Value>,
    },
    /// Pull the current page for a subscribed widget
    Fetch { widget_id: String },
}

/// Server -> client messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DashboardEvent {
    Subscribed {
        widget_id: String,
    },
    Page {
        widget_id: String,
        rows: Vec<Value>,
        columns: Vec<String>,
        total: usize,
    },
    DataChanged {
        tables: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        row_counts: Option<BTreeMap<String, usize>>,
    },
    Error {
        error: String,
    },
}

/// Per-widget view parameters, owned by the connection task.
#[derive(Debug, Clone)]
pub struct WidgetSubscription {
    pub table: String,
    pub page: usize,
    pub page_size: usize,
    pub sort: Option<Value>,
    pub filters: Option<Value>,
}

/// One page of table data.
#[derive(Debug, Clone, Serialize)]
pub struct TablePage {
    pub rows: Vec<Value>,
    pub columns: Vec<String>,
    pub total: usize,
}

/// Resolve one page out of a stored table value.
///
/// Table handles paginate through `head` + column-major slicing; plain
/// `{rows, columns, total}` JSON documents slice their row array directly.
/// Anything else reads as an empty table.
pub fn query_table(value: &TableValue, page: usize, page_size: usize) -> TablePage {
    let start = page.saturating_mul(page_size);
    match value {
        TableValue::Table(handle) => {
            let total = handle.len();
            let end = (start + page_size).min(total);
            let (rows, columns) = if start >= end {
                (Vec::new(), handle.columns())
            } else {
                table::page_rows(handle.as_ref(), start, end)
            };
            TablePage {
                rows,
                columns,
                total,
            }
        }
        TableValue::Json(Value::Object(map)) => {
            let rows = map
                .get("rows")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let columns = map
                .get("columns")
                .and_then(Value::as_array)
                .map(|cols| {
                    cols.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let total = map
                .get("total")
                .and_then(Value::as_u64)
                .map(|t| t as usize)
                .unwrap_or(rows.len());
            let end = (start + page_size).min(rows.len());
            let page_rows = if start >= end {
                Vec::new()
            } else {
                rows[start..end].to_vec()
            };
            TablePage {
                rows: page_rows,
                columns,
                total,
            }
        }
        TableValue::Json(_) => TablePage {
            rows: Vec::new(),
            columns: Vec::new(),
            total: 0,
        },
    }
}

/// Connection fan-out state for all dashboards of all pipelines.
#[derive(Default)]
pub struct DashboardChannel {
    connections: Mutex<HashMap<String, HashMap<u64, mpsc::Sender<DashboardEvent>>>>,
    next_id: AtomicU64,
}

impl DashboardChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a pipeline key. Returns the connection id
    /// and the receiving end of its outbound queue.
    pub fn register(&self, key: &str) -> (u64, mpsc::Receiver<DashboardEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(NOTIFY_BUFFER);
        self.connections
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(id, tx);
        (id, rx)
    }

    /// Drop a connection; removes the key entry when it was the last one.
    pub fn unregister(&self, key: &str, id: u64) {
        let mut connections = self.connections.lock();
        if let Some(conns) = connections.get_mut(key) {
            conns.remove(&id);
            if conns.is_empty() {
                connections.remove(key);
            }
        }
    }

    pub fn connection_count(&self, key: &str) -> usize {
        self.connections.lock().get(key).map_or(0, HashMap::len)
    }

    /// Push a data-changed notification to every dashboard of `key`.
    ///
    /// Safe to call from any thread; this is the streaming executor's
    /// `on_tick_complete` path. Sends never block: a full or closed queue
    /// drops the event for that connection only.
    pub fn notify_data_changed(
        &self,
        key: &str,
        tables: Vec<String>,
        row_counts: Option<BTreeMap<String, usize>>,
    ) {
        let senders: Vec<mpsc::Sender<DashboardEvent>> = {
            let connections = self.connections.lock();
            match connections.get(key) {
                Some(conns) => conns.values().cloned().collect(),
                None => return,
            }
        };

        let event = DashboardEvent::DataChanged {
            tables,
            row_counts,
        };
        for sender in senders {
            if sender.try_send(event.clone()).is_err() {
                tracing::debug!(%key, "dashboard connection lagging; notification dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeck_engine::MemTable;
    use serde_json::json;
    use std::sync::Arc;

    fn json_table(rows: usize) -> TableValue {
        let rows: Vec<Value> = (0..rows).map(|i| json!({"x": i})).collect();
        TableValue::Json(json!({
            "rows": rows,
            "columns": ["x"],
            "total": rows.len(),
        }))
    }

    #[test]
    fn test_query_json_table_first_page() {
        let page = query_table(&json_table(3), 0, 50);
        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.total, 3);
        assert_eq!(page.columns, vec!["x"]);
    }

    #[test]
    fn test_query_json_table_pagination() {
        let page = query_table(&json_table(10), 0, 3);
        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.rows[0], json!({"x": 0}));
        assert_eq!(page.rows[2], json!({"x": 2}));
        assert_eq!(page.total, 10);

        let second = query_table(&json_table(10), 1, 3);
        assert_eq!(second.rows[0], json!({"x": 3}));
    }

    #[test]
    fn test_query_page_size_beyond_total() {
        let page = query_table(&json_table(3), 0, 100);
        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_query_page_past_end_is_empty() {
        let page = query_table(&json_table(3), 5, 10);
        assert!(page.rows.is_empty());
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_query_table_handle() {
        let table = MemTable::from_columns(vec![(
            "x".to_string(),
            (0..10).map(|i| json!(i)).collect(),
        )])
        .unwrap();
        let value = TableValue::Table(Arc::new(table));
        let page = query_table(&value, 2, 4);
        assert_eq!(page.total, 10);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0], json!({"x": 8}));
    }

    #[test]
    fn test_query_scalar_json_is_empty() {
        let page = query_table(&TableValue::Json(json!(42)), 0, 10);
        assert_eq!(page.total, 0);
        assert!(page.rows.is_empty());
    }

    #[tokio::test]
    async fn test_notify_reaches_registered_connections() {
        let channel = DashboardChannel::new();
        let (_id, mut rx) = channel.register("proj/pipe");
        channel.notify_data_changed("proj/pipe", vec!["trades".to_string()], None);

        let event = rx.recv().await.unwrap();
        match event {
            DashboardEvent::DataChanged { tables, .. } => {
                assert_eq!(tables, vec!["trades"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_notify_unknown_key_is_noop() {
        let channel = DashboardChannel::new();
        channel.notify_data_changed("nobody/home", vec![], None);
    }

    #[tokio::test]
    async fn test_unregister_cleans_up() {
        let channel = DashboardChannel::new();
        let (id, _rx) = channel.register("proj/pipe");
        assert_eq!(channel.connection_count("proj/pipe"), 1);
        channel.unregister("proj/pipe", id);
        assert_eq!(channel.connection_count("proj/pipe"), 0);
    }

    #[test]
    fn test_request_wire_format() {
        let msg: DashboardRequest = serde_json::from_value(json!({
            "action": "subscribe",
            "widget_id": "w1",
            "table": "trades",
            "page": 0,
            "page_size": 3,
        }))
        .unwrap();
        match msg {
            DashboardRequest::Subscribe {
                widget_id,
                table,
                page,
                page_size,
                ..
            } => {
                assert_eq!(widget_id, "w1");
                assert_eq!(table, "trades");
                assert_eq!(page, 0);
                assert_eq!(page_size, 3);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_event_wire_format() {
        let event = DashboardEvent::Subscribed {
            widget_id: "w1".to_string(),
        };
        let raw = serde_json::to_value(&event).unwrap();
        assert_eq!(raw, json!({"event": "subscribed", "widget_id": "w1"}));
    }
}
