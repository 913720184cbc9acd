//! Dashboard WebSocket endpoint
//!
//! One socket per dashboard view, addressed by pipeline key. The client
//! subscribes widgets to named tables and pulls pages; the server pushes
//! `data_changed` whenever a tick mutates the environment. Widget state is
//! owned by the connection task, so a disconnect drops every subscription
//! with it. Errors answer the offending request; they never close the
//! socket.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;

use crate::dashboard::{query_table, DashboardEvent, DashboardRequest, WidgetSubscription};
use crate::lifecycle::Services;

/// GET /ws/dashboard/{*key}
pub async fn ws_dashboard(
    State(services): State<Arc<Services>>,
    Path(key): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(services, key, socket))
}

async fn handle_socket(services: Arc<Services>, key: String, mut socket: WebSocket) {
    if services.published.get(&key).is_none() {
        let event = DashboardEvent::Error {
            error: format!("Pipeline '{key}' not running"),
        };
        let _ = send_event(&mut socket, &event).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let (conn_id, mut notifications) = services.dashboards.register(&key);
    tracing::debug!(%key, conn_id, "dashboard connected");

    let mut widgets: HashMap<String, WidgetSubscription> = HashMap::new();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_request(&services, &key, &mut widgets, &text);
                        if send_event(&mut socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary: ignored
                    Some(Err(_)) => break,
                }
            }
            pushed = notifications.recv() => {
                match pushed {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    services.dashboards.unregister(&key, conn_id);
    tracing::debug!(%key, conn_id, "dashboard disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &DashboardEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).expect("dashboard events serialize");
    socket.send(Message::Text(text)).await
}

/// Process one client request against the connection's widget map and the
/// pipeline's current environment.
fn handle_request(
    services: &Services,
    key: &str,
    widgets: &mut HashMap<String, WidgetSubscription>,
    raw: &str,
) -> DashboardEvent {
    let request: DashboardRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(err) => {
            return DashboardEvent::Error {
                error: format!("malformed request: {err}"),
            }
        }
    };

    match request {
        DashboardRequest::Subscribe {
            widget_id,
            table,
            page,
            page_size,
            sort,
            filters,
        } => {
            widgets.insert(
                widget_id.clone(),
                WidgetSubscription {
                    table,
                    page,
                    page_size: page_size.max(1),
                    sort,
                    filters,
                },
            );
            DashboardEvent::Subscribed { widget_id }
        }
        DashboardRequest::Fetch { widget_id } => {
            let Some(view) = widgets.get(&widget_id) else {
                return DashboardEvent::Error {
                    error: format!("Widget {widget_id} not subscribed"),
                };
            };
            // Resolve the entry per fetch: an unpublish between requests
            // turns into an error rather than stale data.
            let Some(entry) = services.published.get(key) else {
                return DashboardEvent::Error {
                    error: format!("Pipeline '{key}' not running"),
                };
            };
            let Some(value) = entry.env.get(&view.table) else {
                return DashboardEvent::Error {
                    error: format!("Table '{}' not found", view.table),
                };
            };
            let page = query_table(&value, view.page, view.page_size);
            DashboardEvent::Page {
                widget_id,
                rows: page.rows,
                columns: page.columns,
                total: page.total,
            }
        }
    }
}
