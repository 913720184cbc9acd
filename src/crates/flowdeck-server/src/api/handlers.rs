//! HTTP request handlers
//!
//! Batch runs execute on blocking threads; the progress variant streams
//! line-delimited JSON events bridged from the executor's hooks through a
//! bounded channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use flowdeck_engine::{Edge, NodeDef, Pipeline, RunHooks, RunOptions};

use crate::api::error::{ApiError, ApiResult};
use crate::lifecycle::Services;
use crate::scheduler::RunRecord;

/// Body of `POST /api/pipelines/run` and `/run-stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunPayload {
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub start_from: Option<String>,
}

impl RunPayload {
    fn into_parts(self) -> (Pipeline, RunOptions) {
        (
            Pipeline::new(self.nodes, self.edges),
            RunOptions {
                session_id: self.session_id,
                start_from: self.start_from,
            },
        )
    }
}

/// Execute a pipeline and return per-node results (tables stripped).
pub async fn run_pipeline(
    State(services): State<Arc<Services>>,
    Json(payload): Json<RunPayload>,
) -> ApiResult<Json<Value>> {
    let (pipeline, options) = payload.into_parts();
    let executor = Arc::clone(&services.batch);
    let results = tokio::task::spawn_blocking(move || {
        executor.run(&pipeline, &RunHooks::default(), &options)
    })
    .await
    .map_err(|err| ApiError::InternalError(err.to_string()))??;

    let wire: BTreeMap<String, Value> = results
        .iter()
        .map(|(id, output)| (id.clone(), output.to_wire()))
        .collect();
    Ok(Json(json!({ "results": wire })))
}

/// Execute a pipeline, streaming progress as line-delimited JSON events:
/// `node_start`, `node_done` (output minus tables), `node_error`, then a
/// final `complete` or `error`. The stream closing is the sentinel.
pub async fn run_pipeline_stream(
    State(services): State<Arc<Services>>,
    Json(payload): Json<RunPayload>,
) -> Response {
    let (pipeline, options) = payload.into_parts();
    let executor = Arc::clone(&services.batch);
    let (tx, rx) = mpsc::channel::<Value>(64);

    tokio::task::spawn_blocking(move || {
        let start_tx = tx.clone();
        let done_tx = tx.clone();
        let error_tx = tx.clone();
        let hooks = RunHooks {
            on_node_start: Some(Box::new(move |id| {
                let _ = start_tx.blocking_send(json!({"type": "node_start", "node_id": id}));
            })),
            on_node_done: Some(Box::new(move |id, output| {
                let mut event = json!({"type": "node_done", "node_id": id});
                if let (Some(event_map), Some(fields)) =
                    (event.as_object_mut(), output.as_object())
                {
                    for (key, value) in fields {
                        event_map.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
                let _ = done_tx.blocking_send(event);
            })),
            on_node_error: Some(Box::new(move |id, err| {
                let _ = error_tx.blocking_send(
                    json!({"type": "node_error", "node_id": id, "error": err.to_string()}),
                );
            })),
        };

        match executor.run(&pipeline, &hooks, &options) {
            Ok(results) => {
                let wire: BTreeMap<String, Value> = results
                    .iter()
                    .map(|(id, output)| (id.clone(), output.to_wire()))
                    .collect();
                let _ = tx.blocking_send(json!({"type": "complete", "results": wire}));
            }
            Err(err) => {
                let _ = tx.blocking_send(json!({"type": "error", "error": err.to_string()}));
            }
        }
        // tx drops here; the closed channel ends the response stream.
    });

    let lines = ReceiverStream::new(rx)
        .map(|event| Ok::<_, std::convert::Infallible>(format!("{event}\n")));
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response()
}

/// Start a streaming pipeline server-side.
pub async fn publish_pipeline(
    State(services): State<Arc<Services>>,
    Path((slug, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let key = tokio::task::spawn_blocking(move || services.publish(&slug, &name))
        .await
        .map_err(|err| ApiError::InternalError(err.to_string()))??;
    Ok(Json(json!({"status": "published", "key": key})))
}

/// Stop a streaming pipeline.
pub async fn unpublish_pipeline(
    State(services): State<Arc<Services>>,
    Path((slug, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let key = tokio::task::spawn_blocking(move || services.unpublish(&slug, &name))
        .await
        .map_err(|err| ApiError::InternalError(err.to_string()))??;
    Ok(Json(json!({"status": "unpublished", "key": key})))
}

/// Load a stored pipeline document.
pub async fn load_pipeline(
    State(services): State<Arc<Services>>,
    Path((slug, name)): Path<(String, String)>,
) -> ApiResult<Json<Pipeline>> {
    let pipeline = services
        .store
        .load_pipeline(&slug, &name)?
        .ok_or_else(|| ApiError::NotFound(format!("pipeline {slug}/{name}")))?;
    Ok(Json(pipeline))
}

/// Save a pipeline document. Validates the graph first and re-syncs the
/// pipeline's cron schedule; an invalid schedule never fails the save.
pub async fn save_pipeline(
    State(services): State<Arc<Services>>,
    Path((slug, name)): Path<(String, String)>,
    Json(pipeline): Json<Pipeline>,
) -> ApiResult<Json<Value>> {
    pipeline.validate(&services.nodes)?;
    services.store.save_pipeline(&slug, &name, &pipeline)?;
    services.scheduler.sync_schedules(&slug, &name, &pipeline);
    Ok(Json(json!({"status": "saved"})))
}

pub async fn list_projects(
    State(services): State<Arc<Services>>,
) -> ApiResult<Json<Value>> {
    let projects = services.store.list_projects()?;
    Ok(Json(json!({ "projects": projects })))
}

pub async fn list_pipelines(
    State(services): State<Arc<Services>>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Value>> {
    let pipelines = services.store.list_pipelines(&slug)?;
    Ok(Json(json!({ "pipelines": pipelines })))
}

/// Scheduled-run history for a pipeline, oldest first.
pub async fn run_history(
    State(services): State<Arc<Services>>,
    Path((slug, name)): Path<(String, String)>,
) -> Json<Vec<RunRecord>> {
    Json(services.scheduler.run_history(&slug, &name))
}

/// Node-type descriptors for the editor palette.
pub async fn list_nodes(State(services): State<Arc<Services>>) -> Json<Value> {
    Json(json!({ "nodes": services.nodes.descriptors() }))
}

/// Currently running (published) pipeline keys.
pub async fn list_running(State(services): State<Arc<Services>>) -> Json<Value> {
    Json(json!({ "running": services.published.list_running() }))
}

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
