//! Pipeline services and HTTP/WebSocket surface for flowdeck
//!
//! Everything around the engine that makes pipelines a running system: the
//! project store, the cron scheduler with per-pipeline run history, the
//! live dashboard channel, and the publish/unpublish/restore lifecycle,
//! exposed over a thin axum API.

pub mod api;
pub mod config;
pub mod dashboard;
pub mod lifecycle;
pub mod scheduler;
pub mod storage;

pub use config::ServerConfig;
pub use dashboard::{
    DashboardChannel, DashboardEvent, DashboardRequest, TablePage, WidgetSubscription,
};
pub use lifecycle::{LifecycleError, Services};
pub use scheduler::{parse_cron, PipelineScheduler, RunRecord, RunStatus, SchedulerError};
pub use storage::{
    pipeline_key, FileStore, MemoryStore, ProjectInfo, ProjectStore, StorageError,
};
