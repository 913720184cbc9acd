//! Cron scheduler for pipeline runs
//!
//! Pipelines that contain a `schedule_trigger` node get one cron job each,
//! keyed by `"<slug>/<name>"`. A job is a tokio task that sleeps until the
//! next cron occurrence, loads the pipeline fresh from storage, and runs it
//! on a blocking thread. Outcomes land in a bounded per-pipeline history
//! ring (oldest first, cap 50); a failed run never cancels the schedule.
//!
//! Users write standard 5-field expressions (`min hour dom mon dow`). The
//! `cron` crate wants a seconds field, so a validated expression is widened
//! with a leading `0` before parsing.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use flowdeck_engine::nodes::schedule_trigger::SCHEDULE_TRIGGER_TYPE;
use flowdeck_engine::{NodeRegistry, Pipeline, PipelineExecutor, RunHooks, RunOptions};

use crate::storage::{pipeline_key, ProjectStore};

/// Run history entries kept per pipeline.
const MAX_HISTORY: usize = 50;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),
}

/// Outcome of one scheduled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    fn ok() -> Self {
        Self {
            timestamp: Utc::now(),
            status: RunStatus::Ok,
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: RunStatus::Error,
            error: Some(message.into()),
        }
    }
}

/// Parse a 5-field cron expression plus an optional IANA timezone.
pub fn parse_cron(expr: &str, timezone: &str) -> Result<(Schedule, Tz), SchedulerError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(SchedulerError::InvalidCron {
            expr: expr.to_string(),
            reason: format!("expected 5 fields, got {}", fields.len()),
        });
    }
    let widened = format!("0 {}", fields.join(" "));
    let schedule = Schedule::from_str(&widened).map_err(|err| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason: err.to_string(),
    })?;
    let tz: Tz = timezone
        .parse()
        .map_err(|_| SchedulerError::InvalidTimezone(timezone.to_string()))?;
    Ok((schedule, tz))
}

struct ScheduledJob {
    id: Uuid,
    handle: JoinHandle<()>,
}

type History = Arc<Mutex<HashMap<String, Vec<RunRecord>>>>;

/// Process-wide pipeline scheduler.
pub struct PipelineScheduler {
    store: Arc<dyn ProjectStore>,
    nodes: Arc<NodeRegistry>,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    history: History,
}

impl PipelineScheduler {
    pub fn new(store: Arc<dyn ProjectStore>, nodes: Arc<NodeRegistry>) -> Self {
        Self {
            store,
            nodes,
            jobs: Mutex::new(HashMap::new()),
            history: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reconcile the job for one pipeline. Called from the save path, so an
    /// unparseable schedule is logged and skipped rather than failing the
    /// save. The replacement is atomic: the old job is removed before the
    /// new one is installed, and a pipeline without an enabled schedule
    /// node ends up with no job.
    pub fn sync_schedules(&self, slug: &str, name: &str, pipeline: &Pipeline) {
        let key = pipeline_key(slug, name);
        self.remove_job(&key);

        let Some(node) = pipeline
            .nodes
            .iter()
            .find(|n| n.node_type == SCHEDULE_TRIGGER_TYPE)
        else {
            return;
        };

        let enabled = node
            .config
            .get("enabled")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);
        let Some(expr) = node
            .config
            .get("cron_expression")
            .and_then(serde_json::Value::as_str)
        else {
            return;
        };
        if !enabled {
            tracing::debug!(%key, "schedule trigger disabled; no job registered");
            return;
        }

        let timezone = node
            .config
            .get("timezone")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("UTC");

        let (schedule, tz) = match parse_cron(expr, timezone) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(%key, error = %err, "invalid schedule; skipping");
                return;
            }
        };

        let job_id = Uuid::new_v4();
        let store = Arc::clone(&self.store);
        let nodes = Arc::clone(&self.nodes);
        let history = Arc::clone(&self.history);
        let job_key = key.clone();
        let slug = slug.to_string();
        let name = name.to_string();

        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now().with_timezone(&tz);
                let Some(next) = schedule.after(&now).next() else {
                    tracing::info!(key = %job_key, "schedule has no future occurrences; job exiting");
                    break;
                };
                let wait = (next - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                tokio::time::sleep(wait).await;
                run_scheduled(&store, &nodes, &history, &slug, &name).await;
            }
        });

        tracing::info!(%key, cron = expr, timezone, "registered schedule");
        self.jobs.lock().insert(key, ScheduledJob { id: job_id, handle });
    }

    /// Remove the job for a key, if any. Ignores unknown keys.
    pub fn remove_job(&self, key: &str) {
        if let Some(job) = self.jobs.lock().remove(key) {
            job.handle.abort();
            tracing::debug!(%key, job_id = %job.id, "removed schedule");
        }
    }

    pub fn has_job(&self, key: &str) -> bool {
        self.jobs.lock().contains_key(key)
    }

    /// The job id for a key, if scheduled. Ids change on every re-sync.
    pub fn job_id(&self, key: &str) -> Option<Uuid> {
        self.jobs.lock().get(key).map(|job| job.id)
    }

    /// Run history for a pipeline, oldest first.
    pub fn run_history(&self, slug: &str, name: &str) -> Vec<RunRecord> {
        self.history
            .lock()
            .get(&pipeline_key(slug, name))
            .cloned()
            .unwrap_or_default()
    }

    /// Cancel every job. In-flight run callbacks complete on their blocking
    /// threads; no new occurrences fire.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock();
        for (key, job) in jobs.drain() {
            job.handle.abort();
            tracing::debug!(%key, "cancelled schedule at shutdown");
        }
    }

    #[cfg(test)]
    fn record(&self, key: &str, record: RunRecord) {
        push_history(&self.history, key, record);
    }
}

impl Drop for PipelineScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn push_history(history: &History, key: &str, record: RunRecord) {
    let mut map = history.lock();
    let ring = map.entry(key.to_string()).or_default();
    ring.push(record);
    if ring.len() > MAX_HISTORY {
        let excess = ring.len() - MAX_HISTORY;
        ring.drain(..excess);
    }
}

/// One scheduled run: load fresh, execute, record the outcome.
async fn run_scheduled(
    store: &Arc<dyn ProjectStore>,
    nodes: &Arc<NodeRegistry>,
    history: &History,
    slug: &str,
    name: &str,
) {
    let key = pipeline_key(slug, name);
    let record = match store.load_pipeline(slug, name) {
        Ok(Some(pipeline)) => {
            let nodes = Arc::clone(nodes);
            let result = tokio::task::spawn_blocking(move || {
                let executor = PipelineExecutor::new(nodes);
                executor.run(&pipeline, &RunHooks::default(), &RunOptions::default())
            })
            .await;
            match result {
                Ok(Ok(_)) => {
                    tracing::info!(%key, "scheduled run completed");
                    RunRecord::ok()
                }
                Ok(Err(err)) => {
                    tracing::error!(%key, error = %err, "scheduled run failed");
                    RunRecord::error(err.to_string())
                }
                Err(join_err) => {
                    tracing::error!(%key, error = %join_err, "scheduled run panicked");
                    RunRecord::error(join_err.to_string())
                }
            }
        }
        Ok(None) => {
            tracing::error!(%key, "scheduled run failed: pipeline not found");
            RunRecord::error("pipeline not found")
        }
        Err(err) => {
            tracing::error!(%key, error = %err, "scheduled run failed to load pipeline");
            RunRecord::error(err.to_string())
        }
    };
    push_history(history, &key, record);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn scheduler() -> PipelineScheduler {
        PipelineScheduler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NodeRegistry::with_builtins()),
        )
    }

    #[test]
    fn test_parse_cron_accepts_five_fields() {
        let (schedule, tz) = parse_cron("*/5 * * * *", "UTC").unwrap();
        assert_eq!(tz, chrono_tz::UTC);
        assert!(schedule.upcoming(tz).next().is_some());
    }

    #[test]
    fn test_parse_cron_rejects_wrong_field_count() {
        let err = parse_cron("*/5 * * *", "UTC").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
        let err = parse_cron("0 */5 * * * *", "UTC").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    }

    #[test]
    fn test_parse_cron_rejects_garbage_fields() {
        assert!(parse_cron("banana * * * *", "UTC").is_err());
    }

    #[test]
    fn test_parse_cron_rejects_unknown_timezone() {
        let err = parse_cron("*/5 * * * *", "Mars/Olympus").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTimezone(_)));
    }

    #[test]
    fn test_parse_cron_named_timezone() {
        let (_, tz) = parse_cron("0 9 * * 1", "Europe/London").unwrap();
        assert_eq!(tz.name(), "Europe/London");
    }

    #[tokio::test]
    async fn test_history_ring_caps_at_fifty() {
        let scheduler = scheduler();
        for i in 0..60 {
            scheduler.record("p/w", RunRecord::error(format!("run {i}")));
        }
        let history = scheduler.run_history("p", "w");
        assert_eq!(history.len(), 50);
        // Oldest entries were discarded first.
        assert_eq!(history[0].error.as_deref(), Some("run 10"));
        assert_eq!(history[49].error.as_deref(), Some("run 59"));
    }
}
