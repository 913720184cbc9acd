//! Publish / unpublish / restore lifecycle
//!
//! [`Services`] is the explicit bundle of collaborators the API layer and
//! the binary thread through the system: storage, node registry, publish
//! registry, scheduler, dashboard channel, and the shared batch executor.
//!
//! Publishing loads the pipeline, marks it `published`, persists it, then
//! starts a streaming executor whose tick callback feeds the dashboard
//! channel, and registers the pair under `"<slug>/<name>"`. Unpublishing
//! unregisters first so no new dashboard fetch can resolve the entry, then
//! stops the executor and clears the flag. At boot, every stored pipeline
//! with `published=true` is brought back up; one broken pipeline never
//! blocks the rest.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use flowdeck_engine::{
    EngineError, NodeRegistry, Pipeline, PipelineExecutor, PublishRegistry, StreamingExecutor,
    TableEnv, TickCallback,
};

use crate::dashboard::DashboardChannel;
use crate::scheduler::PipelineScheduler;
use crate::storage::{pipeline_key, ProjectStore, StorageError};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("pipeline not found: {0}")]
    NotFound(String),

    #[error("pipeline already published: {0}")]
    AlreadyPublished(String),

    #[error("pipeline failed to start: node '{node}': {message}")]
    StartFailed { node: String, message: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Shared service bundle.
pub struct Services {
    pub store: Arc<dyn ProjectStore>,
    pub nodes: Arc<NodeRegistry>,
    pub batch: Arc<PipelineExecutor>,
    pub published: Arc<PublishRegistry>,
    pub scheduler: Arc<PipelineScheduler>,
    pub dashboards: Arc<DashboardChannel>,
}

impl Services {
    pub fn new(store: Arc<dyn ProjectStore>, nodes: Arc<NodeRegistry>) -> Self {
        let scheduler = Arc::new(PipelineScheduler::new(
            Arc::clone(&store),
            Arc::clone(&nodes),
        ));
        Self {
            batch: Arc::new(PipelineExecutor::new(Arc::clone(&nodes))),
            published: Arc::new(PublishRegistry::new()),
            scheduler,
            dashboards: Arc::new(DashboardChannel::new()),
            store,
            nodes,
        }
    }

    /// Publish a streaming pipeline: mark it published, start it, register it.
    pub fn publish(&self, slug: &str, name: &str) -> Result<String, LifecycleError> {
        let key = pipeline_key(slug, name);
        let mut pipeline = self
            .store
            .load_pipeline(slug, name)?
            .ok_or_else(|| LifecycleError::NotFound(key.clone()))?;

        if self.published.get(&key).is_some() {
            return Err(LifecycleError::AlreadyPublished(key));
        }

        pipeline.published = true;
        self.store.save_pipeline(slug, name, &pipeline)?;

        let (env, executor) = self.start_streaming(&key, &pipeline)?;
        self.published.register(key.clone(), env, executor);
        tracing::info!(%key, "pipeline published");
        Ok(key)
    }

    /// Unpublish: unregister first, then stop and clear the stored flag.
    pub fn unpublish(&self, slug: &str, name: &str) -> Result<String, LifecycleError> {
        let key = pipeline_key(slug, name);
        if let Some(entry) = self.published.unregister(&key) {
            entry.executor.stop();
        }

        if let Some(mut pipeline) = self.store.load_pipeline(slug, name)? {
            pipeline.published = false;
            self.store.save_pipeline(slug, name, &pipeline)?;
        }
        tracing::info!(%key, "pipeline unpublished");
        Ok(key)
    }

    /// Bring every `published=true` pipeline back up and re-sync schedules.
    /// Per-pipeline failures are logged and skipped so boot completes.
    pub fn restore_published(&self) {
        let projects = match self.store.list_projects() {
            Ok(projects) => projects,
            Err(err) => {
                tracing::error!(error = %err, "failed to list projects; nothing restored");
                return;
            }
        };

        for project in projects {
            let names = match self.store.list_pipelines(&project.slug) {
                Ok(names) => names,
                Err(err) => {
                    tracing::error!(slug = %project.slug, error = %err, "failed to list pipelines");
                    continue;
                }
            };
            for name in names {
                let key = pipeline_key(&project.slug, &name);
                let pipeline = match self.store.load_pipeline(&project.slug, &name) {
                    Ok(Some(pipeline)) => pipeline,
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::error!(%key, error = %err, "failed to load pipeline");
                        continue;
                    }
                };

                self.scheduler.sync_schedules(&project.slug, &name, &pipeline);

                if !pipeline.published {
                    continue;
                }
                match self.start_streaming(&key, &pipeline) {
                    Ok((env, executor)) => {
                        self.published.register(key.clone(), env, executor);
                        tracing::info!(%key, "restored published pipeline");
                    }
                    Err(err) => {
                        tracing::error!(%key, error = %err, "failed to restore pipeline");
                    }
                }
            }
        }
    }

    /// Stop everything: schedules first, then each running pipeline.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        for key in self.published.list_running() {
            if let Some(entry) = self.published.unregister(&key) {
                entry.executor.stop();
                tracing::info!(%key, "stopped published pipeline");
            }
        }
    }

    /// Build and start the streaming executor for a pipeline, wiring the
    /// tick callback to the dashboard notifier. An init or source failure
    /// surfaces as [`LifecycleError::StartFailed`] and leaves nothing
    /// running.
    fn start_streaming(
        &self,
        key: &str,
        pipeline: &Pipeline,
    ) -> Result<(Arc<TableEnv>, Arc<StreamingExecutor>), LifecycleError> {
        let env = Arc::new(TableEnv::new());
        let executor = StreamingExecutor::new(Arc::clone(&self.nodes));

        let dashboards = Arc::clone(&self.dashboards);
        let notify_key = key.to_string();
        let on_tick: TickCallback = Arc::new(move |env: &TableEnv| {
            dashboards.notify_data_changed(&notify_key, env.list(), Some(env.row_counts()));
        });

        let init_failure: Arc<Mutex<Option<(String, String)>>> = Arc::new(Mutex::new(None));
        let failure_sink = Arc::clone(&init_failure);
        let on_init_error = move |node: &str, err: &EngineError| {
            *failure_sink.lock() = Some((node.to_string(), err.to_string()));
        };

        executor.start(
            pipeline,
            Arc::clone(&env),
            Some(on_tick),
            Some(&on_init_error),
        )?;

        if let Some((node, message)) = init_failure.lock().take() {
            return Err(LifecycleError::StartFailed { node, message });
        }
        Ok((env, executor))
    }
}
