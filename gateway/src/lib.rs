pub mod alerts;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod routes;
pub mod test_util;

pub use cluster::{NodeRegistry, RegistrySettings, TelemetryPoller};
pub use config::Config;
pub use dispatch::Dispatcher;
pub use error::ApiError;
pub use jobs::{BatchEngine, JobStore};

use std::sync::Arc;

/// Shared application state.
///
/// Built once at startup and injected into every subsystem by shared
/// reference; tests construct their own instance around mock nodes.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<NodeRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub jobs: Arc<JobStore>,
    pub batch: BatchEngine,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let registry = Arc::new(NodeRegistry::new(
            config.nodes.clone(),
            RegistrySettings {
                failure_threshold: config.telemetry.failure_threshold,
                offline_after: config.telemetry.offline_after(),
                high_util_threshold: config.alerts.gpu_util_warning,
            },
        ));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), &config));
        let jobs = Arc::new(JobStore::new(config.jobs.retain_jobs));
        let batch = BatchEngine::new(
            Arc::clone(&jobs),
            Arc::clone(&dispatcher),
            Arc::clone(&registry),
            &config.jobs,
        );
        Arc::new(Self {
            config,
            registry,
            dispatcher,
            jobs,
            batch,
        })
    }
}
