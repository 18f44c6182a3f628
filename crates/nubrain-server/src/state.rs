//! Shared application state

use metrics_exporter_prometheus::PrometheusHandle;
use nubrain_classifiers::PipelineRegistry;
use std::sync::Arc;

/// State shared by all request handlers.
///
/// The registry is built once at startup and never mutated, so handlers
/// only clone `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Loaded pipelines
    pub registry: Arc<PipelineRegistry>,

    /// Prometheus handle for rendering `/metrics`
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(registry: PipelineRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            metrics: None,
        }
    }

    /// Attach a metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
