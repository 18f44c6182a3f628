//! HTTP routes and handlers

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use nubrain_classifiers::ClassificationResult;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/api/pipelines", get(list_pipelines))
        .route("/api/classify", post(classify))
        .fallback(fallback)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub name: String,
    pub labels: Vec<String>,
    pub color_mode: String,
    pub width: u32,
    pub height: u32,
    pub classifier: String,
    pub extractor: bool,
    pub scaler: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineList {
    pub default: Option<String>,
    pub pipelines: Vec<PipelineInfo>,
}

async fn list_pipelines(State(state): State<AppState>) -> Json<PipelineList> {
    let registry = &state.registry;

    let pipelines = registry
        .names()
        .into_iter()
        .filter_map(|name| registry.get(Some(&name)))
        .map(|pipeline| {
            let pre = pipeline.preprocessing();
            PipelineInfo {
                name: pipeline.name().to_string(),
                labels: pipeline.labels().as_slice().to_vec(),
                color_mode: format!("{:?}", pre.color_mode).to_lowercase(),
                width: pre.width,
                height: pre.height,
                classifier: pipeline.classifier().name().to_string(),
                extractor: pipeline.has_extractor(),
                scaler: pipeline.has_scaler(),
            }
        })
        .collect();

    Json(PipelineList {
        default: registry.default_name().map(str::to_string),
        pipelines,
    })
}

#[derive(Debug, Deserialize)]
struct ClassifyParams {
    pipeline: Option<String>,
}

/// Response body of `POST /api/classify`
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub request_id: String,
    pub pipeline: String,
    pub label: String,
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<LabelProbability>>,
    pub latency_us: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LabelProbability {
    pub label: String,
    pub probability: f32,
}

impl ClassifyResponse {
    fn new(request_id: String, pipeline: String, result: ClassificationResult) -> Self {
        let probabilities = result.metadata.all_scores.map(|scores| {
            scores
                .into_iter()
                .map(|(label, probability)| LabelProbability { label, probability })
                .collect()
        });

        Self {
            request_id,
            pipeline,
            label: result.label,
            index: result.index,
            score: result.score,
            probabilities,
            latency_us: result.latency_us,
        }
    }
}

async fn classify(
    State(state): State<AppState>,
    Query(params): Query<ClassifyParams>,
    body: Bytes,
) -> Result<Json<ClassifyResponse>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();

    let pipeline = state
        .registry
        .get(params.pipeline.as_deref())
        .ok_or_else(|| {
            AppError::NotFound(match &params.pipeline {
                Some(name) => format!("Unknown pipeline '{}'", name),
                None => "No default pipeline configured".to_string(),
            })
        })?;
    let name = pipeline.name().to_string();

    debug!(
        request_id = %request_id,
        pipeline = %name,
        bytes = body.len(),
        "Classification request"
    );

    // Inference is CPU-bound and synchronous
    let result = tokio::task::spawn_blocking(move || pipeline.classify_detailed(&body))
        .await
        .map_err(|e| AppError::Internal(format!("Inference task failed: {}", e)))?;

    let elapsed_us = start.elapsed().as_micros() as f64;
    metrics::histogram!("nubrain_request_latency_us", "pipeline" => name.clone())
        .record(elapsed_us);

    match result {
        Ok(result) => {
            metrics::counter!(
                "nubrain_requests_total",
                "pipeline" => name.clone(),
                "outcome" => "ok"
            )
            .increment(1);
            metrics::counter!(
                "nubrain_predictions_total",
                "pipeline" => name.clone(),
                "label" => result.label.clone()
            )
            .increment(1);

            info!(
                request_id = %request_id,
                pipeline = %name,
                label = %result.label,
                latency_us = result.latency_us,
                "Classified image"
            );

            Ok(Json(ClassifyResponse::new(request_id, name, result)))
        }
        Err(err) => {
            let outcome = if err.is_rejection() {
                "rejected"
            } else {
                "error"
            };
            metrics::counter!(
                "nubrain_requests_total",
                "pipeline" => name.clone(),
                "outcome" => outcome
            )
            .increment(1);

            Err(AppError::from(err))
        }
    }
}

async fn fallback() -> AppError {
    AppError::NotFound("Not found".to_string())
}

/// Error handling
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Unprocessable(String),
    Internal(String),
}

impl From<nubrain_core::Error> for AppError {
    fn from(err: nubrain_core::Error) -> Self {
        if err.is_rejection() {
            warn!("Rejected input: {}", err);
            AppError::Unprocessable(err.to_string())
        } else {
            error!("Inference failed: {}", err);
            AppError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_image", msg)
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = json!({
            "error": {
                "message": message,
                "type": kind,
            }
        });

        (status, Json(body)).into_response()
    }
}
