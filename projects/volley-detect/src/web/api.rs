use crate::dispatch::{Dispatcher, JobId, JobStatus};
use crate::web::error::ApiError;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAnalysisRequest {
    pub path: String,
    /// Model label as shown in the form, e.g. "YOLOv8 (pretrained model)".
    pub second_selection: String,
    pub confidence: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAnalysisRequest {
    #[serde(alias = "workerId")]
    pub job_id: JobId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub message: &'static str,
    pub job_id: JobId,
    /// Same value as `job_id`, under the name older form clients read.
    pub worker_id: JobId,
}

impl AnalysisResponse {
    fn new(message: &'static str, job_id: JobId) -> Self {
        Self {
            message,
            job_id,
            worker_id: job_id,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_jobs: usize,
}

/// Handler for POST /execute-python/:detection_target
pub async fn start_analysis_handler(
    State(dispatcher): State<Dispatcher>,
    Path(detection_target): Path<String>,
    Json(payload): Json<StartAnalysisRequest>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let job_id = dispatcher
        .start_job(
            &detection_target,
            &payload.second_selection,
            payload.path,
            payload.confidence,
        )
        .await?;

    Ok(Json(AnalysisResponse::new("Analysis started", job_id)))
}

/// Handler for POST /cancel-analysis
pub async fn cancel_analysis_handler(
    State(dispatcher): State<Dispatcher>,
    Json(payload): Json<CancelAnalysisRequest>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let status = dispatcher.cancel_job(payload.job_id).await?;

    Ok(Json(AnalysisResponse::new("Analysis cancelled", status.job_id)))
}

pub async fn list_jobs_handler(State(dispatcher): State<Dispatcher>) -> Json<Vec<JobStatus>> {
    Json(dispatcher.active_jobs())
}

pub async fn job_status_handler(
    State(dispatcher): State<Dispatcher>,
    Path(job_id): Path<JobId>,
) -> Result<Json<JobStatus>, ApiError> {
    dispatcher
        .job_status(job_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no job with id {}", job_id)))
}

pub async fn health_handler(State(dispatcher): State<Dispatcher>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_jobs: dispatcher.active_count(),
    })
}
