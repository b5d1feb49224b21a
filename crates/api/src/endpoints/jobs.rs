//! Job inspection and control endpoints.
//!
//! Control handlers request transitions; for a running job the dispatcher
//! applies them at its next batch boundary, so the returned snapshot may
//! still show the pre-transition status. Subscribers on the SSE streams see
//! the definitive change when it lands.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use mailops_common::AppResult;
use mailops_core::progress::JobSnapshot;
use mailops_db::entities::send_attempt::{self, AttemptOutcome};
use serde::{Deserialize, Serialize};

use crate::{middleware::AppState, response::ApiResponse, sse};

const DEFAULT_LIST_LIMIT: u64 = 50;
const DEFAULT_ATTEMPT_PAGE: u64 = 100;

/// Query for listing jobs.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Maximum number of jobs to return, newest first.
    pub limit: Option<u64>,
}

/// Query for paging through a job's attempt log.
#[derive(Debug, Deserialize)]
pub struct ListAttemptsQuery {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Job snapshot enriched with attempt-log tallies.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetailResponse {
    #[serde(flatten)]
    pub snapshot: JobSnapshot,
    /// Recipients the provider accepted.
    pub sent_count: u64,
    /// Recipients that exhausted their retry budget.
    pub failed_count: u64,
}

/// One attempt-log row.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResponse {
    pub recipient_index: i64,
    pub to_email: String,
    pub from_account_id: String,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub sent_at: String,
}

impl From<send_attempt::Model> for AttemptResponse {
    fn from(attempt: send_attempt::Model) -> Self {
        Self {
            recipient_index: attempt.recipient_index,
            to_email: attempt.to_email,
            from_account_id: attempt.from_account_id,
            outcome: attempt.outcome,
            error_message: attempt.error_message,
            sent_at: attempt.sent_at.to_rfc3339(),
        }
    }
}

/// List recent jobs.
async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> AppResult<ApiResponse<Vec<JobSnapshot>>> {
    let jobs = state
        .campaign_service
        .list(query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(ApiResponse::ok(jobs.iter().map(JobSnapshot::from).collect()))
}

/// Fetch one job with its attempt tallies.
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<JobDetailResponse>> {
    let job = state.campaign_service.get(&id).await?;
    let sent_count = state
        .attempt_repo
        .count_by_job(&id, Some(AttemptOutcome::Sent))
        .await?;
    let failed_count = state
        .attempt_repo
        .count_by_job(&id, Some(AttemptOutcome::Failed))
        .await?;

    Ok(ApiResponse::ok(JobDetailResponse {
        snapshot: JobSnapshot::from(&job),
        sent_count,
        failed_count,
    }))
}

/// Page through a job's attempt log.
async fn list_attempts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListAttemptsQuery>,
) -> AppResult<ApiResponse<Vec<AttemptResponse>>> {
    // 404 for unknown jobs rather than an empty page.
    state.campaign_service.get(&id).await?;

    let attempts = state
        .attempt_repo
        .find_by_job(
            &id,
            query.limit.unwrap_or(DEFAULT_ATTEMPT_PAGE),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(ApiResponse::ok(
        attempts.into_iter().map(AttemptResponse::from).collect(),
    ))
}

/// Request a pause at the next batch boundary.
async fn pause_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<JobSnapshot>> {
    let job = state.engine.pause(&id).await?;
    Ok(ApiResponse::ok(JobSnapshot::from(&job)))
}

/// Resume a paused (or failed) job from its checkpoint.
async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<JobSnapshot>> {
    let job = state.engine.resume(&id).await?;
    Ok(ApiResponse::ok(JobSnapshot::from(&job)))
}

/// Cancel a job.
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<JobSnapshot>> {
    let job = state.engine.cancel(&id).await?;
    Ok(ApiResponse::ok(JobSnapshot::from(&job)))
}

/// Delete a terminal job and its attempt log.
async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.engine.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/stream", get(sse::all_jobs_stream))
        .route("/{id}", get(get_job).delete(delete_job))
        .route("/{id}/attempts", get(list_attempts))
        .route("/{id}/pause", post(pause_job))
        .route("/{id}/resume", post(resume_job))
        .route("/{id}/cancel", post(cancel_job))
        .route("/{id}/stream", get(sse::job_stream))
}
