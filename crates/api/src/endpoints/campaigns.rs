//! Campaign creation endpoints.

use axum::{Json, Router, extract::State, routing::post};
use mailops_common::AppResult;
use mailops_core::campaign::{CampaignParams, StartCampaignInput};
use mailops_core::progress::JobSnapshot;
use mailops_db::entities::job::JobType;
use serde::Deserialize;

use crate::{middleware::AppState, response::ApiResponse};

/// Request to create and start a campaign.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    /// Which transmission backend runs this campaign.
    pub job_type: JobType,
    /// Campaign configuration.
    #[serde(flatten)]
    pub params: CampaignParams,
}

/// Create a campaign job and start dispatching it.
async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> AppResult<ApiResponse<JobSnapshot>> {
    let (job, resolved) = state
        .campaign_service
        .start(StartCampaignInput {
            job_type: req.job_type,
            params: req.params,
        })
        .await?;

    let snapshot = JobSnapshot::from(&job);
    state.engine.spawn(job, resolved).await?;
    Ok(ApiResponse::created(snapshot))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(create_campaign))
}
