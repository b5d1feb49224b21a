//! API middleware.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use mailops_core::CampaignService;
use mailops_core::progress::ProgressBroadcaster;
use mailops_db::repositories::SendAttemptRepository;
use mailops_engine::SendEngine;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Campaign creation and lookup.
    pub campaign_service: CampaignService,
    /// Dispatcher spawning and the control plane.
    pub engine: SendEngine,
    /// Live progress fan-out for the SSE streams.
    pub progress: ProgressBroadcaster,
    /// Per-recipient audit log access.
    pub attempt_repo: SendAttemptRepository,
}

/// Request logging middleware.
pub async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let status = response.status();
    if status.is_server_error() {
        tracing::error!(%method, path, %status, "Request failed");
    } else {
        tracing::debug!(%method, path, %status, "Request handled");
    }
    response
}
