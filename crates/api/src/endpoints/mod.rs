//! API endpoints.

mod campaigns;
mod jobs;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/campaigns", campaigns::router())
        .nest("/jobs", jobs::router())
}
