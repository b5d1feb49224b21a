//! HTTP API layer for mailops-rs.
//!
//! This crate provides the campaign control plane and live progress:
//!
//! - **Endpoints**: campaign creation and job control (pause/resume/cancel)
//! - **Middleware**: request logging
//! - **SSE**: per-job and multiplexed progress streams
//!
//! Built on Axum 0.8.

pub mod endpoints;
pub mod middleware;
pub mod response;
pub mod sse;

pub use endpoints::router;
pub use middleware::AppState;
