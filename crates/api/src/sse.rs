//! Server-Sent Events (SSE) for live job progress.
//!
//! Two streams: one per job, and one multiplexed stream carrying every
//! job's snapshots tagged by id. Each connection gets the current snapshot
//! first, then live updates. A slow consumer misses intermediate snapshots
//! (latest wins); it never slows the dispatcher down.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use mailops_common::AppResult;
use mailops_core::progress::JobSnapshot;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::middleware::AppState;

fn snapshot_event(snapshot: &JobSnapshot) -> Event {
    Event::default()
        .json_data(snapshot)
        .unwrap_or_else(|_| Event::default().data("error"))
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(30))
        .text("ping")
}

/// Stream one job's snapshots. Emits the current snapshot on connect, then
/// every change until the client disconnects.
pub async fn job_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job = state.campaign_service.get(&id).await?;
    let rx = state.progress.subscribe_job(&id).await;

    let initial_snapshot = JobSnapshot::from(&job);
    let initial = stream::once(async move { Ok(snapshot_event(&initial_snapshot)) });

    let updates = BroadcastStream::new(rx)
        .filter_map(|result| result.ok().map(|snapshot| Ok(snapshot_event(&snapshot))));

    Ok(Sse::new(initial.chain(updates)).keep_alive(keep_alive()))
}

/// Stream every job's snapshots, tagged by id, over one connection.
pub async fn all_jobs_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.progress.subscribe_all();

    let initial = stream::once(async { Ok(Event::default().comment("connected")) });
    let updates = BroadcastStream::new(rx)
        .filter_map(|result| result.ok().map(|snapshot| Ok(snapshot_event(&snapshot))));

    Sse::new(initial.chain(updates)).keep_alive(keep_alive())
}
