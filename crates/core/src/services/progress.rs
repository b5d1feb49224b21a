//! Progress publisher.
//!
//! Fans job snapshots out to live subscribers. Delivery is best-effort and
//! non-blocking with respect to the dispatcher: a lagging receiver misses
//! intermediate snapshots (latest wins), it never applies backpressure to
//! the send loop.

use std::collections::HashMap;
use std::sync::Arc;

use mailops_db::entities::job;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};

/// Capacity of the multiplexed (all-jobs) channel.
const GLOBAL_CAPACITY: usize = 1000;

/// Capacity of a single-job channel.
const JOB_CAPACITY: usize = 100;

/// Point-in-time view of a job, as pushed to subscribers and returned by
/// the snapshot-fetch endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    /// Job ID; multiplexed subscribers key on this.
    pub id: String,
    /// Job type.
    #[serde(rename = "type")]
    pub job_type: job::JobType,
    /// Current status.
    pub status: job::JobStatus,
    /// Derived progress percentage.
    pub progress: i32,
    /// Checkpoint.
    pub processed_items: i64,
    /// Total recipients.
    pub total_items: i64,
    /// Campaign configuration captured at creation.
    pub params: serde_json::Value,
    /// Error message on terminal failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation time (RFC 3339).
    pub created_at: String,
    /// First claim time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Terminal time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<&job::Model> for JobSnapshot {
    fn from(job: &job::Model) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type,
            status: job.status,
            progress: job.progress(),
            processed_items: job.processed_items,
            total_items: job.total_items,
            params: job.params.clone(),
            error_message: job.error_message.clone(),
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Broadcast hub for job snapshots.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    /// All snapshots, tagged by job id. One multiplexed stream.
    global: broadcast::Sender<JobSnapshot>,
    /// Per-job channels, created on first subscription or publish.
    job_channels: Arc<RwLock<HashMap<String, broadcast::Sender<JobSnapshot>>>>,
}

impl ProgressBroadcaster {
    /// Create a new broadcaster.
    #[must_use]
    pub fn new() -> Self {
        let (global, _) = broadcast::channel(GLOBAL_CAPACITY);
        Self {
            global,
            job_channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish a snapshot. Called by the dispatcher on every checkpoint or
    /// status change; never blocks and never fails.
    pub async fn publish(&self, snapshot: JobSnapshot) {
        let _ = self.global.send(snapshot.clone());

        let channels = self.job_channels.read().await;
        if let Some(sender) = channels.get(&snapshot.id) {
            let _ = sender.send(snapshot);
        }
    }

    /// Subscribe to one job's snapshots.
    pub async fn subscribe_job(&self, job_id: &str) -> broadcast::Receiver<JobSnapshot> {
        let mut channels = self.job_channels.write().await;

        if let Some(sender) = channels.get(job_id) {
            return sender.subscribe();
        }

        let (sender, receiver) = broadcast::channel(JOB_CAPACITY);
        channels.insert(job_id.to_string(), sender);
        receiver
    }

    /// Subscribe to every job's snapshots, tagged by id.
    #[must_use]
    pub fn subscribe_all(&self) -> broadcast::Receiver<JobSnapshot> {
        self.global.subscribe()
    }

    /// Drop per-job channels nobody listens to anymore.
    pub async fn cleanup(&self) {
        let mut channels = self.job_channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mailops_db::entities::job::{JobStatus, JobType};

    fn job_model(processed: i64) -> job::Model {
        job::Model {
            id: "j1".to_string(),
            job_type: JobType::CampaignSmtpRelay,
            status: JobStatus::Running,
            params: serde_json::json!({}),
            processed_items: processed,
            total_items: 20,
            error_message: None,
            created_at: Utc::now().into(),
            started_at: Some(Utc::now().into()),
            completed_at: None,
        }
    }

    #[test]
    fn test_snapshot_from_model() {
        let snapshot = JobSnapshot::from(&job_model(5));
        assert_eq!(snapshot.id, "j1");
        assert_eq!(snapshot.progress, 25);
        assert_eq!(snapshot.processed_items, 5);
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut model = job_model(5);
        model.params = serde_json::json!({"batchSize": 5});
        let json = serde_json::to_string(&JobSnapshot::from(&model)).unwrap();
        assert!(json.contains("\"type\":\"campaign_smtp_relay\""));
        assert!(json.contains("\"processedItems\":5"));
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"params\":{\"batchSize\":5}"));
    }

    #[tokio::test]
    async fn test_per_job_subscription() {
        let broadcaster = ProgressBroadcaster::new();
        let mut rx = broadcaster.subscribe_job("j1").await;

        broadcaster.publish(JobSnapshot::from(&job_model(3))).await;

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.processed_items, 3);
    }

    #[tokio::test]
    async fn test_multiplexed_subscription() {
        let broadcaster = ProgressBroadcaster::new();
        let mut rx = broadcaster.subscribe_all();

        let mut other = job_model(1);
        other.id = "j2".to_string();
        broadcaster.publish(JobSnapshot::from(&job_model(1))).await;
        broadcaster.publish(JobSnapshot::from(&other)).await;

        assert_eq!(rx.recv().await.unwrap().id, "j1");
        assert_eq!(rx.recv().await.unwrap().id, "j2");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let broadcaster = ProgressBroadcaster::new();
        // No receiver anywhere; must not error or block.
        broadcaster.publish(JobSnapshot::from(&job_model(1))).await;
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_channels() {
        let broadcaster = ProgressBroadcaster::new();
        {
            let _rx = broadcaster.subscribe_job("j1").await;
        }
        broadcaster.cleanup().await;
        assert!(broadcaster.job_channels.read().await.is_empty());
    }
}
