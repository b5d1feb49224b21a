//! Scheduled maintenance tasks.
//!
//! Two background loops: the daily quota reset sweep and the progress
//! channel cleanup. Both are fire-and-forget; a failed sweep logs and waits
//! for the next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use mailops_common::AppResult;
use mailops_core::progress::ProgressBroadcaster;
use mailops_db::repositories::SenderAccountRepository;
use tokio::time::interval;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between quota sweep checks (default: 1 hour). The sweep
    /// itself only fires when the UTC date has rolled over.
    pub quota_sweep_interval: Duration,
    /// Interval for progress channel cleanup (default: 5 minutes).
    pub channel_cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quota_sweep_interval: Duration::from_secs(3600),
            channel_cleanup_interval: Duration::from_secs(300),
        }
    }
}

/// Executor trait for scheduled maintenance.
#[async_trait::async_trait]
pub trait MaintenanceExecutor: Send + Sync {
    /// Reset daily quota counters. Returns the number of accounts touched.
    async fn reset_daily_quotas(&self) -> AppResult<u64>;

    /// Drop idle progress channels.
    async fn cleanup_progress_channels(&self);
}

/// Production executor backed by the account repository and broadcaster.
pub struct Maintenance {
    accounts: SenderAccountRepository,
    progress: ProgressBroadcaster,
}

impl Maintenance {
    /// Create a new maintenance executor.
    #[must_use]
    pub const fn new(accounts: SenderAccountRepository, progress: ProgressBroadcaster) -> Self {
        Self { accounts, progress }
    }
}

#[async_trait::async_trait]
impl MaintenanceExecutor for Maintenance {
    async fn reset_daily_quotas(&self) -> AppResult<u64> {
        self.accounts.reset_daily().await
    }

    async fn cleanup_progress_channels(&self) {
        self.progress.cleanup().await;
    }
}

/// Run the scheduler with the given configuration and executor.
pub async fn run_scheduler<E: MaintenanceExecutor + 'static>(
    config: SchedulerConfig,
    executor: Arc<E>,
) {
    let executor_quota = executor.clone();
    let executor_cleanup = executor;

    let quota_interval = config.quota_sweep_interval;
    let cleanup_interval = config.channel_cleanup_interval;

    // Spawn quota sweep task. Counters reset when the UTC day rolls over,
    // not on every tick; a restart mid-day must not hand back spent quota.
    tokio::spawn(async move {
        let mut interval = interval(quota_interval);
        let mut current_day: NaiveDate = Utc::now().date_naive();
        loop {
            interval.tick().await;
            let today = Utc::now().date_naive();
            if today == current_day {
                continue;
            }
            match executor_quota.reset_daily_quotas().await {
                Ok(count) => {
                    current_day = today;
                    tracing::info!(count, %today, "Reset daily send quotas");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to reset daily send quotas");
                }
            }
        }
    });

    // Spawn progress channel cleanup task
    tokio::spawn(async move {
        let mut interval = interval(cleanup_interval);
        loop {
            interval.tick().await;
            executor_cleanup.cleanup_progress_channels().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.quota_sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.channel_cleanup_interval, Duration::from_secs(300));
    }
}
