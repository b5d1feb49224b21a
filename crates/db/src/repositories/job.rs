//! Job repository.
//!
//! The durable job store. Status writes are validated against the job state
//! machine and checkpoint writes are guarded against regression, so a
//! dispatcher resumed twice cannot corrupt a job row.

use std::sync::Arc;

use chrono::Utc;
use mailops_common::{AppError, AppResult};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

use crate::entities::job::{JobStatus, JobType};
use crate::entities::{Job, job};

/// Job repository for database operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Arc<DatabaseConnection>,
}

impl JobRepository {
    /// Create a new job repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a job by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<job::Model>> {
        Job::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a job by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<job::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))
    }

    /// Create a new job in `pending` status with a zero checkpoint.
    pub async fn create(
        &self,
        id: &str,
        job_type: JobType,
        params: serde_json::Value,
        total_items: i64,
    ) -> AppResult<job::Model> {
        let model = job::ActiveModel {
            id: Set(id.to_string()),
            job_type: Set(job_type),
            status: Set(JobStatus::Pending),
            params: Set(params),
            processed_items: Set(0),
            total_items: Set(total_items),
            error_message: Set(None),
            created_at: Set(Utc::now().into()),
            started_at: Set(None),
            completed_at: Set(None),
        };

        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Advance the checkpoint to `new_processed`.
    ///
    /// The update is conditional on the stored checkpoint not exceeding the
    /// new value, so a stale dispatcher (resumed twice) can never move a
    /// checkpoint backwards.
    pub async fn advance_checkpoint(&self, id: &str, new_processed: i64) -> AppResult<job::Model> {
        let result = Job::update_many()
            .col_expr(job::Column::ProcessedItems, Expr::value(new_processed))
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::ProcessedItems.lte(new_processed))
            .filter(job::Column::TotalItems.gte(new_processed))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            let job = self.get_by_id(id).await?;
            if new_processed < job.processed_items {
                return Err(AppError::StaleCheckpoint(format!(
                    "job {id}: checkpoint {new_processed} is behind {}",
                    job.processed_items
                )));
            }
            return Err(AppError::Validation(format!(
                "job {id}: checkpoint {new_processed} exceeds total {}",
                job.total_items
            )));
        }

        self.get_by_id(id).await
    }

    /// Transition a job to a new status, enforcing the state machine.
    ///
    /// `started_at` is stamped on the first move into `running`,
    /// `completed_at` on any terminal move. The update is conditional on the
    /// status still being the one the transition was validated against, so a
    /// racing writer surfaces as `InvalidTransition` instead of clobbering.
    pub async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> AppResult<job::Model> {
        let current = self.get_by_id(id).await?;

        if !current.status.can_transition_to(status) {
            return Err(AppError::InvalidTransition(format!(
                "job {id}: {} -> {status}",
                current.status
            )));
        }

        let now = Utc::now();
        let mut update = Job::update_many()
            .col_expr(job::Column::Status, Expr::value(status))
            .col_expr(
                job::Column::ErrorMessage,
                Expr::value(error_message.map(ToString::to_string)),
            )
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.eq(current.status));

        if status == JobStatus::Running && current.started_at.is_none() {
            update = update.col_expr(job::Column::StartedAt, Expr::value(Some(now)));
        }
        if status.is_terminal() {
            update = update.col_expr(job::Column::CompletedAt, Expr::value(Some(now)));
        }

        let result = update
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            // Lost the race against another status writer.
            let job = self.get_by_id(id).await?;
            return Err(AppError::InvalidTransition(format!(
                "job {id}: {} -> {status}",
                job.status
            )));
        }

        self.get_by_id(id).await
    }

    /// List all non-terminal jobs, oldest first.
    ///
    /// Used by startup recovery to find jobs left `running` by an unclean
    /// shutdown.
    pub async fn list_active(&self) -> AppResult<Vec<job::Model>> {
        Job::find()
            .filter(job::Column::Status.is_in([
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Paused,
            ]))
            .order_by_asc(job::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List the most recent jobs.
    pub async fn list_recent(&self, limit: u64) -> AppResult<Vec<job::Model>> {
        Job::find()
            .order_by_desc(job::Column::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete a job. Only permitted from a terminal status; the job's send
    /// attempts go with it (FK cascade).
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let job = self.get_by_id(id).await?;

        if !job.status.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "job {id}: cannot delete while {}",
                job.status
            )));
        }

        Job::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn model(status: JobStatus, processed: i64) -> job::Model {
        job::Model {
            id: "j1".to_string(),
            job_type: JobType::CampaignSmtpRelay,
            status,
            params: serde_json::json!({}),
            processed_items: processed,
            total_items: 20,
            error_message: None,
            created_at: Utc::now().into(),
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_advance_checkpoint_regression_is_stale() {
        // The conditional update matches no row; the re-read shows the
        // stored checkpoint is ahead.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .append_query_results([vec![model(JobStatus::Running, 10)]])
            .into_connection();
        let repo = JobRepository::new(Arc::new(db));

        let err = repo.advance_checkpoint("j1", 5).await.unwrap_err();
        assert!(matches!(err, AppError::StaleCheckpoint(_)));
    }

    #[tokio::test]
    async fn test_advance_checkpoint_beyond_total_rejected() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .append_query_results([vec![model(JobStatus::Running, 10)]])
            .into_connection();
        let repo = JobRepository::new(Arc::new(db));

        let err = repo.advance_checkpoint("j1", 25).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_set_status_rejects_illegal_transition() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model(JobStatus::Completed, 20)]])
            .into_connection();
        let repo = JobRepository::new(Arc::new(db));

        let err = repo
            .set_status("j1", JobStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_set_status_lost_race_is_invalid_transition() {
        // Validated against `running`, but the conditional update hits zero
        // rows because another writer got there first.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([
                vec![model(JobStatus::Running, 5)],
                vec![model(JobStatus::Cancelled, 5)],
            ])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let repo = JobRepository::new(Arc::new(db));

        let err = repo
            .set_status("j1", JobStatus::Paused, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_delete_requires_terminal_status() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model(JobStatus::Running, 5)]])
            .into_connection();
        let repo = JobRepository::new(Arc::new(db));

        let err = repo.delete("j1").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }
}
