//! Send attempt repository.

use std::sync::Arc;

use chrono::Utc;
use mailops_common::{AppError, AppResult};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

use crate::entities::send_attempt::AttemptOutcome;
use crate::entities::{SendAttempt, send_attempt};

/// Send attempt repository for database operations.
#[derive(Clone)]
pub struct SendAttemptRepository {
    db: Arc<DatabaseConnection>,
}

impl SendAttemptRepository {
    /// Create a new send attempt repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Record the outcome for one (job, recipient) pair.
    ///
    /// Upserts on `(job_id, recipient_index)`: a retried recipient
    /// overwrites its in-flight attempt instead of appending a duplicate,
    /// so exactly one row per pair ever exists.
    pub async fn record(
        &self,
        id: &str,
        job_id: &str,
        recipient_index: i64,
        to_email: &str,
        from_account_id: &str,
        outcome: AttemptOutcome,
        error_message: Option<&str>,
    ) -> AppResult<()> {
        let model = send_attempt::ActiveModel {
            id: Set(id.to_string()),
            job_id: Set(job_id.to_string()),
            recipient_index: Set(recipient_index),
            to_email: Set(to_email.to_string()),
            from_account_id: Set(from_account_id.to_string()),
            outcome: Set(outcome),
            error_message: Set(error_message.map(ToString::to_string)),
            sent_at: Set(Utc::now().into()),
        };

        SendAttempt::insert(model)
            .on_conflict(
                OnConflict::columns([
                    send_attempt::Column::JobId,
                    send_attempt::Column::RecipientIndex,
                ])
                .update_columns([
                    send_attempt::Column::ToEmail,
                    send_attempt::Column::FromAccountId,
                    send_attempt::Column::Outcome,
                    send_attempt::Column::ErrorMessage,
                    send_attempt::Column::SentAt,
                ])
                .to_owned(),
            )
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Attempts for a job, in recipient order.
    pub async fn find_by_job(
        &self,
        job_id: &str,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<send_attempt::Model>> {
        SendAttempt::find()
            .filter(send_attempt::Column::JobId.eq(job_id))
            .order_by_asc(send_attempt::Column::RecipientIndex)
            .limit(limit)
            .offset(offset)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count attempts for a job, optionally by outcome.
    pub async fn count_by_job(
        &self,
        job_id: &str,
        outcome: Option<AttemptOutcome>,
    ) -> AppResult<u64> {
        let mut query = SendAttempt::find().filter(send_attempt::Column::JobId.eq(job_id));

        if let Some(outcome) = outcome {
            query = query.filter(send_attempt::Column::Outcome.eq(outcome));
        }

        query
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Purge all attempts for a job (part of job deletion).
    pub async fn delete_by_job(&self, job_id: &str) -> AppResult<u64> {
        let result = SendAttempt::delete_many()
            .filter(send_attempt::Column::JobId.eq(job_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }
}
