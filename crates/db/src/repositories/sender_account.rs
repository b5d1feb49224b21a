//! Sender account repository.
//!
//! Holds the quota tracker: `reserve` is the single atomic increment through
//! which every send, from every concurrent job, claims quota.

use std::sync::Arc;

use chrono::Utc;
use mailops_common::{AppError, AppResult};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use crate::entities::sender_account::AccountStatus;
use crate::entities::{SenderAccount, sender_account};

/// Sender account repository for database operations.
#[derive(Clone)]
pub struct SenderAccountRepository {
    db: Arc<DatabaseConnection>,
}

impl SenderAccountRepository {
    /// Create a new sender account repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a sender account by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<sender_account::Model>> {
        SenderAccount::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a sender account by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<sender_account::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Sender account {id} not found")))
    }

    /// Find accounts by an explicit ID set, in ID order.
    pub async fn find_by_ids(&self, ids: &[String]) -> AppResult<Vec<sender_account::Model>> {
        SenderAccount::find()
            .filter(sender_account::Column::Id.is_in(ids.iter().map(String::as_str)))
            .order_by_asc(sender_account::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Eligible accounts: `active`, optionally restricted to a domain.
    ///
    /// Ordered by ID so the dispatcher's round-robin rotation is
    /// deterministic.
    pub async fn eligible_accounts(
        &self,
        domain: Option<&str>,
    ) -> AppResult<Vec<sender_account::Model>> {
        let mut query = SenderAccount::find()
            .filter(sender_account::Column::Status.eq(AccountStatus::Active))
            .order_by_asc(sender_account::Column::Id);

        if let Some(domain) = domain {
            query = query.filter(sender_account::Column::Domain.eq(domain));
        }

        query
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Atomically claim one send against the account's daily quota.
    ///
    /// Returns `false` without any mutation when the account is not active
    /// or its quota is already spent. This is the only hot-path mutation of
    /// `sends_today` and the synchronization point between concurrent jobs
    /// sharing an account.
    pub async fn reserve(&self, id: &str) -> AppResult<bool> {
        let result = SenderAccount::update_many()
            .col_expr(
                sender_account::Column::SendsToday,
                Expr::col(sender_account::Column::SendsToday).add(1),
            )
            .col_expr(
                sender_account::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(sender_account::Column::Id.eq(id))
            .filter(sender_account::Column::Status.eq(AccountStatus::Active))
            .filter(
                Expr::col(sender_account::Column::SendsToday)
                    .lt(Expr::col(sender_account::Column::DailySendLimit)),
            )
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Ok(false);
        }

        // Derive quota_exceeded when the increment landed on the limit.
        SenderAccount::update_many()
            .col_expr(
                sender_account::Column::Status,
                Expr::value(AccountStatus::QuotaExceeded),
            )
            .filter(sender_account::Column::Id.eq(id))
            .filter(
                Expr::col(sender_account::Column::SendsToday)
                    .gte(Expr::col(sender_account::Column::DailySendLimit)),
            )
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(true)
    }

    /// Daily reset sweep: zero every counter and restore `quota_exceeded`
    /// accounts to `active`. Returns the number of accounts touched.
    pub async fn reset_daily(&self) -> AppResult<u64> {
        let reset = SenderAccount::update_many()
            .col_expr(sender_account::Column::SendsToday, Expr::value(0i64))
            .col_expr(
                sender_account::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(sender_account::Column::SendsToday.gt(0))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        SenderAccount::update_many()
            .col_expr(
                sender_account::Column::Status,
                Expr::value(AccountStatus::Active),
            )
            .filter(sender_account::Column::Status.eq(AccountStatus::QuotaExceeded))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(reset.rows_affected)
    }
}
