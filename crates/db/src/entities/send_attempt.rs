//! Send attempt entity.
//!
//! One row per (job, recipient): the immutable outcome record used for audit
//! and for bounce/click correlation by external collaborators. Retries
//! overwrite the in-flight attempt, never append duplicates.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Outcome of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The provider accepted the message.
    #[sea_orm(string_value = "sent")]
    Sent,
    /// The send failed after the bounded retry policy.
    #[sea_orm(string_value = "failed")]
    Failed,
}

/// A per-recipient send attempt record.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "send_attempt")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Job this attempt belongs to.
    #[sea_orm(indexed)]
    pub job_id: String,

    /// Zero-based index of the recipient in the job's resolved order.
    pub recipient_index: i64,

    /// Recipient address.
    pub to_email: String,

    /// Sender account the message went out through.
    pub from_account_id: String,

    /// Final outcome.
    pub outcome: AttemptOutcome,

    /// Error message when the outcome is `failed`.
    #[sea_orm(nullable)]
    pub error_message: Option<String>,

    /// When the outcome was recorded.
    pub sent_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::job::Entity",
        from = "Column::JobId",
        to = "super::job::Column::Id",
        on_delete = "Cascade"
    )]
    Job,
}

impl Related<super::job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
