//! Background job entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is created but no dispatcher has claimed it yet.
    #[sea_orm(string_value = "pending")]
    Pending,
    /// A dispatcher task is processing this job.
    #[sea_orm(string_value = "running")]
    Running,
    /// Job was paused by an operator; resumable from its checkpoint.
    #[sea_orm(string_value = "paused")]
    Paused,
    /// All recipients were processed.
    #[sea_orm(string_value = "completed")]
    Completed,
    /// A job-level condition made further progress impossible.
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Job was cancelled by an operator. Terminal.
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl JobStatus {
    /// Whether this status is terminal.
    ///
    /// `failed` is terminal for the dispatcher, but an operator may still
    /// resume a failed job after quota/eligibility changes (see
    /// [`Self::can_transition_to`]).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine permits a transition from `self` to `to`.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            // Dispatcher claims the job.
            (Self::Pending, Self::Running)
            // Pause / resume.
            | (Self::Running, Self::Paused)
            | (Self::Paused, Self::Running)
            // Cancel from any non-terminal status.
            | (Self::Pending | Self::Running | Self::Paused, Self::Cancelled)
            // Loop outcomes.
            | (Self::Running, Self::Completed | Self::Failed)
            // Operator resume after a quota-exhaustion failure; the
            // checkpoint is preserved so the run continues where it stopped.
            | (Self::Failed, Self::Running) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Kind of background job.
///
/// Campaign sends come in two flavors selected by the transmission backend.
/// Other maintenance job types share this store but not the send dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Campaign send via the delegated Gmail API.
    #[sea_orm(string_value = "campaign_gmail_api")]
    CampaignGmailApi,
    /// Campaign send via an authenticated SMTP relay.
    #[sea_orm(string_value = "campaign_smtp_relay")]
    CampaignSmtpRelay,
    /// Maintenance job (cleanup, re-aggregation, ...).
    #[sea_orm(string_value = "maintenance")]
    Maintenance,
}

impl JobType {
    /// Whether this job type is executed by the campaign send dispatcher.
    #[must_use]
    pub const fn is_campaign(self) -> bool {
        matches!(self, Self::CampaignGmailApi | Self::CampaignSmtpRelay)
    }
}

/// A background job.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Kind of job.
    pub job_type: JobType,

    /// Current status.
    #[sea_orm(indexed)]
    pub status: JobStatus,

    /// Immutable campaign configuration captured at creation.
    #[sea_orm(column_type = "JsonBinary")]
    pub params: Json,

    /// Checkpoint: recipients attempted so far. Monotonically non-decreasing.
    #[sea_orm(default_value = 0)]
    pub processed_items: i64,

    /// Total recipients resolved at creation. Fixed for the job's lifetime.
    pub total_items: i64,

    /// Error message, set only on terminal failure.
    #[sea_orm(nullable)]
    pub error_message: Option<String>,

    /// When this job was created.
    pub created_at: DateTimeWithTimeZone,

    /// When a dispatcher first claimed this job.
    #[sea_orm(nullable)]
    pub started_at: Option<DateTimeWithTimeZone>,

    /// When this job reached a terminal status.
    #[sea_orm(nullable)]
    pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::send_attempt::Entity")]
    SendAttempt,
}

impl Related<super::send_attempt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SendAttempt.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Derived progress percentage: `floor(processed / total * 100)`.
    #[must_use]
    pub const fn progress(&self) -> i32 {
        if self.total_items <= 0 {
            return 0;
        }
        (self.processed_items * 100 / self.total_items) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use JobStatus::{Cancelled, Completed, Failed, Paused, Pending, Running};

        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Cancelled));
        assert!(Paused.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Running));

        // Terminal statuses admit no further transitions (except the
        // explicit failed -> running resume).
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Paused));

        // No shortcuts.
        assert!(!Pending.can_transition_to(Paused));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }

    #[test]
    fn test_progress_derivation() {
        let mut job = Model {
            id: "j1".to_string(),
            job_type: JobType::CampaignSmtpRelay,
            status: JobStatus::Running,
            params: serde_json::json!({}),
            processed_items: 0,
            total_items: 10,
            error_message: None,
            created_at: chrono::Utc::now().into(),
            started_at: None,
            completed_at: None,
        };

        assert_eq!(job.progress(), 0);
        job.processed_items = 6;
        assert_eq!(job.progress(), 60);
        job.processed_items = 10;
        assert_eq!(job.progress(), 100);

        // floor semantics
        job.total_items = 3;
        job.processed_items = 2;
        assert_eq!(job.progress(), 66);

        // empty jobs never divide by zero
        job.total_items = 0;
        assert_eq!(job.progress(), 0);
    }
}
