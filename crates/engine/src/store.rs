//! Persistence seams for the dispatcher.
//!
//! The dispatcher loop talks to storage through three narrow traits so the
//! loop's semantics (checkpointing, quota claims, attempt logging) can be
//! exercised without a live database. The production implementations are
//! thin delegations to the repositories.

use async_trait::async_trait;
use mailops_common::{AppResult, IdGenerator};
use mailops_db::entities::job::{self, JobStatus};
use mailops_db::entities::send_attempt::AttemptOutcome;
use mailops_db::repositories::{JobRepository, SendAttemptRepository, SenderAccountRepository};

/// Durable job state as the dispatcher sees it.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch the current job row.
    async fn get(&self, id: &str) -> AppResult<job::Model>;

    /// Advance the checkpoint, guarded against regression.
    async fn advance_checkpoint(&self, id: &str, new_processed: i64) -> AppResult<job::Model>;

    /// Transition the job status, enforcing the state machine.
    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> AppResult<job::Model>;
}

/// The shared daily-quota tracker.
#[async_trait]
pub trait SenderPool: Send + Sync {
    /// Atomically claim one send against an account's daily quota.
    /// `Ok(false)` means the account has nothing left to give today.
    async fn reserve(&self, account_id: &str) -> AppResult<bool>;
}

/// One recipient outcome, ready to be written to the audit log.
#[derive(Debug, Clone)]
pub struct AttemptRecord<'a> {
    /// Owning job.
    pub job_id: &'a str,
    /// Position in the job's recipient order.
    pub recipient_index: i64,
    /// Destination address.
    pub to_email: &'a str,
    /// Account the send went through (or was last tried through).
    pub from_account_id: &'a str,
    /// Final per-recipient outcome.
    pub outcome: AttemptOutcome,
    /// Provider error on failure.
    pub error_message: Option<&'a str>,
}

/// The per-recipient audit log.
#[async_trait]
pub trait AttemptLog: Send + Sync {
    /// Record (or overwrite) the outcome for one (job, recipient) pair.
    async fn record(&self, attempt: AttemptRecord<'_>) -> AppResult<()>;
}

/// [`JobStore`] backed by the job repository.
#[derive(Clone)]
pub struct DbJobStore {
    repo: JobRepository,
}

impl DbJobStore {
    /// Wrap a job repository.
    #[must_use]
    pub const fn new(repo: JobRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl JobStore for DbJobStore {
    async fn get(&self, id: &str) -> AppResult<job::Model> {
        self.repo.get_by_id(id).await
    }

    async fn advance_checkpoint(&self, id: &str, new_processed: i64) -> AppResult<job::Model> {
        self.repo.advance_checkpoint(id, new_processed).await
    }

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> AppResult<job::Model> {
        self.repo.set_status(id, status, error_message).await
    }
}

/// [`SenderPool`] backed by the sender account repository.
#[derive(Clone)]
pub struct DbSenderPool {
    repo: SenderAccountRepository,
}

impl DbSenderPool {
    /// Wrap a sender account repository.
    #[must_use]
    pub const fn new(repo: SenderAccountRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl SenderPool for DbSenderPool {
    async fn reserve(&self, account_id: &str) -> AppResult<bool> {
        self.repo.reserve(account_id).await
    }
}

/// [`AttemptLog`] backed by the send attempt repository.
#[derive(Clone)]
pub struct DbAttemptLog {
    repo: SendAttemptRepository,
    id_gen: IdGenerator,
}

impl DbAttemptLog {
    /// Wrap a send attempt repository.
    #[must_use]
    pub const fn new(repo: SendAttemptRepository) -> Self {
        Self {
            repo,
            id_gen: IdGenerator::new(),
        }
    }
}

#[async_trait]
impl AttemptLog for DbAttemptLog {
    async fn record(&self, attempt: AttemptRecord<'_>) -> AppResult<()> {
        self.repo
            .record(
                &self.id_gen.generate(),
                attempt.job_id,
                attempt.recipient_index,
                attempt.to_email,
                attempt.from_account_id,
                attempt.outcome,
                attempt.error_message,
            )
            .await
    }
}
