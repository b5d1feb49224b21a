//! Batch dispatcher.
//!
//! One dispatcher task owns one running campaign end to end. The loop walks
//! the recipient list in fixed batches from the job's checkpoint, claims
//! quota per send, and observes control signals only at batch boundaries, so
//! every pause, cancel, or crash leaves the job at a batch-aligned
//! checkpoint it can resume from.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mailops_common::{AppError, AppResult};
use mailops_core::campaign::CampaignParams;
use mailops_core::progress::{JobSnapshot, ProgressBroadcaster};
use mailops_core::provider::{OutgoingEmail, ProviderAdapter, SendError};
use mailops_core::rewrite::{ContentRewriter, RewriteContext};
use mailops_core::rotation::RotationStrategy;
use mailops_db::entities::job::{self, JobStatus};
use mailops_db::entities::send_attempt::AttemptOutcome;
use mailops_db::entities::{recipient, sender_account};
use tokio::sync::watch;

use crate::control::ControlSignal;
use crate::retry::RetryConfig;
use crate::store::{AttemptLog, AttemptRecord, JobStore, SenderPool};

/// Bounded retries for checkpoint and attempt-log writes. A checkpoint that
/// cannot be persisted within this budget fails the job rather than drift
/// away from the durable state.
const PERSIST_RETRIES: u32 = 3;
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Everything a dispatcher task needs to run one campaign.
///
/// Built once at spawn time from the job row and its resolution; the
/// dispatcher never re-reads params or recipients mid-run.
pub struct CampaignRun {
    /// The job row as of spawn.
    pub job: job::Model,
    /// Parsed campaign params.
    pub params: CampaignParams,
    /// Recipients in deterministic send order.
    pub recipients: Vec<recipient::Model>,
    /// Sender accounts in rotation order.
    pub sender_pool: Vec<sender_account::Model>,
    /// Transmission backend for this job's type.
    pub provider: Arc<dyn ProviderAdapter>,
    /// Control signal for this job.
    pub control: watch::Receiver<ControlSignal>,
}

/// Batch dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    pool: Arc<dyn SenderPool>,
    attempts: Arc<dyn AttemptLog>,
    rewriter: Arc<dyn ContentRewriter>,
    rotation: Arc<dyn RotationStrategy>,
    progress: ProgressBroadcaster,
    retry: RetryConfig,
}

impl Dispatcher {
    /// Create a new dispatcher.
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        pool: Arc<dyn SenderPool>,
        attempts: Arc<dyn AttemptLog>,
        rewriter: Arc<dyn ContentRewriter>,
        rotation: Arc<dyn RotationStrategy>,
        progress: ProgressBroadcaster,
        retry: RetryConfig,
    ) -> Self {
        Self {
            jobs,
            pool,
            attempts,
            rewriter,
            rotation,
            progress,
            retry,
        }
    }

    /// Run one campaign to a stopping point: completed, paused, cancelled,
    /// or failed. Errors never escape; they terminate the job as `failed`
    /// with the error recorded on the row.
    pub async fn run(&self, run: CampaignRun) {
        let job_id = run.job.id.clone();

        if let Err(e) = self.run_inner(&run).await {
            tracing::error!(job_id = %job_id, error = %e, "Dispatcher aborted");
            match self
                .jobs
                .set_status(&job_id, JobStatus::Failed, Some(&e.to_string()))
                .await
            {
                Ok(job) => self.progress.publish(JobSnapshot::from(&job)).await,
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Could not mark job failed");
                }
            }
        }
    }

    async fn run_inner(&self, run: &CampaignRun) -> AppResult<()> {
        let job_id = run.job.id.as_str();

        // Claim the job. Losing this race (cancelled between spawn and
        // claim, or claimed by another dispatcher) is a clean exit.
        let job = match self.jobs.set_status(job_id, JobStatus::Running, None).await {
            Ok(job) => job,
            Err(AppError::InvalidTransition(msg)) => {
                tracing::info!(job_id, %msg, "Job no longer claimable, dispatcher exiting");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.progress.publish(JobSnapshot::from(&job)).await;

        let total = job.total_items;
        if (run.recipients.len() as i64) < total {
            return Err(AppError::Internal(format!(
                "recipient set resolved to {} rows, job expects {total}",
                run.recipients.len()
            )));
        }

        let batch_size = run.params.batch_size.max(1) as i64;
        let mut checkpoint = job.processed_items;
        // Start the rotation where the recipient order left off, so a
        // resumed job continues the same account interleaving.
        let mut rotation_cursor = checkpoint as usize;

        tracing::info!(
            job_id,
            checkpoint,
            total,
            batch_size,
            pool_size = run.sender_pool.len(),
            provider = run.provider.name(),
            "Dispatching campaign"
        );

        loop {
            let signal = *run.control.borrow();
            match signal {
                ControlSignal::Cancel => {
                    let job = self.jobs.set_status(job_id, JobStatus::Cancelled, None).await?;
                    tracing::info!(job_id, checkpoint, "Campaign cancelled");
                    self.progress.publish(JobSnapshot::from(&job)).await;
                    return Ok(());
                }
                ControlSignal::Pause => {
                    let job = self.jobs.set_status(job_id, JobStatus::Paused, None).await?;
                    tracing::info!(job_id, checkpoint, "Campaign paused");
                    self.progress.publish(JobSnapshot::from(&job)).await;
                    return Ok(());
                }
                ControlSignal::Run => {}
            }

            if checkpoint >= total {
                let job = self.jobs.set_status(job_id, JobStatus::Completed, None).await?;
                tracing::info!(job_id, total, "Campaign completed");
                self.progress.publish(JobSnapshot::from(&job)).await;
                return Ok(());
            }

            let end = (checkpoint + batch_size).min(total);
            // Accounts whose latest outcome in this batch was a fatal error;
            // a later success through the same account clears the mark.
            let mut fatal_accounts: HashSet<String> = HashSet::new();
            for index in checkpoint..end {
                let recipient = &run.recipients[index as usize];

                let Some(account) = self
                    .claim_account(&run.sender_pool, &mut rotation_cursor)
                    .await?
                else {
                    // Checkpoint stays at the last batch boundary; the
                    // attempt log keeps this partial batch deduplicated
                    // on resume.
                    let job = self
                        .jobs
                        .set_status(
                            job_id,
                            JobStatus::Failed,
                            Some("every sender account in the pool is exhausted or inactive"),
                        )
                        .await?;
                    tracing::warn!(job_id, checkpoint, index, "Sender pool exhausted");
                    self.progress.publish(JobSnapshot::from(&job)).await;
                    return Ok(());
                };

                let mail = self.render(job_id, &run.params, recipient, index as u64);
                let result = self
                    .send_with_retry(run.provider.as_ref(), account, &mail)
                    .await;

                let (outcome, error) = match result {
                    Ok(()) => {
                        fatal_accounts.remove(&account.id);
                        (AttemptOutcome::Sent, None)
                    }
                    Err(e) => {
                        if !e.is_retryable() {
                            fatal_accounts.insert(account.id.clone());
                        }
                        tracing::warn!(
                            job_id,
                            index,
                            to = %recipient.email,
                            account_id = %account.id,
                            error = %e,
                            "Recipient send failed"
                        );
                        (AttemptOutcome::Failed, Some(e.to_string()))
                    }
                };

                self.record_attempt(AttemptRecord {
                    job_id,
                    recipient_index: index,
                    to_email: &recipient.email,
                    from_account_id: &account.id,
                    outcome,
                    error_message: error.as_deref(),
                })
                .await?;
            }

            // Every pool member's last word this batch was a fatal error:
            // the pool itself is broken (revoked credentials, blocked
            // sender), not individual recipients. Checkpoint stays at the
            // batch start so a resume after the operator intervenes retries
            // the batch; the attempt upsert deduplicates the replay.
            if !run.sender_pool.is_empty() && fatal_accounts.len() == run.sender_pool.len() {
                let job = self
                    .jobs
                    .set_status(
                        job_id,
                        JobStatus::Failed,
                        Some("every sender account in the pool failed fatally"),
                    )
                    .await?;
                tracing::error!(job_id, checkpoint, "Every sender account failed fatally");
                self.progress.publish(JobSnapshot::from(&job)).await;
                return Ok(());
            }

            checkpoint = end;
            let Some(job) = self.persist_checkpoint(job_id, checkpoint).await? else {
                return Ok(());
            };
            self.progress.publish(JobSnapshot::from(&job)).await;

            if checkpoint < total && run.params.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(run.params.batch_delay_ms)).await;
            }
        }
    }

    /// Pick the next account with quota left, round-robin from the cursor.
    /// `None` when a full pass over the pool reserved nothing.
    async fn claim_account<'a>(
        &self,
        pool: &'a [sender_account::Model],
        cursor: &mut usize,
    ) -> AppResult<Option<&'a sender_account::Model>> {
        for _ in 0..pool.len() {
            let account = &pool[*cursor % pool.len()];
            *cursor += 1;

            if self.pool.reserve(&account.id).await? {
                return Ok(Some(account));
            }
            tracing::debug!(account_id = %account.id, "Account out of quota, rotating past");
        }
        Ok(None)
    }

    /// Render one message: pick rotation variants, rewrite the HTML.
    fn render(
        &self,
        job_id: &str,
        params: &CampaignParams,
        recipient: &recipient::Model,
        index: u64,
    ) -> OutgoingEmail {
        let from_name = params
            .from_names
            .as_deref()
            .and_then(|v| self.rotation.select(v, index))
            .unwrap_or(&params.from_name)
            .to_string();
        let subject = params
            .subjects
            .as_deref()
            .and_then(|v| self.rotation.select(v, index))
            .unwrap_or(&params.subject)
            .to_string();

        let ctx = RewriteContext {
            job_id: job_id.to_string(),
            recipient_id: recipient.id.clone(),
        };
        let html = self.rewriter.rewrite(&params.html_content, &ctx);

        OutgoingEmail {
            to: recipient.email.clone(),
            to_name: recipient.name.clone(),
            from_name,
            subject,
            html,
        }
    }

    /// Send with bounded retry on transient failures only.
    async fn send_with_retry(
        &self,
        provider: &dyn ProviderAdapter,
        account: &sender_account::Model,
        mail: &OutgoingEmail,
    ) -> Result<(), SendError> {
        let mut retries = 0u32;
        loop {
            match provider.send(account, mail).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && self.retry.should_retry(retries) => {
                    let delay = self.retry.delay_for_attempt(retries);
                    tracing::debug!(
                        provider = provider.name(),
                        account_id = %account.id,
                        error = %e,
                        ?delay,
                        "Transient send failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write an attempt row, retrying transient storage failures.
    async fn record_attempt(&self, attempt: AttemptRecord<'_>) -> AppResult<()> {
        let mut tries = 0u32;
        loop {
            match self.attempts.record(attempt.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tries += 1;
                    if tries >= PERSIST_RETRIES {
                        return Err(e);
                    }
                    tracing::warn!(
                        job_id = attempt.job_id,
                        index = attempt.recipient_index,
                        error = %e,
                        "Attempt write failed, retrying"
                    );
                    tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Advance the checkpoint, retrying transient storage failures.
    ///
    /// `Ok(None)` means the checkpoint is stale: another dispatcher owns the
    /// job now and this one must exit without touching the status.
    async fn persist_checkpoint(
        &self,
        job_id: &str,
        checkpoint: i64,
    ) -> AppResult<Option<job::Model>> {
        let mut tries = 0u32;
        loop {
            match self.jobs.advance_checkpoint(job_id, checkpoint).await {
                Ok(job) => return Ok(Some(job)),
                Err(AppError::StaleCheckpoint(msg)) => {
                    tracing::warn!(job_id, %msg, "Checkpoint stale, yielding to the newer dispatcher");
                    return Ok(None);
                }
                Err(e) => {
                    tries += 1;
                    if tries >= PERSIST_RETRIES {
                        return Err(e);
                    }
                    tracing::warn!(job_id, checkpoint, error = %e, "Checkpoint write failed, retrying");
                    tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                }
            }
        }
    }
}
