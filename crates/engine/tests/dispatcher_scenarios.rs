//! End-to-end dispatcher behavior against in-memory stores and a scripted
//! provider: pause/resume continuity, restart-from-checkpoint, failure
//! handling, and pool exhaustion.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use mailops_common::{AppError, AppResult};
use mailops_core::campaign::CampaignParams;
use mailops_core::progress::ProgressBroadcaster;
use mailops_core::provider::{OutgoingEmail, ProviderAdapter, SendError};
use mailops_core::rewrite::NoopRewriter;
use mailops_core::rotation::RoundRobinRotation;
use mailops_db::entities::job::{self, JobStatus, JobType};
use mailops_db::entities::send_attempt::AttemptOutcome;
use mailops_db::entities::{recipient, sender_account};
use mailops_engine::control::ControlSignal;
use mailops_engine::dispatcher::{CampaignRun, Dispatcher};
use mailops_engine::retry::RetryConfig;
use mailops_engine::store::{AttemptLog, AttemptRecord, JobStore, SenderPool};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// In-memory fakes

#[derive(Default)]
struct MemJobStore {
    jobs: Mutex<HashMap<String, job::Model>>,
}

impl MemJobStore {
    fn insert(&self, job: job::Model) {
        self.jobs.lock().unwrap().insert(job.id.clone(), job);
    }

    fn snapshot(&self, id: &str) -> job::Model {
        self.jobs.lock().unwrap().get(id).unwrap().clone()
    }
}

#[async_trait]
impl JobStore for MemJobStore {
    async fn get(&self, id: &str) -> AppResult<job::Model> {
        self.jobs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))
    }

    async fn advance_checkpoint(&self, id: &str, new_processed: i64) -> AppResult<job::Model> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))?;

        if new_processed < job.processed_items {
            return Err(AppError::StaleCheckpoint(format!(
                "{new_processed} is behind {}",
                job.processed_items
            )));
        }
        if new_processed > job.total_items {
            return Err(AppError::Validation("checkpoint exceeds total".to_string()));
        }
        job.processed_items = new_processed;
        Ok(job.clone())
    }

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> AppResult<job::Model> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))?;

        if !job.status.can_transition_to(status) {
            return Err(AppError::InvalidTransition(format!(
                "{} -> {status}",
                job.status
            )));
        }
        job.status = status;
        job.error_message = error_message.map(ToString::to_string);
        if status == JobStatus::Running && job.started_at.is_none() {
            job.started_at = Some(Utc::now().into());
        }
        if status.is_terminal() {
            job.completed_at = Some(Utc::now().into());
        }
        Ok(job.clone())
    }
}

#[derive(Default)]
struct MemSenderPool {
    // account id -> (used, limit)
    quotas: Mutex<HashMap<String, (i64, i64)>>,
}

impl MemSenderPool {
    fn set_limit(&self, id: &str, limit: i64) {
        let mut quotas = self.quotas.lock().unwrap();
        let entry = quotas.entry(id.to_string()).or_insert((0, 0));
        entry.1 = limit;
    }

    fn used(&self, id: &str) -> i64 {
        self.quotas.lock().unwrap().get(id).map_or(0, |q| q.0)
    }
}

#[async_trait]
impl SenderPool for MemSenderPool {
    async fn reserve(&self, account_id: &str) -> AppResult<bool> {
        let mut quotas = self.quotas.lock().unwrap();
        let Some((used, limit)) = quotas.get_mut(account_id) else {
            return Ok(false);
        };
        if *used >= *limit {
            return Ok(false);
        }
        *used += 1;
        Ok(true)
    }
}

#[derive(Debug, Clone)]
struct RecordedAttempt {
    to_email: String,
    from_account_id: String,
    outcome: AttemptOutcome,
}

#[derive(Default)]
struct MemAttemptLog {
    // (job id, recipient index) -> latest outcome, mirroring the upsert
    rows: Mutex<HashMap<(String, i64), RecordedAttempt>>,
}

impl MemAttemptLog {
    fn row(&self, job_id: &str, index: i64) -> Option<RecordedAttempt> {
        self.rows
            .lock()
            .unwrap()
            .get(&(job_id.to_string(), index))
            .cloned()
    }

    fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn sent_count(&self) -> usize {
        self.rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.outcome == AttemptOutcome::Sent)
            .count()
    }
}

#[async_trait]
impl AttemptLog for MemAttemptLog {
    async fn record(&self, attempt: AttemptRecord<'_>) -> AppResult<()> {
        self.rows.lock().unwrap().insert(
            (attempt.job_id.to_string(), attempt.recipient_index),
            RecordedAttempt {
                to_email: attempt.to_email.to_string(),
                from_account_id: attempt.from_account_id.to_string(),
                outcome: attempt.outcome,
            },
        );
        Ok(())
    }
}

/// Scripted provider: per-address failure plans, an optional gate that
/// blocks one address until released, plus a transcript of every
/// transmission that reached the wire.
#[derive(Default)]
struct ScriptedProvider {
    // to address -> remaining transient failures before success
    transient: Mutex<HashMap<String, u32>>,
    // addresses that always fail fatally
    fatal: Mutex<Vec<String>>,
    // addresses whose send blocks until the gate is released
    gates: Mutex<HashMap<String, Arc<tokio::sync::Notify>>>,
    sends: Mutex<Vec<(String, String)>>, // (to, account id)
}

impl ScriptedProvider {
    fn fail_transiently(&self, to: &str, times: u32) {
        self.transient.lock().unwrap().insert(to.to_string(), times);
    }

    fn fail_fatally(&self, to: &str) {
        self.fatal.lock().unwrap().push(to.to_string());
    }

    fn hold(&self, to: &str) -> Arc<tokio::sync::Notify> {
        let gate = Arc::new(tokio::sync::Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(to.to_string(), gate.clone());
        gate
    }

    fn sends(&self) -> Vec<(String, String)> {
        self.sends.lock().unwrap().clone()
    }

    fn delivered(&self, to: &str) -> usize {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == to)
            .count()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    async fn send(
        &self,
        account: &sender_account::Model,
        mail: &OutgoingEmail,
    ) -> Result<(), SendError> {
        let gate = self.gates.lock().unwrap().get(&mail.to).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fatal.lock().unwrap().contains(&mail.to) {
            return Err(SendError::Fatal("mailbox does not exist".to_string()));
        }
        {
            let mut transient = self.transient.lock().unwrap();
            if let Some(remaining) = transient.get_mut(&mail.to) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SendError::Transient("connection reset".to_string()));
                }
            }
        }
        self.sends
            .lock()
            .unwrap()
            .push((mail.to.clone(), account.id.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Fixtures

fn params(batch_size: u64) -> CampaignParams {
    CampaignParams {
        from_name: "Acme Deals".to_string(),
        subject: "Offers inside".to_string(),
        html_content: "<body>Hello!</body>".to_string(),
        batch_size,
        batch_delay_ms: 0,
        list_name: None,
        geo: None,
        recipient_offset: None,
        recipient_limit: None,
        account_ids: None,
        domain: None,
        from_names: None,
        subjects: None,
    }
}

fn make_job(id: &str, total: i64, batch_size: u64) -> job::Model {
    job::Model {
        id: id.to_string(),
        job_type: JobType::CampaignSmtpRelay,
        status: JobStatus::Pending,
        params: serde_json::to_value(params(batch_size)).unwrap(),
        processed_items: 0,
        total_items: total,
        error_message: None,
        created_at: Utc::now().into(),
        started_at: None,
        completed_at: None,
    }
}

fn recipients(n: usize) -> Vec<recipient::Model> {
    (0..n)
        .map(|i| recipient::Model {
            id: format!("r{i:03}"),
            email: format!("user{i}@example.com"),
            name: None,
            list_name: None,
            geo: None,
            unsubscribed: false,
            created_at: Utc::now().into(),
        })
        .collect()
}

fn account(id: &str) -> sender_account::Model {
    sender_account::Model {
        id: id.to_string(),
        email: format!("{id}@acme.example"),
        domain: "acme.example".to_string(),
        daily_send_limit: 1000,
        sends_today: 0,
        status: sender_account::AccountStatus::Active,
        smtp_host: Some("relay.acme.example".to_string()),
        smtp_port: Some(587),
        smtp_username: None,
        smtp_password: None,
        updated_at: Utc::now().into(),
    }
}

struct Harness {
    dispatcher: Dispatcher,
    jobs: Arc<MemJobStore>,
    pool: Arc<MemSenderPool>,
    attempts: Arc<MemAttemptLog>,
    provider: Arc<ScriptedProvider>,
    progress: ProgressBroadcaster,
    control_tx: watch::Sender<ControlSignal>,
    control_rx: watch::Receiver<ControlSignal>,
}

impl Harness {
    fn new() -> Self {
        let jobs = Arc::new(MemJobStore::default());
        let pool = Arc::new(MemSenderPool::default());
        let attempts = Arc::new(MemAttemptLog::default());
        let provider = Arc::new(ScriptedProvider::default());
        let progress = ProgressBroadcaster::new();
        let (control_tx, control_rx) = watch::channel(ControlSignal::Run);

        let retry = RetryConfig {
            max_retries: 2,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
            multiplier: 2.0,
        };

        let dispatcher = Dispatcher::new(
            jobs.clone(),
            pool.clone(),
            attempts.clone(),
            Arc::new(NoopRewriter),
            Arc::new(RoundRobinRotation),
            progress.clone(),
            retry,
        );

        Self {
            dispatcher,
            jobs,
            pool,
            attempts,
            provider,
            progress,
            control_tx,
            control_rx,
        }
    }

    fn campaign_run(
        &self,
        job_id: &str,
        recipients: Vec<recipient::Model>,
        sender_pool: Vec<sender_account::Model>,
    ) -> CampaignRun {
        let job = self.jobs.snapshot(job_id);
        let params = serde_json::from_value(job.params.clone()).unwrap();
        CampaignRun {
            job,
            params,
            recipients,
            sender_pool,
            provider: self.provider.clone(),
            control: self.control_rx.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scenarios

#[tokio::test]
async fn test_full_run_completes() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 20, 5));
    h.pool.set_limit("a1", 1000);

    h.dispatcher
        .run(h.campaign_run("j1", recipients(20), vec![account("a1")]))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_items, 20);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert_eq!(h.provider.sends().len(), 20);
    assert_eq!(h.attempts.sent_count(), 20);
}

#[tokio::test]
async fn test_pause_lands_on_batch_boundary_and_resume_finishes() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 20, 5));
    h.pool.set_limit("a1", 1000);

    // The second batch blocks on its first recipient until released, so the
    // job cannot outrun the pause request.
    let gate = h.provider.hold("user5@example.com");
    let mut snapshots = h.progress.subscribe_job("j1").await;
    let run = h.campaign_run("j1", recipients(20), vec![account("a1")]);
    let dispatcher = h.dispatcher.clone();
    let task = tokio::spawn(async move { dispatcher.run(run).await });

    loop {
        let snapshot = snapshots.recv().await.unwrap();
        if snapshot.processed_items >= 5 {
            break;
        }
    }
    h.control_tx.send(ControlSignal::Pause).unwrap();
    gate.notify_one();
    task.await.unwrap();

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.processed_items % 5, 0);
    let paused_at = job.processed_items;
    assert!(paused_at < 20);

    // Resume from the checkpoint; nobody hears from the engine twice.
    h.control_tx.send(ControlSignal::Run).unwrap();
    h.dispatcher
        .run(h.campaign_run("j1", recipients(20), vec![account("a1")]))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_items, 20);
    assert_eq!(h.provider.sends().len(), 20);
    for i in 0..20 {
        assert_eq!(h.provider.delivered(&format!("user{i}@example.com")), 1);
    }
}

#[tokio::test]
async fn test_restart_after_crash_resumes_from_checkpoint() {
    let h = Harness::new();
    // A job recovered after an unclean shutdown: demoted to paused with a
    // durable checkpoint of 10.
    let mut job = make_job("j1", 20, 5);
    job.status = JobStatus::Paused;
    job.processed_items = 10;
    job.started_at = Some(Utc::now().into());
    h.jobs.insert(job);
    h.pool.set_limit("a1", 1000);

    h.dispatcher
        .run(h.campaign_run("j1", recipients(20), vec![account("a1")]))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Completed);
    // Only the tail was transmitted.
    assert_eq!(h.provider.sends().len(), 10);
    assert_eq!(h.provider.delivered("user9@example.com"), 0);
    assert_eq!(h.provider.delivered("user10@example.com"), 1);
    assert!(h.attempts.row("j1", 9).is_none());
    assert!(h.attempts.row("j1", 10).is_some());
}

#[tokio::test]
async fn test_cancel_before_first_batch() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 20, 5));
    h.pool.set_limit("a1", 1000);
    h.control_tx.send(ControlSignal::Cancel).unwrap();

    h.dispatcher
        .run(h.campaign_run("j1", recipients(20), vec![account("a1")]))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.processed_items, 0);
    assert!(h.provider.sends().is_empty());
}

#[tokio::test]
async fn test_transient_failure_retried_to_success() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 3, 3));
    h.pool.set_limit("a1", 1000);
    // Two transient failures, then success: inside the retry budget.
    h.provider.fail_transiently("user1@example.com", 2);

    h.dispatcher
        .run(h.campaign_run("j1", recipients(3), vec![account("a1")]))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(h.attempts.sent_count(), 3);
    assert_eq!(h.attempts.row("j1", 1).unwrap().outcome, AttemptOutcome::Sent);
}

#[tokio::test]
async fn test_exhausted_retry_budget_records_failure_and_moves_on() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 3, 3));
    h.pool.set_limit("a1", 1000);
    // More transient failures than the budget allows.
    h.provider.fail_transiently("user1@example.com", 10);

    h.dispatcher
        .run(h.campaign_run("j1", recipients(3), vec![account("a1")]))
        .await;

    let job = h.jobs.snapshot("j1");
    // A per-recipient failure never fails the job.
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_items, 3);
    assert_eq!(h.attempts.count(), 3);
    let failed = h.attempts.row("j1", 1).unwrap();
    assert_eq!(failed.outcome, AttemptOutcome::Failed);
    assert_eq!(h.attempts.sent_count(), 2);
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 2, 2));
    h.pool.set_limit("a1", 1000);
    h.provider.fail_fatally("user0@example.com");

    h.dispatcher
        .run(h.campaign_run("j1", recipients(2), vec![account("a1")]))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Completed);
    let failed = h.attempts.row("j1", 0).unwrap();
    assert_eq!(failed.outcome, AttemptOutcome::Failed);
    // The fatal recipient consumed quota exactly once.
    assert_eq!(h.pool.used("a1"), 2);
}

#[tokio::test]
async fn test_fatal_errors_from_every_account_fail_the_job() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 4, 4));
    h.pool.set_limit("a1", 1000);
    h.pool.set_limit("a2", 1000);
    // Both accounts rejected on every recipient: broken credentials, not a
    // bad mailbox here and there.
    for i in 0..4 {
        h.provider.fail_fatally(&format!("user{i}@example.com"));
    }

    h.dispatcher
        .run(h.campaign_run("j1", recipients(4), vec![account("a1"), account("a2")]))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.as_deref().unwrap().contains("fatally"));
    // Checkpoint stays at the batch start; the logged attempts are
    // overwritten if the operator fixes the pool and resumes.
    assert_eq!(job.processed_items, 0);
    assert_eq!(h.attempts.count(), 4);
    assert_eq!(h.attempts.sent_count(), 0);
}

#[tokio::test]
async fn test_cancel_while_paused_keeps_checkpoint() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 10, 2));
    h.pool.set_limit("a1", 1000);

    // Hold the second batch so the pause request cannot be outrun.
    let gate = h.provider.hold("user2@example.com");
    let mut snapshots = h.progress.subscribe_job("j1").await;
    let run = h.campaign_run("j1", recipients(10), vec![account("a1")]);
    let dispatcher = h.dispatcher.clone();
    let task = tokio::spawn(async move { dispatcher.run(run).await });

    loop {
        let snapshot = snapshots.recv().await.unwrap();
        if snapshot.processed_items >= 2 {
            break;
        }
    }
    h.control_tx.send(ControlSignal::Pause).unwrap();
    gate.notify_one();
    task.await.unwrap();

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Paused);
    let paused_at = job.processed_items;
    assert!(paused_at < 10);
    let attempts_at_pause = h.attempts.count();

    // Cancelling a paused job is a direct status write; no dispatcher is
    // around to observe the signal.
    h.control_tx.send(ControlSignal::Cancel).unwrap();
    h.jobs
        .set_status("j1", JobStatus::Cancelled, None)
        .await
        .unwrap();

    // A stray respawn cannot claim the cancelled job and sends nothing.
    h.dispatcher
        .run(h.campaign_run("j1", recipients(10), vec![account("a1")]))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.processed_items, paused_at);
    assert_eq!(h.attempts.count(), attempts_at_pause);
    assert_eq!(h.provider.sends().len(), paused_at as usize);
}

#[tokio::test]
async fn test_rotation_interleaves_accounts() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 6, 6));
    h.pool.set_limit("a1", 1000);
    h.pool.set_limit("a2", 1000);

    h.dispatcher
        .run(h.campaign_run(
            "j1",
            recipients(6),
            vec![account("a1"), account("a2")],
        ))
        .await;

    let accounts: Vec<String> = h.provider.sends().into_iter().map(|(_, a)| a).collect();
    assert_eq!(accounts, vec!["a1", "a2", "a1", "a2", "a1", "a2"]);
}

#[tokio::test]
async fn test_exhausted_account_is_skipped_mid_batch() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 6, 6));
    h.pool.set_limit("a1", 2);
    h.pool.set_limit("a2", 1000);

    h.dispatcher
        .run(h.campaign_run(
            "j1",
            recipients(6),
            vec![account("a1"), account("a2")],
        ))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(h.pool.used("a1"), 2);
    assert_eq!(h.pool.used("a2"), 4);
}

#[tokio::test]
async fn test_pool_exhaustion_fails_job_at_checkpoint_then_resume_finishes() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 10, 5));
    // Quota for the first batch only.
    h.pool.set_limit("a1", 5);

    h.dispatcher
        .run(h.campaign_run("j1", recipients(10), vec![account("a1")]))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.as_deref().unwrap().contains("exhausted"));
    // The completed batch survived as the checkpoint.
    assert_eq!(job.processed_items, 5);
    assert_eq!(h.provider.sends().len(), 5);

    // Operator intervention: the daily reset restores quota, then resume.
    h.pool.set_limit("a1", 1000);
    {
        let mut quotas = h.pool.quotas.lock().unwrap();
        quotas.get_mut("a1").unwrap().0 = 0;
    }
    h.dispatcher
        .run(h.campaign_run("j1", recipients(10), vec![account("a1")]))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_items, 10);
    assert_eq!(h.provider.sends().len(), 10);
    for i in 0..10 {
        assert_eq!(h.provider.delivered(&format!("user{i}@example.com")), 1);
    }
}

#[tokio::test]
async fn test_empty_recipient_job_completes_immediately() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 0, 5));
    h.pool.set_limit("a1", 1000);

    h.dispatcher
        .run(h.campaign_run("j1", Vec::new(), vec![account("a1")]))
        .await;

    let job = h.jobs.snapshot("j1");
    assert_eq!(job.status, JobStatus::Completed);
    assert!(h.provider.sends().is_empty());
}

#[tokio::test]
async fn test_quota_shared_across_concurrent_jobs() {
    let h = Harness::new();
    h.jobs.insert(make_job("j1", 30, 5));
    h.jobs.insert(make_job("j2", 30, 5));
    // One account, quota for exactly 40 of the 60 recipients.
    h.pool.set_limit("a1", 40);

    let run1 = h.campaign_run("j1", recipients(30), vec![account("a1")]);
    let run2 = h.campaign_run("j2", recipients(30), vec![account("a1")]);
    let d1 = h.dispatcher.clone();
    let d2 = h.dispatcher.clone();
    let t1 = tokio::spawn(async move { d1.run(run1).await });
    let t2 = tokio::spawn(async move { d2.run(run2).await });
    t1.await.unwrap();
    t2.await.unwrap();

    // The ceiling holds no matter how the two loops interleaved.
    assert_eq!(h.pool.used("a1"), 40);
    assert_eq!(h.provider.sends().len(), 40);

    let j1 = h.jobs.snapshot("j1");
    let j2 = h.jobs.snapshot("j2");
    assert!(j1.status == JobStatus::Failed || j2.status == JobStatus::Failed);
}
