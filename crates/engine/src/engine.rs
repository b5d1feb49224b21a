//! The send engine: dispatcher spawning, the control plane, and startup
//! recovery.
//!
//! Control operations never mutate a running job's row directly; they flip
//! the job's control signal and let the owning dispatcher write the status
//! at its next batch boundary. Jobs without a live dispatcher (pending,
//! paused) are transitioned here.

use std::sync::Arc;

use mailops_common::{AppError, AppResult};
use mailops_core::campaign::CampaignService;
use mailops_core::progress::{JobSnapshot, ProgressBroadcaster};
use mailops_core::provider::ProviderAdapter;
use mailops_core::resolver::{RecipientResolver, ResolvedCampaign};
use mailops_db::entities::job::{self, JobStatus, JobType};
use mailops_db::repositories::JobRepository;

use crate::control::{ControlRegistry, ControlSignal};
use crate::dispatcher::{CampaignRun, Dispatcher};

/// The send engine.
#[derive(Clone)]
pub struct SendEngine {
    dispatcher: Dispatcher,
    control: ControlRegistry,
    jobs: JobRepository,
    resolver: RecipientResolver,
    progress: ProgressBroadcaster,
    gmail: Arc<dyn ProviderAdapter>,
    smtp: Arc<dyn ProviderAdapter>,
}

impl SendEngine {
    /// Create a new send engine.
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        control: ControlRegistry,
        jobs: JobRepository,
        resolver: RecipientResolver,
        progress: ProgressBroadcaster,
        gmail: Arc<dyn ProviderAdapter>,
        smtp: Arc<dyn ProviderAdapter>,
    ) -> Self {
        Self {
            dispatcher,
            control,
            jobs,
            resolver,
            progress,
            gmail,
            smtp,
        }
    }

    fn provider_for(&self, job_type: JobType) -> AppResult<Arc<dyn ProviderAdapter>> {
        match job_type {
            JobType::CampaignGmailApi => Ok(self.gmail.clone()),
            JobType::CampaignSmtpRelay => Ok(self.smtp.clone()),
            JobType::Maintenance => Err(AppError::Validation(
                "maintenance jobs have no transmission provider".to_string(),
            )),
        }
    }

    /// Spawn a dispatcher for a freshly created (or resumed) job.
    pub async fn spawn(&self, job: job::Model, resolved: ResolvedCampaign) -> AppResult<()> {
        let params = CampaignService::params_of(&job)?;
        let provider = self.provider_for(job.job_type)?;
        let control = self.control.register(&job.id).await;

        let run = CampaignRun {
            job,
            params,
            recipients: resolved.recipients,
            sender_pool: resolved.sender_pool,
            provider,
            control,
        };

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.run(run).await;
        });
        Ok(())
    }

    /// Request a pause. Only meaningful for a running job; the dispatcher
    /// applies it at the next batch boundary, so the returned job may still
    /// read `running`.
    pub async fn pause(&self, id: &str) -> AppResult<job::Model> {
        let job = self.jobs.get_by_id(id).await?;

        if job.status != JobStatus::Running {
            return Err(AppError::InvalidTransition(format!(
                "job {id}: cannot pause while {}",
                job.status
            )));
        }

        self.control.signal(id, ControlSignal::Pause).await;
        tracing::info!(job_id = id, "Pause requested");
        Ok(job)
    }

    /// Resume a paused job, or restart a failed one after the operator has
    /// dealt with the failure (quota reset, pool change). Re-resolves the
    /// campaign from its stored params and spawns a fresh dispatcher at the
    /// persisted checkpoint.
    pub async fn resume(&self, id: &str) -> AppResult<job::Model> {
        let job = self.jobs.get_by_id(id).await?;

        if !matches!(job.status, JobStatus::Paused | JobStatus::Failed) {
            return Err(AppError::InvalidTransition(format!(
                "job {id}: cannot resume while {}",
                job.status
            )));
        }

        let params = CampaignService::params_of(&job)?;
        let resolved = self.resolver.resolve(&params).await?;

        tracing::info!(
            job_id = id,
            checkpoint = job.processed_items,
            from_status = %job.status,
            "Resuming campaign"
        );
        self.spawn(job.clone(), resolved).await?;
        Ok(job)
    }

    /// Cancel a job. A running job is cancelled by its dispatcher at the
    /// next boundary; a pending or paused one is cancelled here directly.
    pub async fn cancel(&self, id: &str) -> AppResult<job::Model> {
        let job = self.jobs.get_by_id(id).await?;

        match job.status {
            JobStatus::Running => {
                self.control.signal(id, ControlSignal::Cancel).await;
                tracing::info!(job_id = id, "Cancel requested");
                Ok(job)
            }
            JobStatus::Pending | JobStatus::Paused => {
                self.control.signal(id, ControlSignal::Cancel).await;
                match self.jobs.set_status(id, JobStatus::Cancelled, None).await {
                    Ok(job) => {
                        tracing::info!(job_id = id, "Job cancelled");
                        self.progress.publish(JobSnapshot::from(&job)).await;
                        Ok(job)
                    }
                    // A dispatcher claimed the job between the read and the
                    // write; the signal reaches it at its next boundary.
                    Err(AppError::InvalidTransition(_)) => self.jobs.get_by_id(id).await,
                    Err(e) => Err(e),
                }
            }
            _ => Err(AppError::InvalidTransition(format!(
                "job {id}: cannot cancel while {}",
                job.status
            ))),
        }
    }

    /// Delete a terminal job and its attempt log.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.jobs.delete(id).await?;
        self.control.remove(id).await;
        tracing::info!(job_id = id, "Job deleted");
        Ok(())
    }

    /// Startup recovery.
    ///
    /// A job left `running` by an unclean shutdown is demoted to `paused`
    /// at its last persisted checkpoint and waits for an explicit resume.
    /// A `pending` job never got its first claim; its dispatcher is simply
    /// respawned.
    pub async fn recover(&self) -> AppResult<()> {
        let active = self.jobs.list_active().await?;

        for job in active {
            match job.status {
                JobStatus::Running => {
                    tracing::warn!(
                        job_id = %job.id,
                        checkpoint = job.processed_items,
                        "Found job left running by an unclean shutdown, pausing it"
                    );
                    let paused = self.jobs.set_status(&job.id, JobStatus::Paused, None).await?;
                    self.progress.publish(JobSnapshot::from(&paused)).await;
                }
                JobStatus::Pending if job.job_type.is_campaign() => {
                    tracing::info!(job_id = %job.id, "Restarting pending job");
                    let params = CampaignService::params_of(&job)?;
                    match self.resolver.resolve(&params).await {
                        Ok(resolved) => self.spawn(job, resolved).await?,
                        Err(e) => {
                            tracing::error!(
                                job_id = %job.id,
                                error = %e,
                                "Pending job no longer resolves, cancelling it"
                            );
                            self.jobs.set_status(&job.id, JobStatus::Cancelled, None).await?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
