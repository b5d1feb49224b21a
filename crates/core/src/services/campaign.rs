//! Campaign service.
//!
//! Validates start requests, resolves the recipient set and sender pool,
//! and creates the job row. Everything after that belongs to the dispatcher.

use mailops_common::{AppError, AppResult, IdGenerator};
use mailops_db::entities::job::{self, JobType};
use mailops_db::repositories::JobRepository;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::resolver::{RecipientResolver, ResolvedCampaign};

/// Immutable campaign configuration, captured at creation and stored on the
/// job row. Validated once here; the dispatcher reads it back as-is.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CampaignParams {
    /// Display name on the From header.
    #[validate(length(min = 1, max = 256))]
    pub from_name: String,

    /// Subject line.
    #[validate(length(min = 1, max = 998))]
    pub subject: String,

    /// HTML body before tracking rewrite.
    #[validate(length(min = 1))]
    pub html_content: String,

    /// Recipients per batch.
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 500))]
    pub batch_size: u64,

    /// Sleep between batches, in milliseconds.
    #[serde(default = "default_batch_delay_ms")]
    #[validate(range(max = 3_600_000))]
    pub batch_delay_ms: u64,

    /// Restrict recipients to one list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_name: Option<String>,

    /// Restrict recipients to one geo tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<String>,

    /// 1-based inclusive range start over the filtered recipient set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_offset: Option<i64>,

    /// 1-based inclusive range end over the filtered recipient set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_limit: Option<i64>,

    /// Explicit sender account pool. Wins over `domain`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_ids: Option<Vec<String>>,

    /// Pool by sending domain when no explicit accounts are given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// From-name variants for content rotation. Used only when non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_names: Option<Vec<String>>,

    /// Subject variants for content rotation. Used only when non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<String>>,
}

const fn default_batch_size() -> u64 {
    50
}

const fn default_batch_delay_ms() -> u64 {
    1000
}

/// Input for starting a campaign.
#[derive(Debug, Clone)]
pub struct StartCampaignInput {
    /// Which transmission backend runs this campaign.
    pub job_type: JobType,
    /// Campaign configuration.
    pub params: CampaignParams,
}

/// Campaign service.
#[derive(Clone)]
pub struct CampaignService {
    job_repo: JobRepository,
    resolver: RecipientResolver,
    id_gen: IdGenerator,
}

impl CampaignService {
    /// Create a new campaign service.
    #[must_use]
    pub const fn new(job_repo: JobRepository, resolver: RecipientResolver) -> Self {
        Self {
            job_repo,
            resolver,
            id_gen: IdGenerator::new(),
        }
    }

    /// Validate a start request, resolve it, and persist the pending job.
    ///
    /// Returns the created job together with the resolution, so the caller
    /// can hand both to the dispatcher without resolving twice.
    pub async fn start(
        &self,
        input: StartCampaignInput,
    ) -> AppResult<(job::Model, ResolvedCampaign)> {
        if !input.job_type.is_campaign() {
            return Err(AppError::Validation(format!(
                "job type {:?} is not a campaign send",
                input.job_type
            )));
        }
        input.params.validate()?;

        let resolved = self.resolver.resolve(&input.params).await?;
        let total_items = resolved.recipients.len() as i64;

        let params = serde_json::to_value(&input.params)
            .map_err(|e| AppError::Internal(format!("failed to serialize params: {e}")))?;

        let job = self
            .job_repo
            .create(&self.id_gen.generate(), input.job_type, params, total_items)
            .await?;

        tracing::info!(
            job_id = %job.id,
            job_type = ?job.job_type,
            total_items,
            pool_size = resolved.sender_pool.len(),
            "Campaign job created"
        );

        Ok((job, resolved))
    }

    /// Fetch a job by ID.
    pub async fn get(&self, id: &str) -> AppResult<job::Model> {
        self.job_repo.get_by_id(id).await
    }

    /// List the most recent jobs.
    pub async fn list(&self, limit: u64) -> AppResult<Vec<job::Model>> {
        self.job_repo.list_recent(limit).await
    }

    /// Parse the stored params back out of a job row.
    pub fn params_of(job: &job::Model) -> AppResult<CampaignParams> {
        serde_json::from_value(job.params.clone())
            .map_err(|e| AppError::Internal(format!("job {} has corrupt params: {e}", job.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CampaignParams {
        CampaignParams {
            from_name: "Acme Deals".to_string(),
            subject: "June offers inside".to_string(),
            html_content: "<html><body>Hi!</body></html>".to_string(),
            batch_size: 50,
            batch_delay_ms: 1000,
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

    #[test]
    fn test_params_validation() {
        assert!(params().validate().is_ok());

        let mut bad = params();
        bad.from_name = String::new();
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.batch_size = 0;
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.batch_size = 10_000;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_params_defaults_applied_when_omitted() {
        let p: CampaignParams = serde_json::from_value(serde_json::json!({
            "fromName": "Acme Deals",
            "subject": "June offers inside",
            "htmlContent": "<p>Hi</p>",
        }))
        .expect("deserialize");
        assert_eq!(p.batch_size, 50);
        assert_eq!(p.batch_delay_ms, 1000);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_params_round_trip() {
        let p = params();
        let json = serde_json::to_value(&p).expect("serialize");
        let back: CampaignParams = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.from_name, p.from_name);
        assert_eq!(back.batch_size, p.batch_size);
        assert!(back.list_name.is_none());
    }
}
