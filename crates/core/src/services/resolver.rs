//! Recipient resolver.
//!
//! Computes, at job-start time, the ordered recipient set and the eligible
//! sender pool for a campaign. Resolution failures reject the start request;
//! they never surface as a running-job failure.

use mailops_common::{AppError, AppResult};
use mailops_db::entities::sender_account::AccountStatus;
use mailops_db::entities::{recipient, sender_account};
use mailops_db::repositories::{RecipientRepository, SenderAccountRepository};

use crate::campaign::CampaignParams;

/// The resolved inputs for one campaign run.
#[derive(Debug, Clone)]
pub struct ResolvedCampaign {
    /// Recipients in deterministic send order.
    pub recipients: Vec<recipient::Model>,
    /// Sender accounts in ID order (the dispatcher's rotation order).
    pub sender_pool: Vec<sender_account::Model>,
}

/// Recipient resolver.
#[derive(Clone)]
pub struct RecipientResolver {
    recipient_repo: RecipientRepository,
    account_repo: SenderAccountRepository,
}

impl RecipientResolver {
    /// Create a new resolver.
    #[must_use]
    pub const fn new(
        recipient_repo: RecipientRepository,
        account_repo: SenderAccountRepository,
    ) -> Self {
        Self {
            recipient_repo,
            account_repo,
        }
    }

    /// Resolve the recipient set and sender pool for the given params.
    ///
    /// Filter order: list name, geo, then the optional 1-based inclusive
    /// index range. Empty results abort job creation with a validation
    /// error.
    pub async fn resolve(&self, params: &CampaignParams) -> AppResult<ResolvedCampaign> {
        let filtered = self
            .recipient_repo
            .find_filtered(params.list_name.as_deref(), params.geo.as_deref())
            .await?;

        let recipients = apply_index_range(
            filtered,
            params.recipient_offset,
            params.recipient_limit,
        );

        if recipients.is_empty() {
            return Err(AppError::Validation(
                "campaign resolves to an empty recipient set".to_string(),
            ));
        }

        let sender_pool = self.resolve_pool(params).await?;
        if sender_pool.is_empty() {
            return Err(AppError::Validation(
                "campaign resolves to an empty sender pool".to_string(),
            ));
        }

        Ok(ResolvedCampaign {
            recipients,
            sender_pool,
        })
    }

    /// Sender pool selection: explicit account IDs win, then domain, then
    /// every active account.
    async fn resolve_pool(
        &self,
        params: &CampaignParams,
    ) -> AppResult<Vec<sender_account::Model>> {
        if let Some(ids) = params.account_ids.as_ref().filter(|ids| !ids.is_empty()) {
            let accounts = self.account_repo.find_by_ids(ids).await?;

            if accounts.len() != ids.len() {
                return Err(AppError::Validation(
                    "one or more selected sender accounts do not exist".to_string(),
                ));
            }
            if let Some(bad) = accounts
                .iter()
                .find(|a| a.status == AccountStatus::Inactive)
            {
                return Err(AppError::Validation(format!(
                    "sender account {} is inactive",
                    bad.id
                )));
            }
            return Ok(accounts);
        }

        self.account_repo
            .eligible_accounts(params.domain.as_deref())
            .await
    }
}

/// Apply the optional 1-based inclusive `offset..=limit` range.
///
/// An invalid range (offset > limit, or either bound below 1) is ignored and
/// the full filtered set is used.
fn apply_index_range(
    recipients: Vec<recipient::Model>,
    offset: Option<i64>,
    limit: Option<i64>,
) -> Vec<recipient::Model> {
    let (Some(offset), Some(limit)) = (offset, limit) else {
        return recipients;
    };

    if offset <= 0 || limit <= 0 || offset > limit {
        tracing::warn!(offset, limit, "Ignoring invalid recipient index range");
        return recipients;
    }

    let start = (offset - 1) as usize;
    let end = (limit as usize).min(recipients.len());
    if start >= recipients.len() {
        return Vec::new();
    }

    recipients[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn recips(n: usize) -> Vec<recipient::Model> {
        (0..n)
            .map(|i| recipient::Model {
                id: format!("r{i:03}"),
                email: format!("user{i}@example.com"),
                name: None,
                list_name: Some("june".to_string()),
                geo: None,
                unsubscribed: false,
                created_at: Utc::now().into(),
            })
            .collect()
    }

    #[test]
    fn test_range_applied() {
        let out = apply_index_range(recips(10), Some(3), Some(7));
        assert_eq!(out.len(), 5);
        assert_eq!(out[0].id, "r002");
        assert_eq!(out[4].id, "r006");
    }

    #[test]
    fn test_range_clamped_to_set() {
        let out = apply_index_range(recips(5), Some(4), Some(100));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "r003");
    }

    #[test]
    fn test_range_past_end_is_empty() {
        let out = apply_index_range(recips(5), Some(10), Some(20));
        assert!(out.is_empty());
    }

    #[test]
    fn test_invalid_range_ignored() {
        // offset > limit
        assert_eq!(apply_index_range(recips(10), Some(7), Some(3)).len(), 10);
        // zero / negative bounds
        assert_eq!(apply_index_range(recips(10), Some(0), Some(5)).len(), 10);
        assert_eq!(apply_index_range(recips(10), Some(1), Some(-2)).len(), 10);
    }

    #[test]
    fn test_missing_range_ignored() {
        assert_eq!(apply_index_range(recips(10), Some(2), None).len(), 10);
        assert_eq!(apply_index_range(recips(10), None, Some(5)).len(), 10);
        assert_eq!(apply_index_range(recips(10), None, None).len(), 10);
    }
}
