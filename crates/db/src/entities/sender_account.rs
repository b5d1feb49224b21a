//! Sender account entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Eligibility status of a sender account.
///
/// `quota_exceeded` is derived: it is set by the same atomic update that
/// lands `sends_today` on the daily limit, and cleared by the daily reset
/// sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Eligible for sending.
    #[sea_orm(string_value = "active")]
    Active,
    /// Daily quota reached; restored to active by the reset sweep.
    #[sea_orm(string_value = "quota_exceeded")]
    QuotaExceeded,
    /// Disabled by an operator; never selected.
    #[sea_orm(string_value = "inactive")]
    Inactive,
}

/// A sending identity subject to a daily quota.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sender_account")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Address this identity sends as.
    pub email: String,

    /// Sending domain, used for pool selection and delegated-token scoping.
    #[sea_orm(indexed)]
    pub domain: String,

    /// Daily send ceiling.
    pub daily_send_limit: i64,

    /// Sends counted against today's quota. Mutated only by the atomic
    /// reserve update and the daily reset sweep.
    #[sea_orm(default_value = 0)]
    pub sends_today: i64,

    /// Current eligibility.
    #[sea_orm(indexed)]
    pub status: AccountStatus,

    /// Relay host for authenticated-relay sending.
    #[sea_orm(nullable)]
    pub smtp_host: Option<String>,

    /// Relay port.
    #[sea_orm(nullable)]
    pub smtp_port: Option<i32>,

    /// Relay username.
    #[sea_orm(nullable)]
    pub smtp_username: Option<String>,

    /// Relay password.
    #[sea_orm(nullable)]
    pub smtp_password: Option<String>,

    /// Last mutation time.
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Remaining quota for today.
    #[must_use]
    pub const fn remaining_today(&self) -> i64 {
        self.daily_send_limit - self.sends_today
    }
}
