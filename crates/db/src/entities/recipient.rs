//! Recipient entity.
//!
//! The recipient store is maintained by the list-management screens; the
//! engine only reads it through the resolver.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A campaign recipient.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recipient")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Destination address.
    pub email: String,

    /// Display name.
    #[sea_orm(nullable)]
    pub name: Option<String>,

    /// List this recipient was imported into.
    #[sea_orm(indexed, nullable)]
    pub list_name: Option<String>,

    /// Geo tag (country code) for campaign targeting.
    #[sea_orm(indexed, nullable)]
    pub geo: Option<String>,

    /// Unsubscribed recipients are never resolved into a campaign.
    #[sea_orm(default_value = false)]
    pub unsubscribed: bool,

    /// Import time; part of the deterministic resolver order.
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
