//! Recipient repository.

use std::sync::Arc;

use mailops_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};

use crate::entities::{Recipient, recipient};

/// Recipient repository for database operations.
#[derive(Clone)]
pub struct RecipientRepository {
    db: Arc<DatabaseConnection>,
}

impl RecipientRepository {
    /// Create a new recipient repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Subscribed recipients matching the campaign filters.
    ///
    /// Ordered by `(created_at, id)` so two resolutions of the same params
    /// produce the same recipient sequence. Resume depends on this order.
    pub async fn find_filtered(
        &self,
        list_name: Option<&str>,
        geo: Option<&str>,
    ) -> AppResult<Vec<recipient::Model>> {
        let mut query = Recipient::find()
            .filter(recipient::Column::Unsubscribed.eq(false))
            .order_by_asc(recipient::Column::CreatedAt)
            .order_by_asc(recipient::Column::Id);

        if let Some(list_name) = list_name {
            query = query.filter(recipient::Column::ListName.eq(list_name));
        }
        if let Some(geo) = geo {
            query = query.filter(recipient::Column::Geo.eq(geo));
        }

        query
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Page through subscribed recipients matching the campaign filters.
    pub async fn find_filtered_page(
        &self,
        list_name: Option<&str>,
        geo: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<recipient::Model>> {
        let mut query = Recipient::find()
            .filter(recipient::Column::Unsubscribed.eq(false))
            .order_by_asc(recipient::Column::CreatedAt)
            .order_by_asc(recipient::Column::Id)
            .limit(limit)
            .offset(offset);

        if let Some(list_name) = list_name {
            query = query.filter(recipient::Column::ListName.eq(list_name));
        }
        if let Some(geo) = geo {
            query = query.filter(recipient::Column::Geo.eq(geo));
        }

        query
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count subscribed recipients matching the campaign filters.
    pub async fn count_filtered(
        &self,
        list_name: Option<&str>,
        geo: Option<&str>,
    ) -> AppResult<u64> {
        let mut query = Recipient::find().filter(recipient::Column::Unsubscribed.eq(false));

        if let Some(list_name) = list_name {
            query = query.filter(recipient::Column::ListName.eq(list_name));
        }
        if let Some(geo) = geo {
            query = query.filter(recipient::Column::Geo.eq(geo));
        }

        query
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
