//! Item store service.
//!
//! Owns the authoritative `available` flag. All mutual exclusion for
//! contended reservations is delegated to the storage layer's atomic
//! conditional update; the application holds no locks.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::item::{self, Entity as Item};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Input for creating an item (catalog seam).
#[derive(Debug, Deserialize)]
pub struct CreateItemInput {
    pub name: String,
    pub price: Decimal,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

/// Service for managing items and their authoritative availability.
#[derive(Clone)]
pub struct ItemService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ItemService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates a new item.
    #[instrument(skip(self))]
    pub async fn create_item(&self, input: CreateItemInput) -> Result<item::Model, ServiceError> {
        if input.name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Item name must not be empty".to_string(),
            ));
        }

        let item = item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            price: Set(input.price),
            available: Set(input.available),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };

        let item = item.insert(&*self.db).await?;
        info!(item_id = %item.id, "Created item");
        Ok(item)
    }

    /// Gets an item by ID regardless of availability.
    pub async fn get_item(&self, item_id: Uuid) -> Result<Option<item::Model>, ServiceError> {
        Ok(Item::find_by_id(item_id).one(&*self.db).await?)
    }

    /// Fetches an item only if it is currently available.
    #[instrument(skip(self))]
    pub async fn find_available_by_id(
        &self,
        item_id: Uuid,
    ) -> Result<Option<item::Model>, ServiceError> {
        Ok(Item::find_by_id(item_id)
            .filter(item::Column::Available.eq(true))
            .one(&*self.db)
            .await?)
    }

    /// Point read of the authoritative availability. `None` when the item
    /// does not exist.
    pub async fn get_availability(&self, item_id: Uuid) -> Result<Option<bool>, ServiceError> {
        Ok(Item::find_by_id(item_id)
            .one(&*self.db)
            .await?
            .map(|m| m.available))
    }

    /// Batched availability read for a set of item IDs. Missing IDs are
    /// simply absent from the result map.
    pub async fn list_availability_by_ids(
        &self,
        ids: &HashSet<Uuid>,
    ) -> Result<HashMap<Uuid, bool>, ServiceError> {
        availability_by_ids(&*self.db, ids).await
    }

    /// Atomically flips `available` from true to false.
    ///
    /// Returns the updated item only when this call performed the flip.
    #[instrument(skip(self))]
    pub async fn compare_and_set_unavailable(
        &self,
        item_id: Uuid,
    ) -> Result<Option<item::Model>, ServiceError> {
        compare_and_set_unavailable(&*self.db, item_id).await
    }

    /// Unconditionally marks the item available again.
    #[instrument(skip(self))]
    pub async fn release(&self, item_id: Uuid) -> Result<(), ServiceError> {
        let result = Item::update_many()
            .col_expr(item::Column::Available, Expr::value(true))
            .col_expr(item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(item::Column::Id.eq(item_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Item {} not found",
                item_id
            )));
        }

        self.event_sender
            .send_or_log(Event::ItemReleased(item_id))
            .await;

        info!(%item_id, "Released item");
        Ok(())
    }
}

/// Atomic compare-and-set of `available: true -> false` for the given item.
///
/// Implemented as a single conditional UPDATE, never read-then-write, so at
/// most one of any number of concurrent callers observes the flip. Generic
/// over the connection so the reservation path can scope it to a transaction.
pub async fn compare_and_set_unavailable<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
) -> Result<Option<item::Model>, ServiceError> {
    let result = Item::update_many()
        .col_expr(item::Column::Available, Expr::value(false))
        .col_expr(item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(item::Column::Id.eq(item_id))
        .filter(item::Column::Available.eq(true))
        .exec(conn)
        .await?;

    // rows_affected == 0 covers both "already unavailable" and "no such item"
    if result.rows_affected == 0 {
        return Ok(None);
    }

    Ok(Item::find_by_id(item_id).one(conn).await?)
}

/// One batched query mapping each existing item ID to its current availability.
pub async fn availability_by_ids<C: ConnectionTrait>(
    conn: &C,
    ids: &HashSet<Uuid>,
) -> Result<HashMap<Uuid, bool>, ServiceError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = Item::find()
        .filter(item::Column::Id.is_in(ids.iter().copied()))
        .all(conn)
        .await?;

    Ok(rows.into_iter().map(|m| (m.id, m.available)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_create_item_input_defaults_to_available() {
        let json = r#"{"name": "Oak dresser", "price": "120.00"}"#;
        let input: CreateItemInput =
            serde_json::from_str(json).expect("deserialization should succeed");
        assert!(input.available);
        assert_eq!(input.price, dec!(120.00));
    }

    #[test]
    fn test_create_item_input_explicit_availability() {
        let json = r#"{"name": "Sold lamp", "price": "15.50", "available": false}"#;
        let input: CreateItemInput =
            serde_json::from_str(json).expect("deserialization should succeed");
        assert!(!input.available);
    }
}
