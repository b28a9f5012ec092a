//! Cart store service.
//!
//! Carts are per-user (one cart per user, created lazily) and hold entries
//! unique by item. Each entry carries a cached availability snapshot; the
//! snapshot is seeded from a fresh item read on add and kept in line with the
//! authoritative flag by the reservation path and the reconciliation sweep.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::entities::{
    cart::{self, Entity as Cart},
    cart_item::{self, Entity as CartItem},
    item::Entity as Item,
    CartModel,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Input for adding an item to a user's cart.
#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartInput {
    pub item_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Cart with its entries.
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<cart_item::Model>,
}

/// Result of pulling an item out of every cart that references it.
#[derive(Debug, Clone, Serialize)]
pub struct RemoveEverywhereResult {
    pub matched_carts: u64,
    pub modified_carts: u64,
}

/// Service for managing per-user carts and their availability snapshots.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Finds a user's cart, if one exists yet.
    pub async fn find_by_user(&self, user_id: &str) -> Result<Option<cart::Model>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?)
    }

    /// Returns the user's cart, creating it on first use.
    #[instrument(skip(self))]
    pub async fn get_or_create_for_user(
        &self,
        user_id: &str,
    ) -> Result<cart::Model, ServiceError> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "user_id must not be empty".to_string(),
            ));
        }

        if let Some(existing) = self.find_by_user(user_id).await? {
            return Ok(existing);
        }

        let cart_id = Uuid::new_v4();
        let cart = cart::ActiveModel {
            id: Set(cart_id),
            user_id: Set(user_id.to_string()),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };

        match cart.insert(&*self.db).await {
            Ok(created) => {
                self.event_sender
                    .send_or_log(Event::CartCreated(cart_id))
                    .await;
                info!(%cart_id, user_id, "Created cart");
                Ok(created)
            }
            // A concurrent first add may win the unique user_id constraint;
            // fall back to the winner's cart.
            Err(insert_err) => self
                .find_by_user(user_id)
                .await?
                .ok_or(ServiceError::DatabaseError(insert_err)),
        }
    }

    /// Adds an item to the user's cart or increments quantity if the item is
    /// already in it. The entry's availability snapshot is seeded from a
    /// fresh read of the item within the same transaction.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: &str,
        input: AddToCartInput,
    ) -> Result<CartWithItems, ServiceError> {
        input.validate()?;

        let cart = self.get_or_create_for_user(user_id).await?;
        let txn = self.db.begin().await?;

        let item = Item::find_by_id(input.item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", input.item_id)))?;

        let existing_entry = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ItemId.eq(input.item_id))
            .one(&txn)
            .await?;

        if let Some(entry) = existing_entry {
            let current_quantity = entry.quantity;
            let mut entry: cart_item::ActiveModel = entry.into();
            entry.quantity = Set(current_quantity + input.quantity);
            entry.availability = Set(Some(item.available));
            entry.updated_at = Set(Utc::now());
            entry.update(&txn).await?;
        } else {
            let entry = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                item_id: Set(input.item_id),
                quantity: Set(input.quantity),
                availability: Set(Some(item.available)),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            };
            entry.insert(&txn).await?;
        }

        let mut cart_update: cart::ActiveModel = cart.clone().into();
        cart_update.updated_at = Set(Utc::now());
        let cart = cart_update.update(&txn).await?;

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&txn)
            .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                item_id: input.item_id,
            })
            .await;

        info!(
            cart_id = %cart.id,
            item_id = %input.item_id,
            quantity = input.quantity,
            "Added item to cart"
        );

        Ok(CartWithItems { cart, items })
    }

    /// Retrieves a user's cart with all its entries.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: &str) -> Result<CartWithItems, ServiceError> {
        let cart = self
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart for user {} not found", user_id)))?;

        let items = cart.find_related(CartItem).all(&*self.db).await?;

        Ok(CartWithItems { cart, items })
    }

    /// Updates the availability snapshot of the matching `(user, item)` entry.
    /// Returns the number of rows touched; a missing cart or entry is a no-op.
    pub async fn update_entry_snapshot(
        &self,
        user_id: &str,
        item_id: Uuid,
        availability: bool,
    ) -> Result<u64, ServiceError> {
        update_entry_snapshot(&*self.db, user_id, item_id, availability).await
    }

    /// Pulls the entry for an item out of every cart that has it. Entries are
    /// unique per cart, so entry counts are cart counts.
    #[instrument(skip(self))]
    pub async fn remove_item_everywhere(
        &self,
        item_id: Uuid,
    ) -> Result<RemoveEverywhereResult, ServiceError> {
        let matched_carts = CartItem::find()
            .filter(cart_item::Column::ItemId.eq(item_id))
            .count(&*self.db)
            .await?;

        let result = CartItem::delete_many()
            .filter(cart_item::Column::ItemId.eq(item_id))
            .exec(&*self.db)
            .await?;

        info!(
            %item_id,
            matched = matched_carts,
            modified = result.rows_affected,
            "Removed item from all carts"
        );

        Ok(RemoveEverywhereResult {
            matched_carts,
            modified_carts: result.rows_affected,
        })
    }

    /// Empties the user's cart. The cart row survives, and item availability
    /// is deliberately left untouched; the orphan-release sweep reclaims
    /// reservations abandoned this way.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: &str) -> Result<u64, ServiceError> {
        let cart = self
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart for user {} not found", user_id)))?;

        let txn = self.db.begin().await?;

        let result = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let mut cart_update: cart::ActiveModel = cart.clone().into();
        cart_update.updated_at = Set(Utc::now());
        cart_update.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(cart.id))
            .await;

        info!(cart_id = %cart.id, removed = result.rows_affected, "Cleared cart");
        Ok(result.rows_affected)
    }
}

/// Updates exactly the `(user, item)` entry's cached availability field.
///
/// No-op (0 rows) when the user has no cart or no entry for the item; the
/// cart may be created later by an add-to-cart flow, which seeds a fresh
/// snapshot itself. Generic over the connection so the reservation path can
/// scope it to a transaction.
pub async fn update_entry_snapshot<C: ConnectionTrait>(
    conn: &C,
    user_id: &str,
    item_id: Uuid,
    availability: bool,
) -> Result<u64, ServiceError> {
    let cart = Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?;

    let Some(cart) = cart else {
        return Ok(0);
    };

    let result = CartItem::update_many()
        .col_expr(cart_item::Column::Availability, Expr::value(availability))
        .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cart_item::Column::CartId.eq(cart.id))
        .filter(cart_item::Column::ItemId.eq(item_id))
        .exec(conn)
        .await?;

    Ok(result.rows_affected)
}

/// Fetches one page of cart entries ordered by ID, starting strictly after
/// the given cursor. The restartable, bounded-memory traversal primitive for
/// sweep operations.
pub async fn entries_page<C: ConnectionTrait>(
    conn: &C,
    after: Option<Uuid>,
    limit: u64,
    cart_scope: Option<Uuid>,
) -> Result<Vec<cart_item::Model>, ServiceError> {
    let mut query = CartItem::find();
    if let Some(cart_id) = cart_scope {
        query = query.filter(cart_item::Column::CartId.eq(cart_id));
    }

    let mut cursor = query.cursor_by(cart_item::Column::Id);
    if let Some(id) = after {
        cursor.after(id);
    }

    Ok(cursor.first(limit).all(conn).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_to_cart_input_rejects_zero_quantity() {
        let input = AddToCartInput {
            item_id: Uuid::new_v4(),
            quantity: 0,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_add_to_cart_input_accepts_positive_quantity() {
        let input = AddToCartInput {
            item_id: Uuid::new_v4(),
            quantity: 3,
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_add_to_cart_input_deserialization() {
        let json = r#"{
            "item_id": "550e8400-e29b-41d4-a716-446655440000",
            "quantity": 2
        }"#;

        let input: AddToCartInput =
            serde_json::from_str(json).expect("deserialization should succeed");
        assert_eq!(input.quantity, 2);
        assert_eq!(
            input.item_id.to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }
}
