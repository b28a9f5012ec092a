//! Reservation operation.
//!
//! Attempts to claim an item exclusively for one user's cart and propagate
//! the resulting authoritative availability into that cart's snapshot.
//! Contention is resolved entirely by the item store's compare-and-set: at
//! most one of any number of concurrent callers wins the flip.

use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::entities::item::Entity as Item;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{carts, items};

/// Options for a single reservation call.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReserveOptions {
    /// Wrap the availability flip and the snapshot write in one transaction,
    /// so a failed snapshot write rolls back the flip too. When false the
    /// operation degrades to two independent best-effort writes.
    #[serde(default = "default_prefer_transaction")]
    pub prefer_transaction: bool,
}

fn default_prefer_transaction() -> bool {
    true
}

impl Default for ReserveOptions {
    fn default() -> Self {
        Self {
            prefer_transaction: default_prefer_transaction(),
        }
    }
}

/// Result of a reservation call that ran to completion.
///
/// `reserved` is true only when this specific call performed the flip;
/// `availability` is the resulting authoritative value either way.
/// A storage or transaction failure surfaces as `Err(ServiceError)` instead,
/// and the caller must not assume any mutation occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationOutcome {
    pub reserved: bool,
    pub availability: bool,
    /// False when the item ID resolved to nothing; availability is then
    /// reported as false for snapshot purposes.
    pub item_found: bool,
}

/// Service implementing the cart reservation operation.
#[derive(Clone)]
pub struct ReservationService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ReservationService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Attempts to reserve `item_id` on behalf of `user_id`'s cart.
    ///
    /// Safe to call repeatedly: reserving an already-unavailable item reports
    /// `reserved: false, availability: false` with no side effect beyond a
    /// redundant snapshot write. A missing cart or entry is tolerated
    /// silently; a missing item yields `item_found: false`.
    #[instrument(skip(self))]
    pub async fn reserve_for_cart(
        &self,
        user_id: &str,
        item_id: Uuid,
        options: ReserveOptions,
    ) -> Result<ReservationOutcome, ServiceError> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "user_id must not be empty".to_string(),
            ));
        }

        let outcome = if options.prefer_transaction {
            let txn = self.db.begin().await?;
            let outcome = resolve_outcome(&txn, item_id).await?;
            carts::update_entry_snapshot(&txn, user_id, item_id, outcome.availability).await?;
            txn.commit().await?;
            outcome
        } else {
            // Degraded mode: the flip and the snapshot write are independent.
            // A failed snapshot write leaves a stale-but-correctable entry for
            // the reconciliation sweep; the reservation itself stands.
            let outcome = resolve_outcome(&*self.db, item_id).await?;
            if let Err(err) =
                carts::update_entry_snapshot(&*self.db, user_id, item_id, outcome.availability)
                    .await
            {
                warn!(
                    %item_id,
                    user_id,
                    error = %err,
                    "Reservation applied but snapshot write failed; entry is stale until the next sweep"
                );
            }
            outcome
        };

        if outcome.reserved {
            self.event_sender
                .send_or_log(Event::ItemReserved {
                    item_id,
                    user_id: user_id.to_string(),
                })
                .await;
        }

        Ok(outcome)
    }
}

/// Runs the compare-and-set and, on loss, a plain fetch for an accurate
/// post-state. A nonexistent item reads as unavailable.
async fn resolve_outcome<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
) -> Result<ReservationOutcome, ServiceError> {
    if items::compare_and_set_unavailable(conn, item_id)
        .await?
        .is_some()
    {
        return Ok(ReservationOutcome {
            reserved: true,
            availability: false,
            item_found: true,
        });
    }

    // Lost the race, or the item never existed. Do not assume false blindly;
    // read the current state for the snapshot value.
    match Item::find_by_id(item_id).one(conn).await? {
        Some(item) => Ok(ReservationOutcome {
            reserved: false,
            availability: item.available,
            item_found: true,
        }),
        None => Ok(ReservationOutcome {
            reserved: false,
            availability: false,
            item_found: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_options_default_prefers_transaction() {
        assert!(ReserveOptions::default().prefer_transaction);
    }

    #[test]
    fn test_reserve_options_deserializes_empty_body() {
        let options: ReserveOptions = serde_json::from_str("{}").unwrap();
        assert!(options.prefer_transaction);

        let options: ReserveOptions =
            serde_json::from_str(r#"{"prefer_transaction": false}"#).unwrap();
        assert!(!options.prefer_transaction);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = ReservationOutcome {
            reserved: true,
            availability: false,
            item_found: true,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"reserved\":true"));
        assert!(json.contains("\"availability\":false"));
    }
}
