#![allow(dead_code)]

use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use bazaar_api::{
    db::{establish_connection_with_config, run_migrations, DbConfig},
    entities::{cart, cart_item, item},
    events::{process_events, EventSender},
    AppServices,
};

/// A fully migrated application instance backed by a throwaway SQLite file.
///
/// The pool is capped at a single connection so concurrent writers serialize
/// at the pool instead of hitting SQLite lock errors; the conditional-update
/// reservation semantics are unaffected.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub event_sender: EventSender,
    _tmp: TempDir,
}

pub async fn setup() -> TestApp {
    let tmp = TempDir::new().expect("tempdir");
    let db_path = tmp.path().join("bazaar-test.db");
    let db_cfg = DbConfig {
        url: format!("sqlite://{}?mode=rwc", db_path.display()),
        max_connections: 1,
        ..Default::default()
    };

    let db = establish_connection_with_config(&db_cfg)
        .await
        .expect("database connection");
    run_migrations(&db).await.expect("migrations");
    let db = Arc::new(db);

    let (tx, rx) = mpsc::channel(256);
    let event_sender = EventSender::new(tx);
    tokio::spawn(process_events(rx));

    let services = AppServices::new(db.clone(), event_sender.clone());

    TestApp {
        db,
        services,
        event_sender,
        _tmp: tmp,
    }
}

impl TestApp {
    /// Inserts an item directly, bypassing the service layer.
    pub async fn seed_item(&self, name: &str, available: bool) -> item::Model {
        let model = item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(dec!(25.00)),
            available: Set(available),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        model.insert(&*self.db).await.expect("seed item")
    }

    /// Reads the authoritative availability flag straight from storage.
    pub async fn item_availability(&self, item_id: Uuid) -> bool {
        item::Entity::find_by_id(item_id)
            .one(&*self.db)
            .await
            .expect("item lookup")
            .expect("item exists")
            .available
    }

    /// Reads the snapshot of a user's entry for an item. Outer `None` means
    /// no entry exists; inner `None` is a never-synced snapshot.
    pub async fn entry_snapshot(&self, user_id: &str, item_id: Uuid) -> Option<Option<bool>> {
        let cart = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .expect("cart lookup")?;

        cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ItemId.eq(item_id))
            .one(&*self.db)
            .await
            .expect("entry lookup")
            .map(|entry| entry.availability)
    }

    /// Overwrites an entry's snapshot in place, NULL included, to simulate
    /// drift or a never-synced entry.
    pub async fn force_entry_snapshot(&self, user_id: &str, item_id: Uuid, snapshot: Option<bool>) {
        let cart = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .expect("cart lookup")
            .expect("cart exists");

        let entry = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ItemId.eq(item_id))
            .one(&*self.db)
            .await
            .expect("entry lookup")
            .expect("entry exists");

        let mut entry: cart_item::ActiveModel = entry.into();
        entry.availability = Set(snapshot);
        entry.update(&*self.db).await.expect("snapshot overwrite");
    }

    /// Adds an item to a user's cart through the service layer.
    pub async fn add_to_cart(&self, user_id: &str, item_id: Uuid) {
        self.services
            .carts
            .add_item(
                user_id,
                bazaar_api::services::carts::AddToCartInput {
                    item_id,
                    quantity: 1,
                },
            )
            .await
            .expect("add to cart");
    }
}
