mod common;

use bazaar_api::errors::ServiceError;
use bazaar_api::services::reservation::ReserveOptions;
use uuid::Uuid;

#[tokio::test]
async fn test_reserving_available_item_wins_and_syncs_snapshot() {
    let app = common::setup().await;
    let item = app.seed_item("Walnut desk", true).await;
    app.add_to_cart("alice", item.id).await;

    let outcome = app
        .services
        .reservation
        .reserve_for_cart("alice", item.id, ReserveOptions::default())
        .await
        .expect("reservation should complete");

    assert!(outcome.reserved);
    assert!(!outcome.availability);
    assert!(outcome.item_found);
    assert!(!app.item_availability(item.id).await);
    assert_eq!(
        app.entry_snapshot("alice", item.id).await,
        Some(Some(false))
    );
}

#[tokio::test]
async fn test_second_reservation_loses_without_side_effects() {
    let app = common::setup().await;
    let item = app.seed_item("Brass lamp", true).await;
    app.add_to_cart("alice", item.id).await;
    app.add_to_cart("bob", item.id).await;

    let first = app
        .services
        .reservation
        .reserve_for_cart("alice", item.id, ReserveOptions::default())
        .await
        .expect("first reservation");
    assert!(first.reserved);

    let second = app
        .services
        .reservation
        .reserve_for_cart("bob", item.id, ReserveOptions::default())
        .await
        .expect("second reservation completes without error");

    assert!(!second.reserved);
    assert!(!second.availability);
    assert!(second.item_found);
    // The loser's snapshot still converges onto the truth.
    assert_eq!(app.entry_snapshot("bob", item.id).await, Some(Some(false)));
    assert!(!app.item_availability(item.id).await);
}

#[tokio::test]
async fn test_concurrent_reservations_have_at_most_one_winner() {
    let app = common::setup().await;
    let item = app.seed_item("Singer sewing machine", true).await;
    for i in 0..12 {
        app.add_to_cart(&format!("user-{}", i), item.id).await;
    }

    let mut handles = Vec::new();
    for i in 0..12 {
        let reservation = app.services.reservation.clone();
        let item_id = item.id;
        handles.push(tokio::spawn(async move {
            reservation
                .reserve_for_cart(
                    &format!("user-{}", i),
                    item_id,
                    ReserveOptions {
                        prefer_transaction: false,
                    },
                )
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        let outcome = handle
            .await
            .expect("task completes")
            .expect("reservation completes");
        if outcome.reserved {
            winners += 1;
        }
        assert!(!outcome.availability);
    }

    assert_eq!(winners, 1);
    assert!(!app.item_availability(item.id).await);
}

#[tokio::test]
async fn test_reserving_missing_item_reports_not_found() {
    let app = common::setup().await;

    let outcome = app
        .services
        .reservation
        .reserve_for_cart("alice", Uuid::new_v4(), ReserveOptions::default())
        .await
        .expect("completes without error");

    assert!(!outcome.reserved);
    assert!(!outcome.availability);
    assert!(!outcome.item_found);
}

#[tokio::test]
async fn test_reservation_without_cart_entry_is_tolerated() {
    let app = common::setup().await;
    let item = app.seed_item("Cast iron skillet", true).await;

    // No cart and no entry for this user; the flip still happens and the
    // missing snapshot write is a silent no-op.
    let outcome = app
        .services
        .reservation
        .reserve_for_cart("ghost", item.id, ReserveOptions::default())
        .await
        .expect("reservation completes");

    assert!(outcome.reserved);
    assert!(!app.item_availability(item.id).await);
    assert_eq!(app.entry_snapshot("ghost", item.id).await, None);
}

#[tokio::test]
async fn test_empty_user_id_is_rejected() {
    let app = common::setup().await;
    let item = app.seed_item("Teak bookshelf", true).await;

    let err = app
        .services
        .reservation
        .reserve_for_cart("  ", item.id, ReserveOptions::default())
        .await
        .expect_err("blank user_id must be rejected");

    assert!(matches!(err, ServiceError::ValidationError(_)));
    // Rejection happens before any write.
    assert!(app.item_availability(item.id).await);
}

#[tokio::test]
async fn test_degraded_mode_still_reserves_and_syncs() {
    let app = common::setup().await;
    let item = app.seed_item("Vintage radio", true).await;
    app.add_to_cart("alice", item.id).await;

    let outcome = app
        .services
        .reservation
        .reserve_for_cart(
            "alice",
            item.id,
            ReserveOptions {
                prefer_transaction: false,
            },
        )
        .await
        .expect("reservation completes");

    assert!(outcome.reserved);
    assert!(!app.item_availability(item.id).await);
    assert_eq!(
        app.entry_snapshot("alice", item.id).await,
        Some(Some(false))
    );
}
