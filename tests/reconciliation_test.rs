mod common;

use bazaar_api::errors::ServiceError;
use bazaar_api::services::reconciliation::{SweepMode, SweepOptions};

#[tokio::test]
async fn test_missing_mode_fills_only_null_snapshots() {
    let app = common::setup().await;
    let never_synced = app.seed_item("Dresser", true).await;
    let diverged = app.seed_item("Mirror", true).await;
    app.add_to_cart("alice", never_synced.id).await;
    app.add_to_cart("alice", diverged.id).await;
    app.force_entry_snapshot("alice", never_synced.id, None).await;
    app.force_entry_snapshot("alice", diverged.id, Some(false)).await;

    let report = app
        .services
        .reconciliation
        .run(SweepOptions::new(SweepMode::Missing))
        .await
        .expect("sweep completes");

    assert_eq!(report.scanned, 2);
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed_batches, 0);

    assert_eq!(
        app.entry_snapshot("alice", never_synced.id).await,
        Some(Some(true))
    );
    // Diverged but non-NULL snapshots are out of scope for this mode.
    assert_eq!(
        app.entry_snapshot("alice", diverged.id).await,
        Some(Some(false))
    );
}

#[tokio::test]
async fn test_stale_mode_corrects_divergence_and_nulls() {
    let app = common::setup().await;
    let diverged = app.seed_item("Armchair", false).await;
    let never_synced = app.seed_item("Side table", true).await;
    let fresh = app.seed_item("Floor lamp", true).await;
    app.add_to_cart("alice", diverged.id).await;
    app.add_to_cart("alice", never_synced.id).await;
    app.add_to_cart("alice", fresh.id).await;
    app.force_entry_snapshot("alice", diverged.id, Some(true)).await;
    app.force_entry_snapshot("alice", never_synced.id, None).await;

    let report = app
        .services
        .reconciliation
        .run(SweepOptions::new(SweepMode::Stale))
        .await
        .expect("sweep completes");

    assert_eq!(report.scanned, 3);
    assert_eq!(report.updated, 2);
    assert_eq!(report.skipped, 1);

    assert_eq!(
        app.entry_snapshot("alice", diverged.id).await,
        Some(Some(false))
    );
    assert_eq!(
        app.entry_snapshot("alice", never_synced.id).await,
        Some(Some(true))
    );
    // The sweep never touches item rows in snapshot modes.
    assert!(!app.item_availability(diverged.id).await);
    assert!(app.item_availability(never_synced.id).await);
}

#[tokio::test]
async fn test_force_mode_rewrites_every_snapshot() {
    let app = common::setup().await;
    let fresh = app.seed_item("Bookcase", true).await;
    let diverged = app.seed_item("Coat rack", false).await;
    app.add_to_cart("alice", fresh.id).await;
    app.add_to_cart("alice", diverged.id).await;
    app.force_entry_snapshot("alice", diverged.id, Some(true)).await;

    let report = app
        .services
        .reconciliation
        .run(SweepOptions::new(SweepMode::Force))
        .await
        .expect("sweep completes");

    assert_eq!(report.scanned, 2);
    assert_eq!(report.updated, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(
        app.entry_snapshot("alice", diverged.id).await,
        Some(Some(false))
    );
}

#[tokio::test]
async fn test_dry_run_reports_without_writing() {
    let app = common::setup().await;
    let item = app.seed_item("Record player", false).await;
    app.add_to_cart("alice", item.id).await;
    app.force_entry_snapshot("alice", item.id, Some(true)).await;

    let mut options = SweepOptions::new(SweepMode::Stale);
    options.dry_run = true;
    let report = app
        .services
        .reconciliation
        .run(options)
        .await
        .expect("sweep completes");

    assert!(report.dry_run);
    assert_eq!(report.updated, 1);
    // The diverged snapshot is untouched.
    assert_eq!(app.entry_snapshot("alice", item.id).await, Some(Some(true)));
}

#[tokio::test]
async fn test_entries_for_missing_items_reconcile_to_false() {
    let app = common::setup().await;
    let item = app.seed_item("Globe", true).await;
    app.add_to_cart("alice", item.id).await;

    use sea_orm::EntityTrait;
    bazaar_api::entities::item::Entity::delete_by_id(item.id)
        .exec(&*app.db)
        .await
        .expect("delete item");

    let report = app
        .services
        .reconciliation
        .run(SweepOptions::new(SweepMode::Stale))
        .await
        .expect("sweep completes");

    assert_eq!(report.updated, 1);
    assert_eq!(app.entry_snapshot("alice", item.id).await, Some(Some(false)));
}

#[tokio::test]
async fn test_reserve_from_carts_claims_carted_items() {
    let app = common::setup().await;
    let in_cart = app.seed_item("Writing desk", true).await;
    let taken = app.seed_item("Rocking chair", false).await;
    let untouched = app.seed_item("Ottoman", true).await;
    app.add_to_cart("alice", in_cart.id).await;
    app.add_to_cart("alice", taken.id).await;
    app.add_to_cart("bob", in_cart.id).await;

    let report = app
        .services
        .reconciliation
        .run(SweepOptions::new(SweepMode::ReserveFromCarts))
        .await
        .expect("sweep completes");

    // in_cart sits in two carts but is attempted only once.
    assert_eq!(report.reserved, 1);
    assert_eq!(report.already_reserved, 1);
    assert_eq!(report.missing_items, 0);
    assert_eq!(report.failed, 0);

    assert!(!app.item_availability(in_cart.id).await);
    assert!(!app.item_availability(taken.id).await);
    // Items in no cart are never reserved by this mode.
    assert!(app.item_availability(untouched.id).await);

    // Visited snapshots converge onto the post-reservation truth.
    assert_eq!(
        app.entry_snapshot("alice", in_cart.id).await,
        Some(Some(false))
    );
    assert_eq!(app.entry_snapshot("bob", in_cart.id).await, Some(Some(false)));
    assert_eq!(app.entry_snapshot("alice", taken.id).await, Some(Some(false)));
}

#[tokio::test]
async fn test_release_orphan_items_frees_only_unreferenced() {
    let app = common::setup().await;
    let orphan = app.seed_item("Abandoned clock", false).await;
    let referenced = app.seed_item("Claimed vase", false).await;
    let available = app.seed_item("Open stool", true).await;
    app.add_to_cart("alice", referenced.id).await;

    let report = app
        .services
        .reconciliation
        .run(SweepOptions::new(SweepMode::ReleaseOrphanItems))
        .await
        .expect("sweep completes");

    assert_eq!(report.released, 1);
    assert!(app.item_availability(orphan.id).await);
    assert!(!app.item_availability(referenced.id).await);
    assert!(app.item_availability(available.id).await);
}

#[tokio::test]
async fn test_release_orphan_items_dry_run_counts_without_writing() {
    let app = common::setup().await;
    let orphan = app.seed_item("Dusty trunk", false).await;

    let mut options = SweepOptions::new(SweepMode::ReleaseOrphanItems);
    options.dry_run = true;
    let report = app
        .services
        .reconciliation
        .run(options)
        .await
        .expect("sweep completes");

    assert_eq!(report.released, 1);
    assert!(!app.item_availability(orphan.id).await);
}

#[tokio::test]
async fn test_user_scope_limits_sweep_to_one_cart() {
    let app = common::setup().await;
    let alices = app.seed_item("Quilt", false).await;
    let bobs = app.seed_item("Kettle", false).await;
    app.add_to_cart("alice", alices.id).await;
    app.add_to_cart("bob", bobs.id).await;
    app.force_entry_snapshot("alice", alices.id, Some(true)).await;
    app.force_entry_snapshot("bob", bobs.id, Some(true)).await;

    let mut options = SweepOptions::new(SweepMode::Stale);
    options.user_id = Some("alice".to_string());
    let report = app
        .services
        .reconciliation
        .run(options)
        .await
        .expect("sweep completes");

    assert_eq!(report.scanned, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(app.entry_snapshot("alice", alices.id).await, Some(Some(false)));
    // The other user's drift is out of scope.
    assert_eq!(app.entry_snapshot("bob", bobs.id).await, Some(Some(true)));
}

#[tokio::test]
async fn test_unknown_user_scope_yields_empty_report() {
    let app = common::setup().await;
    let item = app.seed_item("Lantern", true).await;
    app.add_to_cart("alice", item.id).await;

    let mut options = SweepOptions::new(SweepMode::Stale);
    options.user_id = Some("nobody".to_string());
    let report = app
        .services
        .reconciliation
        .run(options)
        .await
        .expect("sweep completes");

    assert_eq!(report.scanned, 0);
    assert_eq!(report.updated, 0);
}

#[tokio::test]
async fn test_user_scope_rejected_for_orphan_release() {
    let app = common::setup().await;

    let mut options = SweepOptions::new(SweepMode::ReleaseOrphanItems);
    options.user_id = Some("alice".to_string());
    let err = app
        .services
        .reconciliation
        .run(options)
        .await
        .expect_err("scoping an item-wide sweep must be rejected");

    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn test_zero_batch_size_rejected() {
    let app = common::setup().await;

    let mut options = SweepOptions::new(SweepMode::Missing);
    options.batch_size = 0;
    let err = app
        .services
        .reconciliation
        .run(options)
        .await
        .expect_err("zero batch size must be rejected");

    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn test_sweep_traverses_multiple_batches() {
    let app = common::setup().await;
    for i in 0..7 {
        let item = app.seed_item(&format!("Lot {}", i), true).await;
        app.add_to_cart("alice", item.id).await;
        app.force_entry_snapshot("alice", item.id, None).await;
    }

    let mut options = SweepOptions::new(SweepMode::Missing);
    options.batch_size = 3;
    let report = app
        .services
        .reconciliation
        .run(options)
        .await
        .expect("sweep completes");

    assert_eq!(report.scanned, 7);
    assert_eq!(report.updated, 7);
    assert_eq!(report.failed_batches, 0);
}
