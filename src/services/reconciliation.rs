//! Reconciliation sweep.
//!
//! Detects and corrects divergence between cart entry snapshots and
//! authoritative item availability across the whole cart store. The sweep is
//! a convergence mechanism, not a strict-consistency one: it runs without
//! locks, tolerates concurrent reservations (last write wins), and is safe to
//! re-run at any time. Traversal is keyset-cursor based so memory stays
//! bounded regardless of store size, and a failed batch never aborts the
//! remainder of the sweep.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::{
    cart::{self, Entity as Cart},
    cart_item::{self, Entity as CartItem},
    item::{self, Entity as Item},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{carts, items};

/// Default number of entries processed per bulk write.
pub const DEFAULT_BATCH_SIZE: u64 = 200;

/// Operating mode for a single sweep invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SweepMode {
    /// Fill snapshots that were never set.
    Missing,
    /// Overwrite snapshots that differ from the authoritative value; a
    /// never-set snapshot counts as stale.
    Stale,
    /// Unconditionally overwrite every snapshot.
    Force,
    /// Reserve every item currently referenced by any cart, then re-sync
    /// snapshots for the affected items.
    ReserveFromCarts,
    /// Release unavailable items referenced by no cart back to available.
    ReleaseOrphanItems,
}

impl SweepMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepMode::Missing => "missing",
            SweepMode::Stale => "stale",
            SweepMode::Force => "force",
            SweepMode::ReserveFromCarts => "reserve-from-carts",
            SweepMode::ReleaseOrphanItems => "release-orphan-items",
        }
    }
}

/// How a cart entry's cached snapshot relates to the authoritative value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    /// Never synced (`NULL` snapshot).
    Missing,
    /// Present but diverged from the authoritative value.
    Stale,
    /// Present and matching.
    Fresh,
}

/// Classifies a snapshot against the current authoritative availability.
pub fn classify_snapshot(snapshot: Option<bool>, current: bool) -> SnapshotState {
    match snapshot {
        None => SnapshotState::Missing,
        Some(value) if value != current => SnapshotState::Stale,
        Some(_) => SnapshotState::Fresh,
    }
}

/// Options for one sweep invocation.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub mode: SweepMode,
    /// Report without writing.
    pub dry_run: bool,
    pub batch_size: u64,
    /// Restrict the sweep to one user's cart.
    pub user_id: Option<String>,
}

impl SweepOptions {
    pub fn new(mode: SweepMode) -> Self {
        Self {
            mode,
            dry_run: false,
            batch_size: DEFAULT_BATCH_SIZE,
            user_id: None,
        }
    }
}

/// Counts accumulated over one sweep invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub mode: String,
    pub dry_run: bool,
    /// Entries (or items, for orphan release) examined.
    pub scanned: u64,
    /// Snapshot writes applied (or that would apply, under dry run).
    pub updated: u64,
    /// Entries examined and left untouched.
    pub skipped: u64,
    /// Items this sweep flipped to unavailable (reserve-from-carts).
    pub reserved: u64,
    /// Items already unavailable when visited (reserve-from-carts).
    pub already_reserved: u64,
    /// Cart entries referencing no existing item (reserve-from-carts).
    pub missing_items: u64,
    /// Items released back to available (release-orphan-items).
    pub released: u64,
    /// Reservation attempts that failed with a storage error.
    pub failed: u64,
    /// Batches skipped after an unrecoverable per-batch error.
    pub failed_batches: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SweepReport {
    fn new(options: &SweepOptions) -> Self {
        Self {
            mode: options.mode.as_str().to_string(),
            dry_run: options.dry_run,
            scanned: 0,
            updated: 0,
            skipped: 0,
            reserved: 0,
            already_reserved: 0,
            missing_items: 0,
            released: 0,
            failed: 0,
            failed_batches: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }
}

/// Service running reconciliation sweeps over the cart and item stores.
#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ReconciliationService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Runs one sweep in the given mode.
    ///
    /// Individual batch failures are logged and skipped; only validation
    /// errors and an unusable starting state (e.g. the connection dying
    /// before the first batch) surface as `Err`.
    #[instrument(skip(self))]
    pub async fn run(&self, options: SweepOptions) -> Result<SweepReport, ServiceError> {
        if options.batch_size == 0 {
            return Err(ServiceError::ValidationError(
                "batch_size must be at least 1".to_string(),
            ));
        }

        let mut report = SweepReport::new(&options);

        let cart_scope = match &options.user_id {
            Some(user_id) => {
                if options.mode == SweepMode::ReleaseOrphanItems {
                    return Err(ServiceError::ValidationError(
                        "user_id scoping is not supported for release-orphan-items".to_string(),
                    ));
                }
                match Cart::find()
                    .filter(cart::Column::UserId.eq(user_id.as_str()))
                    .one(&*self.db)
                    .await?
                {
                    Some(cart) => Some(cart.id),
                    None => {
                        info!(user_id, "User has no cart; nothing to sweep");
                        report.finished_at = Utc::now();
                        return Ok(report);
                    }
                }
            }
            None => None,
        };

        match options.mode {
            SweepMode::Missing | SweepMode::Stale | SweepMode::Force => {
                self.sync_snapshots(&options, cart_scope, &mut report).await?;
            }
            SweepMode::ReserveFromCarts => {
                self.reserve_from_carts(&options, cart_scope, &mut report)
                    .await?;
            }
            SweepMode::ReleaseOrphanItems => {
                self.release_orphan_items(&options, &mut report).await?;
            }
        }

        report.finished_at = Utc::now();

        self.event_sender
            .send_or_log(Event::SweepCompleted {
                mode: report.mode.clone(),
                updated: report.updated,
                failed_batches: report.failed_batches,
            })
            .await;

        info!(
            mode = %report.mode,
            dry_run = report.dry_run,
            scanned = report.scanned,
            updated = report.updated,
            skipped = report.skipped,
            failed_batches = report.failed_batches,
            "Sweep completed"
        );

        Ok(report)
    }

    /// Cursor loop for the three snapshot-sync modes.
    async fn sync_snapshots(
        &self,
        options: &SweepOptions,
        cart_scope: Option<Uuid>,
        report: &mut SweepReport,
    ) -> Result<(), ServiceError> {
        let mut after: Option<Uuid> = None;

        loop {
            let batch =
                carts::entries_page(&*self.db, after, options.batch_size, cart_scope).await?;
            if batch.is_empty() {
                break;
            }
            after = batch.last().map(|entry| entry.id);
            report.scanned += batch.len() as u64;

            match self
                .sync_batch(&batch, options.mode, options.dry_run)
                .await
            {
                Ok((updated, skipped)) => {
                    report.updated += updated;
                    report.skipped += skipped;
                }
                Err(err) => {
                    report.failed_batches += 1;
                    warn!(error = %err, "Snapshot sync batch failed; continuing with next batch");
                }
            }
        }

        Ok(())
    }

    /// Reconciles one batch of entries against current item availability.
    ///
    /// Writes are grouped by target value into at most two bulk updates, so
    /// a batch costs one read plus two writes regardless of its size.
    async fn sync_batch(
        &self,
        entries: &[cart_item::Model],
        mode: SweepMode,
        dry_run: bool,
    ) -> Result<(u64, u64), ServiceError> {
        let ids: HashSet<Uuid> = entries.iter().map(|entry| entry.item_id).collect();
        let availability = items::availability_by_ids(&*self.db, &ids).await?;

        let mut set_true: Vec<Uuid> = Vec::new();
        let mut set_false: Vec<Uuid> = Vec::new();

        for entry in entries {
            // An entry referencing a nonexistent item reconciles to
            // unavailable, matching the reservation path's treatment.
            let current = availability.get(&entry.item_id).copied().unwrap_or(false);

            let write = match (mode, classify_snapshot(entry.availability, current)) {
                (SweepMode::Force, _) => true,
                (SweepMode::Missing, SnapshotState::Missing) => true,
                (SweepMode::Stale, SnapshotState::Missing | SnapshotState::Stale) => true,
                _ => false,
            };

            if write {
                if current {
                    set_true.push(entry.id);
                } else {
                    set_false.push(entry.id);
                }
            }
        }

        let updated = (set_true.len() + set_false.len()) as u64;
        let skipped = entries.len() as u64 - updated;

        if !dry_run {
            for (entry_ids, value) in [(set_true, true), (set_false, false)] {
                if entry_ids.is_empty() {
                    continue;
                }
                CartItem::update_many()
                    .col_expr(cart_item::Column::Availability, Expr::value(value))
                    .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(cart_item::Column::Id.is_in(entry_ids))
                    .exec(&*self.db)
                    .await?;
            }
        }

        Ok((updated, skipped))
    }

    /// Treats "in a cart" as "should be reserved": attempts the
    /// compare-and-set for every distinct item referenced by any cart entry,
    /// then re-syncs the snapshots of the entries just visited.
    async fn reserve_from_carts(
        &self,
        options: &SweepOptions,
        cart_scope: Option<Uuid>,
        report: &mut SweepReport,
    ) -> Result<(), ServiceError> {
        let mut after: Option<Uuid> = None;
        let mut attempted: HashSet<Uuid> = HashSet::new();

        loop {
            let batch =
                carts::entries_page(&*self.db, after, options.batch_size, cart_scope).await?;
            if batch.is_empty() {
                break;
            }
            after = batch.last().map(|entry| entry.id);
            report.scanned += batch.len() as u64;

            // The same item may sit in many carts; attempt each only once.
            let item_ids: Vec<Uuid> = batch
                .iter()
                .map(|entry| entry.item_id)
                .filter(|id| attempted.insert(*id))
                .collect();

            match self.reserve_batch(&item_ids, options.dry_run).await {
                Ok((reserved, already_reserved, missing, failed)) => {
                    report.reserved += reserved;
                    report.already_reserved += already_reserved;
                    report.missing_items += missing;
                    report.failed += failed;
                }
                Err(err) => {
                    report.failed_batches += 1;
                    warn!(error = %err, "Reserve batch failed; continuing with next batch");
                    continue;
                }
            }

            // Re-sync the visited entries now that their items changed.
            match self
                .sync_batch(&batch, SweepMode::Stale, options.dry_run)
                .await
            {
                Ok((updated, skipped)) => {
                    report.updated += updated;
                    report.skipped += skipped;
                }
                Err(err) => {
                    report.failed_batches += 1;
                    warn!(error = %err, "Post-reserve snapshot sync failed; continuing");
                }
            }
        }

        Ok(())
    }

    /// Attempts the compare-and-set for each item ID, per-item failures
    /// counted rather than propagated.
    async fn reserve_batch(
        &self,
        item_ids: &[Uuid],
        dry_run: bool,
    ) -> Result<(u64, u64, u64, u64), ServiceError> {
        let ids: HashSet<Uuid> = item_ids.iter().copied().collect();
        let availability = items::availability_by_ids(&*self.db, &ids).await?;

        let mut reserved = 0u64;
        let mut already_reserved = 0u64;
        let mut missing = 0u64;
        let mut failed = 0u64;

        for item_id in item_ids {
            match availability.get(item_id) {
                None => missing += 1,
                Some(false) => already_reserved += 1,
                Some(true) if dry_run => reserved += 1,
                Some(true) => {
                    match items::compare_and_set_unavailable(&*self.db, *item_id).await {
                        Ok(Some(_)) => reserved += 1,
                        // Raced with a live reservation between the read and
                        // the conditional update; the item is taken either way.
                        Ok(None) => already_reserved += 1,
                        Err(err) => {
                            failed += 1;
                            warn!(%item_id, error = %err, "Failed to reserve item from cart");
                        }
                    }
                }
            }
        }

        Ok((reserved, already_reserved, missing, failed))
    }

    /// Finds unavailable items referenced by no cart entry and releases them.
    async fn release_orphan_items(
        &self,
        options: &SweepOptions,
        report: &mut SweepReport,
    ) -> Result<(), ServiceError> {
        let mut after: Option<Uuid> = None;

        loop {
            let batch =
                unavailable_items_page(&*self.db, after, options.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            after = batch.last().map(|item| item.id);
            report.scanned += batch.len() as u64;

            let item_ids: Vec<Uuid> = batch.iter().map(|item| item.id).collect();
            match self.release_batch(&item_ids, options.dry_run).await {
                Ok(released) => {
                    report.released += released;
                    report.skipped += batch.len() as u64 - released;
                }
                Err(err) => {
                    report.failed_batches += 1;
                    warn!(error = %err, "Orphan release batch failed; continuing with next batch");
                }
            }
        }

        Ok(())
    }

    async fn release_batch(
        &self,
        item_ids: &[Uuid],
        dry_run: bool,
    ) -> Result<u64, ServiceError> {
        let referenced: HashSet<Uuid> = CartItem::find()
            .filter(cart_item::Column::ItemId.is_in(item_ids.iter().copied()))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|entry| entry.item_id)
            .collect();

        let orphans: Vec<Uuid> = item_ids
            .iter()
            .copied()
            .filter(|id| !referenced.contains(id))
            .collect();

        if orphans.is_empty() {
            return Ok(0);
        }

        if dry_run {
            return Ok(orphans.len() as u64);
        }

        let result = Item::update_many()
            .col_expr(item::Column::Available, Expr::value(true))
            .col_expr(item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(item::Column::Id.is_in(orphans.iter().copied()))
            .filter(item::Column::Available.eq(false))
            .exec(&*self.db)
            .await?;

        for item_id in &orphans {
            self.event_sender
                .send_or_log(Event::ItemReleased(*item_id))
                .await;
        }

        info!(released = result.rows_affected, "Released orphan items");
        Ok(result.rows_affected)
    }
}

/// One page of unavailable items ordered by ID, strictly after the cursor.
async fn unavailable_items_page<C: ConnectionTrait>(
    conn: &C,
    after: Option<Uuid>,
    limit: u64,
) -> Result<Vec<item::Model>, ServiceError> {
    let mut cursor = Item::find()
        .filter(item::Column::Available.eq(false))
        .cursor_by(item::Column::Id);
    if let Some(id) = after {
        cursor.after(id);
    }

    Ok(cursor.first(limit).all(conn).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing_snapshot() {
        assert_eq!(classify_snapshot(None, true), SnapshotState::Missing);
        assert_eq!(classify_snapshot(None, false), SnapshotState::Missing);
    }

    #[test]
    fn test_classify_stale_snapshot() {
        assert_eq!(classify_snapshot(Some(true), false), SnapshotState::Stale);
        assert_eq!(classify_snapshot(Some(false), true), SnapshotState::Stale);
    }

    #[test]
    fn test_classify_fresh_snapshot() {
        assert_eq!(classify_snapshot(Some(true), true), SnapshotState::Fresh);
        assert_eq!(classify_snapshot(Some(false), false), SnapshotState::Fresh);
    }

    #[test]
    fn test_sweep_mode_round_trip() {
        for mode in [
            SweepMode::Missing,
            SweepMode::Stale,
            SweepMode::Force,
            SweepMode::ReserveFromCarts,
            SweepMode::ReleaseOrphanItems,
        ] {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json.trim_matches('"'), mode.as_str());
            let back: SweepMode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, mode);
        }
    }

    #[test]
    fn test_sweep_options_default_batch_size() {
        let options = SweepOptions::new(SweepMode::Stale);
        assert_eq!(options.batch_size, DEFAULT_BATCH_SIZE);
        assert!(!options.dry_run);
        assert!(options.user_id.is_none());
    }

    #[test]
    fn test_sweep_report_serialization() {
        let mut report = SweepReport::new(&SweepOptions::new(SweepMode::Force));
        report.updated = 7;
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"mode\":\"force\""));
        assert!(json.contains("\"updated\":7"));
    }
}
