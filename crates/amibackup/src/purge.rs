//! Deletion of purged images and their snapshots
//!
//! Images are deregistered first and their snapshots deleted afterwards,
//! since EC2 refuses to delete a snapshot a registered image still uses.
//! A failure on one item is logged and counted, never fatal.

use crate::aws::ec2::Ec2Operations;
use crate::aws::error::classify_anyhow_error;
use crate::catalog::{self, Inventory, SnapshotIndex};
use crate::retention::{self, PurgePlan, RetentionWindow};
use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Result of a single deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
    /// Resource was successfully deleted
    Deleted,
    /// Resource was already gone
    AlreadyDeleted,
    /// Deletion failed with error
    Failed,
}

/// Counts of what a purge did (or, in dry-run, would have done)
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub region: String,
    pub name: String,
    pub dry_run: bool,
    /// Managed images considered
    pub inventory: usize,
    /// Images selected for purge
    pub candidates: usize,
    pub deregistered: usize,
    pub snapshots_deleted: usize,
    pub already_deleted: usize,
    /// Deletions not attempted (dry-run, or snapshots of an image that failed)
    pub skipped: usize,
    pub failed: usize,
    /// One line per failure, for the run summary
    pub failures: Vec<String>,
}

impl PurgeReport {
    fn new(region: &str, name: &str, dry_run: bool) -> Self {
        Self {
            region: region.to_string(),
            name: name.to_string(),
            dry_run,
            ..Default::default()
        }
    }

    /// Whether any deletion failed
    pub fn had_errors(&self) -> bool {
        self.failed > 0
    }
}

/// Executes a purge plan against one region
pub struct PurgeExecutor<'a, A> {
    api: &'a A,
    dry_run: bool,
}

impl<'a, A: Ec2Operations> PurgeExecutor<'a, A> {
    pub fn new(api: &'a A, dry_run: bool) -> Self {
        Self { api, dry_run }
    }

    /// Delete every image in the plan, in id order, then its snapshots.
    pub async fn execute(
        &self,
        plan: &PurgePlan,
        inventory: &Inventory,
        snapshots: &SnapshotIndex,
    ) -> PurgeReport {
        let region = self.api.region();
        let mut report = PurgeReport::new(region, &inventory.name, self.dry_run);
        report.inventory = inventory.len();
        report.candidates = plan.len();

        for bucket in &plan.buckets {
            if self.dry_run {
                info!(
                    region = %region,
                    window = %bucket.window_spec,
                    slice_start = %bucket.slice_start,
                    slice_end = %bucket.slice_end,
                    image_id = %bucket.survivor,
                    purged = bucket.purged.len(),
                    "[DRY RUN] Would keep survivor"
                );
            } else {
                debug!(
                    region = %region,
                    window = %bucket.window_spec,
                    slice_start = %bucket.slice_start,
                    image_id = %bucket.survivor,
                    "Keeping survivor"
                );
            }
        }

        for image_id in &plan.purge {
            let dependents = snapshots.for_image(image_id);
            let taken_at = inventory.get(image_id).map(|i| i.timestamp);

            if self.dry_run {
                info!(
                    region = %region,
                    image_id = %image_id,
                    taken_at = ?taken_at,
                    "[DRY RUN] Would deregister image"
                );
                for snapshot in dependents {
                    info!(
                        region = %region,
                        snapshot_id = %snapshot.id,
                        image_id = %image_id,
                        device = ?snapshot.device_name,
                        "[DRY RUN] Would delete snapshot"
                    );
                }
                report.skipped += 1 + dependents.len();
                continue;
            }

            match self.deregister(image_id, &mut report).await {
                DeleteResult::Deleted => report.deregistered += 1,
                DeleteResult::AlreadyDeleted => report.already_deleted += 1,
                DeleteResult::Failed => {
                    report.failed += 1;
                    if !dependents.is_empty() {
                        warn!(
                            region = %region,
                            image_id = %image_id,
                            snapshots = dependents.len(),
                            "Leaving snapshots of image that could not be deregistered"
                        );
                    }
                    report.skipped += dependents.len();
                    continue;
                }
            }

            for snapshot in dependents {
                match self.delete_snapshot(&snapshot.id, &mut report).await {
                    DeleteResult::Deleted => report.snapshots_deleted += 1,
                    DeleteResult::AlreadyDeleted => report.already_deleted += 1,
                    DeleteResult::Failed => report.failed += 1,
                }
            }
        }

        info!(
            region = %region,
            name = %report.name,
            dry_run = self.dry_run,
            candidates = report.candidates,
            deregistered = report.deregistered,
            snapshots_deleted = report.snapshots_deleted,
            failed = report.failed,
            "Purge finished"
        );
        report
    }

    async fn deregister(&self, image_id: &str, report: &mut PurgeReport) -> DeleteResult {
        match self.api.deregister_image(image_id).await {
            Ok(()) => {
                info!(region = %self.api.region(), image_id = %image_id, "Pruned image");
                DeleteResult::Deleted
            }
            Err(e) if classify_anyhow_error(&e).is_not_found() => {
                debug!(image_id = %image_id, "Image already deregistered");
                DeleteResult::AlreadyDeleted
            }
            Err(e) => {
                warn!(
                    region = %self.api.region(),
                    image_id = %image_id,
                    error = %format!("{:#}", e),
                    "Failed to deregister image"
                );
                report
                    .failures
                    .push(format!("deregister {} in {}: {:#}", image_id, self.api.region(), e));
                DeleteResult::Failed
            }
        }
    }

    async fn delete_snapshot(&self, snapshot_id: &str, report: &mut PurgeReport) -> DeleteResult {
        match self.api.delete_snapshot(snapshot_id).await {
            Ok(()) => DeleteResult::Deleted,
            Err(e) if classify_anyhow_error(&e).is_not_found() => {
                debug!(snapshot_id = %snapshot_id, "Snapshot already deleted");
                DeleteResult::AlreadyDeleted
            }
            Err(e) => {
                warn!(
                    region = %self.api.region(),
                    snapshot_id = %snapshot_id,
                    error = %format!("{:#}", e),
                    "Failed to delete snapshot"
                );
                report.failures.push(format!(
                    "delete {} in {}: {:#}",
                    snapshot_id,
                    self.api.region(),
                    e
                ));
                DeleteResult::Failed
            }
        }
    }
}

/// Prune the images of `name` in the client's region.
///
/// Listing failures are returned; per-item deletion failures are in the report.
pub async fn purge_region<A: Ec2Operations>(
    api: &A,
    name: &str,
    windows: &[RetentionWindow],
    dry_run: bool,
) -> Result<PurgeReport> {
    let inventory = catalog::list_managed_images(api, name).await?;
    let plan = retention::evaluate(inventory.ages(), windows);

    info!(
        region = %api.region(),
        name = %name,
        images = inventory.len(),
        windows = windows.len(),
        purge = plan.len(),
        "Evaluated retention windows"
    );

    let snapshots = if plan.is_empty() {
        SnapshotIndex::default()
    } else {
        catalog::snapshot_index(api, &inventory).await?
    };

    Ok(PurgeExecutor::new(api, dry_run)
        .execute(&plan, &inventory, &snapshots)
        .await)
}
