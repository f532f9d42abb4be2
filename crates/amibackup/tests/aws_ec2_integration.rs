//! EC2 integration tests - actually call AWS APIs
//!
//! These tests are marked `#[ignore]` and only run with:
//! ```
//! AWS_PROFILE=your_profile cargo test --test aws_ec2_integration -- --ignored
//! ```
//!
//! The backup round trip additionally needs `AMIBACKUP_TEST_INSTANCE` set to
//! the Name tag of a disposable instance; it creates real AMIs and removes
//! them again.

mod aws_test_helpers;

use amibackup::aws::Ec2Operations;
use amibackup::catalog::{self, image_reference};
use amibackup::config::BackupConfig;
use amibackup::orchestrator::{self, BackupPhase};
use amibackup::report::RunReport;
use amibackup_common::tags::TAG_HOSTNAME;
use aws_test_helpers::*;
use std::sync::Arc;
use std::time::Duration;

/// Timeout for the create-and-copy round trip (30 minutes)
const BACKUP_TIMEOUT_SECS: u64 = 1800;

#[tokio::test]
#[ignore]
async fn test_describe_missing_image() {
    let client = client(&get_test_region()).await;
    let image = client
        .describe_image("ami-00000000000000000")
        .await
        .expect("describe of a missing image should not error");
    assert!(image.is_none());
}

#[tokio::test]
#[ignore]
async fn test_unknown_name_has_empty_inventory() {
    let client = client(&get_test_region()).await;
    let name = test_run_id();

    let images = client
        .describe_images_by_tag(TAG_HOSTNAME, &name)
        .await
        .expect("Should list images");
    assert!(images.is_empty());

    let inventory = catalog::list_managed_images(&client, &name)
        .await
        .expect("Should build inventory");
    assert!(inventory.is_empty());
    assert!(
        catalog::find_instances(&client, &name)
            .await
            .expect("Should list instances")
            .is_empty()
    );
}

#[tokio::test]
#[ignore]
async fn test_describe_owned_snapshots() {
    let client = client(&get_test_region()).await;
    let snapshots = client
        .describe_owned_snapshots()
        .await
        .expect("Should list snapshots");
    for snapshot in &snapshots {
        assert!(
            snapshot.snapshot_id.starts_with("snap-"),
            "Snapshot ID should start with 'snap-', got: {}",
            snapshot.snapshot_id
        );
    }
}

/// Create and replicate a backup of the test instance, then remove it
#[tokio::test]
#[ignore]
async fn test_backup_round_trip() {
    let Some(name) = get_test_instance_name() else {
        eprintln!("AMIBACKUP_TEST_INSTANCE not set, skipping");
        return;
    };
    let source_region = get_test_region();
    let dest_region = get_test_dest_region();
    let source = Arc::new(client(&source_region).await);
    let dest = Arc::new(client(&dest_region).await);

    let mut config = BackupConfig::new(vec![name.clone()]);
    config.regions.source = source_region.clone();
    config.regions.dest = dest_region.clone();
    config.flags.timeout = Duration::from_secs(BACKUP_TIMEOUT_SECS);
    config.flags.poll_interval = Duration::from_secs(15);
    let mut report = RunReport::new(&config);

    let result = orchestrator::run(source.clone(), dest.clone(), &config, &mut report).await;

    // Clean up whatever was created before asserting
    for outcome in &report.outcomes {
        if let Some(id) = &outcome.source_image_id {
            remove_image(source.as_ref(), id).await;
        }
        if let Some(id) = &outcome.dest_image_id {
            remove_image(dest.as_ref(), id).await;
        }
    }

    result.expect("Backup run should succeed");
    assert!(!report.outcomes.is_empty());
    for outcome in &report.outcomes {
        assert_eq!(outcome.phase, BackupPhase::Replicated, "{:?}", outcome);
    }
}

async fn remove_image<A: Ec2Operations>(api: &A, image_id: &str) {
    if let Err(e) = api.deregister_image(image_id).await {
        eprintln!("Failed to deregister {}: {:#}", image_id, e);
        return;
    }
    let Ok(snapshots) = api.describe_owned_snapshots().await else {
        return;
    };
    for snapshot in snapshots {
        if image_reference(&snapshot.description) == Some(image_id) {
            if let Err(e) = api.delete_snapshot(&snapshot.snapshot_id).await {
                eprintln!("Failed to delete {}: {:#}", snapshot.snapshot_id, e);
            }
        }
    }
}
