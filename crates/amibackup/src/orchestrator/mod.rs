//! Backup orchestration
//!
//! [`run`] drives one invocation: purge old images in every affected region,
//! then back up each matching instance concurrently under a global deadline.
//!
//! - [`engine`]: the supervising loop and its pending-operation table
//! - [`task`]: the per-instance create/copy state machine
//! - [`progress`]: phase reporting from tasks to the supervisor
//! - [`types`]: phases, pending operations and outcomes

pub mod engine;
pub mod progress;
pub mod task;
pub mod types;

pub use engine::run_backups;
pub use progress::PhaseReporter;
pub use task::BackupTarget;
pub use types::{BackupPhase, InstanceOutcome, PendingOperation, PhaseUpdate};

use crate::aws::ec2::Ec2Operations;
use crate::catalog;
use crate::config::BackupConfig;
use crate::error::RunError;
use crate::purge::purge_region;
use crate::report::RunReport;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Find the instances behind each target name.
///
/// A name that matches nothing, or whose lookup fails, becomes a warning on
/// the report. An instance matched by several names is backed up once.
pub async fn resolve_targets<A: Ec2Operations>(
    api: &A,
    names: &[String],
    report: &mut RunReport,
) -> Vec<BackupTarget> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for name in names {
        match catalog::find_instances(api, name).await {
            Ok(instances) if instances.is_empty() => {
                warn!(name = %name, region = %api.region(), "No instances with matching name tag");
                report.warn(format!("No instances with matching name tag: {}", name));
            }
            Ok(instances) => {
                for instance in instances {
                    if seen.insert(instance.instance_id.clone()) {
                        targets.push(BackupTarget::new(name, instance.instance_id));
                    }
                }
            }
            Err(e) => {
                warn!(name = %name, error = %format!("{:#}", e), "Instance lookup failed");
                report.warn(format!("Error finding instances named {}: {:#}", name, e));
            }
        }
    }
    targets
}

/// Run one invocation against a source and destination region.
///
/// Purge runs to completion before any image is created. Progress is
/// recorded on `report` as it happens; the returned error is the one that
/// aborted the run, if any.
pub async fn run<A: Ec2Operations + 'static>(
    source: Arc<A>,
    dest: Arc<A>,
    config: &BackupConfig,
    report: &mut RunReport,
) -> Result<(), RunError> {
    config.validate()?;

    if config.windows.is_empty() {
        debug!("No retention windows given, skipping purge");
    } else {
        let mut regions = vec![Arc::clone(&source)];
        if dest.region() != source.region() {
            regions.push(Arc::clone(&dest));
        }
        for name in &config.targets {
            for api in &regions {
                match purge_region(api.as_ref(), name, &config.windows, config.dry_run()).await {
                    Ok(purge) => report.add_purge(purge),
                    Err(e) => {
                        warn!(
                            name = %name,
                            region = %api.region(),
                            error = %format!("{:#}", e),
                            "Purge failed"
                        );
                        report.warn(format!(
                            "Error pruning old AMIs for {} in {}: {:#}",
                            name,
                            api.region(),
                            e
                        ));
                    }
                }
            }
        }
    }

    if config.prune_only() {
        info!("Pruning done and --prune-only specified");
        report.note("Pruning done and --prune-only specified");
        return Ok(());
    }

    let targets = resolve_targets(source.as_ref(), &config.targets, report).await;
    if targets.is_empty() {
        return Err(RunError::NoInstances {
            targets: config.targets.clone(),
        });
    }

    if config.dry_run() {
        for target in &targets {
            info!(
                instance_id = %target.instance_id,
                name = %target.name,
                source = %source.region(),
                dest = %dest.region(),
                "[DRY RUN] Would create and replicate image"
            );
        }
        report.note(format!(
            "[DRY RUN] Would back up {} instance(s)",
            targets.len()
        ));
        return Ok(());
    }

    report.outcomes = run_backups(source, dest, targets, config).await?;
    Ok(())
}
