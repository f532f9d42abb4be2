//! Supervising loop for a set of backup tasks
//!
//! `run_backups` spawns one task per instance and owns the pending-operation
//! table. Tasks only report phase transitions over a channel; the loop races
//! their completion against a single global deadline.

use super::progress::PhaseReporter;
use super::task::{BackupTarget, BackupTask, TaskSettings};
use super::types::{InstanceOutcome, PendingOperation, PhaseUpdate};
use crate::aws::ec2::Ec2Operations;
use crate::config::BackupConfig;
use crate::error::RunError;
use crate::wait::WaitConfig;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Back up every target concurrently.
///
/// Returns one outcome per target, sorted by instance id, when every task
/// finished before `config.timeout()`. Otherwise the remaining tasks are
/// cancelled and `RunError::GlobalTimeout` lists the ones still pending.
pub async fn run_backups<A: Ec2Operations + 'static>(
    source: Arc<A>,
    dest: Arc<A>,
    targets: Vec<BackupTarget>,
    config: &BackupConfig,
) -> Result<Vec<InstanceOutcome>, RunError> {
    let settings = Arc::new(TaskSettings {
        image: config.image.clone(),
        encryption: config.encryption.clone(),
        wait: WaitConfig {
            poll_interval: config.poll_interval(),
        },
        taken_at: Utc::now(),
    });
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<PhaseUpdate>();

    let mut pending: BTreeMap<String, PendingOperation> = BTreeMap::new();
    let mut tasks = JoinSet::new();
    for target in targets {
        if pending.contains_key(&target.instance_id) {
            debug!(instance_id = %target.instance_id, "Instance already scheduled");
            continue;
        }
        pending.insert(
            target.instance_id.clone(),
            PendingOperation::new(&target.name, &target.instance_id, source.region()),
        );
        let task = BackupTask {
            source: Arc::clone(&source),
            dest: Arc::clone(&dest),
            settings: Arc::clone(&settings),
            cancel: cancel.child_token(),
            reporter: PhaseReporter::new(tx.clone(), &target.instance_id),
            target,
        };
        tasks.spawn(task.run());
    }
    // Only tasks hold senders now
    drop(tx);

    info!(
        instances = pending.len(),
        timeout_secs = config.timeout().as_secs(),
        source = %source.region(),
        dest = %dest.region(),
        "Starting backups"
    );

    let deadline = tokio::time::sleep(config.timeout());
    tokio::pin!(deadline);
    let mut outcomes = Vec::with_capacity(pending.len());

    loop {
        tokio::select! {
            biased;

            Some(update) = rx.recv() => {
                if let Some(op) = pending.get_mut(&update.instance_id) {
                    op.apply(update);
                }
            }

            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok(outcome)) => {
                    pending.remove(&outcome.instance_id);
                    outcomes.push(outcome);
                }
                Some(Err(e)) => {
                    error!(error = %e, "Backup task panicked");
                }
            },

            _ = &mut deadline => {
                cancel.cancel();
                tasks.abort_all();
                while let Ok(update) = rx.try_recv() {
                    if let Some(op) = pending.get_mut(&update.instance_id) {
                        op.apply(update);
                    }
                }
                let pending: Vec<PendingOperation> = pending.into_values().collect();
                for op in &pending {
                    warn!(
                        instance_id = %op.instance_id,
                        image_id = op.image_id.as_deref().unwrap_or("-"),
                        region = %op.region,
                        phase = %op.phase,
                        "Operation still pending at deadline"
                    );
                }
                return Err(RunError::GlobalTimeout {
                    timeout: config.timeout(),
                    pending,
                });
            }
        }
    }

    // A panicked task leaves its entry behind; report it as failed
    outcomes.extend(pending.into_values().map(PendingOperation::into_failed_outcome));

    outcomes.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
    info!(
        succeeded = outcomes.iter().filter(|o| o.is_success()).count(),
        failed = outcomes.iter().filter(|o| !o.is_success()).count(),
        "Backups finished"
    );
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::AwsError;
    use crate::orchestrator::BackupPhase;
    use crate::testing::{FakeEc2, FakeOp, ImageFate};
    use std::time::Duration;

    fn config() -> BackupConfig {
        let mut config = BackupConfig::new(vec!["web".into()]);
        config.flags.timeout = Duration::from_secs(300);
        config.flags.poll_interval = Duration::from_secs(5);
        config
    }

    fn fleet(count: usize) -> (Arc<FakeEc2>, Arc<FakeEc2>, Vec<BackupTarget>) {
        let source = FakeEc2::new("us-east-1");
        let mut targets = Vec::new();
        for i in 0..count {
            let instance_id = format!("i-{i}");
            source.add_instance(&instance_id, "web");
            targets.push(BackupTarget::new("web", instance_id));
        }
        (
            Arc::new(source),
            Arc::new(FakeEc2::new("us-west-1")),
            targets,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_tasks_finish() {
        let (source, dest, targets) = fleet(3);
        source.set_default_fate(ImageFate::AvailableAfter(3));

        let outcomes = run_backups(source, dest.clone(), targets, &config())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.phase == BackupPhase::Replicated));
        assert_eq!(outcomes[0].instance_id, "i-0");
        assert_eq!(dest.copy_requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_does_not_stop_others() {
        let (source, dest, targets) = fleet(3);
        source.fail_always(
            FakeOp::CreateImage,
            "i-1",
            AwsError::Unauthorized {
                message: "denied".into(),
            },
        );

        let outcomes = run_backups(source, dest, targets, &config()).await.unwrap();
        let failed: Vec<_> = outcomes.iter().filter(|o| !o.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].instance_id, "i-1");
        assert_eq!(failed[0].phase, BackupPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reports_pending_copies() {
        let (source, dest, targets) = fleet(3);
        dest.set_fate("i-2", ImageFate::Never);

        let started = tokio::time::Instant::now();
        let err = run_backups(source, dest.clone(), targets, &config())
            .await
            .unwrap_err();
        assert_eq!(started.elapsed(), Duration::from_secs(300));

        let RunError::GlobalTimeout { pending, .. } = err else {
            panic!("expected timeout, got {err:?}");
        };
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].instance_id, "i-2");
        assert_eq!(pending[0].phase, BackupPhase::WaitCopy);
        assert_eq!(pending[0].region, "us-west-1");
        let copy_id = pending[0].image_id.clone().unwrap();
        assert_eq!(dest.image_description(&copy_id).map(|d| d.contains("i-2")), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicked_task_is_reported_failed() {
        let (source, dest, mut targets) = fleet(2);
        targets[1].name = "db".into();
        source.panic_on(FakeOp::CreateImage, "i-1");

        let outcomes = run_backups(source, dest, targets, &config()).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_success());

        let panicked = &outcomes[1];
        assert_eq!(panicked.instance_id, "i-1");
        assert_eq!(panicked.name, "db");
        assert_eq!(panicked.phase, BackupPhase::Failed);
        assert!(panicked.source_image_id.is_none());
        assert!(panicked.error.as_deref().unwrap().contains("creating"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_targets_run_once() {
        let (source, dest, mut targets) = fleet(1);
        targets.push(BackupTarget::new("web-alias", "i-0"));

        let outcomes = run_backups(source.clone(), dest, targets, &config())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(source.create_requests().len(), 1);
    }
}
