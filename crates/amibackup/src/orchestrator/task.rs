//! Per-instance backup task
//!
//! Create, tag, wait, and when the destination differs, copy, tag, wait.
//! A task never returns an error: every failure ends in an
//! [`InstanceOutcome`] with phase [`BackupPhase::Failed`].

use super::progress::PhaseReporter;
use super::types::{BackupPhase, InstanceOutcome};
use crate::aws::ec2::{CopyImageRequest, CreateImageRequest, Ec2Operations, ImageState};
use crate::aws::error::classify_anyhow_error;
use crate::config::{Encryption, ImageOptions};
use crate::wait::{PollStatus, WaitConfig, wait_for_resource};
use amibackup_common::Provenance;
use amibackup_common::tags::{format_date, format_name_stamp};
use anyhow::{Context, Result};
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Settings shared by every task of a run
#[derive(Debug, Clone)]
pub(crate) struct TaskSettings {
    pub image: ImageOptions,
    pub encryption: Encryption,
    pub wait: WaitConfig,
    /// Backup time written into every image's tags
    pub taken_at: DateTime<Utc>,
}

/// One instance to back up
#[derive(Debug, Clone)]
pub struct BackupTarget {
    /// Name tag the instance was selected by
    pub name: String,
    pub instance_id: String,
}

impl BackupTarget {
    pub fn new(name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_id: instance_id.into(),
        }
    }
}

pub(crate) struct BackupTask<A> {
    pub source: Arc<A>,
    pub dest: Arc<A>,
    pub settings: Arc<TaskSettings>,
    pub cancel: CancellationToken,
    pub reporter: PhaseReporter,
    pub target: BackupTarget,
}

impl<A: Ec2Operations> BackupTask<A> {
    pub async fn run(self) -> InstanceOutcome {
        let mut outcome = InstanceOutcome::new(&self.target.name, &self.target.instance_id);
        if let Err(e) = self.execute(&mut outcome).await {
            error!(
                instance_id = %self.target.instance_id,
                name = %self.target.name,
                error = %format!("{:#}", e),
                "Backup failed"
            );
            let region = match outcome.phase {
                BackupPhase::Copying | BackupPhase::WaitCopy => self.dest.region(),
                _ => self.source.region(),
            };
            outcome.phase = BackupPhase::Failed;
            outcome.error = Some(format!("{:#}", e));
            self.reporter.report(BackupPhase::Failed, None, region);
        }
        outcome
    }

    async fn execute(&self, outcome: &mut InstanceOutcome) -> Result<()> {
        let settings = &self.settings;
        let target = &self.target;
        let source_region = self.source.region();
        let provenance = Provenance::new(&target.name, &target.instance_id, settings.taken_at);
        let stamp = format_name_stamp(settings.taken_at);
        let date = format_date(settings.taken_at);

        outcome.phase = BackupPhase::Creating;
        self.reporter.report(BackupPhase::Creating, None, source_region);

        let request = CreateImageRequest::new(
            &target.instance_id,
            format!("{}-{}-{}", target.name, stamp, target.instance_id),
            format!("{} {} {}", target.name, date, target.instance_id),
        )
        .with_no_reboot(settings.image.no_reboot)
        .with_excluded_devices(settings.image.excluded_devices.clone());

        let image_id = with_backoff("CreateImage", || self.source.create_image(request.clone()))
            .await
            .with_context(|| format!("Failed to create image of {}", target.instance_id))?;
        outcome.source_image_id = Some(image_id.clone());

        let tags = provenance.to_tags();
        with_backoff("CreateTags", || self.source.create_tags(&image_id, &tags))
            .await
            .with_context(|| format!("Failed to tag {} in {}", image_id, source_region))?;

        outcome.phase = BackupPhase::WaitCreate;
        self.reporter
            .report(BackupPhase::WaitCreate, Some(&image_id), source_region);
        self.wait_available(self.source.as_ref(), &image_id).await?;

        outcome.phase = BackupPhase::Created;
        self.reporter
            .report(BackupPhase::Created, Some(&image_id), source_region);

        let dest_region = self.dest.region();
        if dest_region == source_region {
            return Ok(());
        }

        outcome.phase = BackupPhase::Copying;
        self.reporter.report(BackupPhase::Copying, None, dest_region);

        let mut copy = CopyImageRequest::new(
            source_region,
            &image_id,
            format!("{}-{}-{}", target.name, stamp, image_id),
            format!(
                "{} {} {} from {}/{}",
                target.name, date, target.instance_id, source_region, image_id
            ),
        );
        if settings.encryption.enabled {
            copy = copy.with_encryption(settings.encryption.kms_key_id.clone());
        }

        let copy_id = with_backoff("CopyImage", || self.dest.copy_image(copy.clone()))
            .await
            .with_context(|| format!("Failed to copy {} to {}", image_id, dest_region))?;
        outcome.dest_image_id = Some(copy_id.clone());

        let copy_tags = provenance.copied_from(source_region).to_tags();
        with_backoff("CreateTags", || self.dest.create_tags(&copy_id, &copy_tags))
            .await
            .with_context(|| format!("Failed to tag {} in {}", copy_id, dest_region))?;

        outcome.phase = BackupPhase::WaitCopy;
        self.reporter
            .report(BackupPhase::WaitCopy, Some(&copy_id), dest_region);
        self.wait_available(self.dest.as_ref(), &copy_id).await?;

        outcome.phase = BackupPhase::Replicated;
        self.reporter
            .report(BackupPhase::Replicated, Some(&copy_id), dest_region);
        Ok(())
    }

    async fn wait_available(&self, api: &A, image_id: &str) -> Result<()> {
        let resource = format!("image {} in {}", image_id, api.region());
        wait_for_resource(
            &self.settings.wait,
            Some(&self.cancel),
            move || async move {
                // Not yet visible counts as not ready
                let Some(info) = api.describe_image(image_id).await? else {
                    return Ok(PollStatus::NotReady);
                };
                Ok(match info.state {
                    ImageState::Available => PollStatus::Ready(()),
                    ImageState::Creating => PollStatus::NotReady,
                    state @ (ImageState::Failed | ImageState::Deregistered) => {
                        PollStatus::Failed(format!("image entered state {}", state))
                    }
                })
            },
            &resource,
        )
        .await?;
        Ok(())
    }
}

/// Retry a mutating call while EC2 throttles it.
async fn with_backoff<T, F, Fut>(operation: &str, call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    call.retry(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(30))
            .with_max_times(5),
    )
    .when(|e| classify_anyhow_error(e).is_retryable())
    .notify(|e, dur| {
        warn!(
            operation = %operation,
            delay = ?dur,
            error = %e,
            "Throttled, retrying..."
        );
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::AwsError;
    use crate::orchestrator::types::PhaseUpdate;
    use crate::testing::{FakeEc2, FakeOp, ImageFate};
    use amibackup_common::tags::{TAG_HOSTNAME, TAG_SOURCE_REGION, TAG_TIMESTAMP};
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    fn taken_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn task(
        source: Arc<FakeEc2>,
        dest: Arc<FakeEc2>,
        encryption: Encryption,
    ) -> (BackupTask<FakeEc2>, mpsc::UnboundedReceiver<PhaseUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = BackupTask {
            source,
            dest,
            settings: Arc::new(TaskSettings {
                image: ImageOptions {
                    no_reboot: true,
                    excluded_devices: vec!["/dev/sdb".into()],
                },
                encryption,
                wait: WaitConfig {
                    poll_interval: Duration::from_secs(5),
                },
                taken_at: taken_at(),
            }),
            cancel: CancellationToken::new(),
            reporter: PhaseReporter::new(tx, "i-1"),
            target: BackupTarget::new("web", "i-1"),
        };
        (task, rx)
    }

    fn phases(rx: &mut mpsc::UnboundedReceiver<PhaseUpdate>) -> Vec<BackupPhase> {
        let mut phases = Vec::new();
        while let Ok(update) = rx.try_recv() {
            phases.push(update.phase);
        }
        phases
    }

    fn regions() -> (Arc<FakeEc2>, Arc<FakeEc2>) {
        let source = FakeEc2::new("us-east-1");
        source.add_instance("i-1", "web");
        source.set_default_fate(ImageFate::AvailableAfter(2));
        (Arc::new(source), Arc::new(FakeEc2::new("us-west-1")))
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_replicate() {
        let (source, dest) = regions();
        let (task, mut rx) = task(source.clone(), dest.clone(), Encryption::default());

        let outcome = task.run().await;
        assert!(outcome.is_success());
        assert_eq!(outcome.phase, BackupPhase::Replicated);
        assert_eq!(
            phases(&mut rx),
            vec![
                BackupPhase::Creating,
                BackupPhase::WaitCreate,
                BackupPhase::Created,
                BackupPhase::Copying,
                BackupPhase::WaitCopy,
                BackupPhase::Replicated,
            ]
        );

        let create = &source.create_requests()[0];
        assert!(create.no_reboot);
        assert_eq!(create.excluded_devices, vec!["/dev/sdb"]);
        assert_eq!(create.name, "web-2024-06-01_12-00-00-i-1");

        let source_image = outcome.source_image_id.unwrap();
        let tags = source.image_tags(&source_image);
        assert!(tags.contains(&(TAG_HOSTNAME.into(), "web".into())));
        assert!(tags.contains(&(TAG_TIMESTAMP.into(), taken_at().timestamp().to_string())));

        let copy = &dest.copy_requests()[0];
        assert_eq!(copy.source_image_id, source_image);
        assert_eq!(copy.source_region, "us-east-1");
        assert!(!copy.encrypted);

        let copy_tags = dest.image_tags(&outcome.dest_image_id.unwrap());
        assert!(copy_tags.contains(&(TAG_SOURCE_REGION.into(), "us-east-1".into())));
        assert!(copy_tags.contains(&(TAG_TIMESTAMP.into(), taken_at().timestamp().to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_region_stops_at_created() {
        let (source, _) = regions();
        let (task, mut rx) = task(source.clone(), source.clone(), Encryption::default());

        let outcome = task.run().await;
        assert_eq!(outcome.phase, BackupPhase::Created);
        assert!(outcome.dest_image_id.is_none());
        assert!(source.copy_requests().is_empty());
        assert_eq!(phases(&mut rx).last(), Some(&BackupPhase::Created));
    }

    #[tokio::test(start_paused = true)]
    async fn test_encrypted_copy_uses_key() {
        let (source, dest) = regions();
        let key = "arn:aws:kms:us-west-1:123456789012:key/abcd".to_string();
        let (task, _rx) = task(
            source,
            dest.clone(),
            Encryption::new(false, Some(key.clone())),
        );

        task.run().await;
        let copy = &dest.copy_requests()[0];
        assert!(copy.encrypted);
        assert_eq!(copy.kms_key_id.as_deref(), Some(key.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_image_state_fails_task() {
        let (source, dest) = regions();
        source.set_default_fate(ImageFate::Fail);
        let (task, mut rx) = task(source, dest.clone(), Encryption::default());

        let outcome = task.run().await;
        assert_eq!(outcome.phase, BackupPhase::Failed);
        assert!(outcome.error.unwrap().contains("failed"));
        assert!(outcome.source_image_id.is_some());
        assert!(dest.copy_requests().is_empty());
        assert_eq!(phases(&mut rx).last(), Some(&BackupPhase::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_create_is_retried() {
        let (source, dest) = regions();
        source.fail_next(FakeOp::CreateImage, AwsError::Throttled);
        source.fail_next(FakeOp::CreateImage, AwsError::Throttled);
        let (task, _rx) = task(source.clone(), dest, Encryption::default());

        let outcome = task.run().await;
        assert!(outcome.is_success());
        assert_eq!(source.calls_to(FakeOp::CreateImage).len(), 3);
        assert_eq!(source.create_requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tag_failure_fails_task() {
        let (source, dest) = regions();
        source.fail_next(
            FakeOp::CreateTags,
            AwsError::Unauthorized {
                message: "denied".into(),
            },
        );
        let (task, _rx) = task(source.clone(), dest, Encryption::default());

        let outcome = task.run().await;
        assert_eq!(outcome.phase, BackupPhase::Failed);
        assert_eq!(source.calls_to(FakeOp::CreateTags).len(), 1);
        assert!(source.calls_to(FakeOp::DescribeImage).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_are_transient() {
        let (source, dest) = regions();
        source.fail_next(FakeOp::DescribeImage, AwsError::Throttled);
        let (task, _rx) = task(source, dest, Encryption::default());

        assert!(task.run().await.is_success());
    }
}
