//! Core types for the orchestrator
//!
//! `BackupPhase` is the per-instance state machine, `PendingOperation` the
//! supervisor's view of an unfinished task, and `InstanceOutcome` what a task
//! hands back when it ends.

use serde::Serialize;

/// Lifecycle of one instance backup
///
/// `Idle → Creating → WaitCreate → Created → Copying → WaitCopy → Replicated`,
/// with `Failed` reachable from any non-terminal phase. `Created` is terminal
/// when source and destination are the same region.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum BackupPhase {
    #[default]
    Idle,
    Creating,
    WaitCreate,
    Created,
    Copying,
    WaitCopy,
    Replicated,
    Failed,
}

/// An instance backup that has not finished yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingOperation {
    /// Name tag the instance was selected by
    pub name: String,
    pub instance_id: String,
    /// Image the task is waiting on: the source AMI while creating, the
    /// destination AMI while copying
    pub image_id: Option<String>,
    /// Region of `image_id`
    pub region: String,
    pub phase: BackupPhase,
}

impl PendingOperation {
    pub fn new(
        name: impl Into<String>,
        instance_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instance_id: instance_id.into(),
            image_id: None,
            region: region.into(),
            phase: BackupPhase::Idle,
        }
    }

    /// Fold a reported transition into this entry.
    ///
    /// An image id only stays valid in its own region.
    pub(crate) fn apply(&mut self, update: PhaseUpdate) {
        if update.image_id.is_some() {
            self.image_id = update.image_id;
        } else if update.region != self.region {
            self.image_id = None;
        }
        self.phase = update.phase;
        self.region = update.region;
    }

    /// Outcome for a task that ended without reporting one
    pub(crate) fn into_failed_outcome(self) -> InstanceOutcome {
        let mut outcome = InstanceOutcome::new(&self.name, &self.instance_id);
        outcome.error = Some(format!("task ended unexpectedly during {}", self.phase));
        outcome.phase = BackupPhase::Failed;
        outcome.source_image_id = self.image_id;
        outcome
    }
}

impl std::fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} in {} ({})",
            self.instance_id,
            self.image_id.as_deref().unwrap_or("-"),
            self.region,
            self.phase
        )
    }
}

/// Phase transition sent from a task to the supervising loop
#[derive(Debug, Clone)]
pub struct PhaseUpdate {
    pub instance_id: String,
    pub phase: BackupPhase,
    /// Newly known image id; `None` keeps the previous one
    pub image_id: Option<String>,
    pub region: String,
}

/// Final state of one instance backup
#[derive(Debug, Clone, Serialize)]
pub struct InstanceOutcome {
    /// Name tag the instance was selected by
    pub name: String,
    pub instance_id: String,
    pub phase: BackupPhase,
    pub source_image_id: Option<String>,
    pub dest_image_id: Option<String>,
    pub error: Option<String>,
}

impl InstanceOutcome {
    pub(crate) fn new(name: &str, instance_id: &str) -> Self {
        Self {
            name: name.to_string(),
            instance_id: instance_id.to_string(),
            phase: BackupPhase::Idle,
            source_image_id: None,
            dest_image_id: None,
            error: None,
        }
    }

    /// Whether the backup reached its terminal success phase
    pub fn is_success(&self) -> bool {
        self.phase != BackupPhase::Failed && self.error.is_none()
    }
}
