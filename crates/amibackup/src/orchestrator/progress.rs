//! Phase reporting from backup tasks to the supervising loop

use super::types::{BackupPhase, PhaseUpdate};
use tokio::sync::mpsc;
use tracing::info;

/// Reports the phase transitions of one instance task
///
/// Each transition is logged and forwarded to the supervisor. Send errors are
/// ignored: the receiver is gone only after the deadline fired.
pub struct PhaseReporter {
    tx: mpsc::UnboundedSender<PhaseUpdate>,
    instance_id: String,
}

impl PhaseReporter {
    pub fn new(tx: mpsc::UnboundedSender<PhaseUpdate>, instance_id: impl Into<String>) -> Self {
        Self {
            tx,
            instance_id: instance_id.into(),
        }
    }

    pub fn report(&self, phase: BackupPhase, image_id: Option<&str>, region: &str) {
        info!(
            instance_id = %self.instance_id,
            phase = %phase,
            image_id = image_id.unwrap_or("-"),
            region = %region,
            "Backup phase"
        );
        let _ = self.tx.send(PhaseUpdate {
            instance_id: self.instance_id.clone(),
            phase,
            image_id: image_id.map(str::to_string),
            region: region.to_string(),
        });
    }
}
