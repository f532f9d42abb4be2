//! Run results: disposition, summary tables, JSON and monitoring output
//!
//! `RunReport` accumulates everything a run did. It is filled in as the run
//! progresses, so a run that aborts still reports the purges it completed.

use crate::aws::ec2::InstanceInfo;
use crate::catalog::Inventory;
use crate::config::BackupConfig;
use crate::error::RunError;
use crate::orchestrator::{BackupPhase, InstanceOutcome, PendingOperation};
use crate::purge::PurgeReport;
use amibackup_common::Disposition;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Everything one invocation did
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub source_region: String,
    pub dest_region: String,
    pub dry_run: bool,
    pub prune_only: bool,
    pub purges: Vec<PurgeReport>,
    pub outcomes: Vec<InstanceOutcome>,
    /// Non-fatal problems, e.g. a target with no matching instance
    pub warnings: Vec<String>,
    /// Informational lines for the monitoring output
    pub notes: Vec<String>,
    /// Operations still running when the global deadline fired
    pub pending: Vec<PendingOperation>,
    /// The error that aborted the run
    pub fatal: Option<String>,
}

impl RunReport {
    pub fn new(config: &BackupConfig) -> Self {
        Self {
            started_at: Utc::now(),
            source_region: config.source_region().to_string(),
            dest_region: config.dest_region().to_string(),
            dry_run: config.dry_run(),
            prune_only: config.prune_only(),
            purges: Vec::new(),
            outcomes: Vec::new(),
            warnings: Vec::new(),
            notes: Vec::new(),
            pending: Vec::new(),
            fatal: None,
        }
    }

    pub fn add_purge(&mut self, report: PurgeReport) {
        self.purges.push(report);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }

    /// Record the error that aborted the run
    pub fn abort(&mut self, err: RunError) {
        if let RunError::GlobalTimeout { pending, .. } = &err {
            self.pending = pending.clone();
        }
        self.fatal = Some(err.to_string());
    }

    /// Overall result: critical if aborted, warning if anything failed
    pub fn disposition(&self) -> Disposition {
        let mut disposition = Disposition::Ok;
        if !self.warnings.is_empty()
            || self.outcomes.iter().any(|o| !o.is_success())
            || self.purges.iter().any(PurgeReport::had_errors)
        {
            disposition = disposition.escalate(Disposition::Warning);
        }
        if self.fatal.is_some() {
            disposition = disposition.escalate(Disposition::Critical);
        }
        disposition
    }

    /// Human readable lines, most severe first
    pub fn messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if let Some(fatal) = &self.fatal {
            messages.push(fatal.clone());
            if !self.pending.is_empty() {
                let pending: Vec<String> = self.pending.iter().map(|p| p.to_string()).collect();
                messages.push(format!("pending: {}", pending.join(", ")));
            }
        }
        messages.extend(self.warnings.iter().cloned());

        for purge in &self.purges {
            for failure in &purge.failures {
                messages.push(format!("Error pruning: {}", failure));
            }
            if purge.dry_run && purge.candidates > 0 {
                messages.push(format!(
                    "[DRY RUN] Would prune {} old AMI(s) for {} in {}",
                    purge.candidates, purge.name, purge.region
                ));
            } else if purge.deregistered > 0 {
                messages.push(format!(
                    "Pruned {} old AMI(s) for {} in {}",
                    purge.deregistered, purge.name, purge.region
                ));
            }
        }

        for outcome in &self.outcomes {
            match (&outcome.error, outcome.phase) {
                (Some(error), _) => messages.push(format!(
                    "Error backing up {}: {}",
                    outcome.instance_id, error
                )),
                (None, BackupPhase::Replicated) => messages.push(format!(
                    "Created new AMI {} and copied to {} as {}",
                    outcome.source_image_id.as_deref().unwrap_or("-"),
                    self.dest_region,
                    outcome.dest_image_id.as_deref().unwrap_or("-")
                )),
                (None, _) => messages.push(format!(
                    "Created new AMI {}",
                    outcome.source_image_id.as_deref().unwrap_or("-")
                )),
            }
        }

        messages.extend(self.notes.iter().cloned());
        messages
    }

    /// One-line monitoring status, e.g. `AMIbackup OK: Created new AMI ami-1`
    pub fn status_line(&self) -> String {
        format!(
            "AMIbackup {}: {}",
            self.disposition(),
            self.messages().join(", ")
        )
    }

    /// Summary tables of purges and backups
    pub fn summary(&self) -> String {
        let mut out = String::new();

        if !self.purges.is_empty() {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("Region"),
                    Cell::new("Name"),
                    Cell::new("Images"),
                    Cell::new("Purge"),
                    Cell::new("Deregistered"),
                    Cell::new("Snapshots"),
                    Cell::new("Failed"),
                ]);
            for purge in &self.purges {
                let planned = if purge.dry_run {
                    format!("{} (dry run)", purge.candidates)
                } else {
                    purge.candidates.to_string()
                };
                table.add_row(vec![
                    Cell::new(&purge.region),
                    Cell::new(&purge.name),
                    Cell::new(purge.inventory),
                    Cell::new(&planned),
                    Cell::new(purge.deregistered),
                    Cell::new(purge.snapshots_deleted),
                    Cell::new(purge.failed),
                ]);
            }
            out.push_str(&format!("\n=== Retention ===\n\n{table}\n"));
        }

        if !self.outcomes.is_empty() {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("Instance"),
                    Cell::new("Name"),
                    Cell::new("Phase"),
                    Cell::new(format!("AMI ({})", self.source_region)),
                    Cell::new(format!("AMI ({})", self.dest_region)),
                    Cell::new("Error"),
                ]);
            for outcome in &self.outcomes {
                table.add_row(vec![
                    Cell::new(&outcome.instance_id),
                    Cell::new(&outcome.name),
                    Cell::new(outcome.phase),
                    Cell::new(outcome.source_image_id.as_deref().unwrap_or("-")),
                    Cell::new(outcome.dest_image_id.as_deref().unwrap_or("-")),
                    Cell::new(outcome.error.as_deref().unwrap_or("")),
                ]);
            }
            out.push_str(&format!("\n=== Backups ===\n\n{table}\n"));
        }

        out.push_str(&format!("\n{}\n", self.disposition()));
        for message in self.messages() {
            out.push_str(&format!("  {}\n", message));
        }
        out
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let output = serde_json::json!({
            "disposition": self.disposition(),
            "exit_code": self.disposition().exit_code(),
            "written_at": Utc::now().to_rfc3339(),
            "run": self,
        });
        std::fs::write(path, serde_json::to_string_pretty(&output)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Report written");
        Ok(())
    }
}

/// Table of managed images, one row per image, newest first
pub fn inventory_table(inventories: &[Inventory]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Region"),
            Cell::new("AMI"),
            Cell::new("Taken"),
            Cell::new("Age"),
            Cell::new("Instance"),
            Cell::new("State"),
            Cell::new("Copied From"),
        ]);

    let now = Utc::now();
    for inventory in inventories {
        for image in inventory.newest_first() {
            let age = now - image.timestamp;
            table.add_row(vec![
                Cell::new(&image.region),
                Cell::new(&image.id),
                Cell::new(image.timestamp.format("%Y-%m-%d %H:%M:%S")),
                Cell::new(format!("{}d {}h", age.num_days(), age.num_hours() % 24)),
                Cell::new(image.instance_id.as_deref().unwrap_or("-")),
                Cell::new(image.state),
                Cell::new(image.source_region.as_deref().unwrap_or("-")),
            ]);
        }
    }
    table
}

/// Instances carrying the inventoried name, in listing order.
pub fn instance_table(region: &str, instances: &[InstanceInfo]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Region"),
            Cell::new("Instance"),
            Cell::new("Name"),
            Cell::new("State"),
        ]);

    for instance in instances {
        table.add_row(vec![
            Cell::new(region),
            Cell::new(&instance.instance_id),
            Cell::new(&instance.name),
            Cell::new(&instance.state),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report() -> RunReport {
        RunReport::new(&BackupConfig::new(vec!["web".into()]))
    }

    fn outcome(instance_id: &str, phase: BackupPhase) -> InstanceOutcome {
        InstanceOutcome {
            name: "web".into(),
            instance_id: instance_id.into(),
            phase,
            source_image_id: Some("ami-src".into()),
            dest_image_id: (phase == BackupPhase::Replicated).then(|| "ami-dst".into()),
            error: (phase == BackupPhase::Failed).then(|| "boom".into()),
        }
    }

    #[test]
    fn test_clean_run_is_ok() {
        let mut report = report();
        report.outcomes.push(outcome("i-1", BackupPhase::Replicated));
        assert_eq!(report.disposition(), Disposition::Ok);
        assert_eq!(
            report.status_line(),
            "AMIbackup OK: Created new AMI ami-src and copied to us-west-1 as ami-dst"
        );
    }

    #[test]
    fn test_failed_instance_is_warning() {
        let mut report = report();
        report.outcomes.push(outcome("i-1", BackupPhase::Replicated));
        report.outcomes.push(outcome("i-2", BackupPhase::Failed));
        assert_eq!(report.disposition(), Disposition::Warning);
        let line = report.status_line();
        assert!(line.starts_with("AMIbackup WARNING: "));
        assert!(line.contains("Error backing up i-2: boom"));
    }

    #[test]
    fn test_purge_failure_is_warning() {
        let mut report = report();
        report.add_purge(PurgeReport {
            region: "us-east-1".into(),
            name: "web".into(),
            failed: 1,
            failures: vec!["deregister ami-1 in us-east-1: denied".into()],
            ..Default::default()
        });
        assert_eq!(report.disposition(), Disposition::Warning);
    }

    #[test]
    fn test_timeout_is_critical_and_lists_pending() {
        let mut report = report();
        report.abort(RunError::GlobalTimeout {
            timeout: Duration::from_secs(300),
            pending: vec![
                PendingOperation {
                    image_id: Some("ami-9".into()),
                    phase: BackupPhase::WaitCopy,
                    ..PendingOperation::new("web", "i-1", "us-west-1")
                },
            ],
        });
        assert_eq!(report.disposition(), Disposition::Critical);
        assert_eq!(report.pending.len(), 1);
        let line = report.status_line();
        assert!(line.starts_with("AMIbackup CRITICAL: global timeout of 300s"));
        assert!(line.contains("i-1 ami-9 in us-west-1 (wait-copy)"));
    }

    #[test]
    fn test_summary_and_json() {
        let mut report = report();
        report.outcomes.push(outcome("i-1", BackupPhase::Created));
        report.note("dry run");
        let summary = report.summary();
        assert!(summary.contains("i-1"));
        assert!(summary.contains("OK"));

        let path = std::env::temp_dir().join(format!("amibackup-report-{}.json", std::process::id()));
        report.write_json(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["run"]["outcomes"][0]["phase"], "created");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_instance_table_lists_every_match() {
        let instance = |id: &str, state: &str| InstanceInfo {
            instance_id: id.into(),
            name: "web".into(),
            state: state.into(),
        };
        let table = instance_table("us-east-1", &[instance("i-1", "running"), instance("i-2", "stopped")]);
        assert_eq!(table.row_iter().count(), 2);
        let rendered = table.to_string();
        assert!(rendered.contains("i-1"));
        assert!(rendered.contains("stopped"));
        assert!(rendered.contains("us-east-1"));
    }
}
