//! EBS snapshot listing and deletion

use super::Ec2Client;
use super::types::SnapshotInfo;
use anyhow::{Context, Result};
use tracing::{debug, info};

impl Ec2Client {
    /// List every snapshot owned by this account in the region.
    pub async fn describe_owned_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let mut snapshots = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .describe_snapshots()
                .owner_ids("self")
                .set_next_token(next_token.take())
                .send()
                .await
                .context("Failed to describe snapshots")?;

            snapshots.extend(response.snapshots().iter().filter_map(|s| {
                Some(SnapshotInfo {
                    snapshot_id: s.snapshot_id()?.to_string(),
                    description: s.description().unwrap_or_default().to_string(),
                })
            }));

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(region = %self.region, count = snapshots.len(), "Described owned snapshots");
        Ok(snapshots)
    }

    /// Delete a snapshot.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.client
            .delete_snapshot()
            .snapshot_id(snapshot_id)
            .send()
            .await
            .with_context(|| format!("Failed to delete snapshot {}", snapshot_id))?;

        info!(region = %self.region, snapshot_id = %snapshot_id, "Deleted snapshot");
        Ok(())
    }
}
