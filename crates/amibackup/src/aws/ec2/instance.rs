//! Backup target discovery

use super::Ec2Client;
use super::types::InstanceInfo;
use crate::aws::tags::{TAG_NAME, from_ec2_tags, tag_filter, tag_value};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::Filter;
use tracing::debug;

/// Instance states worth imaging; terminated and shutting-down are skipped
const LIVE_STATES: &[&str] = &["pending", "running", "stopping", "stopped"];

impl Ec2Client {
    /// List non-terminated instances whose `Name` tag equals `name`.
    pub async fn describe_instances_by_name(&self, name: &str) -> Result<Vec<InstanceInfo>> {
        let mut found = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut state_filter = Filter::builder().name("instance-state-name");
            for state in LIVE_STATES {
                state_filter = state_filter.values(*state);
            }

            let response = self
                .client
                .describe_instances()
                .filters(tag_filter(TAG_NAME, name))
                .filters(state_filter.build())
                .set_next_token(next_token.take())
                .send()
                .await
                .with_context(|| format!("Failed to describe instances named {}", name))?;

            for instance in response.reservations().iter().flat_map(|r| r.instances()) {
                let Some(instance_id) = instance.instance_id() else {
                    continue;
                };
                let tags = from_ec2_tags(instance.tags());
                found.push(InstanceInfo {
                    instance_id: instance_id.to_string(),
                    name: tag_value(&tags, TAG_NAME).unwrap_or(name).to_string(),
                    state: instance
                        .state()
                        .and_then(|s| s.name())
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                });
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(
            region = %self.region,
            name = %name,
            count = found.len(),
            "Described instances"
        );
        Ok(found)
    }
}
