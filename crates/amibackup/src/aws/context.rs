//! Shared AWS configuration context
//!
//! Provides `AwsContext` for loading AWS SDK configuration once per region
//! and creating service clients from the same config.

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::ProvideCredentials;
use std::sync::Arc;
use tracing::debug;

/// Shared AWS configuration context for creating service clients.
///
/// # Example
/// ```ignore
/// let source = AwsContext::with_profile("us-east-1", Some("backup")).await;
/// source.probe_credentials().await?;
/// let ec2 = Ec2Client::from_context(&source);
/// ```
#[derive(Clone)]
pub struct AwsContext {
    config: Arc<SdkConfig>,
    region: String,
}

impl AwsContext {
    /// Load AWS configuration for the specified region using the default
    /// provider chain.
    pub async fn new(region: &str) -> Self {
        Self::with_profile(region, None).await
    }

    /// Load AWS configuration for the region, optionally pinned to a named
    /// profile from the shared config files.
    pub async fn with_profile(region: &str, profile: Option<&str>) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        Self {
            config: Arc::new(config),
            region: region.to_string(),
        }
    }

    /// Get the underlying SDK config for direct client construction.
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Get the region string.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Create an EC2 client from this context.
    pub fn ec2_client(&self) -> aws_sdk_ec2::Client {
        aws_sdk_ec2::Client::new(self.sdk_config())
    }

    /// Resolve credentials once through the provider chain.
    ///
    /// Fails when no provider is configured or none of them yields
    /// credentials, before any EC2 call is attempted.
    pub async fn probe_credentials(&self) -> Result<()> {
        let provider = self
            .config
            .credentials_provider()
            .context("No AWS credentials provider configured")?;

        let creds = provider
            .provide_credentials()
            .await
            .context("Failed to load AWS credentials")?;

        debug!(
            region = %self.region,
            expires = ?creds.expiry(),
            "AWS credentials resolved"
        );
        Ok(())
    }
}

impl std::fmt::Debug for AwsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsContext")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Types that can be constructed from a loaded [`AwsContext`].
pub trait FromAwsContext {
    fn from_aws_context(ctx: &AwsContext) -> Self;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_context_creation() {
        let ctx = AwsContext::new("us-east-2").await;
        assert_eq!(ctx.region(), "us-east-2");
        ctx.probe_credentials().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_context_clone_shares_config() {
        let ctx1 = AwsContext::new("us-east-2").await;
        let ctx2 = ctx1.clone();
        assert_eq!(ctx1.region(), ctx2.region());
        assert!(Arc::ptr_eq(&ctx1.config, &ctx2.config));
    }
}
