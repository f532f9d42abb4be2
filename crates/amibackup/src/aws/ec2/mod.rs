//! EC2 image, snapshot and instance management

mod image;
mod instance;
mod operations;
mod snapshot;
mod types;

pub use operations::Ec2Operations;
pub use types::{
    BlockDevice, CopyImageRequest, CreateImageRequest, ImageInfo, ImageState, InstanceInfo,
    SnapshotInfo,
};

use crate::aws::context::{AwsContext, FromAwsContext};
use anyhow::Result;
use aws_sdk_ec2::Client;

/// EC2 client bound to a single region
#[derive(Clone)]
pub struct Ec2Client {
    pub(crate) client: Client,
    pub(crate) region: String,
}

impl Ec2Client {
    /// Create a new EC2 client (loads AWS config from environment)
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    /// Create an EC2 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ec2_client(),
            region: ctx.region().to_string(),
        }
    }
}

impl FromAwsContext for Ec2Client {
    fn from_aws_context(ctx: &AwsContext) -> Self {
        Self::from_context(ctx)
    }
}

impl std::fmt::Debug for Ec2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ec2Client")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}
