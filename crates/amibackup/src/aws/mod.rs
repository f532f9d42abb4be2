//! AWS client modules
//!
//! This module provides wrappers around the AWS SDK for:
//! - context: Shared SDK configuration and credential probing
//! - EC2: Instances, images and snapshots
//! - error: Classification of SDK errors for retry and purge decisions
//! - tags: SDK conversions for the amibackup tag schema

pub mod context;
pub mod ec2;
pub mod error;
pub mod tags;

pub use context::{AwsContext, FromAwsContext};
pub use ec2::{Ec2Client, Ec2Operations};

// Error handling
pub use error::{AwsError, classify_anyhow_error, classify_aws_error};
