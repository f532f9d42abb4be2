//! Shared helpers for the live AWS integration tests

#![allow(dead_code)]

use amibackup::aws::Ec2Client;

pub use amibackup_test_utils::aws::{
    get_test_dest_region, get_test_instance_name, get_test_region, test_run_id,
};

/// EC2 client for `region`, panicking with a hint when credentials are missing
pub async fn client(region: &str) -> Ec2Client {
    Ec2Client::new(region)
        .await
        .expect("AWS credentials required - set AWS_PROFILE or AWS_ACCESS_KEY_ID")
}
