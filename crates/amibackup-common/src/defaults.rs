//! Default configuration values
//!
//! These constants keep the CLI, the orchestrator and the tests in agreement.

/// Default region of the running instances
pub const DEFAULT_SOURCE_REGION: &str = "us-east-1";

/// Default region the backup copies are stored in
pub const DEFAULT_DEST_REGION: &str = "us-west-1";

/// Default global deadline for the create-and-replicate phase (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default interval between image state polls (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Regions accepted for `--source` / `--dest`
pub const KNOWN_REGIONS: &[&str] = &[
    "af-south-1",
    "ap-east-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-southeast-5",
    "ca-central-1",
    "ca-west-1",
    "cn-north-1",
    "cn-northwest-1",
    "eu-central-1",
    "eu-central-2",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "il-central-1",
    "me-central-1",
    "me-south-1",
    "sa-east-1",
    "us-east-1",
    "us-east-2",
    "us-gov-east-1",
    "us-gov-west-1",
    "us-west-1",
    "us-west-2",
];

/// Check whether `region` is a region amibackup knows how to address
pub fn is_known_region(region: &str) -> bool {
    KNOWN_REGIONS.contains(&region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_known() {
        assert!(is_known_region(DEFAULT_SOURCE_REGION));
        assert!(is_known_region(DEFAULT_DEST_REGION));
        assert!(!is_known_region("mars-north-1"));
        assert!(!is_known_region(""));
    }
}
