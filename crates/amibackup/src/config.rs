//! Configuration types for a backup run
//!
//! `BackupConfig` is built once from command-line arguments, validated, and
//! then passed by reference to the purge and backup paths.

use crate::error::ConfigError;
use crate::retention::RetentionWindow;
use amibackup_common::defaults::{
    DEFAULT_DEST_REGION, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SOURCE_REGION, DEFAULT_TIMEOUT_SECS,
    is_known_region,
};
use std::time::Duration;

/// Source and destination regions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionPair {
    /// Region of the running instances
    pub source: String,
    /// Region the backup copies are stored in
    pub dest: String,
}

impl RegionPair {
    pub fn new(source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
        }
    }

    /// Whether images must be replicated after creation
    pub fn is_cross_region(&self) -> bool {
        self.source != self.dest
    }

    /// Regions the purge path visits: source, then destination if different
    pub fn purge_regions(&self) -> Vec<&str> {
        if self.is_cross_region() {
            vec![self.source.as_str(), self.dest.as_str()]
        } else {
            vec![self.source.as_str()]
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (role, region) in [("source", &self.source), ("destination", &self.dest)] {
            if !is_known_region(region) {
                return Err(ConfigError::UnknownRegion {
                    role,
                    region: region.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for RegionPair {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_REGION, DEFAULT_DEST_REGION)
    }
}

/// CreateImage options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOptions {
    /// Image without rebooting the instance
    pub no_reboot: bool,
    /// Device names left out of the image
    pub excluded_devices: Vec<String>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            no_reboot: true,
            excluded_devices: Vec::new(),
        }
    }
}

/// Encryption of the cross-region copy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encryption {
    pub enabled: bool,
    /// KMS key ARN in the destination region; `None` uses the account default
    pub kms_key_id: Option<String>,
}

impl Encryption {
    /// Encryption settings; naming a key implies encryption.
    pub fn new(enabled: bool, kms_key_id: Option<String>) -> Self {
        Self {
            enabled: enabled || kms_key_id.is_some(),
            kms_key_id,
        }
    }

    fn validate(&self, dest_region: &str) -> Result<(), ConfigError> {
        let Some(key) = &self.kms_key_id else {
            return Ok(());
        };
        let key_region = kms_key_region(key).ok_or_else(|| ConfigError::KmsKeyNotArn {
            key: key.clone(),
        })?;
        if key_region != dest_region {
            return Err(ConfigError::KmsKeyRegion {
                key: key.clone(),
                key_region: key_region.to_string(),
                dest_region: dest_region.to_string(),
            });
        }
        Ok(())
    }
}

/// Region embedded in a KMS key or alias ARN.
///
/// `arn:<partition>:kms:<region>:<account>:key/<id>`
pub fn kms_key_region(key: &str) -> Option<&str> {
    let mut parts = key.splitn(6, ':');
    let (Some("arn"), Some(partition), Some("kms"), Some(region), Some(_account), Some(resource)) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return None;
    };
    if !partition.starts_with("aws") || region.is_empty() {
        return None;
    }
    if !(resource.starts_with("key/") || resource.starts_with("alias/")) {
        return None;
    }
    Some(region)
}

/// Runtime behavior flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFlags {
    /// Log deletions instead of performing them
    pub dry_run: bool,
    /// Skip the create path entirely
    pub prune_only: bool,
    /// Global deadline for the create-and-replicate phase
    pub timeout: Duration,
    /// Delay between image state polls
    pub poll_interval: Duration,
}

impl Default for RunFlags {
    fn default() -> Self {
        Self {
            dry_run: false,
            prune_only: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

/// Configuration for a backup run
///
/// Composed of focused sub-configs, with flat accessors for the fields the
/// orchestrator and purge path read most.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Instance `Name` tag values to back up and prune
    pub targets: Vec<String>,
    pub regions: RegionPair,
    /// Retention tiers; empty means never purge
    pub windows: Vec<RetentionWindow>,
    pub image: ImageOptions,
    pub encryption: Encryption,
    pub flags: RunFlags,
}

impl BackupConfig {
    /// Configuration with defaults for everything but the targets
    pub fn new(targets: Vec<String>) -> Self {
        Self {
            targets,
            regions: RegionPair::default(),
            windows: Vec::new(),
            image: ImageOptions::default(),
            encryption: Encryption::default(),
            flags: RunFlags::default(),
        }
    }

    /// Check everything that can be checked without calling AWS.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if self.targets.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::EmptyTarget);
        }
        self.regions.validate()?;
        self.encryption.validate(&self.regions.dest)?;
        if self.flags.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.flags.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.image.excluded_devices.iter().any(|d| d.trim().is_empty()) {
            return Err(ConfigError::EmptyDevice);
        }
        Ok(())
    }

    pub fn source_region(&self) -> &str {
        &self.regions.source
    }
    pub fn dest_region(&self) -> &str {
        &self.regions.dest
    }
    pub fn dry_run(&self) -> bool {
        self.flags.dry_run
    }
    pub fn prune_only(&self) -> bool {
        self.flags.prune_only
    }
    pub fn timeout(&self) -> Duration {
        self.flags.timeout
    }
    pub fn poll_interval(&self) -> Duration {
        self.flags.poll_interval
    }
}
