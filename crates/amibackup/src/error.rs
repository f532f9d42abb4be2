//! Invocation-level errors
//!
//! Per-image and per-instance failures are absorbed into reports; only the
//! errors below abort a run, and only `main` turns them into an exit code.

use crate::orchestrator::PendingOperation;
use crate::retention::WindowError;
use amibackup_common::Disposition;
use std::time::Duration;
use thiserror::Error;

/// Rejected configuration, raised before any mutating remote call
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no backup target names given")]
    NoTargets,

    #[error("empty backup target name")]
    EmptyTarget,

    #[error("unknown {role} region '{region}'")]
    UnknownRegion { role: &'static str, region: String },

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("KMS key '{key}' is not a KMS key ARN (arn:aws:kms:<region>:<account>:key/<id>)")]
    KmsKeyNotArn { key: String },

    #[error("KMS key '{key}' is in {key_region}, but copies are stored in {dest_region}")]
    KmsKeyRegion {
        key: String,
        key_region: String,
        dest_region: String,
    },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("empty device name in --ignore-device")]
    EmptyDevice,

    #[error("no usable AWS credentials for {region}: {message}")]
    MissingCredentials { region: String, message: String },
}

/// Errors that abort the whole invocation
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(
        "global timeout of {}s elapsed with {} operation(s) still pending",
        timeout.as_secs(),
        pending.len()
    )]
    GlobalTimeout {
        timeout: Duration,
        pending: Vec<PendingOperation>,
    },

    #[error("no instances found named {}", targets.join(", "))]
    NoInstances { targets: Vec<String> },
}

impl RunError {
    /// Every aborting error is critical for monitoring purposes
    pub fn disposition(&self) -> Disposition {
        Disposition::Critical
    }
}
