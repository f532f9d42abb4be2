//! EC2 types and request configuration

use serde::Serialize;

/// Image lifecycle state, folded from the provider's state names
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ImageState {
    /// `pending` or `transient`
    Creating,
    /// `available` (or `disabled`, which is still registered)
    Available,
    /// `deregistered`
    Deregistered,
    /// `failed`, `error`, `invalid` and anything unrecognised
    Failed,
}

impl ImageState {
    /// Map an EC2 image state name.
    pub fn from_ec2(state: &str) -> Self {
        match state {
            "pending" | "transient" => ImageState::Creating,
            "available" | "disabled" => ImageState::Available,
            "deregistered" => ImageState::Deregistered,
            _ => ImageState::Failed,
        }
    }
}

/// A block-device mapping on an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDevice {
    pub device_name: String,
    /// EBS snapshot backing the device; `None` for ephemeral or no-device
    pub snapshot_id: Option<String>,
}

/// An image as described by EC2, before any tag decoding
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub image_id: String,
    /// AMI name
    pub name: Option<String>,
    pub state: ImageState,
    pub tags: Vec<(String, String)>,
    pub block_devices: Vec<BlockDevice>,
}

/// An EBS snapshot owned by this account
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    pub description: String,
}

/// A running or stopped instance matched by its `Name` tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    /// Value of the `Name` tag
    pub name: String,
    /// EC2 state name, e.g. `running`
    pub state: String,
}

/// Parameters for CreateImage
#[derive(Debug, Clone)]
pub struct CreateImageRequest {
    pub instance_id: String,
    /// AMI name
    pub name: String,
    pub description: String,
    /// Skip the instance reboot before imaging
    pub no_reboot: bool,
    /// Device names mapped to `NoDevice` so they are left out of the image
    pub excluded_devices: Vec<String>,
}

impl CreateImageRequest {
    /// Create a new request with required fields
    pub fn new(
        instance_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            name: name.into(),
            description: description.into(),
            no_reboot: true,
            excluded_devices: Vec::new(),
        }
    }

    /// Allow or forbid the pre-image reboot
    pub fn with_no_reboot(mut self, no_reboot: bool) -> Self {
        self.no_reboot = no_reboot;
        self
    }

    /// Leave these device names out of the image
    pub fn with_excluded_devices(mut self, devices: Vec<String>) -> Self {
        self.excluded_devices = devices;
        self
    }
}

/// Parameters for CopyImage, issued against the destination region
#[derive(Debug, Clone)]
pub struct CopyImageRequest {
    pub source_region: String,
    pub source_image_id: String,
    /// AMI name of the copy
    pub name: String,
    pub description: String,
    pub encrypted: bool,
    /// KMS key in the destination region; `None` uses the account default
    pub kms_key_id: Option<String>,
}

impl CopyImageRequest {
    /// Create a new unencrypted copy request
    pub fn new(
        source_region: impl Into<String>,
        source_image_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            source_region: source_region.into(),
            source_image_id: source_image_id.into(),
            name: name.into(),
            description: description.into(),
            encrypted: false,
            kms_key_id: None,
        }
    }

    /// Request an encrypted copy, optionally with a specific key
    pub fn with_encryption(mut self, kms_key_id: Option<String>) -> Self {
        self.encrypted = true;
        self.kms_key_id = kms_key_id;
        self
    }
}
