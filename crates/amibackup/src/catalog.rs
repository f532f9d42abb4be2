//! Typed inventory of managed images, their snapshots and backup targets
//!
//! Images are recognised purely by tags. An image whose `timestamp` tag is
//! missing or not an integer is unmanaged: it is counted and logged but never
//! reaches retention or orchestration decisions. Failed images are skipped
//! the same way, so they can never be kept as a slice's survivor.

use crate::aws::ec2::{
    BlockDevice, Ec2Operations, ImageInfo, ImageState, InstanceInfo, SnapshotInfo,
};
use crate::aws::tags::{
    TAG_HOSTNAME, TAG_INSTANCE, TAG_SOURCE_REGION, TAG_TIMESTAMP, parse_timestamp, tag_value,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static IMAGE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ami-[0-9a-f]+").expect("image id pattern is valid"));

/// A managed backup image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub id: String,
    pub region: String,
    /// Value of the `hostname` identity tag
    pub name: String,
    /// Value of the `instance` tag
    pub instance_id: Option<String>,
    /// Decoded `timestamp` tag
    pub timestamp: DateTime<Utc>,
    pub state: ImageState,
    /// AMI name
    pub ami_name: Option<String>,
    /// Set on cross-region copies
    pub source_region: Option<String>,
    pub block_devices: Vec<BlockDevice>,
}

/// Why an image was left out of the inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Unmanaged {
    #[strum(serialize = "missing timestamp tag")]
    MissingTimestamp,
    #[strum(serialize = "corrupt timestamp tag")]
    CorruptTimestamp,
    #[strum(serialize = "deregistered")]
    Deregistered,
    #[strum(serialize = "image creation failed")]
    Failed,
}

impl Image {
    /// Decode a described image, or explain why it is unmanaged.
    pub fn from_info(info: ImageInfo, region: &str, name: &str) -> Result<Self, Unmanaged> {
        let raw = tag_value(&info.tags, TAG_TIMESTAMP).ok_or(Unmanaged::MissingTimestamp)?;
        let timestamp = parse_timestamp(raw).ok_or(Unmanaged::CorruptTimestamp)?;
        match info.state {
            ImageState::Deregistered => return Err(Unmanaged::Deregistered),
            ImageState::Failed => return Err(Unmanaged::Failed),
            ImageState::Creating | ImageState::Available => {}
        }

        Ok(Self {
            name: tag_value(&info.tags, TAG_HOSTNAME)
                .unwrap_or(name)
                .to_string(),
            instance_id: tag_value(&info.tags, TAG_INSTANCE).map(str::to_string),
            source_region: tag_value(&info.tags, TAG_SOURCE_REGION).map(str::to_string),
            id: info.image_id,
            region: region.to_string(),
            timestamp,
            state: info.state,
            ami_name: info.name,
            block_devices: info.block_devices,
        })
    }
}

/// Managed images for one name in one region
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inventory {
    pub region: String,
    pub name: String,
    pub images: Vec<Image>,
    /// Ids of images carrying the identity tag that are not managed
    pub skipped: Vec<String>,
}

impl Inventory {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn get(&self, image_id: &str) -> Option<&Image> {
        self.images.iter().find(|i| i.id == image_id)
    }

    /// (id, backup timestamp) pairs for retention evaluation
    pub fn ages(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.images.iter().map(|i| (i.id.as_str(), i.timestamp))
    }

    /// Images sorted newest first, ties by id
    pub fn newest_first(&self) -> Vec<&Image> {
        let mut images: Vec<&Image> = self.images.iter().collect();
        images.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        images
    }
}

/// List the managed images for `name` in the client's region.
///
/// A listing error is returned to the caller; decoding problems on single
/// images are not errors.
pub async fn list_managed_images<A: Ec2Operations>(api: &A, name: &str) -> Result<Inventory> {
    let region = api.region().to_string();
    let described = api
        .describe_images_by_tag(TAG_HOSTNAME, name)
        .await
        .with_context(|| format!("Failed to list images for {} in {}", name, region))?;

    let mut inventory = Inventory {
        region: region.clone(),
        name: name.to_string(),
        ..Default::default()
    };

    for info in described {
        let image_id = info.image_id.clone();
        match Image::from_info(info, &region, name) {
            Ok(image) => inventory.images.push(image),
            Err(Unmanaged::Deregistered) => {
                debug!(region = %region, image_id = %image_id, "Ignoring deregistered image");
            }
            Err(reason) => {
                warn!(
                    region = %region,
                    image_id = %image_id,
                    reason = %reason,
                    "Skipping unmanaged image"
                );
                inventory.skipped.push(image_id);
            }
        }
    }

    info!(
        region = %region,
        name = %name,
        managed = inventory.images.len(),
        skipped = inventory.skipped.len(),
        "Listed images"
    );
    Ok(inventory)
}

/// Instances whose `Name` tag equals `name`.
pub async fn find_instances<A: Ec2Operations>(api: &A, name: &str) -> Result<Vec<InstanceInfo>> {
    let instances = api
        .describe_instances_by_name(name)
        .await
        .with_context(|| format!("Failed to list instances named {} in {}", name, api.region()))?;

    debug!(
        region = %api.region(),
        name = %name,
        count = instances.len(),
        "Found instances"
    );
    Ok(instances)
}

/// An EBS snapshot, linked to the image whose id its description names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub id: String,
    pub region: String,
    pub description: String,
    /// Device the snapshot backs, when the owning image lists it
    pub device_name: Option<String>,
    /// First `ami-…` id found in the description
    pub image_id: Option<String>,
}

/// First image id embedded in a snapshot description.
pub fn image_reference(description: &str) -> Option<&str> {
    IMAGE_ID_PATTERN.find(description).map(|m| m.as_str())
}

/// Snapshots of one region grouped by the image they reference
#[derive(Debug, Clone, Default)]
pub struct SnapshotIndex {
    by_image: BTreeMap<String, Vec<Snapshot>>,
    /// Snapshots whose description names no image
    pub unassociated: usize,
}

impl SnapshotIndex {
    /// Build the index, filling device names from the inventory's mappings.
    pub fn build(region: &str, snapshots: Vec<SnapshotInfo>, inventory: &Inventory) -> Self {
        let mut index = Self::default();

        for info in snapshots {
            let Some(image_id) = image_reference(&info.description).map(str::to_string) else {
                index.unassociated += 1;
                continue;
            };
            let device_name = inventory.get(&image_id).and_then(|image| {
                image
                    .block_devices
                    .iter()
                    .find(|d| d.snapshot_id.as_deref() == Some(info.snapshot_id.as_str()))
                    .map(|d| d.device_name.clone())
            });

            index.by_image.entry(image_id.clone()).or_default().push(Snapshot {
                id: info.snapshot_id,
                region: region.to_string(),
                description: info.description,
                device_name,
                image_id: Some(image_id),
            });
        }

        for snapshots in index.by_image.values_mut() {
            snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        }
        index
    }

    /// Snapshots that reference `image_id`
    pub fn for_image(&self, image_id: &str) -> &[Snapshot] {
        self.by_image.get(image_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of associated snapshots
    pub fn len(&self) -> usize {
        self.by_image.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_image.is_empty()
    }
}

/// List the account's snapshots once and index them by referenced image.
pub async fn snapshot_index<A: Ec2Operations>(
    api: &A,
    inventory: &Inventory,
) -> Result<SnapshotIndex> {
    let snapshots = api
        .describe_owned_snapshots()
        .await
        .with_context(|| format!("Failed to list snapshots in {}", api.region()))?;

    let index = SnapshotIndex::build(api.region(), snapshots, inventory);
    debug!(
        region = %api.region(),
        associated = index.len(),
        unassociated = index.unassociated,
        "Indexed snapshots"
    );
    Ok(index)
}
