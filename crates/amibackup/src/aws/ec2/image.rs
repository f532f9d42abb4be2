//! AMI lifecycle operations

use super::Ec2Client;
use super::types::{BlockDevice, CopyImageRequest, CreateImageRequest, ImageInfo, ImageState};
use crate::aws::error::classify_anyhow_error;
use crate::aws::tags::{from_ec2_tags, tag_filter, to_ec2_tags};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{BlockDeviceMapping, Image};
use tracing::{debug, info};

fn image_info(image: &Image) -> Option<ImageInfo> {
    let image_id = image.image_id()?.to_string();
    let block_devices = image
        .block_device_mappings()
        .iter()
        .filter_map(|bdm| {
            Some(BlockDevice {
                device_name: bdm.device_name()?.to_string(),
                snapshot_id: bdm
                    .ebs()
                    .and_then(|ebs| ebs.snapshot_id())
                    .map(str::to_string),
            })
        })
        .collect();

    Some(ImageInfo {
        image_id,
        name: image.name().map(str::to_string),
        state: image
            .state()
            .map(|s| ImageState::from_ec2(s.as_str()))
            .unwrap_or(ImageState::Creating),
        tags: from_ec2_tags(image.tags()),
        block_devices,
    })
}

impl Ec2Client {
    /// List images owned by this account whose tag `key` equals `value`.
    pub async fn describe_images_by_tag(&self, key: &str, value: &str) -> Result<Vec<ImageInfo>> {
        let response = self
            .client
            .describe_images()
            .owners("self")
            .filters(tag_filter(key, value))
            .send()
            .await
            .with_context(|| format!("Failed to describe images tagged {}={}", key, value))?;

        let images: Vec<ImageInfo> = response.images().iter().filter_map(image_info).collect();
        debug!(
            region = %self.region,
            tag = %key,
            value = %value,
            count = images.len(),
            "Described images"
        );
        Ok(images)
    }

    /// Describe one image. A freshly created image may not be visible yet,
    /// in which case `None` is returned instead of an error.
    pub async fn describe_image(&self, image_id: &str) -> Result<Option<ImageInfo>> {
        let result = self
            .client
            .describe_images()
            .image_ids(image_id)
            .send()
            .await
            .with_context(|| format!("Failed to describe image {}", image_id));

        match result {
            Ok(response) => Ok(response.images().first().and_then(image_info)),
            Err(e) if classify_anyhow_error(&e).is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Start a CreateImage for an instance.
    pub async fn create_image(&self, request: CreateImageRequest) -> Result<String> {
        info!(
            region = %self.region,
            instance_id = %request.instance_id,
            name = %request.name,
            no_reboot = request.no_reboot,
            "Creating image"
        );

        let mappings: Vec<BlockDeviceMapping> = request
            .excluded_devices
            .iter()
            .map(|device| {
                BlockDeviceMapping::builder()
                    .device_name(device)
                    .no_device("")
                    .build()
            })
            .collect();

        let response = self
            .client
            .create_image()
            .instance_id(&request.instance_id)
            .name(&request.name)
            .description(&request.description)
            .no_reboot(request.no_reboot)
            .set_block_device_mappings((!mappings.is_empty()).then_some(mappings))
            .send()
            .await
            .with_context(|| format!("Failed to create image of {}", request.instance_id))?;

        let image_id = response
            .image_id()
            .context("CreateImage returned no image ID")?
            .to_string();
        info!(region = %self.region, image_id = %image_id, "Image creation started");
        Ok(image_id)
    }

    /// Start a CopyImage into this client's region.
    pub async fn copy_image(&self, request: CopyImageRequest) -> Result<String> {
        info!(
            source_region = %request.source_region,
            dest_region = %self.region,
            source_image_id = %request.source_image_id,
            encrypted = request.encrypted,
            "Copying image"
        );

        let mut call = self
            .client
            .copy_image()
            .source_region(&request.source_region)
            .source_image_id(&request.source_image_id)
            .name(&request.name)
            .description(&request.description);
        if request.encrypted {
            call = call.encrypted(true).set_kms_key_id(request.kms_key_id.clone());
        }

        let response = call.send().await.with_context(|| {
            format!(
                "Failed to copy image {} from {}",
                request.source_image_id, request.source_region
            )
        })?;

        let image_id = response
            .image_id()
            .context("CopyImage returned no image ID")?
            .to_string();
        info!(region = %self.region, image_id = %image_id, "Image copy started");
        Ok(image_id)
    }

    /// Attach tags to an image or snapshot.
    pub async fn create_tags(&self, resource_id: &str, tags: &[(String, String)]) -> Result<()> {
        self.client
            .create_tags()
            .resources(resource_id)
            .set_tags(Some(to_ec2_tags(tags)))
            .send()
            .await
            .with_context(|| format!("Failed to tag {}", resource_id))?;

        debug!(region = %self.region, resource_id = %resource_id, count = tags.len(), "Tagged resource");
        Ok(())
    }

    /// Deregister an image. Its snapshots are left for the caller to delete.
    pub async fn deregister_image(&self, image_id: &str) -> Result<()> {
        self.client
            .deregister_image()
            .image_id(image_id)
            .send()
            .await
            .with_context(|| format!("Failed to deregister image {}", image_id))?;

        info!(region = %self.region, image_id = %image_id, "Deregistered image");
        Ok(())
    }
}
