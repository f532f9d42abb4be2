//! EC2 operations trait for testing

use super::Ec2Client;
use super::types::{CopyImageRequest, CreateImageRequest, ImageInfo, InstanceInfo, SnapshotInfo};
use anyhow::Result;
use std::future::Future;

/// Trait for the EC2 operations amibackup performs in one region.
///
/// This trait abstracts the EC2 client so catalog, purge and orchestration
/// logic can be exercised against an in-memory fake instead of real AWS.
pub trait Ec2Operations: Send + Sync {
    /// Region this client talks to
    fn region(&self) -> &str;

    /// Non-terminated instances whose `Name` tag equals `name`
    fn describe_instances_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<InstanceInfo>>> + Send;

    /// Images owned by this account whose tag `key` equals `value`
    fn describe_images_by_tag(
        &self,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<Vec<ImageInfo>>> + Send;

    /// A single image, or `None` if EC2 does not (yet) know it
    fn describe_image(
        &self,
        image_id: &str,
    ) -> impl Future<Output = Result<Option<ImageInfo>>> + Send;

    /// Start imaging an instance, returning the new image id
    fn create_image(
        &self,
        request: CreateImageRequest,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Copy an image into this client's region, returning the new image id
    fn copy_image(&self, request: CopyImageRequest) -> impl Future<Output = Result<String>> + Send;

    /// Attach tags to a resource
    fn create_tags(
        &self,
        resource_id: &str,
        tags: &[(String, String)],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Deregister an image
    fn deregister_image(&self, image_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// All snapshots owned by this account
    fn describe_owned_snapshots(&self) -> impl Future<Output = Result<Vec<SnapshotInfo>>> + Send;

    /// Delete a snapshot
    fn delete_snapshot(&self, snapshot_id: &str) -> impl Future<Output = Result<()>> + Send;
}

impl Ec2Operations for Ec2Client {
    fn region(&self) -> &str {
        &self.region
    }

    async fn describe_instances_by_name(&self, name: &str) -> Result<Vec<InstanceInfo>> {
        Ec2Client::describe_instances_by_name(self, name).await
    }

    async fn describe_images_by_tag(&self, key: &str, value: &str) -> Result<Vec<ImageInfo>> {
        Ec2Client::describe_images_by_tag(self, key, value).await
    }

    async fn describe_image(&self, image_id: &str) -> Result<Option<ImageInfo>> {
        Ec2Client::describe_image(self, image_id).await
    }

    async fn create_image(&self, request: CreateImageRequest) -> Result<String> {
        Ec2Client::create_image(self, request).await
    }

    async fn copy_image(&self, request: CopyImageRequest) -> Result<String> {
        Ec2Client::copy_image(self, request).await
    }

    async fn create_tags(&self, resource_id: &str, tags: &[(String, String)]) -> Result<()> {
        Ec2Client::create_tags(self, resource_id, tags).await
    }

    async fn deregister_image(&self, image_id: &str) -> Result<()> {
        Ec2Client::deregister_image(self, image_id).await
    }

    async fn describe_owned_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        Ec2Client::describe_owned_snapshots(self).await
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        Ec2Client::delete_snapshot(self, snapshot_id).await
    }
}
