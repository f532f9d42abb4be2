//! In-memory EC2 stand-in for tests
//!
//! `FakeEc2` keeps images, snapshots and instances for one region behind a
//! mutex, records every call, and lets tests script failures and how long
//! new images take to become available.

use crate::aws::AwsError;
use crate::aws::ec2::{
    BlockDevice, CopyImageRequest, CreateImageRequest, Ec2Operations, ImageInfo, ImageState,
    InstanceInfo, SnapshotInfo,
};
use crate::aws::tags::{TAG_HOSTNAME, TAG_INSTANCE, TAG_TIMESTAMP, TAG_TOOL, TAG_TOOL_VALUE};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Operations the fake records and can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    DescribeInstances,
    DescribeImages,
    DescribeImage,
    CreateImage,
    CopyImage,
    CreateTags,
    DeregisterImage,
    DescribeSnapshots,
    DeleteSnapshot,
}

impl FakeOp {
    /// Whether the operation changes account state
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            FakeOp::CreateImage
                | FakeOp::CopyImage
                | FakeOp::CreateTags
                | FakeOp::DeregisterImage
                | FakeOp::DeleteSnapshot
        )
    }
}

/// A recorded call: the operation and the id or name it targeted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    pub op: FakeOp,
    pub target: String,
}

/// What happens to an image created or copied by the fake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFate {
    /// Becomes available on the n-th state poll (0 = first poll)
    AvailableAfter(u32),
    /// Stays pending forever
    Never,
    /// Moves to the failed state on the first poll
    Fail,
}

#[derive(Debug)]
struct FakeImage {
    info: ImageInfo,
    description: String,
    polls: u32,
    fate: ImageFate,
}

#[derive(Debug, Default)]
struct FakeState {
    images: BTreeMap<String, FakeImage>,
    snapshots: BTreeMap<String, SnapshotInfo>,
    instances: Vec<InstanceInfo>,
    calls: Vec<FakeCall>,
    create_requests: Vec<CreateImageRequest>,
    copy_requests: Vec<CopyImageRequest>,
    next_id: u64,
    default_fate: Option<ImageFate>,
    /// (pattern, fate): first pattern contained in a new image's description wins
    fates: Vec<(String, ImageFate)>,
    queued_failures: HashMap<FakeOp, VecDeque<AwsError>>,
    sticky_failures: HashMap<(FakeOp, String), AwsError>,
    panics: HashSet<(FakeOp, String)>,
}

impl FakeState {
    fn record(&mut self, op: FakeOp, target: &str) -> Result<()> {
        self.calls.push(FakeCall {
            op,
            target: target.to_string(),
        });
        if self.panics.contains(&(op, target.to_string())) {
            panic!("scripted panic in {:?} for {}", op, target);
        }
        if let Some(err) = self.sticky_failures.get(&(op, target.to_string())) {
            return Err(err.clone().into());
        }
        if let Some(err) = self.queued_failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err.into());
        }
        Ok(())
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }

    fn fate_for(&self, description: &str) -> ImageFate {
        self.fates
            .iter()
            .find(|(pattern, _)| description.contains(pattern.as_str()))
            .map(|(_, fate)| *fate)
            .or(self.default_fate)
            .unwrap_or(ImageFate::AvailableAfter(0))
    }

    fn register(&mut self, name: &str, description: &str, devices: Vec<String>) -> String {
        let image_id = self.next_id("ami");
        let mut block_devices = Vec::new();
        for device in devices {
            let snapshot_id = self.next_id("snap");
            self.snapshots.insert(
                snapshot_id.clone(),
                SnapshotInfo {
                    snapshot_id: snapshot_id.clone(),
                    description: format!("Created by CreateImage for {} from {}", image_id, device),
                },
            );
            block_devices.push(BlockDevice {
                device_name: device,
                snapshot_id: Some(snapshot_id),
            });
        }

        let fate = self.fate_for(description);
        self.images.insert(
            image_id.clone(),
            FakeImage {
                info: ImageInfo {
                    image_id: image_id.clone(),
                    name: Some(name.to_string()),
                    state: ImageState::Creating,
                    tags: Vec::new(),
                    block_devices,
                },
                description: description.to_string(),
                polls: 0,
                fate,
            },
        );
        image_id
    }
}

/// Scriptable in-memory EC2 for one region
#[derive(Debug)]
pub struct FakeEc2 {
    region: String,
    state: Mutex<FakeState>,
}

impl FakeEc2 {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a running instance
    pub fn add_instance(&self, instance_id: &str, name: &str) {
        self.state().instances.push(InstanceInfo {
            instance_id: instance_id.to_string(),
            name: name.to_string(),
            state: "running".to_string(),
        });
    }

    /// Add an available image with arbitrary tags
    pub fn add_image_with_tags(&self, image_id: &str, tags: Vec<(String, String)>) {
        self.state().images.insert(
            image_id.to_string(),
            FakeImage {
                info: ImageInfo {
                    image_id: image_id.to_string(),
                    name: Some(image_id.to_string()),
                    state: ImageState::Available,
                    tags,
                    block_devices: Vec::new(),
                },
                description: String::new(),
                polls: 0,
                fate: ImageFate::AvailableAfter(0),
            },
        );
    }

    /// Add an available, fully tagged backup image
    pub fn add_backup_image(&self, image_id: &str, name: &str, taken_at: DateTime<Utc>) {
        self.add_image_with_tags(
            image_id,
            vec![
                (TAG_HOSTNAME.to_string(), name.to_string()),
                (TAG_INSTANCE.to_string(), "i-00000000".to_string()),
                (TAG_TIMESTAMP.to_string(), taken_at.timestamp().to_string()),
                (TAG_TOOL.to_string(), TAG_TOOL_VALUE.to_string()),
            ],
        );
    }

    /// Add a snapshot with a free-text description
    pub fn add_snapshot(&self, snapshot_id: &str, description: &str) {
        self.state().snapshots.insert(
            snapshot_id.to_string(),
            SnapshotInfo {
                snapshot_id: snapshot_id.to_string(),
                description: description.to_string(),
            },
        );
    }

    /// Attach a snapshot to an image's block-device mapping
    pub fn map_snapshot(&self, image_id: &str, device_name: &str, snapshot_id: &str) {
        if let Some(image) = self.state().images.get_mut(image_id) {
            image.info.block_devices.push(BlockDevice {
                device_name: device_name.to_string(),
                snapshot_id: Some(snapshot_id.to_string()),
            });
        }
    }

    /// Fate of new images whose description matches no pattern
    pub fn set_default_fate(&self, fate: ImageFate) {
        self.state().default_fate = Some(fate);
    }

    /// Fate of new images whose description contains `pattern`
    pub fn set_fate(&self, pattern: &str, fate: ImageFate) {
        self.state().fates.push((pattern.to_string(), fate));
    }

    /// Fail the next call of `op` with `err`
    pub fn fail_next(&self, op: FakeOp, err: AwsError) {
        self.state().queued_failures.entry(op).or_default().push_back(err);
    }

    /// Fail every call of `op` that targets `target`
    pub fn fail_always(&self, op: FakeOp, target: &str, err: AwsError) {
        self.state()
            .sticky_failures
            .insert((op, target.to_string()), err);
    }

    /// Panic inside every call of `op` that targets `target`
    pub fn panic_on(&self, op: FakeOp, target: &str) {
        self.state().panics.insert((op, target.to_string()));
    }

    /// Force the state of a registered image
    pub fn set_image_state(&self, image_id: &str, state: ImageState) {
        if let Some(image) = self.state().images.get_mut(image_id) {
            image.info.state = state;
        }
    }

    /// All recorded calls, in order
    pub fn calls(&self) -> Vec<FakeCall> {
        self.state().calls.clone()
    }

    /// Targets of every call of `op`, in order
    pub fn calls_to(&self, op: FakeOp) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.target.clone())
            .collect()
    }

    /// Number of calls that changed (or tried to change) account state
    pub fn mutating_calls(&self) -> usize {
        self.state().calls.iter().filter(|c| c.op.is_mutating()).count()
    }

    pub fn create_requests(&self) -> Vec<CreateImageRequest> {
        self.state().create_requests.clone()
    }

    pub fn copy_requests(&self) -> Vec<CopyImageRequest> {
        self.state().copy_requests.clone()
    }

    /// Whether an image is still registered
    pub fn has_image(&self, image_id: &str) -> bool {
        self.state().images.contains_key(image_id)
    }

    pub fn has_snapshot(&self, snapshot_id: &str) -> bool {
        self.state().snapshots.contains_key(snapshot_id)
    }

    /// Ids of registered images, sorted
    pub fn image_ids(&self) -> Vec<String> {
        self.state().images.keys().cloned().collect()
    }

    /// Tags currently on an image
    pub fn image_tags(&self, image_id: &str) -> Vec<(String, String)> {
        self.state()
            .images
            .get(image_id)
            .map(|i| i.info.tags.clone())
            .unwrap_or_default()
    }

    /// Description an image was created with
    pub fn image_description(&self, image_id: &str) -> Option<String> {
        self.state()
            .images
            .get(image_id)
            .map(|i| i.description.clone())
    }
}

fn not_found(resource_type: &'static str, id: &str) -> anyhow::Error {
    AwsError::NotFound {
        resource_type,
        resource_id: id.to_string(),
    }
    .into()
}

impl Ec2Operations for FakeEc2 {
    fn region(&self) -> &str {
        &self.region
    }

    async fn describe_instances_by_name(&self, name: &str) -> Result<Vec<InstanceInfo>> {
        let mut state = self.state();
        state.record(FakeOp::DescribeInstances, name)?;
        Ok(state
            .instances
            .iter()
            .filter(|i| i.name == name)
            .cloned()
            .collect())
    }

    async fn describe_images_by_tag(&self, key: &str, value: &str) -> Result<Vec<ImageInfo>> {
        let mut state = self.state();
        state.record(FakeOp::DescribeImages, &format!("{}={}", key, value))?;
        Ok(state
            .images
            .values()
            .filter(|i| i.info.tags.iter().any(|(k, v)| k == key && v == value))
            .map(|i| i.info.clone())
            .collect())
    }

    async fn describe_image(&self, image_id: &str) -> Result<Option<ImageInfo>> {
        let mut state = self.state();
        state.record(FakeOp::DescribeImage, image_id)?;
        let Some(image) = state.images.get_mut(image_id) else {
            return Ok(None);
        };

        if image.info.state == ImageState::Creating {
            image.info.state = match image.fate {
                ImageFate::AvailableAfter(n) if image.polls >= n => ImageState::Available,
                ImageFate::Fail => ImageState::Failed,
                _ => ImageState::Creating,
            };
            image.polls += 1;
        }
        Ok(Some(image.info.clone()))
    }

    async fn create_image(&self, request: CreateImageRequest) -> Result<String> {
        let mut state = self.state();
        state.record(FakeOp::CreateImage, &request.instance_id)?;
        if !state
            .instances
            .iter()
            .any(|i| i.instance_id == request.instance_id)
        {
            return Err(not_found("instance", &request.instance_id));
        }

        let devices: Vec<String> = ["/dev/xvda", "/dev/sdb"]
            .into_iter()
            .filter(|d| !request.excluded_devices.iter().any(|x| x == d))
            .map(str::to_string)
            .collect();
        let image_id = state.register(&request.name, &request.description, devices);
        state.create_requests.push(request);
        Ok(image_id)
    }

    async fn copy_image(&self, request: CopyImageRequest) -> Result<String> {
        let mut state = self.state();
        state.record(FakeOp::CopyImage, &request.source_image_id)?;
        let image_id = state.register(
            &request.name,
            &request.description,
            vec!["/dev/xvda".to_string()],
        );
        state.copy_requests.push(request);
        Ok(image_id)
    }

    async fn create_tags(&self, resource_id: &str, tags: &[(String, String)]) -> Result<()> {
        let mut state = self.state();
        state.record(FakeOp::CreateTags, resource_id)?;
        let image = state
            .images
            .get_mut(resource_id)
            .ok_or_else(|| not_found("image", resource_id))?;
        for (key, value) in tags {
            image.info.tags.retain(|(k, _)| k != key);
            image.info.tags.push((key.clone(), value.clone()));
        }
        Ok(())
    }

    async fn deregister_image(&self, image_id: &str) -> Result<()> {
        let mut state = self.state();
        state.record(FakeOp::DeregisterImage, image_id)?;
        state
            .images
            .remove(image_id)
            .map(|_| ())
            .ok_or_else(|| not_found("image", image_id))
    }

    async fn describe_owned_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let mut state = self.state();
        state.record(FakeOp::DescribeSnapshots, &self.region)?;
        Ok(state.snapshots.values().cloned().collect())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let mut state = self.state();
        state.record(FakeOp::DeleteSnapshot, snapshot_id)?;
        let in_use = state.images.values().any(|i| {
            i.info
                .block_devices
                .iter()
                .any(|d| d.snapshot_id.as_deref() == Some(snapshot_id))
        });
        if in_use {
            return Err(AwsError::InUse {
                message: format!("{} is in use by a registered image", snapshot_id),
            }
            .into());
        }
        state
            .snapshots
            .remove(snapshot_id)
            .map(|_| ())
            .ok_or_else(|| not_found("snapshot", snapshot_id))
    }
}
