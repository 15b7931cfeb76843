//! In-memory provider used by tests and local dry runs.
//!
//! State changes take effect immediately (a SOFTSTOP leaves the instance STOPPED
//! on the next read). Attachment listings can be scripted to simulate the
//! transient gaps seen while the provider swaps volumes.

use crate::error::ProviderError;
use crate::{CloudProvider, InstanceAction, ReplaceBootVolumeRequest};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use nimbus_common::{
    AttachmentState, BlockVolume, BootVolume, BootVolumeAttachment, BootVolumeBackup, Compartment,
    Image, Instance, LifecycleState, RegionSubscription, VnicAddress,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub const MUTATING_OPERATIONS: &[&str] = &[
    "instance_action",
    "terminate_instance",
    "attach_boot_volume",
    "replace_boot_volume",
    "delete_boot_volume_backup",
];

#[derive(Default)]
struct MockState {
    instances: BTreeMap<String, Instance>,
    attachments: Vec<BootVolumeAttachment>,
    boot_volumes: Vec<BootVolume>,
    backups: Vec<BootVolumeBackup>,
    block_volumes: Vec<BlockVolume>,
    images: Vec<Image>,
    compartments: Vec<Compartment>,
    regions: Vec<RegionSubscription>,
    availability_domains: Vec<String>,
    vnics: BTreeMap<String, VnicAddress>,
    storage_limit_gb: Option<u64>,
    scripted_attachments: VecDeque<Vec<BootVolumeAttachment>>,
    failures: BTreeMap<String, VecDeque<String>>,
    replace_requests: Vec<ReplaceBootVolumeRequest>,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- builders ---

    pub fn with_instance(self, instance: Instance) -> Self {
        self.state().instances.insert(instance.id.clone(), instance);
        self
    }

    pub fn with_attachment(self, attachment: BootVolumeAttachment) -> Self {
        self.state().attachments.push(attachment);
        self
    }

    pub fn with_boot_volume(self, volume: BootVolume) -> Self {
        self.state().boot_volumes.push(volume);
        self
    }

    pub fn with_backup(self, backup: BootVolumeBackup) -> Self {
        self.state().backups.push(backup);
        self
    }

    pub fn with_block_volume(self, volume: BlockVolume) -> Self {
        self.state().block_volumes.push(volume);
        self
    }

    pub fn with_image(self, image: Image) -> Self {
        self.state().images.push(image);
        self
    }

    pub fn with_compartment(self, compartment: Compartment) -> Self {
        self.state().compartments.push(compartment);
        self
    }

    pub fn with_region(self, region: &str, is_home: bool) -> Self {
        self.state().regions.push(RegionSubscription {
            region_name: region.to_string(),
            is_home_region: is_home,
        });
        self
    }

    pub fn with_availability_domain(self, ad: &str) -> Self {
        self.state().availability_domains.push(ad.to_string());
        self
    }

    pub fn with_vnic(self, instance_id: &str, address: VnicAddress) -> Self {
        self.state().vnics.insert(instance_id.to_string(), address);
        self
    }

    pub fn with_storage_limit(self, limit_gb: u64) -> Self {
        self.state().storage_limit_gb = Some(limit_gb);
        self
    }

    /// Queue attachment listings returned (in order) before falling back to live state.
    pub fn script_attachments(&self, responses: Vec<Vec<BootVolumeAttachment>>) {
        self.state().scripted_attachments.extend(responses);
    }

    /// Make the next call to `operation` fail with the given CLI-style error output.
    pub fn fail_next(&self, operation: &str, output: &str) {
        self.state()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(output.to_string());
    }

    // --- introspection ---

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| MUTATING_OPERATIONS.contains(&c.as_str()))
            .cloned()
            .collect()
    }

    pub fn instance_state(&self, instance_id: &str) -> Option<LifecycleState> {
        self.state().instances.get(instance_id).map(|i| i.lifecycle_state)
    }

    pub fn attachments(&self) -> Vec<BootVolumeAttachment> {
        self.state().attachments.clone()
    }

    pub fn backups(&self) -> Vec<BootVolumeBackup> {
        self.state().backups.clone()
    }

    pub fn boot_volumes(&self) -> Vec<BootVolume> {
        self.state().boot_volumes.clone()
    }

    pub fn replace_requests(&self) -> Vec<ReplaceBootVolumeRequest> {
        self.state().replace_requests.clone()
    }

    fn begin(&self, operation: &str) -> Result<MutexGuard<'_, MockState>> {
        let mut state = self.state();
        state.calls.push(operation.to_string());
        if let Some(output) = state.failures.get_mut(operation).and_then(|q| q.pop_front()) {
            return Err(ProviderError::from_output(operation, &output).into());
        }
        Ok(state)
    }
}

fn mock_ocid(kind: &str) -> String {
    format!("ocid1.{}.oc1..mock{}", kind, &Uuid::new_v4().simple().to_string()[..12])
}

#[async_trait]
impl CloudProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list_region_subscriptions(&self, _tenancy_id: &str) -> Result<Vec<RegionSubscription>> {
        let state = self.begin("list_region_subscriptions")?;
        Ok(state.regions.clone())
    }

    async fn list_compartments(&self, _tenancy_id: &str) -> Result<Vec<Compartment>> {
        let state = self.begin("list_compartments")?;
        Ok(state.compartments.clone())
    }

    async fn list_availability_domains(&self, _compartment_id: &str) -> Result<Vec<String>> {
        let state = self.begin("list_availability_domains")?;
        Ok(state.availability_domains.clone())
    }

    async fn list_instances(&self, compartment_id: &str) -> Result<Vec<Instance>> {
        let state = self.begin("list_instances")?;
        Ok(state
            .instances
            .values()
            .filter(|i| i.compartment_id == compartment_id)
            .cloned()
            .collect())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        let state = self.begin("get_instance")?;
        state
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("instance {}", instance_id)).into())
    }

    async fn instance_action(&self, instance_id: &str, action: InstanceAction) -> Result<()> {
        let mut state = self.begin("instance_action")?;
        let inst = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ProviderError::NotFound(format!("instance {}", instance_id)))?;
        inst.lifecycle_state = match action {
            InstanceAction::Start => LifecycleState::Running,
            InstanceAction::Stop | InstanceAction::SoftStop => LifecycleState::Stopped,
        };
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let mut state = self.begin("terminate_instance")?;
        let inst = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ProviderError::NotFound(format!("instance {}", instance_id)))?;
        inst.lifecycle_state = LifecycleState::Terminated;
        Ok(())
    }

    async fn list_boot_volume_attachments(
        &self,
        _availability_domain: &str,
        _compartment_id: &str,
        instance_id: &str,
    ) -> Result<Vec<BootVolumeAttachment>> {
        let mut state = self.begin("list_boot_volume_attachments")?;
        if let Some(scripted) = state.scripted_attachments.pop_front() {
            return Ok(scripted);
        }
        Ok(state
            .attachments
            .iter()
            .filter(|a| a.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn attach_boot_volume(
        &self,
        instance_id: &str,
        boot_volume_id: &str,
        _display_name: &str,
    ) -> Result<BootVolumeAttachment> {
        let mut state = self.begin("attach_boot_volume")?;
        if let Some(existing) = state
            .attachments
            .iter_mut()
            .find(|a| a.instance_id == instance_id && a.boot_volume_id == boot_volume_id)
        {
            existing.lifecycle_state = AttachmentState::Attached;
            return Ok(existing.clone());
        }
        let attachment = BootVolumeAttachment {
            id: mock_ocid("bootvolumeattachment"),
            instance_id: instance_id.to_string(),
            boot_volume_id: boot_volume_id.to_string(),
            lifecycle_state: AttachmentState::Attached,
            time_created: Utc::now(),
        };
        state.attachments.push(attachment.clone());
        Ok(attachment)
    }

    async fn replace_boot_volume(&self, instance_id: &str, request: &ReplaceBootVolumeRequest) -> Result<()> {
        let mut state = self.begin("replace_boot_volume")?;
        if !state.instances.contains_key(instance_id) {
            return Err(ProviderError::NotFound(format!("instance {}", instance_id)).into());
        }
        state.replace_requests.push(request.clone());

        let mut old_volume: Option<String> = None;
        for att in state
            .attachments
            .iter_mut()
            .filter(|a| a.instance_id == instance_id && a.lifecycle_state == AttachmentState::Attached)
        {
            att.lifecycle_state = AttachmentState::Detached;
            old_volume = Some(att.boot_volume_id.clone());
        }
        if !request.preserve_old_volume {
            if let Some(old) = old_volume {
                state.boot_volumes.retain(|v| v.id != old);
            }
        }

        let ad = state
            .instances
            .get(instance_id)
            .map(|i| i.availability_domain.clone())
            .unwrap_or_default();
        let new_volume = BootVolume {
            id: mock_ocid("bootvolume"),
            display_name: format!("{} (Boot Volume)", instance_id),
            size_in_gbs: request.boot_volume_size_gb,
            lifecycle_state: LifecycleState::Available,
            availability_domain: ad,
        };
        state.attachments.push(BootVolumeAttachment {
            id: mock_ocid("bootvolumeattachment"),
            instance_id: instance_id.to_string(),
            boot_volume_id: new_volume.id.clone(),
            lifecycle_state: AttachmentState::Attached,
            time_created: Utc::now(),
        });
        state.boot_volumes.push(new_volume);
        Ok(())
    }

    async fn list_images(&self, _compartment_id: &str, operating_system: &str) -> Result<Vec<Image>> {
        let state = self.begin("list_images")?;
        let mut images: Vec<Image> = state
            .images
            .iter()
            .filter(|i| i.operating_system == operating_system)
            .cloned()
            .collect();
        images.sort_by(|a, b| b.time_created.cmp(&a.time_created));
        Ok(images)
    }

    async fn get_image(&self, image_id: &str) -> Result<Image> {
        let state = self.begin("get_image")?;
        state
            .images
            .iter()
            .find(|i| i.id == image_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("image {}", image_id)).into())
    }

    async fn get_boot_volume(&self, boot_volume_id: &str) -> Result<BootVolume> {
        let state = self.begin("get_boot_volume")?;
        state
            .boot_volumes
            .iter()
            .find(|v| v.id == boot_volume_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("boot volume {}", boot_volume_id)).into())
    }

    async fn list_boot_volumes(&self, _availability_domain: &str, _compartment_id: &str) -> Result<Vec<BootVolume>> {
        let state = self.begin("list_boot_volumes")?;
        Ok(state.boot_volumes.clone())
    }

    async fn list_boot_volume_backups(&self, _compartment_id: &str) -> Result<Vec<BootVolumeBackup>> {
        let state = self.begin("list_boot_volume_backups")?;
        Ok(state.backups.clone())
    }

    async fn list_block_volumes(&self, _availability_domain: &str, _compartment_id: &str) -> Result<Vec<BlockVolume>> {
        let state = self.begin("list_block_volumes")?;
        Ok(state.block_volumes.clone())
    }

    async fn delete_boot_volume_backup(&self, backup_id: &str) -> Result<()> {
        let mut state = self.begin("delete_boot_volume_backup")?;
        let before = state.backups.len();
        state.backups.retain(|b| b.id != backup_id);
        if state.backups.len() == before {
            return Err(ProviderError::NotFound(format!("backup {}", backup_id)).into());
        }
        Ok(())
    }

    async fn storage_limit_gb(&self, _tenancy_id: &str) -> Result<Option<u64>> {
        let state = self.begin("storage_limit_gb")?;
        Ok(state.storage_limit_gb)
    }

    async fn primary_vnic_address(&self, _compartment_id: &str, instance_id: &str) -> Result<Option<VnicAddress>> {
        let state = self.begin("primary_vnic_address")?;
        Ok(state.vnics.get(instance_id).cloned())
    }
}
