use anyhow::Result;
use async_trait::async_trait;
use nimbus_common::{
    BlockVolume, BootVolume, BootVolumeAttachment, BootVolumeBackup, Compartment, Image, Instance,
    RegionSubscription, VnicAddress,
};
use serde::{Deserialize, Serialize};

pub mod credentials;
pub mod error;

#[cfg(feature = "mock")]
pub mod mock;
#[cfg(feature = "oci")]
pub mod oci;

pub use credentials::{
    CredentialSource, ProfileCredentials, ProfileStore, ResolvedCredentials, StaticCredentials,
};
pub use error::{kind_of, ApiErrorKind, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceAction {
    #[serde(rename = "START")]
    Start,
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "SOFTSTOP")]
    SoftStop,
}

impl InstanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceAction::Start => "START",
            InstanceAction::Stop => "STOP",
            InstanceAction::SoftStop => "SOFTSTOP",
        }
    }
}

/// Instance metadata sent with the replace call.
/// `user_data` is left out of the payload entirely when no cloud-init document was prepared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InstanceMetadata {
    pub ssh_authorized_keys: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceBootVolumeRequest {
    pub image_id: String,
    pub boot_volume_size_gb: u64,
    /// false only when quota negotiation decided to discard the old volume
    pub preserve_old_volume: bool,
    pub metadata: InstanceMetadata,
}

#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Short provider name used in logs ("oci", "mock").
    fn name(&self) -> &'static str;

    // Identity
    async fn list_region_subscriptions(&self, tenancy_id: &str) -> Result<Vec<RegionSubscription>>;

    // Optional: compartment tree below the tenancy.
    // Default returns an empty list so callers fall back to the root compartment.
    async fn list_compartments(&self, _tenancy_id: &str) -> Result<Vec<Compartment>> {
        Ok(vec![])
    }

    async fn list_availability_domains(&self, compartment_id: &str) -> Result<Vec<String>>;

    // Compute
    async fn list_instances(&self, compartment_id: &str) -> Result<Vec<Instance>>;
    async fn get_instance(&self, instance_id: &str) -> Result<Instance>;
    async fn instance_action(&self, instance_id: &str, action: InstanceAction) -> Result<()>;

    // Optional: terminate an instance together with its boot volume.
    async fn terminate_instance(&self, _instance_id: &str) -> Result<()> {
        Err(ProviderError::Unsupported {
            provider: self.name().to_string(),
            operation: "terminate_instance".to_string(),
        }
        .into())
    }

    async fn list_boot_volume_attachments(
        &self,
        availability_domain: &str,
        compartment_id: &str,
        instance_id: &str,
    ) -> Result<Vec<BootVolumeAttachment>>;

    async fn attach_boot_volume(
        &self,
        instance_id: &str,
        boot_volume_id: &str,
        display_name: &str,
    ) -> Result<BootVolumeAttachment>;

    /// Single provider-side call that creates a volume from the image, swaps it in
    /// and (depending on the provider) restarts the instance.
    async fn replace_boot_volume(&self, instance_id: &str, request: &ReplaceBootVolumeRequest) -> Result<()>;

    async fn list_images(&self, compartment_id: &str, operating_system: &str) -> Result<Vec<Image>>;
    async fn get_image(&self, image_id: &str) -> Result<Image>;

    // Block storage
    async fn get_boot_volume(&self, boot_volume_id: &str) -> Result<BootVolume>;
    async fn list_boot_volumes(&self, availability_domain: &str, compartment_id: &str) -> Result<Vec<BootVolume>>;
    async fn list_boot_volume_backups(&self, compartment_id: &str) -> Result<Vec<BootVolumeBackup>>;
    async fn list_block_volumes(&self, availability_domain: &str, compartment_id: &str) -> Result<Vec<BlockVolume>>;
    async fn delete_boot_volume_backup(&self, backup_id: &str) -> Result<()>;

    // Optional: storage allowance in GB.
    // Default returns None (caller proceeds without a quota check).
    async fn storage_limit_gb(&self, _tenancy_id: &str) -> Result<Option<u64>> {
        Ok(None)
    }

    // Networking
    async fn primary_vnic_address(&self, compartment_id: &str, instance_id: &str) -> Result<Option<VnicAddress>>;
}
