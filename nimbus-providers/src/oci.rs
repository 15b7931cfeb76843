use crate::credentials::ResolvedCredentials;
use crate::error::ProviderError;
use crate::{CloudProvider, InstanceAction, ReplaceBootVolumeRequest};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nimbus_common::{
    AttachmentState, BlockVolume, BootVolume, BootVolumeAttachment, BootVolumeBackup, Compartment,
    Image, Instance, LifecycleState, RegionSubscription, VnicAddress,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_CLI: &str = "oci";
const STORAGE_LIMIT_NAME: &str = "total-free-storage-gb";

/// Control-plane client that drives the `oci` CLI with JSON output.
pub struct OciCliProvider {
    cli: String,
    credentials: ResolvedCredentials,
    call_timeout: Duration,
}

// --- CLI payloads (kebab-case JSON) ---

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OciInstance {
    id: String,
    display_name: Option<String>,
    shape: String,
    lifecycle_state: LifecycleState,
    availability_domain: String,
    compartment_id: String,
    region: Option<String>,
    time_created: Option<DateTime<Utc>>,
}

impl From<OciInstance> for Instance {
    fn from(i: OciInstance) -> Self {
        Instance {
            display_name: i.display_name.unwrap_or_else(|| i.id.clone()),
            id: i.id,
            shape: i.shape,
            lifecycle_state: i.lifecycle_state,
            availability_domain: i.availability_domain,
            compartment_id: i.compartment_id,
            region: i.region,
            time_created: i.time_created,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OciBootVolumeAttachment {
    id: String,
    instance_id: String,
    boot_volume_id: String,
    lifecycle_state: AttachmentState,
    time_created: DateTime<Utc>,
}

impl From<OciBootVolumeAttachment> for BootVolumeAttachment {
    fn from(a: OciBootVolumeAttachment) -> Self {
        BootVolumeAttachment {
            id: a.id,
            instance_id: a.instance_id,
            boot_volume_id: a.boot_volume_id,
            lifecycle_state: a.lifecycle_state,
            time_created: a.time_created,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OciVolume {
    id: String,
    display_name: Option<String>,
    size_in_gbs: Option<u64>,
    lifecycle_state: LifecycleState,
    availability_domain: Option<String>,
}

impl OciVolume {
    fn name(&self) -> String {
        self.display_name.clone().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OciImage {
    id: String,
    display_name: Option<String>,
    operating_system: Option<String>,
    time_created: Option<DateTime<Utc>>,
}

impl From<OciImage> for Image {
    fn from(i: OciImage) -> Self {
        Image {
            id: i.id,
            display_name: i.display_name.unwrap_or_default(),
            operating_system: i.operating_system.unwrap_or_default(),
            time_created: i.time_created,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OciCompartment {
    id: String,
    name: String,
    description: Option<String>,
    lifecycle_state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OciRegionSubscription {
    region_name: String,
    is_home_region: bool,
}

#[derive(Debug, Deserialize)]
struct OciNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OciLimitValue {
    name: String,
    value: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OciVnicAttachment {
    vnic_id: Option<String>,
    lifecycle_state: AttachmentState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OciVnic {
    public_ip: Option<String>,
    private_ip: Option<String>,
}

impl OciCliProvider {
    pub fn new(credentials: ResolvedCredentials) -> Self {
        let cli = std::env::var("OCI_CLI_BIN")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_CLI.to_string());
        Self {
            cli,
            credentials,
            // A hung CLI call must not stall the workflow forever.
            call_timeout: Duration::from_secs(120),
        }
    }

    pub fn credentials(&self) -> &ResolvedCredentials {
        &self.credentials
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.cli);
        cmd.args(args);
        if let (Some(profile), Some(file)) = (&self.credentials.profile, &self.credentials.config_file) {
            cmd.arg("--config-file").arg(file).arg("--profile").arg(profile);
        }
        for (k, v) in self.credentials.cli_env() {
            cmd.env(k, v);
        }
        cmd.env("OCI_CLI_SUPPRESS_FILE_PERMISSIONS_WARNING", "True");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run one CLI call. Returns `None` when the CLI printed nothing (empty list results).
    async fn run<T: DeserializeOwned>(&self, operation: &str, args: &[&str]) -> Result<Option<T>> {
        let child = match self.command(args).spawn() {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProviderError::CliMissing(self.cli.clone()).into());
            }
            Err(e) => return Err(anyhow::anyhow!("failed to spawn '{}': {}", self.cli, e)),
        };

        let output = match tokio::time::timeout(self.call_timeout, child.wait_with_output()).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(anyhow::anyhow!(
                    "{} timed out after {}s",
                    operation,
                    self.call_timeout.as_secs()
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            eprintln!("❌ [OCI CLI] {} failed: {}", operation, stderr.trim());
            return Err(ProviderError::from_output(operation, &stderr).into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        let env: Envelope<T> = serde_json::from_str(&stdout).map_err(|e| ProviderError::Parse {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(env.data))
    }

    async fn run_list<T: DeserializeOwned>(&self, operation: &str, args: &[&str]) -> Result<Vec<T>> {
        Ok(self.run::<Vec<T>>(operation, args).await?.unwrap_or_default())
    }

    /// Mutating calls whose response body is not needed.
    async fn run_action(&self, operation: &str, args: &[&str]) -> Result<()> {
        self.run::<serde_json::Value>(operation, args).await?;
        Ok(())
    }

    async fn run_one<T: DeserializeOwned>(&self, operation: &str, what: &str, args: &[&str]) -> Result<T> {
        self.run::<T>(operation, args)
            .await?
            .ok_or_else(|| ProviderError::NotFound(what.to_string()).into())
    }
}

#[async_trait]
impl CloudProvider for OciCliProvider {
    fn name(&self) -> &'static str {
        "oci"
    }

    async fn list_region_subscriptions(&self, tenancy_id: &str) -> Result<Vec<RegionSubscription>> {
        let subs: Vec<OciRegionSubscription> = self
            .run_list(
                "iam region-subscription list",
                &["iam", "region-subscription", "list", "--tenancy-id", tenancy_id],
            )
            .await?;
        Ok(subs
            .into_iter()
            .map(|s| RegionSubscription {
                region_name: s.region_name,
                is_home_region: s.is_home_region,
            })
            .collect())
    }

    async fn list_compartments(&self, tenancy_id: &str) -> Result<Vec<Compartment>> {
        let comps: Vec<OciCompartment> = self
            .run_list(
                "iam compartment list",
                &[
                    "iam",
                    "compartment",
                    "list",
                    "--compartment-id",
                    tenancy_id,
                    "--compartment-id-in-subtree",
                    "true",
                    "--lifecycle-state",
                    "ACTIVE",
                    "--all",
                ],
            )
            .await?;
        Ok(comps
            .into_iter()
            .filter(|c| c.lifecycle_state == "ACTIVE")
            .map(|c| Compartment {
                id: c.id,
                name: c.name,
                description: c.description,
            })
            .collect())
    }

    async fn list_availability_domains(&self, compartment_id: &str) -> Result<Vec<String>> {
        let ads: Vec<OciNamed> = self
            .run_list(
                "iam availability-domain list",
                &["iam", "availability-domain", "list", "--compartment-id", compartment_id],
            )
            .await?;
        Ok(ads.into_iter().map(|a| a.name).collect())
    }

    async fn list_instances(&self, compartment_id: &str) -> Result<Vec<Instance>> {
        let instances: Vec<OciInstance> = self
            .run_list(
                "compute instance list",
                &["compute", "instance", "list", "--compartment-id", compartment_id, "--all"],
            )
            .await?;
        Ok(instances.into_iter().map(Instance::from).collect())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        let inst: OciInstance = self
            .run_one(
                "compute instance get",
                instance_id,
                &["compute", "instance", "get", "--instance-id", instance_id],
            )
            .await?;
        Ok(inst.into())
    }

    async fn instance_action(&self, instance_id: &str, action: InstanceAction) -> Result<()> {
        eprintln!("🔵 [OCI CLI] instance action {} on {}", action.as_str(), instance_id);
        self.run_action(
            "compute instance action",
            &[
                "compute",
                "instance",
                "action",
                "--instance-id",
                instance_id,
                "--action",
                action.as_str(),
            ],
        )
        .await
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        eprintln!("🔴 [OCI CLI] terminating {}", instance_id);
        self.run_action(
            "compute instance terminate",
            &[
                "compute",
                "instance",
                "terminate",
                "--instance-id",
                instance_id,
                "--preserve-boot-volume",
                "false",
                "--force",
            ],
        )
        .await
    }

    async fn list_boot_volume_attachments(
        &self,
        availability_domain: &str,
        compartment_id: &str,
        instance_id: &str,
    ) -> Result<Vec<BootVolumeAttachment>> {
        let atts: Vec<OciBootVolumeAttachment> = self
            .run_list(
                "compute boot-volume-attachment list",
                &[
                    "compute",
                    "boot-volume-attachment",
                    "list",
                    "--availability-domain",
                    availability_domain,
                    "--compartment-id",
                    compartment_id,
                    "--instance-id",
                    instance_id,
                    "--all",
                ],
            )
            .await?;
        Ok(atts.into_iter().map(BootVolumeAttachment::from).collect())
    }

    async fn attach_boot_volume(
        &self,
        instance_id: &str,
        boot_volume_id: &str,
        display_name: &str,
    ) -> Result<BootVolumeAttachment> {
        eprintln!("🔵 [OCI CLI] attaching boot volume {} to {}", boot_volume_id, instance_id);
        let att: OciBootVolumeAttachment = self
            .run_one(
                "compute boot-volume-attachment attach",
                boot_volume_id,
                &[
                    "compute",
                    "boot-volume-attachment",
                    "attach",
                    "--instance-id",
                    instance_id,
                    "--boot-volume-id",
                    boot_volume_id,
                    "--display-name",
                    display_name,
                ],
            )
            .await?;
        Ok(att.into())
    }

    async fn replace_boot_volume(&self, instance_id: &str, request: &ReplaceBootVolumeRequest) -> Result<()> {
        let source_details = json!({
            "sourceType": "image",
            "imageId": request.image_id,
            "bootVolumeSizeInGBs": request.boot_volume_size_gb,
            "isPreserveBootVolumeEnabled": request.preserve_old_volume,
        })
        .to_string();
        let metadata = serde_json::to_string(&request.metadata)?;

        eprintln!(
            "🔵 [OCI CLI] replacing boot volume of {} from image {} ({} GB, preserve={})",
            instance_id, request.image_id, request.boot_volume_size_gb, request.preserve_old_volume
        );
        self.run_action(
            "compute instance update",
            &[
                "compute",
                "instance",
                "update",
                "--instance-id",
                instance_id,
                "--source-details",
                &source_details,
                "--metadata",
                &metadata,
                "--force",
            ],
        )
        .await
    }

    async fn list_images(&self, compartment_id: &str, operating_system: &str) -> Result<Vec<Image>> {
        let images: Vec<OciImage> = self
            .run_list(
                "compute image list",
                &[
                    "compute",
                    "image",
                    "list",
                    "--compartment-id",
                    compartment_id,
                    "--operating-system",
                    operating_system,
                    "--sort-by",
                    "TIMECREATED",
                    "--sort-order",
                    "DESC",
                    "--all",
                ],
            )
            .await?;
        Ok(images.into_iter().map(Image::from).collect())
    }

    async fn get_image(&self, image_id: &str) -> Result<Image> {
        let image: OciImage = self
            .run_one(
                "compute image get",
                image_id,
                &["compute", "image", "get", "--image-id", image_id],
            )
            .await?;
        Ok(image.into())
    }

    async fn get_boot_volume(&self, boot_volume_id: &str) -> Result<BootVolume> {
        let v: OciVolume = self
            .run_one(
                "bv boot-volume get",
                boot_volume_id,
                &["bv", "boot-volume", "get", "--boot-volume-id", boot_volume_id],
            )
            .await?;
        Ok(BootVolume {
            display_name: v.name(),
            id: v.id,
            size_in_gbs: v.size_in_gbs.unwrap_or(0),
            lifecycle_state: v.lifecycle_state,
            availability_domain: v.availability_domain.unwrap_or_default(),
        })
    }

    async fn list_boot_volumes(&self, availability_domain: &str, compartment_id: &str) -> Result<Vec<BootVolume>> {
        let vols: Vec<OciVolume> = self
            .run_list(
                "bv boot-volume list",
                &[
                    "bv",
                    "boot-volume",
                    "list",
                    "--availability-domain",
                    availability_domain,
                    "--compartment-id",
                    compartment_id,
                    "--all",
                ],
            )
            .await?;
        Ok(vols
            .into_iter()
            .filter(|v| !v.lifecycle_state.is_gone())
            .map(|v| BootVolume {
                display_name: v.name(),
                id: v.id,
                size_in_gbs: v.size_in_gbs.unwrap_or(0),
                lifecycle_state: v.lifecycle_state,
                availability_domain: v.availability_domain.unwrap_or_default(),
            })
            .collect())
    }

    async fn list_boot_volume_backups(&self, compartment_id: &str) -> Result<Vec<BootVolumeBackup>> {
        let backups: Vec<OciVolume> = self
            .run_list(
                "bv boot-volume-backup list",
                &["bv", "boot-volume-backup", "list", "--compartment-id", compartment_id, "--all"],
            )
            .await?;
        Ok(backups
            .into_iter()
            .filter(|b| !b.lifecycle_state.is_gone())
            .map(|b| BootVolumeBackup {
                display_name: b.name(),
                id: b.id,
                size_in_gbs: b.size_in_gbs.unwrap_or(0),
            })
            .collect())
    }

    async fn list_block_volumes(&self, availability_domain: &str, compartment_id: &str) -> Result<Vec<BlockVolume>> {
        let vols: Vec<OciVolume> = self
            .run_list(
                "bv volume list",
                &[
                    "bv",
                    "volume",
                    "list",
                    "--availability-domain",
                    availability_domain,
                    "--compartment-id",
                    compartment_id,
                    "--all",
                ],
            )
            .await?;
        Ok(vols
            .into_iter()
            .filter(|v| !v.lifecycle_state.is_gone())
            .map(|v| BlockVolume {
                display_name: v.name(),
                id: v.id,
                size_in_gbs: v.size_in_gbs.unwrap_or(0),
            })
            .collect())
    }

    async fn delete_boot_volume_backup(&self, backup_id: &str) -> Result<()> {
        eprintln!("🔵 [OCI CLI] deleting boot volume backup {}", backup_id);
        self.run_action(
            "bv boot-volume-backup delete",
            &[
                "bv",
                "boot-volume-backup",
                "delete",
                "--boot-volume-backup-id",
                backup_id,
                "--force",
            ],
        )
        .await
    }

    async fn storage_limit_gb(&self, tenancy_id: &str) -> Result<Option<u64>> {
        let values: Vec<OciLimitValue> = self
            .run_list(
                "limits value list",
                &[
                    "limits",
                    "value",
                    "list",
                    "--compartment-id",
                    tenancy_id,
                    "--service-name",
                    "block-storage",
                    "--all",
                ],
            )
            .await?;
        Ok(values
            .into_iter()
            .find(|v| v.name == STORAGE_LIMIT_NAME)
            .and_then(|v| v.value))
    }

    async fn primary_vnic_address(&self, compartment_id: &str, instance_id: &str) -> Result<Option<VnicAddress>> {
        let atts: Vec<OciVnicAttachment> = self
            .run_list(
                "compute vnic-attachment list",
                &[
                    "compute",
                    "vnic-attachment",
                    "list",
                    "--compartment-id",
                    compartment_id,
                    "--instance-id",
                    instance_id,
                ],
            )
            .await?;

        let Some(vnic_id) = atts
            .into_iter()
            .find(|a| a.lifecycle_state == AttachmentState::Attached)
            .and_then(|a| a.vnic_id)
        else {
            return Ok(None);
        };

        let vnic: Option<OciVnic> = self
            .run("network vnic get", &["network", "vnic", "get", "--vnic-id", &vnic_id])
            .await?;
        Ok(vnic.map(|v| VnicAddress {
            public_ip: v.public_ip,
            private_ip: v.private_ip,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_payload_maps_kebab_case() {
        let raw = r#"{"data":{
            "id":"ocid1.instance.oc1..x",
            "display-name":"web-1",
            "shape":"VM.Standard.A1.Flex",
            "lifecycle-state":"RUNNING",
            "availability-domain":"Uocm:EU-FRANKFURT-1-AD-1",
            "compartment-id":"ocid1.compartment.oc1..c",
            "region":"eu-frankfurt-1",
            "time-created":"2024-03-01T10:00:00.123000+00:00"
        }}"#;
        let env: Envelope<OciInstance> = serde_json::from_str(raw).unwrap();
        let inst: Instance = env.data.into();
        assert_eq!(inst.display_name, "web-1");
        assert_eq!(inst.lifecycle_state, LifecycleState::Running);
        assert_eq!(inst.architecture(), nimbus_common::Architecture::Arm);
    }

    #[test]
    fn attachment_payload_maps_states() {
        let raw = r#"{"data":[{
            "id":"ocid1.bva.1","instance-id":"i","boot-volume-id":"bv-old",
            "lifecycle-state":"DETACHED","time-created":"2024-03-01T10:00:00+00:00",
            "availability-domain":"AD-1"
        }]}"#;
        let env: Envelope<Vec<OciBootVolumeAttachment>> = serde_json::from_str(raw).unwrap();
        let att: BootVolumeAttachment = env.data.into_iter().next().unwrap().into();
        assert_eq!(att.lifecycle_state, AttachmentState::Detached);
        assert_eq!(att.boot_volume_id, "bv-old");
    }

    #[test]
    fn metadata_without_user_data_omits_the_key() {
        let md = crate::InstanceMetadata {
            ssh_authorized_keys: "ssh-ed25519 AAAA".into(),
            user_data: None,
        };
        let s = serde_json::to_string(&md).unwrap();
        assert!(!s.contains("user_data"));
    }
}
