use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod dashboard;
pub mod events;

pub use dashboard::{
    ActionLog, BudgetRule, CloudResource, ProtectionLevel, ProviderConfig, SpendingRecord,
};
pub use events::ResourceChangeEvent;

// --- Enums ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Moving,
    Provisioning,
    Running,
    Starting,
    Stopping,
    Stopped,
    CreatingImage,
    Terminating,
    Terminated,
    Available,
    Faulty,
    #[serde(other)]
    Unknown,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Moving => "MOVING",
            LifecycleState::Provisioning => "PROVISIONING",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Starting => "STARTING",
            LifecycleState::Stopping => "STOPPING",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::CreatingImage => "CREATING_IMAGE",
            LifecycleState::Terminating => "TERMINATING",
            LifecycleState::Terminated => "TERMINATED",
            LifecycleState::Available => "AVAILABLE",
            LifecycleState::Faulty => "FAULTY",
            LifecycleState::Unknown => "UNKNOWN",
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, LifecycleState::Terminating | LifecycleState::Terminated)
    }

    /// Dashboard status string for a provider lifecycle state.
    pub fn dashboard_status(&self) -> &'static str {
        match self {
            LifecycleState::Running | LifecycleState::Available => "running",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Starting => "starting",
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Terminated => "terminated",
            LifecycleState::Terminating => "terminating",
            LifecycleState::CreatingImage => "busy",
            _ => "unknown",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentState {
    Attaching,
    Attached,
    Detaching,
    Detached,
    #[serde(other)]
    Unknown,
}

impl AttachmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentState::Attaching => "ATTACHING",
            AttachmentState::Attached => "ATTACHED",
            AttachmentState::Detaching => "DETACHING",
            AttachmentState::Detached => "DETACHED",
            AttachmentState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for AttachmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    #[default]
    X86,
    Arm,
}

impl Architecture {
    /// Shape-name heuristic: Ampere (A1) shapes are ARM, everything else is x86.
    /// A provider renaming its shapes would silently misclassify here.
    pub fn from_shape(shape: &str) -> Self {
        let lower = shape.to_lowercase();
        if lower.contains("a1") || lower.contains("ampere") {
            Architecture::Arm
        } else {
            Architecture::X86
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86 => "x86",
            Architecture::Arm => "arm",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown architecture '{0}' (expected x86 or arm)")]
pub struct ParseArchitectureError(String);

impl FromStr for Architecture {
    type Err = ParseArchitectureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "x86" | "x86_64" | "amd64" => Ok(Architecture::X86),
            "arm" | "arm64" | "aarch64" => Ok(Architecture::Arm),
            other => Err(ParseArchitectureError(other.to_string())),
        }
    }
}

// --- Remote object references ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Instance {
    pub id: String,
    pub display_name: String,
    pub shape: String,
    pub lifecycle_state: LifecycleState,
    pub availability_domain: String,
    pub compartment_id: String,
    pub region: Option<String>,
    pub time_created: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn architecture(&self) -> Architecture {
        Architecture::from_shape(&self.shape)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BootVolumeAttachment {
    pub id: String,
    pub instance_id: String,
    pub boot_volume_id: String,
    pub lifecycle_state: AttachmentState,
    pub time_created: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BootVolume {
    pub id: String,
    pub display_name: String,
    pub size_in_gbs: u64,
    pub lifecycle_state: LifecycleState,
    pub availability_domain: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BootVolumeBackup {
    pub id: String,
    pub display_name: String,
    pub size_in_gbs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BlockVolume {
    pub id: String,
    pub display_name: String,
    pub size_in_gbs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Image {
    pub id: String,
    pub display_name: String,
    pub operating_system: String,
    pub time_created: Option<DateTime<Utc>>,
}

impl Image {
    pub fn architecture(&self) -> Architecture {
        if self.display_name.to_lowercase().contains("aarch64") {
            Architecture::Arm
        } else {
            Architecture::X86
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct VnicAddress {
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Compartment {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegionSubscription {
    pub region_name: String,
    pub is_home_region: bool,
}

/// Named credential set stored in the profile file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub user_id: String,
    pub tenancy_id: String,
    pub region: String,
    pub key_file: String,
    pub fingerprint: String,
}

/// Storage usage against the account limit, recomputed on every run.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub limit_gb: u64,
    pub boot_volumes_gb: u64,
    pub backups_gb: u64,
    pub block_volumes_gb: u64,
    pub needed_gb: u64,
}

impl QuotaSnapshot {
    pub fn used_gb(&self) -> u64 {
        self.boot_volumes_gb + self.backups_gb + self.block_volumes_gb
    }

    pub fn available_gb(&self) -> i64 {
        self.limit_gb as i64 - self.used_gb() as i64
    }

    pub fn is_sufficient(&self, freed_gb: u64) -> bool {
        self.available_gb() + freed_gb as i64 >= self.needed_gb as i64
    }
}
