use nimbus_common::{Architecture, LifecycleState, QuotaSnapshot};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_DB_ENGINE: &str = "MYSQL_8.4";
pub const MIN_BOOT_VOLUME_GB: u64 = 47;

/// Everything one reprovisioning run knows, threaded through every step.
/// Empty strings mean "not chosen yet".
#[derive(Debug, Clone, Default)]
pub struct ReprovisionContext {
    // Auth
    pub profile: String,
    pub tenancy_id: String,
    pub region: String,
    pub compartment_id: String,

    // Instance
    pub instance_id: String,
    pub instance_name: String,
    pub shape: String,
    pub availability_domain: String,
    pub lifecycle_state: Option<LifecycleState>,
    pub architecture: Option<Architecture>,
    pub arch_forced: bool,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,

    // Boot volumes
    pub boot_volume_id: String,
    pub boot_volume_size_gb: Option<u64>,
    pub new_boot_volume_id: Option<String>,
    pub delete_old_volume: bool,

    // Image
    pub image_id: String,
    pub image_name: String,

    // SSH
    pub ssh_public_key_path: Option<PathBuf>,
    pub ssh_private_key_path: Option<PathBuf>,

    // Guest user
    pub username: String,
    pub password: String,

    // Cloud-init
    pub cloud_init_template: Option<PathBuf>,
    pub prepared_cloud_init: Option<PathBuf>,
    pub extra_vars: BTreeMap<String, String>,
    pub install_cloudpanel: bool,
    pub cloudpanel_admin_email: String,
    pub cloudpanel_db_engine: String,

    // Run options
    pub skip_backup: bool,
    pub dry_run: bool,
    pub non_interactive: bool,

    pub quota: Option<QuotaSnapshot>,
}

impl ReprovisionContext {
    pub fn arch_label(&self) -> &'static str {
        self.architecture.map(|a| a.as_str()).unwrap_or("unknown")
    }

    pub fn admin_username(&self) -> &str {
        if self.username.is_empty() {
            DEFAULT_USERNAME
        } else {
            &self.username
        }
    }

    pub fn requested_size_gb(&self) -> u64 {
        self.boot_volume_size_gb
            .unwrap_or(MIN_BOOT_VOLUME_GB)
            .max(MIN_BOOT_VOLUME_GB)
    }

    /// Variables substituted into the cloud-init template besides the fixed ones.
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        let mut vars = self.extra_vars.clone();
        if self.install_cloudpanel {
            vars.entry("CLOUDPANEL_ADMIN_EMAIL".into())
                .or_insert_with(|| self.cloudpanel_admin_email.clone());
            let engine = if self.cloudpanel_db_engine.is_empty() {
                DEFAULT_DB_ENGINE.to_string()
            } else {
                self.cloudpanel_db_engine.clone()
            };
            vars.entry("CLOUDPANEL_DB_ENGINE".into()).or_insert(engine);
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_never_drops_below_minimum() {
        let mut ctx = ReprovisionContext::default();
        assert_eq!(ctx.requested_size_gb(), MIN_BOOT_VOLUME_GB);
        ctx.boot_volume_size_gb = Some(20);
        assert_eq!(ctx.requested_size_gb(), MIN_BOOT_VOLUME_GB);
        ctx.boot_volume_size_gb = Some(100);
        assert_eq!(ctx.requested_size_gb(), 100);
    }

    #[test]
    fn cloudpanel_vars_only_when_enabled() {
        let mut ctx = ReprovisionContext::default();
        assert!(ctx.template_vars().is_empty());
        ctx.install_cloudpanel = true;
        ctx.cloudpanel_admin_email = "ops@example.com".into();
        let vars = ctx.template_vars();
        assert_eq!(vars["CLOUDPANEL_DB_ENGINE"], DEFAULT_DB_ENGINE);
        assert_eq!(vars["CLOUDPANEL_ADMIN_EMAIL"], "ops@example.com");
    }
}
