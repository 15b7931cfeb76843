//! `KEY=VALUE` file with the choices of a previous run.
//!
//! Loading only fills fields that are still empty (command-line flags win).
//! Saving rewrites the whole file. The guest password is stored in clear text
//! here; existing configs depend on that layout.

use crate::context::ReprovisionContext;
use crate::error::ReprovisionError;
use nimbus_providers::credentials::parse_key_values;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

fn fill(slot: &mut String, value: &str) {
    if slot.is_empty() && !value.is_empty() {
        *slot = value.to_string();
    }
}

fn fill_path(slot: &mut Option<PathBuf>, value: &str) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(PathBuf::from(value));
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Merge a saved config into the context. Returns false when the file does not exist.
pub fn load(path: &Path, ctx: &mut ReprovisionContext) -> Result<bool, ReprovisionError> {
    if !path.is_file() {
        return Ok(false);
    }
    let text = fs::read_to_string(path)?;
    let values = parse_key_values(&text);

    for (key, value) in &values {
        match key.as_str() {
            "OCI_PROFILE" => fill(&mut ctx.profile, value),
            "COMPARTMENT_OCID" => fill(&mut ctx.compartment_id, value),
            "INSTANCE_OCID" => fill(&mut ctx.instance_id, value),
            "IMAGE_OCID" => fill(&mut ctx.image_id, value),
            "AVAILABILITY_DOMAIN" => fill(&mut ctx.availability_domain, value),
            "SSH_PUBLIC_KEY_PATH" => fill_path(&mut ctx.ssh_public_key_path, value),
            "SSH_PRIVATE_KEY_PATH" => fill_path(&mut ctx.ssh_private_key_path, value),
            "NEW_USERNAME" => fill(&mut ctx.username, value),
            "NEW_PASSWORD" => fill(&mut ctx.password, value),
            "CLOUD_INIT_PATH" => fill_path(&mut ctx.cloud_init_template, value),
            "CLOUDPANEL_ADMIN_EMAIL" => fill(&mut ctx.cloudpanel_admin_email, value),
            "CLOUDPANEL_DB_ENGINE" => fill(&mut ctx.cloudpanel_db_engine, value),
            "INSTALL_CLOUDPANEL" => {
                if !ctx.install_cloudpanel {
                    ctx.install_cloudpanel = parse_bool(value);
                }
            }
            "BOOT_VOLUME_SIZE_GB" => {
                if ctx.boot_volume_size_gb.is_none() {
                    ctx.boot_volume_size_gb = value.parse().ok();
                }
            }
            "ARCH" => {
                if ctx.architecture.is_none() {
                    ctx.architecture = value.parse().ok();
                }
            }
            other => tracing::debug!("ignoring unknown instance config key {}", other),
        }
    }
    tracing::info!("loaded instance config from {}", path.display());
    Ok(true)
}

/// Render the config file body. Only non-empty values are written.
pub fn render(ctx: &ReprovisionContext) -> String {
    let path_str = |p: &Option<PathBuf>| {
        p.as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    let entries: Vec<(&str, String)> = vec![
        ("OCI_PROFILE", ctx.profile.clone()),
        ("COMPARTMENT_OCID", ctx.compartment_id.clone()),
        ("INSTANCE_OCID", ctx.instance_id.clone()),
        ("AVAILABILITY_DOMAIN", ctx.availability_domain.clone()),
        ("ARCH", ctx.architecture.map(|a| a.to_string()).unwrap_or_default()),
        ("IMAGE_OCID", ctx.image_id.clone()),
        (
            "BOOT_VOLUME_SIZE_GB",
            ctx.boot_volume_size_gb.map(|s| s.to_string()).unwrap_or_default(),
        ),
        ("SSH_PUBLIC_KEY_PATH", path_str(&ctx.ssh_public_key_path)),
        ("SSH_PRIVATE_KEY_PATH", path_str(&ctx.ssh_private_key_path)),
        ("NEW_USERNAME", ctx.username.clone()),
        ("NEW_PASSWORD", ctx.password.clone()),
        ("INSTALL_CLOUDPANEL", ctx.install_cloudpanel.to_string()),
        ("CLOUDPANEL_ADMIN_EMAIL", ctx.cloudpanel_admin_email.clone()),
        ("CLOUDPANEL_DB_ENGINE", ctx.cloudpanel_db_engine.clone()),
        ("CLOUD_INIT_PATH", path_str(&ctx.cloud_init_template)),
    ];

    let mut out = String::new();
    out.push_str("# nimbus reprovision instance config\n");
    let _ = writeln!(out, "# saved {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    out.push_str("# WARNING: NEW_PASSWORD is stored in plain text\n\n");
    for (key, value) in entries.into_iter().filter(|(_, v)| !v.is_empty()) {
        let _ = writeln!(out, "{}={}", key, value);
    }
    out
}

pub fn save(path: &Path, ctx: &ReprovisionContext) -> Result<(), ReprovisionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render(ctx))?;
    tracing::info!("saved instance config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_common::Architecture;

    #[test]
    fn load_keeps_values_already_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instance.conf");
        fs::write(
            &path,
            "# comment\nINSTANCE_OCID=ocid1.instance.saved\nIMAGE_OCID=\"ocid1.image.saved\"\nNEW_USERNAME=deploy\nINSTALL_CLOUDPANEL=true\nBOOT_VOLUME_SIZE_GB=100\n",
        )
        .unwrap();

        let mut ctx = ReprovisionContext {
            instance_id: "ocid1.instance.flag".into(),
            ..Default::default()
        };
        assert!(load(&path, &mut ctx).unwrap());
        assert_eq!(ctx.instance_id, "ocid1.instance.flag");
        assert_eq!(ctx.image_id, "ocid1.image.saved");
        assert_eq!(ctx.username, "deploy");
        assert!(ctx.install_cloudpanel);
        assert_eq!(ctx.boot_volume_size_gb, Some(100));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let mut ctx = ReprovisionContext::default();
        assert!(!load(Path::new("/nonexistent/instance.conf"), &mut ctx).unwrap());
    }

    #[test]
    fn save_writes_only_non_empty_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("instance.conf");
        let ctx = ReprovisionContext {
            profile: "work".into(),
            instance_id: "ocid1.instance.x".into(),
            architecture: Some(Architecture::Arm),
            ..Default::default()
        };
        save(&path, &ctx).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("OCI_PROFILE=work"));
        assert!(text.contains("ARCH=arm"));
        assert!(text.contains("INSTALL_CLOUDPANEL=false"));
        assert!(!text.contains("IMAGE_OCID="));

        let mut reloaded = ReprovisionContext::default();
        load(&path, &mut reloaded).unwrap();
        assert_eq!(reloaded.instance_id, "ocid1.instance.x");
        assert_eq!(reloaded.architecture, Some(Architecture::Arm));
    }
}
