//! Interactive choices: instance, image, SSH key, guest user, cloud-init, size.

use crate::cloud_init;
use crate::console;
use crate::context::{ReprovisionContext, MIN_BOOT_VOLUME_GB};
use crate::error::ReprovisionError;
use crate::inspector;
use crate::prompt::Prompter;
use crate::settings::Paths;
use crate::ssh_keys;
use nimbus_providers::credentials::home_dir;
use nimbus_providers::CloudProvider;
use std::path::PathBuf;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const DB_ENGINES: &[&str] = &["MYSQL_8.4", "MYSQL_8.0", "MARIADB_11.4", "MARIADB_10.11"];
const GENERATE_KEY: &str = "🔑 Generate a new ed25519 key pair";
const NO_TEMPLATE: &str = "None (SSH key only)";
const PASSWORD_ATTEMPTS: usize = 3;

/// `[a-z_][a-z0-9_-]*`, at most 32 characters.
pub fn validate_username(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !first_ok || !rest_ok || name.len() > 32 {
        return Err("lowercase letters, digits, '_' and '-', starting with a letter or '_'".to_string());
    }
    if name == "root" {
        return Err("root cannot be used as the admin user".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!("at least {} characters", MIN_PASSWORD_LEN));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), String> {
    match email.split_once('@') {
        Some((user, domain)) if !user.is_empty() && domain.contains('.') => Ok(()),
        _ => Err("enter a valid email address".to_string()),
    }
}

pub async fn select_instance(
    provider: &dyn CloudProvider,
    prompter: &mut dyn Prompter,
    ctx: &mut ReprovisionContext,
) -> Result<(), ReprovisionError> {
    if !ctx.instance_id.is_empty() {
        return Ok(());
    }
    let instances: Vec<_> = provider
        .list_instances(&ctx.compartment_id)
        .await
        .map_err(ReprovisionError::from_provider)?
        .into_iter()
        .filter(|i| !i.lifecycle_state.is_gone())
        .collect();
    if instances.is_empty() {
        return Err(ReprovisionError::Precondition(format!(
            "no instances found in compartment {}",
            ctx.compartment_id
        )));
    }
    let items: Vec<String> = instances
        .iter()
        .map(|i| format!("{} ({}, {})", i.display_name, i.shape, i.lifecycle_state))
        .collect();
    let default = (instances.len() == 1).then_some(0);
    let idx = prompter.choose("Instance to reprovision", &items, default)?;
    ctx.instance_id = instances[idx].id.clone();
    Ok(())
}

/// Keep a preset image when it exists and matches the architecture, otherwise offer the newest candidates.
pub async fn select_image(
    provider: &dyn CloudProvider,
    prompter: &mut dyn Prompter,
    ctx: &mut ReprovisionContext,
) -> Result<(), ReprovisionError> {
    let arch = ctx.architecture.unwrap_or_default();
    if !ctx.image_id.is_empty() {
        match provider.get_image(&ctx.image_id).await {
            Ok(image) if image.architecture() == arch => {
                ctx.image_name = image.display_name;
                return Ok(());
            }
            Ok(image) => console::warn(&format!(
                "Image {} is {} but the instance is {}, choose another one",
                image.display_name,
                image.architecture(),
                arch
            )),
            Err(e) => {
                let err = ReprovisionError::from_provider(e);
                if matches!(err, ReprovisionError::Auth(_)) {
                    return Err(err);
                }
                console::warn(&format!("Image {} is not usable: {}", ctx.image_id, err));
            }
        }
        ctx.image_id.clear();
    }

    let images = inspector::list_candidate_images(provider, ctx).await?;
    if images.is_empty() {
        return Err(ReprovisionError::Precondition(format!(
            "no {} images available for {}",
            inspector::IMAGE_OPERATING_SYSTEM,
            arch
        )));
    }
    let items: Vec<String> = images.iter().map(|i| i.display_name.clone()).collect();
    let idx = prompter.choose("Image", &items, Some(0))?;
    ctx.image_id = images[idx].id.clone();
    ctx.image_name = images[idx].display_name.clone();
    Ok(())
}

pub async fn select_ssh_key(
    prompter: &mut dyn Prompter,
    ctx: &mut ReprovisionContext,
    paths: &Paths,
) -> Result<(), ReprovisionError> {
    if let Some(public) = &ctx.ssh_public_key_path {
        if !public.is_file() {
            return Err(ReprovisionError::Precondition(format!(
                "SSH public key {} does not exist",
                public.display()
            )));
        }
        if ctx.ssh_private_key_path.is_none() {
            ctx.ssh_private_key_path = Some(ssh_keys::private_key_for(public));
        }
        return Ok(());
    }

    let keys = ssh_keys::discover(&[paths.ssh_dir(), home_dir().join(".ssh")]);
    let mut items: Vec<String> = keys.iter().map(|k| k.display().to_string()).collect();
    items.push(GENERATE_KEY.to_string());
    let default = if keys.is_empty() { None } else { Some(0) };
    let idx = prompter.choose("SSH public key", &items, default)?;

    let public: PathBuf = match keys.get(idx) {
        Some(k) => k.clone(),
        None => {
            let name = prompter.input("Key name", Some("nimbus_ed25519"), &|s: &str| {
                if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.') {
                    Ok(())
                } else {
                    Err("use letters, digits, '.', '_' or '-'".to_string())
                }
            })?;
            let public = ssh_keys::generate(&paths.ssh_dir(), &name, "nimbus-reprovision").await?;
            console::success(&format!("Generated {}", public.display()));
            public
        }
    };
    ctx.ssh_private_key_path = Some(ssh_keys::private_key_for(&public));
    ctx.ssh_public_key_path = Some(public);
    Ok(())
}

pub fn select_username(prompter: &mut dyn Prompter, ctx: &mut ReprovisionContext) -> Result<(), ReprovisionError> {
    let default = ctx.admin_username().to_string();
    ctx.username = prompter.input("Admin username", Some(&default), &validate_username)?;
    Ok(())
}

/// Asked only when a cloud-init template will carry it.
pub fn select_password(prompter: &mut dyn Prompter, ctx: &mut ReprovisionContext) -> Result<(), ReprovisionError> {
    if !ctx.password.is_empty() {
        if validate_password(&ctx.password).is_ok() {
            return Ok(());
        }
        console::warn("The saved password is too short, enter a new one");
    }
    for _ in 0..PASSWORD_ATTEMPTS {
        let password = prompter.password(&format!("Password for {}", ctx.admin_username()), true)?;
        match validate_password(&password) {
            Ok(()) => {
                ctx.password = password;
                return Ok(());
            }
            Err(e) => console::warn(&format!("Password rejected: {}", e)),
        }
    }
    Err(ReprovisionError::Precondition("no valid password entered".to_string()))
}

pub fn select_cloud_init(
    prompter: &mut dyn Prompter,
    ctx: &mut ReprovisionContext,
    paths: &Paths,
) -> Result<(), ReprovisionError> {
    if let Some(template) = &ctx.cloud_init_template {
        if !template.is_file() {
            return Err(ReprovisionError::Precondition(format!(
                "cloud-init template {} does not exist",
                template.display()
            )));
        }
        return Ok(());
    }

    let templates = cloud_init::list_templates(&paths.templates_dir());
    if templates.is_empty() {
        console::info("No cloud-init templates found, only the SSH key will be installed");
        return Ok(());
    }

    let cloudpanel = templates.iter().position(|t| {
        t.file_name()
            .map(|n| n.to_string_lossy().to_lowercase().contains("cloudpanel"))
            .unwrap_or(false)
    });
    if cloudpanel.is_some() {
        ctx.install_cloudpanel = prompter.confirm("Install CloudPanel?", ctx.install_cloudpanel)?;
        if ctx.install_cloudpanel {
            select_cloudpanel_options(prompter, ctx)?;
        }
    }

    let mut items: Vec<String> = templates
        .iter()
        .map(|t| t.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default())
        .collect();
    items.push(NO_TEMPLATE.to_string());
    let default = match cloudpanel {
        Some(idx) if ctx.install_cloudpanel => idx,
        _ => templates.len(),
    };
    let idx = prompter.choose("Cloud-init template", &items, Some(default))?;
    ctx.cloud_init_template = templates.get(idx).cloned();
    Ok(())
}

fn select_cloudpanel_options(prompter: &mut dyn Prompter, ctx: &mut ReprovisionContext) -> Result<(), ReprovisionError> {
    let current_email = ctx.cloudpanel_admin_email.clone();
    let default_email = (!current_email.is_empty()).then_some(current_email.as_str());
    ctx.cloudpanel_admin_email = prompter.input("CloudPanel admin email", default_email, &validate_email)?;

    let engines: Vec<String> = DB_ENGINES.iter().map(|e| e.to_string()).collect();
    let current = DB_ENGINES
        .iter()
        .position(|e| *e == ctx.cloudpanel_db_engine)
        .unwrap_or(0);
    let idx = prompter.choose("CloudPanel database engine", &engines, Some(current))?;
    ctx.cloudpanel_db_engine = engines[idx].clone();
    Ok(())
}

/// `preset` means the size came from a flag or the saved config and is not asked again.
pub fn select_size(prompter: &mut dyn Prompter, ctx: &mut ReprovisionContext, preset: bool) -> Result<(), ReprovisionError> {
    if preset {
        if ctx.boot_volume_size_gb.unwrap_or(0) < MIN_BOOT_VOLUME_GB {
            console::warn(&format!("Boot volume size raised to the {} GB minimum", MIN_BOOT_VOLUME_GB));
        }
        ctx.boot_volume_size_gb = Some(ctx.requested_size_gb());
        return Ok(());
    }
    let default = ctx.requested_size_gb().to_string();
    let answer = prompter.input("Boot volume size (GB)", Some(&default), &|s: &str| match s.parse::<u64>() {
        Ok(n) if n >= MIN_BOOT_VOLUME_GB => Ok(()),
        Ok(_) => Err(format!("minimum is {} GB", MIN_BOOT_VOLUME_GB)),
        Err(_) => Err("enter a number of GB".to_string()),
    })?;
    ctx.boot_volume_size_gb = Some(answer.parse().unwrap_or(MIN_BOOT_VOLUME_GB));
    Ok(())
}
