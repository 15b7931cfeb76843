//! Cloud-init rendering and the instance metadata sent with the replace call.
//!
//! Values are substituted verbatim. A user value that itself contains a
//! `__NAME__` token is not escaped.

use crate::context::ReprovisionContext;
use crate::error::ReprovisionError;
use crate::settings::Paths;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bcrypt::{hash, DEFAULT_COST};
use nimbus_providers::InstanceMetadata;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const USERNAME_TOKEN: &str = "__NEW_USERNAME__";
pub const PASSWORD_HASH_TOKEN: &str = "__NEW_PASSWORD_HASH__";
pub const SSH_KEY_TOKEN: &str = "__SSH_PUBLIC_KEY__";

pub fn hash_password(password: &str) -> Result<String, ReprovisionError> {
    Ok(hash(password, DEFAULT_COST)?)
}

pub fn render(
    template: &str,
    username: &str,
    password_hash: &str,
    ssh_public_key: &str,
    extra: &BTreeMap<String, String>,
) -> String {
    let mut out = template
        .replace(USERNAME_TOKEN, username)
        .replace(PASSWORD_HASH_TOKEN, password_hash)
        .replace(SSH_KEY_TOKEN, ssh_public_key.trim());
    for (name, value) in extra {
        out = out.replace(&format!("__{}__", name), value);
    }
    out
}

pub fn read_public_key(path: &Path) -> Result<String, ReprovisionError> {
    let key = fs::read_to_string(path).map_err(|e| {
        ReprovisionError::Precondition(format!("cannot read SSH public key {}: {}", path.display(), e))
    })?;
    let key = key.trim().to_string();
    if key.is_empty() {
        return Err(ReprovisionError::Precondition(format!(
            "SSH public key {} is empty",
            path.display()
        )));
    }
    Ok(key)
}

/// Render the selected template into the working file. Returns `None` when no template was chosen.
pub fn prepare(ctx: &mut ReprovisionContext, paths: &Paths) -> Result<Option<PathBuf>, ReprovisionError> {
    let Some(template_path) = ctx.cloud_init_template.clone() else {
        ctx.prepared_cloud_init = None;
        return Ok(None);
    };
    let template = fs::read_to_string(&template_path).map_err(|e| {
        ReprovisionError::Precondition(format!(
            "cloud-init template {} not readable: {}",
            template_path.display(),
            e
        ))
    })?;
    let key_path = ctx
        .ssh_public_key_path
        .clone()
        .ok_or_else(|| ReprovisionError::Precondition("no SSH public key selected".to_string()))?;
    let public_key = read_public_key(&key_path)?;
    let password_hash = if ctx.password.is_empty() {
        // Locked password, key-only login.
        "!".to_string()
    } else {
        hash_password(&ctx.password)?
    };

    let rendered = render(
        &template,
        ctx.admin_username(),
        &password_hash,
        &public_key,
        &ctx.template_vars(),
    );
    let out = paths.prepared_cloud_init();
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&out, rendered)?;
    tracing::info!("rendered {} into {}", template_path.display(), out.display());
    ctx.prepared_cloud_init = Some(out.clone());
    Ok(Some(out))
}

/// `user_data` is only present when a cloud-init document was prepared.
pub fn build_metadata(ctx: &ReprovisionContext) -> Result<InstanceMetadata, ReprovisionError> {
    let key_path = ctx
        .ssh_public_key_path
        .as_ref()
        .ok_or_else(|| ReprovisionError::Precondition("no SSH public key selected".to_string()))?;
    let ssh_authorized_keys = read_public_key(key_path)?;
    let user_data = match &ctx.prepared_cloud_init {
        Some(path) => Some(STANDARD.encode(fs::read(path)?)),
        None => None,
    };
    Ok(InstanceMetadata {
        ssh_authorized_keys,
        user_data,
    })
}

/// `*.yaml` and `*.yml` files of the templates directory, sorted by name.
pub fn list_templates(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return vec![];
    };
    let mut templates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    templates.sort();
    templates
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "#cloud-config\nusers:\n  - name: __NEW_USERNAME__\n    passwd: __NEW_PASSWORD_HASH__\n    ssh_authorized_keys:\n      - __SSH_PUBLIC_KEY__\nruncmd:\n  - echo __CLOUDPANEL_DB_ENGINE__\n";

    fn ctx_with_key(dir: &Path) -> ReprovisionContext {
        let key = dir.join("id_ed25519.pub");
        fs::write(&key, "ssh-ed25519 AAAATEST user@host\n").unwrap();
        ReprovisionContext {
            username: "deploy".into(),
            password: "correct horse".into(),
            ssh_public_key_path: Some(key),
            ..Default::default()
        }
    }

    #[test]
    fn render_substitutes_fixed_and_extra_tokens() {
        let mut extra = BTreeMap::new();
        extra.insert("CLOUDPANEL_DB_ENGINE".to_string(), "MYSQL_8.4".to_string());
        let out = render(TEMPLATE, "deploy", "$2b$hash", "ssh-ed25519 KEY\n", &extra);
        assert!(out.contains("name: deploy"));
        assert!(out.contains("passwd: $2b$hash"));
        assert!(out.contains("- ssh-ed25519 KEY\n"));
        assert!(out.contains("echo MYSQL_8.4"));
        assert!(!out.contains("__"));
    }

    #[test]
    fn password_hash_is_salted_and_verifiable() {
        let a = hash_password("s3cret-pass").unwrap();
        let b = hash_password("s3cret-pass").unwrap();
        assert_ne!(a, b);
        assert!(bcrypt::verify("s3cret-pass", &a).unwrap());
    }

    #[test]
    fn metadata_without_template_has_no_user_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with_key(dir.path());
        let paths = Paths::new(dir.path());
        assert!(prepare(&mut ctx, &paths).unwrap().is_none());
        let meta = build_metadata(&ctx).unwrap();
        assert_eq!(meta.ssh_authorized_keys, "ssh-ed25519 AAAATEST user@host");
        assert!(meta.user_data.is_none());
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("user_data").is_none());
    }

    #[test]
    fn prepared_template_is_base64_user_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with_key(dir.path());
        let template = dir.path().join("default.yaml");
        fs::write(&template, TEMPLATE).unwrap();
        ctx.cloud_init_template = Some(template);
        let paths = Paths::new(dir.path());

        let out = prepare(&mut ctx, &paths).unwrap().unwrap();
        let rendered = fs::read_to_string(&out).unwrap();
        assert!(!rendered.contains("correct horse"));
        assert!(rendered.contains("name: deploy"));

        let meta = build_metadata(&ctx).unwrap();
        let decoded = STANDARD.decode(meta.user_data.unwrap()).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), rendered);
    }

    #[test]
    fn missing_template_is_a_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with_key(dir.path());
        ctx.cloud_init_template = Some(dir.path().join("nope.yaml"));
        assert!(matches!(
            prepare(&mut ctx, &Paths::new(dir.path())),
            Err(ReprovisionError::Precondition(_))
        ));
    }

    #[test]
    fn templates_are_listed_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.yml", "a.yaml", "notes.txt"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        let names: Vec<String> = list_templates(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.yaml", "b.yml"]);
    }
}
