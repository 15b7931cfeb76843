//! Profile selection and creation, connectivity test, compartment choice.

use crate::console;
use crate::context::ReprovisionContext;
use crate::deps;
use crate::error::ReprovisionError;
use crate::prompt::{non_empty, Prompter};
use nimbus_common::Profile;
use nimbus_providers::credentials::{expand_home, parse_ini, profile_from_section};
use nimbus_providers::{CloudProvider, ProfileStore};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const ADD_PROFILE: &str = "➕ Add a new profile";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationMethod {
    Bootstrap,
    GenerateKey,
    Manual,
    Import,
}

impl CreationMethod {
    pub const ALL: [CreationMethod; 4] = [
        CreationMethod::Bootstrap,
        CreationMethod::GenerateKey,
        CreationMethod::Manual,
        CreationMethod::Import,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CreationMethod::Bootstrap => "Browser login (oci setup bootstrap)",
            CreationMethod::GenerateKey => "Generate a new API key pair",
            CreationMethod::Manual => "Enter existing key details",
            CreationMethod::Import => "Import from another config file",
        }
    }
}

fn store_err(e: anyhow::Error) -> ReprovisionError {
    ReprovisionError::Precondition(format!("{:#}", e))
}

fn validate_profile_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("profile name cannot be empty".into());
    }
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err("use letters, digits, '_' or '-'".into())
    }
}

fn validate_ocid(prefix: &'static str) -> impl Fn(&str) -> Result<(), String> {
    move |s: &str| {
        if s.starts_with(prefix) {
            Ok(())
        } else {
            Err(format!("expected an OCID starting with '{}'", prefix))
        }
    }
}

/// Pick the profile for this run, creating one when asked (or when none exist).
pub async fn select_profile(
    store: &ProfileStore,
    prompter: &mut dyn Prompter,
    ctx: &mut ReprovisionContext,
) -> Result<Profile, ReprovisionError> {
    let profiles = store.load().map_err(store_err)?;

    if !ctx.profile.is_empty() {
        if let Some(p) = profiles.iter().find(|p| p.name == ctx.profile) {
            return Ok(p.clone());
        }
        console::warn(&format!("Profile '{}' not found in {}", ctx.profile, store.path().display()));
    }

    let profile = if profiles.is_empty() {
        console::info("No OCI profile found, let's create one");
        create_profile(store, prompter).await?
    } else {
        let mut items: Vec<String> = profiles
            .iter()
            .map(|p| format!("{} ({})", p.name, p.region))
            .collect();
        items.push(ADD_PROFILE.to_string());
        let default = profiles.iter().position(|p| p.name == "DEFAULT").or(Some(0));
        let idx = prompter.choose("OCI profile", &items, default)?;
        match profiles.get(idx) {
            Some(p) => p.clone(),
            None => create_profile(store, prompter).await?,
        }
    };
    ctx.profile = profile.name.clone();
    Ok(profile)
}

pub async fn create_profile(store: &ProfileStore, prompter: &mut dyn Prompter) -> Result<Profile, ReprovisionError> {
    let labels: Vec<String> = CreationMethod::ALL.iter().map(|m| m.label().to_string()).collect();
    let method = CreationMethod::ALL[prompter.choose("How do you want to add the profile?", &labels, None)?];

    let existing = store.profile_names().map_err(store_err)?;
    let default_name = if existing.is_empty() { Some("DEFAULT") } else { None };
    let name = prompter.input("Profile name", default_name, &|s: &str| {
        validate_profile_name(s)?;
        if existing.iter().any(|e| e == s) {
            return Err(format!("profile '{}' already exists", s));
        }
        Ok(())
    })?;

    let profile = match method {
        CreationMethod::Bootstrap => return bootstrap(store, &name).await,
        CreationMethod::GenerateKey => generate_key_profile(store, prompter, &name).await?,
        CreationMethod::Manual => manual_profile(prompter, &name)?,
        CreationMethod::Import => import_profile(prompter, &name)?,
    };
    store.append(&profile).map_err(store_err)?;
    console::success(&format!("Profile '{}' saved to {}", profile.name, store.path().display()));
    Ok(profile)
}

async fn bootstrap(store: &ProfileStore, name: &str) -> Result<Profile, ReprovisionError> {
    let cli = deps::oci_binary();
    console::step("Starting browser login, follow the instructions of the OCI CLI");
    let status = Command::new(&cli)
        .args(["setup", "bootstrap", "--profile-name", name, "--config-location"])
        .arg(store.path())
        .status()
        .await?;
    if !status.success() {
        return Err(ReprovisionError::Precondition(format!("oci setup bootstrap exited with {}", status)));
    }
    store
        .get(name)
        .map_err(store_err)?
        .ok_or_else(|| ReprovisionError::Precondition(format!("bootstrap did not create profile '{}'", name)))
}

fn ask_identity(prompter: &mut dyn Prompter) -> Result<(String, String, String), ReprovisionError> {
    let user = prompter.input("User OCID", None, &validate_ocid("ocid1.user."))?;
    let tenancy = prompter.input("Tenancy OCID", None, &validate_ocid("ocid1.tenancy."))?;
    let region = prompter.input("Region (e.g. eu-frankfurt-1)", None, &non_empty)?;
    Ok((user, tenancy, region))
}

fn manual_profile(prompter: &mut dyn Prompter, name: &str) -> Result<Profile, ReprovisionError> {
    let (user_id, tenancy_id, region) = ask_identity(prompter)?;
    let key_file = prompter.input("Private key file", None, &|s: &str| {
        if expand_home(s).is_file() {
            Ok(())
        } else {
            Err(format!("{} does not exist", s))
        }
    })?;
    let fingerprint = prompter.input("Key fingerprint", None, &non_empty)?;
    Ok(Profile {
        name: name.to_string(),
        user_id,
        tenancy_id,
        region,
        key_file: expand_home(&key_file).to_string_lossy().into_owned(),
        fingerprint,
    })
}

fn import_profile(prompter: &mut dyn Prompter, name: &str) -> Result<Profile, ReprovisionError> {
    let path = prompter.input("Config file to import from", None, &|s: &str| {
        if expand_home(s).is_file() {
            Ok(())
        } else {
            Err(format!("{} does not exist", s))
        }
    })?;
    let text = std::fs::read_to_string(expand_home(&path))?;
    let sections = parse_ini(&text);
    if sections.is_empty() {
        return Err(ReprovisionError::Precondition(format!("no profile sections in {}", path)));
    }
    let names: Vec<String> = sections.keys().cloned().collect();
    let idx = prompter.choose("Profile to import", &names, Some(0))?;
    let mut profile = profile_from_section(&names[idx], &sections[&names[idx]]);
    profile.name = name.to_string();
    Ok(profile)
}

/// Extract the hex digest from `openssl dgst` output (`(stdin)= aa:bb:..` or `MD5(stdin)= ..`).
pub fn parse_fingerprint(output: &str) -> Option<String> {
    let digest = output.trim().rsplit("= ").next()?.trim();
    let valid = digest.split(':').count() == 16
        && digest
            .split(':')
            .all(|b| b.len() == 2 && b.chars().all(|c| c.is_ascii_hexdigit()));
    valid.then(|| digest.to_lowercase())
}

async fn openssl(args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>, ReprovisionError> {
    let mut child = Command::new("openssl")
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input).await?;
    }
    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(ReprovisionError::Precondition(format!(
            "openssl {} failed: {}",
            args.first().copied().unwrap_or(""),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

/// RSA 2048 key pair next to the profile file; returns (private key, public key, fingerprint).
pub async fn generate_api_key(dir: &Path, name: &str) -> Result<(PathBuf, PathBuf, String), ReprovisionError> {
    deps::require("openssl")?;
    std::fs::create_dir_all(dir)?;
    let private = dir.join(format!("{}_api_key.pem", name.to_lowercase()));
    let public = dir.join(format!("{}_api_key_public.pem", name.to_lowercase()));
    if private.exists() {
        return Err(ReprovisionError::Precondition(format!("{} already exists", private.display())));
    }
    let private_s = private.to_string_lossy().into_owned();
    let public_s = public.to_string_lossy().into_owned();

    openssl(&["genrsa", "-out", &private_s, "2048"], None).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&private, std::fs::Permissions::from_mode(0o600))?;
    }
    openssl(&["rsa", "-pubout", "-in", &private_s, "-out", &public_s], None).await?;
    let der = openssl(&["rsa", "-pubout", "-outform", "DER", "-in", &private_s], None).await?;
    let digest = openssl(&["dgst", "-md5", "-c"], Some(&der)).await?;
    let fingerprint = parse_fingerprint(&String::from_utf8_lossy(&digest))
        .ok_or_else(|| ReprovisionError::Precondition("could not read the key fingerprint".to_string()))?;
    Ok((private, public, fingerprint))
}

async fn generate_key_profile(
    store: &ProfileStore,
    prompter: &mut dyn Prompter,
    name: &str,
) -> Result<Profile, ReprovisionError> {
    let dir = store
        .path()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let (private, public, fingerprint) = generate_api_key(&dir, name).await?;
    console::success(&format!("Generated API key {}", private.display()));
    console::info("Upload the public key in the console: Profile > API keys > Add API key");
    if let Ok(pem) = std::fs::read_to_string(&public) {
        for line in pem.lines() {
            console::detail(line);
        }
    }
    console::detail(&format!("Expected fingerprint: {}", fingerprint));
    if !prompter.confirm("Public key uploaded?", true)? {
        return Err(ReprovisionError::UserAbort("API key was not uploaded".to_string()));
    }
    let (user_id, tenancy_id, region) = ask_identity(prompter)?;
    Ok(Profile {
        name: name.to_string(),
        user_id,
        tenancy_id,
        region,
        key_file: private.to_string_lossy().into_owned(),
        fingerprint,
    })
}

/// List region subscriptions; returns the home region.
pub async fn test_connectivity(provider: &dyn CloudProvider, tenancy_id: &str) -> Result<String, ReprovisionError> {
    console::step("Testing API access");
    let regions = provider
        .list_region_subscriptions(tenancy_id)
        .await
        .map_err(ReprovisionError::from_provider)?;
    let home = regions
        .iter()
        .find(|r| r.is_home_region)
        .or_else(|| regions.first())
        .map(|r| r.region_name.clone())
        .ok_or_else(|| ReprovisionError::Precondition("tenancy has no region subscription".to_string()))?;
    console::success(&format!("Connected. Home region: {} ({} subscribed)", home, regions.len()));
    Ok(home)
}

/// Root compartment first, then the ACTIVE compartments of the tree.
pub async fn select_compartment(
    provider: &dyn CloudProvider,
    prompter: &mut dyn Prompter,
    ctx: &mut ReprovisionContext,
) -> Result<(), ReprovisionError> {
    if !ctx.compartment_id.is_empty() {
        return Ok(());
    }
    let compartments = provider
        .list_compartments(&ctx.tenancy_id)
        .await
        .map_err(ReprovisionError::from_provider)?;
    if compartments.is_empty() {
        ctx.compartment_id = ctx.tenancy_id.clone();
        return Ok(());
    }
    let mut ids = vec![ctx.tenancy_id.clone()];
    let mut items = vec!["(root) tenancy".to_string()];
    for c in compartments {
        items.push(match &c.description {
            Some(d) if !d.is_empty() => format!("{} - {}", c.name, d),
            _ => c.name.clone(),
        });
        ids.push(c.id);
    }
    let idx = prompter.choose("Compartment", &items, Some(0))?;
    ctx.compartment_id = ids[idx].clone();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{Answer, ScriptedPrompter};
    use nimbus_common::Compartment;
    use nimbus_providers::mock::MockProvider;

    fn store_with(dir: &Path, body: &str) -> ProfileStore {
        let path = dir.join("config");
        std::fs::write(&path, body).unwrap();
        ProfileStore::new(path)
    }

    #[test]
    fn fingerprint_parsing() {
        let fp = "(stdin)= 3B:2a:00:11:22:33:44:55:66:77:88:99:aa:bb:cc:dd\n";
        assert_eq!(parse_fingerprint(fp).unwrap(), "3b:2a:00:11:22:33:44:55:66:77:88:99:aa:bb:cc:dd");
        assert_eq!(
            parse_fingerprint("MD5(stdin)= 00:11:22:33:44:55:66:77:88:99:aa:bb:cc:dd:ee:ff").unwrap(),
            "00:11:22:33:44:55:66:77:88:99:aa:bb:cc:dd:ee:ff"
        );
        assert!(parse_fingerprint("garbage").is_none());
    }

    #[tokio::test]
    async fn preset_profile_is_used_without_prompting() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), "[DEFAULT]\nuser=u\ntenancy=t\nregion=r1\n[work]\nuser=u2\ntenancy=t2\nregion=r2\n");
        let mut ctx = ReprovisionContext {
            profile: "work".into(),
            ..Default::default()
        };
        let mut prompter = ScriptedPrompter::new([]);
        let p = select_profile(&store, &mut prompter, &mut ctx).await.unwrap();
        assert_eq!(p.tenancy_id, "t2");
        assert!(prompter.prompts.is_empty());
    }

    #[tokio::test]
    async fn import_appends_a_renamed_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), "[DEFAULT]\nuser=u\ntenancy=t\nregion=r1\n");
        let other = dir.path().join("other");
        std::fs::write(&other, "[legacy]\nuser=ocid1.user.x\ntenancy=ocid1.tenancy.y\nregion=us-ashburn-1\nfingerprint=ff\nkey_file=/k.pem\n").unwrap();

        let mut prompter = ScriptedPrompter::new([
            Answer::pick(ADD_PROFILE),
            Answer::pick("Import"),
            Answer::Text("imported".into()),
            Answer::Text(other.to_string_lossy().into_owned()),
            Answer::Index(0),
        ]);
        let mut ctx = ReprovisionContext::default();
        let p = select_profile(&store, &mut prompter, &mut ctx).await.unwrap();
        assert_eq!(p.name, "imported");
        assert_eq!(p.region, "us-ashburn-1");
        assert_eq!(ctx.profile, "imported");
        assert!(store.get("imported").unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_profile_names_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), "[DEFAULT]\nuser=u\ntenancy=t\nregion=r1\n");
        let mut prompter = ScriptedPrompter::new([Answer::pick("Enter existing"), Answer::Text("DEFAULT".into())]);
        assert!(create_profile(&store, &mut prompter).await.is_err());
    }

    #[tokio::test]
    async fn connectivity_reports_home_region() {
        let provider = MockProvider::new()
            .with_region("eu-frankfurt-1", false)
            .with_region("eu-paris-1", true);
        assert_eq!(test_connectivity(&provider, "t").await.unwrap(), "eu-paris-1");
    }

    #[tokio::test]
    async fn compartment_menu_starts_with_root() {
        let provider = MockProvider::new().with_compartment(Compartment {
            id: "ocid1.compartment.dev".into(),
            name: "dev".into(),
            description: None,
        });
        let mut ctx = ReprovisionContext {
            tenancy_id: "ocid1.tenancy.root".into(),
            ..Default::default()
        };
        let mut prompter = ScriptedPrompter::new([Answer::pick("dev")]);
        select_compartment(&provider, &mut prompter, &mut ctx).await.unwrap();
        assert_eq!(ctx.compartment_id, "ocid1.compartment.dev");
        assert!(prompter.menus[0][0].contains("root"));
    }
}
