//! Credential sources for the OCI control plane.
//!
//! Two layouts are supported: named profiles in an INI file (`~/.oci/config`)
//! and a single flat `KEY=VALUE` file. Both resolve to the same
//! [`ResolvedCredentials`], so the rest of the workflow never cares where the
//! identity came from.

use anyhow::{Context, Result};
use nimbus_common::Profile;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    pub user_id: String,
    pub tenancy_id: String,
    pub region: String,
    pub key_file: PathBuf,
    pub fingerprint: String,
    /// Profile name and file when the source was a profile file.
    pub profile: Option<String>,
    pub config_file: Option<PathBuf>,
}

impl ResolvedCredentials {
    pub fn endpoint(&self) -> String {
        format!("https://iaas.{}.oraclecloud.com", self.region)
    }

    /// Environment overrides understood by the `oci` CLI.
    pub fn cli_env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("OCI_CLI_USER", self.user_id.clone()),
            ("OCI_CLI_TENANCY", self.tenancy_id.clone()),
            ("OCI_CLI_REGION", self.region.clone()),
            ("OCI_CLI_FINGERPRINT", self.fingerprint.clone()),
            ("OCI_CLI_KEY_FILE", self.key_file.to_string_lossy().into_owned()),
        ]
    }
}

pub trait CredentialSource: Send + Sync {
    /// Human readable origin, e.g. "profile DEFAULT (~/.oci/config)".
    fn describe(&self) -> String;
    fn resolve(&self) -> Result<ResolvedCredentials>;
}

// -----------------------------------------------------------------------------
// Profile file (INI)
// -----------------------------------------------------------------------------

pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("OCI_CONFIG_FILE") {
        if !p.trim().is_empty() {
            return PathBuf::from(p);
        }
    }
    home_dir().join(".oci").join("config")
}

pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

/// Parse INI text into `section -> key -> value`. Keys before the first section are ignored.
pub fn parse_ini(text: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let (Some(section), Some((k, v))) = (current.as_ref(), line.split_once('=')) {
            sections
                .entry(section.clone())
                .or_default()
                .insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    sections
}

pub fn profile_from_section(name: &str, values: &BTreeMap<String, String>) -> Profile {
    let get = |k: &str| values.get(k).cloned().unwrap_or_default();
    Profile {
        name: name.to_string(),
        user_id: get("user"),
        tenancy_id: get("tenancy"),
        region: get("region"),
        key_file: get("key_file"),
        fingerprint: get("fingerprint"),
    }
}

/// Append-only store of named profiles.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<Profile>> {
        if !self.path.is_file() {
            return Ok(vec![]);
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(parse_ini(&text)
            .iter()
            .map(|(name, values)| profile_from_section(name, values))
            .collect())
    }

    pub fn profile_names(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_iter().map(|p| p.name).collect())
    }

    pub fn get(&self, name: &str) -> Result<Option<Profile>> {
        Ok(self.load()?.into_iter().find(|p| p.name == name))
    }

    /// Append a new `[name]` section. Existing sections are never rewritten.
    pub fn append(&self, profile: &Profile) -> Result<()> {
        if self.get(&profile.name)?.is_some() {
            anyhow::bail!("profile '{}' already exists in {}", profile.name, self.path.display());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let needs_leading_newline = fs::read_to_string(&self.path)
            .map(|t| !t.is_empty() && !t.ends_with("\n\n"))
            .unwrap_or(false);

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;

        if needs_leading_newline {
            writeln!(file)?;
        }
        writeln!(file, "[{}]", profile.name)?;
        writeln!(file, "user={}", profile.user_id)?;
        writeln!(file, "fingerprint={}", profile.fingerprint)?;
        writeln!(file, "tenancy={}", profile.tenancy_id)?;
        writeln!(file, "region={}", profile.region)?;
        writeln!(file, "key_file={}", profile.key_file)?;
        Ok(())
    }
}

pub struct ProfileCredentials {
    store: ProfileStore,
    profile: String,
}

impl ProfileCredentials {
    pub fn new(store: ProfileStore, profile: impl Into<String>) -> Self {
        Self {
            store,
            profile: profile.into(),
        }
    }
}

impl CredentialSource for ProfileCredentials {
    fn describe(&self) -> String {
        format!("profile {} ({})", self.profile, self.store.path().display())
    }

    fn resolve(&self) -> Result<ResolvedCredentials> {
        let profile = self.store.get(&self.profile)?.ok_or_else(|| {
            ProviderError::Credentials(format!(
                "profile '{}' not found in {}",
                self.profile,
                self.store.path().display()
            ))
        })?;
        let mut creds = validate(
            &profile.user_id,
            &profile.tenancy_id,
            &profile.region,
            &profile.key_file,
            &profile.fingerprint,
        )?;
        creds.profile = Some(profile.name);
        creds.config_file = Some(self.store.path().to_path_buf());
        Ok(creds)
    }
}

// -----------------------------------------------------------------------------
// Static KEY=VALUE file
// -----------------------------------------------------------------------------

/// Single-account credentials file:
///
/// ```text
/// OCI_USER_OCID=ocid1.user.oc1..
/// OCI_TENANCY_OCID=ocid1.tenancy.oc1..
/// OCI_REGION=eu-frankfurt-1
/// OCI_KEY_FILE=~/.oci/oci_api_key.pem
/// OCI_FINGERPRINT=aa:bb:...
/// ```
pub struct StaticCredentials {
    path: PathBuf,
}

impl StaticCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub fn parse_key_values(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                .unwrap_or(v);
            (k.trim().to_string(), v.to_string())
        })
        .collect()
}

impl CredentialSource for StaticCredentials {
    fn describe(&self) -> String {
        format!("credentials file {}", self.path.display())
    }

    fn resolve(&self) -> Result<ResolvedCredentials> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let values = parse_key_values(&text);
        let get = |k: &str| values.get(k).map(String::as_str).unwrap_or_default();
        validate(
            get("OCI_USER_OCID"),
            get("OCI_TENANCY_OCID"),
            get("OCI_REGION"),
            get("OCI_KEY_FILE"),
            get("OCI_FINGERPRINT"),
        )
    }
}

fn validate(
    user_id: &str,
    tenancy_id: &str,
    region: &str,
    key_file: &str,
    fingerprint: &str,
) -> Result<ResolvedCredentials> {
    let missing: Vec<&str> = [
        ("user", user_id),
        ("tenancy", tenancy_id),
        ("region", region),
        ("key_file", key_file),
        ("fingerprint", fingerprint),
    ]
    .iter()
    .filter(|(_, v)| v.trim().is_empty())
    .map(|(k, _)| *k)
    .collect();

    if !missing.is_empty() {
        return Err(ProviderError::Credentials(format!("missing fields: {}", missing.join(", "))).into());
    }

    let key_path = expand_home(key_file);
    if !key_path.is_file() {
        return Err(ProviderError::Credentials(format!(
            "key_file {} does not exist",
            key_path.display()
        ))
        .into());
    }

    Ok(ResolvedCredentials {
        user_id: user_id.to_string(),
        tenancy_id: tenancy_id.to_string(),
        region: region.to_string(),
        key_file: key_path,
        fingerprint: fingerprint.to_string(),
        profile: None,
        config_file: None,
    })
}
