// Maps dashboard provider configs to live CloudProvider clients
use anyhow::{anyhow, Context};
use nimbus_common::ProviderConfig;
use nimbus_providers::credentials::default_config_path;
use nimbus_providers::oci::OciCliProvider;
use nimbus_providers::{CloudProvider, CredentialSource, ProfileCredentials, ProfileStore, StaticCredentials};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub const DEFAULT_PROFILE: &str = "DEFAULT";

/// A connected provider plus the compartment its resources are listed from.
#[derive(Clone)]
pub struct ProviderHandle {
    pub provider: Arc<dyn CloudProvider>,
    pub compartment_id: String,
}

pub trait ProviderConnector: Send + Sync {
    fn supported_types(&self) -> Vec<&'static str>;
    fn connect(&self, config: &ProviderConfig) -> anyhow::Result<ProviderHandle>;
}

/// Connects `oci` configs through the oci CLI.
pub struct OciConnector {
    default_config_file: PathBuf,
}

impl OciConnector {
    pub fn new(default_config_file: impl Into<PathBuf>) -> Self {
        Self {
            default_config_file: default_config_file.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(default_config_path())
    }
}

impl ProviderConnector for OciConnector {
    fn supported_types(&self) -> Vec<&'static str> {
        vec!["oci"]
    }

    fn connect(&self, config: &ProviderConfig) -> anyhow::Result<ProviderHandle> {
        let source = credential_source(config, &self.default_config_file)?;
        let mut credentials = source
            .resolve()
            .with_context(|| format!("resolving credentials for provider '{}'", config.id))?;
        if !config.region.trim().is_empty() {
            credentials.region = config.region.trim().to_string();
        }
        println!("🔌 [Providers] {} connected via {}", config.id, source.describe());
        let compartment_id = credentials.tenancy_id.clone();
        Ok(ProviderHandle {
            provider: Arc::new(OciCliProvider::new(credentials)),
            compartment_id,
        })
    }
}

/// Picks how a provider config authenticates.
///
/// `credentials_path` may point at an OCI config file (INI sections) or a flat
/// KEY=VALUE file. An empty path means the default OCI config file. In a config
/// file the section named after the provider id is used when present, otherwise
/// `DEFAULT`.
pub fn credential_source(config: &ProviderConfig, default_config_file: &Path) -> anyhow::Result<Box<dyn CredentialSource>> {
    let path = if config.credentials_path.trim().is_empty() {
        default_config_file.to_path_buf()
    } else {
        PathBuf::from(config.credentials_path.trim())
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading credentials file {}", path.display()))?;
    let is_profile_file = text.lines().any(|l| l.trim_start().starts_with('['));
    if !is_profile_file {
        return Ok(Box::new(StaticCredentials::new(path)));
    }

    let store = ProfileStore::new(path);
    let profile = if store.get(&config.id)?.is_some() {
        config.id.clone()
    } else {
        DEFAULT_PROFILE.to_string()
    };
    Ok(Box::new(ProfileCredentials::new(store, profile)))
}

/// Caches one handle per provider id; configs are re-read after `invalidate`.
pub struct ProviderRegistry {
    connector: Arc<dyn ProviderConnector>,
    handles: RwLock<HashMap<String, ProviderHandle>>,
}

impl ProviderRegistry {
    pub fn new(connector: Arc<dyn ProviderConnector>) -> Self {
        Self {
            connector,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn supported_types(&self) -> Vec<&'static str> {
        self.connector.supported_types()
    }

    pub fn is_supported(&self, provider_type: &str) -> bool {
        self.supported_types().iter().any(|t| *t == provider_type)
    }

    pub fn get(&self, config: &ProviderConfig) -> anyhow::Result<ProviderHandle> {
        if let Some(handle) = self.read_handles().get(&config.id) {
            return Ok(handle.clone());
        }
        if !self.is_supported(&config.provider_type) {
            return Err(anyhow!(
                "no adapter registered for type '{}' (supported: {})",
                config.provider_type,
                self.supported_types().join(", ")
            ));
        }
        let handle = self.connector.connect(config)?;
        self.write_handles().insert(config.id.clone(), handle.clone());
        Ok(handle)
    }

    pub fn invalidate(&self, provider_id: &str) {
        self.write_handles().remove(provider_id);
    }

    fn read_handles(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ProviderHandle>> {
        self.handles.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_handles(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ProviderHandle>> {
        self.handles.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nimbus_providers::mock::MockProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConnector {
        connects: AtomicUsize,
    }

    impl ProviderConnector for CountingConnector {
        fn supported_types(&self) -> Vec<&'static str> {
            vec!["oci"]
        }

        fn connect(&self, _config: &ProviderConfig) -> anyhow::Result<ProviderHandle> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderHandle {
                provider: Arc::new(MockProvider::new()),
                compartment_id: "ocid1.tenancy.oc1..test".to_string(),
            })
        }
    }

    fn config(id: &str, provider_type: &str, credentials_path: &str) -> ProviderConfig {
        ProviderConfig {
            id: id.to_string(),
            provider_type: provider_type.to_string(),
            display_name: id.to_string(),
            region: String::new(),
            credentials_path: credentials_path.to_string(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn handles_are_cached_until_invalidated() {
        let connector = Arc::new(CountingConnector {
            connects: AtomicUsize::new(0),
        });
        let registry = ProviderRegistry::new(connector.clone());
        let cfg = config("oci-main", "oci", "");

        registry.get(&cfg).unwrap();
        registry.get(&cfg).unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        registry.invalidate("oci-main");
        registry.get(&cfg).unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsupported_types_are_refused() {
        let registry = ProviderRegistry::new(Arc::new(CountingConnector {
            connects: AtomicUsize::new(0),
        }));
        let err = registry.get(&config("aws-1", "aws", "")).err().unwrap();
        assert!(err.to_string().contains("supported: oci"));
        assert!(registry.is_supported("oci"));
        assert!(!registry.is_supported("gcp"));
    }

    #[test]
    fn profile_named_after_the_provider_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config");
        std::fs::write(
            &file,
            "[DEFAULT]\nuser=ocid1.user.oc1..a\ntenancy=ocid1.tenancy.oc1..a\nregion=eu-paris-1\nfingerprint=aa\nkey_file=/k\n\n\
             [oci-main]\nuser=ocid1.user.oc1..b\ntenancy=ocid1.tenancy.oc1..b\nregion=eu-frankfurt-1\nfingerprint=bb\nkey_file=/k\n",
        )
        .unwrap();

        let named = credential_source(&config("oci-main", "oci", ""), &file).unwrap();
        assert!(named.describe().contains("oci-main"));
        let fallback = credential_source(&config("oci-other", "oci", ""), &file).unwrap();
        assert!(fallback.describe().contains(DEFAULT_PROFILE));
    }

    #[test]
    fn flat_files_use_static_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("oci.env");
        std::fs::write(&file, "OCI_USER_OCID=ocid1.user.oc1..a\nOCI_TENANCY_OCID=ocid1.tenancy.oc1..a\n").unwrap();
        let path = file.to_string_lossy().to_string();
        let source = credential_source(&config("oci-main", "oci", &path), Path::new("/nonexistent")).unwrap();
        assert!(source.describe().contains("oci.env"));
        assert!(credential_source(&config("oci-main", "oci", ""), Path::new("/nonexistent/config")).is_err());
    }
}
