use std::path::{Path, PathBuf};

/// Filesystem layout of local state, rooted at `$NIMBUS_HOME` (defaults to the working directory).
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Self {
        let root = std::env::var("NIMBUS_HOME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn local_dir(&self) -> PathBuf {
        self.root.join("local")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.local_dir().join("config")
    }

    pub fn ssh_dir(&self) -> PathBuf {
        self.local_dir().join("ssh")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.local_dir().join("logs")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates").join("cloud-init")
    }

    pub fn instance_config(&self) -> PathBuf {
        self.config_dir().join("instance.conf")
    }

    pub fn prepared_cloud_init(&self) -> PathBuf {
        self.config_dir().join("cloud-init-prepared.yaml")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [self.config_dir(), self.ssh_dir(), self.logs_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Session timestamp used in log file names.
pub fn session_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d-%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted() {
        let p = Paths::new("/srv/nimbus");
        assert_eq!(p.instance_config(), PathBuf::from("/srv/nimbus/local/config/instance.conf"));
        assert_eq!(p.templates_dir(), PathBuf::from("/srv/nimbus/templates/cloud-init"));
        assert_eq!(p.logs_dir(), PathBuf::from("/srv/nimbus/local/logs"));
    }

    #[test]
    fn timestamp_shape() {
        let ts = session_timestamp();
        assert_eq!(ts.len(), "2025-01-31-235959".len());
    }
}
