use crate::error::ReprovisionError;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Public keys (`*.pub`) found in `dirs`, in directory order then by name.
pub fn discover(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = vec![];
    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        let mut keys: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("pub"))
            .collect();
        keys.sort();
        found.extend(keys);
    }
    found
}

/// `id_ed25519.pub` -> `id_ed25519`.
pub fn private_key_for(public_key: &Path) -> PathBuf {
    if public_key.extension().and_then(|e| e.to_str()) == Some("pub") {
        public_key.with_extension("")
    } else {
        public_key.to_path_buf()
    }
}

/// Create an ed25519 key pair `<dir>/<name>` with `ssh-keygen`. Returns the public key path.
pub async fn generate(dir: &Path, name: &str, comment: &str) -> Result<PathBuf, ReprovisionError> {
    fs::create_dir_all(dir)?;
    let private = dir.join(name);
    if private.exists() {
        return Err(ReprovisionError::Precondition(format!(
            "{} already exists, pick another name",
            private.display()
        )));
    }
    let output = Command::new("ssh-keygen")
        .args(["-t", "ed25519", "-N", "", "-q", "-C", comment, "-f"])
        .arg(&private)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ReprovisionError::DependencyMissing(vec!["ssh-keygen".to_string()]),
            _ => ReprovisionError::Io(e),
        })?;
    if !output.status.success() {
        return Err(ReprovisionError::Precondition(format!(
            "ssh-keygen failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    tracing::info!("generated SSH key pair {}", private.display());
    let mut public = private.into_os_string();
    public.push(".pub");
    Ok(PathBuf::from(public))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_path_drops_pub_suffix() {
        assert_eq!(private_key_for(Path::new("/k/id_ed25519.pub")), PathBuf::from("/k/id_ed25519"));
        assert_eq!(private_key_for(Path::new("/k/id_rsa")), PathBuf::from("/k/id_rsa"));
    }

    #[test]
    fn discovers_only_public_keys() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(a.path().join("work.pub"), "ssh-ed25519 A").unwrap();
        fs::write(a.path().join("work"), "PRIVATE").unwrap();
        fs::write(b.path().join("id_rsa.pub"), "ssh-rsa B").unwrap();
        let keys = discover(&[a.path().to_path_buf(), b.path().to_path_buf(), PathBuf::from("/nonexistent")]);
        assert_eq!(keys.len(), 2);
        assert!(keys[0].ends_with("work.pub"));
        assert!(keys[1].ends_with("id_rsa.pub"));
    }
}
