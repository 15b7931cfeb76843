use crate::error::ReprovisionError;
use std::env;
use std::path::{Path, PathBuf};

/// Commands needed before any work starts. `ssh-keygen` and `openssl` are checked when used.
pub const REQUIRED: &[&str] = &["oci", "ssh"];

pub fn find_in_path(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
}

/// `OCI_CLI_BIN` or `oci`.
pub fn oci_binary() -> String {
    env::var("OCI_CLI_BIN")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "oci".to_string())
}

pub fn required_commands() -> Vec<String> {
    REQUIRED
        .iter()
        .map(|c| match *c {
            "oci" => oci_binary(),
            other => other.to_string(),
        })
        .collect()
}

pub fn check(commands: &[String]) -> Result<(), ReprovisionError> {
    let missing: Vec<String> = commands
        .iter()
        .filter(|c| find_in_path(c).is_none())
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReprovisionError::DependencyMissing(missing))
    }
}

pub fn require(command: &str) -> Result<(), ReprovisionError> {
    check(&[command.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_every_missing_command() {
        let err = check(&["definitely-not-a-real-tool-1".into(), "definitely-not-a-real-tool-2".into()]).unwrap_err();
        match err {
            ReprovisionError::DependencyMissing(cmds) => assert_eq!(cmds.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn absolute_paths_are_checked_directly() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        assert!(find_in_path(tool.to_str().unwrap()).is_some());
        assert!(find_in_path(dir.path().join("missing").to_str().unwrap()).is_none());
    }
}
