use crate::console;
use crate::poll::Timings;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub identity: Option<PathBuf>,
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on the target and return its stdout.
    async fn run(&self, target: &SshTarget, command: &str, timeout: Duration) -> Result<String>;
}

/// OpenSSH client. Host keys are not checked: the host key changes with every new boot volume.
pub struct SshCommand {
    binary: String,
}

impl SshCommand {
    pub fn new() -> Self {
        Self {
            binary: "ssh".to_string(),
        }
    }

    fn args(target: &SshTarget, command: &str) -> Vec<String> {
        let mut args = vec![];
        if let Some(identity) = &target.identity {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().into_owned());
        }
        for opt in [
            "StrictHostKeyChecking=no",
            "UserKnownHostsFile=/dev/null",
            "ConnectTimeout=5",
            "BatchMode=yes",
            "LogLevel=ERROR",
        ] {
            args.push("-o".to_string());
            args.push(opt.to_string());
        }
        args.push(format!("{}@{}", target.user, target.host));
        args.push(command.to_string());
        args
    }
}

impl Default for SshCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExecutor for SshCommand {
    async fn run(&self, target: &SshTarget, command: &str, timeout: Duration) -> Result<String> {
        let child = Command::new(&self.binary)
            .args(Self::args(target, command))
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| anyhow!("ssh to {} timed out after {}s", target.host, timeout.as_secs()))??;
        if !output.status.success() {
            return Err(anyhow!(
                "ssh exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Warm up, then try `echo ok` a bounded number of times. Never fails the run.
pub async fn verify(executor: &dyn RemoteExecutor, target: &SshTarget, timings: &Timings) -> bool {
    if !timings.ssh_warmup.is_zero() {
        console::info(&format!(
            "Waiting {}s for the guest to boot before checking SSH",
            timings.ssh_warmup.as_secs()
        ));
        tokio::time::sleep(timings.ssh_warmup).await;
    }
    for attempt in 1..=timings.ssh_attempts {
        console::step(&format!(
            "SSH check {}/{} on {}@{}",
            attempt, timings.ssh_attempts, target.user, target.host
        ));
        match executor.run(target, "echo ok", timings.ssh_timeout).await {
            Ok(out) if out.trim() == "ok" => {
                console::success(&format!("SSH reachable at {}@{}", target.user, target.host));
                return true;
            }
            Ok(out) => tracing::debug!("unexpected ssh output: {}", out),
            Err(e) => tracing::debug!("ssh attempt {} failed: {:#}", attempt, e),
        }
        if attempt < timings.ssh_attempts && !timings.ssh_backoff.is_zero() {
            tokio::time::sleep(timings.ssh_backoff).await;
        }
    }
    console::warn("Could not verify SSH access. Cloud-init may still be configuring the guest.");
    false
}
