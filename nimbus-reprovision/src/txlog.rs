//! JSON transaction log, one document per run.
//!
//! Each write serializes the whole document over the file. Once finalized the
//! log refuses further writes.

use crate::error::ReprovisionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const OPERATION: &str = "reprovision-vm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Success,
    Failed,
    Skipped,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Aborted,
    DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session: String,
    pub user: String,
    pub host: String,
    pub version: String,
}

impl SessionInfo {
    pub fn current(session: &str) -> Self {
        let env_or = |key: &str, fallback: &str| std::env::var(key).unwrap_or_else(|_| fallback.to_string());
        Self {
            session: session.to_string(),
            user: env_or("USER", "unknown"),
            host: env_or("HOSTNAME", "localhost"),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    pub description: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub instance_id: String,
    pub image_id: String,
    pub new_boot_volume_id: Option<String>,
    pub old_boot_volume_id: String,
    pub admin_username: String,
    pub old_volume_deleted: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogDocument {
    pub operation: String,
    pub session: SessionInfo,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
    pub result: Option<RunResult>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

pub struct TransactionLog {
    path: PathBuf,
    doc: LogDocument,
    finalized: bool,
}

impl TransactionLog {
    pub fn begin(path: impl Into<PathBuf>, session: SessionInfo) -> Result<Self, ReprovisionError> {
        let log = Self {
            path: path.into(),
            doc: LogDocument {
                operation: OPERATION.to_string(),
                session,
                started_at: Utc::now(),
                status: RunStatus::Running,
                steps: vec![],
                result: None,
                ended_at: None,
                message: None,
            },
            finalized: false,
        };
        if let Some(parent) = log.path.parent() {
            fs::create_dir_all(parent)?;
        }
        log.write()?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &LogDocument {
        &self.doc
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn guard(&self) -> Result<(), ReprovisionError> {
        if self.finalized {
            return Err(ReprovisionError::Precondition(format!(
                "transaction log {} is already finalized",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn write(&self) -> Result<(), ReprovisionError> {
        let body = serde_json::to_string_pretty(&self.doc)?;
        fs::write(&self.path, body)?;
        Ok(())
    }

    /// Start a step. A step still running is closed as successful first.
    pub fn step(&mut self, id: &str, description: &str) -> Result<(), ReprovisionError> {
        self.guard()?;
        let now = Utc::now();
        if let Some(open) = self.doc.steps.last_mut().filter(|s| s.status == StepStatus::Running) {
            open.status = StepStatus::Success;
            open.ended_at = Some(now);
        }
        self.doc.steps.push(StepRecord {
            id: id.to_string(),
            description: description.to_string(),
            status: StepStatus::Running,
            started_at: now,
            ended_at: None,
            message: None,
        });
        tracing::debug!("txlog step {} started", id);
        self.write()
    }

    /// Close the most recently started step.
    pub fn step_update(&mut self, status: StepStatus, message: Option<&str>) -> Result<(), ReprovisionError> {
        self.guard()?;
        let Some(last) = self.doc.steps.last_mut() else {
            return Err(ReprovisionError::Precondition("no step has been started".to_string()));
        };
        last.status = status;
        if status != StepStatus::Running {
            last.ended_at = Some(Utc::now());
        }
        last.message = message.map(str::to_string);
        self.write()
    }

    pub fn finalize(
        &mut self,
        status: RunStatus,
        message: Option<&str>,
        result: Option<RunResult>,
    ) -> Result<(), ReprovisionError> {
        self.guard()?;
        let now = Utc::now();
        if let Some(open) = self.doc.steps.last_mut().filter(|s| s.status == StepStatus::Running) {
            open.status = if status == RunStatus::Failed {
                StepStatus::Failed
            } else {
                StepStatus::Success
            };
            open.ended_at = Some(now);
        }
        self.doc.status = status;
        self.doc.message = message.map(str::to_string);
        self.doc.result = result;
        self.doc.ended_at = Some(now);
        self.write()?;
        self.finalized = true;
        tracing::info!("transaction log finalized as {:?}: {}", status, self.path.display());
        Ok(())
    }

    /// Finalize a run that stopped before the workflow took over.
    pub fn abandon(&mut self, err: &ReprovisionError) -> Result<(), ReprovisionError> {
        let msg = err.to_string();
        if !err.is_user_abort() {
            return self.finalize(RunStatus::Failed, Some(&msg), None);
        }
        if !self.doc.steps.is_empty() {
            self.step_update(StepStatus::Skipped, Some(&msg))?;
        }
        self.finalize(RunStatus::Aborted, Some(&msg), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &Path) -> TransactionLog {
        TransactionLog::begin(dir.join("logs/reprovision-vm-test.json"), SessionInfo::current("test")).unwrap()
    }

    fn reload(log: &TransactionLog) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(log.path()).unwrap()).unwrap()
    }

    #[test]
    fn begin_writes_a_running_document() {
        let dir = tempfile::tempdir().unwrap();
        let log = open(dir.path());
        let doc = reload(&log);
        assert_eq!(doc["operation"], OPERATION);
        assert_eq!(doc["status"], "running");
        assert_eq!(doc["steps"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn steps_are_closed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open(dir.path());
        log.step("1-oci-auth", "Authenticate").unwrap();
        log.step("2-instance", "Select instance").unwrap();
        log.step_update(StepStatus::Warning, Some("arch forced")).unwrap();
        let doc = reload(&log);
        assert_eq!(doc["steps"][0]["status"], "success");
        assert!(doc["steps"][0]["ended_at"].is_string());
        assert_eq!(doc["steps"][1]["status"], "warning");
        assert_eq!(doc["steps"][1]["message"], "arch forced");
    }

    #[test]
    fn credential_failure_is_recorded_on_the_first_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open(dir.path());
        log.step("0-credentials", "Resolve credentials").unwrap();
        log.abandon(&ReprovisionError::Auth("key_file not found".into())).unwrap();
        let doc = reload(&log);
        assert_eq!(doc["status"], "failed");
        assert_eq!(doc["steps"][0]["id"], "0-credentials");
        assert_eq!(doc["steps"][0]["status"], "failed");
        assert!(doc["message"].as_str().unwrap().contains("key_file not found"));
        assert!(log.step("1-oci-auth", "Check API access").is_err());
    }

    #[test]
    fn declined_profile_choice_is_an_abort() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open(dir.path());
        log.step("0-credentials", "Resolve credentials").unwrap();
        log.abandon(&ReprovisionError::UserAbort("no profile chosen".into())).unwrap();
        let doc = reload(&log);
        assert_eq!(doc["status"], "aborted");
        assert_eq!(doc["steps"][0]["status"], "skipped");
    }

    #[test]
    fn finalize_records_result_and_locks_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open(dir.path());
        log.step("8-verify", "Verify").unwrap();
        let result = RunResult {
            instance_id: "ocid1.instance.x".into(),
            image_id: "ocid1.image.y".into(),
            new_boot_volume_id: Some("ocid1.bootvolume.new".into()),
            old_boot_volume_id: "ocid1.bootvolume.old".into(),
            admin_username: "admin".into(),
            old_volume_deleted: false,
            dry_run: false,
        };
        log.finalize(RunStatus::Success, Some("done"), Some(result)).unwrap();
        let doc = reload(&log);
        assert_eq!(doc["status"], "success");
        assert_eq!(doc["result"]["new_boot_volume_id"], "ocid1.bootvolume.new");
        assert_eq!(doc["steps"][0]["status"], "success");

        assert!(log.step("9-summary", "late").is_err());
        assert!(log.finalize(RunStatus::Failed, None, None).is_err());
        assert_eq!(reload(&log)["status"], "success");
    }

    #[test]
    fn failed_run_marks_the_open_step_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open(dir.path());
        log.step("6-await", "Await replacement").unwrap();
        log.finalize(RunStatus::Failed, Some("timed out"), None).unwrap();
        let doc = reload(&log);
        assert_eq!(doc["steps"][0]["status"], "failed");
        assert_eq!(doc["message"], "timed out");
    }

    #[test]
    fn update_without_step_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open(dir.path());
        assert!(log.step_update(StepStatus::Success, None).is_err());
    }
}
