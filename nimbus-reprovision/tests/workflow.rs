use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use nimbus_common::{
    AttachmentState, BootVolume, BootVolumeAttachment, BootVolumeBackup, Image, Instance, LifecycleState,
    VnicAddress,
};
use nimbus_providers::mock::MockProvider;
use nimbus_reprovision::error::{ReprovisionError, EXIT_FAILURE, EXIT_OK};
use nimbus_reprovision::poll::{PollSettings, Timings};
use nimbus_reprovision::prompt::{Answer, NonInteractivePrompter, Prompter, ScriptedPrompter};
use nimbus_reprovision::reachability::{RemoteExecutor, SshTarget};
use nimbus_reprovision::settings::Paths;
use nimbus_reprovision::txlog::{RunStatus, SessionInfo, TransactionLog};
use nimbus_reprovision::workflow::{await_replacement, Outcome, Reprovisioner};
use nimbus_reprovision::ReprovisionContext;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const INSTANCE: &str = "ocid1.instance.oc1..web";
const COMPARTMENT: &str = "ocid1.compartment.oc1..apps";
const TENANCY: &str = "ocid1.tenancy.oc1..acme";
const IMAGE: &str = "ocid1.image.oc1..noble-arm";
const OLD_BV: &str = "ocid1.bootvolume.oc1..old";
const AD: &str = "Uocm:EU-FRANKFURT-1-AD-1";
const PUBLIC_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBv test@nimbus";

fn instance(state: LifecycleState) -> Instance {
    Instance {
        id: INSTANCE.into(),
        display_name: "web-01".into(),
        shape: "VM.Standard.A1.Flex".into(),
        lifecycle_state: state,
        availability_domain: AD.into(),
        compartment_id: COMPARTMENT.into(),
        region: Some("eu-frankfurt-1".into()),
        time_created: None,
    }
}

fn attachment(id: &str, bv: &str, state: AttachmentState, age_minutes: i64) -> BootVolumeAttachment {
    BootVolumeAttachment {
        id: id.into(),
        instance_id: INSTANCE.into(),
        boot_volume_id: bv.into(),
        lifecycle_state: state,
        time_created: Utc::now() - ChronoDuration::minutes(age_minutes),
    }
}

/// Running ARM instance with one attached 50 GB boot volume and the given storage limit.
fn provider(state: LifecycleState, attachment_state: AttachmentState, limit_gb: u64) -> Arc<MockProvider> {
    Arc::new(fixture(state, attachment_state, limit_gb))
}

fn fixture(state: LifecycleState, attachment_state: AttachmentState, limit_gb: u64) -> MockProvider {
    MockProvider::new()
        .with_region("eu-frankfurt-1", true)
        .with_availability_domain(AD)
        .with_instance(instance(state))
        .with_attachment(attachment("att-old", OLD_BV, attachment_state, 60))
        .with_boot_volume(BootVolume {
            id: OLD_BV.into(),
            display_name: "web-01 (Boot Volume)".into(),
            size_in_gbs: 50,
            lifecycle_state: LifecycleState::Available,
            availability_domain: AD.into(),
        })
        .with_image(Image {
            id: IMAGE.into(),
            display_name: "Canonical-Ubuntu-24.04-aarch64-2025.01.10-0".into(),
            operating_system: "Canonical Ubuntu".into(),
            time_created: Some(Utc::now()),
        })
        .with_vnic(
            INSTANCE,
            VnicAddress {
                public_ip: Some("203.0.113.10".into()),
                private_ip: Some("10.0.0.12".into()),
            },
        )
        .with_storage_limit(limit_gb)
}

/// SSH stand-in: refuses the first `failures` connections, then answers `ok`.
#[derive(Default)]
struct RecordingExecutor {
    failures: AtomicU32,
    calls: AtomicUsize,
}

impl RecordingExecutor {
    fn failing(times: u32) -> Self {
        Self {
            failures: AtomicU32::new(times),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn run(&self, _target: &SshTarget, _command: &str, _timeout: Duration) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("connection refused");
        }
        Ok("ok".to_string())
    }
}

struct Workspace {
    dir: TempDir,
    paths: Paths,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());
        paths.ensure_dirs().unwrap();
        std::fs::write(paths.ssh_dir().join("id_ed25519.pub"), PUBLIC_KEY).unwrap();
        Self { dir, paths }
    }

    fn context(&self) -> ReprovisionContext {
        ReprovisionContext {
            tenancy_id: TENANCY.into(),
            compartment_id: COMPARTMENT.into(),
            instance_id: INSTANCE.into(),
            image_id: IMAGE.into(),
            ssh_public_key_path: Some(self.paths.ssh_dir().join("id_ed25519.pub")),
            ..Default::default()
        }
    }

    fn txlog(&self) -> TransactionLog {
        TransactionLog::begin(self.dir.path().join("run.json"), SessionInfo::current("test")).unwrap()
    }

    fn reprovisioner<P: Prompter>(
        &self,
        provider: &Arc<MockProvider>,
        prompter: P,
        executor: Arc<RecordingExecutor>,
    ) -> Reprovisioner<P> {
        Reprovisioner::new(provider.clone(), prompter, self.paths.clone())
            .with_executor(executor)
            .with_timings(Timings::instant())
            .with_txlog(self.txlog())
    }
}

/// Answers for a run with every id preset: username, size, then the final confirmation.
fn guest_answers() -> Vec<Answer> {
    vec![Answer::Text("ops".into()), Answer::Text("50".into()), Answer::Yes]
}

#[tokio::test]
async fn dry_run_reports_plan_without_mutating() {
    let ws = Workspace::new();
    let mock = provider(LifecycleState::Running, AttachmentState::Attached, 200);
    let mut ctx = ws.context();
    ctx.dry_run = true;
    ctx.non_interactive = true;

    let mut r = ws.reprovisioner(&mock, NonInteractivePrompter, Arc::new(RecordingExecutor::default()));
    let outcome = r.run(&mut ctx).await.unwrap();

    let Outcome::DryRun(plan) = outcome else {
        panic!("expected a dry run, got {outcome:?}");
    };
    assert!(plan.contains(INSTANCE));
    assert!(plan.contains(IMAGE));
    assert!(plan.contains("Architecture: arm"));
    assert!(plan.contains("50 GB"));
    assert!(mock.mutating_calls().is_empty());
    assert!(!ws.paths.instance_config().exists());
    assert_eq!(r.txlog().unwrap().document().status, RunStatus::DryRun);
}

#[tokio::test]
async fn non_interactive_run_replaces_and_verifies() {
    let ws = Workspace::new();
    let mock = provider(LifecycleState::Running, AttachmentState::Attached, 200);
    let executor = Arc::new(RecordingExecutor::failing(1));
    let mut ctx = ws.context();
    ctx.non_interactive = true;

    let mut r = ws.reprovisioner(&mock, NonInteractivePrompter, executor.clone());
    let outcome = r.run(&mut ctx).await.unwrap();

    let Outcome::Completed(result) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    let new_bv = result.new_boot_volume_id.clone().unwrap();
    assert_ne!(new_bv, OLD_BV);
    assert_eq!(result.old_boot_volume_id, OLD_BV);
    assert_eq!(result.admin_username, "admin");
    assert!(!result.old_volume_deleted);

    let requests = mock.replace_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].image_id, IMAGE);
    assert_eq!(requests[0].boot_volume_size_gb, 50);
    assert!(requests[0].preserve_old_volume);
    assert_eq!(requests[0].metadata.ssh_authorized_keys, PUBLIC_KEY);
    assert!(requests[0].metadata.user_data.is_none());

    assert_eq!(mock.instance_state(INSTANCE), Some(LifecycleState::Running));
    assert_eq!(
        mock.mutating_calls(),
        vec!["instance_action", "replace_boot_volume", "instance_action"]
    );
    assert_eq!(executor.call_count(), 2);
    assert!(ws.paths.instance_config().is_file());

    let doc = r.txlog().unwrap().document();
    assert_eq!(doc.status, RunStatus::Success);
    assert_eq!(doc.result.as_ref().unwrap().new_boot_volume_id.as_deref(), Some(new_bv.as_str()));
    assert!(doc.steps.iter().any(|s| s.id == "9-replace"));
}

#[tokio::test]
async fn quota_abort_exits_one_without_changes() {
    let ws = Workspace::new();
    // 60 GB limit, 50 GB used, 50 GB needed.
    let mock = provider(LifecycleState::Running, AttachmentState::Attached, 60);
    let mut answers = guest_answers();
    answers.push(Answer::pick("Abort"));
    let mut r = ws.reprovisioner(&mock, ScriptedPrompter::new(answers), Arc::new(RecordingExecutor::default()));
    let mut ctx = ws.context();

    let err = r.run(&mut ctx).await.unwrap_err();
    match &err {
        ReprovisionError::QuotaAborted {
            needed_gb,
            available_gb,
            remediation,
        } => {
            assert_eq!(*needed_gb, 50);
            assert_eq!(*available_gb, 10);
            assert!(!remediation.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.exit_code(), EXIT_FAILURE);
    assert!(mock.mutating_calls().is_empty());
    assert_eq!(r.txlog().unwrap().document().status, RunStatus::Failed);
}

#[tokio::test]
async fn forgoing_the_old_volume_satisfies_quota() {
    let ws = Workspace::new();
    let mock = provider(LifecycleState::Running, AttachmentState::Attached, 60);
    let mut answers = guest_answers();
    answers.push(Answer::pick("Do not preserve"));
    let prompter = ScriptedPrompter::new(answers);
    let mut r = ws.reprovisioner(&mock, prompter, Arc::new(RecordingExecutor::default()));
    let mut ctx = ws.context();

    let outcome = r.run(&mut ctx).await.unwrap();
    let Outcome::Completed(result) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert!(result.old_volume_deleted);
    assert_eq!(result.admin_username, "ops");
    assert!(!mock.replace_requests()[0].preserve_old_volume);
    assert!(mock.boot_volumes().iter().all(|v| v.id != OLD_BV));
    assert_eq!(r.prompter().remaining(), 0);
}

#[tokio::test]
async fn deleting_a_backup_frees_enough_storage() {
    let ws = Workspace::new();
    // 100 GB limit, 50 GB boot volume plus a 15 GB backup: 35 GB available, 50 GB needed.
    let mock = Arc::new(
        fixture(LifecycleState::Running, AttachmentState::Attached, 100).with_backup(BootVolumeBackup {
            id: "ocid1.bootvolumebackup.oc1..weekly".into(),
            display_name: "web-01 weekly".into(),
            size_in_gbs: 15,
        }),
    );
    let mut answers = guest_answers();
    answers.extend([Answer::pick("Delete a boot volume backup"), Answer::Index(0), Answer::Yes]);
    let mut r = ws.reprovisioner(&mock, ScriptedPrompter::new(answers), Arc::new(RecordingExecutor::default()));
    let mut ctx = ws.context();

    let outcome = r.run(&mut ctx).await.unwrap();
    let Outcome::Completed(result) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert!(!result.old_volume_deleted);
    assert!(mock.backups().is_empty());
    assert!(mock.replace_requests()[0].preserve_old_volume);
    assert_eq!(
        mock.mutating_calls(),
        vec![
            "delete_boot_volume_backup",
            "instance_action",
            "replace_boot_volume",
            "instance_action"
        ]
    );
    assert_eq!(r.prompter().remaining(), 0);
    assert_eq!(r.txlog().unwrap().document().status, RunStatus::Success);
}

#[tokio::test]
async fn quota_rejection_from_replace_reopens_the_menu_once() {
    let ws = Workspace::new();
    let mock = provider(LifecycleState::Running, AttachmentState::Attached, 200);
    mock.fail_next(
        "replace_boot_volume",
        r#"ServiceError: {"code": "LimitExceeded", "message": "total storage limit reached", "status": 400}"#,
    );
    let mut answers = guest_answers();
    answers.push(Answer::pick("Do not preserve"));
    let mut r = ws.reprovisioner(&mock, ScriptedPrompter::new(answers), Arc::new(RecordingExecutor::default()));
    let mut ctx = ws.context();

    let outcome = r.run(&mut ctx).await.unwrap();
    assert!(matches!(outcome, Outcome::Completed(_)));
    assert_eq!(mock.replace_requests().len(), 1);
    assert!(!mock.replace_requests()[0].preserve_old_volume);
    let replace_calls = mock.calls().iter().filter(|c| *c == "replace_boot_volume").count();
    assert_eq!(replace_calls, 2);
}

#[tokio::test]
async fn declining_the_plan_is_a_clean_abort() {
    let ws = Workspace::new();
    let mock = provider(LifecycleState::Running, AttachmentState::Attached, 200);
    let answers = vec![Answer::Text("ops".into()), Answer::Text("50".into()), Answer::No];
    let mut r = ws.reprovisioner(&mock, ScriptedPrompter::new(answers), Arc::new(RecordingExecutor::default()));
    let mut ctx = ws.context();

    let err = r.run(&mut ctx).await.unwrap_err();
    assert!(err.is_user_abort());
    assert_eq!(err.exit_code(), EXIT_OK);
    assert!(mock.mutating_calls().is_empty());
    assert_eq!(r.txlog().unwrap().document().status, RunStatus::Aborted);
    assert!(!r.prompter().prompts.iter().any(|p| p.contains("Recover")));
}

#[tokio::test]
async fn interrupted_run_is_offered_recovery_first() {
    let ws = Workspace::new();
    let mock = provider(LifecycleState::Stopped, AttachmentState::Detached, 200);
    let prompter = ScriptedPrompter::new([Answer::pick("abandon")]);
    let mut r = ws.reprovisioner(&mock, prompter, Arc::new(RecordingExecutor::default()));
    let mut ctx = ws.context();

    let outcome = r.run(&mut ctx).await.unwrap();
    assert_eq!(outcome, Outcome::RestoredPrevious);
    assert_eq!(r.prompter().prompts, vec!["Recover the interrupted run".to_string()]);
    assert_eq!(mock.mutating_calls(), vec!["attach_boot_volume", "instance_action"]);
    assert_eq!(mock.instance_state(INSTANCE), Some(LifecycleState::Running));
    assert!(mock
        .attachments()
        .iter()
        .any(|a| a.boot_volume_id == OLD_BV && a.lifecycle_state == AttachmentState::Attached));
    assert!(mock.replace_requests().is_empty());
}

#[tokio::test]
async fn recovery_can_continue_into_a_replacement() {
    let ws = Workspace::new();
    let mock = provider(LifecycleState::Stopped, AttachmentState::Detached, 200);
    let mut answers = vec![Answer::pick("continue reprovisioning")];
    answers.extend(guest_answers());
    let mut r = ws.reprovisioner(&mock, ScriptedPrompter::new(answers), Arc::new(RecordingExecutor::default()));
    let mut ctx = ws.context();

    let outcome = r.run(&mut ctx).await.unwrap();
    let Outcome::Completed(result) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(result.old_boot_volume_id, OLD_BV);
    // Re-attach, replace, start. The instance was already stopped.
    assert_eq!(
        mock.mutating_calls(),
        vec!["attach_boot_volume", "replace_boot_volume", "instance_action"]
    );
}

#[tokio::test]
async fn replacement_waits_through_empty_listings() {
    let mock = provider(LifecycleState::Stopped, AttachmentState::Attached, 200);
    mock.script_attachments(vec![
        vec![],
        vec![attachment("att-old", OLD_BV, AttachmentState::Detaching, 60)],
        vec![attachment("att-old", OLD_BV, AttachmentState::Attached, 60)],
        vec![
            attachment("att-old", OLD_BV, AttachmentState::Detached, 60),
            attachment("att-new", "ocid1.bootvolume.oc1..new", AttachmentState::Attached, 0),
        ],
    ]);
    let ctx = ReprovisionContext {
        instance_id: INSTANCE.into(),
        compartment_id: COMPARTMENT.into(),
        availability_domain: AD.into(),
        ..Default::default()
    };

    let settings = PollSettings::new(Duration::ZERO, Duration::from_millis(20));
    let att = await_replacement(mock.as_ref(), &ctx, OLD_BV, settings).await.unwrap();
    assert_eq!(att.id, "att-new");
    assert_eq!(att.boot_volume_id, "ocid1.bootvolume.oc1..new");
    let polls = mock
        .calls()
        .iter()
        .filter(|c| *c == "list_boot_volume_attachments")
        .count();
    assert_eq!(polls, 4);
}

#[tokio::test]
async fn replacement_times_out_when_the_old_volume_stays() {
    let mock = provider(LifecycleState::Stopped, AttachmentState::Attached, 200);
    let ctx = ReprovisionContext {
        instance_id: INSTANCE.into(),
        availability_domain: AD.into(),
        ..Default::default()
    };
    let settings = PollSettings::new(Duration::ZERO, Duration::from_millis(3));
    let err = await_replacement(mock.as_ref(), &ctx, OLD_BV, settings).await.unwrap_err();
    assert!(matches!(err, ReprovisionError::Timeout { .. }));
}
