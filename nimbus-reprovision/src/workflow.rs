//! The reprovisioning run.
//!
//! Order: API check, instance, recovery check, image and guest choices, plan
//! and confirmation, quota, metadata, stop, replace, await the new volume,
//! start, SSH check, summary. Every fatal error stops the run; only the SSH
//! check degrades to a warning.

use crate::cloud_init;
use crate::console;
use crate::context::ReprovisionContext;
use crate::error::ReprovisionError;
use crate::inspector;
use crate::instance_config;
use crate::poll::{self, PollSettings, Timings};
use crate::profiles;
use crate::prompt::Prompter;
use crate::quota;
use crate::reachability::{self, RemoteExecutor, SshCommand, SshTarget};
use crate::selection;
use crate::settings::Paths;
use crate::txlog::{RunResult, RunStatus, StepStatus, TransactionLog};
use nimbus_common::{AttachmentState, BootVolumeAttachment, LifecycleState};
use nimbus_providers::{kind_of, ApiErrorKind, CloudProvider, InstanceAction, InstanceMetadata, ReplaceBootVolumeRequest};
use std::sync::Arc;

pub type Step = (&'static str, &'static str);

/// Opened by the binary before the workflow takes over.
pub const STEP_CREDENTIALS: Step = ("0-credentials", "Resolve credentials");

const STEP_AUTH: Step = ("1-oci-auth", "Check API access");
const STEP_INSTANCE: Step = ("2-instance", "Select and inspect the instance");
const STEP_RECOVERY: Step = ("3-recovery-check", "Look for an interrupted run");
const STEP_IMAGE: Step = ("4-image", "Select the image");
const STEP_GUEST: Step = ("5-guest-config", "SSH key, admin user and cloud-init");
const STEP_QUOTA: Step = ("6-quota", "Check block storage quota");
const STEP_METADATA: Step = ("7-metadata", "Prepare instance metadata");
const STEP_STOP: Step = ("8-stop", "Stop the instance");
const STEP_REPLACE: Step = ("9-replace", "Replace the boot volume");
const STEP_START: Step = ("10-start", "Start the instance");
const STEP_VERIFY: Step = ("11-verify", "Verify SSH access");
const STEP_SUMMARY: Step = ("12-summary", "Summary");

const RESTORE_AND_START: &str = "Re-attach the previous boot volume and start the instance (abandon this run)";
const RESTORE_AND_CONTINUE: &str = "Re-attach the previous boot volume and continue reprovisioning";
const RECOVERY_ABORT: &str = "Abort";
const RECOVERY_ATTACHMENT_NAME: &str = "nimbus-recovery";

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(RunResult),
    /// Plan text that was printed; nothing was changed.
    DryRun(String),
    /// The operator chose to restore the previous boot volume instead of reprovisioning.
    RestoredPrevious,
}

pub struct Reprovisioner<P: Prompter = Box<dyn Prompter>> {
    provider: Arc<dyn CloudProvider>,
    prompter: P,
    executor: Arc<dyn RemoteExecutor>,
    timings: Timings,
    paths: Paths,
    txlog: Option<TransactionLog>,
}

impl<P: Prompter> Reprovisioner<P> {
    pub fn new(provider: Arc<dyn CloudProvider>, prompter: P, paths: Paths) -> Self {
        Self {
            provider,
            prompter,
            executor: Arc::new(SshCommand::new()),
            timings: Timings::default(),
            paths,
            txlog: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn RemoteExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_txlog(mut self, txlog: TransactionLog) -> Self {
        self.txlog = Some(txlog);
        self
    }

    pub fn prompter(&self) -> &P {
        &self.prompter
    }

    pub fn txlog(&self) -> Option<&TransactionLog> {
        self.txlog.as_ref()
    }

    /// Execute the run and finalize the transaction log with its outcome.
    pub async fn run(&mut self, ctx: &mut ReprovisionContext) -> Result<Outcome, ReprovisionError> {
        let result = self.execute(ctx).await;
        match &result {
            Ok(Outcome::Completed(r)) => self.finish(RunStatus::Success, "reprovisioning completed", Some(r.clone())),
            Ok(Outcome::DryRun(_)) => {
                let r = run_result(ctx);
                self.finish(RunStatus::DryRun, "dry run, no changes made", Some(r))
            }
            Ok(Outcome::RestoredPrevious) => self.finish(RunStatus::Aborted, "previous boot volume restored", None),
            Err(e) if e.is_user_abort() => {
                let msg = e.to_string();
                if let Some(log) = self.txlog.as_mut() {
                    let _ = log.step_update(StepStatus::Skipped, Some(&msg));
                }
                self.finish(RunStatus::Aborted, &msg, None)
            }
            Err(e) => {
                let msg = e.to_string();
                self.finish(RunStatus::Failed, &msg, Some(run_result(ctx)))
            }
        }
        result
    }

    fn finish(&mut self, status: RunStatus, message: &str, result: Option<RunResult>) {
        if let Some(log) = self.txlog.as_mut() {
            if let Err(e) = log.finalize(status, Some(message), result) {
                tracing::warn!("could not finalize transaction log: {}", e);
            }
        }
    }

    fn begin_step(&mut self, step: Step) -> Result<(), ReprovisionError> {
        console::header(step.1);
        match self.txlog.as_mut() {
            Some(log) => log.step(step.0, step.1),
            None => Ok(()),
        }
    }

    fn end_step(&mut self, status: StepStatus, message: &str) -> Result<(), ReprovisionError> {
        match self.txlog.as_mut() {
            Some(log) => log.step_update(status, Some(message)),
            None => Ok(()),
        }
    }

    async fn execute(&mut self, ctx: &mut ReprovisionContext) -> Result<Outcome, ReprovisionError> {
        let provider = Arc::clone(&self.provider);
        let provider = provider.as_ref();

        self.begin_step(STEP_AUTH)?;
        if !ctx.tenancy_id.is_empty() {
            let home = profiles::test_connectivity(provider, &ctx.tenancy_id).await?;
            if ctx.region.is_empty() {
                ctx.region = home;
            }
        }
        profiles::select_compartment(provider, &mut self.prompter, ctx).await?;

        self.begin_step(STEP_INSTANCE)?;
        selection::select_instance(provider, &mut self.prompter, ctx).await?;
        inspector::inspect_instance(provider, ctx).await?;
        console::info(&format!(
            "{} ({}) is {}, shape {} ({})",
            ctx.instance_name,
            ctx.instance_id,
            ctx.lifecycle_state.unwrap_or(LifecycleState::Unknown),
            ctx.shape,
            ctx.arch_label()
        ));

        self.begin_step(STEP_RECOVERY)?;
        if let Some(outcome) = self.recovery_check(provider, ctx).await? {
            return Ok(outcome);
        }
        let size_preset = ctx.boot_volume_size_gb.is_some();
        inspector::discover_boot_volume(provider, ctx).await?;

        self.begin_step(STEP_IMAGE)?;
        selection::select_image(provider, &mut self.prompter, ctx).await?;

        self.begin_step(STEP_GUEST)?;
        selection::select_ssh_key(&mut self.prompter, ctx, &self.paths).await?;
        selection::select_username(&mut self.prompter, ctx)?;
        selection::select_cloud_init(&mut self.prompter, ctx, &self.paths)?;
        if ctx.cloud_init_template.is_some() && !ctx.dry_run {
            selection::select_password(&mut self.prompter, ctx)?;
        }
        selection::select_size(&mut self.prompter, ctx, size_preset)?;
        if !ctx.dry_run {
            instance_config::save(&self.paths.instance_config(), ctx)?;
        }

        self.begin_step(STEP_QUOTA)?;
        if ctx.skip_backup {
            ctx.delete_old_volume = true;
        }
        let report = quota::measure(provider, ctx).await?;
        ctx.quota = report.as_ref().map(|r| r.snapshot);

        let rows = plan_rows(ctx);
        if ctx.dry_run {
            console::panel("Planned changes (dry run)", &rows);
            if let Some(q) = ctx.quota.filter(|q| !q.is_sufficient(0)) {
                console::warn(&format!(
                    "Storage is short by {} GB: the real run will ask how to free it",
                    q.needed_gb as i64 - q.available_gb()
                ));
            }
            console::success("Dry run complete, nothing was changed");
            return Ok(Outcome::DryRun(render_rows(&rows)));
        }
        console::panel("Planned changes", &rows);
        if !self
            .prompter
            .confirm("Proceed with reprovisioning?", ctx.non_interactive)?
        {
            return Err(ReprovisionError::UserAbort("reprovisioning declined".to_string()));
        }
        match report {
            Some(report) => {
                let negotiation = quota::resolve(provider, &mut self.prompter, ctx, report, false).await?;
                ctx.delete_old_volume = negotiation.forgo_applied;
            }
            None => console::info("No storage limit reported for this tenancy, skipping the quota check"),
        }

        self.begin_step(STEP_METADATA)?;
        cloud_init::prepare(ctx, &self.paths)?;
        let metadata = cloud_init::build_metadata(ctx)?;
        console::success(match metadata.user_data {
            Some(_) => "Metadata ready (SSH key and cloud-init)",
            None => "Metadata ready (SSH key only)",
        });

        self.begin_step(STEP_STOP)?;
        if !self.stop_instance(provider, ctx).await? {
            self.end_step(StepStatus::Skipped, "instance already stopped")?;
        }

        self.begin_step(STEP_REPLACE)?;
        let old_boot_volume_id = ctx.boot_volume_id.clone();
        self.replace(provider, ctx, &metadata).await?;
        console::step("Waiting for the new boot volume to be attached");
        let attachment = await_replacement(provider, ctx, &old_boot_volume_id, self.timings.replace).await?;
        console::success(&format!("New boot volume attached: {}", attachment.boot_volume_id));
        ctx.new_boot_volume_id = Some(attachment.boot_volume_id.clone());

        self.begin_step(STEP_START)?;
        if !self.start_instance(provider, ctx).await? {
            self.end_step(StepStatus::Skipped, "instance already running")?;
        }

        self.begin_step(STEP_VERIFY)?;
        if !self.verify(provider, ctx).await? {
            self.end_step(StepStatus::Warning, "SSH access not verified")?;
        }

        self.begin_step(STEP_SUMMARY)?;
        print_summary(ctx, &attachment);
        Ok(Outcome::Completed(run_result(ctx)))
    }

    /// STOPPED with nothing attached means an earlier run stopped between detach and attach.
    async fn recovery_check(
        &mut self,
        provider: &dyn CloudProvider,
        ctx: &mut ReprovisionContext,
    ) -> Result<Option<Outcome>, ReprovisionError> {
        let attachments = inspector::list_attachments(provider, ctx)
            .await
            .map_err(ReprovisionError::from_provider)?;
        let stopped = ctx.lifecycle_state == Some(LifecycleState::Stopped);
        if !stopped || inspector::attached_count(&attachments) > 0 {
            self.end_step(StepStatus::Skipped, "no interrupted run detected")?;
            return Ok(None);
        }

        let (previous, _) = inspector::select_boot_volume(&attachments)?;
        let previous_id = previous.boot_volume_id.clone();
        console::warn("The instance is STOPPED with no boot volume attached: a previous run was interrupted");
        console::detail(&format!("Most recent boot volume: {}", previous_id));
        if ctx.dry_run {
            console::info("Dry run: a real run would offer to re-attach it first");
            return Ok(None);
        }

        let items: Vec<String> = [RESTORE_AND_START, RESTORE_AND_CONTINUE, RECOVERY_ABORT]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let choice = self
            .prompter
            .choose("Recover the interrupted run", &items, Some(1))?;
        if choice == 2 {
            return Err(ReprovisionError::UserAbort("recovery declined".to_string()));
        }

        self.reattach(provider, ctx, &previous_id).await?;
        if choice == 0 {
            self.start_instance(provider, ctx).await?;
            console::success("Previous boot volume restored and instance started");
            return Ok(Some(Outcome::RestoredPrevious));
        }
        console::success("Previous boot volume re-attached, continuing");
        Ok(None)
    }

    async fn reattach(
        &self,
        provider: &dyn CloudProvider,
        ctx: &ReprovisionContext,
        boot_volume_id: &str,
    ) -> Result<(), ReprovisionError> {
        console::step(&format!("Re-attaching {}", boot_volume_id));
        provider
            .attach_boot_volume(&ctx.instance_id, boot_volume_id, RECOVERY_ATTACHMENT_NAME)
            .await
            .map_err(ReprovisionError::from_provider)?;
        poll::await_state(
            "boot volume to re-attach",
            self.timings.reattach,
            || provider.list_boot_volume_attachments(&ctx.availability_domain, &ctx.compartment_id, &ctx.instance_id),
            |atts| {
                atts.iter()
                    .any(|a| a.boot_volume_id == boot_volume_id && a.lifecycle_state == AttachmentState::Attached)
            },
        )
        .await?;
        Ok(())
    }

    /// Returns false when nothing had to be done.
    async fn stop_instance(
        &self,
        provider: &dyn CloudProvider,
        ctx: &mut ReprovisionContext,
    ) -> Result<bool, ReprovisionError> {
        let instance = provider
            .get_instance(&ctx.instance_id)
            .await
            .map_err(ReprovisionError::from_provider)?;
        match instance.lifecycle_state {
            LifecycleState::Stopped => {
                console::info("Instance is already stopped");
                ctx.lifecycle_state = Some(LifecycleState::Stopped);
                return Ok(false);
            }
            LifecycleState::Running => {
                console::step("Stopping the instance (graceful shutdown)");
                provider
                    .instance_action(&ctx.instance_id, InstanceAction::SoftStop)
                    .await
                    .map_err(ReprovisionError::from_provider)?;
            }
            LifecycleState::Stopping => console::info("Instance is already stopping"),
            other => {
                return Err(ReprovisionError::Precondition(format!(
                    "cannot stop the instance while it is {}",
                    other
                )))
            }
        }
        let id = ctx.instance_id.clone();
        poll::await_state(
            "instance to stop",
            self.timings.stop,
            || provider.get_instance(&id),
            |i| i.lifecycle_state == LifecycleState::Stopped,
        )
        .await?;
        ctx.lifecycle_state = Some(LifecycleState::Stopped);
        console::success("Instance stopped");
        Ok(true)
    }

    /// The replace call is retried once after a quota rejection and a second negotiation.
    async fn replace(
        &mut self,
        provider: &dyn CloudProvider,
        ctx: &mut ReprovisionContext,
        metadata: &InstanceMetadata,
    ) -> Result<(), ReprovisionError> {
        let mut renegotiated = false;
        loop {
            let request = ReplaceBootVolumeRequest {
                image_id: ctx.image_id.clone(),
                boot_volume_size_gb: ctx.requested_size_gb(),
                preserve_old_volume: !ctx.delete_old_volume,
                metadata: metadata.clone(),
            };
            console::step(&format!(
                "Replacing the boot volume with {} ({} GB, old volume {})",
                ctx.image_name,
                request.boot_volume_size_gb,
                if request.preserve_old_volume { "kept" } else { "deleted" }
            ));
            match provider.replace_boot_volume(&ctx.instance_id, &request).await {
                Ok(()) => {
                    console::success("Replacement accepted");
                    return Ok(());
                }
                Err(e) if !renegotiated && matches!(kind_of(&e), ApiErrorKind::Quota) => {
                    renegotiated = true;
                    console::warn(&format!("Replacement rejected for storage quota: {:#}", e));
                    quota::negotiate(provider, &mut self.prompter, ctx, true).await?;
                }
                Err(e) => return Err(ReprovisionError::from_provider(e)),
            }
        }
    }

    /// Returns false when the instance was already running.
    async fn start_instance(
        &self,
        provider: &dyn CloudProvider,
        ctx: &mut ReprovisionContext,
    ) -> Result<bool, ReprovisionError> {
        let instance = provider
            .get_instance(&ctx.instance_id)
            .await
            .map_err(ReprovisionError::from_provider)?;
        match instance.lifecycle_state {
            LifecycleState::Running => {
                console::info("Instance is already running");
                ctx.lifecycle_state = Some(LifecycleState::Running);
                return Ok(false);
            }
            LifecycleState::Starting => console::info("Instance is already starting"),
            _ => {
                console::step("Starting the instance");
                if let Err(e) = provider.instance_action(&ctx.instance_id, InstanceAction::Start).await {
                    if !matches!(kind_of(&e), ApiErrorKind::Conflict) {
                        return Err(ReprovisionError::from_provider(e));
                    }
                    console::warn("Start rejected while the instance is busy, retrying once");
                    if !self.timings.start.interval.is_zero() {
                        tokio::time::sleep(self.timings.start.interval).await;
                    }
                    provider
                        .instance_action(&ctx.instance_id, InstanceAction::Start)
                        .await
                        .map_err(ReprovisionError::from_provider)?;
                }
            }
        }
        let id = ctx.instance_id.clone();
        poll::await_state(
            "instance to start",
            self.timings.start,
            || provider.get_instance(&id),
            |i| i.lifecycle_state == LifecycleState::Running,
        )
        .await?;
        ctx.lifecycle_state = Some(LifecycleState::Running);
        console::success("Instance running");
        Ok(true)
    }

    async fn verify(&self, provider: &dyn CloudProvider, ctx: &mut ReprovisionContext) -> Result<bool, ReprovisionError> {
        let ip = match inspector::resolve_public_ip(provider, ctx).await {
            Ok(ip) => ip,
            Err(e @ ReprovisionError::Auth(_)) => return Err(e),
            Err(e) => {
                console::warn(&format!("Could not resolve the public IP: {}", e));
                None
            }
        };
        let Some(host) = ip else {
            console::warn("The instance has no public IP, skipping the SSH check");
            return Ok(false);
        };
        let target = SshTarget {
            host,
            user: ctx.admin_username().to_string(),
            identity: ctx.ssh_private_key_path.clone(),
        };
        Ok(reachability::verify(self.executor.as_ref(), &target, &self.timings).await)
    }
}

/// Poll until exactly one ATTACHED boot volume differs from `old_boot_volume_id`.
/// Empty or unchanged listings during the swap are not success.
pub async fn await_replacement(
    provider: &dyn CloudProvider,
    ctx: &ReprovisionContext,
    old_boot_volume_id: &str,
    settings: PollSettings,
) -> Result<BootVolumeAttachment, ReprovisionError> {
    let attachments = poll::await_state(
        "new boot volume attachment",
        settings,
        || provider.list_boot_volume_attachments(&ctx.availability_domain, &ctx.compartment_id, &ctx.instance_id),
        |atts| inspector::new_attachment(atts, old_boot_volume_id).is_some(),
    )
    .await?;
    inspector::new_attachment(&attachments, old_boot_volume_id)
        .cloned()
        .ok_or_else(|| ReprovisionError::Precondition("new boot volume attachment disappeared".to_string()))
}

pub fn run_result(ctx: &ReprovisionContext) -> RunResult {
    RunResult {
        instance_id: ctx.instance_id.clone(),
        image_id: ctx.image_id.clone(),
        new_boot_volume_id: ctx.new_boot_volume_id.clone(),
        old_boot_volume_id: ctx.boot_volume_id.clone(),
        admin_username: ctx.admin_username().to_string(),
        old_volume_deleted: ctx.delete_old_volume && ctx.new_boot_volume_id.is_some(),
        dry_run: ctx.dry_run,
    }
}

pub fn plan_rows(ctx: &ReprovisionContext) -> Vec<(String, String)> {
    let row = |k: &str, v: String| (k.to_string(), v);
    let path_or = |p: &Option<std::path::PathBuf>, fallback: &str| {
        p.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| fallback.to_string())
    };
    let mut rows = vec![
        row("Instance", format!("{} ({})", ctx.instance_name, ctx.instance_id)),
        row("Shape", ctx.shape.clone()),
        row(
            "Architecture",
            if ctx.arch_forced {
                format!("{} (forced)", ctx.arch_label())
            } else {
                ctx.arch_label().to_string()
            },
        ),
        row("Availability domain", ctx.availability_domain.clone()),
        row("Current boot volume", ctx.boot_volume_id.clone()),
        row("Image", format!("{} ({})", ctx.image_name, ctx.image_id)),
        row("Boot volume size", format!("{} GB", ctx.requested_size_gb())),
        row("Admin user", ctx.admin_username().to_string()),
        row("SSH key", path_or(&ctx.ssh_public_key_path, "none")),
        row("Cloud-init", path_or(&ctx.cloud_init_template, "none (SSH key only)")),
    ];
    if ctx.install_cloudpanel {
        rows.push(row(
            "CloudPanel",
            format!("{} / {}", ctx.cloudpanel_admin_email, ctx.template_vars()["CLOUDPANEL_DB_ENGINE"]),
        ));
    }
    rows.push(row(
        "Old boot volume",
        if ctx.delete_old_volume { "deleted" } else { "preserved" }.to_string(),
    ));
    rows.push(row(
        "Storage",
        match ctx.quota {
            Some(q) => format!(
                "{} GB available of {} GB, {} GB needed",
                q.available_gb(),
                q.limit_gb,
                q.needed_gb
            ),
            None => "limit not reported".to_string(),
        },
    ));
    rows
}

pub fn render_rows(rows: &[(String, String)]) -> String {
    rows.iter().map(|(k, v)| format!("{}: {}\n", k, v)).collect()
}

/// Manual steps to put the previous boot volume back.
pub fn rollback_commands(ctx: &ReprovisionContext, new_attachment_id: &str) -> Vec<String> {
    vec![
        format!(
            "oci compute instance action --instance-id {} --action SOFTSTOP --wait-for-state STOPPED",
            ctx.instance_id
        ),
        format!(
            "oci compute boot-volume-attachment detach --boot-volume-attachment-id {} --force --wait-for-state DETACHED",
            new_attachment_id
        ),
        format!(
            "oci compute boot-volume-attachment attach --instance-id {} --boot-volume-id {} --wait-for-state ATTACHED",
            ctx.instance_id, ctx.boot_volume_id
        ),
        format!("oci compute instance action --instance-id {} --action START", ctx.instance_id),
    ]
}

fn print_summary(ctx: &ReprovisionContext, attachment: &BootVolumeAttachment) {
    let mut rows = vec![
        ("Instance".to_string(), format!("{} ({})", ctx.instance_name, ctx.instance_id)),
        ("Image".to_string(), ctx.image_name.clone()),
        ("New boot volume".to_string(), attachment.boot_volume_id.clone()),
        (
            "Old boot volume".to_string(),
            format!(
                "{} ({})",
                ctx.boot_volume_id,
                if ctx.delete_old_volume { "deleted" } else { "preserved" }
            ),
        ),
        ("Admin user".to_string(), ctx.admin_username().to_string()),
    ];
    if let Some(ip) = &ctx.public_ip {
        rows.push(("Public IP".to_string(), ip.clone()));
        let key = ctx
            .ssh_private_key_path
            .as_ref()
            .map(|k| format!("-i {} ", k.display()))
            .unwrap_or_default();
        rows.push(("Connect".to_string(), format!("ssh {}{}@{}", key, ctx.admin_username(), ip)));
    }
    console::panel("Reprovisioning complete", &rows);

    if !ctx.delete_old_volume {
        console::info("To roll back to the previous boot volume:");
        for cmd in rollback_commands(ctx, &attachment.id) {
            console::detail(&cmd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_common::{Architecture, QuotaSnapshot};

    fn ctx() -> ReprovisionContext {
        ReprovisionContext {
            instance_id: "ocid1.instance.x".into(),
            instance_name: "web".into(),
            image_id: "ocid1.image.y".into(),
            boot_volume_id: "ocid1.bootvolume.old".into(),
            architecture: Some(Architecture::Arm),
            ..Default::default()
        }
    }

    #[test]
    fn plan_lists_ids_arch_and_quota() {
        let mut c = ctx();
        c.quota = Some(QuotaSnapshot {
            limit_gb: 200,
            boot_volumes_gb: 100,
            backups_gb: 0,
            block_volumes_gb: 0,
            needed_gb: 50,
        });
        let text = render_rows(&plan_rows(&c));
        assert!(text.contains("ocid1.instance.x"));
        assert!(text.contains("ocid1.image.y"));
        assert!(text.contains("Architecture: arm"));
        assert!(text.contains("100 GB available"));
        assert!(text.contains("Old boot volume: preserved"));
    }

    #[test]
    fn rollback_reattaches_the_old_volume() {
        let cmds = rollback_commands(&ctx(), "ocid1.attachment.new");
        assert!(cmds[1].contains("ocid1.attachment.new"));
        assert!(cmds[2].contains("--boot-volume-id ocid1.bootvolume.old"));
    }

    #[test]
    fn result_only_reports_deletion_after_replacement() {
        let mut c = ctx();
        c.delete_old_volume = true;
        assert!(!run_result(&c).old_volume_deleted);
        c.new_boot_volume_id = Some("ocid1.bootvolume.new".into());
        assert!(run_result(&c).old_volume_deleted);
    }
}
