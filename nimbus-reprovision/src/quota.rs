//! Storage quota check and the interactive strategies that free capacity.

use crate::console;
use crate::context::ReprovisionContext;
use crate::error::ReprovisionError;
use crate::prompt::Prompter;
use nimbus_common::{BootVolumeBackup, QuotaSnapshot};
use nimbus_providers::CloudProvider;
use std::collections::BTreeSet;

const FORGO_LABEL: &str = "Do not preserve the old boot volume";
const DELETE_BACKUP_LABEL: &str = "Delete a boot volume backup";
const ABORT_LABEL: &str = "Abort";
const CANCEL_LABEL: &str = "Cancel";

/// Usage and the backups that could be deleted to free space.
#[derive(Debug, Clone)]
pub struct StorageReport {
    pub snapshot: QuotaSnapshot,
    pub backups: Vec<BootVolumeBackup>,
}

/// Running state of one negotiation.
#[derive(Debug, Clone)]
pub struct Negotiation {
    pub snapshot: QuotaSnapshot,
    pub freed_gb: u64,
    pub forgo_applied: bool,
    pub deleted_backups: Vec<String>,
}

impl Negotiation {
    pub fn new(snapshot: QuotaSnapshot) -> Self {
        Self {
            snapshot,
            freed_gb: 0,
            forgo_applied: false,
            deleted_backups: vec![],
        }
    }

    pub fn effective_available_gb(&self) -> i64 {
        self.snapshot.available_gb() + self.freed_gb as i64
    }

    pub fn is_satisfied(&self) -> bool {
        self.snapshot.is_sufficient(self.freed_gb)
    }

    /// Not preserving the old volume means the replace needs no extra
    /// capacity, counted as freeing `needed_gb`. This is an estimate: the old
    /// volume's real size may differ. Applying it twice has no effect.
    pub fn apply_forgo(&mut self) -> bool {
        if self.forgo_applied {
            return false;
        }
        self.forgo_applied = true;
        self.freed_gb += self.snapshot.needed_gb;
        true
    }

    pub fn apply_backup_deleted(&mut self, backup: &BootVolumeBackup) {
        self.freed_gb += backup.size_in_gbs;
        self.deleted_backups.push(backup.id.clone());
    }
}

fn compartments_to_scan(ctx: &ReprovisionContext) -> Vec<String> {
    let mut out = vec![];
    for c in [&ctx.tenancy_id, &ctx.compartment_id] {
        if !c.is_empty() && !out.contains(c) {
            out.push(c.clone());
        }
    }
    out
}

/// Measure storage use against the account limit. `Ok(None)` when the provider reports no limit.
pub async fn measure(
    provider: &dyn CloudProvider,
    ctx: &ReprovisionContext,
) -> Result<Option<StorageReport>, ReprovisionError> {
    let tenancy = if ctx.tenancy_id.is_empty() {
        &ctx.compartment_id
    } else {
        &ctx.tenancy_id
    };
    let limit = match provider.storage_limit_gb(tenancy).await {
        Ok(Some(limit)) => limit,
        Ok(None) => return Ok(None),
        Err(e) => {
            let err = ReprovisionError::from_provider(e);
            if matches!(err, ReprovisionError::Auth(_) | ReprovisionError::DependencyMissing(_)) {
                return Err(err);
            }
            tracing::warn!("storage limit lookup failed: {}", err);
            return Ok(None);
        }
    };

    let mut ads = provider
        .list_availability_domains(tenancy)
        .await
        .map_err(ReprovisionError::from_provider)?;
    if ads.is_empty() && !ctx.availability_domain.is_empty() {
        ads.push(ctx.availability_domain.clone());
    }

    let mut seen = BTreeSet::new();
    let mut boot_volumes_gb = 0;
    let mut block_volumes_gb = 0;
    let mut backups = vec![];

    for compartment in compartments_to_scan(ctx) {
        for ad in &ads {
            for bv in provider
                .list_boot_volumes(ad, &compartment)
                .await
                .map_err(ReprovisionError::from_provider)?
            {
                if seen.insert(bv.id.clone()) {
                    boot_volumes_gb += bv.size_in_gbs;
                }
            }
            for vol in provider
                .list_block_volumes(ad, &compartment)
                .await
                .map_err(ReprovisionError::from_provider)?
            {
                if seen.insert(vol.id.clone()) {
                    block_volumes_gb += vol.size_in_gbs;
                }
            }
        }
        for backup in provider
            .list_boot_volume_backups(&compartment)
            .await
            .map_err(ReprovisionError::from_provider)?
        {
            if seen.insert(backup.id.clone()) {
                backups.push(backup);
            }
        }
    }

    let snapshot = QuotaSnapshot {
        limit_gb: limit,
        boot_volumes_gb,
        backups_gb: backups.iter().map(|b| b.size_in_gbs).sum(),
        block_volumes_gb,
        needed_gb: ctx.requested_size_gb(),
    };
    tracing::info!(
        "storage: limit={}GB used={}GB (boot={} backups={} block={}) available={}GB needed={}GB",
        snapshot.limit_gb,
        snapshot.used_gb(),
        snapshot.boot_volumes_gb,
        snapshot.backups_gb,
        snapshot.block_volumes_gb,
        snapshot.available_gb(),
        snapshot.needed_gb
    );
    Ok(Some(StorageReport { snapshot, backups }))
}

/// Manual commands printed when the operator aborts.
pub fn remediation_commands(ctx: &ReprovisionContext) -> Vec<String> {
    let compartment = if ctx.compartment_id.is_empty() {
        "<compartment-ocid>"
    } else {
        ctx.compartment_id.as_str()
    };
    let ad = if ctx.availability_domain.is_empty() {
        "<availability-domain>"
    } else {
        ctx.availability_domain.as_str()
    };
    vec![
        format!("oci bv boot-volume-backup list --compartment-id {} --output table", compartment),
        "oci bv boot-volume-backup delete --boot-volume-backup-id <backup-ocid> --force".to_string(),
        format!(
            "oci bv boot-volume list --compartment-id {} --availability-domain {} --output table",
            compartment, ad
        ),
        "oci bv boot-volume delete --boot-volume-id <detached-volume-ocid> --force".to_string(),
        "Re-run with --skip-backup to replace without keeping the old boot volume".to_string(),
    ]
}

fn print_status(n: &Negotiation) {
    console::detail(&format!(
        "Limit {} GB, used {} GB, available {} GB, needed {} GB",
        n.snapshot.limit_gb,
        n.snapshot.used_gb(),
        n.effective_available_gb(),
        n.snapshot.needed_gb
    ));
}

/// Run the strategy menu until enough capacity is freed.
///
/// `force_menu` shows the menu at least once even when the numbers look
/// sufficient (the provider rejected the replace for quota anyway).
pub async fn resolve(
    provider: &dyn CloudProvider,
    prompter: &mut dyn Prompter,
    ctx: &ReprovisionContext,
    report: StorageReport,
    force_menu: bool,
) -> Result<Negotiation, ReprovisionError> {
    let StorageReport { snapshot, mut backups } = report;
    let mut negotiation = Negotiation::new(snapshot);
    if ctx.delete_old_volume {
        negotiation.apply_forgo();
    }
    if negotiation.is_satisfied() && !force_menu {
        return Ok(negotiation);
    }

    console::warn("Not enough block storage for the new boot volume");
    let mut first = force_menu;
    while first || !negotiation.is_satisfied() {
        first = false;
        print_status(&negotiation);

        let mut options: Vec<&str> = vec![];
        if !negotiation.forgo_applied {
            options.push(FORGO_LABEL);
        }
        if !backups.is_empty() {
            options.push(DELETE_BACKUP_LABEL);
        }
        options.push(ABORT_LABEL);
        let labels: Vec<String> = options
            .iter()
            .map(|o| match *o {
                FORGO_LABEL => format!("{} (frees ~{} GB)", o, negotiation.snapshot.needed_gb),
                other => other.to_string(),
            })
            .collect();

        let picked = options[prompter.choose("How do you want to free storage?", &labels, None)?];
        match picked {
            FORGO_LABEL => {
                negotiation.apply_forgo();
                console::info("The old boot volume will not be preserved");
            }
            DELETE_BACKUP_LABEL => {
                let mut items: Vec<String> = backups
                    .iter()
                    .map(|b| format!("{} ({} GB)", b.display_name, b.size_in_gbs))
                    .collect();
                items.push(CANCEL_LABEL.to_string());
                let idx = prompter.choose("Backup to delete", &items, None)?;
                if idx >= backups.len() {
                    continue;
                }
                let backup = backups[idx].clone();
                let question = format!(
                    "Permanently delete backup {} ({} GB)?",
                    backup.display_name, backup.size_in_gbs
                );
                if !prompter.confirm(&question, false)? {
                    continue;
                }
                provider
                    .delete_boot_volume_backup(&backup.id)
                    .await
                    .map_err(ReprovisionError::from_provider)?;
                console::success(&format!("Deleted backup {} ({} GB freed)", backup.display_name, backup.size_in_gbs));
                negotiation.apply_backup_deleted(&backup);
                backups.remove(idx);
            }
            _ => {
                return Err(ReprovisionError::QuotaAborted {
                    needed_gb: negotiation.snapshot.needed_gb,
                    available_gb: negotiation.effective_available_gb(),
                    remediation: remediation_commands(ctx),
                })
            }
        }
    }
    console::success(&format!(
        "Storage is sufficient ({} GB available, {} GB needed)",
        negotiation.effective_available_gb(),
        negotiation.snapshot.needed_gb
    ));
    Ok(negotiation)
}

/// Measure and negotiate; records the outcome on the context.
pub async fn negotiate(
    provider: &dyn CloudProvider,
    prompter: &mut dyn Prompter,
    ctx: &mut ReprovisionContext,
    force_menu: bool,
) -> Result<(), ReprovisionError> {
    let Some(report) = measure(provider, ctx).await? else {
        console::info("No storage limit reported for this tenancy, skipping the quota check");
        return Ok(());
    };
    ctx.quota = Some(report.snapshot);
    let negotiation = resolve(provider, prompter, ctx, report, force_menu).await?;
    ctx.delete_old_volume = negotiation.forgo_applied;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{Answer, ScriptedPrompter};
    use nimbus_providers::mock::MockProvider;

    fn snapshot(available: u64, needed: u64) -> QuotaSnapshot {
        QuotaSnapshot {
            limit_gb: 200,
            boot_volumes_gb: 200 - available,
            backups_gb: 0,
            block_volumes_gb: 0,
            needed_gb: needed,
        }
    }

    fn backup(id: &str, size: u64) -> BootVolumeBackup {
        BootVolumeBackup {
            id: id.into(),
            display_name: format!("{id}-name"),
            size_in_gbs: size,
        }
    }

    #[test]
    fn forgo_is_applied_once() {
        let mut n = Negotiation::new(snapshot(5, 20));
        assert!(!n.is_satisfied());
        assert!(n.apply_forgo());
        assert_eq!(n.effective_available_gb(), 25);
        assert!(!n.apply_forgo());
        assert_eq!(n.effective_available_gb(), 25);
        assert!(n.is_satisfied());
    }

    #[tokio::test]
    async fn sufficient_quota_shows_no_menu() {
        let provider = MockProvider::new();
        let mut prompter = ScriptedPrompter::new([]);
        let report = StorageReport {
            snapshot: snapshot(50, 20),
            backups: vec![],
        };
        let n = resolve(&provider, &mut prompter, &ReprovisionContext::default(), report, false)
            .await
            .unwrap();
        assert!(prompter.prompts.is_empty());
        assert!(!n.forgo_applied);
    }

    #[tokio::test]
    async fn deleting_a_backup_frees_its_size() {
        let provider = MockProvider::new().with_backup(backup("b1", 15));
        let mut prompter = ScriptedPrompter::new([Answer::pick(DELETE_BACKUP_LABEL), Answer::Index(0), Answer::Yes]);
        let report = StorageReport {
            snapshot: snapshot(5, 20),
            backups: vec![backup("b1", 15)],
        };
        let n = resolve(&provider, &mut prompter, &ReprovisionContext::default(), report, false)
            .await
            .unwrap();
        assert_eq!(n.effective_available_gb(), 20);
        assert_eq!(n.deleted_backups, vec!["b1".to_string()]);
        assert!(provider.backups().is_empty());
    }

    #[tokio::test]
    async fn forgo_option_disappears_after_use() {
        let provider = MockProvider::new();
        let mut prompter = ScriptedPrompter::new([Answer::pick(FORGO_LABEL)]);
        let report = StorageReport {
            snapshot: snapshot(2, 30),
            backups: vec![],
        };
        let n = resolve(&provider, &mut prompter, &ReprovisionContext::default(), report, false)
            .await
            .unwrap();
        assert!(n.forgo_applied);
        assert_eq!(n.effective_available_gb(), 32);
        assert!(prompter.menus[0][0].starts_with(FORGO_LABEL));
    }

    #[tokio::test]
    async fn abort_reports_remediation_and_mutates_nothing() {
        let provider = MockProvider::new().with_backup(backup("b1", 15));
        let mut prompter = ScriptedPrompter::new([Answer::pick(ABORT_LABEL)]);
        let report = StorageReport {
            snapshot: snapshot(5, 20),
            backups: vec![backup("b1", 15)],
        };
        let err = resolve(&provider, &mut prompter, &ReprovisionContext::default(), report, false)
            .await
            .unwrap_err();
        match err {
            ReprovisionError::QuotaAborted {
                needed_gb,
                available_gb,
                remediation,
            } => {
                assert_eq!((needed_gb, available_gb), (20, 5));
                assert!(remediation.iter().any(|r| r.contains("boot-volume-backup delete")));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(provider.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_backup_choice_returns_to_the_menu() {
        let provider = MockProvider::new().with_backup(backup("b1", 15));
        let mut prompter = ScriptedPrompter::new([
            Answer::pick(DELETE_BACKUP_LABEL),
            Answer::pick(CANCEL_LABEL),
            Answer::pick(DELETE_BACKUP_LABEL),
            Answer::Index(0),
            Answer::No,
            Answer::pick(ABORT_LABEL),
        ]);
        let report = StorageReport {
            snapshot: snapshot(5, 20),
            backups: vec![backup("b1", 15)],
        };
        assert!(resolve(&provider, &mut prompter, &ReprovisionContext::default(), report, false)
            .await
            .is_err());
        assert_eq!(provider.backups().len(), 1);
    }
}
