// Periodic background pass: sync every active provider, then enforce budgets
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::app::AppState;
use crate::budget_monitor::{self, EnforcementReport};
use crate::handlers::providers::active_providers;
use crate::sync::{self, SyncResult};

#[derive(Debug, Default, Serialize)]
pub struct TickReport {
    pub synced: Vec<SyncResult>,
    pub budget: Option<EnforcementReport>,
    pub errors: Vec<String>,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.synced.iter().all(|r| r.errors.is_empty())
    }
}

/// Runs `tick` every `period` until the process exits. The first pass starts immediately.
pub async fn run(state: Arc<AppState>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    println!("⏰ [Scheduler] started (every {}s)", period.as_secs());

    loop {
        interval.tick().await;
        let report = tick(&state).await;
        if report.is_clean() {
            let actions = report.budget.as_ref().map(|b| b.actions_taken).unwrap_or(0);
            println!(
                "⏰ [Scheduler] {} provider(s) synced, {} budget action(s)",
                report.synced.len(),
                actions
            );
        } else {
            for e in &report.errors {
                eprintln!("❌ [Scheduler] {}", e);
            }
        }
    }
}

/// One pass. Never fails: a provider that cannot be synced does not stop the
/// others, and budget enforcement runs even when syncing failed.
pub async fn tick(state: &AppState) -> TickReport {
    let mut report = TickReport::default();

    match active_providers(&state.db).await {
        Ok(providers) => {
            for config in &providers {
                match sync::sync_provider(state, config).await {
                    Ok(result) => report.synced.push(result),
                    Err(e) => report.errors.push(format!("sync {}: {}", config.id, e)),
                }
            }
        }
        Err(e) => report.errors.push(format!("listing providers: {}", e)),
    }

    match budget_monitor::enforce_budget(&state.db, None).await {
        Ok(budget) => report.budget = Some(budget),
        Err(e) => report.errors.push(format!("budget enforcement: {}", e)),
    }

    report
}
