// Budget evaluation and enforcement
//
// Evaluation and target selection are pure so they can be tested without a
// database; the async functions below load rows and write action logs.
use crate::simple_logger;
use chrono::{DateTime, Utc};
use nimbus_common::{BudgetRule, CloudResource, ProtectionLevel, SpendingRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

pub const ACTION_ALERT: &str = "alert";
pub const ACTION_SCALE_DOWN: &str = "scale_down";
pub const ACTION_TERMINATE_EPHEMERAL: &str = "terminate_ephemeral";
pub const ACTIONS_ON_EXCEED: &[&str] = &[ACTION_ALERT, ACTION_SCALE_DOWN, ACTION_TERMINATE_EPHEMERAL];

pub const INITIATED_BY: &str = "budget_monitor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BudgetState {
    Ok,
    Warning,
    Exceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BudgetStatus {
    pub provider_id: Option<String>,
    pub period: String,
    pub total_spent: f64,
    pub monthly_limit: f64,
    pub utilization: f64,
    pub status: BudgetState,
    pub action_on_exceed: String,
    pub alerts: Vec<String>,
}

impl BudgetStatus {
    fn reason(&self) -> String {
        self.alerts
            .first()
            .cloned()
            .unwrap_or_else(|| "Budget exceeded".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct EnforcementAction {
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    pub action: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct EnforcementReport {
    pub period: String,
    pub actions_taken: usize,
    pub details: Vec<EnforcementAction>,
}

/// Billing period of `now` as YYYY-MM.
pub fn period_of(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

pub fn current_period() -> String {
    period_of(Utc::now())
}

pub fn is_valid_period(period: &str) -> bool {
    let bytes = period.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return false;
    }
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    let (year, month) = (&period[..4], &period[5..]);
    digits(year) && digits(month) && matches!(month.parse::<u32>(), Ok(1..=12))
}

/// Status of one rule given what was spent in `period`.
pub fn evaluate(rule: &BudgetRule, spent: f64, period: &str) -> BudgetStatus {
    let utilization = if rule.monthly_limit > 0.0 {
        spent / rule.monthly_limit
    } else {
        0.0
    };

    let mut alerts = Vec::new();
    let status = if utilization >= 1.0 {
        alerts.push(format!("Budget exceeded: ${:.2} / ${:.2}", spent, rule.monthly_limit));
        BudgetState::Exceeded
    } else if utilization >= rule.alert_threshold {
        alerts.push(format!(
            "Budget warning: ${:.2} / ${:.2} ({:.0}% ≥ {:.0}% threshold)",
            spent,
            rule.monthly_limit,
            utilization * 100.0,
            rule.alert_threshold * 100.0
        ));
        BudgetState::Warning
    } else {
        BudgetState::Ok
    };

    BudgetStatus {
        provider_id: rule.provider_id.clone(),
        period: period.to_string(),
        total_spent: spent,
        monthly_limit: rule.monthly_limit,
        utilization,
        status,
        action_on_exceed: rule.action_on_exceed.clone(),
        alerts,
    }
}

/// Whether `resource` may be acted on by an exceeded rule with `action`.
pub fn is_enforceable(resource: &CloudResource, provider_id: Option<&str>, action: &str) -> bool {
    if resource.status != "running" || resource.protection_level == ProtectionLevel::Critical {
        return false;
    }
    if provider_id.is_some_and(|p| p != resource.provider_id) {
        return false;
    }
    match action {
        ACTION_TERMINATE_EPHEMERAL => resource.auto_terminate && resource.protection_level == ProtectionLevel::Ephemeral,
        ACTION_SCALE_DOWN => resource.auto_terminate,
        _ => false,
    }
}

/// Eligible resources, most expensive first.
pub fn select_targets<'a>(resources: &'a [CloudResource], provider_id: Option<&str>, action: &str) -> Vec<&'a CloudResource> {
    let mut targets: Vec<&CloudResource> = resources
        .iter()
        .filter(|r| is_enforceable(r, provider_id, action))
        .collect();
    targets.sort_by(|a, b| b.monthly_cost_estimate.total_cmp(&a.monthly_cost_estimate));
    targets
}

/// Log action type recorded for a resource targeted by `action_on_exceed`.
pub fn target_action_type(action_on_exceed: &str) -> &'static str {
    if action_on_exceed == ACTION_TERMINATE_EPHEMERAL {
        "terminate"
    } else {
        "scale_down"
    }
}

/// Actions for every exceeded rule. Resource actions are only planned here;
/// nothing is stopped or terminated until an operator acts on the pending log.
pub fn plan_enforcement(statuses: &[BudgetStatus], resources: &[CloudResource]) -> Vec<EnforcementAction> {
    let mut actions = Vec::new();
    for status in statuses.iter().filter(|s| s.status == BudgetState::Exceeded) {
        match status.action_on_exceed.as_str() {
            ACTION_ALERT => actions.push(EnforcementAction {
                provider_id: status.provider_id.clone(),
                resource_id: None,
                resource_name: None,
                action: ACTION_ALERT.to_string(),
                detail: status.reason(),
            }),
            ACTION_SCALE_DOWN | ACTION_TERMINATE_EPHEMERAL => {
                let action_type = target_action_type(&status.action_on_exceed);
                for resource in select_targets(resources, status.provider_id.as_deref(), &status.action_on_exceed) {
                    actions.push(EnforcementAction {
                        provider_id: status.provider_id.clone(),
                        resource_id: Some(resource.id),
                        resource_name: Some(resource.display_name.clone()),
                        action: action_type.to_string(),
                        detail: format!("{} triggered by budget enforcement", action_type),
                    });
                }
            }
            other => tracing::warn!("budget rule with unknown action '{}' ignored", other),
        }
    }
    actions
}

// --- Database side ---

/// Spending of one provider (or all providers) in `period`.
pub async fn spending_for(db: &Pool<Postgres>, provider_id: Option<&str>, period: &str) -> Result<f64, sqlx::Error> {
    sqlx::query_scalar::<_, f64>(
        "SELECT COALESCE(SUM(amount), 0)::float8 FROM spending_records
         WHERE period = $1 AND ($2::text IS NULL OR provider_id = $2)",
    )
    .bind(period)
    .bind(provider_id)
    .fetch_one(db)
    .await
}

/// Upsert per provider and period. The currency of an existing record is kept.
pub async fn record_spending(
    db: &Pool<Postgres>,
    provider_id: &str,
    amount: f64,
    period: &str,
    currency: &str,
) -> Result<SpendingRecord, sqlx::Error> {
    sqlx::query_as::<_, SpendingRecord>(
        "INSERT INTO spending_records (id, provider_id, period, amount, currency, recorded_at)
         VALUES ($1, $2, $3, $4, $5, NOW())
         ON CONFLICT (provider_id, period)
         DO UPDATE SET amount = EXCLUDED.amount, recorded_at = NOW()
         RETURNING id, provider_id, period, amount, currency, recorded_at",
    )
    .bind(Uuid::new_v4())
    .bind(provider_id)
    .bind(period)
    .bind(amount)
    .bind(currency)
    .fetch_one(db)
    .await
}

/// Active rules for `provider_id`, including rules that cover every provider.
pub async fn active_rules(db: &Pool<Postgres>, provider_id: Option<&str>) -> Result<Vec<BudgetRule>, sqlx::Error> {
    sqlx::query_as::<_, BudgetRule>(
        "SELECT id, provider_id, monthly_limit, alert_threshold, action_on_exceed, is_active, created_at
         FROM budget_rules
         WHERE is_active = TRUE AND ($1::text IS NULL OR provider_id = $1 OR provider_id IS NULL)
         ORDER BY created_at",
    )
    .bind(provider_id)
    .fetch_all(db)
    .await
}

pub async fn check_budget(db: &Pool<Postgres>, provider_id: Option<&str>) -> Result<Vec<BudgetStatus>, sqlx::Error> {
    let period = current_period();
    let mut statuses = Vec::new();
    for rule in active_rules(db, provider_id).await? {
        let spent = spending_for(db, rule.provider_id.as_deref(), &period).await?;
        statuses.push(evaluate(&rule, spent, &period));
    }
    Ok(statuses)
}

pub async fn enforce_budget(db: &Pool<Postgres>, provider_id: Option<&str>) -> Result<EnforcementReport, sqlx::Error> {
    let statuses = check_budget(db, provider_id).await?;

    let candidates = sqlx::query_as::<_, CloudResource>(
        "SELECT * FROM cloud_resources
         WHERE status = 'running' AND protection_level <> 'critical' AND auto_terminate = TRUE",
    )
    .fetch_all(db)
    .await?;

    let actions = plan_enforcement(&statuses, &candidates);
    for action in &actions {
        let Some(resource_id) = action.resource_id else {
            println!("💸 [Budget] {}", action.detail);
            continue;
        };
        let reason = statuses
            .iter()
            .find(|s| s.provider_id == action.provider_id && s.status == BudgetState::Exceeded)
            .map(BudgetStatus::reason)
            .unwrap_or_else(|| "Budget exceeded".to_string());
        simple_logger::log_action(
            db,
            Some(resource_id),
            &action.action,
            simple_logger::STATUS_PENDING,
            json!({ "reason": reason }),
            INITIATED_BY,
        )
        .await?;
    }

    Ok(EnforcementReport {
        period: current_period(),
        actions_taken: actions.len(),
        details: actions,
    })
}
