use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use nimbus_common::{BudgetRule, SpendingRecord};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::app::AppState;
use crate::budget_monitor::{self, BudgetStatus, EnforcementReport, ACTIONS_ON_EXCEED};
use crate::error::{ApiError, ApiResult};
use crate::handlers::providers::find_provider;

const RULE_COLUMNS: &str = "id, provider_id, monthly_limit, alert_threshold, action_on_exceed, is_active, created_at";

// --- DTOs ---

#[derive(Deserialize, IntoParams)]
pub struct ListRulesParams {
    /// Defaults to true
    pub active_only: Option<bool>,
}

#[derive(Deserialize, IntoParams)]
pub struct ProviderFilter {
    pub provider_id: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct ListSpendingParams {
    pub provider_id: Option<String>,
    /// YYYY-MM
    pub period: Option<String>,
}

fn default_threshold() -> f64 {
    0.8
}

fn default_action() -> String {
    budget_monitor::ACTION_ALERT.to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBudgetRuleRequest {
    /// Omit to cover every provider
    pub provider_id: Option<String>,
    pub monthly_limit: f64,
    #[serde(default = "default_threshold")]
    pub alert_threshold: f64,
    #[serde(default = "default_action")]
    pub action_on_exceed: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateBudgetRuleRequest {
    pub monthly_limit: Option<f64>,
    pub alert_threshold: Option<f64>,
    pub action_on_exceed: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordSpendingRequest {
    pub provider_id: String,
    pub amount: f64,
    /// Defaults to the current month
    pub period: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

pub fn validate_rule_fields(
    monthly_limit: Option<f64>,
    alert_threshold: Option<f64>,
    action_on_exceed: Option<&str>,
) -> Result<(), ApiError> {
    if monthly_limit.is_some_and(|l| !l.is_finite() || l < 0.0) {
        return Err(ApiError::BadRequest("monthly_limit must be a non-negative number".to_string()));
    }
    if alert_threshold.is_some_and(|t| !(0.0..=1.0).contains(&t)) {
        return Err(ApiError::BadRequest("alert_threshold must be between 0 and 1".to_string()));
    }
    if let Some(action) = action_on_exceed {
        if !ACTIONS_ON_EXCEED.contains(&action) {
            return Err(ApiError::BadRequest(format!(
                "Invalid action_on_exceed '{}'. Allowed: {}",
                action,
                ACTIONS_ON_EXCEED.join(", ")
            )));
        }
    }
    Ok(())
}

fn rule_not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Budget rule {} not found", id))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// --- Rules ---

#[utoipa::path(
    get,
    path = "/budget/rules",
    tag = "Budget",
    params(ListRulesParams),
    responses(
        (status = 200, description = "Budget rules, newest first", body = Vec<BudgetRule>)
    )
)]
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRulesParams>,
) -> ApiResult<Json<Vec<BudgetRule>>> {
    let rules = sqlx::query_as::<_, BudgetRule>(&format!(
        "SELECT {} FROM budget_rules WHERE ($1 = FALSE OR is_active = TRUE) ORDER BY created_at DESC",
        RULE_COLUMNS
    ))
    .bind(params.active_only.unwrap_or(true))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rules))
}

#[utoipa::path(
    post,
    path = "/budget/rules",
    tag = "Budget",
    request_body = CreateBudgetRuleRequest,
    responses(
        (status = 201, description = "Rule created", body = BudgetRule),
        (status = 400, description = "Invalid rule or unknown provider")
    )
)]
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBudgetRuleRequest>,
) -> ApiResult<(StatusCode, Json<BudgetRule>)> {
    validate_rule_fields(Some(req.monthly_limit), Some(req.alert_threshold), Some(&req.action_on_exceed))?;

    let provider_id = non_empty(req.provider_id);
    if let Some(pid) = provider_id.as_deref() {
        if find_provider(&state.db, pid).await?.is_none() {
            return Err(ApiError::BadRequest(format!("Provider '{}' not found", pid)));
        }
    }

    let rule = sqlx::query_as::<_, BudgetRule>(&format!(
        "INSERT INTO budget_rules (id, provider_id, monthly_limit, alert_threshold, action_on_exceed, is_active, created_at)
         VALUES ($1, $2, $3, $4, $5, TRUE, NOW())
         RETURNING {}",
        RULE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(provider_id)
    .bind(req.monthly_limit)
    .bind(req.alert_threshold)
    .bind(&req.action_on_exceed)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(rule)))
}

#[utoipa::path(
    get,
    path = "/budget/rules/{id}",
    tag = "Budget",
    responses(
        (status = 200, description = "Budget rule", body = BudgetRule),
        (status = 404, description = "Rule not found")
    )
)]
pub async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BudgetRule>> {
    sqlx::query_as::<_, BudgetRule>(&format!("SELECT {} FROM budget_rules WHERE id = $1", RULE_COLUMNS))
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .map(Json)
        .ok_or_else(|| rule_not_found(id))
}

#[utoipa::path(
    put,
    path = "/budget/rules/{id}",
    tag = "Budget",
    request_body = UpdateBudgetRuleRequest,
    responses(
        (status = 200, description = "Rule updated", body = BudgetRule),
        (status = 400, description = "Invalid rule"),
        (status = 404, description = "Rule not found")
    )
)]
pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateBudgetRuleRequest>,
) -> ApiResult<Json<BudgetRule>> {
    validate_rule_fields(req.monthly_limit, req.alert_threshold, req.action_on_exceed.as_deref())?;

    let rule = sqlx::query_as::<_, BudgetRule>(&format!(
        "UPDATE budget_rules SET
            monthly_limit = COALESCE($1, monthly_limit),
            alert_threshold = COALESCE($2, alert_threshold),
            action_on_exceed = COALESCE($3, action_on_exceed),
            is_active = COALESCE($4, is_active)
         WHERE id = $5
         RETURNING {}",
        RULE_COLUMNS
    ))
    .bind(req.monthly_limit)
    .bind(req.alert_threshold)
    .bind(req.action_on_exceed)
    .bind(req.is_active)
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| rule_not_found(id))?;

    Ok(Json(rule))
}

#[utoipa::path(
    delete,
    path = "/budget/rules/{id}",
    tag = "Budget",
    responses(
        (status = 204, description = "Rule deleted"),
        (status = 404, description = "Rule not found")
    )
)]
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let result = sqlx::query("DELETE FROM budget_rules WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(rule_not_found(id));
    }
    Ok(StatusCode::NO_CONTENT)
}

// --- Spending ---

#[utoipa::path(
    get,
    path = "/budget/spending",
    tag = "Budget",
    params(ListSpendingParams),
    responses(
        (status = 200, description = "Spending records, most recent first", body = Vec<SpendingRecord>)
    )
)]
pub async fn list_spending(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListSpendingParams>,
) -> ApiResult<Json<Vec<SpendingRecord>>> {
    let records = sqlx::query_as::<_, SpendingRecord>(
        "SELECT id, provider_id, period, amount, currency, recorded_at FROM spending_records
         WHERE ($1::text IS NULL OR provider_id = $1)
           AND ($2::text IS NULL OR period = $2)
         ORDER BY recorded_at DESC",
    )
    .bind(non_empty(params.provider_id))
    .bind(non_empty(params.period))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(records))
}

#[utoipa::path(
    post,
    path = "/budget/spending",
    tag = "Budget",
    request_body = RecordSpendingRequest,
    responses(
        (status = 201, description = "Spending recorded (replaces the amount for the same provider and period)", body = SpendingRecord),
        (status = 400, description = "Invalid amount, period or provider")
    )
)]
pub async fn record_spending(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecordSpendingRequest>,
) -> ApiResult<(StatusCode, Json<SpendingRecord>)> {
    if !req.amount.is_finite() || req.amount < 0.0 {
        return Err(ApiError::BadRequest("amount must be a non-negative number".to_string()));
    }
    if req.currency.len() != 3 || !req.currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ApiError::BadRequest("currency must be a 3-letter code".to_string()));
    }
    let period = non_empty(req.period).unwrap_or_else(budget_monitor::current_period);
    if !budget_monitor::is_valid_period(&period) {
        return Err(ApiError::BadRequest(format!("Invalid period '{}', expected YYYY-MM", period)));
    }
    if find_provider(&state.db, &req.provider_id).await?.is_none() {
        return Err(ApiError::BadRequest(format!("Provider '{}' not found", req.provider_id)));
    }

    let record = budget_monitor::record_spending(&state.db, &req.provider_id, req.amount, &period, &req.currency).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

// --- Status / enforcement ---

#[utoipa::path(
    get,
    path = "/budget/status",
    tag = "Budget",
    params(ProviderFilter),
    responses(
        (status = 200, description = "One status per active rule for the current month", body = Vec<BudgetStatus>)
    )
)]
pub async fn budget_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProviderFilter>,
) -> ApiResult<Json<Vec<BudgetStatus>>> {
    let provider_id = non_empty(params.provider_id);
    let statuses = budget_monitor::check_budget(&state.db, provider_id.as_deref()).await?;
    Ok(Json(statuses))
}

#[utoipa::path(
    post,
    path = "/budget/enforce",
    tag = "Budget",
    params(ProviderFilter),
    responses(
        (status = 200, description = "Planned enforcement actions, recorded as pending action logs", body = EnforcementReport)
    )
)]
pub async fn enforce_budget(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProviderFilter>,
) -> ApiResult<Json<EnforcementReport>> {
    let provider_id = non_empty(params.provider_id);
    let report = budget_monitor::enforce_budget(&state.db, provider_id.as_deref()).await?;
    if report.actions_taken > 0 {
        println!("💸 [Budget] enforcement planned {} action(s) for {}", report.actions_taken, report.period);
    }
    Ok(Json(report))
}
