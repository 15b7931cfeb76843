use crate::budget_monitor::{BudgetState, BudgetStatus, EnforcementAction, EnforcementReport};
use crate::handlers::{audit, budget, health, providers, resources};
use crate::sync::SyncResult;
use nimbus_common::{ActionLog, BudgetRule, CloudResource, ProtectionLevel, ProviderConfig, SpendingRecord};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        // Providers
        providers::list_providers,
        providers::list_provider_types,
        providers::get_provider,
        providers::create_provider,
        providers::update_provider,
        providers::delete_provider,
        // Resources
        resources::list_resources,
        resources::get_resource,
        resources::create_resource,
        resources::update_resource,
        resources::delete_resource,
        resources::perform_action,
        resources::get_resource_logs,
        resources::sync_resources,
        // Budget
        budget::list_rules,
        budget::get_rule,
        budget::create_rule,
        budget::update_rule,
        budget::delete_rule,
        budget::list_spending,
        budget::record_spending,
        budget::budget_status,
        budget::enforce_budget,
        // Audit
        audit::list_audit_logs
    ),
    components(
        schemas(
            ProviderConfig,
            CloudResource,
            ProtectionLevel,
            BudgetRule,
            SpendingRecord,
            ActionLog,
            health::HealthResponse,
            health::HealthChecks,
            providers::CreateProviderRequest,
            providers::UpdateProviderRequest,
            providers::ProviderTypesResponse,
            resources::CreateResourceRequest,
            resources::UpdateResourceRequest,
            resources::ActionRequest,
            SyncResult,
            budget::CreateBudgetRuleRequest,
            budget::UpdateBudgetRuleRequest,
            budget::RecordSpendingRequest,
            BudgetState,
            BudgetStatus,
            EnforcementAction,
            EnforcementReport
        )
    ),
    tags(
        (name = "nimbus-api", description = "Cloud resource dashboard API")
    )
)]
pub struct ApiDoc;
