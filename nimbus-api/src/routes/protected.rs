// Protected routes (X-API-Key when a key is configured)
use crate::app::AppState;
use crate::auth;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::handlers::{audit, budget, providers, resources};

/// Create protected routes router
pub fn create_protected_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        // Providers
        .route("/providers", get(providers::list_providers).post(providers::create_provider))
        .route("/providers/types", get(providers::list_provider_types))
        .route(
            "/providers/{id}",
            get(providers::get_provider)
                .put(providers::update_provider)
                .delete(providers::delete_provider),
        )
        // Resources
        .route("/resources", get(resources::list_resources).post(resources::create_resource))
        .route(
            "/resources/{id}",
            get(resources::get_resource)
                .put(resources::update_resource)
                .delete(resources::delete_resource),
        )
        .route("/resources/{id}/action", post(resources::perform_action))
        .route("/resources/{id}/logs", get(resources::get_resource_logs))
        .route("/resources/sync/{provider_id}", post(resources::sync_resources))
        // Budget
        .route("/budget/rules", get(budget::list_rules).post(budget::create_rule))
        .route(
            "/budget/rules/{id}",
            get(budget::get_rule)
                .put(budget::update_rule)
                .delete(budget::delete_rule),
        )
        .route("/budget/spending", get(budget::list_spending).post(budget::record_spending))
        .route("/budget/status", get(budget::budget_status))
        .route("/budget/enforce", post(budget::enforce_budget))
        // Audit
        .route("/audit", get(audit::list_audit_logs))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_key))
}
