use crate::app::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

pub const SERVICE_NAME: &str = "nimbus-api";

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthChecks {
    pub database: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: String,
    pub service: String,
    pub checks: HealthChecks,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service and database status", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    Json(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" }.to_string(),
        service: SERVICE_NAME.to_string(),
        checks: HealthChecks {
            database: if db_ok { "ok" } else { "unreachable" }.to_string(),
        },
    })
}
