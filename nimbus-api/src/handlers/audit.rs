use axum::{
    extract::{Query, State},
    Json,
};
use nimbus_common::ActionLog;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiResult;
use crate::handlers::resources::check_limit;

pub const MAX_AUDIT_LIMIT: i64 = 500;
pub const DEFAULT_AUDIT_LIMIT: i64 = 50;

#[derive(Deserialize, IntoParams)]
pub struct AuditParams {
    /// Only logs of resources owned by this provider
    pub provider_id: Option<String>,
    pub action_type: Option<String>,
    pub resource_id: Option<Uuid>,
    /// 1 to 500, default 50
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/audit",
    tag = "Audit",
    params(AuditParams),
    responses(
        (status = 200, description = "Action logs, newest first", body = Vec<ActionLog>),
        (status = 400, description = "Limit out of range")
    )
)]
pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> ApiResult<Json<Vec<ActionLog>>> {
    let limit = check_limit(params.limit, DEFAULT_AUDIT_LIMIT, MAX_AUDIT_LIMIT)?;

    let logs = sqlx::query_as::<_, ActionLog>(
        "SELECT al.id, al.resource_id, al.action_type, al.status, al.details, al.initiated_by, al.created_at
         FROM action_logs al
         LEFT JOIN cloud_resources cr ON cr.id = al.resource_id
         WHERE ($1::text IS NULL OR cr.provider_id = $1)
           AND ($2::text IS NULL OR al.action_type = $2)
           AND ($3::uuid IS NULL OR al.resource_id = $3)
         ORDER BY al.created_at DESC
         LIMIT $4",
    )
    .bind(params.provider_id.filter(|s| !s.trim().is_empty()))
    .bind(params.action_type.filter(|s| !s.trim().is_empty()))
    .bind(params.resource_id)
    .bind(limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(logs))
}
