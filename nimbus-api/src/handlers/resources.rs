use anyhow::anyhow;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use nimbus_common::events::ResourceAction;
use nimbus_common::{ActionLog, CloudResource, ProtectionLevel};
use nimbus_providers::InstanceAction;
use serde::Deserialize;
use serde_json::json;
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::handlers::providers::find_provider;
use crate::simple_logger;
use crate::sync::{self, SyncResult};

const RESOURCE_COLUMNS: &str = "id, provider_id, resource_type, external_id, display_name, name_prefix, status, \
     tags, protection_level, auto_terminate, monthly_cost_estimate, created_at, updated_at, last_seen_at";

pub const MAX_LOG_LIMIT: i64 = 200;
pub const DEFAULT_LOG_LIMIT: i64 = 50;

// --- DTOs ---

#[derive(Deserialize, IntoParams)]
pub struct ListResourcesParams {
    pub provider_id: Option<String>,
    pub resource_type: Option<String>,
    pub status: Option<String>,
}

fn default_status() -> String {
    "unknown".to_string()
}

fn empty_tags() -> serde_json::Value {
    json!({})
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateResourceRequest {
    pub provider_id: String,
    pub resource_type: String,
    #[serde(default)]
    pub external_id: String,
    pub display_name: String,
    #[serde(default)]
    pub name_prefix: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "empty_tags")]
    #[schema(value_type = Object)]
    pub tags: serde_json::Value,
    #[serde(default)]
    pub protection_level: ProtectionLevel,
    #[serde(default)]
    pub auto_terminate: bool,
    #[serde(default)]
    pub monthly_cost_estimate: f64,
}

impl CreateResourceRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        for (field, value) in [
            ("provider_id", &self.provider_id),
            ("resource_type", &self.resource_type),
            ("display_name", &self.display_name),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::BadRequest(format!("{} is required", field)));
            }
        }
        validate_common(Some(&self.tags), Some(self.monthly_cost_estimate))
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateResourceRequest {
    pub display_name: Option<String>,
    pub status: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub tags: Option<serde_json::Value>,
    pub protection_level: Option<ProtectionLevel>,
    pub auto_terminate: Option<bool>,
    pub monthly_cost_estimate: Option<f64>,
}

fn validate_common(tags: Option<&serde_json::Value>, cost: Option<f64>) -> Result<(), ApiError> {
    if tags.is_some_and(|t| !t.is_object()) {
        return Err(ApiError::BadRequest("tags must be a JSON object".to_string()));
    }
    if cost.is_some_and(|c| !c.is_finite() || c < 0.0) {
        return Err(ApiError::BadRequest("monthly_cost_estimate must be a non-negative number".to_string()));
    }
    Ok(())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ActionRequest {
    /// stop, start, terminate or health_check
    pub action: String,
}

#[derive(Deserialize, IntoParams)]
pub struct LogsParams {
    /// 1 to 200, default 50
    pub limit: Option<i64>,
}

/// Operations an operator can run against a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOperation {
    Stop,
    Start,
    Terminate,
    HealthCheck,
}

impl ResourceOperation {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "stop" => Some(ResourceOperation::Stop),
            "start" => Some(ResourceOperation::Start),
            "terminate" => Some(ResourceOperation::Terminate),
            "health_check" => Some(ResourceOperation::HealthCheck),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.event().as_str()
    }

    pub fn event(&self) -> ResourceAction {
        match self {
            ResourceOperation::Stop => ResourceAction::Stop,
            ResourceOperation::Start => ResourceAction::Start,
            ResourceOperation::Terminate => ResourceAction::Terminate,
            ResourceOperation::HealthCheck => ResourceAction::HealthCheck,
        }
    }
}

pub fn check_limit(limit: Option<i64>, default: i64, max: i64) -> Result<i64, ApiError> {
    let limit = limit.unwrap_or(default);
    if !(1..=max).contains(&limit) {
        return Err(ApiError::BadRequest(format!("limit must be between 1 and {}", max)));
    }
    Ok(limit)
}

pub async fn find_resource(db: &Pool<Postgres>, id: Uuid) -> Result<Option<CloudResource>, sqlx::Error> {
    sqlx::query_as::<_, CloudResource>(&format!("SELECT {} FROM cloud_resources WHERE id = $1", RESOURCE_COLUMNS))
        .bind(id)
        .fetch_optional(db)
        .await
}

fn not_found() -> ApiError {
    ApiError::NotFound("Resource not found".to_string())
}

// --- CRUD ---

#[utoipa::path(
    get,
    path = "/resources",
    tag = "Resources",
    params(ListResourcesParams),
    responses(
        (status = 200, description = "Tracked resources ordered by name", body = Vec<CloudResource>)
    )
)]
pub async fn list_resources(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListResourcesParams>,
) -> ApiResult<Json<Vec<CloudResource>>> {
    let resources = sqlx::query_as::<_, CloudResource>(&format!(
        "SELECT {} FROM cloud_resources
         WHERE ($1::text IS NULL OR provider_id = $1)
           AND ($2::text IS NULL OR resource_type = $2)
           AND ($3::text IS NULL OR status = $3)
         ORDER BY display_name",
        RESOURCE_COLUMNS
    ))
    .bind(params.provider_id.filter(|s| !s.is_empty()))
    .bind(params.resource_type.filter(|s| !s.is_empty()))
    .bind(params.status.filter(|s| !s.is_empty()))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(resources))
}

#[utoipa::path(
    get,
    path = "/resources/{id}",
    tag = "Resources",
    responses(
        (status = 200, description = "Resource", body = CloudResource),
        (status = 404, description = "Resource not found")
    )
)]
pub async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CloudResource>> {
    find_resource(&state.db, id).await?.map(Json).ok_or_else(not_found)
}

#[utoipa::path(
    post,
    path = "/resources",
    tag = "Resources",
    request_body = CreateResourceRequest,
    responses(
        (status = 201, description = "Resource registered", body = CloudResource),
        (status = 400, description = "Invalid request or unknown provider"),
        (status = 409, description = "External id already tracked for this provider")
    )
)]
pub async fn create_resource(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateResourceRequest>,
) -> ApiResult<(StatusCode, Json<CloudResource>)> {
    req.validate()?;
    if find_provider(&state.db, &req.provider_id).await?.is_none() {
        return Err(ApiError::BadRequest(format!("Provider '{}' not found", req.provider_id)));
    }

    let external_id = if req.external_id.trim().is_empty() {
        // external ids are unique per provider, so untracked resources get a local one
        format!("local-{}", Uuid::new_v4())
    } else {
        req.external_id.trim().to_string()
    };

    let resource = sqlx::query_as::<_, CloudResource>(&format!(
        "INSERT INTO cloud_resources
         (id, provider_id, resource_type, external_id, display_name, name_prefix, status, tags,
          protection_level, auto_terminate, monthly_cost_estimate, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), NOW())
         RETURNING {}",
        RESOURCE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(&req.provider_id)
    .bind(req.resource_type.trim())
    .bind(&external_id)
    .bind(req.display_name.trim())
    .bind(&req.name_prefix)
    .bind(&req.status)
    .bind(&req.tags)
    .bind(req.protection_level)
    .bind(req.auto_terminate)
    .bind(req.monthly_cost_estimate)
    .fetch_one(&state.db)
    .await?;

    state.notify(ResourceAction::Created, resource.id.to_string(), &resource.provider_id);
    Ok((StatusCode::CREATED, Json(resource)))
}

#[utoipa::path(
    put,
    path = "/resources/{id}",
    tag = "Resources",
    request_body = UpdateResourceRequest,
    responses(
        (status = 200, description = "Resource updated", body = CloudResource),
        (status = 404, description = "Resource not found")
    )
)]
pub async fn update_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateResourceRequest>,
) -> ApiResult<Json<CloudResource>> {
    validate_common(req.tags.as_ref(), req.monthly_cost_estimate)?;

    let resource = sqlx::query_as::<_, CloudResource>(&format!(
        "UPDATE cloud_resources SET
            display_name = COALESCE($1, display_name),
            status = COALESCE($2, status),
            tags = COALESCE($3, tags),
            protection_level = COALESCE($4, protection_level),
            auto_terminate = COALESCE($5, auto_terminate),
            monthly_cost_estimate = COALESCE($6, monthly_cost_estimate),
            updated_at = NOW()
         WHERE id = $7
         RETURNING {}",
        RESOURCE_COLUMNS
    ))
    .bind(req.display_name)
    .bind(req.status)
    .bind(req.tags)
    .bind(req.protection_level)
    .bind(req.auto_terminate)
    .bind(req.monthly_cost_estimate)
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(not_found)?;

    state.notify(ResourceAction::Updated, id.to_string(), &resource.provider_id);
    Ok(Json(resource))
}

#[utoipa::path(
    delete,
    path = "/resources/{id}",
    tag = "Resources",
    responses(
        (status = 204, description = "Resource no longer tracked"),
        (status = 404, description = "Resource not found")
    )
)]
pub async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let provider_id: Option<String> =
        sqlx::query_scalar("DELETE FROM cloud_resources WHERE id = $1 RETURNING provider_id")
            .bind(id)
            .fetch_optional(&state.db)
            .await?;

    let provider_id = provider_id.ok_or_else(not_found)?;
    state.notify(ResourceAction::Deleted, id.to_string(), provider_id);
    Ok(StatusCode::NO_CONTENT)
}

// --- Actions ---

struct OperationOutcome {
    status: String,
    details: serde_json::Value,
    /// health checks also refresh last_seen_at
    observed: bool,
}

async fn run_operation(state: &AppState, resource: &CloudResource, op: ResourceOperation) -> anyhow::Result<OperationOutcome> {
    if resource.external_id.trim().is_empty() || resource.external_id.starts_with("local-") {
        return Err(anyhow!("resource is not linked to a provider object"));
    }
    let config = find_provider(&state.db, &resource.provider_id)
        .await?
        .ok_or_else(|| anyhow!("provider '{}' not found", resource.provider_id))?;
    let handle = state.providers.get(&config)?;
    let provider = handle.provider.as_ref();
    let external_id = resource.external_id.as_str();

    let done = |status: &str| OperationOutcome {
        status: status.to_string(),
        details: json!({}),
        observed: false,
    };

    match (op, resource.resource_type.as_str()) {
        (ResourceOperation::Stop, "vm") => {
            provider.instance_action(external_id, InstanceAction::SoftStop).await?;
            Ok(done("stopped"))
        }
        (ResourceOperation::Start, "vm") => {
            provider.instance_action(external_id, InstanceAction::Start).await?;
            Ok(done("running"))
        }
        (ResourceOperation::Terminate, "vm") => {
            provider.terminate_instance(external_id).await?;
            Ok(done("terminated"))
        }
        (ResourceOperation::HealthCheck, "vm") => {
            let instance = provider.get_instance(external_id).await?;
            let status = instance.lifecycle_state.dashboard_status();
            Ok(OperationOutcome {
                status: status.to_string(),
                details: json!({"status": status, "resource_id": external_id, "shape": instance.shape}),
                observed: true,
            })
        }
        (ResourceOperation::HealthCheck, "boot_volume") => {
            let volume = provider.get_boot_volume(external_id).await?;
            let status = volume.lifecycle_state.dashboard_status();
            Ok(OperationOutcome {
                status: status.to_string(),
                details: json!({"status": status, "resource_id": external_id, "size_gb": volume.size_in_gbs}),
                observed: true,
            })
        }
        (op, resource_type) => Err(anyhow!(
            "{} is not supported for resource type '{}'",
            op.as_str(),
            resource_type
        )),
    }
}

#[utoipa::path(
    post,
    path = "/resources/{id}/action",
    tag = "Resources",
    request_body = ActionRequest,
    responses(
        (status = 200, description = "Action log of the attempt (success or failed)", body = ActionLog),
        (status = 400, description = "Unknown action"),
        (status = 403, description = "Terminating a critical resource"),
        (status = 404, description = "Resource not found")
    )
)]
pub async fn perform_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActionRequest>,
) -> ApiResult<Json<ActionLog>> {
    let op = ResourceOperation::parse(&req.action)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown action: {}", req.action)))?;
    let resource = find_resource(&state.db, id).await?.ok_or_else(not_found)?;

    let log_id = simple_logger::log_action(
        &state.db,
        Some(id),
        op.as_str(),
        simple_logger::STATUS_RUNNING,
        json!({}),
        "user",
    )
    .await?;

    if op == ResourceOperation::Terminate && resource.protection_level == ProtectionLevel::Critical {
        simple_logger::log_action_complete(
            &state.db,
            log_id,
            simple_logger::STATUS_FAILED,
            Some(json!({"error": "critical protection prevents termination"})),
        )
        .await?;
        return Err(ApiError::Forbidden(
            "Cannot terminate a resource with 'critical' protection level".to_string(),
        ));
    }

    let log = match run_operation(&state, &resource, op).await {
        Ok(outcome) => {
            sqlx::query(
                "UPDATE cloud_resources SET
                    status = $1,
                    last_seen_at = CASE WHEN $2 THEN NOW() ELSE last_seen_at END,
                    updated_at = NOW()
                 WHERE id = $3",
            )
            .bind(&outcome.status)
            .bind(outcome.observed)
            .bind(id)
            .execute(&state.db)
            .await?;

            state.notify(op.event(), id.to_string(), &resource.provider_id);
            simple_logger::log_action_complete(&state.db, log_id, simple_logger::STATUS_SUCCESS, Some(outcome.details)).await?
        }
        Err(e) => {
            eprintln!("❌ [Resources] {} on {} failed: {:#}", op.as_str(), id, e);
            simple_logger::log_action_complete(
                &state.db,
                log_id,
                simple_logger::STATUS_FAILED,
                Some(json!({"error": format!("{:#}", e)})),
            )
            .await?
        }
    };

    Ok(Json(log))
}

#[utoipa::path(
    get,
    path = "/resources/{id}/logs",
    tag = "Resources",
    params(LogsParams),
    responses(
        (status = 200, description = "Action history, newest first", body = Vec<ActionLog>),
        (status = 404, description = "Resource not found")
    )
)]
pub async fn get_resource_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<LogsParams>,
) -> ApiResult<Json<Vec<ActionLog>>> {
    let limit = check_limit(params.limit, DEFAULT_LOG_LIMIT, MAX_LOG_LIMIT)?;
    if find_resource(&state.db, id).await?.is_none() {
        return Err(not_found());
    }

    let logs = sqlx::query_as::<_, ActionLog>(
        "SELECT id, resource_id, action_type, status, details, initiated_by, created_at
         FROM action_logs WHERE resource_id = $1
         ORDER BY created_at DESC LIMIT $2",
    )
    .bind(id)
    .bind(limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(logs))
}

// --- Sync ---

#[utoipa::path(
    post,
    path = "/resources/sync/{provider_id}",
    tag = "Resources",
    responses(
        (status = 200, description = "Sync counters; provider errors are reported in `errors`", body = SyncResult),
        (status = 404, description = "Provider not found")
    )
)]
pub async fn sync_resources(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> ApiResult<Json<SyncResult>> {
    let config = find_provider(&state.db, &provider_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Provider '{}' not found", provider_id)))?;

    let result = sync::sync_provider(&state, &config).await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_parse_from_wire_names() {
        assert_eq!(ResourceOperation::parse("stop"), Some(ResourceOperation::Stop));
        assert_eq!(ResourceOperation::parse(" health_check "), Some(ResourceOperation::HealthCheck));
        assert_eq!(ResourceOperation::parse("reboot"), None);
        assert_eq!(ResourceOperation::Terminate.as_str(), "terminate");
    }

    #[test]
    fn limits_are_bounded() {
        assert_eq!(check_limit(None, DEFAULT_LOG_LIMIT, MAX_LOG_LIMIT).unwrap(), 50);
        assert_eq!(check_limit(Some(200), DEFAULT_LOG_LIMIT, MAX_LOG_LIMIT).unwrap(), 200);
        assert!(check_limit(Some(0), DEFAULT_LOG_LIMIT, MAX_LOG_LIMIT).is_err());
        assert!(check_limit(Some(201), DEFAULT_LOG_LIMIT, MAX_LOG_LIMIT).is_err());
    }

    #[test]
    fn create_request_defaults_and_validation() {
        let req: CreateResourceRequest = serde_json::from_str(
            r#"{"provider_id":"oci-main","resource_type":"vm","display_name":"web-1"}"#,
        )
        .unwrap();
        assert_eq!(req.status, "unknown");
        assert_eq!(req.protection_level, ProtectionLevel::Standard);
        assert_eq!(req.tags, json!({}));
        assert!(req.validate().is_ok());

        let bad: CreateResourceRequest = serde_json::from_str(
            r#"{"provider_id":"oci-main","resource_type":"vm","display_name":"web-1","tags":[1,2]}"#,
        )
        .unwrap();
        assert!(bad.validate().is_err());

        let negative: CreateResourceRequest = serde_json::from_str(
            r#"{"provider_id":"oci-main","resource_type":"vm","display_name":"x","monthly_cost_estimate":-1}"#,
        )
        .unwrap();
        assert!(negative.validate().is_err());
    }

    #[test]
    fn unknown_protection_level_is_rejected() {
        let res: Result<CreateResourceRequest, _> = serde_json::from_str(
            r#"{"provider_id":"p","resource_type":"vm","display_name":"x","protection_level":"vital"}"#,
        );
        assert!(res.is_err());
    }
}
