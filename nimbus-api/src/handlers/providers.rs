use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use nimbus_common::ProviderConfig;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

const PROVIDER_COLUMNS: &str =
    "id, provider_type, display_name, region, credentials_path, is_active, created_at, updated_at";

// --- DTOs ---

#[derive(Deserialize, IntoParams)]
pub struct ListProvidersParams {
    /// Defaults to true
    pub active_only: Option<bool>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProviderRequest {
    /// Unique id, e.g. "oci-main"
    pub id: String,
    pub provider_type: String,
    pub display_name: String,
    #[serde(default)]
    pub region: String,
    /// OCI config file or KEY=VALUE credentials file; empty uses ~/.oci/config
    #[serde(default)]
    pub credentials_path: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl CreateProviderRequest {
    pub fn validate(&self, supported_types: &[&str]) -> Result<(), ApiError> {
        check_length("id", &self.id, 64)?;
        check_length("provider_type", &self.provider_type, 32)?;
        check_length("display_name", &self.display_name, 128)?;
        if !supported_types.contains(&self.provider_type.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "Unsupported provider type '{}'. Supported: {}",
                self.provider_type,
                supported_types.join(", ")
            )));
        }
        Ok(())
    }
}

fn check_length(field: &str, value: &str, max: usize) -> Result<(), ApiError> {
    let len = value.trim().chars().count();
    if len == 0 || len > max {
        return Err(ApiError::BadRequest(format!("{} must be 1 to {} characters", field, max)));
    }
    Ok(())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProviderRequest {
    pub display_name: Option<String>,
    pub region: Option<String>,
    pub credentials_path: Option<String>,
    pub is_active: Option<bool>,
}

impl UpdateProviderRequest {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.region.is_none() && self.credentials_path.is_none() && self.is_active.is_none()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderTypesResponse {
    pub supported_types: Vec<String>,
}

pub async fn find_provider(db: &Pool<Postgres>, id: &str) -> Result<Option<ProviderConfig>, sqlx::Error> {
    sqlx::query_as::<_, ProviderConfig>(&format!("SELECT {} FROM provider_configs WHERE id = $1", PROVIDER_COLUMNS))
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn active_providers(db: &Pool<Postgres>) -> Result<Vec<ProviderConfig>, sqlx::Error> {
    sqlx::query_as::<_, ProviderConfig>(&format!(
        "SELECT {} FROM provider_configs WHERE is_active = TRUE ORDER BY id",
        PROVIDER_COLUMNS
    ))
    .fetch_all(db)
    .await
}

// --- Handlers ---

#[utoipa::path(
    get,
    path = "/providers",
    tag = "Providers",
    params(ListProvidersParams),
    responses(
        (status = 200, description = "Provider configurations", body = Vec<ProviderConfig>)
    )
)]
pub async fn list_providers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListProvidersParams>,
) -> ApiResult<Json<Vec<ProviderConfig>>> {
    let active_only = params.active_only.unwrap_or(true);
    let providers = sqlx::query_as::<_, ProviderConfig>(&format!(
        "SELECT {} FROM provider_configs WHERE ($1 = FALSE OR is_active = TRUE) ORDER BY id",
        PROVIDER_COLUMNS
    ))
    .bind(active_only)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(providers))
}

#[utoipa::path(
    get,
    path = "/providers/types",
    tag = "Providers",
    responses(
        (status = 200, description = "Provider types that can be connected", body = ProviderTypesResponse)
    )
)]
pub async fn list_provider_types(State(state): State<Arc<AppState>>) -> Json<ProviderTypesResponse> {
    Json(ProviderTypesResponse {
        supported_types: state
            .providers
            .supported_types()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

#[utoipa::path(
    get,
    path = "/providers/{id}",
    tag = "Providers",
    responses(
        (status = 200, description = "Provider configuration", body = ProviderConfig),
        (status = 404, description = "Provider not found")
    )
)]
pub async fn get_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProviderConfig>> {
    find_provider(&state.db, &id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Provider '{}' not found", id)))
}

#[utoipa::path(
    post,
    path = "/providers",
    tag = "Providers",
    request_body = CreateProviderRequest,
    responses(
        (status = 201, description = "Provider created", body = ProviderConfig),
        (status = 400, description = "Invalid request or unsupported type"),
        (status = 409, description = "Provider id already exists")
    )
)]
pub async fn create_provider(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProviderRequest>,
) -> ApiResult<(StatusCode, Json<ProviderConfig>)> {
    req.validate(&state.providers.supported_types())?;

    if find_provider(&state.db, req.id.trim()).await?.is_some() {
        return Err(ApiError::Conflict(format!("Provider '{}' already exists", req.id.trim())));
    }

    let provider = sqlx::query_as::<_, ProviderConfig>(&format!(
        "INSERT INTO provider_configs
         (id, provider_type, display_name, region, credentials_path, is_active, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
         RETURNING {}",
        PROVIDER_COLUMNS
    ))
    .bind(req.id.trim())
    .bind(req.provider_type.trim())
    .bind(req.display_name.trim())
    .bind(req.region.trim())
    .bind(req.credentials_path.trim())
    .bind(req.is_active)
    .fetch_one(&state.db)
    .await?;

    println!("☁️  [Providers] created {} ({})", provider.id, provider.provider_type);
    Ok((StatusCode::CREATED, Json(provider)))
}

#[utoipa::path(
    put,
    path = "/providers/{id}",
    tag = "Providers",
    request_body = UpdateProviderRequest,
    responses(
        (status = 200, description = "Provider updated", body = ProviderConfig),
        (status = 400, description = "No fields to update"),
        (status = 404, description = "Provider not found")
    )
)]
pub async fn update_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProviderRequest>,
) -> ApiResult<Json<ProviderConfig>> {
    if req.is_empty() {
        return Err(ApiError::BadRequest("No fields to update".to_string()));
    }

    let provider = sqlx::query_as::<_, ProviderConfig>(&format!(
        "UPDATE provider_configs SET
            display_name = COALESCE($1, display_name),
            region = COALESCE($2, region),
            credentials_path = COALESCE($3, credentials_path),
            is_active = COALESCE($4, is_active),
            updated_at = NOW()
         WHERE id = $5
         RETURNING {}",
        PROVIDER_COLUMNS
    ))
    .bind(req.display_name)
    .bind(req.region)
    .bind(req.credentials_path)
    .bind(req.is_active)
    .bind(&id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("Provider '{}' not found", id)))?;

    // credentials or region may have changed
    state.providers.invalidate(&id);
    Ok(Json(provider))
}

#[utoipa::path(
    delete,
    path = "/providers/{id}",
    tag = "Providers",
    responses(
        (status = 204, description = "Provider deleted"),
        (status = 404, description = "Provider not found")
    )
)]
pub async fn delete_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let result = sqlx::query("DELETE FROM provider_configs WHERE id = $1")
        .bind(&id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("Provider '{}' not found", id)));
    }
    state.providers.invalidate(&id);
    println!("🗑️  [Providers] deleted {}", id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(id: &str, provider_type: &str, display_name: &str) -> CreateProviderRequest {
        CreateProviderRequest {
            id: id.to_string(),
            provider_type: provider_type.to_string(),
            display_name: display_name.to_string(),
            region: String::new(),
            credentials_path: String::new(),
            is_active: true,
        }
    }

    #[test]
    fn create_requires_supported_type_and_lengths() {
        assert!(create("oci-main", "oci", "Main tenancy").validate(&["oci"]).is_ok());
        assert!(matches!(
            create("aws-1", "aws", "AWS").validate(&["oci"]),
            Err(ApiError::BadRequest(msg)) if msg.contains("Supported: oci")
        ));
        assert!(create("", "oci", "x").validate(&["oci"]).is_err());
        assert!(create(&"a".repeat(65), "oci", "x").validate(&["oci"]).is_err());
        assert!(create("ok", "oci", &"d".repeat(129)).validate(&["oci"]).is_err());
    }

    #[test]
    fn create_defaults_from_json() {
        let req: CreateProviderRequest =
            serde_json::from_str(r#"{"id":"oci-main","provider_type":"oci","display_name":"Main"}"#).unwrap();
        assert!(req.is_active);
        assert_eq!(req.region, "");
        assert_eq!(req.credentials_path, "");
    }

    #[test]
    fn empty_update_is_detected() {
        let req: UpdateProviderRequest = serde_json::from_str("{}").unwrap();
        assert!(req.is_empty());
        let req: UpdateProviderRequest = serde_json::from_str(r#"{"is_active":false}"#).unwrap();
        assert!(!req.is_empty());
    }
}
