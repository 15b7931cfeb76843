// Pulls the provider's view of instances and boot volumes into dashboard rows
use crate::app::AppState;
use crate::provider_registry::ProviderHandle;
use crate::simple_logger;
use nimbus_common::events::ResourceAction;
use nimbus_common::{BootVolume, Instance, ProviderConfig};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

pub const INITIATED_BY: &str = "sync";

/// One resource as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteResource {
    pub resource_type: String,
    pub external_id: String,
    pub display_name: String,
    pub status: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, utoipa::ToSchema)]
pub struct SyncResult {
    pub provider_id: String,
    pub synced: usize,
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn new(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            ..Default::default()
        }
    }
}

pub fn from_instance(instance: &Instance) -> RemoteResource {
    RemoteResource {
        resource_type: "vm".to_string(),
        external_id: instance.id.clone(),
        display_name: instance.display_name.clone(),
        status: instance.lifecycle_state.dashboard_status().to_string(),
        details: json!({
            "shape": instance.shape,
            "region": instance.region,
            "availability_domain": instance.availability_domain,
            "architecture": instance.architecture().as_str(),
            "time_created": instance.time_created.map(|t| t.to_rfc3339()),
        }),
    }
}

pub fn from_boot_volume(volume: &BootVolume) -> RemoteResource {
    let display_name = if volume.display_name.trim().is_empty() {
        let tail: String = volume.id.chars().rev().take(8).collect::<Vec<_>>().into_iter().rev().collect();
        format!("boot-vol-{}", tail)
    } else {
        volume.display_name.clone()
    };
    RemoteResource {
        resource_type: "boot_volume".to_string(),
        external_id: volume.id.clone(),
        display_name,
        status: volume.lifecycle_state.dashboard_status().to_string(),
        details: json!({
            "size_gb": volume.size_in_gbs,
            "availability_domain": volume.availability_domain,
        }),
    }
}

/// Everything not terminated. Instance listing errors fail the sync; a boot
/// volume listing that fails in one availability domain is recorded in
/// `errors` and the rest is still returned.
pub async fn list_remote(handle: &ProviderHandle, errors: &mut Vec<String>) -> anyhow::Result<Vec<RemoteResource>> {
    let provider = handle.provider.as_ref();
    let compartment = handle.compartment_id.as_str();

    let mut resources: Vec<RemoteResource> = provider
        .list_instances(compartment)
        .await?
        .iter()
        .filter(|i| !i.lifecycle_state.is_gone())
        .map(from_instance)
        .collect();

    let ads = match provider.list_availability_domains(compartment).await {
        Ok(ads) => ads,
        Err(e) => {
            errors.push(format!("listing availability domains: {:#}", e));
            vec![]
        }
    };
    for ad in &ads {
        match provider.list_boot_volumes(ad, compartment).await {
            Ok(volumes) => resources.extend(
                volumes
                    .iter()
                    .filter(|v| !v.lifecycle_state.is_gone())
                    .map(from_boot_volume),
            ),
            Err(e) => {
                tracing::warn!("boot volume listing failed in {}: {:#}", ad, e);
                errors.push(format!("listing boot volumes in {}: {:#}", ad, e));
            }
        }
    }
    Ok(resources)
}

/// List the provider and upsert every remote resource by `(provider_id, external_id)`.
///
/// Provider failures end up in `errors` of an otherwise empty result; only
/// database errors are returned as `Err`.
pub async fn sync_provider(state: &AppState, config: &ProviderConfig) -> Result<SyncResult, sqlx::Error> {
    let provider_id = config.id.as_str();
    let mut result = SyncResult::new(provider_id);
    let log_id = simple_logger::log_action(
        &state.db,
        None,
        "sync",
        simple_logger::STATUS_RUNNING,
        json!({"provider_id": provider_id}),
        INITIATED_BY,
    )
    .await?;

    let listed = match state.providers.get(config) {
        Ok(handle) => list_remote(&handle, &mut result.errors).await,
        Err(e) => Err(e),
    };
    let remote = match listed {
        Ok(remote) => remote,
        Err(e) => {
            result.errors.push(format!("{:#}", e));
            simple_logger::log_action_complete(&state.db, log_id, simple_logger::STATUS_FAILED, Some(json!(result))).await?;
            return Ok(result);
        }
    };

    result.synced = remote.len();
    for r in &remote {
        // xmax is 0 only for freshly inserted rows
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO cloud_resources
             (id, provider_id, resource_type, external_id, display_name, status, tags, last_seen_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, '{}'::jsonb, NOW(), NOW(), NOW())
             ON CONFLICT (provider_id, external_id) DO UPDATE SET
                status = EXCLUDED.status,
                display_name = EXCLUDED.display_name,
                last_seen_at = NOW(),
                updated_at = NOW()
             RETURNING (xmax = 0)",
        )
        .bind(Uuid::new_v4())
        .bind(provider_id)
        .bind(&r.resource_type)
        .bind(&r.external_id)
        .bind(&r.display_name)
        .bind(&r.status)
        .fetch_one(&state.db)
        .await?;

        if inserted {
            result.created += 1;
        } else {
            result.updated += 1;
        }
    }

    println!(
        "🔄 [Sync] {}: {} listed, {} new, {} updated, {} errors",
        provider_id,
        result.synced,
        result.created,
        result.updated,
        result.errors.len()
    );
    simple_logger::log_action_complete(&state.db, log_id, simple_logger::STATUS_SUCCESS, Some(json!(result))).await?;
    state.notify(ResourceAction::Synced, "*", provider_id);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nimbus_common::LifecycleState;
    use nimbus_providers::mock::MockProvider;
    use std::sync::Arc;

    const TENANCY: &str = "ocid1.tenancy.oc1..sync";

    fn instance(id: &str, state: LifecycleState) -> Instance {
        Instance {
            id: id.to_string(),
            display_name: format!("vm-{}", id),
            shape: "VM.Standard.A1.Flex".to_string(),
            lifecycle_state: state,
            availability_domain: "AD-1".to_string(),
            compartment_id: TENANCY.to_string(),
            region: Some("eu-paris-1".to_string()),
            time_created: Some(Utc::now()),
        }
    }

    fn volume(id: &str, name: &str, state: LifecycleState) -> BootVolume {
        BootVolume {
            id: id.to_string(),
            display_name: name.to_string(),
            size_in_gbs: 50,
            lifecycle_state: state,
            availability_domain: "AD-1".to_string(),
        }
    }

    #[test]
    fn unnamed_volumes_get_a_short_name() {
        let r = from_boot_volume(&volume("ocid1.bootvolume.oc1..abcdefgh12345678", "", LifecycleState::Available));
        assert_eq!(r.display_name, "boot-vol-12345678");
        assert_eq!(r.status, "running");
        assert_eq!(r.details["size_gb"], 50);
    }

    #[test]
    fn instances_carry_shape_and_architecture() {
        let r = from_instance(&instance("i-1", LifecycleState::Stopped));
        assert_eq!(r.resource_type, "vm");
        assert_eq!(r.status, "stopped");
        assert_eq!(r.details["architecture"], "arm");
    }

    #[tokio::test]
    async fn terminated_resources_are_skipped() {
        let mock = MockProvider::new()
            .with_availability_domain("AD-1")
            .with_instance(instance("i-live", LifecycleState::Running))
            .with_instance(instance("i-gone", LifecycleState::Terminated))
            .with_boot_volume(volume("bv-1", "boot", LifecycleState::Available))
            .with_boot_volume(volume("bv-2", "old", LifecycleState::Terminated));
        let handle = ProviderHandle {
            provider: Arc::new(mock),
            compartment_id: TENANCY.to_string(),
        };

        let mut errors = vec![];
        let resources = list_remote(&handle, &mut errors).await.unwrap();
        let ids: Vec<&str> = resources.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, vec!["i-live", "bv-1"]);
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn volume_errors_do_not_abort_the_sync() {
        let mock = MockProvider::new()
            .with_availability_domain("AD-1")
            .with_instance(instance("i-live", LifecycleState::Running));
        mock.fail_next("list_boot_volumes", "ServiceError: {\"code\": \"InternalError\", \"message\": \"boom\", \"status\": 500}");
        let handle = ProviderHandle {
            provider: Arc::new(mock),
            compartment_id: TENANCY.to_string(),
        };

        let mut errors = vec![];
        let resources = list_remote(&handle, &mut errors).await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("AD-1"));
    }
}
