use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Dashboard push events
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAction {
    Created,
    Updated,
    Deleted,
    Stop,
    Start,
    Terminate,
    HealthCheck,
    Synced,
}

impl ResourceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceAction::Created => "created",
            ResourceAction::Updated => "updated",
            ResourceAction::Deleted => "deleted",
            ResourceAction::Stop => "stop",
            ResourceAction::Start => "start",
            ResourceAction::Terminate => "terminate",
            ResourceAction::HealthCheck => "health_check",
            ResourceAction::Synced => "synced",
        }
    }
}

/// Pushed to WebSocket clients so they can invalidate cached views.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResourceChangeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub action: ResourceAction,
    pub resource_id: String,
    pub provider_id: String,
    pub emitted_at: DateTime<Utc>,
}

impl ResourceChangeEvent {
    pub const TYPE: &'static str = "resource_change";

    pub fn new(action: ResourceAction, resource_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            event_type: Self::TYPE.to_string(),
            action,
            resource_id: resource_id.into(),
            provider_id: provider_id.into(),
            emitted_at: Utc::now(),
        }
    }
}
