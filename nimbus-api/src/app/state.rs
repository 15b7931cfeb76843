use crate::provider_registry::ProviderRegistry;
use nimbus_common::events::{ResourceAction, ResourceChangeEvent};
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Slow WebSocket clients skip events beyond this backlog.
pub const EVENT_BACKLOG: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub providers: Arc<ProviderRegistry>,
    pub events: broadcast::Sender<ResourceChangeEvent>,
    /// `None` leaves the protected routes open.
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(db: Pool<Postgres>, providers: ProviderRegistry, api_key: Option<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BACKLOG);
        Arc::new(Self {
            db,
            providers: Arc::new(providers),
            events,
            api_key,
        })
    }

    /// Fire and forget; having no subscriber is not an error.
    pub fn notify(&self, action: ResourceAction, resource_id: impl Into<String>, provider_id: impl Into<String>) {
        let event = ResourceChangeEvent::new(action, resource_id, provider_id);
        let _ = self.events.send(event);
    }
}
