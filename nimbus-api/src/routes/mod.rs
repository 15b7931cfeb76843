// Routes module - Centralizes all route definitions
pub mod protected;
pub mod public;

use crate::app::AppState;
use axum::Router;
use std::sync::Arc;

/// Build the main application router
pub fn create_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(public::create_public_routes())
        .merge(protected::create_protected_routes(state))
}
