// Application state and configuration
pub mod state;

pub use state::AppState;

use crate::routes::create_router;
use axum::http::HeaderValue;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// CORS layer; an empty origin list allows any origin.
pub fn create_cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                eprintln!("⚠️  [CORS] ignoring invalid origin '{}'", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Full application: routes, CORS and state.
pub fn create_app(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .merge(create_router(state.clone()))
        .layer(create_cors(cors_origins))
        .with_state(state)
}
