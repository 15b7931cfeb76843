use crate::app::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

pub const API_KEY_HEADER: &str = "x-api-key";

fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Length-independent comparison so the key cannot be probed byte by byte.
pub fn key_matches(expected: &str, provided: &str) -> bool {
    let (a, b) = (expected.as_bytes(), provided.as_bytes());
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= (x ^ y) as usize;
    }
    diff == 0
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(req).await;
    };

    let rejection = match extract_api_key(req.headers()) {
        Some(provided) if key_matches(expected, provided) => None,
        Some(_) => Some("invalid_api_key"),
        None => Some("api_key_required"),
    };

    match rejection {
        None => next.run(req).await,
        Some(reason) => {
            tracing::debug!("rejected request to {}: {}", req.uri().path(), reason);
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error":"unauthorized","message":reason})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn keys_compare_exactly() {
        assert!(key_matches("s3cret", "s3cret"));
        assert!(!key_matches("s3cret", "s3cre"));
        assert!(!key_matches("s3cret", "s3cret!"));
        assert!(!key_matches("s3cret", "S3CRET"));
        assert!(!key_matches("", "x"));
    }

    #[test]
    fn header_is_trimmed_and_blank_ignored() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_api_key(&headers), None);
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("  "));
        assert_eq!(extract_api_key(&headers), None);
        headers.insert(API_KEY_HEADER, HeaderValue::from_static(" abc "));
        assert_eq!(extract_api_key(&headers), Some("abc"));
    }
}
