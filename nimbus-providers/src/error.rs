use serde::Deserialize;
use std::fmt;

/// Coarse classification of a control-plane failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Auth,
    Quota,
    Conflict,
    NotFound,
    Other,
}

impl ApiErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorKind::Auth => "auth",
            ApiErrorKind::Quota => "quota",
            ApiErrorKind::Conflict => "conflict",
            ApiErrorKind::NotFound => "not_found",
            ApiErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const AUTH_MARKERS: &[&str] = &[
    "NotAuthenticated",
    "InvalidAuthentication",
    "signing key",
    "fingerprint",
    "key_file",
];
const QUOTA_MARKERS: &[&str] = &["QuotaExceeded", "LimitExceeded", "quota", "Quota", "limit exceeded"];
const CONFLICT_MARKERS: &[&str] = &["Conflict", "IncorrectState", "InvalidatedClientTokens"];
const NOT_FOUND_MARKERS: &[&str] = &["NotAuthorizedOrNotFound", "NotFound", "does not exist"];

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("required command '{0}' was not found on PATH")]
    CliMissing(String),

    #[error("{kind} error from {operation}: {message}")]
    Api {
        kind: ApiErrorKind,
        operation: String,
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    #[error("could not parse response of {operation}: {message}")]
    Parse { operation: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("{provider} provider does not support {operation}")]
    Unsupported { provider: String, operation: String },
}

/// JSON body the OCI tooling prints after "ServiceError:".
#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    code: Option<String>,
    message: Option<String>,
    status: Option<u16>,
}

impl ProviderError {
    /// Build an API error from raw stderr output, extracting the service error body when present.
    pub fn from_output(operation: &str, output: &str) -> Self {
        let body = output
            .find('{')
            .and_then(|start| output.rfind('}').map(|end| &output[start..=end]))
            .and_then(|json| serde_json::from_str::<ServiceErrorBody>(json).ok());

        let (status, code, message) = match body {
            Some(b) => (
                b.status,
                b.code,
                b.message.unwrap_or_else(|| output.trim().to_string()),
            ),
            None => (None, None, output.trim().to_string()),
        };

        let kind = classify(status, code.as_deref(), &message);
        ProviderError::Api {
            kind,
            operation: operation.to_string(),
            status,
            code,
            message,
        }
    }

    pub fn kind(&self) -> ApiErrorKind {
        match self {
            ProviderError::Api { kind, .. } => *kind,
            ProviderError::NotFound(_) => ApiErrorKind::NotFound,
            ProviderError::Credentials(_) => ApiErrorKind::Auth,
            _ => ApiErrorKind::Other,
        }
    }
}

/// Classify a failure by HTTP status first, then by well-known code and message substrings.
pub fn classify(status: Option<u16>, code: Option<&str>, message: &str) -> ApiErrorKind {
    match status {
        Some(401) => return ApiErrorKind::Auth,
        Some(409) => return ApiErrorKind::Conflict,
        Some(404) => return ApiErrorKind::NotFound,
        _ => {}
    }

    let haystack = format!("{} {}", code.unwrap_or_default(), message);
    if QUOTA_MARKERS.iter().any(|m| haystack.contains(m)) {
        ApiErrorKind::Quota
    } else if AUTH_MARKERS.iter().any(|m| haystack.contains(m)) {
        ApiErrorKind::Auth
    } else if CONFLICT_MARKERS.iter().any(|m| haystack.contains(m)) {
        ApiErrorKind::Conflict
    } else if NOT_FOUND_MARKERS.iter().any(|m| haystack.contains(m)) {
        ApiErrorKind::NotFound
    } else {
        ApiErrorKind::Other
    }
}

/// Classify any error returned through a `CloudProvider` call.
pub fn kind_of(err: &anyhow::Error) -> ApiErrorKind {
    match err.downcast_ref::<ProviderError>() {
        Some(e) => e.kind(),
        None => classify(None, None, &err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_error_body() {
        let stderr = r#"ServiceError:
{
    "code": "NotAuthenticated",
    "message": "The required information to complete authentication was not provided.",
    "opc-request-id": "abc",
    "status": 401
}"#;
        let err = ProviderError::from_output("compute instance get", stderr);
        assert_eq!(err.kind(), ApiErrorKind::Auth);
        match err {
            ProviderError::Api { status, code, .. } => {
                assert_eq!(status, Some(401));
                assert_eq!(code.as_deref(), Some("NotAuthenticated"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classifies_quota_before_status_fallbacks() {
        assert_eq!(
            classify(Some(400), Some("LimitExceeded"), "storage limit reached"),
            ApiErrorKind::Quota
        );
        assert_eq!(
            classify(None, None, "QuotaExceeded: total-free-storage-gb"),
            ApiErrorKind::Quota
        );
    }

    #[test]
    fn classifies_conflict_and_not_found() {
        assert_eq!(
            classify(Some(409), Some("InvalidatedClientTokens"), "retry"),
            ApiErrorKind::Conflict
        );
        assert_eq!(
            classify(None, Some("NotAuthorizedOrNotFound"), "Authorization failed"),
            ApiErrorKind::NotFound
        );
        assert_eq!(classify(None, None, "connection reset"), ApiErrorKind::Other);
    }

    #[test]
    fn plain_text_errors_are_kept_verbatim() {
        let err = ProviderError::from_output("iam region-subscription list", "  boom  \n");
        assert!(err.to_string().contains("boom"));
        assert_eq!(err.kind(), ApiErrorKind::Other);
    }

    #[test]
    fn kind_of_downcasts_anyhow() {
        let e: anyhow::Error = ProviderError::NotFound("instance x".into()).into();
        assert_eq!(kind_of(&e), ApiErrorKind::NotFound);
        let e = anyhow::anyhow!("NotAuthenticated");
        assert_eq!(kind_of(&e), ApiErrorKind::Auth);
    }
}
