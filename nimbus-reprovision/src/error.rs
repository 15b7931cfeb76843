use nimbus_providers::{kind_of, ApiErrorKind, ProviderError};
use std::time::Duration;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ReprovisionError {
    #[error("missing required commands: {}", .0.join(", "))]
    DependencyMissing(Vec<String>),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not enough storage: need {needed_gb} GB, {available_gb} GB available")]
    QuotaAborted {
        needed_gb: u64,
        available_gb: i64,
        remediation: Vec<String>,
    },

    #[error("timed out after {}s waiting for {what}", .waited.as_secs())]
    Timeout { what: String, waited: Duration },

    #[error("aborted by user: {0}")]
    UserAbort(String),

    #[error("{0}")]
    Precondition(String),

    #[error("input required in non-interactive mode: {0}")]
    InteractionRequired(String),

    #[error("cloud API error: {0:#}")]
    Provider(anyhow::Error),

    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReprovisionError {
    /// Route a provider failure into the taxonomy. Auth failures become fatal `Auth` errors.
    pub fn from_provider(err: anyhow::Error) -> Self {
        if let Some(ProviderError::CliMissing(cmd)) = err.downcast_ref::<ProviderError>() {
            return ReprovisionError::DependencyMissing(vec![cmd.clone()]);
        }
        match kind_of(&err) {
            ApiErrorKind::Auth => ReprovisionError::Auth(format!("{:#}", err)),
            _ => ReprovisionError::Provider(err),
        }
    }

    pub fn provider_kind(&self) -> Option<ApiErrorKind> {
        match self {
            ReprovisionError::Provider(e) => Some(kind_of(e)),
            ReprovisionError::Auth(_) => Some(ApiErrorKind::Auth),
            _ => None,
        }
    }

    pub fn is_user_abort(&self) -> bool {
        matches!(self, ReprovisionError::UserAbort(_))
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_user_abort() {
            EXIT_OK
        } else {
            EXIT_FAILURE
        }
    }

    /// Operator-facing remediation hints printed under the error.
    pub fn hints(&self) -> Vec<String> {
        match self {
            ReprovisionError::DependencyMissing(cmds) => cmds
                .iter()
                .map(|c| match c.as_str() {
                    "oci" => "Install the OCI CLI: https://docs.oracle.com/iaas/Content/API/SDKDocs/cliinstall.htm".to_string(),
                    "ssh" | "ssh-keygen" => "Install an OpenSSH client (e.g. apt install openssh-client)".to_string(),
                    "openssl" => "Install OpenSSL (e.g. apt install openssl)".to_string(),
                    other => format!("Install '{}' and make sure it is on PATH", other),
                })
                .collect(),
            ReprovisionError::Auth(_) => vec![
                "Re-upload the API public key in the console (User settings > API keys)".to_string(),
                "Check that the fingerprint in the profile matches the uploaded key".to_string(),
                "Verify the key_file path and the tenancy/user OCIDs of the profile".to_string(),
            ],
            ReprovisionError::QuotaAborted { remediation, .. } => remediation.clone(),
            ReprovisionError::Timeout { .. } => vec![
                "Inspect the instance and its boot volume attachments in the console".to_string(),
                "Re-run the tool: it starts with a recovery check and can re-attach the old volume".to_string(),
            ],
            ReprovisionError::InteractionRequired(_) => {
                vec!["Pass the missing value as a flag or save it in the instance config".to_string()]
            }
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_abort_exits_zero() {
        assert_eq!(ReprovisionError::UserAbort("declined".into()).exit_code(), EXIT_OK);
        assert_eq!(
            ReprovisionError::Timeout {
                what: "x".into(),
                waited: Duration::from_secs(600)
            }
            .exit_code(),
            EXIT_FAILURE
        );
        let quota = ReprovisionError::QuotaAborted {
            needed_gb: 20,
            available_gb: 5,
            remediation: vec!["oci bv ...".into()],
        };
        assert_eq!(quota.exit_code(), EXIT_FAILURE);
        assert_eq!(quota.hints(), vec!["oci bv ...".to_string()]);
    }

    #[test]
    fn auth_provider_errors_are_promoted() {
        let err: anyhow::Error = ProviderError::from_output(
            "compute instance get",
            r#"{"code":"NotAuthenticated","status":401,"message":"bad key"}"#,
        )
        .into();
        let e = ReprovisionError::from_provider(err);
        assert!(matches!(e, ReprovisionError::Auth(_)));
        assert!(!e.hints().is_empty());
    }

    #[test]
    fn missing_cli_is_a_dependency_error() {
        let err: anyhow::Error = ProviderError::CliMissing("oci".into()).into();
        match ReprovisionError::from_provider(err) {
            ReprovisionError::DependencyMissing(cmds) => assert_eq!(cmds, vec!["oci"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
