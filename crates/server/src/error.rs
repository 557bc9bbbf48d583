use crate::entity::user_account::ApprovalState;
use hyper::StatusCode;
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Which leg of the authorization-code flow a provider failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStage {
    Callback,
    TokenExchange,
    ProfileFetch,
}

impl std::fmt::Display for ProviderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProviderStage::Callback => "callback",
            ProviderStage::TokenExchange => "token_exchange",
            ProviderStage::ProfileFetch => "profile_fetch",
        })
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered and refused the request (OAuth error or 4xx status).
    #[error("Identity provider rejected {stage}: {code}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Rejected {
        stage: ProviderStage,
        status: Option<StatusCode>,
        code: String,
        description: Option<String>,
    },
    /// Timeout or transport failure; the user may simply retry.
    #[error("Identity provider unavailable during {stage}: {reason}")]
    Unavailable { stage: ProviderStage, reason: String },
    #[error("Identity provider sent an unusable response during {stage}: {reason}")]
    MalformedResponse { stage: ProviderStage, reason: String },
}

impl ProviderError {
    pub fn stage(&self) -> ProviderStage {
        match self {
            ProviderError::Rejected { stage, .. }
            | ProviderError::Unavailable { stage, .. }
            | ProviderError::MalformedResponse { stage, .. } => *stage,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Unavailable { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Credential store unavailable: {0}")]
    Unavailable(#[source] DbErr),
    /// A unique index (identity_key or email) rejected a write.
    #[error("Uniqueness conflict: {0}")]
    Conflict(String),
    #[error("User {0} not found")]
    NotFound(String),
    #[error("Cannot move user {id} from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ApprovalState,
        to: ApprovalState,
    },
    #[error("User {0} is not an administrator")]
    NotAdmin(String),
    #[error("An approved administrator already exists")]
    AdminExists,
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => StoreError::Conflict(detail),
            _ => StoreError::Unavailable(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Signing secret is empty")]
    MissingSecret,
    #[error("Token is invalid: {0}")]
    Invalid(String),
    #[error("Token has expired")]
    Expired,
    #[error("Failed to sign token: {0}")]
    Signing(String),
    #[error("Token validity of {0:?} cannot be represented")]
    ValidityOutOfRange(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The email belongs to an account already bound to another provider subject.
    #[error("Email {email} is already linked to a different identity")]
    IdentityMismatch { email: String },
    #[error("Gave up reconciling after {0} conflicting attempts")]
    Contended(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display_includes_description() {
        let err = ProviderError::Rejected {
            stage: ProviderStage::TokenExchange,
            status: Some(StatusCode::BAD_REQUEST),
            code: "invalid_grant".into(),
            description: Some("AADSTS70008: code expired".into()),
        };
        assert_eq!(
            err.to_string(),
            "Identity provider rejected token_exchange: invalid_grant (AADSTS70008: code expired)"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn unavailable_is_retryable() {
        let err = ProviderError::Unavailable {
            stage: ProviderStage::ProfileFetch,
            reason: "timed out after 10s".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.stage(), ProviderStage::ProfileFetch);
    }

    #[test]
    fn generic_db_error_is_unavailable() {
        let err: StoreError = DbErr::Custom("connection reset".into()).into();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
