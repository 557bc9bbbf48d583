//! Per-request access control.
//!
//! A request passes when its bearer token verifies *and* the account it names is,
//! right now, approved in the credential store. The claims inside the token are only
//! used to find the account; approval and role always come from the live record.

use crate::entity::user_account::{self, ApprovalState};
use crate::error::{StoreError, TokenError};
use crate::store::CredentialStore;
use crate::token::{SessionClaims, TokenService};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Missing Authorization header")]
    MissingToken,
    #[error("{0}")]
    InvalidToken(String),
    #[error("Session token has expired, log in again")]
    TokenExpired,
    #[error("Account no longer exists")]
    UnknownUser,
    #[error("Account is pending approval")]
    ApprovalPending,
    #[error("Account access has been rejected")]
    AccessRejected,
    #[error("Administrator role required")]
    Forbidden,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccessError {
    /// Stable machine-readable code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::MissingToken => "missing_token",
            AccessError::InvalidToken(_) => "invalid_token",
            AccessError::TokenExpired => "token_expired",
            AccessError::UnknownUser => "unknown_user",
            AccessError::ApprovalPending => "approval_pending",
            AccessError::AccessRejected => "access_rejected",
            AccessError::Forbidden => "forbidden",
            AccessError::Store(_) => "server_error",
        }
    }
}

impl From<TokenError> for AccessError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AccessError::TokenExpired,
            other => AccessError::InvalidToken(other.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AccessGate {
    tokens: Arc<TokenService>,
    store: CredentialStore,
}

impl AccessGate {
    pub fn new(tokens: Arc<TokenService>, store: CredentialStore) -> Self {
        Self { tokens, store }
    }

    /// Full check for an `Authorization` header value: authenticate, then reauthorize.
    pub async fn authorize(
        &self,
        authorization: Option<&str>,
    ) -> Result<user_account::Model, AccessError> {
        let claims = self.authenticate(authorization)?;
        self.reauthorize(&claims).await
    }

    /// Extract and verify the bearer token. Touches nothing but the token itself.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<SessionClaims, AccessError> {
        let header = authorization.ok_or(AccessError::MissingToken)?;
        let token = match header.trim().split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
            _ => {
                return Err(AccessError::InvalidToken(
                    "Authorization header must use Bearer scheme".into(),
                ));
            }
        };
        if token.is_empty() {
            return Err(AccessError::InvalidToken("Bearer token is empty".into()));
        }

        Ok(self.tokens.verify(token)?)
    }

    /// Reload the account named by `claims` and require it to be approved.
    #[tracing::instrument(skip(self, claims), fields(user_id = %claims.sub))]
    pub async fn reauthorize(
        &self,
        claims: &SessionClaims,
    ) -> Result<user_account::Model, AccessError> {
        let user = self
            .store
            .find_by_id(&claims.sub)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to load account for gated request"))?
            .ok_or(AccessError::UnknownUser)?;

        match user.approval_state {
            ApprovalState::Approved => {}
            ApprovalState::Pending => return Err(AccessError::ApprovalPending),
            ApprovalState::Rejected => return Err(AccessError::AccessRejected),
        }

        if let Err(e) = self.store.touch_last_access(&user.id).await {
            tracing::warn!(error = %e, "Could not record last access");
        }
        Ok(user)
    }

    pub fn require_admin(user: &user_account::Model) -> Result<(), AccessError> {
        if user.is_admin() {
            Ok(())
        } else {
            Err(AccessError::Forbidden)
        }
    }
}
