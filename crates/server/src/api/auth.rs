//! Error body and the authentication extractors used by the gated endpoints.

use crate::AppResources;
use crate::entity::user_account;
use crate::error::{ProviderError, ReconcileError, StoreError};
use crate::gate::{AccessError, AccessGate};
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// JSON error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code (e.g. "invalid_token", "approval_pending")
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ApiError {
    pub fn new(error: &str, description: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::new("bad_request", description)
    }

    pub fn not_found(description: impl Into<String>) -> Self {
        Self::new("not_found", description)
    }

    pub fn provider_not_configured() -> Self {
        Self::new(
            "provider_not_configured",
            "Identity provider credentials are not configured",
        )
    }

    pub fn server_error() -> Self {
        Self {
            error: "server_error".to_string(),
            error_description: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.error.as_str() {
            "invalid_token" | "bad_request" | "invalid_role" | "provider_rejected" => {
                StatusCode::BAD_REQUEST
            }
            "missing_token" | "token_expired" | "unknown_user" => StatusCode::UNAUTHORIZED,
            "approval_pending" | "access_rejected" | "forbidden" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "invalid_transition" | "identity_mismatch" => StatusCode::CONFLICT,
            "provider_malformed_response" => StatusCode::BAD_GATEWAY,
            "provider_unavailable" | "provider_not_configured" | "busy" => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Store(e) => e.into(),
            other => ApiError::new(other.code(), other.to_string()),
        }
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::not_found(format!("User {id} not found")),
            e @ StoreError::InvalidTransition { .. } => {
                ApiError::new("invalid_transition", e.to_string())
            }
            e @ StoreError::NotAdmin(_) => ApiError::new("forbidden", e.to_string()),
            other => {
                tracing::error!(error = %other, "Credential store failure");
                ApiError::server_error()
            }
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        let stage = err.stage();
        if err.is_retryable() {
            return ApiError::new(
                "provider_unavailable",
                format!("Identity provider is unavailable during {stage}, try again"),
            );
        }
        match err {
            ProviderError::Rejected {
                description, code, ..
            } => ApiError::new("provider_rejected", description.unwrap_or(code)),
            _ => ApiError::new(
                "provider_malformed_response",
                format!("Identity provider sent an unusable response during {stage}"),
            ),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Store(e) => e.into(),
            e @ ReconcileError::IdentityMismatch { .. } => {
                ApiError::new("identity_mismatch", e.to_string())
            }
            e @ ReconcileError::Contended(_) => ApiError::new("busy", e.to_string()),
        }
    }
}

fn resources(parts: &Parts) -> Result<AppResources, ApiError> {
    parts.extensions.get::<AppResources>().cloned().ok_or_else(|| {
        tracing::error!("AppResources not found in extensions");
        ApiError::server_error()
    })
}

/// Axum extractor for any approved account.
///
/// Reads `Authorization: Bearer <token>`, verifies it and reloads the account. The
/// wrapped record is the live one, not the token's snapshot.
///
/// # Example
///
/// ```ignore
/// async fn handler(ApprovedUser(user): ApprovedUser) -> impl IntoResponse {
///     format!("Hello, {}", user.email)
/// }
/// ```
pub struct ApprovedUser(pub user_account::Model);

impl<S> FromRequestParts<S> for ApprovedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let resources = resources(parts)?;
        let authorization = parts
            .headers
            .get(header::AUTHORIZATION)
            .map(|v| v.to_str().unwrap_or_default());

        let user = resources.gate.authorize(authorization).await.map_err(|e| {
            tracing::debug!(code = e.code(), "Gated request refused");
            ApiError::from(e)
        })?;
        Ok(ApprovedUser(user))
    }
}

/// Like [`ApprovedUser`], additionally requiring the admin role.
pub struct AdminUser(pub user_account::Model);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ApprovedUser(user) = ApprovedUser::from_request_parts(parts, state).await?;
        AccessGate::require_admin(&user)?;
        Ok(AdminUser(user))
    }
}
