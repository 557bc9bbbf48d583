//! Login flow and session endpoints.
//!
//! - `GET /login` - Redirect to the identity provider
//! - `GET /callback` - Provider callback; ends on a frontend redirect
//! - `GET /me` - Live identity of the bearer
//! - `POST /logout` - Stateless acknowledgement
//! - `GET /provider-status` - Which provider settings are present

use crate::AppResources;
use crate::api::auth::{ApiError, ApprovedUser};
use crate::entity::user_account::{self, ApprovalState, Role};
use crate::identity::IdentityProviderClient;
use axum::{Extension, Json, extract::Query, response::Redirect};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::form_urlencoded;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const SESSION_TAG: &str = "Session";

/// Account as returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserView {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub approval_state: ApprovalState,
    pub role: Role,
    /// Whether a provider identity has been bound to the account
    pub linked: bool,
    pub created_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<OffsetDateTime>,
    /// Id of the approving administrator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_access_at: Option<OffsetDateTime>,
}

impl From<user_account::Model> for UserView {
    fn from(user: user_account::Model) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            surname: user.surname,
            photo_url: user.photo_url,
            approval_state: user.approval_state,
            role: user.role,
            linked: user.identity_key.is_some(),
            created_at: user.created_at,
            approved_at: user.approved_at,
            approved_by: user.approved_by,
            last_access_at: user.last_access_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackParams {
    /// Authorization code issued by the provider
    pub code: Option<String>,
    /// OAuth error code, when the provider refused the login
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderStatus {
    /// True when login and callback can be served
    pub configured: bool,
    /// Names of the required settings that are absent
    pub missing: Vec<String>,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(login))
        .routes(routes!(callback))
        .routes(routes!(me))
        .routes(routes!(logout))
        .routes(routes!(provider_status))
}

fn provider(resources: &AppResources) -> Result<&IdentityProviderClient, ApiError> {
    resources.provider.as_deref().ok_or_else(|| {
        tracing::warn!("Login attempted without identity provider credentials");
        ApiError::provider_not_configured()
    })
}

/// Start the login flow.
#[tracing::instrument(skip(resources))]
#[utoipa::path(
    get,
    path = "/login",
    tag = SESSION_TAG,
    operation_id = "Login",
    summary = "Redirect to the identity provider",
    responses(
        (status = 303, description = "Redirect to the provider authorize endpoint"),
        (status = 503, description = "Identity provider is not configured", body = ApiError),
    )
)]
async fn login(Extension(resources): Extension<AppResources>) -> Result<Redirect, ApiError> {
    Ok(Redirect::to(&provider(&resources)?.begin_login()))
}

/// Complete the login flow.
#[tracing::instrument(skip(resources, params))]
#[utoipa::path(
    get,
    path = "/callback",
    params(CallbackParams),
    tag = SESSION_TAG,
    operation_id = "Login Callback",
    summary = "Provider redirect target",
    description = "Exchanges the authorization code, binds the remote profile to a local account \
                   and redirects to the frontend:\n\n\
                   - `pending-approval` for accounts awaiting approval\n\
                   - `access-denied` for rejected accounts\n\
                   - `auth-success?token=...` with a session token for approved accounts",
    responses(
        (status = 303, description = "Redirect to the frontend"),
        (status = 400, description = "Provider refused the login or no code was supplied", body = ApiError),
        (status = 409, description = "Email is bound to another provider identity", body = ApiError),
        (status = 502, description = "Provider response was unusable", body = ApiError),
        (status = 503, description = "Provider unavailable or not configured", body = ApiError),
    )
)]
async fn callback(
    Extension(resources): Extension<AppResources>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ApiError> {
    if let Some(error) = params.error.as_deref() {
        let err = IdentityProviderClient::callback_error(error, params.error_description.as_deref());
        tracing::warn!(error = %err, "Provider reported a login error");
        return Err(err.into());
    }

    let provider = provider(&resources)?;
    let code = params
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing authorization code"))?;

    let profile = provider.complete_login(code).await?;
    let reconciled = resources.reconciler.reconcile(&profile).await?;
    let user = reconciled.user;
    tracing::info!(
        user_id = %user.id,
        outcome = ?reconciled.outcome,
        approval_state = %user.approval_state,
        "Login reconciled"
    );

    let config = &resources.config;
    let target = match user.approval_state {
        ApprovalState::Pending => config.frontend_page("pending-approval"),
        ApprovalState::Rejected => config.frontend_page("access-denied"),
        ApprovalState::Approved => {
            let session = resources.tokens.issue(&user).map_err(|e| {
                tracing::error!(user_id = %user.id, error = %e, "Failed to sign session token");
                ApiError::server_error()
            })?;
            if let Err(e) = resources.store.touch_last_access(&user.id).await {
                tracing::warn!(user_id = %user.id, error = %e, "Could not record last access");
            }
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("token", &session.token)
                .finish();
            format!("{}?{query}", config.frontend_page("auth-success"))
        }
    };

    Ok(Redirect::to(&target))
}

/// Current identity.
#[tracing::instrument(skip(user), fields(user_id = %user.id))]
#[utoipa::path(
    get,
    path = "/me",
    tag = SESSION_TAG,
    operation_id = "Current User",
    summary = "The live account behind the session token",
    security(("Authorization" = [])),
    responses(
        (status = 200, description = "Current account", body = UserView),
        (status = 400, description = "Malformed token", body = ApiError),
        (status = 401, description = "Missing, expired or orphaned token", body = ApiError),
        (status = 403, description = "Account pending or rejected", body = ApiError),
    )
)]
async fn me(ApprovedUser(user): ApprovedUser) -> Json<UserView> {
    Json(user.into())
}

/// Log out.
#[tracing::instrument(skip(user), fields(user_id = %user.id))]
#[utoipa::path(
    post,
    path = "/logout",
    tag = SESSION_TAG,
    operation_id = "Logout",
    summary = "Acknowledge a logout",
    description = "Session tokens are not stored server-side, so there is nothing to revoke; \
                   clients drop the token. It stays verifiable until it expires.",
    security(("Authorization" = [])),
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse),
        (status = 401, description = "Missing or expired token", body = ApiError),
    )
)]
async fn logout(ApprovedUser(user): ApprovedUser) -> Json<LogoutResponse> {
    tracing::info!("User logged out");
    Json(LogoutResponse {
        message: "Logged out".to_string(),
    })
}

/// Provider configuration status.
#[tracing::instrument(skip(resources))]
#[utoipa::path(
    get,
    path = "/provider-status",
    tag = SESSION_TAG,
    operation_id = "Provider Status",
    summary = "Whether identity provider credentials are configured",
    responses(
        (status = 200, description = "Configuration status, without any values", body = ProviderStatus),
    )
)]
async fn provider_status(Extension(resources): Extension<AppResources>) -> Json<ProviderStatus> {
    let missing = resources
        .config
        .provider
        .missing()
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    Json(ProviderStatus {
        configured: resources.provider.is_some(),
        missing,
    })
}
