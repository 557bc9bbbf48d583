//! Administrator endpoints for the approval workflow.
//!
//! - `GET /admin/users` - All accounts, newest first
//! - `PUT /admin/users/{id}/approve` - Approve an account
//! - `PUT /admin/users/{id}/reject` - Reject or revoke an account
//! - `PUT /admin/users/{id}/role` - Change the role of an account
//!
//! Every endpoint requires an approved administrator (`AdminUser` extractor).

use crate::AppResources;
use crate::api::auth::{AdminUser, ApiError};
use crate::api::session::UserView;
use crate::entity::user_account::{ApprovalState, Role};
use crate::store::UserPatch;
use axum::{Extension, Json, extract::Path};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const ADMIN_TAG: &str = "User Administration";

#[derive(Debug, Serialize, ToSchema)]
pub struct UsersListResponse {
    pub users: Vec<UserView>,
    pub total: usize,
}

/// Request to change a role.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleChangeRequest {
    /// One of "user" or "admin"
    pub role: String,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_users))
        .routes(routes!(approve_user))
        .routes(routes!(reject_user))
        .routes(routes!(change_role))
}

#[tracing::instrument(skip(resources, admin), fields(admin_id = %admin.id))]
#[utoipa::path(
    get,
    path = "/admin/users",
    tag = ADMIN_TAG,
    operation_id = "List Users",
    summary = "All accounts with their approval and role state",
    security(("Authorization" = [])),
    responses(
        (status = 200, description = "Accounts, newest registration first", body = UsersListResponse),
        (status = 401, description = "Missing or expired token", body = ApiError),
        (status = 403, description = "Not an approved administrator", body = ApiError),
    )
)]
async fn list_users(
    Extension(resources): Extension<AppResources>,
    AdminUser(admin): AdminUser,
) -> Result<Json<UsersListResponse>, ApiError> {
    let users: Vec<UserView> = resources
        .store
        .list()
        .await?
        .into_iter()
        .map(UserView::from)
        .collect();

    Ok(Json(UsersListResponse {
        total: users.len(),
        users,
    }))
}

#[tracing::instrument(skip(resources, admin), fields(admin_id = %admin.id))]
#[utoipa::path(
    put,
    path = "/admin/users/{id}/approve",
    params(("id" = String, Path, description = "Account id")),
    tag = ADMIN_TAG,
    operation_id = "Approve User",
    security(("Authorization" = [])),
    responses(
        (status = 200, description = "Account approved (or already approved)", body = UserView),
        (status = 403, description = "Not an approved administrator", body = ApiError),
        (status = 404, description = "Unknown account", body = ApiError),
        (status = 409, description = "Transition not allowed", body = ApiError),
    )
)]
async fn approve_user(
    Extension(resources): Extension<AppResources>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<UserView>, ApiError> {
    let user = resources
        .store
        .transition(&id, ApprovalState::Approved, &admin)
        .await?;
    Ok(Json(user.into()))
}

#[tracing::instrument(skip(resources, admin), fields(admin_id = %admin.id))]
#[utoipa::path(
    put,
    path = "/admin/users/{id}/reject",
    params(("id" = String, Path, description = "Account id")),
    tag = ADMIN_TAG,
    operation_id = "Reject User",
    description = "Rejects a pending account or revokes an approved one. Takes effect on the \
                   account's next request, even with an unexpired session token.",
    security(("Authorization" = [])),
    responses(
        (status = 200, description = "Account rejected (or already rejected)", body = UserView),
        (status = 403, description = "Not an approved administrator", body = ApiError),
        (status = 404, description = "Unknown account", body = ApiError),
        (status = 409, description = "Transition not allowed", body = ApiError),
    )
)]
async fn reject_user(
    Extension(resources): Extension<AppResources>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<UserView>, ApiError> {
    let user = resources
        .store
        .transition(&id, ApprovalState::Rejected, &admin)
        .await?;
    Ok(Json(user.into()))
}

#[tracing::instrument(skip(resources, admin, payload), fields(admin_id = %admin.id))]
#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    params(("id" = String, Path, description = "Account id")),
    tag = ADMIN_TAG,
    operation_id = "Change User Role",
    security(("Authorization" = [])),
    request_body(content = RoleChangeRequest, description = "New role"),
    responses(
        (status = 200, description = "Role updated", body = UserView),
        (status = 400, description = "Role is not one of user/admin", body = ApiError),
        (status = 403, description = "Not an approved administrator", body = ApiError),
        (status = 404, description = "Unknown account", body = ApiError),
    )
)]
async fn change_role(
    Extension(resources): Extension<AppResources>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(payload): Json<RoleChangeRequest>,
) -> Result<Json<UserView>, ApiError> {
    let role = Role::from_str(payload.role.trim())
        .map_err(|msg| ApiError::new("invalid_role", msg))?;

    let user = resources
        .store
        .apply(
            &id,
            UserPatch {
                role: Some(role),
                ..Default::default()
            },
        )
        .await?;
    tracing::info!(user_id = %user.id, role = %user.role, "Role updated");
    Ok(Json(user.into()))
}
