//! Credential store: persistence of user accounts and their approval/role state.
//!
//! Every write is a single statement so that concurrent requests never observe a
//! half-applied change:
//! - creation is one INSERT guarded by the unique indexes on `identity_key` and `email`
//! - identity linking (with its profile refresh) is an UPDATE conditioned on
//!   `identity_key IS NULL`
//! - approval transitions are an UPDATE conditioned on the allowed source states

use crate::entity::user_account::{self, ApprovalState, Role};
use crate::error::StoreError;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, UpdateMany, sea_query::Expr,
};
use std::sync::Arc;
use time::OffsetDateTime;

/// Normalize an email address the way it is stored and matched.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Values for a freshly created account.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub identity_key: Option<String>,
    pub email: String,
    pub display_name: Option<String>,
    pub surname: Option<String>,
    pub photo_url: Option<String>,
}

/// Partial update of the mutable profile fields and the admin-managed role.
///
/// `None` leaves a column untouched. Approval state, identity key and timestamps are
/// deliberately absent: they have dedicated operations with their own guards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub display_name: Option<String>,
    pub surname: Option<String>,
    pub photo_url: Option<String>,
    pub role: Option<Role>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.surname.is_none()
            && self.photo_url.is_none()
            && self.role.is_none()
    }

    fn set_columns(
        self,
        mut update: UpdateMany<user_account::Entity>,
    ) -> UpdateMany<user_account::Entity> {
        if let Some(display_name) = self.display_name {
            update = update.col_expr(user_account::Column::DisplayName, Expr::value(display_name));
        }
        if let Some(surname) = self.surname {
            update = update.col_expr(user_account::Column::Surname, Expr::value(surname));
        }
        if let Some(photo_url) = self.photo_url {
            update = update.col_expr(user_account::Column::PhotoUrl, Expr::value(photo_url));
        }
        if let Some(role) = self.role {
            update = update.col_expr(user_account::Column::Role, Expr::value(role.as_str()));
        }
        update
    }
}

#[derive(Clone, Debug)]
pub struct CredentialStore {
    db: Arc<DatabaseConnection>,
}

impl CredentialStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[tracing::instrument(skip(self))]
    pub async fn find_by_id(&self, id: &str) -> Result<Option<user_account::Model>, StoreError> {
        Ok(user_account::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn find_by_identity_key(
        &self,
        identity_key: &str,
    ) -> Result<Option<user_account::Model>, StoreError> {
        Ok(user_account::Entity::find()
            .filter(user_account::Column::IdentityKey.eq(identity_key))
            .one(self.db.as_ref())
            .await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<user_account::Model>, StoreError> {
        Ok(user_account::Entity::find()
            .filter(user_account::Column::Email.eq(normalize_email(email)))
            .one(self.db.as_ref())
            .await?)
    }

    /// All accounts, newest registration first.
    pub async fn list(&self) -> Result<Vec<user_account::Model>, StoreError> {
        Ok(user_account::Entity::find()
            .order_by_desc(user_account::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        Ok(user_account::Entity::find().count(self.db.as_ref()).await?)
    }

    /// Insert a pending, non-admin account.
    ///
    /// A clash on either unique index comes back as [`StoreError::Conflict`].
    #[tracing::instrument(skip(self, new), fields(email = %new.email))]
    pub async fn insert_pending(&self, new: NewUser) -> Result<user_account::Model, StoreError> {
        self.insert(new, ApprovalState::Pending, Role::User).await
    }

    async fn insert(
        &self,
        new: NewUser,
        approval_state: ApprovalState,
        role: Role,
    ) -> Result<user_account::Model, StoreError> {
        let now = OffsetDateTime::now_utc();
        let approved_at = (approval_state == ApprovalState::Approved).then_some(now);
        let account = user_account::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            identity_key: Set(new.identity_key),
            email: Set(normalize_email(&new.email)),
            display_name: Set(new.display_name),
            surname: Set(new.surname),
            photo_url: Set(new.photo_url),
            approval_state: Set(approval_state),
            role: Set(role),
            created_at: Set(now),
            approved_at: Set(approved_at),
            approved_by: Set(None),
            last_access_at: Set(None),
        };

        Ok(account.insert(self.db.as_ref()).await?)
    }

    /// Bind a provider subject to an account that has none yet, applying `patch` in
    /// the same statement.
    ///
    /// Returns `false` when the account already carries an identity key (possibly set by
    /// a concurrent login); an existing key is never overwritten and nothing is written.
    #[tracing::instrument(skip(self, patch))]
    pub async fn link_identity(
        &self,
        id: &str,
        identity_key: &str,
        patch: UserPatch,
    ) -> Result<bool, StoreError> {
        let update = user_account::Entity::update_many()
            .col_expr(user_account::Column::IdentityKey, Expr::value(identity_key));
        let result = patch
            .set_columns(update)
            .filter(user_account::Column::Id.eq(id))
            .filter(user_account::Column::IdentityKey.is_null())
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Apply a partial update in one statement and return the fresh record.
    #[tracing::instrument(skip(self))]
    pub async fn apply(
        &self,
        id: &str,
        patch: UserPatch,
    ) -> Result<user_account::Model, StoreError> {
        if !patch.is_empty() {
            let result = patch
                .set_columns(user_account::Entity::update_many())
                .filter(user_account::Column::Id.eq(id))
                .exec(self.db.as_ref())
                .await?;
            if result.rows_affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }

        self.find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Move an account through the approval workflow on behalf of `actor`.
    ///
    /// `actor` must be an administrator. Re-applying the current state is a no-op
    /// that returns the record unchanged; anything else outside
    /// [`ApprovalState::sources`] is [`StoreError::InvalidTransition`].
    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn transition(
        &self,
        id: &str,
        target: ApprovalState,
        actor: &user_account::Model,
    ) -> Result<user_account::Model, StoreError> {
        if !actor.is_admin() {
            return Err(StoreError::NotAdmin(actor.id.clone()));
        }

        let sources: Vec<&'static str> = target.sources().iter().map(|s| s.as_str()).collect();
        let mut update = user_account::Entity::update_many()
            .col_expr(user_account::Column::ApprovalState, Expr::value(target.as_str()));
        if target == ApprovalState::Approved {
            update = update
                .col_expr(
                    user_account::Column::ApprovedAt,
                    Expr::value(OffsetDateTime::now_utc()),
                )
                .col_expr(user_account::Column::ApprovedBy, Expr::value(actor.id.clone()));
        }

        let result = update
            .filter(user_account::Column::Id.eq(id))
            .filter(user_account::Column::ApprovalState.is_in(sources))
            .exec(self.db.as_ref())
            .await?;

        let current = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if result.rows_affected == 0 && current.approval_state != target {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current.approval_state,
                to: target,
            });
        }

        tracing::info!(
            user_id = %current.id,
            approval_state = %current.approval_state,
            changed = result.rows_affected > 0,
            "Approval state updated"
        );
        Ok(current)
    }

    /// Record a successful gated access.
    pub async fn touch_last_access(&self, id: &str) -> Result<(), StoreError> {
        user_account::Entity::update_many()
            .col_expr(
                user_account::Column::LastAccessAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(user_account::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Create the first approved administrator.
    ///
    /// Refuses with [`StoreError::AdminExists`] once any approved admin is present.
    #[tracing::instrument(skip(self, new), fields(email = %new.email))]
    pub async fn bootstrap_admin(&self, new: NewUser) -> Result<user_account::Model, StoreError> {
        let existing = user_account::Entity::find()
            .filter(user_account::Column::Role.eq(Role::Admin))
            .filter(user_account::Column::ApprovalState.eq(ApprovalState::Approved))
            .count(self.db.as_ref())
            .await?;
        if existing > 0 {
            return Err(StoreError::AdminExists);
        }

        self.insert(new, ApprovalState::Approved, Role::Admin).await
    }
}
