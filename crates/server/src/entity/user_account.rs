//! User account entity - a local identity bound to an identity-provider subject.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;
use utoipa::ToSchema;

/// Position of an account in the admin approval workflow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl ApprovalState {
    /// States from which `self` may be entered. Nothing ever moves back to pending.
    pub fn sources(self) -> &'static [ApprovalState] {
        match self {
            ApprovalState::Pending => &[],
            ApprovalState::Approved => &[ApprovalState::Pending, ApprovalState::Rejected],
            ApprovalState::Rejected => &[ApprovalState::Pending, ApprovalState::Approved],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[sea_orm(string_value = "user")]
    User,
    #[sea_orm(string_value = "admin")]
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}', expected 'user' or 'admin'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_account")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Provider-issued stable subject. Set once, never overwritten.
    #[sea_orm(unique)]
    pub identity_key: Option<String>,
    /// Normalized (trimmed, lowercase) email address.
    #[sea_orm(unique)]
    pub email: String,
    pub display_name: Option<String>,
    pub surname: Option<String>,
    pub photo_url: Option<String>,
    pub approval_state: ApprovalState,
    pub role: Role,
    pub created_at: OffsetDateTime,
    pub approved_at: Option<OffsetDateTime>,
    /// Id of the admin account that approved this one.
    pub approved_by: Option<String>,
    pub last_access_at: Option<OffsetDateTime>,
}

impl Model {
    pub fn is_approved(&self) -> bool {
        self.approval_state == ApprovalState::Approved
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_transitions() {
        use ApprovalState::*;
        assert_eq!(Approved.sources(), &[Pending, Rejected]);
        assert_eq!(Rejected.sources(), &[Pending, Approved]);
        assert!(Pending.sources().is_empty());
    }

    #[test]
    fn role_parsing_is_restricted() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("user".parse::<Role>(), Ok(Role::User));
        assert!("usuario".parse::<Role>().is_err());
        assert!("Admin".parse::<Role>().is_err());
    }
}
