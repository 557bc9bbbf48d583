//! An authentication gateway in front of an identity provider.
//!
//! Users log in through the provider's authorization-code flow, are bound to a local
//! account that an administrator must approve, and receive a signed session token.
//! Every gated request re-reads the account so that approval changes apply at once.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::error::TokenError;
use crate::gate::AccessGate;
use crate::identity::{IdentityProviderClient, Reconciler};
use crate::store::CredentialStore;
use crate::token::TokenService;

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod gate;
pub mod identity;
pub mod store;
pub mod token;

#[derive(Clone, Debug)]
pub struct AppResources {
    pub config: Arc<AppConfig>,
    pub store: CredentialStore,
    pub tokens: Arc<TokenService>,
    pub gate: AccessGate,
    pub reconciler: Reconciler,
    /// Absent when the provider credentials are not configured.
    pub provider: Option<Arc<IdentityProviderClient>>,
}

impl AppResources {
    /// Wire up the services around an open database connection.
    ///
    /// Fails only when the signing secret is empty.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        provider: Option<IdentityProviderClient>,
    ) -> Result<Self, TokenError> {
        let tokens = Arc::new(TokenService::new(
            &config.token.secret,
            config.token.validity(),
        )?);
        let store = CredentialStore::new(db);

        Ok(Self {
            gate: AccessGate::new(tokens.clone(), store.clone()),
            reconciler: Reconciler::new(store.clone()),
            provider: provider.map(Arc::new),
            config,
            store,
            tokens,
        })
    }
}
