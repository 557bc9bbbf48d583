//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use access_gateway::{
    AppResources,
    api,
    config::{AppConfig, DatabaseConfig, ProviderConfig, TokenConfig},
    identity::IdentityProviderClient,
};
use axum_test::TestServer;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;

pub const SECRET: &str = "integration-secret-integration-secret";
pub const FRONTEND: &str = "http://localhost:3000";
pub const TENANT: &str = "tenant-1";

/// Fresh in-memory database with the real migrations applied.
pub async fn test_db() -> Arc<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("run migrations");
    Arc::new(db)
}

/// Provider settings pointing at a mock server.
pub fn provider_config(base_url: &str) -> ProviderConfig {
    ProviderConfig {
        tenant_id: Some(TENANT.into()),
        client_id: Some("client-1".into()),
        client_secret: Some("client-secret".into()),
        redirect_uri: Some("http://localhost:8080/auth/callback".into()),
        authority_url: base_url.to_string(),
        profile_url: format!("{base_url}/v1.0/me"),
        timeout_secs: 1,
        ..Default::default()
    }
}

pub fn test_config(provider: ProviderConfig) -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        listen_addr: "127.0.0.1:0".into(),
        frontend_url: FRONTEND.into(),
        database: DatabaseConfig::default(),
        token: TokenConfig {
            secret: SECRET.into(),
            validity_secs: 8 * 60 * 60,
        },
        provider,
    }
}

/// Resources with the provider client enabled when `provider_base` is given.
pub async fn test_resources(provider_base: Option<&str>) -> AppResources {
    let provider_cfg = provider_base.map(provider_config).unwrap_or_default();
    let provider = provider_cfg
        .credentials()
        .ok()
        .map(|creds| IdentityProviderClient::new(creds).expect("build provider client"));
    let config = Arc::new(test_config(provider_cfg));
    AppResources::new(test_db().await, config, provider).expect("build resources")
}

pub fn test_server(resources: AppResources) -> TestServer {
    TestServer::new(api::app(resources)).expect("create test server")
}

/// Value of the `token` query parameter in a frontend redirect.
pub fn token_from_location(location: &str) -> Option<String> {
    url::Url::parse(location)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
}
