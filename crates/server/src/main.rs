use access_gateway::AppResources;
use access_gateway::api::start_webserver;
use access_gateway::config::load_config_or_panic;
use access_gateway::identity::IdentityProviderClient;
use rustls::crypto;
use rustls::crypto::CryptoProvider;
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "access_gateway=info,hyper=warn,sea_orm=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install().expect("Failed to install `color_eyre::install`");
    dotenvy::dotenv().ok();

    initialize_standard_tracing();

    // Load config; a missing signing secret aborts here
    let config = Arc::new(load_config_or_panic());

    let ring_provider = crypto::ring::default_provider();
    CryptoProvider::install_default(ring_provider).expect("Failed to install crypto provider");

    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        .connect_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .sqlx_logging(false);
    let db = Arc::new(
        Database::connect(options)
            .await
            .expect("Failed to connect to database"),
    );

    let provider = match config.provider.credentials() {
        Ok(creds) => Some(IdentityProviderClient::new(creds)?),
        Err(e) => {
            tracing::warn!(error = %e, "Login and callback are disabled until the provider is configured");
            None
        }
    };

    let resources = AppResources::new(db, config, provider)?;
    tracing::info!(
        provider_configured = resources.provider.is_some(),
        token_validity_secs = resources.tokens.validity().as_secs(),
        "Gateway configured"
    );

    start_webserver(resources).await?;
    Ok(())
}
