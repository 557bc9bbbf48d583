use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Minimum accepted length of the session signing secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Longest accepted session token validity (30 days).
pub const MAX_TOKEN_VALIDITY_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("token.secret is not set; the gateway cannot sign session tokens without it")]
    MissingSigningSecret,
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("Identity provider is not configured, missing: {}", .0.join(", "))]
    ProviderIncomplete(Vec<&'static str>),
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenConfig {
    #[serde(default)]
    pub secret: String,
    /// Validity window of issued session tokens, in seconds.
    #[serde(default = "default_token_validity_secs")]
    pub validity_secs: u64,
}

impl TokenConfig {
    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.validity_secs)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            validity_secs: default_token_validity_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_db_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_db_timeout_secs(),
            acquire_timeout_secs: default_db_timeout_secs(),
        }
    }
}

/// Identity provider settings as they appear in the configuration sources.
///
/// Every credential is optional here: a gateway without provider credentials still
/// verifies already-issued tokens, only `/auth/login` and `/auth/callback` refuse to work.
/// Use [`ProviderConfig::credentials`] to obtain the validated set.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    #[serde(default = "default_authority_url")]
    pub authority_url: String,
    #[serde(default = "default_profile_url")]
    pub profile_url: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            authority_url: default_authority_url(),
            profile_url: default_profile_url(),
            scope: default_scope(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

/// Fully populated provider settings.
#[derive(Clone, Debug)]
pub struct ProviderCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authority_url: String,
    pub profile_url: String,
    pub scope: String,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Names of the required provider settings that are absent or blank.
    pub fn missing(&self) -> Vec<&'static str> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        let mut missing = Vec::new();
        if !present(&self.tenant_id) {
            missing.push("provider.tenant_id");
        }
        if !present(&self.client_id) {
            missing.push("provider.client_id");
        }
        if !present(&self.client_secret) {
            missing.push("provider.client_secret");
        }
        if !present(&self.redirect_uri) {
            missing.push("provider.redirect_uri");
        }
        missing
    }

    pub fn credentials(&self) -> Result<ProviderCredentials, ConfigError> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(ConfigError::ProviderIncomplete(missing));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "provider.timeout_secs must be > 0".into(),
            ));
        }
        Ok(ProviderCredentials {
            tenant_id: self.tenant_id.clone().unwrap_or_default(),
            client_id: self.client_id.clone().unwrap_or_default(),
            client_secret: self.client_secret.clone().unwrap_or_default(),
            redirect_uri: self.redirect_uri.clone().unwrap_or_default(),
            authority_url: self.authority_url.trim_end_matches('/').to_string(),
            profile_url: self.profile_url.clone(),
            scope: self.scope.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Base URL of the frontend; terminal login redirects land below it.
    pub frontend_url: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl AppConfig {
    /// Builds a frontend URL for the given path, e.g. `pending-approval`.
    pub fn frontend_page(&self, page: &str) -> String {
        format!("{}/{}", self.frontend_url.trim_end_matches('/'), page)
    }

    /// Startup preconditions. A missing signing secret is never recoverable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.secret.is_empty() {
            return Err(ConfigError::MissingSigningSecret);
        }
        if self.token.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Validation(format!(
                "token.secret must be at least {MIN_SECRET_LEN} characters"
            )));
        }
        if self.token.validity_secs == 0 || self.token.validity_secs > MAX_TOKEN_VALIDITY_SECS {
            return Err(ConfigError::Validation(format!(
                "token.validity_secs must be between 1 and {MAX_TOKEN_VALIDITY_SECS}"
            )));
        }
        if self.frontend_url.trim().is_empty() {
            return Err(ConfigError::Validation("frontend_url must be set".into()));
        }
        Ok(())
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_token_validity_secs() -> u64 {
    8 * 60 * 60
}

fn default_db_timeout_secs() -> u64 {
    5
}

fn default_authority_url() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_profile_url() -> String {
    "https://graph.microsoft.com/v1.0/me".to_string()
}

fn default_scope() -> String {
    "openid profile email User.Read".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    10
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Environment variables use the key path separated by double underscores
/// (e.g. `TOKEN__SECRET`, `PROVIDER__CLIENT_ID`) and override file values.
/// The file itself is optional so the gateway can run from the environment alone.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from("config.yaml")
}

pub fn load_config_from(path: &str) -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries: configuration problems abort startup.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderConfig {
        ProviderConfig {
            tenant_id: Some("tenant".into()),
            client_id: Some("client".into()),
            client_secret: Some("secret".into()),
            redirect_uri: Some("http://localhost:8080/auth/callback".into()),
            authority_url: "https://login.example.com/".into(),
            profile_url: default_profile_url(),
            scope: default_scope(),
            timeout_secs: 3,
        }
    }

    #[test]
    fn provider_credentials_complete() {
        let creds = provider().credentials().unwrap();
        assert_eq!(creds.tenant_id, "tenant");
        assert_eq!(creds.authority_url, "https://login.example.com");
        assert_eq!(creds.timeout, Duration::from_secs(3));
    }

    #[test]
    fn provider_reports_every_missing_key() {
        let mut cfg = provider();
        cfg.client_secret = None;
        cfg.tenant_id = Some("   ".into());
        assert_eq!(
            cfg.missing(),
            vec!["provider.tenant_id", "provider.client_secret"]
        );
        assert!(matches!(
            cfg.credentials(),
            Err(ConfigError::ProviderIncomplete(_))
        ));
    }

    #[test]
    fn frontend_page_joins_without_double_slash() {
        let cfg = AppConfig {
            database_url: "sqlite::memory:".into(),
            listen_addr: default_listen_addr(),
            frontend_url: "http://localhost:3000/".into(),
            database: DatabaseConfig::default(),
            token: TokenConfig::default(),
            provider: ProviderConfig::default(),
        };
        assert_eq!(
            cfg.frontend_page("pending-approval"),
            "http://localhost:3000/pending-approval"
        );
    }
}
