//! Operator tool for bootstrapping the first administrator and inspecting accounts.

use access_gateway::config::load_config_or_panic;
use access_gateway::error::StoreError;
use access_gateway::store::{CredentialStore, NewUser};
use clap::{Parser, Subcommand};
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gateway-admin", about = "Manage access-gateway accounts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the first approved administrator (refused once one exists)
    Create {
        #[arg(long)]
        email: String,
        /// Provider subject; omit to link on the admin's first login
        #[arg(long)]
        identity_key: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        surname: Option<String>,
    },

    /// List all accounts, newest first
    List {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config_or_panic();

    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        .connect_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .sqlx_logging(false);
    let store = CredentialStore::new(Arc::new(Database::connect(options).await?));

    match cli.command {
        Command::Create {
            email,
            identity_key,
            name,
            surname,
        } => {
            let new = NewUser {
                identity_key,
                email,
                display_name: name,
                surname,
                photo_url: None,
            };
            match store.bootstrap_admin(new).await {
                Ok(admin) => {
                    println!("Created administrator {} <{}>", admin.id, admin.email);
                }
                Err(StoreError::AdminExists) => {
                    println!("An approved administrator already exists, nothing to do");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::List { json } => {
            let users = store.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else if users.is_empty() {
                println!("No accounts");
            } else {
                for user in users {
                    println!(
                        "{}\t{}\t{}\t{}\t{}",
                        user.id,
                        user.email,
                        user.approval_state,
                        user.role,
                        user.display_name.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    }

    Ok(())
}
