use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tracing::{info, Level};

use clixs_core::{Account, Listing, ListingId, ListingStatus, UserId};
use clixs_server::{JwtVerifier, ServerConfig};
use clixs_settings::ChatSettings;
use clixs_store::{AccountRepo, ConversationRepo, Database, ListingRepo};
use clixs_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

#[derive(Parser)]
#[command(name = "clixs", version, about = "Realtime buyer/seller chat for listings")]
struct Cli {
    /// Settings file (default `~/.clixs/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the chat server until Ctrl-C.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Mint a bearer token for a user.
    Token {
        user_id: String,
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Mirror an account's activity flag.
    Account {
        user_id: String,
        #[arg(long)]
        inactive: bool,
    },
    /// Manage the local listing mirror.
    Listing {
        #[command(subcommand)]
        action: ListingAction,
    },
}

#[derive(Subcommand)]
enum ListingAction {
    /// Create or replace a listing.
    Set {
        listing_id: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "active")]
        status: String,
    },
    /// Change a listing's status. Leaving `active` closes its open conversations.
    Status { listing_id: String, status: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => clixs_settings::load_settings_from_path(path),
        None => clixs_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let _telemetry = init_telemetry(telemetry_config(&settings));

    match cli.command {
        Command::Serve { host, port } => serve(settings, host, port).await,
        Command::Token { user_id, ttl_secs } => {
            let verifier = JwtVerifier::new(&jwt_secret(&settings)?, settings.auth.issuer.clone());
            let ttl = Duration::from_secs(ttl_secs.unwrap_or(settings.auth.token_ttl_secs));
            let token = verifier.issue(&UserId::from_raw(user_id), ttl)?;
            println!("{token}");
            Ok(())
        }
        Command::Account { user_id, inactive } => {
            let db = open_db(&settings)?;
            AccountRepo::new(db).upsert(&Account {
                id: UserId::from_raw(user_id),
                is_active: !inactive,
            })?;
            Ok(())
        }
        Command::Listing { action } => listing(&settings, action),
    }
}

fn telemetry_config(settings: &ChatSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: Level::from_str(&settings.logging.level).unwrap_or(Level::INFO),
        format: LogFormat::from_str(&settings.logging.format).unwrap_or_default(),
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: settings.log_db_path(),
        ..TelemetryConfig::default()
    }
}

fn jwt_secret(settings: &ChatSettings) -> anyhow::Result<SecretString> {
    settings
        .auth
        .jwt_secret
        .clone()
        .context("no JWT secret configured; set auth.jwtSecret or CLIXS_JWT_SECRET")
}

fn open_db(settings: &ChatSettings) -> anyhow::Result<Database> {
    let path = settings.db_path();
    Database::open(&path).with_context(|| format!("failed to open {}", path.display()))
}

async fn serve(
    settings: ChatSettings,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let db = open_db(&settings)?;

    let mut verifier = JwtVerifier::new(&jwt_secret(&settings)?, settings.auth.issuer.clone());
    if settings.auth.require_active_account {
        verifier = verifier.with_accounts(Arc::new(AccountRepo::new(db.clone())));
    }
    let listings = Arc::new(ListingRepo::new(db.clone()));

    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let handle = clixs_server::start(config, db, Arc::new(verifier), listings)
        .await
        .context("failed to start server")?;
    info!(port = handle.port, db = %settings.db_path().display(), "clixs ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn listing(settings: &ChatSettings, action: ListingAction) -> anyhow::Result<()> {
    let db = open_db(settings)?;
    let listings = ListingRepo::new(db.clone());
    match action {
        ListingAction::Set {
            listing_id,
            owner,
            title,
            status,
        } => {
            let status = parse_status(&status)?;
            listings.upsert(&Listing {
                id: ListingId::from_raw(listing_id),
                owner_id: UserId::from_raw(owner),
                title,
                status,
            })?;
        }
        ListingAction::Status { listing_id, status } => {
            let id = ListingId::from_raw(listing_id);
            let listing = listings.set_status(&id, parse_status(&status)?)?;
            if !listing.is_active() {
                let closed = ConversationRepo::new(db).close_for_listing(&id)?;
                info!(listing_id = %id, closed = closed.len(), "closed conversations for listing");
            }
        }
    }
    Ok(())
}

fn parse_status(raw: &str) -> anyhow::Result<ListingStatus> {
    match ListingStatus::from_str(raw) {
        Ok(status) => Ok(status),
        Err(e) => bail!(e),
    }
}
