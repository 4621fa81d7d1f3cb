use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use pagelock_core::clock::{Clock, SystemClock};
use pagelock_core::lock::encode_timestamp;
use pagelock_core::{Credential, Database, DocumentStore, LockManager, LockSettings, RemoteStore};
use pagelock_telegraph::{ApiClient, DEFAULT_BASE_URL};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod paths;
mod profile;

use crate::profile::{Profile, TOKEN_ENV};

#[derive(Parser, Debug)]
#[command(author, version, about = "Encrypted shared key-value store on telegra.ph pages", long_about = None)]
struct Cli {
    /// Profile file, defaults to the platform data directory
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a remote account and an empty index
    Init {
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },
    /// Join an existing store; the access token is read without echo
    Attach {
        #[arg(long)]
        index_path: String,
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },
    /// Create or overwrite an item with a JSON value
    Put { title: String, value: String },
    /// Print an item as JSON
    Get { title: String },
    /// List item titles in index order
    List,
    /// Clear a lock holder left behind by a crashed client
    Unlock,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let cli = Cli::parse();
    let profile_path = match cli.profile {
        Some(path) => path,
        None => paths::profile_path()?,
    };
    match cli.command {
        Commands::Init { base_url } => init_command(&profile_path, &base_url).await,
        Commands::Attach {
            index_path,
            base_url,
        } => attach_command(&profile_path, &base_url, index_path).await,
        Commands::Put { title, value } => put_command(&profile_path, &title, &value).await,
        Commands::Get { title } => get_command(&profile_path, &title).await,
        Commands::List => list_command(&profile_path).await,
        Commands::Unlock => unlock_command(&profile_path).await,
    }
}

async fn init_command(profile_path: &Path, base_url: &str) -> Result<()> {
    if profile_path.exists() {
        return Err(anyhow!("profile already exists at {}", profile_path.display()));
    }
    let client = ApiClient::new(base_url)?;
    let credential = client
        .create_account(&encode_timestamp(SystemClock.now_ms()))
        .await?;
    let index_path = DocumentStore::create_index(&client, &credential)
        .await
        .context("create index document")?;
    // The token exists nowhere else yet, so show it before anything can fail.
    println!("Access token: {}", credential.expose());
    println!("Index path: {index_path}");

    let profile = Profile {
        api_base_url: base_url.to_string(),
        index_path,
        lock: LockSettings::default(),
    };
    profile.save(profile_path)?;
    info!(profile = %profile_path.display(), index_path = %profile.index_path, "store initialised");
    remember_token(&profile.index_path, &credential);
    Ok(())
}

async fn attach_command(profile_path: &Path, base_url: &str, index_path: String) -> Result<()> {
    let token = match std::env::var(TOKEN_ENV) {
        Ok(token) => token,
        Err(_) => rpassword::prompt_password("Access token: ")?,
    };
    let credential = profile::credential_from_input(&token);
    let client = ApiClient::new(base_url)?;
    client
        .read_lock(&credential)
        .await
        .map_err(|e| anyhow!("access token rejected: {e}"))?;

    let profile = Profile {
        api_base_url: base_url.to_string(),
        index_path,
        lock: LockSettings::default(),
    };
    profile.save(profile_path)?;
    remember_token(&profile.index_path, &credential);
    println!("Attached to index {}", profile.index_path);
    Ok(())
}

/// Keyring failures are not fatal: the token can still be supplied through
/// the environment.
fn remember_token(index_path: &str, credential: &Credential) {
    token_saved(profile::store_token(index_path, credential));
}

fn token_saved(stored: Result<()>) -> bool {
    match stored {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "keyring unavailable");
            eprintln!("warning: token not saved ({e:#}); set {TOKEN_ENV} to use this store");
            false
        }
    }
}

fn open_remote(profile: &Profile) -> Result<Arc<dyn RemoteStore>> {
    Ok(Arc::new(ApiClient::new(&profile.api_base_url)?))
}

fn open_database(profile_path: &Path) -> Result<Database> {
    let profile = Profile::load(profile_path)?;
    Ok(Database::new(
        open_remote(&profile)?,
        profile.credential()?,
        profile.index_path.clone(),
        profile.lock,
    ))
}

async fn put_command(profile_path: &Path, title: &str, raw: &str) -> Result<()> {
    let value: Value = serde_json::from_str(raw).context("value must be JSON")?;
    let mut db = open_database(profile_path)?;
    let created = db.upsert(title, &value).await?;
    println!("{} {title}", if created { "created" } else { "updated" });
    Ok(())
}

async fn get_command(profile_path: &Path, title: &str) -> Result<()> {
    let mut db = open_database(profile_path)?;
    match db.fetch::<Value>(title).await? {
        Some(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        None => Err(anyhow!("no item titled {title:?}")),
    }
}

async fn list_command(profile_path: &Path) -> Result<()> {
    let mut db = open_database(profile_path)?;
    for title in db.titles().await? {
        println!("{title}");
    }
    Ok(())
}

async fn unlock_command(profile_path: &Path) -> Result<()> {
    let profile = Profile::load(profile_path)?;
    let locks = LockManager::new(open_remote(&profile)?, profile.credential()?, profile.lock);
    locks.release().await;
    println!("lock holder cleared");
    Ok(())
}
