//! CoreCloud CLI - run and administer a CoreCloud transfer server.
//!
//! This tool starts the HTTP server and performs the offline chores around
//! it: provisioning accounts, registering storage locations and sweeping
//! abandoned uploads.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use corecloud_common::{OwnerId, StoragePath};
use corecloud_server::{AppState, ServerConfig};

#[derive(Parser)]
#[command(name = "corecloud")]
#[command(about = "CoreCloud - Encrypted object transfer server")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long, global = true)]
    listen: Option<String>,

    /// Override the SQLite database path.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Override the blob storage root.
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server.
    Serve,

    /// Provision an account's login and master passwords.
    Provision {
        /// Owner identifier.
        #[arg(short, long)]
        owner: String,
    },

    /// Register a storage location for an owner.
    AddLocation {
        /// Owner identifier.
        #[arg(short, long)]
        owner: String,

        /// Location root, relative to the storage root.
        #[arg(short, long)]
        root: String,
    },

    /// Remove uploads left pending by a crash.
    Sweep {
        /// Minimum age in seconds (default: the configured grace period).
        #[arg(long)]
        older_than: Option<u64>,
    },

    /// Write a default configuration file.
    InitConfig {
        /// Destination path.
        #[arg(short, long)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    if let Commands::InitConfig { path } = &cli.command {
        return cmd_init_config(path);
    }

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Serve => corecloud_server::serve(config)
            .await
            .context("Server failed"),

        Commands::Provision { owner } => cmd_provision(&config, &owner).await,

        Commands::AddLocation { owner, root } => cmd_add_location(&config, &owner, &root).await,

        Commands::Sweep { older_than } => {
            let age = older_than.map(Duration::from_secs).unwrap_or(config.pending_grace());
            cmd_sweep(&config, age).await
        }

        Commands::InitConfig { .. } => Ok(()),
    }
}

/// Read the configuration file, if any, then apply flag overrides.
fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if let Some(listen) = &cli.listen {
        config.listen = listen.clone();
    }
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(storage_root) = &cli.storage_root {
        config.storage_root = storage_root.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Prompt for a password twice.
fn prompt_new_password(label: &str) -> Result<Zeroizing<String>> {
    let password = Zeroizing::new(
        rpassword::prompt_password(format!("Enter {} password: ", label))
            .context("Failed to read password")?,
    );
    let confirm = Zeroizing::new(
        rpassword::prompt_password(format!("Confirm {} password: ", label))
            .context("Failed to read password")?,
    );

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    if *password != *confirm {
        anyhow::bail!("Passwords do not match");
    }
    Ok(password)
}

fn cmd_init_config(path: &PathBuf) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Refusing to overwrite {}", path.display());
    }
    let json = ServerConfig::default().to_json()?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Configuration written to {}", path.display());
    Ok(())
}

async fn cmd_provision(config: &ServerConfig, owner: &str) -> Result<()> {
    let owner = OwnerId::new(owner).context("Invalid owner")?;
    let login = prompt_new_password("login")?;
    let master = prompt_new_password("master")?;
    if *login == *master {
        anyhow::bail!("Login and master passwords must differ");
    }

    let state = AppState::open(config).context("Failed to open storage")?;
    state
        .keys
        .provision_account(&owner, login.as_bytes(), master.as_bytes())
        .await
        .context("Failed to provision account")?;

    println!("Account provisioned for {}", owner);
    Ok(())
}

async fn cmd_add_location(config: &ServerConfig, owner: &str, root: &str) -> Result<()> {
    let owner = OwnerId::new(owner).context("Invalid owner")?;
    let root = StoragePath::parse(root).context("Invalid location root")?;

    let state = AppState::open(config).context("Failed to open storage")?;
    let location = state
        .engine
        .add_location(&owner, root)
        .await
        .context("Failed to add location")?;

    println!("Location added:");
    println!("  ID: {}", location.id);
    println!("  Owner: {}", location.owner);
    println!("  Root: {}", location.root);
    Ok(())
}

async fn cmd_sweep(config: &ServerConfig, older_than: Duration) -> Result<()> {
    info!(older_than_secs = older_than.as_secs(), "Sweeping pending uploads");

    let state = AppState::open(config).context("Failed to open storage")?;
    let report = state
        .engine
        .sweep_pending(older_than)
        .await
        .context("Sweep failed")?;

    println!("Removed: {}", report.removed);
    println!("Retained: {}", report.retained);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"listen": "0.0.0.0:1", "window_size": 1024}"#).unwrap();

        let cli = Cli::try_parse_from([
            "corecloud",
            "--config",
            path.to_str().unwrap(),
            "--listen",
            "127.0.0.1:9999",
            "serve",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9999");
        assert_eq!(config.window_size, 1024);
    }

    #[test]
    fn test_defaults_without_config() {
        let cli = Cli::try_parse_from(["corecloud", "sweep", "--database", "/tmp/x.db"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.database, PathBuf::from("/tmp/x.db"));
        assert!(matches!(cli.command, Commands::Sweep { older_than: None }));
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        cmd_init_config(&path).unwrap();
        assert!(ServerConfig::load(&path).is_ok());
        assert!(cmd_init_config(&path).is_err());
    }

    #[tokio::test]
    async fn test_add_location_and_sweep() {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.database = dir.path().join("corecloud.db");
        config.storage_root = dir.path().join("blobs");

        cmd_add_location(&config, "alice", "/disk0").await.unwrap();
        assert!(dir.path().join("blobs").join("disk0").is_dir());
        cmd_sweep(&config, Duration::ZERO).await.unwrap();
    }
}
