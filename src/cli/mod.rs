//! CLI module for Warden
//!
//! - `grants`: list, add and revoke persistent grants
//! - `audit`: show recent audit records
//! - `migrate`: import a legacy JSON grant file
//! - `analyze`: show the paths and hosts a command would be checked for
//! - `wrap`: print (or run) a command inside the sandbox
//! - `proxy`: run the filtering egress proxies

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use warden_core::{PermissionAction, PermissionManager, PolicyStore, PromptChannel};

use crate::settings::{load_config, AppConfig};

pub mod analyze;
pub mod audit;
pub mod grants;
pub mod migrate;
pub mod prompt;
pub mod proxy;
pub mod wrap;

/// Warden CLI
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Permission and sandbox core for coding agents")]
#[command(version)]
pub struct Cli {
    /// Working directory the permission layers are rooted at
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage persistent grants
    Grants {
        #[command(subcommand)]
        command: GrantsCommands,
    },
    /// Show recent audit records
    Audit {
        /// Number of records
        #[arg(long, default_value_t = 50)]
        limit: u32,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Import a legacy JSON grant file
    Migrate {
        /// Legacy file (defaults to permissions.legacy_json)
        path: Option<PathBuf>,
    },
    /// Show the directories and hosts a shell command mentions
    Analyze {
        /// Shell command
        command: String,
    },
    /// Wrap a shell command in the sandbox
    Wrap {
        /// Shell command
        command: String,
        /// Start the proxies and run the wrapped command instead of printing it
        #[arg(long)]
        run: bool,
    },
    /// Run the filtering HTTP and SOCKS5 proxies
    Proxy,
}

#[derive(Subcommand, Debug)]
pub enum GrantsCommands {
    /// List active persistent grants
    List {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a persistent grant
    Add {
        /// fs_read, fs_write or net_connect
        #[arg(value_parser = parse_action)]
        action: PermissionAction,
        /// Directory or host
        resource: String,
    },
    /// Revoke a persistent grant
    Revoke {
        /// fs_read, fs_write or net_connect
        #[arg(value_parser = parse_action)]
        action: PermissionAction,
        /// Directory or host
        resource: String,
    },
}

fn parse_action(value: &str) -> std::result::Result<PermissionAction, String> {
    PermissionAction::parse(value)
        .ok_or_else(|| format!("unknown action '{value}' (fs_read, fs_write, net_connect)"))
}

/// Run the CLI command
pub async fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config()?;
    let cwd = match cli.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let cwd = std::path::absolute(&cwd).context("Failed to resolve working directory")?;

    match command {
        Commands::Grants { command } => grants::run(&config, &cwd, command).await,
        Commands::Audit { limit, json } => audit::run(&config, limit, json).await,
        Commands::Migrate { path } => migrate::run(&config, path).await,
        Commands::Analyze { command } => analyze::run(&command, &cwd),
        Commands::Wrap { command, run } => wrap::run(&config, &cwd, &command, run).await,
        Commands::Proxy => proxy::run(&config, &cwd).await,
    }
}

/// Open the policy store named by the configuration
pub(crate) async fn open_store(config: &AppConfig) -> Result<PolicyStore> {
    let path = config.permissions.db_path();
    PolicyStore::from_path(&path)
        .await
        .with_context(|| format!("Failed to open permission database at {}", path.display()))
}

/// Open the store, run the legacy import once, and build the manager
pub(crate) async fn open_manager(
    config: &AppConfig,
    cwd: &Path,
    prompt: Option<PromptChannel>,
) -> Result<PermissionManager> {
    let store = open_store(config).await?;

    if let Some(legacy) = config.permissions.legacy_json() {
        let migrated = store.migrate_from_json(&legacy).await?;
        if migrated > 0 {
            info!(count = migrated, path = %legacy.display(), "Imported legacy grants");
        }
    }

    let manager = PermissionManager::new(store, config.permissions.manager_config(cwd)).await?;
    Ok(match prompt {
        Some(prompt) => manager.with_prompt(prompt),
        None => manager,
    })
}
