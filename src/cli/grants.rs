//! `warden grants` - persistent grant management

use super::{open_manager, GrantsCommands};
use crate::settings::AppConfig;
use anyhow::Result;
use std::path::Path;
use warden_core::{GrantScope, PermissionGrant};

/// Run a grants subcommand.
pub async fn run(config: &AppConfig, cwd: &Path, cmd: GrantsCommands) -> Result<()> {
    let manager = open_manager(config, cwd, None).await?;

    match cmd {
        GrantsCommands::List { json } => {
            let grants = manager.get_persistent_grants().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&grants)?);
                return Ok(());
            }
            if grants.is_empty() {
                println!("No persistent grants.");
                return Ok(());
            }
            println!("{:<12} {:<20} {}", "ACTION", "GRANTED", "RESOURCE");
            for grant in &grants {
                println!(
                    "{:<12} {:<20} {}",
                    grant.action,
                    grant.granted_at.format("%Y-%m-%d %H:%M:%S"),
                    grant.resource
                );
            }
        }
        GrantsCommands::Add { action, resource } => {
            let grant = PermissionGrant::new(action, resource, GrantScope::Persistent)
                .with_tool_name("cli");
            let grant = manager.grant(grant).await?;
            println!("Granted {} on {}", grant.action, grant.resource);
        }
        GrantsCommands::Revoke { action, resource } => {
            if manager.revoke_persistent(action, &resource).await? {
                println!("Revoked {} on {}", action, resource);
            } else {
                println!("No active {} grant on {}", action, resource);
            }
        }
    }

    manager.store().close().await;
    Ok(())
}
