//! `warden audit` - recent audit records

use super::open_store;
use crate::settings::AppConfig;
use anyhow::Result;

/// Print the most recent audit records, newest first.
pub async fn run(config: &AppConfig, limit: u32, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let entries = store.recent_audit(limit).await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        let mut line = format!(
            "{}  {:<9} {:<11} {:<9} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.event.as_str(),
            entry.action,
            entry.result,
            entry.resource
        );
        if let Some(tool) = &entry.tool_name {
            line.push_str(&format!("  tool={}", tool));
        }
        if let Some(scope) = entry.scope {
            line.push_str(&format!("  scope={}", scope));
        }
        if let Some(reason) = &entry.reason {
            line.push_str(&format!("  reason={}", reason));
        }
        if let Some(message) = &entry.user_message {
            line.push_str(&format!("  message={:?}", message));
        }
        println!("{}", line);
    }

    Ok(())
}
