//! `warden analyze` - static command analysis

use anyhow::Result;
use std::path::Path;
use warden_tools::{extract_hosts_from_command, extract_paths_from_command};

/// Print what the interposer would ask about for `command`.
pub fn run(command: &str, cwd: &Path) -> Result<()> {
    let paths = extract_paths_from_command(command, cwd);
    let hosts = extract_hosts_from_command(command);

    println!("Directories outside {}:", cwd.display());
    if paths.is_empty() {
        println!("  (none)");
    }
    for path in &paths {
        println!("  {}", path.display());
    }

    println!("Hosts:");
    if hosts.is_empty() {
        println!("  (none)");
    }
    for host in &hosts {
        println!("  {}", host);
    }

    Ok(())
}
