//! OS Sandbox - kernel-enforced restrictions for shell commands
//!
//! Permission checks decide what a command *should* touch; the sandbox makes
//! that binding for whatever the command actually does. Backends:
//! - Bubblewrap: Linux namespaces (canonical)
//! - Seatbelt: macOS `sandbox-exec` profiles
//! - Container: pass-through when a container is already the boundary
//!
//! Initialization failure is an error. There is no unsandboxed fallback.

mod bridge;
mod bwrap;
mod config;
mod container;
mod policy;
mod provider;
mod seatbelt;


pub use bridge::BridgeSockets;
pub use bwrap::{
    build_bwrap_args, trampoline_script, BubblewrapSandbox, SANDBOX_HTTP_PORT, SANDBOX_SOCKS_PORT,
};
pub use config::{ProxyPorts, SandboxBackend, SandboxConfig};
pub use container::ContainerSandbox;
pub use policy::{mandatory_deny_paths, MANDATORY_DENY_HOME, MANDATORY_DENY_WORKSPACE};
pub use provider::SandboxProvider;
pub use seatbelt::{seatbelt_profile, SeatbeltSandbox};

use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// Build the provider `config.backend` asks for.
///
/// `Auto` picks the container backend when running inside a container with
/// mounts configured, then the platform's native backend.
pub fn select_provider(config: SandboxConfig) -> Result<Arc<dyn SandboxProvider>> {
    info!(backend = config.backend.as_str(), "Selecting sandbox backend");
    let provider: Arc<dyn SandboxProvider> = match config.backend {
        SandboxBackend::Bubblewrap => Arc::new(BubblewrapSandbox::new(config)?),
        SandboxBackend::Seatbelt => Arc::new(SeatbeltSandbox::new(config)?),
        SandboxBackend::Container => Arc::new(ContainerSandbox::new(&config)),
        SandboxBackend::Auto => {
            let backend = detect_backend(&config)?;
            return select_provider(SandboxConfig { backend, ..config });
        }
    };
    Ok(provider)
}

fn detect_backend(config: &SandboxConfig) -> Result<SandboxBackend> {
    if !config.container_mounts.is_empty() && ContainerSandbox::detect() {
        Ok(SandboxBackend::Container)
    } else if cfg!(target_os = "macos") {
        Ok(SandboxBackend::Seatbelt)
    } else if cfg!(target_os = "linux") {
        Ok(SandboxBackend::Bubblewrap)
    } else {
        Err(Error::SandboxInit(format!(
            "no sandbox backend for {}",
            std::env::consts::OS
        )))
    }
}
