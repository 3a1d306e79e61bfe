//! macOS backend: Seatbelt profiles via `sandbox-exec`
//!
//! Same contract as the bubblewrap backend. Writes are denied except under
//! the write roots, the mandatory list stays read-only, denied reads are
//! blocked, and with a restricted network only the proxy ports on the
//! loopback are reachable (proxy variables point there).

use super::config::SandboxConfig;
use super::policy::mandatory_deny_paths;
use super::provider::SandboxProvider;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Wraps commands in `sandbox-exec -p <profile>`
pub struct SeatbeltSandbox {
    sandbox_exec: PathBuf,
    config: RwLock<SandboxConfig>,
}

impl SeatbeltSandbox {
    /// Create the provider, failing if `sandbox-exec` is unavailable.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let sandbox_exec = which::which("sandbox-exec").map_err(|_| {
            Error::MissingDependency("sandbox-exec is required for sandboxing on macOS".to_string())
        })?;
        Ok(Self {
            sandbox_exec,
            config: RwLock::new(config),
        })
    }
}

#[async_trait]
impl SandboxProvider for SeatbeltSandbox {
    fn name(&self) -> &'static str {
        "seatbelt"
    }

    #[instrument(skip(self, command), fields(cwd = %cwd.display()))]
    async fn wrap_command(&self, command: &str, cwd: &Path) -> Result<String> {
        let config = self.config.read().await.clone();
        for path in &config.allow_write {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                tokio::fs::create_dir_all(path).await?;
            }
        }

        let profile = seatbelt_profile(&config, dirs::home_dir().as_deref());
        let mut argv: Vec<String> = Vec::new();
        if let Some(ports) = config.proxy.filter(|_| config.restrict_network) {
            argv.push("env".to_string());
            let http = format!("http://127.0.0.1:{}", ports.http);
            let socks = format!("socks5h://127.0.0.1:{}", ports.socks);
            for var in ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"] {
                argv.push(format!("{}={}", var, http));
            }
            for var in ["ALL_PROXY", "all_proxy"] {
                argv.push(format!("{}={}", var, socks));
            }
        }
        argv.push(self.sandbox_exec.to_string_lossy().into_owned());
        argv.push("-p".to_string());
        argv.push(profile);
        argv.push(config.shell.clone());
        argv.push("-c".to_string());
        argv.push(format!("cd {} && {}", shell_escape::escape(cwd.to_string_lossy()), command));

        debug!("Wrapped command with Seatbelt profile");
        Ok(super::bwrap::join_shell_words(&argv))
    }

    async fn update_config(&self, config: SandboxConfig) -> Result<()> {
        *self.config.write().await = config;
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

/// Seatbelt profile text for `config`
#[must_use]
pub fn seatbelt_profile(config: &SandboxConfig, home: Option<&Path>) -> String {
    let mut profile = String::from("(version 1)\n(allow default)\n\n");

    profile.push_str("(deny file-write*)\n");
    profile.push_str("(allow file-write* (subpath \"/dev\") (subpath \"/private/var/folders\"))\n");
    for path in &config.allow_write {
        profile.push_str(&format!("(allow file-write* (subpath {}))\n", quote(path)));
    }

    let mut read_only = mandatory_deny_paths(&config.allow_write, home, config.allow_git_config);
    read_only.extend(config.deny_write.iter().cloned());
    for path in &read_only {
        profile.push_str(&format!(
            "(deny file-write* (literal {p}) (subpath {p}))\n",
            p = quote(path)
        ));
    }

    for path in &config.deny_read {
        profile.push_str(&format!(
            "(deny file-read* (literal {p}) (subpath {p}))\n",
            p = quote(path)
        ));
    }

    if config.restrict_network {
        profile.push_str("\n(deny network*)\n");
        profile.push_str("(allow network* (local unix-socket))\n");
        if let Some(ports) = config.proxy {
            for port in [ports.http, ports.socks] {
                profile.push_str(&format!(
                    "(allow network-outbound (remote tcp \"localhost:{}\"))\n",
                    port
                ));
            }
        }
    }
    profile
}

fn quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}
