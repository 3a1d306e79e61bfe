//! Configuration types

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use warden_core::PermissionManagerConfig;
use warden_tools::{ProxyPorts, SandboxConfig};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Permission store and static layers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub legacy_json: Option<PathBuf>,
    #[serde(default)]
    pub pre_allowed_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub workspace_roots: Vec<PathBuf>,
    #[serde(default)]
    pub safe_files: Vec<PathBuf>,
    /// 0 waits forever
    #[serde(default)]
    pub prompt_timeout_secs: u64,
}

/// Host-side egress proxies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default)]
    pub http_port: u16,
    #[serde(default)]
    pub socks_port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            http_port: 0,
            socks_port: 0,
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl ProxyConfig {
    pub fn ports(&self) -> ProxyPorts {
        ProxyPorts {
            http: self.http_port,
            socks: self.socks_port,
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn expand_all(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths.iter().map(|p| expand_home(p)).collect()
}

impl PermissionsConfig {
    /// Database location, defaulting under the platform data dir
    pub fn db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => expand_home(path),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("warden")
                .join("permissions.db"),
        }
    }

    pub fn legacy_json(&self) -> Option<PathBuf> {
        self.legacy_json.as_deref().map(expand_home)
    }

    /// Manager config rooted at `cwd`
    pub fn manager_config(&self, cwd: &Path) -> PermissionManagerConfig {
        PermissionManagerConfig {
            cwd: cwd.to_path_buf(),
            workspace_roots: expand_all(&self.workspace_roots),
            safe_files: expand_all(&self.safe_files),
            pre_allowed_dirs: expand_all(&self.pre_allowed_dirs),
            prompt_timeout: (self.prompt_timeout_secs > 0)
                .then(|| Duration::from_secs(self.prompt_timeout_secs)),
        }
    }
}

impl AppConfig {
    /// Sandbox settings with `~` expanded in every path list
    pub fn sandbox_config(&self) -> SandboxConfig {
        let mut sandbox = self.sandbox.clone();
        sandbox.allow_write = expand_all(&sandbox.allow_write);
        sandbox.deny_write = expand_all(&sandbox.deny_write);
        sandbox.deny_read = expand_all(&sandbox.deny_read);
        sandbox.container_mounts = expand_all(&sandbox.container_mounts);
        sandbox
    }
}
