//! Sandbox configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which enforcement backend wraps commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    /// Pick by platform: bubblewrap on Linux, Seatbelt on macOS, container
    /// mode when running inside a container with mounts configured
    #[default]
    Auto,
    /// Linux user namespaces via `bwrap`
    Bubblewrap,
    /// macOS `sandbox-exec` profiles
    Seatbelt,
    /// Already inside a container; the container is the boundary
    Container,
}

impl SandboxBackend {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Bubblewrap => "bubblewrap",
            Self::Seatbelt => "seatbelt",
            Self::Container => "container",
        }
    }
}

/// Host-side ports of the filtering proxies sandboxed traffic is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPorts {
    /// HTTP CONNECT proxy port on the host loopback
    pub http: u16,
    /// SOCKS5 proxy port on the host loopback
    pub socks: u16,
}

/// What a wrapped command may touch
///
/// The write set and the read-deny set are snapshots of the current grants;
/// callers push a fresh one through `SandboxProvider::update_config`
/// whenever grants change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Enforcement backend
    pub backend: SandboxBackend,
    /// Directories the command may write (everything else is read-only)
    pub allow_write: Vec<PathBuf>,
    /// Paths that stay read-only even inside `allow_write`
    pub deny_write: Vec<PathBuf>,
    /// Paths hidden from the command entirely
    pub deny_read: Vec<PathBuf>,
    /// Cut the network namespace and route egress through the proxies
    pub restrict_network: bool,
    /// Filtering proxy ports; `None` with `restrict_network` means no egress at all
    pub proxy: Option<ProxyPorts>,
    /// Leave `.git/config` writable inside write roots
    pub allow_git_config: bool,
    /// Mount a fresh `/proc` (breaks when already nested in a sandbox)
    pub mount_proc: bool,
    /// Shell that runs the command
    pub shell: String,
    /// Paths mounted into the container (container backend only)
    pub container_mounts: Vec<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Auto,
            allow_write: Vec::new(),
            deny_write: Vec::new(),
            deny_read: Vec::new(),
            restrict_network: true,
            proxy: None,
            allow_git_config: false,
            mount_proc: true,
            shell: default_shell(),
            container_mounts: Vec::new(),
        }
    }
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

impl SandboxConfig {
    /// Set the writable directories
    #[must_use]
    pub fn with_allow_write(mut self, paths: Vec<PathBuf>) -> Self {
        self.allow_write = paths;
        self
    }

    /// Set the read-denied paths
    #[must_use]
    pub fn with_deny_read(mut self, paths: Vec<PathBuf>) -> Self {
        self.deny_read = paths;
        self
    }

    /// Set the proxy ports
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyPorts) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set whether network is restricted
    #[must_use]
    pub fn with_restrict_network(mut self, restrict: bool) -> Self {
        self.restrict_network = restrict;
        self
    }

    /// Whether wrapped commands need the host-side socket bridges
    #[must_use]
    pub fn needs_bridges(&self) -> bool {
        self.restrict_network && self.proxy.is_some()
    }
}
