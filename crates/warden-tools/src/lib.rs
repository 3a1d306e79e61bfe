//! Warden Tools - Tool registry, command analysis, sandbox and egress proxy
//!
//! This crate provides the enforcement side of Warden:
//! - Registry: Tool registration and execution
//! - Analysis: Static path and host extraction from shell commands
//! - Sandbox: OS-level command wrapping (bubblewrap, Seatbelt, container)
//! - Proxy: Filtering SOCKS5 and HTTP egress proxies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod analysis;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod sandbox;

pub use analysis::{extract_hosts_from_command, extract_hosts_from_text, extract_paths_from_command};
pub use error::{Error, Result};
pub use proxy::{start_proxies, ConnectionFilter, HttpProxy, Socks5Proxy};
pub use registry::{Tool, ToolAccess, ToolDefinition, ToolRegistry, ToolResult};
pub use sandbox::{select_provider, ProxyPorts, SandboxBackend, SandboxConfig, SandboxProvider};
