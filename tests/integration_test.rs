//! Integration tests for Warden
//!
//! These tests verify the integration between the crates:
//! - warden-core: permission manager, policy store, interposer
//! - warden-tools: command analysis, sandbox synthesis, egress proxy

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use warden_core::{
    install, GrantScope, PermissionAction, PermissionFilter, PermissionGrant, PermissionManager,
    PermissionManagerConfig, PolicyStore,
};
use warden_tools::sandbox::build_bwrap_args;
use warden_tools::{
    start_proxies, ProxyPorts, SandboxConfig, Tool, ToolAccess, ToolDefinition, ToolRegistry,
    ToolResult,
};

struct Fixture {
    root: PathBuf,
    workspace: PathBuf,
    db: PathBuf,
    _dir: TempDir,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let workspace = root.join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::create_dir_all(root.join("shared/cache")).unwrap();
    Fixture {
        db: root.join("state/permissions.db"),
        root,
        workspace,
        _dir: dir,
    }
}

async fn open_manager(fx: &Fixture) -> PermissionManager {
    let store = PolicyStore::from_path(&fx.db).await.unwrap();
    PermissionManager::new(store, PermissionManagerConfig::new(&fx.workspace))
        .await
        .unwrap()
}

// ============================================================================
// Grants -> Sandbox
// ============================================================================

#[tokio::test]
async fn test_persistent_write_grant_reaches_sandbox_after_restart() {
    let fx = fixture();
    let shared = fx.root.join("shared");

    {
        let manager = open_manager(&fx).await;
        manager
            .grant(PermissionGrant::new(
                PermissionAction::FsWrite,
                shared.to_string_lossy(),
                GrantScope::Persistent,
            ))
            .await
            .unwrap();
        manager
            .grant(PermissionGrant::new(
                PermissionAction::FsWrite,
                fx.root.join("shared/cache").to_string_lossy(),
                GrantScope::Session,
            ))
            .await
            .unwrap();
        manager.store().close().await;
    }

    // Session grant is gone, persistent grant survives
    let manager = open_manager(&fx).await;
    let config = manager
        .sandbox_config(SandboxConfig::default().with_restrict_network(true))
        .await
        .unwrap();
    assert_eq!(config.allow_write, vec![fx.workspace.clone(), shared.clone()]);

    let args = build_bwrap_args(&config, &fx.workspace, None, None);
    let shared_arg = shared.to_string_lossy().to_string();
    assert!(args
        .windows(3)
        .any(|w| w[0] == "--bind" && w[1] == shared_arg && w[2] == shared_arg));
    assert!(args.iter().any(|a| a == "--unshare-net"));
    assert_eq!(args.last().map(String::as_str), Some("--"));
}

// ============================================================================
// Interposer
// ============================================================================

struct ShellTool {
    definition: ToolDefinition,
    runs: AtomicUsize,
}

#[async_trait::async_trait]
impl Tool for ShellTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _cancel: &CancellationToken,
    ) -> warden_tools::Result<ToolResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::success(input, 0))
    }
}

#[tokio::test]
async fn test_registry_tools_are_gated_by_grants() {
    let fx = fixture();
    let manager = Arc::new(open_manager(&fx).await);

    let shell = Arc::new(ShellTool {
        definition: ToolDefinition::new("bash", "Run a shell command").with_access(ToolAccess::Shell),
        runs: AtomicUsize::new(0),
    });
    let mut registry = ToolRegistry::new();
    registry.register(Arc::clone(&shell) as Arc<dyn Tool>);
    install(&mut registry, Arc::clone(&manager), &fx.workspace);

    let command = format!("ls {}/", fx.root.join("shared").display());
    let cancel = CancellationToken::new();

    let refused = registry
        .execute("bash", json!({"command": command}), &cancel)
        .await
        .unwrap();
    assert!(refused.is_denied());
    assert_eq!(shell.runs.load(Ordering::SeqCst), 0);

    manager
        .grant(PermissionGrant::new(
            PermissionAction::FsRead,
            fx.root.to_string_lossy(),
            GrantScope::Once,
        ))
        .await
        .unwrap();

    let allowed = registry
        .execute("bash", json!({"command": command}), &cancel)
        .await
        .unwrap();
    assert!(allowed.success);
    assert_eq!(shell.runs.load(Ordering::SeqCst), 1);

    // Next turn
    manager.clear_once_grants().await;
    let refused = registry
        .execute("bash", json!({"command": command}), &cancel)
        .await
        .unwrap();
    assert!(refused.is_denied());
}

// ============================================================================
// Egress proxy
// ============================================================================

async fn echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

async fn socks_connect(proxy_port: u16, host: &str, port: u16) -> (TcpStream, u8) {
    let mut stream = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    stream.write_all(&[5, 1, 0]).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [5, 0]);

    let mut request = vec![5, 1, 0, 3, host.len() as u8];
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    (stream, reply[1])
}

#[tokio::test]
async fn test_proxy_follows_network_grants() {
    let fx = fixture();
    let manager = Arc::new(open_manager(&fx).await);
    let target = echo_server().await;

    let cancel = CancellationToken::new();
    let ports = start_proxies(
        Arc::new(PermissionFilter::new(Arc::clone(&manager))),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        ProxyPorts { http: 0, socks: 0 },
        cancel.clone(),
    )
    .await
    .unwrap();

    let (_stream, rep) = socks_connect(ports.socks, "127.0.0.1", target).await;
    assert_eq!(rep, 0x02);

    manager
        .grant(PermissionGrant::new(
            PermissionAction::NetConnect,
            "127.0.0.1",
            GrantScope::Session,
        ))
        .await
        .unwrap();

    let (mut stream, rep) = socks_connect(ports.socks, "127.0.0.1", target).await;
    assert_eq!(rep, 0x00);
    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    cancel.cancel();
}

#[test]
fn test_analysis_feeds_permission_requests() {
    let cwd = Path::new("/work/project");
    let paths = warden_tools::extract_paths_from_command("cat /etc/hosts > ../out.txt", cwd);
    assert_eq!(paths, vec![PathBuf::from("/etc"), PathBuf::from("/work")]);

    let hosts = warden_tools::extract_hosts_from_command("cargo publish && git push");
    assert_eq!(hosts[0], "crates.io");
    assert!(hosts.iter().all(|h| h.ends_with("crates.io")));
}
