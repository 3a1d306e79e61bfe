//! Host-side UNIX socket bridges to the filtering proxies
//!
//! A sandbox with `--unshare-net` has no route to the host loopback, so the
//! proxies are reached through UNIX sockets bound into the sandbox. On the
//! host, one `socat` per proxy listens on the socket and forwards to the TCP
//! port; inside, the trampoline script does the reverse.

use super::config::ProxyPorts;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Attempts while waiting for a bridge socket to appear
const SOCKET_WAIT_ATTEMPTS: u32 = 12;
/// First backoff delay; doubles each attempt
const SOCKET_WAIT_INITIAL: Duration = Duration::from_millis(10);
/// Backoff ceiling
const SOCKET_WAIT_MAX: Duration = Duration::from_millis(500);

/// Socket paths of a running bridge pair, as seen from both sides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSockets {
    /// Directory holding both sockets; bound into the sandbox at the same path
    pub dir: PathBuf,
    /// Forwards to the host HTTP proxy
    pub http: PathBuf,
    /// Forwards to the host SOCKS5 proxy
    pub socks: PathBuf,
}

impl BridgeSockets {
    /// Socket layout under `dir`
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            http: dir.join("http.sock"),
            socks: dir.join("socks.sock"),
            dir,
        }
    }
}

/// One `socat` process listening on a UNIX socket
struct SocketBridge {
    child: Child,
    socket: PathBuf,
}

impl SocketBridge {
    async fn spawn(socat: &Path, socket: &Path, port: u16) -> Result<Self> {
        let mut child = Command::new(socat)
            .arg(format!("UNIX-LISTEN:{},fork,unlink-early", socket.display()))
            .arg(format!("TCP:127.0.0.1:{}", port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SandboxInit(format!("failed to start socat bridge: {}", e)))?;

        if let Err(e) = wait_for_socket(&mut child, socket).await {
            let _ = child.kill().await;
            return Err(e);
        }

        debug!(socket = %socket.display(), port, "Socket bridge ready");
        Ok(Self {
            child,
            socket: socket.to_path_buf(),
        })
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(socket = %self.socket.display(), error = %e, "Failed to stop socket bridge");
        }
        let _ = tokio::fs::remove_file(&self.socket).await;
    }
}

async fn wait_for_socket(child: &mut Child, socket: &Path) -> Result<()> {
    let mut delay = SOCKET_WAIT_INITIAL;
    for _ in 0..SOCKET_WAIT_ATTEMPTS {
        if tokio::fs::try_exists(socket).await.unwrap_or(false) {
            return Ok(());
        }
        if let Ok(Some(status)) = child.try_wait() {
            return Err(Error::SandboxInit(format!(
                "socat bridge for {} exited early: {}",
                socket.display(),
                status
            )));
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(SOCKET_WAIT_MAX);
    }
    Err(Error::SandboxInit(format!(
        "socat bridge socket {} did not appear",
        socket.display()
    )))
}

/// Both bridges plus the directory that holds their sockets
pub(crate) struct BridgeSet {
    sockets: BridgeSockets,
    ports: ProxyPorts,
    http: SocketBridge,
    socks: SocketBridge,
}

impl BridgeSet {
    /// Start bridges to `ports` with sockets in a fresh temp directory.
    pub(crate) async fn start(socat: &Path, ports: ProxyPorts) -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("warden-bridge-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;
        let sockets = BridgeSockets::in_dir(&dir);

        let http = match SocketBridge::spawn(socat, &sockets.http, ports.http).await {
            Ok(bridge) => bridge,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&dir).await;
                return Err(e);
            }
        };
        let socks = match SocketBridge::spawn(socat, &sockets.socks, ports.socks).await {
            Ok(bridge) => bridge,
            Err(e) => {
                http.shutdown().await;
                let _ = tokio::fs::remove_dir_all(&dir).await;
                return Err(e);
            }
        };

        info!(dir = %dir.display(), http = ports.http, socks = ports.socks, "Proxy bridges started");
        Ok(Self {
            sockets,
            ports,
            http,
            socks,
        })
    }

    pub(crate) fn sockets(&self) -> &BridgeSockets {
        &self.sockets
    }

    pub(crate) fn ports(&self) -> ProxyPorts {
        self.ports
    }

    pub(crate) async fn shutdown(self) {
        self.http.shutdown().await;
        self.socks.shutdown().await;
        let _ = tokio::fs::remove_dir_all(&self.sockets.dir).await;
        debug!("Proxy bridges stopped");
    }
}
