//! Linux backend: bubblewrap namespaces
//!
//! The root filesystem is bound read-only and only the granted write roots
//! are re-bound writable on top. Mount order matters: later mounts shadow
//! earlier ones, so read-only overlays inside write roots come after the
//! write binds, and hidden paths come last.

use super::bridge::{BridgeSet, BridgeSockets};
use super::config::SandboxConfig;
use super::policy::mandatory_deny_paths;
use super::provider::SandboxProvider;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

/// Inner loopback port the HTTP bridge listens on
pub const SANDBOX_HTTP_PORT: u16 = 3128;
/// Inner loopback port the SOCKS bridge listens on
pub const SANDBOX_SOCKS_PORT: u16 = 1080;

/// Wraps commands in `bwrap`
pub struct BubblewrapSandbox {
    bwrap: PathBuf,
    socat: Option<PathBuf>,
    config: RwLock<SandboxConfig>,
    bridges: Mutex<Option<BridgeSet>>,
}

impl BubblewrapSandbox {
    /// Create the provider, failing if `bwrap` (or `socat`, when the proxy
    /// bridges will be needed) is not installed.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let bwrap = which::which("bwrap").map_err(|_| {
            Error::MissingDependency("bwrap (bubblewrap) is required for sandboxing".to_string())
        })?;
        let socat = find_socat(&config)?;
        info!(bwrap = %bwrap.display(), "Bubblewrap sandbox ready");
        Ok(Self {
            bwrap,
            socat,
            config: RwLock::new(config),
            bridges: Mutex::new(None),
        })
    }

    /// Start or restart host bridges so they match the config's proxy ports.
    async fn ensure_bridges(&self, config: &SandboxConfig) -> Result<Option<BridgeSockets>> {
        let mut guard = self.bridges.lock().await;
        let Some(ports) = config.proxy.filter(|_| config.needs_bridges()) else {
            if let Some(old) = guard.take() {
                old.shutdown().await;
            }
            return Ok(None);
        };

        if let Some(existing) = guard.as_ref() {
            if existing.ports() == ports {
                return Ok(Some(existing.sockets().clone()));
            }
        }
        if let Some(old) = guard.take() {
            old.shutdown().await;
        }

        let socat = self
            .socat
            .as_deref()
            .ok_or_else(|| Error::MissingDependency("socat is required for network filtering".to_string()))?;
        let set = BridgeSet::start(socat, ports).await?;
        let sockets = set.sockets().clone();
        *guard = Some(set);
        Ok(Some(sockets))
    }
}

fn find_socat(config: &SandboxConfig) -> Result<Option<PathBuf>> {
    match which::which("socat") {
        Ok(path) => Ok(Some(path)),
        Err(_) if config.needs_bridges() => Err(Error::MissingDependency(
            "socat is required for network filtering".to_string(),
        )),
        Err(_) => Ok(None),
    }
}

#[async_trait]
impl SandboxProvider for BubblewrapSandbox {
    fn name(&self) -> &'static str {
        "bubblewrap"
    }

    #[instrument(skip(self, command), fields(cwd = %cwd.display()))]
    async fn wrap_command(&self, command: &str, cwd: &Path) -> Result<String> {
        let config = self.config.read().await.clone();

        for path in &config.allow_write {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                debug!(path = %path.display(), "Creating missing write root");
                tokio::fs::create_dir_all(path).await?;
            }
        }

        let bridges = self.ensure_bridges(&config).await?;
        let home = dirs::home_dir();
        let mut argv = vec![self.bwrap.to_string_lossy().into_owned()];
        argv.extend(build_bwrap_args(&config, cwd, home.as_deref(), bridges.as_ref()));
        argv.push(config.shell.clone());
        argv.push("-c".to_string());
        argv.push(trampoline_script(command, &config.shell, bridges.as_ref()));

        Ok(join_shell_words(&argv))
    }

    async fn update_config(&self, config: SandboxConfig) -> Result<()> {
        if config.needs_bridges() && self.socat.is_none() {
            return Err(Error::MissingDependency(
                "socat is required for network filtering".to_string(),
            ));
        }
        debug!(
            write_roots = config.allow_write.len(),
            restrict_network = config.restrict_network,
            "Sandbox config updated"
        );
        *self.config.write().await = config;
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        if let Some(set) = self.bridges.lock().await.take() {
            set.shutdown().await;
        }
        Ok(())
    }
}

/// `bwrap` arguments for `config`, up to but excluding the command itself.
///
/// Touches the filesystem only to tell denied files from denied directories.
#[must_use]
pub fn build_bwrap_args(
    config: &SandboxConfig,
    cwd: &Path,
    home: Option<&Path>,
    bridges: Option<&BridgeSockets>,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut push = |parts: &[&str]| args.extend(parts.iter().map(|p| (*p).to_string()));

    push(&["--ro-bind", "/", "/"]);
    push(&["--dev", "/dev"]);
    if config.mount_proc {
        push(&["--proc", "/proc"]);
    }

    for path in &config.allow_write {
        let p = path.to_string_lossy();
        push(&["--bind", &*p, &*p]);
    }

    let mut read_only = mandatory_deny_paths(&config.allow_write, home, config.allow_git_config);
    for path in &config.deny_write {
        if !read_only.contains(path) {
            read_only.push(path.clone());
        }
    }
    for path in &read_only {
        let p = path.to_string_lossy();
        push(&["--ro-bind-try", &*p, &*p]);
    }

    for path in &config.deny_read {
        let p = path.to_string_lossy();
        if path.is_dir() {
            push(&["--tmpfs", &*p]);
        } else if path.exists() {
            push(&["--ro-bind", "/dev/null", &*p]);
        }
    }

    push(&["--unshare-pid", "--die-with-parent", "--new-session"]);

    if config.restrict_network {
        push(&["--unshare-net"]);
        if let Some(bridges) = bridges {
            let dir = bridges.dir.to_string_lossy();
            push(&["--bind", &*dir, &*dir]);
            let http = format!("http://127.0.0.1:{}", SANDBOX_HTTP_PORT);
            let socks = format!("socks5h://127.0.0.1:{}", SANDBOX_SOCKS_PORT);
            for var in ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"] {
                push(&["--setenv", var, http.as_str()]);
            }
            for var in ["ALL_PROXY", "all_proxy"] {
                push(&["--setenv", var, socks.as_str()]);
            }
            for var in ["NO_PROXY", "no_proxy"] {
                push(&["--setenv", var, "localhost,127.0.0.1,::1"]);
            }
        }
    }

    let cwd = cwd.to_string_lossy();
    push(&["--chdir", &*cwd, "--"]);
    args
}

/// Script run by the sandboxed shell.
///
/// With bridges it starts the inner `socat` listeners, arranges for them to
/// die with the script, and runs the command in a child shell so the trap
/// fires. Without bridges it is the command itself.
#[must_use]
pub fn trampoline_script(command: &str, shell: &str, bridges: Option<&BridgeSockets>) -> String {
    let Some(bridges) = bridges else {
        return command.to_string();
    };
    let http_path = bridges.http.to_string_lossy();
    let socks_path = bridges.socks.to_string_lossy();
    let http = escape(&http_path);
    let socks = escape(&socks_path);
    format!(
        "socat TCP-LISTEN:{hp},bind=127.0.0.1,fork,reuseaddr UNIX-CONNECT:{http} >/dev/null 2>&1 &\n\
         socat TCP-LISTEN:{sp},bind=127.0.0.1,fork,reuseaddr UNIX-CONNECT:{socks} >/dev/null 2>&1 &\n\
         trap 'kill $(jobs -p) 2>/dev/null' EXIT\n\
         {shell} -c {command}\n",
        hp = SANDBOX_HTTP_PORT,
        sp = SANDBOX_SOCKS_PORT,
        shell = escape(shell),
        command = escape(command),
    )
}

fn escape(word: &str) -> Cow<'_, str> {
    shell_escape::escape(Cow::Borrowed(word))
}

pub(crate) fn join_shell_words(words: &[String]) -> String {
    words
        .iter()
        .map(|w| escape(w))
        .collect::<Vec<_>>()
        .join(" ")
}
