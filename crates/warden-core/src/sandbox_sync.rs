//! Keeps a sandbox provider in step with the write grant set

use crate::error::Result;
use crate::permissions::{PermissionAction, PermissionManager};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_tools::{SandboxConfig, SandboxProvider};

/// Push `manager.sandbox_config(base)` into `provider` on every `fs_write`
/// grant change until `cancel` fires.
///
/// The first push happens before any change arrives. A lagged receiver
/// triggers a full resync, so missed notifications never leave a stale
/// write set behind. `net_connect` changes are ignored: the proxy asks the
/// manager on every connection.
pub async fn sync_sandbox(
    manager: Arc<PermissionManager>,
    provider: Arc<dyn SandboxProvider>,
    base: SandboxConfig,
    cancel: CancellationToken,
) {
    let mut changes = manager.subscribe();
    resync_logged(&manager, provider.as_ref(), &base).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => match change {
                Ok(change) if change.action == PermissionAction::FsWrite => {
                    debug!(resource = %change.resource, kind = ?change.kind, "Write grants changed");
                    resync_logged(&manager, provider.as_ref(), &base).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Grant notifications lagged, resyncing sandbox");
                    resync_logged(&manager, provider.as_ref(), &base).await;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!(backend = provider.name(), "Sandbox sync stopped");
}

async fn resync_logged(
    manager: &PermissionManager,
    provider: &dyn SandboxProvider,
    base: &SandboxConfig,
) {
    if let Err(e) = resync(manager, provider, base).await {
        warn!(backend = provider.name(), error = %e, "Failed to resync sandbox config");
    }
}

async fn resync(
    manager: &PermissionManager,
    provider: &dyn SandboxProvider,
    base: &SandboxConfig,
) -> Result<()> {
    let config = manager.sandbox_config(base.clone()).await?;
    debug!(write_roots = config.allow_write.len(), "Pushing sandbox config");
    provider.update_config(config).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{GrantScope, PermissionGrant, PermissionManagerConfig};
    use crate::store::PolicyStore;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Forwards every pushed config to the test
    struct RecordingProvider {
        pushed: mpsc::UnboundedSender<SandboxConfig>,
    }

    #[async_trait]
    impl SandboxProvider for RecordingProvider {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn wrap_command(&self, command: &str, _cwd: &Path) -> warden_tools::Result<String> {
            Ok(command.to_string())
        }

        async fn update_config(&self, config: SandboxConfig) -> warden_tools::Result<()> {
            let _ = self.pushed.send(config);
            Ok(())
        }

        async fn dispose(&self) -> warden_tools::Result<()> {
            Ok(())
        }
    }

    struct TestContext {
        manager: Arc<PermissionManager>,
        pushed: mpsc::UnboundedReceiver<SandboxConfig>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
        workspace: PathBuf,
        root: PathBuf,
        _dir: TempDir,
    }

    async fn create_test_context() -> TestContext {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let workspace = root.join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();

        let store = PolicyStore::in_memory().await.unwrap();
        let manager = Arc::new(
            PermissionManager::new(store, PermissionManagerConfig::new(&workspace))
                .await
                .unwrap(),
        );
        let (tx, pushed) = mpsc::unbounded_channel();
        let provider: Arc<dyn SandboxProvider> = Arc::new(RecordingProvider { pushed: tx });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sync_sandbox(
            Arc::clone(&manager),
            provider,
            SandboxConfig::default(),
            cancel.clone(),
        ));

        TestContext {
            manager,
            pushed,
            cancel,
            task,
            workspace,
            root,
            _dir: dir,
        }
    }

    async fn next_push(rx: &mut mpsc::UnboundedReceiver<SandboxConfig>) -> SandboxConfig {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no sandbox push")
            .expect("sync task ended")
    }

    fn write_grant(path: &Path, scope: GrantScope) -> PermissionGrant {
        PermissionGrant::new(PermissionAction::FsWrite, path.to_string_lossy(), scope)
    }

    #[tokio::test]
    async fn test_write_grants_reach_provider() {
        let mut ctx = create_test_context().await;

        let initial = next_push(&mut ctx.pushed).await;
        assert_eq!(initial.allow_write, vec![ctx.workspace.clone()]);

        let shared = ctx.root.join("shared");
        ctx.manager
            .grant(write_grant(&shared, GrantScope::Session))
            .await
            .unwrap();
        let granted = next_push(&mut ctx.pushed).await;
        assert_eq!(granted.allow_write, vec![ctx.workspace.clone(), shared.clone()]);

        // Read and network grants do not touch the write set
        ctx.manager
            .grant(PermissionGrant::new(
                PermissionAction::FsRead,
                ctx.root.join("docs").to_string_lossy(),
                GrantScope::Session,
            ))
            .await
            .unwrap();
        ctx.manager
            .grant(PermissionGrant::new(
                PermissionAction::NetConnect,
                "crates.io",
                GrantScope::Session,
            ))
            .await
            .unwrap();

        ctx.manager.clear_session_grants().await;
        let cleared = next_push(&mut ctx.pushed).await;
        assert_eq!(cleared.allow_write, vec![ctx.workspace.clone()]);

        ctx.cancel.cancel();
        ctx.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_persistent_revoke_reaches_provider() {
        let mut ctx = create_test_context().await;
        next_push(&mut ctx.pushed).await;

        let shared = ctx.root.join("shared");
        ctx.manager
            .grant(write_grant(&shared, GrantScope::Persistent))
            .await
            .unwrap();
        assert!(next_push(&mut ctx.pushed)
            .await
            .allow_write
            .contains(&shared));

        assert!(ctx
            .manager
            .revoke_persistent(PermissionAction::FsWrite, &shared.to_string_lossy())
            .await
            .unwrap());
        assert!(!next_push(&mut ctx.pushed)
            .await
            .allow_write
            .contains(&shared));

        ctx.cancel.cancel();
        ctx.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_burst_of_changes_converges() {
        let mut ctx = create_test_context().await;
        next_push(&mut ctx.pushed).await;

        // More changes than the notification channel holds
        let dirs: Vec<PathBuf> = (0..100).map(|i| ctx.root.join(format!("d{i}"))).collect();
        for dir in &dirs {
            ctx.manager
                .grant(write_grant(dir, GrantScope::Session))
                .await
                .unwrap();
        }

        loop {
            let config = next_push(&mut ctx.pushed).await;
            if dirs.iter().all(|d| config.allow_write.contains(d)) {
                break;
            }
        }

        ctx.cancel.cancel();
        ctx.task.await.unwrap();
    }
}
