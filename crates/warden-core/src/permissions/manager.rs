//! Permission Manager
//!
//! The policy decision point. Resolves every access against the grant
//! layers, escalates undecided requests to the prompt channel, owns the
//! once/session grant maps and audits everything through the store.

use super::paths::{normalize_host, path_key, resolve_path};
use super::prompt::PromptChannel;
use super::types::{
    AuditEntry, AuditEvent, CheckResult, DenialReason, GrantChange, GrantChangeKind, GrantScope,
    GrantSource, GrantType, PermissionAction, PermissionGrant, PermissionOutcome,
    PermissionRequest, PromptDecision,
};
use crate::error::{Error, Result};
use crate::store::PolicyStore;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use warden_tools::SandboxConfig;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Static layers and prompt settings for a [`PermissionManager`]
#[derive(Debug, Clone, Default)]
pub struct PermissionManagerConfig {
    /// Working directory; always readable and writable
    pub cwd: PathBuf,
    /// Extra always-granted roots (e.g. the git common dir of a worktree)
    pub workspace_roots: Vec<PathBuf>,
    /// Individually whitelisted files
    pub safe_files: Vec<PathBuf>,
    /// Operator-configured directories granted for every action
    pub pre_allowed_dirs: Vec<PathBuf>,
    /// Upper bound on how long a prompt may stay unanswered
    pub prompt_timeout: Option<Duration>,
}

impl PermissionManagerConfig {
    /// Config rooted at `cwd` with no other layers
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            ..Self::default()
        }
    }

    /// Add a workspace root
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_roots.push(root.into());
        self
    }

    /// Add a safe file
    #[must_use]
    pub fn with_safe_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.safe_files.push(file.into());
        self
    }

    /// Add a pre-allowed directory
    #[must_use]
    pub fn with_pre_allowed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pre_allowed_dirs.push(dir.into());
        self
    }

    /// Set the prompt timeout
    #[must_use]
    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = Some(timeout);
        self
    }
}

/// Layered permission resolution with prompting and audit
pub struct PermissionManager {
    store: PolicyStore,
    cwd: PathBuf,
    workspace_roots: Vec<PathBuf>,
    safe_files: Vec<PathBuf>,
    pre_allowed_dirs: Vec<PathBuf>,
    once: RwLock<Vec<PermissionGrant>>,
    session: RwLock<Vec<PermissionGrant>>,
    prompt: Option<PromptChannel>,
    prompt_timeout: Option<Duration>,
    changes: broadcast::Sender<GrantChange>,
}

impl PermissionManager {
    /// Create a manager that owns `store`.
    ///
    /// Every configured path is resolved once here; pre-allowed directories
    /// are also recorded in the store.
    pub async fn new(store: PolicyStore, config: PermissionManagerConfig) -> Result<Self> {
        if !config.cwd.is_absolute() {
            return Err(Error::InvalidPath(format!(
                "working directory must be absolute: {}",
                config.cwd.display()
            )));
        }

        let cwd = resolve_path(&config.cwd, &config.cwd);
        let resolve_all = |paths: &[PathBuf]| -> Vec<PathBuf> {
            paths.iter().map(|p| resolve_path(p, &cwd)).collect()
        };
        let workspace_roots = resolve_all(&config.workspace_roots);
        let safe_files = resolve_all(&config.safe_files);
        let pre_allowed_dirs = resolve_all(&config.pre_allowed_dirs);

        for dir in &pre_allowed_dirs {
            store.add_pre_allowed_dir(dir).await?;
        }

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        debug!(
            cwd = %cwd.display(),
            workspace_roots = workspace_roots.len(),
            safe_files = safe_files.len(),
            pre_allowed_dirs = pre_allowed_dirs.len(),
            "Permission manager ready"
        );

        Ok(Self {
            store,
            cwd,
            workspace_roots,
            safe_files,
            pre_allowed_dirs,
            once: RwLock::new(Vec::new()),
            session: RwLock::new(Vec::new()),
            prompt: None,
            prompt_timeout: config.prompt_timeout,
            changes,
        })
    }

    /// Attach the prompt channel. Without one, undecided requests are denied.
    #[must_use]
    pub fn with_prompt(mut self, prompt: PromptChannel) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    /// Resolved working directory
    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Receive a [`GrantChange`] for every `fs_write` or `net_connect` change
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GrantChange> {
        self.changes.subscribe()
    }

    // ------------------------------------------------------------------
    // Non-prompting checks
    // ------------------------------------------------------------------

    /// Check access to a directory without prompting
    pub async fn check_directory(
        &self,
        path: &Path,
        action: PermissionAction,
    ) -> Result<CheckResult> {
        let dir = resolve_path(path, &self.cwd);
        let result = self.resolve_directory(&dir, action).await?;
        self.audit_check(action, &path_key(&dir), None, result).await?;
        Ok(result)
    }

    /// Check access to a single file without prompting.
    ///
    /// The file itself is matched against the cwd, workspace and safe-file
    /// layers before falling back to a directory check on its parent.
    pub async fn check_file(&self, path: &Path, action: PermissionAction) -> Result<CheckResult> {
        let file = resolve_path(path, &self.cwd);
        let result = self.resolve_file(&file, action).await?;
        self.audit_check(action, &path_key(&file), None, result).await?;
        Ok(result)
    }

    /// Check an outbound connection to `host` without prompting
    pub async fn check_network(&self, host: &str) -> Result<CheckResult> {
        let host = normalize_host(host);
        let result = self.resolve_network(&host).await?;
        self.audit_check(PermissionAction::NetConnect, &host, None, result)
            .await?;
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Prompting requests
    // ------------------------------------------------------------------

    /// Request access to a directory, prompting if no layer grants it
    #[instrument(skip(self, path, cancel), fields(path = %path.display()))]
    pub async fn request_directory(
        &self,
        path: &Path,
        action: PermissionAction,
        tool_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PermissionOutcome> {
        let dir = resolve_path(path, &self.cwd);
        let resource = path_key(&dir);

        let checked = self.resolve_directory(&dir, action).await?;
        self.audit_check(action, &resource, tool_name, checked).await?;
        if let CheckResult::Granted { source } = checked {
            return Ok(PermissionOutcome::Granted { source });
        }

        self.escalate(action, resource, dir.is_dir(), tool_name, cancel)
            .await
    }

    /// Request access to a single file, prompting for its parent directory
    /// if no layer grants it
    #[instrument(skip(self, path, cancel), fields(path = %path.display()))]
    pub async fn request_file(
        &self,
        path: &Path,
        action: PermissionAction,
        tool_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PermissionOutcome> {
        let file = resolve_path(path, &self.cwd);

        let checked = self.resolve_file(&file, action).await?;
        self.audit_check(action, &path_key(&file), tool_name, checked)
            .await?;
        if let CheckResult::Granted { source } = checked {
            return Ok(PermissionOutcome::Granted { source });
        }

        // Grants are per directory; a new file in an existing directory is fine
        let dir = file.parent().map_or_else(|| file.clone(), Path::to_path_buf);
        self.escalate(action, path_key(&dir), dir.is_dir(), tool_name, cancel)
            .await
    }

    /// Request an outbound connection to `host`, prompting if not granted
    #[instrument(skip(self, cancel))]
    pub async fn request_network(
        &self,
        host: &str,
        tool_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PermissionOutcome> {
        let host = normalize_host(host);
        let action = PermissionAction::NetConnect;

        let checked = self.resolve_network(&host).await?;
        self.audit_check(action, &host, tool_name, checked).await?;
        if let CheckResult::Granted { source } = checked {
            return Ok(PermissionOutcome::Granted { source });
        }

        self.escalate(action, host, true, tool_name, cancel).await
    }

    async fn escalate(
        &self,
        action: PermissionAction,
        resource: String,
        target_exists: bool,
        tool_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PermissionOutcome> {
        let Some(prompt) = &self.prompt else {
            return self
                .deny(action, &resource, tool_name, DenialReason::NoPrompt, None)
                .await;
        };
        if !target_exists {
            return self
                .deny(action, &resource, tool_name, DenialReason::PathNotFound, None)
                .await;
        }

        let request = PermissionRequest {
            grant_type: action.grant_type(),
            action,
            detail: resource.clone(),
            tool_name: tool_name.map(str::to_string),
            description: describe(action, &resource, tool_name),
        };

        self.store
            .log_audit(
                &AuditEntry::new(AuditEvent::Prompt, action, resource.as_str(), "pending")
                    .with_tool_name(tool_name),
            )
            .await?;

        debug!(action = %action, resource = %resource, "Prompting for permission");

        match prompt.ask(request, cancel, self.prompt_timeout).await {
            Ok(PromptDecision::Allow { scope }) => {
                let mut grant = PermissionGrant::new(action, resource, scope);
                grant.tool_name = tool_name.map(str::to_string);
                self.grant(grant).await?;
                Ok(PermissionOutcome::Granted {
                    source: scope.into(),
                })
            }
            Ok(PromptDecision::Deny { user_message }) => {
                self.deny(
                    action,
                    &resource,
                    tool_name,
                    DenialReason::UserDenied,
                    user_message,
                )
                .await
            }
            Err(reason) => self.deny(action, &resource, tool_name, reason, None).await,
        }
    }

    async fn deny(
        &self,
        action: PermissionAction,
        resource: &str,
        tool_name: Option<&str>,
        reason: DenialReason,
        user_message: Option<String>,
    ) -> Result<PermissionOutcome> {
        info!(
            action = %action,
            resource = %resource,
            reason = reason.as_str(),
            "Permission denied"
        );

        self.store
            .log_audit(
                &AuditEntry::new(AuditEvent::Deny, action, resource, "denied")
                    .with_tool_name(tool_name)
                    .with_reason(reason.as_str())
                    .with_user_message(user_message.clone()),
            )
            .await?;

        Ok(PermissionOutcome::Denied {
            reason,
            user_message,
        })
    }

    // ------------------------------------------------------------------
    // Grant lifecycle
    // ------------------------------------------------------------------

    /// Record a grant at its scope.
    ///
    /// Directory resources are resolved against the cwd and host resources
    /// are lowercased before storage. Granting the same
    /// `(type, action, resource, scope)` again replaces the earlier grant.
    pub async fn grant(&self, mut grant: PermissionGrant) -> Result<PermissionGrant> {
        grant.grant_type = grant.action.grant_type();
        grant.resource = match grant.grant_type {
            GrantType::Directory => path_key(&resolve_path(Path::new(&grant.resource), &self.cwd)),
            GrantType::Network => normalize_host(&grant.resource),
        };
        grant.revoked_at = None;

        match grant.scope {
            GrantScope::Once => upsert(&self.once, grant.clone()).await,
            GrantScope::Session => upsert(&self.session, grant.clone()).await,
            GrantScope::Persistent => {
                grant.id = Some(self.store.insert_grant(&grant).await?);
            }
        }

        self.store
            .log_audit(
                &AuditEntry::new(
                    AuditEvent::Grant,
                    grant.action,
                    grant.resource.as_str(),
                    "granted",
                )
                .with_tool_name(grant.tool_name.as_deref())
                .with_scope(grant.scope),
            )
            .await?;

        info!(
            action = %grant.action,
            resource = %grant.resource,
            scope = %grant.scope,
            "Permission granted"
        );

        self.notify(GrantChangeKind::Granted, &grant);
        Ok(grant)
    }

    /// Soft-delete a persistent grant. Returns `false` if none was active.
    pub async fn revoke_persistent(
        &self,
        action: PermissionAction,
        resource: &str,
    ) -> Result<bool> {
        let resource = match action.grant_type() {
            GrantType::Directory => path_key(&resolve_path(Path::new(resource), &self.cwd)),
            GrantType::Network => normalize_host(resource),
        };

        let revoked = self.store.revoke_grant(action, &resource).await?;

        self.store
            .log_audit(
                &AuditEntry::new(
                    AuditEvent::Revoke,
                    action,
                    resource.as_str(),
                    if revoked { "revoked" } else { "not_found" },
                )
                .with_scope(GrantScope::Persistent),
            )
            .await?;

        if revoked {
            info!(action = %action, resource = %resource, "Persistent grant revoked");
            let _ = self.changes.send(GrantChange {
                kind: GrantChangeKind::Revoked,
                action,
                resource,
                scope: GrantScope::Persistent,
            });
        }
        Ok(revoked)
    }

    /// Every active persistent grant
    pub async fn get_persistent_grants(&self) -> Result<Vec<PermissionGrant>> {
        Ok(self.store.find_all_active_grants(None).await?)
    }

    /// Drop every once-scope grant (end of an agent turn)
    pub async fn clear_once_grants(&self) {
        let cleared = std::mem::take(&mut *self.once.write().await);
        self.notify_cleared(&cleared);
    }

    /// Drop every session-scope grant
    pub async fn clear_session_grants(&self) {
        let cleared = std::mem::take(&mut *self.session.write().await);
        self.notify_cleared(&cleared);
    }

    fn notify_cleared(&self, cleared: &[PermissionGrant]) {
        if !cleared.is_empty() {
            debug!(count = cleared.len(), "Cleared in-memory grants");
        }
        for grant in cleared {
            self.notify(GrantChangeKind::Cleared, grant);
        }
    }

    fn notify(&self, kind: GrantChangeKind, grant: &PermissionGrant) {
        if !grant.action.affects_enforcement() {
            return;
        }
        // No subscribers is fine
        let _ = self.changes.send(GrantChange {
            kind,
            action: grant.action,
            resource: grant.resource.clone(),
            scope: grant.scope,
        });
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Directories currently writable: cwd, workspace roots, pre-allowed
    /// directories and every active `fs_write` grant
    pub async fn get_allowed_write_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut push = |path: PathBuf| {
            if !paths.contains(&path) {
                paths.push(path);
            }
        };

        push(self.cwd.clone());
        self.workspace_roots.iter().cloned().for_each(&mut push);
        self.pre_allowed_dirs.iter().cloned().for_each(&mut push);

        for grant in self.memory_grants(PermissionAction::FsWrite).await {
            push(PathBuf::from(grant.resource));
        }
        for grant in self
            .store
            .find_all_active_grants(Some(PermissionAction::FsWrite))
            .await?
        {
            push(PathBuf::from(grant.resource));
        }

        Ok(paths)
    }

    /// Hosts currently allowed, sorted
    pub async fn get_allowed_domains(&self) -> Result<Vec<String>> {
        let mut domains: Vec<String> = self
            .memory_grants(PermissionAction::NetConnect)
            .await
            .into_iter()
            .map(|g| g.resource)
            .collect();
        domains.extend(
            self.store
                .find_all_active_grants(Some(PermissionAction::NetConnect))
                .await?
                .into_iter()
                .map(|g| g.resource),
        );
        domains.sort();
        domains.dedup();
        Ok(domains)
    }

    /// `base` with the current write allow set added to its write roots
    pub async fn sandbox_config(&self, base: SandboxConfig) -> Result<SandboxConfig> {
        let mut allow_write = base.allow_write.clone();
        for path in self.get_allowed_write_paths().await? {
            if !allow_write.contains(&path) {
                allow_write.push(path);
            }
        }
        Ok(base.with_allow_write(allow_write))
    }

    async fn memory_grants(&self, action: PermissionAction) -> Vec<PermissionGrant> {
        let now = Utc::now();
        let once = self.once.read().await;
        let session = self.session.read().await;
        once.iter()
            .chain(session.iter())
            .filter(|g| g.action == action && g.is_active(now))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Layer resolution
    // ------------------------------------------------------------------

    fn static_layer(&self, path: &Path) -> Option<GrantSource> {
        if path.starts_with(&self.cwd) {
            Some(GrantSource::Cwd)
        } else if self.workspace_roots.iter().any(|r| path.starts_with(r)) {
            Some(GrantSource::Workspace)
        } else {
            None
        }
    }

    async fn resolve_directory(&self, dir: &Path, action: PermissionAction) -> Result<CheckResult> {
        if let Some(source) = self.static_layer(dir) {
            return Ok(CheckResult::Granted { source });
        }
        if self.pre_allowed_dirs.iter().any(|d| dir.starts_with(d)) {
            return Ok(CheckResult::Granted {
                source: GrantSource::PreAllowed,
            });
        }

        let resource = path_key(dir);
        if let Some(source) = self.memory_layer(action, &resource).await {
            return Ok(CheckResult::Granted { source });
        }

        match self.store.find_covering_grant(action, &resource).await? {
            Some(_) => Ok(CheckResult::Granted {
                source: GrantSource::Persistent,
            }),
            None => Ok(CheckResult::Denied),
        }
    }

    async fn resolve_file(&self, file: &Path, action: PermissionAction) -> Result<CheckResult> {
        if let Some(source) = self.static_layer(file) {
            return Ok(CheckResult::Granted { source });
        }
        if self.safe_files.iter().any(|f| f == file) {
            return Ok(CheckResult::Granted {
                source: GrantSource::SafeFile,
            });
        }
        match file.parent() {
            Some(parent) => self.resolve_directory(parent, action).await,
            None => self.resolve_directory(file, action).await,
        }
    }

    async fn resolve_network(&self, host: &str) -> Result<CheckResult> {
        let action = PermissionAction::NetConnect;
        if let Some(source) = self.memory_layer(action, host).await {
            return Ok(CheckResult::Granted { source });
        }
        match self.store.find_active_grant(action, host).await? {
            Some(_) => Ok(CheckResult::Granted {
                source: GrantSource::Persistent,
            }),
            None => Ok(CheckResult::Denied),
        }
    }

    async fn memory_layer(&self, action: PermissionAction, resource: &str) -> Option<GrantSource> {
        let now = Utc::now();
        let matches = |grants: &[PermissionGrant]| {
            grants
                .iter()
                .any(|g| g.action == action && g.is_active(now) && g.covers(resource))
        };

        if matches(&self.once.read().await) {
            return Some(GrantSource::Once);
        }
        if matches(&self.session.read().await) {
            return Some(GrantSource::Session);
        }
        None
    }

    async fn audit_check(
        &self,
        action: PermissionAction,
        resource: &str,
        tool_name: Option<&str>,
        result: CheckResult,
    ) -> Result<()> {
        let entry = match result {
            CheckResult::Granted { source } => {
                AuditEntry::new(AuditEvent::Check, action, resource, "granted")
                    .with_reason(source.as_str())
            }
            CheckResult::Denied => AuditEntry::new(AuditEvent::Check, action, resource, "denied"),
        };
        self.store
            .log_audit(&entry.with_tool_name(tool_name))
            .await?;
        Ok(())
    }
}

async fn upsert(grants: &RwLock<Vec<PermissionGrant>>, grant: PermissionGrant) {
    let mut grants = grants.write().await;
    match grants.iter_mut().find(|g| g.same_key(&grant)) {
        Some(existing) => *existing = grant,
        None => grants.push(grant),
    }
}

fn describe(action: PermissionAction, resource: &str, tool_name: Option<&str>) -> String {
    let who = tool_name.unwrap_or("A tool");
    match action {
        PermissionAction::FsRead => format!("{who} wants to read files in {resource}"),
        PermissionAction::FsWrite => format!("{who} wants to write files in {resource}"),
        PermissionAction::NetConnect => format!("{who} wants to connect to {resource}"),
    }
}
