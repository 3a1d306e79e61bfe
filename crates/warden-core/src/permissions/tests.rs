//! Tests for the permission manager

use super::*;
use crate::store::PolicyStore;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct TestContext {
    manager: PermissionManager,
    workspace: PathBuf,
    root: PathBuf,
    _dir: TempDir,
}

fn layout() -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let workspace = root.join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::create_dir_all(root.join("a/b/c")).unwrap();
    std::fs::create_dir_all(root.join("ab")).unwrap();
    std::fs::create_dir_all(root.join("tmp/x")).unwrap();
    (dir, root, workspace)
}

async fn create_test_context() -> TestContext {
    let (dir, root, workspace) = layout();
    let store = PolicyStore::in_memory().await.unwrap();
    let manager = PermissionManager::new(store, PermissionManagerConfig::new(&workspace))
        .await
        .unwrap();
    TestContext {
        manager,
        workspace,
        root,
        _dir: dir,
    }
}

/// Context whose prompt always answers `decision`; returns the requests seen
async fn create_prompting_context(
    decision: PromptDecision,
) -> (TestContext, Arc<Mutex<Vec<PermissionRequest>>>) {
    let mut ctx = create_test_context().await;
    let (channel, mut rx) = prompt_channel(8);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            recorded.lock().unwrap().push(envelope.request.clone());
            envelope.respond(decision.clone());
        }
    });

    ctx.manager = ctx.manager.with_prompt(channel);
    (ctx, seen)
}

fn allow(scope: GrantScope) -> PromptDecision {
    PromptDecision::Allow { scope }
}

fn granted(source: GrantSource) -> CheckResult {
    CheckResult::Granted { source }
}

fn dir_grant(action: PermissionAction, path: &Path, scope: GrantScope) -> PermissionGrant {
    PermissionGrant::new(action, path.to_string_lossy(), scope)
}

#[tokio::test]
async fn test_outside_cwd_denied_until_granted() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;
    let target = ctx.root.join("a/b");

    assert_eq!(
        m.check_directory(&ctx.workspace, PermissionAction::FsWrite)
            .await
            .unwrap(),
        granted(GrantSource::Cwd)
    );
    assert_eq!(
        m.check_directory(&target, PermissionAction::FsRead)
            .await
            .unwrap(),
        CheckResult::Denied
    );

    m.grant(dir_grant(
        PermissionAction::FsRead,
        &ctx.root.join("a"),
        GrantScope::Persistent,
    ))
    .await
    .unwrap();

    assert_eq!(
        m.check_directory(&target, PermissionAction::FsRead)
            .await
            .unwrap(),
        granted(GrantSource::Persistent)
    );
    // Read grants do not imply write
    assert_eq!(
        m.check_directory(&target, PermissionAction::FsWrite)
            .await
            .unwrap(),
        CheckResult::Denied
    );
}

#[tokio::test]
async fn test_ancestor_matching_stops_at_component_boundary() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;

    m.grant(dir_grant(
        PermissionAction::FsRead,
        &ctx.root.join("a"),
        GrantScope::Persistent,
    ))
    .await
    .unwrap();

    assert!(m
        .check_directory(&ctx.root.join("a/b/c"), PermissionAction::FsRead)
        .await
        .unwrap()
        .is_granted());
    assert!(!m
        .check_directory(&ctx.root.join("ab"), PermissionAction::FsRead)
        .await
        .unwrap()
        .is_granted());
}

#[tokio::test]
async fn test_in_memory_ancestor_matching() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;

    m.grant(dir_grant(
        PermissionAction::FsRead,
        &ctx.root.join("a"),
        GrantScope::Session,
    ))
    .await
    .unwrap();

    assert_eq!(
        m.check_directory(&ctx.root.join("a/b/c"), PermissionAction::FsRead)
            .await
            .unwrap(),
        granted(GrantSource::Session)
    );
    assert_eq!(
        m.check_directory(&ctx.root.join("ab"), PermissionAction::FsRead)
            .await
            .unwrap(),
        CheckResult::Denied
    );
}

#[tokio::test]
async fn test_grant_is_idempotent() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;
    let target = ctx.root.join("a");

    for _ in 0..2 {
        m.grant(dir_grant(PermissionAction::FsRead, &target, GrantScope::Persistent))
            .await
            .unwrap();
    }

    let grants = m.get_persistent_grants().await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(Path::new(&grants[0].resource), target);

    let grant_events = m
        .store()
        .recent_audit(50)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event == AuditEvent::Grant)
        .count();
    assert_eq!(grant_events, 2);
}

#[tokio::test]
async fn test_revoke_persistent() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;
    let target = ctx.root.join("a");

    assert!(!m
        .revoke_persistent(PermissionAction::FsRead, &target.to_string_lossy())
        .await
        .unwrap());

    m.grant(dir_grant(PermissionAction::FsRead, &target, GrantScope::Persistent))
        .await
        .unwrap();
    assert!(m
        .revoke_persistent(PermissionAction::FsRead, &target.to_string_lossy())
        .await
        .unwrap());

    assert_eq!(
        m.check_directory(&target, PermissionAction::FsRead)
            .await
            .unwrap(),
        CheckResult::Denied
    );

    let audit = m.store().recent_audit(50).await.unwrap();
    let revokes: Vec<_> = audit
        .iter()
        .filter(|e| e.event == AuditEvent::Revoke)
        .map(|e| e.result.as_str())
        .collect();
    assert_eq!(revokes, vec!["revoked", "not_found"]);
}

#[tokio::test]
async fn test_network_host_normalization() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;

    m.grant(PermissionGrant::new(
        PermissionAction::NetConnect,
        "Example.COM",
        GrantScope::Persistent,
    ))
    .await
    .unwrap();

    assert_eq!(
        m.check_network("example.com").await.unwrap(),
        granted(GrantSource::Persistent)
    );
    assert_eq!(
        m.check_network("EXAMPLE.com.").await.unwrap(),
        granted(GrantSource::Persistent)
    );
    assert_eq!(
        m.check_network("api.example.com").await.unwrap(),
        CheckResult::Denied
    );

    // Same grant regardless of case
    m.grant(PermissionGrant::new(
        PermissionAction::NetConnect,
        "example.com",
        GrantScope::Persistent,
    ))
    .await
    .unwrap();
    assert_eq!(m.get_persistent_grants().await.unwrap().len(), 1);
    assert_eq!(m.get_allowed_domains().await.unwrap(), vec!["example.com"]);
}

#[tokio::test]
async fn test_once_and_session_clearing() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;
    let target = ctx.root.join("tmp/x");

    m.grant(dir_grant(PermissionAction::FsRead, &target, GrantScope::Once))
        .await
        .unwrap();
    assert_eq!(
        m.check_directory(&target, PermissionAction::FsRead)
            .await
            .unwrap(),
        granted(GrantSource::Once)
    );

    m.clear_once_grants().await;
    assert_eq!(
        m.check_directory(&target, PermissionAction::FsRead)
            .await
            .unwrap(),
        CheckResult::Denied
    );

    m.grant(dir_grant(PermissionAction::FsRead, &target, GrantScope::Session))
        .await
        .unwrap();
    m.clear_once_grants().await;
    assert_eq!(
        m.check_directory(&target, PermissionAction::FsRead)
            .await
            .unwrap(),
        granted(GrantSource::Session)
    );

    m.clear_session_grants().await;
    assert_eq!(
        m.check_directory(&target, PermissionAction::FsRead)
            .await
            .unwrap(),
        CheckResult::Denied
    );
}

#[tokio::test]
async fn test_checks_are_audited() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;

    m.check_directory(&ctx.root.join("a"), PermissionAction::FsRead)
        .await
        .unwrap();
    m.check_directory(&ctx.workspace, PermissionAction::FsRead)
        .await
        .unwrap();

    let audit = m.store().recent_audit(10).await.unwrap();
    assert_eq!(audit.len(), 2);
    assert!(audit.iter().all(|e| e.event == AuditEvent::Check));
    assert_eq!(audit[0].result, "granted");
    assert_eq!(audit[0].reason.as_deref(), Some("cwd"));
    assert_eq!(audit[1].result, "denied");
}

#[tokio::test]
async fn test_request_without_prompt_is_denied() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;
    let cancel = CancellationToken::new();

    let outcome = m
        .request_directory(
            &ctx.root.join("a"),
            PermissionAction::FsRead,
            Some("ls"),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PermissionOutcome::Denied {
            reason: DenialReason::NoPrompt,
            user_message: None,
        }
    );

    let audit = m.store().recent_audit(1).await.unwrap();
    assert_eq!(audit[0].event, AuditEvent::Deny);
    assert_eq!(audit[0].reason.as_deref(), Some("no_prompt"));
    assert_eq!(audit[0].tool_name.as_deref(), Some("ls"));
}

#[tokio::test]
async fn test_request_inside_cwd_never_prompts() {
    let (ctx, seen) = create_prompting_context(allow(GrantScope::Once)).await;
    let cancel = CancellationToken::new();

    let outcome = ctx
        .manager
        .request_file(
            &ctx.workspace.join("src/main.rs"),
            PermissionAction::FsWrite,
            Some("write"),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        PermissionOutcome::Granted {
            source: GrantSource::Cwd
        }
    );
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_prompt_allow_creates_grant_at_scope() {
    let (ctx, seen) = create_prompting_context(allow(GrantScope::Session)).await;
    let m = &ctx.manager;
    let cancel = CancellationToken::new();
    let target = ctx.root.join("a");

    let outcome = m
        .request_directory(&target, PermissionAction::FsRead, Some("ls"), &cancel)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PermissionOutcome::Granted {
            source: GrantSource::Session
        }
    );

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].grant_type, GrantType::Directory);
        assert_eq!(seen[0].action, PermissionAction::FsRead);
        assert_eq!(Path::new(&seen[0].detail), target);
        assert_eq!(seen[0].tool_name.as_deref(), Some("ls"));
    }

    // Already granted, no second prompt
    m.request_directory(&target.join("b"), PermissionAction::FsRead, None, &cancel)
        .await
        .unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);

    let events: Vec<_> = m
        .store()
        .recent_audit(50)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert!(events.contains(&AuditEvent::Prompt));
    assert!(events.contains(&AuditEvent::Grant));
}

#[tokio::test]
async fn test_prompt_deny_carries_user_message() {
    let (ctx, _seen) = create_prompting_context(PromptDecision::Deny {
        user_message: Some("use the fixtures in the repo".to_string()),
    })
    .await;
    let cancel = CancellationToken::new();

    let outcome = ctx
        .manager
        .request_network("Registry.NPMjs.org", Some("bash"), &cancel)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PermissionOutcome::Denied {
            reason: DenialReason::UserDenied,
            user_message: Some("use the fixtures in the repo".to_string()),
        }
    );

    let audit = ctx.manager.store().recent_audit(1).await.unwrap();
    assert_eq!(audit[0].event, AuditEvent::Deny);
    assert_eq!(audit[0].resource, "registry.npmjs.org");
    assert_eq!(
        audit[0].user_message.as_deref(),
        Some("use the fixtures in the repo")
    );
}

#[tokio::test]
async fn test_missing_path_is_denied_without_prompt() {
    let (ctx, seen) = create_prompting_context(allow(GrantScope::Session)).await;
    let cancel = CancellationToken::new();

    let outcome = ctx
        .manager
        .request_directory(
            &ctx.root.join("does/not/exist"),
            PermissionAction::FsRead,
            None,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PermissionOutcome::Denied {
            reason: DenialReason::PathNotFound,
            user_message: None,
        }
    );
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_request_file_prompts_for_parent_directory() {
    let (ctx, seen) = create_prompting_context(allow(GrantScope::Once)).await;
    let m = &ctx.manager;
    let cancel = CancellationToken::new();

    // New file in an existing directory
    let outcome = m
        .request_file(
            &ctx.root.join("a/new.txt"),
            PermissionAction::FsWrite,
            Some("write"),
            &cancel,
        )
        .await
        .unwrap();
    assert!(outcome.is_granted());
    assert_eq!(Path::new(&seen.lock().unwrap()[0].detail), ctx.root.join("a"));

    assert_eq!(
        m.check_file(&ctx.root.join("a/other.txt"), PermissionAction::FsWrite)
            .await
            .unwrap(),
        granted(GrantSource::Once)
    );
    assert_eq!(m.get_allowed_write_paths().await.unwrap()[1], ctx.root.join("a"));

    // Missing parent directory
    let outcome = m
        .request_file(
            &ctx.root.join("missing/new.txt"),
            PermissionAction::FsWrite,
            None,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PermissionOutcome::Denied {
            reason: DenialReason::PathNotFound,
            user_message: None,
        }
    );
}

#[tokio::test]
async fn test_cancelled_prompt_is_denied() {
    let mut ctx = create_test_context().await;
    let (channel, mut rx) = prompt_channel(1);
    ctx.manager = ctx.manager.with_prompt(channel);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    // Hold the envelope without answering, then cancel
    let ui = tokio::spawn(async move {
        let envelope = rx.recv().await.unwrap();
        trigger.cancel();
        envelope
    });

    let outcome = ctx
        .manager
        .request_network("example.com", None, &cancel)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PermissionOutcome::Denied {
            reason: DenialReason::Cancelled,
            user_message: None,
        }
    );

    let envelope = ui.await.unwrap();
    assert!(!envelope.respond(allow(GrantScope::Session)));
    assert_eq!(
        ctx.manager.check_network("example.com").await.unwrap(),
        CheckResult::Denied
    );
}

#[tokio::test]
async fn test_prompt_timeout_is_denied() {
    let (dir, _root, workspace) = layout();
    let store = PolicyStore::in_memory().await.unwrap();
    let (channel, mut rx) = prompt_channel(1);
    let manager = PermissionManager::new(
        store,
        PermissionManagerConfig::new(&workspace).with_prompt_timeout(Duration::from_millis(50)),
    )
    .await
    .unwrap()
    .with_prompt(channel);

    let ui = tokio::spawn(async move { rx.recv().await });

    let outcome = manager
        .request_network("example.com", None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PermissionOutcome::Denied {
            reason: DenialReason::TimedOut,
            user_message: None,
        }
    );

    drop(ui.await.unwrap());
    drop(dir);
}

#[tokio::test]
async fn test_dropped_prompt_receiver_is_denied() {
    let mut ctx = create_test_context().await;
    let (channel, rx) = prompt_channel(1);
    drop(rx);
    ctx.manager = ctx.manager.with_prompt(channel);

    let outcome = ctx
        .manager
        .request_network("example.com", None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PermissionOutcome::Denied {
            reason: DenialReason::PromptClosed,
            user_message: None,
        }
    );
}

#[tokio::test]
async fn test_static_layers() {
    let (dir, root, workspace) = layout();
    let safe = root.join("ab/AGENTS.md");
    std::fs::write(&safe, "notes").unwrap();

    let store = PolicyStore::in_memory().await.unwrap();
    let config = PermissionManagerConfig::new(&workspace)
        .with_workspace_root(root.join("a"))
        .with_safe_file(&safe)
        .with_pre_allowed_dir(root.join("tmp"));
    let m = PermissionManager::new(store, config).await.unwrap();

    assert_eq!(
        m.check_directory(&root.join("a/b"), PermissionAction::FsWrite)
            .await
            .unwrap(),
        granted(GrantSource::Workspace)
    );
    assert_eq!(
        m.check_file(&safe, PermissionAction::FsRead).await.unwrap(),
        granted(GrantSource::SafeFile)
    );
    // Only the whitelisted file, not its siblings
    assert_eq!(
        m.check_file(&root.join("ab/other.md"), PermissionAction::FsRead)
            .await
            .unwrap(),
        CheckResult::Denied
    );
    assert_eq!(
        m.check_directory(&root.join("tmp/x"), PermissionAction::FsWrite)
            .await
            .unwrap(),
        granted(GrantSource::PreAllowed)
    );

    assert_eq!(
        m.store().list_pre_allowed_dirs().await.unwrap(),
        vec![root.join("tmp")]
    );

    let writable = m.get_allowed_write_paths().await.unwrap();
    assert_eq!(writable, vec![workspace, root.join("a"), root.join("tmp")]);
    drop(dir);
}

#[tokio::test]
async fn test_relative_paths_resolve_against_cwd() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;

    assert_eq!(
        m.check_directory(Path::new("src"), PermissionAction::FsRead)
            .await
            .unwrap(),
        granted(GrantSource::Cwd)
    );
    assert_eq!(
        m.check_directory(Path::new("../a"), PermissionAction::FsRead)
            .await
            .unwrap(),
        CheckResult::Denied
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_out_of_cwd_is_resolved() {
    let ctx = create_test_context().await;
    let link = ctx.workspace.join("escape");
    std::os::unix::fs::symlink(ctx.root.join("a"), &link).unwrap();

    assert_eq!(
        ctx.manager
            .check_directory(&link.join("b"), PermissionAction::FsWrite)
            .await
            .unwrap(),
        CheckResult::Denied
    );
    assert_eq!(
        resolve_path(&link.join("b/new"), &ctx.workspace),
        ctx.root.join("a/b/new")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_parent_dir_after_symlink_follows_link_target() {
    let ctx = create_test_context().await;
    let link = ctx.workspace.join("link");
    std::os::unix::fs::symlink(ctx.root.join("a/b"), &link).unwrap();

    // The kernel opens a/secret.txt, not workspace/secret.txt
    let sneaky = link.join("../secret.txt");
    assert_eq!(
        resolve_path(&sneaky, &ctx.workspace),
        ctx.root.join("a/secret.txt")
    );
    assert_eq!(
        ctx.manager
            .check_file(&sneaky, PermissionAction::FsWrite)
            .await
            .unwrap(),
        CheckResult::Denied
    );

    // Same through a missing component after the link
    assert_eq!(
        resolve_path(&link.join("new/../../x"), &ctx.workspace),
        ctx.root.join("a/x")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_dangling_symlink_resolves_to_its_target() {
    let ctx = create_test_context().await;
    let link = ctx.workspace.join("dangling");
    std::os::unix::fs::symlink(ctx.root.join("tmp/created.txt"), &link).unwrap();

    assert_eq!(
        resolve_path(&link, &ctx.workspace),
        ctx.root.join("tmp/created.txt")
    );
    assert_eq!(
        ctx.manager
            .check_file(&link, PermissionAction::FsWrite)
            .await
            .unwrap(),
        CheckResult::Denied
    );
}

#[test]
fn test_resolve_path_drops_trailing_slash_and_dots() {
    let cwd = Path::new("/nonexistent-warden-root/proj");
    assert_eq!(
        resolve_path(Path::new("./sub/../out/"), cwd),
        PathBuf::from("/nonexistent-warden-root/proj/out")
    );
}

#[tokio::test]
async fn test_grant_changes_are_broadcast() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;
    let mut changes = m.subscribe();

    m.grant(dir_grant(
        PermissionAction::FsRead,
        &ctx.root.join("a"),
        GrantScope::Session,
    ))
    .await
    .unwrap();
    m.grant(dir_grant(
        PermissionAction::FsWrite,
        &ctx.root.join("a"),
        GrantScope::Session,
    ))
    .await
    .unwrap();
    m.grant(PermissionGrant::new(
        PermissionAction::NetConnect,
        "crates.io",
        GrantScope::Persistent,
    ))
    .await
    .unwrap();
    m.revoke_persistent(PermissionAction::NetConnect, "crates.io")
        .await
        .unwrap();
    m.clear_session_grants().await;

    let mut received = Vec::new();
    while let Ok(change) = changes.try_recv() {
        received.push((change.kind, change.action));
    }
    assert_eq!(
        received,
        vec![
            (GrantChangeKind::Granted, PermissionAction::FsWrite),
            (GrantChangeKind::Granted, PermissionAction::NetConnect),
            (GrantChangeKind::Revoked, PermissionAction::NetConnect),
            (GrantChangeKind::Cleared, PermissionAction::FsWrite),
        ]
    );
}

#[tokio::test]
async fn test_sandbox_config_tracks_write_grants() {
    let ctx = create_test_context().await;
    let m = &ctx.manager;

    m.grant(dir_grant(
        PermissionAction::FsWrite,
        &ctx.root.join("tmp/x"),
        GrantScope::Persistent,
    ))
    .await
    .unwrap();

    let config = m
        .sandbox_config(warden_tools::SandboxConfig::default())
        .await
        .unwrap();
    assert_eq!(
        config.allow_write,
        vec![ctx.workspace.clone(), ctx.root.join("tmp/x")]
    );
}

#[tokio::test]
async fn test_relative_cwd_is_rejected() {
    let store = PolicyStore::in_memory().await.unwrap();
    let result = PermissionManager::new(store, PermissionManagerConfig::new("relative")).await;
    assert!(matches!(result, Err(crate::Error::InvalidPath(_))));
}

#[test]
fn test_grant_covers() {
    let grant = PermissionGrant::new(PermissionAction::FsRead, "/a", GrantScope::Once);
    assert!(grant.covers("/a"));
    assert!(grant.covers("/a/b"));
    assert!(!grant.covers("/ab"));

    let host = PermissionGrant::new(PermissionAction::NetConnect, "example.com", GrantScope::Once);
    assert_eq!(host.grant_type, GrantType::Network);
    assert!(host.covers("EXAMPLE.com"));
    assert!(!host.covers("sub.example.com"));
}

#[test]
fn test_normalize_host() {
    assert_eq!(normalize_host("Example.COM."), "example.com");
    assert_eq!(normalize_host("[::1]"), "::1");
}
