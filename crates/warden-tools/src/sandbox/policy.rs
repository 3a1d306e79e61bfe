//! Paths that stay read-only inside every writable root
//!
//! Writing any of these lets a sandboxed process plant code that runs later
//! outside the sandbox (git hooks, shell startup files, package manager
//! hooks) or steal credentials.

use std::path::{Path, PathBuf};

/// Relative to each writable root
pub const MANDATORY_DENY_WORKSPACE: &[&str] = &[
    ".git/hooks",
    ".gitmodules",
    ".vscode",
    ".idea",
    ".mcp.json",
    ".envrc",
];

/// `.git/config` can set `core.fsmonitor`/`core.hooksPath`; opt-in only
pub const GIT_CONFIG: &str = ".git/config";

/// Relative to the home directory
pub const MANDATORY_DENY_HOME: &[&str] = &[
    // Shell startup
    ".bashrc",
    ".bash_profile",
    ".bash_login",
    ".profile",
    ".zshrc",
    ".zprofile",
    ".zshenv",
    ".config/fish",
    // Git
    ".gitconfig",
    ".config/git",
    // Package managers
    ".npmrc",
    ".yarnrc",
    ".pypirc",
    ".pip",
    ".cargo/config",
    ".cargo/config.toml",
    ".cargo/credentials",
    ".cargo/credentials.toml",
    ".gemrc",
    // Credentials
    ".ssh",
    ".gnupg",
    ".aws",
    ".kube",
    ".docker",
    ".netrc",
];

/// Every mandatory read-only path that lies inside one of `write_roots`.
///
/// Paths outside the write roots are already read-only and are skipped.
#[must_use]
pub fn mandatory_deny_paths(
    write_roots: &[PathBuf],
    home: Option<&Path>,
    allow_git_config: bool,
) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    for root in write_roots {
        candidates.extend(MANDATORY_DENY_WORKSPACE.iter().map(|rel| root.join(rel)));
        if !allow_git_config {
            candidates.push(root.join(GIT_CONFIG));
        }
    }
    if let Some(home) = home {
        candidates.extend(MANDATORY_DENY_HOME.iter().map(|rel| home.join(rel)));
    }

    let mut out: Vec<PathBuf> = Vec::new();
    for path in candidates {
        if write_roots.iter().any(|root| path.starts_with(root)) && !out.contains(&path) {
            out.push(path);
        }
    }
    out
}
