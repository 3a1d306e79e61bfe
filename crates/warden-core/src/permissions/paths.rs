//! Path and host normalization

use std::path::{Component, Path, PathBuf};

/// Upper bound on dangling symlinks followed for one path
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolve `path` to an absolute, symlink-free form.
///
/// Relative paths are joined onto `cwd`. Components are walked left to
/// right and the existing prefix is canonicalized after each step, so `..`
/// always applies to the real parent of a symlink target and never to the
/// link's lexical parent. Missing components are appended as written.
pub fn resolve_path(path: &Path, cwd: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    match absolute.canonicalize() {
        Ok(real) => real,
        Err(_) => resolve_components(&absolute, MAX_SYMLINK_HOPS),
    }
}

fn resolve_components(path: &Path, hops: usize) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                if let Ok(real) = resolved.canonicalize() {
                    resolved = real;
                } else if let Some(target) = dangling_link_target(&resolved) {
                    // Writing through a dangling link creates its target
                    if hops == 0 {
                        continue;
                    }
                    let base = resolved.parent().map(Path::to_path_buf).unwrap_or_default();
                    resolved = resolve_components(&base.join(target), hops - 1);
                }
            }
        }
    }
    resolved
}

fn dangling_link_target(path: &Path) -> Option<PathBuf> {
    let meta = std::fs::symlink_metadata(path).ok()?;
    if meta.file_type().is_symlink() {
        std::fs::read_link(path).ok()
    } else {
        None
    }
}

/// Lowercase a host, dropping IPv6 brackets and a trailing root dot
pub fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// Store form of a directory path
pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
