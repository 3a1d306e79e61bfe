//! Directory extraction from shell command strings

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

/// `NAME=value` words: environment assignments, whose value is never a path
/// the command itself opens (`FOO=/etc/passwd ls`, `make PREFIX=/opt`).
static ENV_ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("static regex"));

/// Anything that looks like `scheme://`
static URL_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").expect("static regex"));

/// Device files that show up in almost every redirect and grant nothing.
const HARMLESS_DEVICE_FILES: &[&str] = &[
    "/dev/null",
    "/dev/zero",
    "/dev/stdin",
    "/dev/stdout",
    "/dev/stderr",
    "/dev/tty",
    "/dev/random",
    "/dev/urandom",
];

/// Commands whose first argument is a directory to change into.
const DIRECTORY_CHANGERS: &[&str] = &["cd", "pushd"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    /// `>`, `>>`, `<`, `>|`: the next word is a file
    Redirect,
    /// `<<` / `<<-`: the next word is a delimiter, not a path
    HereDoc,
    /// `;`, `|`, `&`, `(`, `)`, newline
    Separator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateKind {
    /// Ordinary argument: only absolute, `~` and `..` forms count
    Argument,
    /// Target of `cd`/`pushd`: relative forms count too
    Directory,
    /// Target of a redirect: always a file
    RedirectTarget,
}

/// Extract the directories outside `cwd` that `command` appears to access.
///
/// Candidates are absolute paths, `~` paths, `..` escapes, `cd`/`pushd`
/// targets and redirect targets. File-like candidates are reduced to their
/// containing directory. The result is deduplicated in first-seen order.
#[must_use]
pub fn extract_paths_from_command(command: &str, cwd: &Path) -> Vec<PathBuf> {
    let cwd = normalize_lexically(cwd);
    let canonical_cwd = cwd.canonicalize().ok();

    let mut found: Vec<PathBuf> = Vec::new();
    let mut push = |dir: PathBuf| {
        let inside = dir.starts_with(&cwd)
            || canonical_cwd.as_ref().is_some_and(|c| dir.starts_with(c));
        if !inside && !found.contains(&dir) {
            found.push(dir);
        }
    };

    let mut command_position = true;
    let mut after_cd = false;
    let mut expect_redirect_target = false;
    let mut skip_heredoc_delimiter = false;

    for token in tokenize(command) {
        match token {
            Token::Separator => {
                command_position = true;
                after_cd = false;
                expect_redirect_target = false;
            }
            Token::Redirect => expect_redirect_target = true,
            Token::HereDoc => skip_heredoc_delimiter = true,
            Token::Word(word) => {
                if skip_heredoc_delimiter {
                    skip_heredoc_delimiter = false;
                    continue;
                }
                if expect_redirect_target {
                    expect_redirect_target = false;
                    if let Some(dir) = resolve_candidate(&word, CandidateKind::RedirectTarget, &cwd)
                    {
                        push(dir);
                    }
                    continue;
                }
                if ENV_ASSIGNMENT.is_match(&word) {
                    continue;
                }
                if after_cd {
                    after_cd = false;
                    if let Some(dir) = resolve_candidate(&word, CandidateKind::Directory, &cwd) {
                        push(dir);
                    }
                    continue;
                }
                if command_position {
                    command_position = false;
                    if DIRECTORY_CHANGERS.contains(&word.as_str()) {
                        after_cd = true;
                    }
                    // The program itself is executed, not read
                    continue;
                }
                if let Some(dir) = resolve_candidate(&word, CandidateKind::Argument, &cwd) {
                    push(dir);
                }
            }
        }
    }

    found
}

/// Split a command into words and operators, honouring quotes and escapes.
fn tokenize(command: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = command.chars().peekable();

    fn flush(tokens: &mut Vec<Token>, word: &mut String, in_word: &mut bool) {
        if *in_word {
            tokens.push(Token::Word(std::mem::take(word)));
            *in_word = false;
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    word.push(q);
                }
            }
            '"' => {
                in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                word.push(escaped);
                            }
                        }
                        _ => word.push(q),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    word.push(escaped);
                }
            }
            '#' if !in_word => {
                // Comment to end of line
                for n in chars.by_ref() {
                    if n == '\n' {
                        tokens.push(Token::Separator);
                        break;
                    }
                }
            }
            '>' | '<' => {
                // `2>` / `1>>`: a bare fd number belongs to the operator
                if in_word && !word.is_empty() && word.chars().all(|d| d.is_ascii_digit()) {
                    word.clear();
                    in_word = false;
                }
                flush(&mut tokens, &mut word, &mut in_word);
                if c == '<' && chars.peek() == Some(&'<') {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        // here-string: the next word is data
                        chars.next();
                    } else if chars.peek() == Some(&'-') {
                        chars.next();
                    }
                    tokens.push(Token::HereDoc);
                    continue;
                }
                if chars.peek() == Some(&'(') {
                    // Process substitution `<(...)` / `>(...)`
                    tokens.push(Token::Separator);
                    continue;
                }
                while matches!(chars.peek(), Some('>') | Some('|')) {
                    chars.next();
                }
                if chars.peek() == Some(&'&') {
                    // `2>&1`, `>&-`: fd duplication, no file involved
                    chars.next();
                    while matches!(chars.peek(), Some(d) if d.is_ascii_digit() || *d == '-') {
                        chars.next();
                    }
                    continue;
                }
                tokens.push(Token::Redirect);
            }
            ';' | '|' | '&' | '(' | ')' | '\n' => {
                flush(&mut tokens, &mut word, &mut in_word);
                tokens.push(Token::Separator);
            }
            c if c.is_whitespace() => flush(&mut tokens, &mut word, &mut in_word),
            _ => {
                in_word = true;
                word.push(c);
            }
        }
    }
    flush(&mut tokens, &mut word, &mut in_word);
    tokens
}

/// Turn one word into the directory it refers to, if it refers to one we care about.
fn resolve_candidate(word: &str, kind: CandidateKind, cwd: &Path) -> Option<PathBuf> {
    if word.is_empty() || word.contains('$') || word.contains('`') || URL_LIKE.is_match(word) {
        return None;
    }

    let mut value = word;
    if kind == CandidateKind::Argument && value.starts_with('-') {
        // `--output=/tmp/x` carries a path after the `=`; other flags do not
        value = value.split_once('=').map(|(_, v)| v)?;
    }
    if kind == CandidateKind::Directory && value == "-" {
        return None;
    }

    let explicit = value.starts_with('/')
        || value == "~"
        || value.starts_with("~/")
        || value == ".."
        || value.starts_with("../");
    if kind == CandidateKind::Argument && !explicit {
        return None;
    }

    // Globs: keep the literal directory prefix
    let (literal, globbed) = match value.find(['*', '?', '[', '{']) {
        Some(idx) => (&value[..idx], true),
        None => (value, false),
    };
    if literal.is_empty() {
        return None;
    }

    let expanded = expand_home(literal)?;
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };
    let path = normalize_lexically(&absolute);

    if HARMLESS_DEVICE_FILES.iter().any(|d| path == Path::new(d)) {
        return None;
    }

    if globbed {
        return if literal.ends_with('/') {
            Some(path)
        } else {
            path.parent().map(Path::to_path_buf)
        };
    }

    match kind {
        CandidateKind::RedirectTarget => parent_or_self(&path),
        CandidateKind::Directory => Some(path),
        CandidateKind::Argument => Some(reduce_to_directory(path, value.ends_with('/'))),
    }
}

fn parent_or_self(path: &Path) -> Option<PathBuf> {
    Some(path.parent().map_or_else(|| path.to_path_buf(), Path::to_path_buf))
}

/// Files collapse to their parent; unknown names with an extension are
/// treated as files, everything else as a directory.
fn reduce_to_directory(path: PathBuf, trailing_slash: bool) -> PathBuf {
    if trailing_slash || path.is_dir() {
        return path;
    }
    let looks_like_file = path.exists()
        || path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.trim_start_matches('.').contains('.'));
    if looks_like_file {
        path.parent().map_or(path.clone(), Path::to_path_buf)
    } else {
        path
    }
}

fn expand_home(value: &str) -> Option<PathBuf> {
    if value == "~" {
        return dirs::home_dir();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return dirs::home_dir().map(|h| h.join(rest));
    }
    if value.starts_with('~') {
        // `~user` needs the passwd database; not worth guessing
        return None;
    }
    Some(PathBuf::from(value))
}

/// Normalize `.` and `..` components without touching the filesystem.
///
/// `..` at the root stays at the root.
#[must_use]
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::RootDir.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tokenizer_tests {
    use super::*;

    fn words(tokens: &[Token]) -> Vec<&str> {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_quotes_and_escapes() {
        let tokens = tokenize(r#"cat 'a b' "c \"d\"" e\ f"#);
        assert_eq!(words(&tokens), vec!["cat", "a b", "c \"d\"", "e f"]);
    }

    #[test]
    fn test_fd_duplication_is_not_a_redirect() {
        let tokens = tokenize("make 2>&1 | tee log");
        assert!(!tokens.contains(&Token::Redirect));
        assert_eq!(words(&tokens), vec!["make", "tee", "log"]);
    }

    #[test]
    fn test_redirect_operators() {
        let tokens = tokenize("echo hi 2>>/tmp/err.log");
        assert_eq!(
            tokens,
            vec![
                Token::Word("echo".into()),
                Token::Word("hi".into()),
                Token::Redirect,
                Token::Word("/tmp/err.log".into()),
            ]
        );
    }

    #[test]
    fn test_heredoc_marker() {
        let tokens = tokenize("cat <<EOF");
        assert_eq!(tokens, vec![Token::Word("cat".into()), Token::HereDoc, Token::Word("EOF".into())]);
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(normalize_lexically(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_lexically(Path::new("/../..")), PathBuf::from("/"));
    }
}
