//! Network host extraction from shell commands and free text

use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

/// Host part of an explicit URL (userinfo skipped, IPv6 literals kept bracketed)
static URL_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:https?|ftp|ssh|git)://(?:[^\s/@'"]*@)?(\[[0-9a-f:.]+\]|[a-z0-9](?:[a-z0-9.-]*[a-z0-9])?)"#,
    )
    .expect("static regex")
});

/// `user@host` targets, only meaningful for remote-shell style tools
static USER_AT_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:^|[\s'"=])[A-Za-z0-9._-]+@([A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+)"#,
    )
    .expect("static regex")
});

static REMOTE_SHELL_TOOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s;&|(])(?:ssh|scp|sftp|rsync|git)(?:\s|$)").expect("static regex")
});

/// Package managers and the registries they reach without naming them.
static IMPLICIT_HOST_RULES: LazyLock<Vec<(Regex, &'static [&'static str])>> =
    LazyLock::new(|| {
        let rules: &[(&str, &'static [&'static str])] = &[
            (
                r"\bnpm\s+(?:install|i|add|ci|update|publish)\b",
                &["registry.npmjs.org"],
            ),
            (
                r"\bnpx\s",
                &["registry.npmjs.org"],
            ),
            (
                r"\byarn(?:\s+(?:install|add|upgrade)\b|\s*$|\s*[;&|])",
                &["registry.yarnpkg.com", "registry.npmjs.org"],
            ),
            (
                r"\bpnpm\s+(?:install|i|add|update)\b",
                &["registry.npmjs.org"],
            ),
            (
                r"\bbun\s+(?:install|i|add)\b",
                &["registry.npmjs.org"],
            ),
            (
                r"\b(?:pip3?|uv\s+pip)\s+install\b",
                &["pypi.org", "files.pythonhosted.org"],
            ),
            (
                r"\buv\s+(?:add|sync|lock)\b",
                &["pypi.org", "files.pythonhosted.org"],
            ),
            (
                r"\bpoetry\s+(?:install|add|update|lock)\b",
                &["pypi.org", "files.pythonhosted.org"],
            ),
            (
                r"\bcargo\s+(?:install|add|update|fetch|publish|search)\b",
                &["crates.io", "index.crates.io", "static.crates.io"],
            ),
            (
                r"\bgo\s+(?:get|install|mod\s+download)\b",
                &["proxy.golang.org", "sum.golang.org"],
            ),
            (
                r"\bgem\s+install\b",
                &["rubygems.org"],
            ),
            (
                r"\bbundle(?:\s+install\b|\s*$|\s*[;&|])",
                &["rubygems.org"],
            ),
            (
                r"\bbrew\s+(?:install|upgrade|update|reinstall)\b",
                &["formulae.brew.sh", "ghcr.io", "github.com"],
            ),
            (
                r"\bdocker\s+(?:pull|push|build)\b",
                &["registry-1.docker.io", "auth.docker.io", "production.cloudflare.docker.com"],
            ),
            (
                r"\bcomposer\s+(?:install|require|update)\b",
                &["repo.packagist.org"],
            ),
        ];
        rules
            .iter()
            .map(|(pattern, hosts)| (Regex::new(pattern).expect("static regex"), *hosts))
            .collect()
    });

/// Extract the hosts `command` is likely to connect to.
///
/// Sources, in order: explicit URLs, `user@host` targets when a remote-shell
/// tool appears in the command, and well-known registries implied by package
/// manager invocations. Loopback hosts are dropped. Hosts are lowercased and
/// deduplicated in first-seen order.
#[must_use]
pub fn extract_hosts_from_command(command: &str) -> Vec<String> {
    let mut hosts = extract_hosts_from_text(command);

    if REMOTE_SHELL_TOOL.is_match(command) {
        for caps in USER_AT_HOST.captures_iter(command) {
            if let Some(host) = caps.get(1).and_then(|m| normalize_host(m.as_str())) {
                if looks_like_hostname(&host) {
                    push_unique(&mut hosts, host);
                }
            }
        }
    }

    for (pattern, implied) in IMPLICIT_HOST_RULES.iter() {
        if pattern.is_match(command) {
            for host in *implied {
                push_unique(&mut hosts, (*host).to_string());
            }
        }
    }

    hosts
}

/// Extract hosts from explicit URLs in arbitrary text.
#[must_use]
pub fn extract_hosts_from_text(text: &str) -> Vec<String> {
    let mut hosts = Vec::new();
    for caps in URL_HOST.captures_iter(text) {
        if let Some(host) = caps.get(1).and_then(|m| normalize_host(m.as_str())) {
            push_unique(&mut hosts, host);
        }
    }
    hosts
}

/// Whether `host` names the local machine.
#[must_use]
pub fn is_loopback_host(host: &str) -> bool {
    let host = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    host == "localhost"
        || host.ends_with(".localhost")
        || host == "ip6-localhost"
        || host == "0.0.0.0"
        || host == "::1"
        || host
            .parse::<Ipv4Addr>()
            .is_ok_and(|ip| ip.is_loopback())
}

fn normalize_host(raw: &str) -> Option<String> {
    let host = raw
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if host.is_empty() || is_loopback_host(&host) {
        None
    } else {
        Some(host)
    }
}

/// Rejects `pkg@1.2.3` style version specifiers caught by the `user@host` pattern.
fn looks_like_hostname(host: &str) -> bool {
    if host.parse::<Ipv4Addr>().is_ok() {
        return true;
    }
    host.rsplit('.')
        .next()
        .is_some_and(|tld| tld.chars().all(|c| c.is_ascii_alphabetic()))
}

fn push_unique(hosts: &mut Vec<String>, host: String) {
    if !hosts.contains(&host) {
        hosts.push(host);
    }
}
