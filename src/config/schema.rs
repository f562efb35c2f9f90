//! Policy and settings types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Network restriction policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicy {
    /// Domains allowed for network access (e.g., "github.com", "*.npmjs.org").
    /// An empty list allows every domain that is not denied.
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// Domains refused even when they also appear in `allowed_domains`.
    #[serde(default)]
    pub denied_domains: Vec<String>,
}

impl NetworkPolicy {
    /// A policy that refuses every destination.
    ///
    /// Reported once the filtering proxy is gone, since nothing can reach the
    /// network through it any more.
    pub fn deny_all() -> Self {
        Self {
            allowed_domains: Vec::new(),
            denied_domains: vec!["*".to_string()],
        }
    }
}

/// Filesystem restriction policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemPolicy {
    /// Paths/patterns whose contents are hidden from the sandbox.
    #[serde(default)]
    pub deny_read: Vec<String>,

    /// Paths/patterns mounted read-write.
    #[serde(default)]
    pub allow_write: Vec<String>,

    /// Paths/patterns kept read-only even beneath an `allow_write` entry.
    #[serde(default)]
    pub deny_write: Vec<String>,

    /// Allow writes to `~/.gitconfig`.
    #[serde(default)]
    pub allow_git_config: Option<bool>,
}

/// The complete allow/deny policy applied to a sandboxed command.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SandboxPolicy {
    #[serde(default)]
    pub network: NetworkPolicy,

    #[serde(default)]
    pub filesystem: FilesystemPolicy,
}

/// Custom locations of the seccomp bytecode and its apply-helper.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeccompConfig {
    /// Path to a pre-generated BPF filter.
    pub bpf_path: Option<PathBuf>,
    /// Path to the apply-seccomp helper.
    pub apply_path: Option<PathBuf>,
}

/// Contents of a settings file: the policy plus host-specific locations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(flatten)]
    pub policy: SandboxPolicy,

    /// Custom seccomp artifact locations.
    #[serde(default)]
    pub seccomp: Option<SeccompConfig>,

    /// Path to the `srt-proxy` binary.
    #[serde(default)]
    pub proxy_program: Option<PathBuf>,
}

/// Well-known files that stay read-only inside the sandbox.
pub const DANGEROUS_FILES: &[&str] = &[
    ".gitconfig",
    ".bashrc",
    ".bash_profile",
    ".bash_login",
    ".profile",
    ".zshrc",
    ".zprofile",
    ".zshenv",
    ".zlogin",
    ".mcp.json",
    ".npmrc",
    ".yarnrc",
    ".yarnrc.yml",
];

/// Well-known directories that stay read-only inside the sandbox.
pub const DANGEROUS_DIRECTORIES: &[&str] = &[".git/hooks", ".vscode", ".idea"];

impl SandboxPolicy {
    /// Validate the domain patterns of the policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for domain in &self.network.allowed_domains {
            validate_domain_pattern(domain)?;
        }
        for domain in &self.network.denied_domains {
            validate_domain_pattern(domain)?;
        }
        Ok(())
    }
}

/// Validate a domain pattern.
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDomainPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    if pattern.is_empty() {
        return Err(invalid("domain pattern cannot be empty"));
    }

    if pattern == "*" {
        return Err(invalid("wildcard-only patterns are not allowed"));
    }

    if let Some(suffix) = pattern.strip_prefix("*.") {
        if !suffix.contains('.') && suffix.len() <= 4 {
            return Err(invalid("pattern is too broad (matches entire TLD)"));
        }
    }

    if pattern.contains(':') {
        return Err(invalid("domain patterns cannot include port numbers"));
    }

    let check_part = pattern.strip_prefix("*.").unwrap_or(pattern);
    if let Some(ch) = check_part
        .chars()
        .find(|ch| !ch.is_ascii_alphanumeric() && *ch != '.' && *ch != '-' && *ch != '_')
    {
        return Err(ConfigError::InvalidDomainPattern {
            pattern: pattern.to_string(),
            reason: format!("invalid character '{}' in domain pattern", ch),
        });
    }

    Ok(())
}

/// Check if a hostname matches a domain pattern.
///
/// `*` matches everything; `*.example.com` matches subdomains of
/// `example.com` but not `example.com` itself.
pub fn matches_domain_pattern(hostname: &str, pattern: &str) -> bool {
    let hostname = hostname.trim_end_matches('.').to_lowercase();
    let pattern = pattern.to_lowercase();

    if pattern == "*" {
        return true;
    }

    match pattern.strip_prefix("*.") {
        Some(base_domain) => hostname.ends_with(&format!(".{}", base_domain)),
        None => hostname == pattern,
    }
}
