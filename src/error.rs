//! Error types for the sandbox runtime.

use thiserror::Error;

/// Main error type for the sandbox runtime.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),

    #[error("Sandbox dependencies unavailable: {}", .0.join(", "))]
    DependenciesUnavailable(Vec<String>),

    #[error("Seccomp unavailable: {0}")]
    SeccompUnavailable(String),

    #[error("Seccomp filter generation failed: {0}")]
    FilterGenerationFailed(String),

    #[error("Proxy failed to start: {0}")]
    ProxyStartFailed(String),

    #[error("Proxy process exited unexpectedly; network access revoked")]
    ProxyCrashed,

    #[error("Proxy control channel error: {0}")]
    ProxyControl(String),

    #[error("Sandbox manager not initialized")]
    NotInitialized,

    #[error("Sandbox manager has been torn down")]
    TornDown,

    #[error("Invalid mount pattern '{pattern}': {reason}")]
    InvalidMountPattern { pattern: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub(crate) fn invalid_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        SandboxError::InvalidMountPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

/// Settings-file errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid domain pattern '{pattern}': {reason}")]
    InvalidDomainPattern { pattern: String, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
