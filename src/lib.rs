//! Policy Sandbox - wrap arbitrary commands with an enforced filesystem and network policy.
//!
//! A [`SandboxManager`] compiles a [`SandboxPolicy`] into a single command string:
//! - Filesystem: bubblewrap mounts (read-only root, masked, writable and
//!   read-only overrides)
//! - Network: no network namespace access except through a domain-filtering
//!   proxy process, reconfigurable while it runs
//! - Unix sockets: a seccomp filter blocking `AF_UNIX` socket creation

pub mod cli;
pub mod config;
pub mod error;
pub mod manager;
pub mod proxy;
pub mod sandbox;
pub mod utils;

pub use config::{FilesystemPolicy, NetworkPolicy, SandboxPolicy, SeccompConfig, Settings};
pub use error::{ConfigError, Result, SandboxError};
pub use manager::{ManagerOptions, SandboxManager, SandboxState};

/// Re-export commonly used items.
pub mod prelude {
    pub use crate::config::{NetworkPolicy, SandboxPolicy};
    pub use crate::error::{Result, SandboxError};
    pub use crate::manager::{ManagerOptions, SandboxManager, SandboxState};
}
