//! Lifecycle state of a sandbox manager.

use std::sync::Arc;

use crate::config::SandboxPolicy;
use crate::proxy::ProxyHandle;
use crate::sandbox::SeccompArtifact;

/// Lifecycle of a [`SandboxManager`](super::SandboxManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Uninitialized,
    Ready,
    /// Terminal; a torn-down manager cannot be initialized again.
    TornDown,
}

/// Internal state for the sandbox manager.
pub(crate) struct ManagerState {
    pub state: SandboxState,

    /// Policy used by the next wrap.
    pub policy: Option<SandboxPolicy>,

    /// Filtering proxy; present exactly while `Ready`.
    pub proxy: Option<Arc<ProxyHandle>>,

    /// Seccomp artifact; absent in degraded mode.
    pub filter: Option<SeccompArtifact>,

    /// Dependency warnings from the last successful initialize.
    pub warnings: Vec<String>,
}

impl Default for ManagerState {
    fn default() -> Self {
        Self {
            state: SandboxState::Uninitialized,
            policy: None,
            proxy: None,
            filter: None,
            warnings: Vec::new(),
        }
    }
}

/// Resources detached from the state, released outside the lock.
pub(crate) struct Released {
    pub proxy: Option<Arc<ProxyHandle>>,
    pub filter: Option<SeccompArtifact>,
}

impl ManagerState {
    /// Detach the proxy and filter and move to `next`.
    pub fn release(&mut self, next: SandboxState) -> Released {
        self.state = next;
        self.policy = None;
        Released {
            proxy: self.proxy.take(),
            filter: self.filter.take(),
        }
    }
}
