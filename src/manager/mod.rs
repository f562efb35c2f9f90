//! Sandbox manager - main orchestration module.

pub mod filesystem;
pub mod network;
pub mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::{NetworkPolicy, SandboxPolicy, SeccompConfig};
use crate::error::SandboxError;
use crate::proxy::supervisor::{default_proxy_program, DEFAULT_READY_TIMEOUT};
use crate::proxy::ProxyLaunch;
use crate::sandbox::{
    default_backend, CommandMode, DependencyCheck, DependencyStatus, SandboxBackend,
    SeccompArtifact, WrapRequest,
};

use self::state::{ManagerState, Released};

pub use filesystem::effective_filesystem_policy;
pub use state::SandboxState;

/// Host-specific settings of a manager.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Custom seccomp artifact locations.
    pub seccomp: Option<SeccompConfig>,
    /// Proxy binary; defaults to `srt-proxy` next to the current executable.
    pub proxy_program: Option<PathBuf>,
    /// Shell that runs wrapped commands.
    pub shell: String,
    /// Bound on waiting for the proxy to come up.
    pub proxy_ready_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            seccomp: None,
            proxy_program: None,
            shell: "/bin/bash".to_string(),
            proxy_ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// The sandbox manager - main entry point for sandbox operations.
///
/// One instance owns at most one proxy process and one seccomp artifact.
/// Instances are independent; tests can run several side by side.
pub struct SandboxManager {
    backend: Arc<dyn SandboxBackend>,
    options: ManagerOptions,
    state: RwLock<ManagerState>,
    /// Serializes initialize, update_config and teardown.
    lifecycle: tokio::sync::Mutex<()>,
}

impl SandboxManager {
    /// Create a manager for the current platform.
    pub fn new(options: ManagerOptions) -> Result<Self, SandboxError> {
        Ok(Self::with_backend(default_backend()?, options))
    }

    /// Create a manager with an explicit backend.
    pub fn with_backend(backend: Arc<dyn SandboxBackend>, options: ManagerOptions) -> Self {
        Self {
            backend,
            options,
            state: RwLock::new(ManagerState::default()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    fn launch(&self) -> ProxyLaunch {
        ProxyLaunch {
            program: self
                .options
                .proxy_program
                .clone()
                .unwrap_or_else(default_proxy_program),
            ready_timeout: self.options.proxy_ready_timeout,
        }
    }

    /// Probe the host. Usable without initializing.
    pub fn check_dependencies(&self) -> DependencyCheck {
        self.backend.check_dependencies(self.options.seccomp.as_ref())
    }

    /// Probe the host, reporting each dependency separately.
    pub fn dependency_status(&self) -> DependencyStatus {
        self.backend.dependency_status(self.options.seccomp.as_ref())
    }

    /// Initialize the sandbox with `policy`.
    ///
    /// On success the proxy is listening with the policy installed and every
    /// later wrap is enforced. Re-initializing a ready manager replaces its
    /// proxy and filter.
    pub async fn initialize(&self, policy: SandboxPolicy) -> Result<(), SandboxError> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.state() == SandboxState::TornDown {
            return Err(SandboxError::TornDown);
        }
        policy.validate()?;

        let check = self.check_dependencies().into_result()?;
        for warning in &check.warnings {
            tracing::warn!("{}", warning);
        }

        let previous = {
            let mut state = self.state.write();
            match state.state {
                SandboxState::Ready => Some(state.release(SandboxState::Uninitialized)),
                _ => None,
            }
        };
        if let Some(previous) = previous {
            tracing::debug!("Re-initializing; releasing previous proxy and filter");
            self.release(previous).await;
        }

        let filter = self.backend.acquire_filter(self.options.seccomp.as_ref());
        let proxy = match network::start_proxy(&self.launch(), &policy.network).await {
            Ok(proxy) => proxy,
            Err(e) => {
                if let Some(ref filter) = filter {
                    self.backend.release_filter(filter);
                }
                return Err(e);
            }
        };

        {
            let mut state = self.state.write();
            state.proxy = Some(proxy);
            state.filter = filter;
            state.policy = Some(policy);
            state.warnings = initialization_warnings(check.warnings, state.filter.as_ref());
            state.state = SandboxState::Ready;
        }

        tracing::info!(
            "Sandbox manager initialized for {}",
            self.backend.platform().name()
        );
        Ok(())
    }

    /// Replace the policy of a ready manager.
    ///
    /// The proxy is reconfigured in place (same process) before the stored
    /// policy is swapped. If the proxy has crashed the network stays revoked
    /// and only the stored policy changes.
    pub async fn update_config(&self, policy: SandboxPolicy) -> Result<(), SandboxError> {
        let _lifecycle = self.lifecycle.lock().await;

        policy.validate()?;
        let proxy = {
            let state = self.state.read();
            if state.state != SandboxState::Ready {
                return Err(SandboxError::NotInitialized);
            }
            state.proxy.clone()
        };

        if let Some(proxy) = proxy {
            match proxy.reconfigure(&policy.network).await {
                Ok(()) => {}
                Err(SandboxError::ProxyCrashed) => {
                    tracing::error!("Proxy has crashed; network access stays revoked");
                }
                Err(e) => return Err(e),
            }
        }

        self.state.write().policy = Some(policy);
        tracing::debug!("Sandbox policy updated");
        Ok(())
    }

    /// Wrap `command` so it runs under the current policy.
    ///
    /// The command is passed as a single argument to `<shell> -c`.
    pub async fn wrap_with_sandbox(&self, command: &str) -> Result<String, SandboxError> {
        self.wrap(command, CommandMode::Quoted)
    }

    /// Wrap `command` without quoting it; the outer shell parses it.
    pub async fn wrap_with_sandbox_unescaped(
        &self,
        command: &str,
    ) -> Result<String, SandboxError> {
        self.wrap(command, CommandMode::Unescaped)
    }

    fn wrap(&self, command: &str, mode: CommandMode) -> Result<String, SandboxError> {
        let (policy, proxy, filter) = {
            let state = self.state.read();
            match (state.state, &state.policy) {
                (SandboxState::Ready, Some(policy)) => {
                    (policy.clone(), state.proxy.clone(), state.filter.clone())
                }
                _ => return Err(SandboxError::NotInitialized),
            }
        };

        let cwd = std::env::current_dir()?;
        let fs_policy = effective_filesystem_policy(&policy.filesystem, &cwd);
        let plan = self.backend.compile_filesystem(&fs_policy)?;
        for warning in &plan.warnings {
            tracing::warn!("{}", warning);
        }

        let route = network::network_route(proxy.as_deref());
        let request = WrapRequest {
            command,
            mode,
            plan: &plan,
            filter: filter.as_ref(),
            network: &route,
            shell: &self.options.shell,
            cwd: &cwd,
        };
        self.backend.wrap_command(&request)
    }

    /// Network policy currently enforced; deny-all once the proxy is gone.
    pub fn get_network_restriction_config(&self) -> Option<NetworkPolicy> {
        let state = self.state.read();
        if state.state != SandboxState::Ready {
            return None;
        }
        let stored = state.policy.as_ref()?;
        Some(network::effective_network_policy(
            state.proxy.as_deref(),
            &stored.network,
        ))
    }

    /// Stop the proxy and delete generated artifacts. Idempotent.
    pub async fn teardown(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let released = {
            let mut state = self.state.write();
            if state.state == SandboxState::TornDown {
                return;
            }
            state.release(SandboxState::TornDown)
        };
        self.release(released).await;
        tracing::info!("Sandbox manager torn down");
    }

    async fn release(&self, released: Released) {
        if let Some(proxy) = released.proxy {
            proxy.stop().await;
        }
        if let Some(filter) = released.filter {
            self.backend.release_filter(&filter);
        }
    }

    pub fn state(&self) -> SandboxState {
        self.state.read().state
    }

    pub fn proxy_pid(&self) -> Option<u32> {
        self.state.read().proxy.as_ref().map(|p| p.pid())
    }

    pub fn http_proxy_addr(&self) -> Option<SocketAddr> {
        self.state.read().proxy.as_ref().map(|p| p.http_addr())
    }

    pub fn socks_proxy_addr(&self) -> Option<SocketAddr> {
        self.state.read().proxy.as_ref().map(|p| p.socks_addr())
    }

    /// The seccomp artifact in use, if any.
    pub fn filter_artifact(&self) -> Option<SeccompArtifact> {
        self.state.read().filter.clone()
    }

    /// Dependency warnings from the last initialize.
    pub fn warnings(&self) -> Vec<String> {
        self.state.read().warnings.clone()
    }
}

/// Suffix shared by every warning about running without the seccomp filter.
const UNRESTRICTED_UNIX_SOCKETS: &str = "unix socket access not restricted";

/// Dependency warnings plus an explicit one when no filter could be acquired.
fn initialization_warnings(
    mut warnings: Vec<String>,
    filter: Option<&SeccompArtifact>,
) -> Vec<String> {
    if filter.is_none() && !warnings.iter().any(|w| w.ends_with(UNRESTRICTED_UNIX_SOCKETS)) {
        warnings.push(
            SandboxError::SeccompUnavailable(format!(
                "no filter could be located or generated - {}",
                UNRESTRICTED_UNIX_SOCKETS
            ))
            .to_string(),
        );
    }
    warnings
}

impl Drop for SandboxManager {
    fn drop(&mut self) {
        // Dropping the proxy handle kills the process; owned bytecode is removed here.
        let released = self.state.get_mut().release(SandboxState::TornDown);
        drop(released.proxy);
        if let Some(filter) = released.filter {
            self.backend.release_filter(&filter);
        }
    }
}
