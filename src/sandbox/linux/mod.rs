//! Linux sandbox implementation using bubblewrap + seccomp.

pub mod bwrap;
pub mod filesystem;
pub mod probe;
pub mod seccomp;

use std::sync::Arc;

pub use bwrap::{generate_bwrap_command, generate_proxy_env, HTTP_BRIDGE_PORT, SOCKS_BRIDGE_PORT};
pub use filesystem::compile_mount_plan;
pub use probe::{HostProbe, LinuxTools, SystemProbe};
pub use seccomp::{get_apply_seccomp_path, get_bpf_path, is_seccomp_available};

use crate::config::{FilesystemPolicy, SeccompConfig};
use crate::error::SandboxError;
use crate::sandbox::{
    DependencyCheck, DependencyStatus, MountPlan, SandboxBackend, SeccompArtifact, WrapRequest,
};
use crate::utils::Platform;

/// Bubblewrap, socat and seccomp.
pub struct LinuxBackend {
    probe: Arc<dyn HostProbe>,
    tools: LinuxTools,
}

impl LinuxBackend {
    pub fn new() -> Self {
        Self::with_probe(Arc::new(SystemProbe::default()), LinuxTools::default())
    }

    /// Use a custom probe and tool names.
    pub fn with_probe(probe: Arc<dyn HostProbe>, tools: LinuxTools) -> Self {
        Self { probe, tools }
    }
}

impl Default for LinuxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxBackend for LinuxBackend {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn check_dependencies(&self, seccomp: Option<&SeccompConfig>) -> DependencyCheck {
        probe::check_linux_dependencies(self.probe.as_ref(), &self.tools, seccomp)
    }

    fn dependency_status(&self, seccomp: Option<&SeccompConfig>) -> DependencyStatus {
        probe::get_linux_dependency_status(self.probe.as_ref(), &self.tools, seccomp)
    }

    fn acquire_filter(&self, seccomp: Option<&SeccompConfig>) -> Option<SeccompArtifact> {
        seccomp::acquire_filter(seccomp)
    }

    fn release_filter(&self, artifact: &SeccompArtifact) {
        seccomp::release_filter(artifact)
    }

    fn compile_filesystem(&self, policy: &FilesystemPolicy) -> Result<MountPlan, SandboxError> {
        compile_mount_plan(policy)
    }

    fn wrap_command(&self, request: &WrapRequest<'_>) -> Result<String, SandboxError> {
        generate_bwrap_command(request, &self.tools.bwrap, &self.tools.socat)
    }
}
