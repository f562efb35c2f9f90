//! Platform sandbox backends.
//!
//! The manager talks to one [`SandboxBackend`], chosen once by
//! [`default_backend`]. Each backend turns the platform-neutral pieces (a
//! filesystem policy, an optional seccomp artifact, a route to the proxy) into
//! a command string for its enforcement tools.

#[cfg(target_os = "linux")]
pub mod linux;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{FilesystemPolicy, SeccompConfig};
use crate::error::SandboxError;
use crate::utils::Platform;

/// Independent availability flags for each enforcement primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependencyStatus {
    /// Filesystem isolation tool (bubblewrap).
    pub has_bwrap: bool,
    /// Bridge tool connecting the sandbox to the proxy (socat).
    pub has_socat: bool,
    /// Pre-generated seccomp bytecode.
    pub has_seccomp_bpf: bool,
    /// Seccomp apply-helper.
    pub has_seccomp_apply: bool,
}

/// Result of checking sandbox dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyCheck {
    /// Errors that prevent the sandbox from running.
    pub errors: Vec<String>,
    /// Warnings about degraded functionality.
    pub warnings: Vec<String>,
}

impl DependencyCheck {
    /// Returns true if there are no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert to Result, failing with every error at once.
    pub fn into_result(self) -> Result<Self, SandboxError> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(SandboxError::DependenciesUnavailable(self.errors))
        }
    }
}

/// Seccomp bytecode plus the helper that installs it before exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeccompArtifact {
    pub bpf_path: PathBuf,
    pub apply_helper_path: PathBuf,
    /// The bytecode was generated by this process and is deleted on release.
    pub owned: bool,
}

/// How a path is exposed inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    /// Contents hidden.
    Mask,
    /// Writable bind.
    ReadWrite,
    /// Read-only bind.
    ReadOnly,
}

/// One entry of a mount plan, on a fully resolved host path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDirective {
    pub path: PathBuf,
    pub kind: MountKind,
    /// The path is a directory (affects how a mask is expressed).
    pub is_dir: bool,
}

/// Ordered mount directives; later entries override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountPlan {
    pub directives: Vec<MountDirective>,
    pub warnings: Vec<String>,
}

impl MountPlan {
    /// The directive that finally applies to exactly `path`, if any.
    pub fn kind_of(&self, path: &Path) -> Option<MountKind> {
        self.directives
            .iter()
            .rev()
            .find(|d| d.path == path)
            .map(|d| d.kind)
    }
}

/// How the wrapped command string is built from the caller's command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    /// The command is one quoted argument to `<shell> -c`.
    Quoted,
    /// The command is appended verbatim; the outer shell parses it.
    Unescaped,
}

/// Where the sandbox's network traffic goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkRoute {
    /// Through the filtering proxy's Unix sockets.
    Proxied {
        socket_dir: PathBuf,
        http_socket: PathBuf,
        socks_socket: PathBuf,
    },
    /// Nowhere: no bridges, no proxy environment.
    Revoked,
}

/// Everything a backend needs to produce one wrapped command.
#[derive(Debug, Clone)]
pub struct WrapRequest<'a> {
    pub command: &'a str,
    pub mode: CommandMode,
    pub plan: &'a MountPlan,
    pub filter: Option<&'a SeccompArtifact>,
    pub network: &'a NetworkRoute,
    pub shell: &'a str,
    pub cwd: &'a Path,
}

/// The enforcement capabilities of one platform.
pub trait SandboxBackend: Send + Sync {
    /// Platform this backend enforces on.
    fn platform(&self) -> Platform;

    /// Probe the host; errors block initialization, warnings degrade it.
    fn check_dependencies(&self, seccomp: Option<&SeccompConfig>) -> DependencyCheck;

    /// The same probes as independent flags.
    fn dependency_status(&self, seccomp: Option<&SeccompConfig>) -> DependencyStatus;

    /// Locate or generate the seccomp artifact; None means degraded mode.
    fn acquire_filter(&self, seccomp: Option<&SeccompConfig>) -> Option<SeccompArtifact>;

    /// Delete whatever `acquire_filter` created. Idempotent.
    fn release_filter(&self, artifact: &SeccompArtifact);

    /// Compile the filesystem policy into a mount plan.
    fn compile_filesystem(&self, policy: &FilesystemPolicy) -> Result<MountPlan, SandboxError>;

    /// Assemble the final command string.
    fn wrap_command(&self, request: &WrapRequest<'_>) -> Result<String, SandboxError>;
}

/// Select the backend for the current platform.
pub fn default_backend() -> Result<Arc<dyn SandboxBackend>, SandboxError> {
    #[cfg(target_os = "linux")]
    {
        if !Platform::is_supported() {
            return Err(SandboxError::UnsupportedPlatform(
                "WSL1 lacks the namespaces bubblewrap needs".to_string(),
            ));
        }
        Ok(Arc::new(linux::LinuxBackend::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(SandboxError::UnsupportedPlatform(
            std::env::consts::OS.to_string(),
        ))
    }
}
