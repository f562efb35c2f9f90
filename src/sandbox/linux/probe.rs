//! Host dependency probing.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::SeccompConfig;
use crate::sandbox::linux::seccomp::{get_apply_seccomp_path, get_bpf_path};
use crate::sandbox::{DependencyCheck, DependencyStatus};

/// Default bound on a single command probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Answers whether an external command can be run on this host.
pub trait HostProbe: Send + Sync {
    fn has_command(&self, program: &str) -> bool;
}

/// Probes by running `<program> --version`.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    timeout: Duration,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl SystemProbe {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl HostProbe for SystemProbe {
    fn has_command(&self, program: &str) -> bool {
        let mut child = match Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(_) => return false,
        };

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return status.success(),
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Ok(None) => {
                    tracing::debug!("Probe of '{}' timed out after {:?}", program, self.timeout);
                    let _ = child.kill();
                    let _ = child.wait();
                    return false;
                }
                Err(_) => return false,
            }
        }
    }
}

/// External commands the Linux backend depends on.
#[derive(Debug, Clone)]
pub struct LinuxTools {
    pub bwrap: String,
    pub socat: String,
}

impl Default for LinuxTools {
    fn default() -> Self {
        Self {
            bwrap: "bwrap".to_string(),
            socat: "socat".to_string(),
        }
    }
}

/// Get detailed status of Linux sandbox dependencies.
pub fn get_linux_dependency_status(
    probe: &dyn HostProbe,
    tools: &LinuxTools,
    seccomp_config: Option<&SeccompConfig>,
) -> DependencyStatus {
    DependencyStatus {
        has_bwrap: probe.has_command(&tools.bwrap),
        has_socat: probe.has_command(&tools.socat),
        has_seccomp_bpf: get_bpf_path(seccomp_config).is_ok(),
        has_seccomp_apply: get_apply_seccomp_path(seccomp_config).is_ok(),
    }
}

/// Check Linux sandbox dependencies, reporting every finding.
pub fn check_linux_dependencies(
    probe: &dyn HostProbe,
    tools: &LinuxTools,
    seccomp_config: Option<&SeccompConfig>,
) -> DependencyCheck {
    let status = get_linux_dependency_status(probe, tools, seccomp_config);
    let mut result = DependencyCheck::default();

    if !status.has_bwrap {
        result
            .errors
            .push("bubblewrap (bwrap) not installed".to_string());
    }
    if !status.has_socat {
        result.errors.push("socat not installed".to_string());
    }
    if !status.has_seccomp_bpf {
        result.warnings.push(
            "seccomp bytecode not found - unix socket access not restricted unless it can be generated"
                .to_string(),
        );
    }
    if !status.has_seccomp_apply {
        result.warnings.push(
            "seccomp apply-helper not found - unix socket access not restricted".to_string(),
        );
    }

    result
}
