//! Seccomp filter location, generation and cleanup.

use std::collections::BTreeMap;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};

use crate::config::SeccompConfig;
use crate::error::SandboxError;
use crate::sandbox::SeccompArtifact;
use crate::utils::get_arch;

/// Name of the apply-helper binary.
pub const APPLY_HELPER_NAME: &str = "srt-apply-seccomp";

/// Size of one serialized `struct sock_filter`.
pub const SOCK_FILTER_SIZE: usize = 8;

/// Vendored locations relative to the working directory and the executable.
fn vendor_locations(file: &str) -> Vec<PathBuf> {
    let arch = get_arch();
    let relative = [
        format!("vendor/seccomp/{}/{}", arch, file),
        format!("../vendor/seccomp/{}/{}", arch, file),
        format!("../../vendor/seccomp/{}/{}", arch, file),
    ];

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    let mut locations = Vec::new();
    for location in &relative {
        locations.push(PathBuf::from(location));
        if let Some(ref dir) = exe_dir {
            locations.push(dir.join(location));
        }
    }
    locations
}

/// Get the path to a pre-generated seccomp BPF filter.
///
/// An explicit override is authoritative: when set, no other location is tried.
pub fn get_bpf_path(config: Option<&SeccompConfig>) -> Result<PathBuf, SandboxError> {
    if let Some(path) = config.and_then(|c| c.bpf_path.as_ref()) {
        return if path.is_file() {
            Ok(path.clone())
        } else {
            Err(SandboxError::SeccompUnavailable(format!(
                "configured BPF filter {} does not exist",
                path.display()
            )))
        };
    }

    let locations = vendor_locations("unix-block.bpf");
    locations
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| {
            SandboxError::SeccompUnavailable(format!(
                "no seccomp BPF filter for architecture '{}'. Checked: {:?}",
                get_arch(),
                locations
            ))
        })
}

/// Get the path to the apply-seccomp helper.
///
/// Looks at the override, the vendored locations, then for `srt-apply-seccomp`
/// next to the current executable and on `PATH`.
pub fn get_apply_seccomp_path(config: Option<&SeccompConfig>) -> Result<PathBuf, SandboxError> {
    if let Some(path) = config.and_then(|c| c.apply_path.as_ref()) {
        return if path.is_file() {
            Ok(path.clone())
        } else {
            Err(SandboxError::SeccompUnavailable(format!(
                "configured apply-helper {} does not exist",
                path.display()
            )))
        };
    }

    let mut locations = vendor_locations("apply-seccomp");
    if let Ok(exe) = std::env::current_exe() {
        // target/<profile>/deps/<test> keeps binaries one level up
        for dir in exe.ancestors().skip(1).take(2) {
            locations.push(dir.join(APPLY_HELPER_NAME));
        }
    }
    if let Some(paths) = std::env::var_os("PATH") {
        locations.extend(std::env::split_paths(&paths).map(|dir| dir.join(APPLY_HELPER_NAME)));
    }

    locations
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| {
            SandboxError::SeccompUnavailable(format!(
                "no seccomp apply-helper for architecture '{}'",
                get_arch()
            ))
        })
}

/// Check if a complete pre-generated filter is available.
pub fn is_seccomp_available(config: Option<&SeccompConfig>) -> bool {
    get_bpf_path(config).is_ok() && get_apply_seccomp_path(config).is_ok()
}

fn target_arch() -> Result<TargetArch, SandboxError> {
    if cfg!(target_arch = "x86_64") {
        Ok(TargetArch::x86_64)
    } else if cfg!(target_arch = "aarch64") {
        Ok(TargetArch::aarch64)
    } else {
        Err(SandboxError::FilterGenerationFailed(format!(
            "unsupported architecture '{}'",
            std::env::consts::ARCH
        )))
    }
}

/// Build the filter that makes `socket(AF_UNIX, ...)` and
/// `socketpair(AF_UNIX, ...)` fail with EPERM and allows everything else.
pub fn build_unix_block_program() -> Result<BpfProgram, SandboxError> {
    let generation_failed =
        |e: &dyn std::fmt::Display| SandboxError::FilterGenerationFailed(e.to_string());

    let unix_domain = SeccompRule::new(vec![SeccompCondition::new(
        0,
        SeccompCmpArgLen::Dword,
        SeccompCmpOp::Eq,
        libc::AF_UNIX as u64,
    )
    .map_err(|e| generation_failed(&e))?])
    .map_err(|e| generation_failed(&e))?;

    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
    rules.insert(libc::SYS_socket, vec![unix_domain.clone()]);
    rules.insert(libc::SYS_socketpair, vec![unix_domain]);

    let filter = SeccompFilter::new(
        rules,
        SeccompAction::Allow,
        SeccompAction::Errno(libc::EPERM as u32),
        target_arch()?,
    )
    .map_err(|e| generation_failed(&e))?;

    filter.try_into().map_err(|e: seccompiler::BackendError| generation_failed(&e))
}

/// Serialize a program as consecutive native-endian `struct sock_filter` records.
pub fn serialize_program(program: &BpfProgram) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(program.len() * SOCK_FILTER_SIZE);
    for instruction in program {
        bytes.extend_from_slice(&instruction.code.to_ne_bytes());
        bytes.push(instruction.jt);
        bytes.push(instruction.jf);
        bytes.extend_from_slice(&instruction.k.to_ne_bytes());
    }
    bytes
}

/// Generate the bytecode into a private temporary directory owned by the caller.
fn generate_bpf_file() -> Result<PathBuf, SandboxError> {
    let bytes = serialize_program(&build_unix_block_program()?);

    let dir = tempfile::Builder::new()
        .prefix("srt-seccomp-")
        .tempdir()
        .map_err(|e| SandboxError::FilterGenerationFailed(e.to_string()))?
        .into_path();
    let path = dir.join("unix-block.bpf");

    let write = || -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;
        file.write_all(&bytes)?;
        file.sync_all()
    };
    if let Err(e) = write() {
        let _ = std::fs::remove_dir_all(&dir);
        return Err(SandboxError::FilterGenerationFailed(e.to_string()));
    }

    Ok(path)
}

/// Locate a pre-generated filter or generate one.
///
/// Returns None when no apply-helper exists or generation fails; the sandbox
/// then runs without unix socket restrictions.
pub fn acquire_filter(config: Option<&SeccompConfig>) -> Option<SeccompArtifact> {
    let apply_helper_path = match get_apply_seccomp_path(config) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!("{}; unix socket access will not be restricted", e);
            return None;
        }
    };

    if let Ok(bpf_path) = get_bpf_path(config) {
        tracing::debug!("Using seccomp filter {}", bpf_path.display());
        return Some(SeccompArtifact {
            bpf_path,
            apply_helper_path,
            owned: false,
        });
    }

    match generate_bpf_file() {
        Ok(bpf_path) => {
            tracing::debug!("Generated seccomp filter {}", bpf_path.display());
            Some(SeccompArtifact {
                bpf_path,
                apply_helper_path,
                owned: true,
            })
        }
        Err(e) => {
            tracing::warn!("{}; unix socket access will not be restricted", e);
            None
        }
    }
}

/// Delete generated bytecode and its directory. Never touches unowned files.
pub fn release_filter(artifact: &SeccompArtifact) {
    if !artifact.owned {
        return;
    }

    match std::fs::remove_file(&artifact.bpf_path) {
        Ok(()) => tracing::debug!("Removed seccomp filter {}", artifact.bpf_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            "Failed to remove seccomp filter {}: {}",
            artifact.bpf_path.display(),
            e
        ),
    }
    if let Some(dir) = artifact.bpf_path.parent() {
        let _ = std::fs::remove_dir(dir);
    }
}
