//! Mandatory write protection merged into every filesystem policy.

use std::path::{Path, PathBuf};

use crate::config::{FilesystemPolicy, DANGEROUS_DIRECTORIES, DANGEROUS_FILES};
use crate::utils::{contains_glob_chars, expand_home, path_depth, remove_trailing_glob_suffix};

/// Existing well-known files and directories under `roots` that must stay
/// read-only. `.gitconfig` is left out when `allow_git_config` is set.
pub fn protected_paths(roots: &[&Path], allow_git_config: bool) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for root in roots {
        let names = DANGEROUS_FILES
            .iter()
            .filter(|name| !(allow_git_config && **name == ".gitconfig"))
            .chain(DANGEROUS_DIRECTORIES.iter());
        for name in names {
            let path = root.join(name);
            if path.exists() && !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    paths
}

/// Existing host paths named by `patterns`. Patterns that do not resolve are
/// skipped here; compiling the plan reports them.
fn resolved_paths(patterns: &[String]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let expanded = remove_trailing_glob_suffix(&expand_home(pattern));
        if contains_glob_chars(&expanded) {
            if let Ok(entries) = glob::glob(&expanded) {
                paths.extend(
                    entries
                        .flatten()
                        .filter_map(|path| std::fs::canonicalize(path).ok()),
                );
            }
        } else if let Ok(path) = std::fs::canonicalize(&expanded) {
            paths.push(path);
        }
    }
    paths
}

/// Whether the deepest caller entry covering `path` is a read mask.
/// On equal depth the exposing entry wins, as it comes later in the plan.
fn is_read_denied(path: &Path, masked: &[PathBuf], exposed: &[PathBuf]) -> bool {
    let deepest = |roots: &[PathBuf]| {
        roots
            .iter()
            .filter(|root| path.starts_with(root))
            .map(|root| path_depth(root))
            .max()
    };
    match (deepest(masked), deepest(exposed)) {
        (Some(mask), Some(exposing)) => mask > exposing,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// The policy actually compiled for `cwd`: the caller's policy with the
/// protected paths of the home and working directories appended to `deny_write`.
///
/// A protected path the caller has hidden with `deny_read` is left out, since a
/// read-only bind would bring its contents back.
pub fn effective_filesystem_policy(policy: &FilesystemPolicy, cwd: &Path) -> FilesystemPolicy {
    let home = dirs::home_dir();
    let mut roots: Vec<&Path> = Vec::new();
    if let Some(ref home) = home {
        roots.push(home);
    }
    if home.as_deref() != Some(cwd) {
        roots.push(cwd);
    }

    let masked = resolved_paths(&policy.deny_read);
    let mut exposed = resolved_paths(&policy.allow_write);
    exposed.extend(resolved_paths(&policy.deny_write));

    let mut effective = policy.clone();
    for path in protected_paths(&roots, policy.allow_git_config.unwrap_or(false)) {
        let resolved = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if is_read_denied(&resolved, &masked, &exposed) {
            tracing::debug!("{} is read-denied; not adding write protection", path.display());
            continue;
        }
        let path = path.display().to_string();
        if !effective.deny_write.contains(&path) {
            effective.deny_write.push(path);
        }
    }
    effective
}
