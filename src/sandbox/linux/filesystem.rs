//! Filesystem policy compilation into bubblewrap mounts.

use std::path::{Path, PathBuf};

use crate::config::FilesystemPolicy;
use crate::error::SandboxError;
use crate::sandbox::{MountDirective, MountKind, MountPlan};
use crate::utils::{
    contains_glob_chars, expand_home, is_symlink, path_depth, remove_trailing_glob_suffix,
};

fn kind_label(kind: MountKind) -> &'static str {
    match kind {
        MountKind::Mask => "denyRead",
        MountKind::ReadWrite => "allowWrite",
        MountKind::ReadOnly => "denyWrite",
    }
}

/// Compile a filesystem policy into an ordered mount plan.
///
/// Directives keep their (denyRead, allowWrite, denyWrite) order, a later
/// directive replaces an earlier one on the same path, and the result is
/// sorted by depth so that a deeper path always overrides its ancestors.
pub fn compile_mount_plan(policy: &FilesystemPolicy) -> Result<MountPlan, SandboxError> {
    let mut plan = MountPlan::default();
    let mut directives: Vec<MountDirective> = Vec::new();

    let groups = [
        (&policy.deny_read, MountKind::Mask),
        (&policy.allow_write, MountKind::ReadWrite),
        (&policy.deny_write, MountKind::ReadOnly),
    ];

    for (patterns, kind) in groups {
        for pattern in patterns {
            let paths = resolve_pattern(pattern)?;
            if paths.is_empty() {
                plan.warnings.push(format!(
                    "{} path '{}' does not exist",
                    kind_label(kind),
                    pattern
                ));
                continue;
            }

            for path in paths {
                directives.retain(|d| d.path != path);
                let is_dir = path.is_dir();
                directives.push(MountDirective { path, kind, is_dir });
            }
        }
    }

    directives.sort_by_key(|d| path_depth(&d.path));
    plan.directives = directives;

    for warning in &plan.warnings {
        tracing::debug!("{}", warning);
    }
    Ok(plan)
}

/// Resolve one pattern to the existing host paths it names.
fn resolve_pattern(pattern: &str) -> Result<Vec<PathBuf>, SandboxError> {
    let expanded = expand_home(pattern);
    if !Path::new(&expanded).is_absolute() {
        return Err(SandboxError::invalid_pattern(
            pattern,
            "relative paths are not supported",
        ));
    }

    // "dir/**" names the directory itself
    let expanded = remove_trailing_glob_suffix(&expanded);

    if !contains_glob_chars(&expanded) {
        return Ok(resolve_existing(pattern, Path::new(&expanded))?
            .into_iter()
            .collect());
    }

    let entries = glob::glob(&expanded)
        .map_err(|e| SandboxError::invalid_pattern(pattern, e.to_string()))?;
    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => {
                if let Some(resolved) = resolve_existing(pattern, &path)? {
                    if !paths.contains(&resolved) {
                        paths.push(resolved);
                    }
                }
            }
            Err(e) => tracing::debug!("Skipping unreadable match of '{}': {}", pattern, e),
        }
    }
    Ok(paths)
}

/// Canonicalize a path; None if nothing exists there.
fn resolve_existing(pattern: &str, path: &Path) -> Result<Option<PathBuf>, SandboxError> {
    match std::fs::canonicalize(path) {
        Ok(resolved) => Ok(Some(resolved)),
        Err(_) if is_symlink(path) => Err(SandboxError::invalid_pattern(
            pattern,
            format!("symlink {} points to a missing target", path.display()),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SandboxError::invalid_pattern(pattern, e.to_string())),
    }
}

/// Bubblewrap arguments for one directive.
pub fn directive_to_bwrap_args(directive: &MountDirective) -> Vec<String> {
    let path = directive.path.display().to_string();
    match directive.kind {
        MountKind::Mask if directive.is_dir => vec!["--tmpfs".to_string(), path],
        MountKind::Mask => vec!["--ro-bind".to_string(), "/dev/null".to_string(), path],
        MountKind::ReadWrite => vec!["--bind".to_string(), path.clone(), path],
        MountKind::ReadOnly => vec!["--ro-bind".to_string(), path.clone(), path],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::create_dir_all(root.join("secret")).unwrap();
        std::fs::create_dir_all(root.join("work/readonly")).unwrap();
        (dir, root)
    }

    fn p(path: &Path) -> String {
        path.display().to_string()
    }

    #[test]
    fn test_deny_write_inside_allow_write() {
        let (_dir, root) = fixture();
        let policy = FilesystemPolicy {
            deny_read: vec![p(&root.join("secret"))],
            allow_write: vec![p(&root.join("work"))],
            deny_write: vec![p(&root.join("work/readonly"))],
            allow_git_config: None,
        };

        let plan = compile_mount_plan(&policy).unwrap();
        assert!(plan.warnings.is_empty());

        let kinds: Vec<_> = plan.directives.iter().map(|d| (d.path.clone(), d.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (root.join("secret"), MountKind::Mask),
                (root.join("work"), MountKind::ReadWrite),
                (root.join("work/readonly"), MountKind::ReadOnly),
            ]
        );
    }

    #[test]
    fn test_deeper_paths_come_last_regardless_of_declaration() {
        let (_dir, root) = fixture();
        let policy = FilesystemPolicy {
            deny_read: vec![p(&root.join("work/readonly"))],
            allow_write: vec![p(&root.join("work"))],
            ..Default::default()
        };

        let plan = compile_mount_plan(&policy).unwrap();
        assert_eq!(plan.directives[0].path, root.join("work"));
        assert_eq!(plan.directives[1].path, root.join("work/readonly"));
        assert_eq!(plan.directives[1].kind, MountKind::Mask);
    }

    #[test]
    fn test_same_path_later_directive_wins() {
        let (_dir, root) = fixture();
        let work = p(&root.join("work"));
        let policy = FilesystemPolicy {
            allow_write: vec![work.clone()],
            deny_write: vec![work],
            ..Default::default()
        };

        let plan = compile_mount_plan(&policy).unwrap();
        assert_eq!(plan.directives.len(), 1);
        assert_eq!(plan.kind_of(&root.join("work")), Some(MountKind::ReadOnly));
    }

    #[test]
    fn test_missing_path_is_a_warning() {
        let (_dir, root) = fixture();
        let missing = p(&root.join("nope"));
        let policy = FilesystemPolicy {
            allow_write: vec![missing.clone()],
            ..Default::default()
        };

        let plan = compile_mount_plan(&policy).unwrap();
        assert!(plan.directives.is_empty());
        assert_eq!(
            plan.warnings,
            vec![format!("allowWrite path '{}' does not exist", missing)]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_invalid() {
        let (_dir, root) = fixture();
        let link = root.join("dangling");
        std::os::unix::fs::symlink(root.join("missing-target"), &link).unwrap();

        let policy = FilesystemPolicy {
            deny_read: vec![p(&link)],
            ..Default::default()
        };
        match compile_mount_plan(&policy) {
            Err(SandboxError::InvalidMountPattern { pattern, .. }) => assert_eq!(pattern, p(&link)),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_relative_pattern_is_invalid() {
        let policy = FilesystemPolicy {
            allow_write: vec!["relative/dir".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            compile_mount_plan(&policy),
            Err(SandboxError::InvalidMountPattern { .. })
        ));
    }

    #[test]
    fn test_glob_patterns() {
        let (_dir, root) = fixture();
        std::fs::write(root.join("work/a.env"), "").unwrap();
        std::fs::write(root.join("work/b.env"), "").unwrap();

        let policy = FilesystemPolicy {
            deny_read: vec![format!("{}/work/*.env", p(&root))],
            ..Default::default()
        };
        let plan = compile_mount_plan(&policy).unwrap();
        assert_eq!(plan.directives.len(), 2);
        assert!(plan.directives.iter().all(|d| d.kind == MountKind::Mask && !d.is_dir));

        let invalid = FilesystemPolicy {
            deny_read: vec![format!("{}/work/[", p(&root))],
            ..Default::default()
        };
        assert!(matches!(
            compile_mount_plan(&invalid),
            Err(SandboxError::InvalidMountPattern { .. })
        ));
    }

    #[test]
    fn test_trailing_glob_names_the_directory() {
        let (_dir, root) = fixture();
        let policy = FilesystemPolicy {
            allow_write: vec![format!("{}/work/**", p(&root))],
            ..Default::default()
        };
        let plan = compile_mount_plan(&policy).unwrap();
        assert_eq!(plan.kind_of(&root.join("work")), Some(MountKind::ReadWrite));
    }

    #[test]
    fn test_directive_to_bwrap_args() {
        let args = |path: &str, kind, is_dir| {
            directive_to_bwrap_args(&MountDirective {
                path: PathBuf::from(path),
                kind,
                is_dir,
            })
        };

        assert_eq!(args("/secret", MountKind::Mask, true), vec!["--tmpfs", "/secret"]);
        assert_eq!(
            args("/secret.txt", MountKind::Mask, false),
            vec!["--ro-bind", "/dev/null", "/secret.txt"]
        );
        assert_eq!(args("/work", MountKind::ReadWrite, true), vec!["--bind", "/work", "/work"]);
        assert_eq!(
            args("/work/ro", MountKind::ReadOnly, true),
            vec!["--ro-bind", "/work/ro", "/work/ro"]
        );
    }
}
