//! Path normalization utilities.

use std::path::{Component, Path};

/// Expand ~ to the home directory.
pub fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).display().to_string();
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.display().to_string();
        }
    }
    path.to_string()
}

/// Check if a path contains glob characters.
pub fn contains_glob_chars(path: &str) -> bool {
    path.contains('*') || path.contains('?') || path.contains('[') || path.contains('{')
}

/// Remove trailing glob suffix (e.g., /** or /*).
pub fn remove_trailing_glob_suffix(path: &str) -> String {
    let mut result = path;

    while let Some(stripped) = result.strip_suffix("/**") {
        result = stripped;
    }
    while let Some(stripped) = result.strip_suffix("/*") {
        result = stripped;
    }

    if result.is_empty() {
        "/".to_string()
    } else {
        result.to_string()
    }
}

/// Check if a path is a symlink (without following it).
pub fn is_symlink(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Number of normal components in a path; `/` has depth 0.
pub fn path_depth(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();

        assert_eq!(expand_home("~"), home.display().to_string());
        assert_eq!(
            expand_home("~/Documents"),
            home.join("Documents").display().to_string()
        );
        assert_eq!(expand_home("/absolute/path"), "/absolute/path");
        assert_eq!(expand_home("relative/path"), "relative/path");
    }

    #[test]
    fn test_contains_glob_chars() {
        assert!(contains_glob_chars("*.txt"));
        assert!(contains_glob_chars("src/**/*.rs"));
        assert!(contains_glob_chars("file?.txt"));
        assert!(contains_glob_chars("file[0-9].txt"));
        assert!(contains_glob_chars("file{a,b}.txt"));
        assert!(!contains_glob_chars("/plain/path"));
    }

    #[test]
    fn test_remove_trailing_glob_suffix() {
        assert_eq!(remove_trailing_glob_suffix("/path/**"), "/path");
        assert_eq!(remove_trailing_glob_suffix("/path/*"), "/path");
        assert_eq!(remove_trailing_glob_suffix("/path/**/**"), "/path");
        assert_eq!(remove_trailing_glob_suffix("/path"), "/path");
        assert_eq!(remove_trailing_glob_suffix("/**"), "/");
    }

    #[test]
    fn test_path_depth() {
        assert_eq!(path_depth(Path::new("/")), 0);
        assert_eq!(path_depth(Path::new("/work")), 1);
        assert_eq!(path_depth(Path::new("/work/readonly")), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_is_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, "x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(is_symlink(&link));
        assert!(!is_symlink(&target));
        assert!(!is_symlink(&dir.path().join("missing")));
    }
}
