//! Platform detection utilities.

/// Platforms with a sandbox backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
}

impl Platform {
    /// Detect the current platform.
    /// All Linux including WSL returns Linux; use `get_wsl_version()` to detect WSL1.
    pub fn current() -> Option<Self> {
        #[cfg(target_os = "linux")]
        {
            Some(Platform::Linux)
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    /// Check if the current platform is supported.
    /// Returns false for unsupported platforms and WSL1.
    pub fn is_supported() -> bool {
        match Self::current() {
            // WSL1 lacks the user namespaces bubblewrap needs
            Some(Platform::Linux) => get_wsl_version().as_deref() != Some("1"),
            None => false,
        }
    }

    /// Get the platform name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Linux => "Linux",
        }
    }
}

/// Get the CPU architecture label used in vendored artifact paths.
pub fn get_arch() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    {
        "x64"
    }
    #[cfg(target_arch = "aarch64")]
    {
        "arm64"
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        "unknown"
    }
}

/// Get the WSL version (1 or 2+) if running in WSL.
///
/// Looks for an explicit "WSL<n>" marker in /proc/version; a bare "microsoft"
/// marker is the original WSL1 kernel string.
pub fn get_wsl_version() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let proc_version = std::fs::read_to_string("/proc/version").ok()?;
        parse_wsl_version_from_string(&proc_version)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(any(target_os = "linux", test))]
fn parse_wsl_version_from_string(proc_version: &str) -> Option<String> {
    let proc_lower = proc_version.to_lowercase();

    if let Some(pos) = proc_lower.find("wsl") {
        if let Some(ch) = proc_lower[pos + 3..].chars().next() {
            if ch.is_ascii_digit() {
                return Some(ch.to_string());
            }
        }
    }

    if proc_lower.contains("microsoft") {
        return Some("1".to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_arch() {
        let arch = get_arch();
        assert!(arch == "x64" || arch == "arm64" || arch == "unknown");
    }

    #[test]
    fn test_platform_current() {
        #[cfg(target_os = "linux")]
        assert_eq!(Platform::current(), Some(Platform::Linux));
        #[cfg(not(target_os = "linux"))]
        assert_eq!(Platform::current(), None);
    }

    #[test]
    fn test_wsl_version_parsing() {
        let wsl2 = "Linux version 5.15.90.1-microsoft-standard-WSL2 (oe-user@oe-host)";
        assert_eq!(parse_wsl_version_from_string(wsl2), Some("2".to_string()));

        let wsl1 = "Linux version 4.4.0-19041-Microsoft (Microsoft@Microsoft.com)";
        assert_eq!(parse_wsl_version_from_string(wsl1), Some("1".to_string()));

        let native = "Linux version 6.2.0-26-generic (buildd@ubuntu)";
        assert_eq!(parse_wsl_version_from_string(native), None);
        assert_eq!(parse_wsl_version_from_string(""), None);
    }
}
