//! CLI parsing.

use std::path::PathBuf;

use clap::Parser;

/// Run a command under a filesystem and network policy
#[derive(Parser, Debug)]
#[command(name = "srt")]
#[command(about = "Run a command under an enforced filesystem and network policy")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Path to settings file (default: ~/.srt-settings.json)
    #[arg(short = 's', long = "settings")]
    pub settings: Option<PathBuf>,

    /// Run command string directly (sh -c mode)
    #[arg(short = 'c')]
    pub command: Option<String>,

    /// Read policy updates from file descriptor (JSON lines protocol)
    #[arg(long = "control-fd")]
    pub control_fd: Option<i32>,

    /// Let the outer shell parse the command instead of quoting it
    #[arg(long = "unescaped")]
    pub unescaped: bool,

    /// Command and arguments to run
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// The command to run: the `-c` string as given, or the positional
    /// arguments joined with each word quoted.
    pub fn get_command(&self) -> Option<String> {
        if let Some(ref cmd) = self.command {
            Some(cmd.clone())
        } else if !self.args.is_empty() {
            Some(crate::utils::join_args(&self.args))
        } else {
            None
        }
    }

    /// Get the settings file path.
    pub fn get_settings_path(&self) -> Option<PathBuf> {
        self.settings.clone().or_else(crate::config::default_settings_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_string() {
        let cli = Cli::parse_from(["srt", "-d", "-c", "echo hi && ls"]);
        assert!(cli.debug);
        assert!(!cli.unescaped);
        assert_eq!(cli.get_command().as_deref(), Some("echo hi && ls"));
    }

    #[test]
    fn test_positional_args_are_quoted() {
        let cli = Cli::parse_from(["srt", "--unescaped", "grep", "-r", "a b", "."]);
        assert!(cli.unescaped);
        assert_eq!(cli.get_command().as_deref(), Some("grep -r 'a b' ."));
    }

    #[test]
    fn test_no_command() {
        let cli = Cli::parse_from(["srt", "-s", "/tmp/settings.json", "--control-fd", "3"]);
        assert_eq!(cli.get_command(), None);
        assert_eq!(cli.control_fd, Some(3));
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/settings.json")));
    }
}
