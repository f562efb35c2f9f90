//! Configuration module.

pub mod loader;
pub mod schema;

pub use loader::{
    default_settings_path, load_default_settings, load_settings, load_settings_from_string,
    parse_settings,
};
pub use schema::{
    matches_domain_pattern, FilesystemPolicy, NetworkPolicy, SandboxPolicy, SeccompConfig,
    Settings, DANGEROUS_DIRECTORIES, DANGEROUS_FILES,
};
