//! Utility modules.

pub mod debug;
pub mod path;
pub mod platform;
pub mod shell;

pub use debug::{init_debug_logging, is_debug_enabled, SRT_DEBUG_ENV};
pub use path::{contains_glob_chars, expand_home, is_symlink, path_depth, remove_trailing_glob_suffix};
pub use platform::{get_arch, Platform};
pub use shell::{join_args, quote};
