//! Host platform (linux for example) utility functions

use std::path::PathBuf;
use uname;

/// Environment variable pointing at the root of the software tree, the directory which holds
/// `params/` and `sessions/`.
pub const SW_ROOT_ENV_VAR: &str = "PID_DRIVE_ROOT";

/// Retrieve uname information.
pub fn get_uname() -> std::io::Result<uname::Info> {
    uname::uname()
}

/// Get the software root directory.
///
/// If `PID_DRIVE_ROOT` is not set the current working directory is used.
pub fn get_sw_root() -> std::io::Result<PathBuf> {
    match std::env::var_os(SW_ROOT_ENV_VAR) {
        Some(p) => Ok(PathBuf::from(p)),
        None => std::env::current_dir()
    }
}
