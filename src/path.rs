// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way. None of these functions check
//! whether the path they return actually exists.

use std::path::PathBuf;

/// Name of the directory dotkit claims under XDG base directories.
pub const APP_DIR: &str = "dotkit";

/// Determine absolute path to user's home directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/dotkit/config.toml`.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join(APP_DIR).join("config.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to backup directory.
///
/// Uses `$XDG_DATA_HOME/dotkit/backups`. Tools that rewrite files in place
/// store their timestamped backups in a subdirectory of this path.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_backup_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join(APP_DIR).join("backups"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the directory stow packages are
/// created from, i.e., `~/.config`.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_stow_source() -> Result<PathBuf> {
    home_dir().map(|home| home.join(".config"))
}

/// Determine default absolute path to FNM's multishell state directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_fnm_multishells_dir() -> Result<PathBuf> {
    home_dir().map(|home| home.join(".local").join("state").join("fnm_multishells"))
}

/// Determine default absolute path to Claude Code's data directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_claude_dir() -> Result<PathBuf> {
    home_dir().map(|home| home.join(".claude"))
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[cfg(unix)]
    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn home_relative_defaults() -> anyhow::Result<()> {
        assert_eq!(default_stow_source()?, PathBuf::from("/home/blah/.config"));
        assert_eq!(
            default_fnm_multishells_dir()?,
            PathBuf::from("/home/blah/.local/state/fnm_multishells")
        );
        assert_eq!(default_claude_dir()?, PathBuf::from("/home/blah/.claude"));

        Ok(())
    }
}
